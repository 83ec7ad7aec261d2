//! Software detection over application banners
//!
//! Two passes: the loaded service probes (exact fingerprints with metadata
//! binding) and a generic harvester that flags any banner line naming a
//! product next to a dotted version number.

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::digest::PacketDigest;
use crate::metrics;
use crate::probe::{ServiceHit, ServiceProbe};

lazy_static! {
    /// A word followed by a dotted version, with the common `v`/`version`/
    /// `[Version ...]` spellings in between. Horizontal whitespace only, so
    /// a match never spans banner lines.
    static ref GENERIC_VERSION: Regex = Regex::new(
        r"(?m)^.*\b[A-Za-z][\w-]+[^\S\r\n]\[?(?:[Vv]ersion[^\S\r\n]?|[Vv])?\d+\.\d+[\d.]*\]?.*$"
    )
    .expect("generic version pattern must compile");
}

/// One piece of software evidence extracted from a banner
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SoftwareHint {
    /// Flow the banner was carried on
    pub flow_ident: String,

    /// Service name guessed from the port, may be empty
    pub service: String,

    /// The banner line the evidence was found in
    pub notes: String,

    /// Capture timestamp in nanoseconds since epoch
    pub timestamp: i64,
}

/// Extract version evidence from a banner, one hint per matching line
pub fn harvest_banner(banner: &str, flow_ident: &str, service: &str, timestamp: i64) -> Vec<SoftwareHint> {
    GENERIC_VERSION
        .find_iter(banner)
        .map(|m| SoftwareHint {
            flow_ident: flow_ident.to_string(),
            service: service.to_string(),
            notes: m.as_str().to_string(),
            timestamp,
        })
        .collect()
}

/// Run the probe set against a banner; the first matching probe wins
pub fn detect_service<'a>(probes: &'a [ServiceProbe], banner: &str) -> Option<(&'a ServiceProbe, ServiceHit)> {
    probes
        .iter()
        .find_map(|probe| probe.match_banner(banner).map(|hit| (probe, hit)))
}

/// Run both passes over a digest's application banner, logging the evidence
/// and bumping the detection counters. Digests without a banner are a no-op.
pub fn inspect_digest(probes: &[ServiceProbe], digest: &PacketDigest) {
    let app = match &digest.application {
        Some(app) => app,
        None => return,
    };
    let banner = match app.banner.as_deref() {
        Some(banner) if !banner.is_empty() => banner,
        _ => return,
    };

    let flow_ident = digest.flow_key();

    if let Some((probe, hit)) = detect_service(probes, banner) {
        metrics::SERVICES_DETECTED.inc();
        debug!(
            flow = %flow_ident,
            probe = %probe.ident,
            vendor = %hit.vendor,
            version = %hit.version,
            "service fingerprint matched"
        );
    }

    for hint in harvest_banner(banner, &flow_ident, &app.proto, digest.timestamp) {
        metrics::SOFTWARE_HINTS.inc();
        debug!(
            flow = %hint.flow_ident,
            service = %hint.service,
            "software version evidence: {}", hint.notes
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProbeConfig;
    use crate::probe::parse_probes;

    fn notes(banner: &str) -> Vec<String> {
        harvest_banner(banner, "test", "test", 0)
            .into_iter()
            .map(|h| h.notes)
            .collect()
    }

    #[test]
    fn test_windows_banner() {
        let banner = "Test123\nMicrosoft Windows [Version 10.0.10586]\n(c) 2015 Microsoft Corporation. All rights reserved. \nC:\\cygwin\\netcat>";
        assert_eq!(notes(banner), vec!["Microsoft Windows [Version 10.0.10586]"]);
    }

    #[test]
    fn test_multiple_products_in_one_banner() {
        let banner = "Hello dears,\nfor our hosting we will use Apache 2.4.29\nThere are other options,howver,\nlike Lighttp 2.3.4";
        assert_eq!(
            notes(banner),
            vec![
                "for our hosting we will use Apache 2.4.29",
                "like Lighttp 2.3.4"
            ]
        );
    }

    #[test]
    fn test_v_prefix() {
        let banner = "We will test\ncan we detect NginX v2.3.4\nI hope so\nwe'll see";
        assert_eq!(notes(banner), vec!["can we detect NginX v2.3.4"]);
    }

    #[test]
    fn test_version_word() {
        let banner = "We will test\ncan we detect NginX version 2.3.4\nI hope so\nwe'll see";
        assert_eq!(notes(banner), vec!["can we detect NginX version 2.3.4"]);
    }

    #[test]
    fn test_no_version_no_hint() {
        assert!(notes("plain text without any products").is_empty());
        assert!(notes("Test123").is_empty());
    }

    #[test]
    fn test_inspect_digest_counts_banner_evidence() {
        use crate::digest::{AppDigest, NetworkDigest, TransportDigest};

        let probes = parse_probes(
            "match ssh m|^SSH-| p/OpenSSH/\n",
            &ProbeConfig {
                enabled: true,
                path: String::new(),
                use_re2: true,
            },
        );

        let mut digest = PacketDigest {
            link: None,
            network: Some(NetworkDigest {
                proto: "IPv4".to_string(),
                src_ip: "10.0.0.1".parse().unwrap(),
                dst_ip: "10.0.0.2".parse().unwrap(),
            }),
            transport: Some(TransportDigest {
                proto: "TCP".to_string(),
                src_port: 49152,
                dst_port: 22,
            }),
            application: None,
            timestamp: 0,
            wire_len: 87,
        };

        let services_before = metrics::SERVICES_DETECTED.get();
        let hints_before = metrics::SOFTWARE_HINTS.get();

        // no application layer, no banner: nothing counted
        inspect_digest(&probes, &digest);
        assert_eq!(metrics::SERVICES_DETECTED.get(), services_before);
        assert_eq!(metrics::SOFTWARE_HINTS.get(), hints_before);

        digest.application = Some(AppDigest {
            proto: "SSH".to_string(),
            payload_len: 21,
            banner: Some("SSH-2.0-OpenSSH_8.9\r\n".to_string()),
        });
        inspect_digest(&probes, &digest);
        assert_eq!(metrics::SERVICES_DETECTED.get(), services_before + 1);
        assert_eq!(metrics::SOFTWARE_HINTS.get(), hints_before);
    }

    #[test]
    fn test_detect_service_first_match_wins() {
        let data = "match ssh m|^SSH-| p/OpenSSH/\nmatch generic m|^SSH| p/Generic/\n";
        let probes = parse_probes(
            data,
            &ProbeConfig {
                enabled: true,
                path: String::new(),
                use_re2: true,
            },
        );

        let (probe, hit) = detect_service(&probes, "SSH-2.0-OpenSSH_8.9").unwrap();
        assert_eq!(probe.ident, "ssh");
        assert_eq!(hit.vendor, "OpenSSH");

        assert!(detect_service(&probes, "HTTP/1.1 200 OK").is_none());
    }
}
