//! Nmap service probe loading
//!
//! Reads an `nmap-service-probes` compatible file, keeps the `match`
//! directives, and compiles each pattern with either the finite-state engine
//! (after rewriting, see [`rewrite`]) or the backtracking engine. Probes
//! whose pattern fails to compile are dropped.

pub mod parser;
pub mod rewrite;

pub use parser::{MatchDirective, ParseError};

use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

use crate::config::ProbeConfig;

/// Probe identifiers skipped during loading; their patterns are known to
/// misbehave with either engine
const IGNORED_PROBES: [&str; 4] = ["pc-duo-gw", "ventrilo", "pc-duo", "ssl"];

enum Matcher {
    /// Linear-time engine over the rewritten pattern
    Automaton(regex::Regex),
    /// Backtracking engine over the unmodified pattern
    Backtracking(Box<fancy_regex::Regex>),
}

/// A compiled service probe with its version metadata
#[derive(Serialize)]
pub struct ServiceProbe {
    pub ident: String,

    /// The compiled pattern text, inline flags included
    pub regex_raw: String,

    #[serde(skip_serializing)]
    matcher: Matcher,

    pub case_insensitive: bool,
    pub include_newlines: bool,

    pub vendor: String,
    pub version: String,
    pub info: String,
    pub hostname: String,
    pub os: String,
    pub device_type: String,
}

/// Fields bound on a successful banner match, `$N` references resolved
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceHit {
    pub ident: String,
    pub vendor: String,
    pub version: String,
    pub info: String,
    pub hostname: String,
    pub os: String,
    pub device_type: String,
}

impl std::fmt::Debug for ServiceProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceProbe")
            .field("ident", &self.ident)
            .field("regex_raw", &self.regex_raw)
            .field("vendor", &self.vendor)
            .finish_non_exhaustive()
    }
}

impl ServiceProbe {
    /// Whether the banner matches this probe
    pub fn is_match(&self, banner: &str) -> bool {
        match &self.matcher {
            Matcher::Automaton(re) => re.is_match(banner),
            Matcher::Backtracking(re) => re.is_match(banner).unwrap_or(false),
        }
    }

    /// Match the banner and bind the metadata fields.
    ///
    /// Probe metadata may reference capture groups perl-style (`$1`, `$2`);
    /// references without a corresponding group resolve to the empty string.
    pub fn match_banner(&self, banner: &str) -> Option<ServiceHit> {
        let groups = self.capture_groups(banner)?;

        Some(ServiceHit {
            ident: self.ident.clone(),
            vendor: resolve_refs(&self.vendor, &groups),
            version: resolve_refs(&self.version, &groups),
            info: resolve_refs(&self.info, &groups),
            hostname: resolve_refs(&self.hostname, &groups),
            os: resolve_refs(&self.os, &groups),
            device_type: resolve_refs(&self.device_type, &groups),
        })
    }

    fn capture_groups(&self, banner: &str) -> Option<Vec<Option<String>>> {
        match &self.matcher {
            Matcher::Automaton(re) => re.captures(banner).map(|caps| {
                (0..caps.len())
                    .map(|i| caps.get(i).map(|m| m.as_str().to_string()))
                    .collect()
            }),
            Matcher::Backtracking(re) => re.captures(banner).ok().flatten().map(|caps| {
                (0..caps.len())
                    .map(|i| caps.get(i).map(|m| m.as_str().to_string()))
                    .collect()
            }),
        }
    }
}

/// Replace `$N` references with the corresponding capture group text
fn resolve_refs(template: &str, groups: &[Option<String>]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        let digits: String = after.chars().take_while(|c| c.is_ascii_digit()).collect();
        if digits.is_empty() {
            out.push('$');
            rest = after;
            continue;
        }

        if let Ok(n) = digits.parse::<usize>() {
            if let Some(Some(group)) = groups.get(n) {
                out.push_str(group);
            }
        }
        rest = &after[digits.len()..];
    }

    out.push_str(rest);
    out
}

/// Load and compile the probe database. A missing file is fatal; malformed
/// directives and uncompilable patterns only cost their own line.
pub fn load_probes(path: &Path, config: &ProbeConfig) -> Result<Vec<ServiceProbe>> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read probe database: {:?}", path))?;

    Ok(parse_probes(&data, config))
}

/// Parse probe file content; see [`load_probes`]
pub fn parse_probes(data: &str, config: &ProbeConfig) -> Vec<ServiceProbe> {
    let mut probes = Vec::new();

    for line in data.lines() {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if !line.starts_with("match") {
            continue;
        }

        let directive = match parser::parse_match(line) {
            Ok(d) => d,
            Err(e) => {
                warn!("skipping malformed match directive: {}", e);
                continue;
            }
        };

        if IGNORED_PROBES.contains(&directive.ident.as_str()) {
            debug!("ignoring probe {}", directive.ident);
            continue;
        }

        if let Some(probe) = compile(directive, config) {
            probes.push(probe);
        }
    }

    debug!("loaded {} service probes", probes.len());
    probes
}

fn compile(directive: MatchDirective, config: &ProbeConfig) -> Option<ServiceProbe> {
    let mut flags = String::from("(?m");
    if directive.case_insensitive {
        flags.push('i');
    }
    if directive.include_newlines {
        flags.push('s');
    }
    flags.push(')');

    let pattern = String::from_utf8_lossy(&directive.pattern);
    let full = format!("{}{}", flags, pattern.trim());

    let (matcher, regex_raw) = if config.use_re2 {
        let rewritten = rewrite::rewrite(&full);
        match regex::Regex::new(&rewritten) {
            Ok(re) => (Matcher::Automaton(re), rewritten),
            Err(e) => {
                debug!(
                    probe = %directive.ident,
                    pattern = %rewritten,
                    "failed to compile probe regex: {}", e
                );
                return None;
            }
        }
    } else {
        match fancy_regex::Regex::new(&full) {
            Ok(re) => (Matcher::Backtracking(Box::new(re)), full),
            Err(e) => {
                debug!(probe = %directive.ident, "failed to compile probe regex: {}", e);
                return None;
            }
        }
    };

    Some(ServiceProbe {
        ident: directive.ident,
        regex_raw,
        matcher,
        case_insensitive: directive.case_insensitive,
        include_newlines: directive.include_newlines,
        vendor: directive.vendor,
        version: directive.version,
        info: directive.info,
        hostname: directive.hostname,
        os: directive.os,
        device_type: directive.device_type,
    })
}
