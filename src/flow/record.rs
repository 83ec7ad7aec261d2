//! Flow audit record

use serde::{Deserialize, Serialize};

use crate::digest::PacketDigest;

/// Aggregate over all packets of one directed flow.
///
/// Serialized as one NDJSON audit record when the flow is evicted or drained.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FlowRecord {
    /// MD5 hex of the flow key; identical keys collide across restarts
    pub uid: String,

    /// Nanoseconds since epoch; `timestamp_first <= timestamp_last`
    pub timestamp_first: i64,
    pub timestamp_last: i64,

    /// `timestamp_last - timestamp_first` in nanoseconds
    pub duration: i64,

    pub num_packets: u64,
    pub total_size: u64,

    pub link_proto: String,
    pub src_mac: String,
    pub dst_mac: String,

    pub network_proto: String,
    pub src_ip: String,
    pub dst_ip: String,

    pub transport_proto: String,
    pub src_port: String,
    pub dst_port: String,

    pub application_proto: String,

    /// Payload size of the packet that created the flow; never updated after
    pub app_payload_size: u32,
}

/// Stable fingerprint of a flow key
pub fn flow_uid(key: &str) -> String {
    format!("{:x}", md5::compute(key))
}

impl FlowRecord {
    /// Create an aggregate from the first observed packet of a flow
    pub fn new(key: &str, digest: &PacketDigest) -> Self {
        let mut record = FlowRecord {
            uid: flow_uid(key),
            timestamp_first: digest.timestamp,
            timestamp_last: digest.timestamp,
            duration: 0,
            num_packets: 1,
            total_size: digest.wire_len as u64,
            ..Default::default()
        };

        if let Some(link) = &digest.link {
            record.link_proto = link.proto.clone();
            record.src_mac = link.src_mac.clone();
            record.dst_mac = link.dst_mac.clone();
        }
        if let Some(network) = &digest.network {
            record.network_proto = network.proto.clone();
            record.src_ip = network.src_ip.to_string();
            record.dst_ip = network.dst_ip.to_string();
        }
        if let Some(transport) = &digest.transport {
            record.transport_proto = transport.proto.clone();
            record.src_port = transport.src_port.to_string();
            record.dst_port = transport.dst_port.to_string();
        }
        if let Some(app) = &digest.application {
            record.application_proto = app.proto.clone();
            record.app_payload_size = app.payload_len;
        }

        record
    }

    /// Fold another packet of the same flow into the aggregate.
    ///
    /// A packet captured strictly before `timestamp_first` rewrites the first
    /// seen timestamp and the direction-bearing descriptors: the oldest
    /// observed packet decides the flow direction. Equal timestamps do not
    /// rewrite. `duration` is recomputed only when a bound moved.
    pub fn update(&mut self, digest: &PacketDigest) {
        let mut recompute_duration = false;

        if digest.timestamp < self.timestamp_first {
            recompute_duration = true;
            self.timestamp_first = digest.timestamp;

            if let Some(link) = &digest.link {
                self.link_proto = link.proto.clone();
                self.src_mac = link.src_mac.clone();
                self.dst_mac = link.dst_mac.clone();
            }
            if let Some(network) = &digest.network {
                self.network_proto = network.proto.clone();
                self.src_ip = network.src_ip.to_string();
                self.dst_ip = network.dst_ip.to_string();
            }
            if let Some(transport) = &digest.transport {
                self.transport_proto = transport.proto.clone();
                self.src_port = transport.src_port.to_string();
                self.dst_port = transport.dst_port.to_string();
            }
        }

        if digest.timestamp > self.timestamp_last {
            self.timestamp_last = digest.timestamp;
            recompute_duration = true;
        }

        self.num_packets += 1;
        self.total_size += digest.wire_len as u64;

        if recompute_duration {
            self.duration = self.timestamp_last - self.timestamp_first;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::{LinkDigest, NetworkDigest, TransportDigest};

    fn digest(src_ip: &str, dst_ip: &str, ts: i64, wire_len: u32) -> PacketDigest {
        PacketDigest {
            link: Some(LinkDigest {
                proto: "Ethernet".to_string(),
                src_mac: "00:11:22:33:44:55".to_string(),
                dst_mac: "66:77:88:99:aa:bb".to_string(),
            }),
            network: Some(NetworkDigest {
                proto: "IPv4".to_string(),
                src_ip: src_ip.parse().unwrap(),
                dst_ip: dst_ip.parse().unwrap(),
            }),
            transport: Some(TransportDigest {
                proto: "TCP".to_string(),
                src_port: 1000,
                dst_port: 2000,
            }),
            application: None,
            timestamp: ts,
            wire_len,
        }
    }

    #[test]
    fn test_uid_is_stable() {
        let key = "10.0.0.1:1000->10.0.0.2:2000";
        let uid = flow_uid(key);
        assert_eq!(uid.len(), 32);
        assert!(uid.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(uid, flow_uid(key));
        assert_ne!(uid, flow_uid("10.0.0.2:2000->10.0.0.1:1000"));
    }

    #[test]
    fn test_first_packet_counts() {
        let d = digest("10.0.0.1", "10.0.0.2", 100, 40);
        let record = FlowRecord::new("k", &d);
        assert_eq!(record.num_packets, 1);
        assert_eq!(record.total_size, 40);
        assert_eq!(record.timestamp_first, 100);
        assert_eq!(record.timestamp_last, 100);
        assert_eq!(record.duration, 0);
    }

    #[test]
    fn test_older_packet_rewrites_direction() {
        // first observed packet: 10.0.0.1 -> 10.0.0.2 at ts=200
        let mut record = FlowRecord::new("k", &digest("10.0.0.1", "10.0.0.2", 200, 50));
        assert_eq!(record.src_ip, "10.0.0.1");

        // an older packet in the other direction arrives late
        record.update(&digest("10.0.0.2", "10.0.0.1", 100, 40));

        assert_eq!(record.src_ip, "10.0.0.2");
        assert_eq!(record.dst_ip, "10.0.0.1");
        assert_eq!(record.timestamp_first, 100);
        assert_eq!(record.timestamp_last, 200);
        assert_eq!(record.duration, 100);
    }

    #[test]
    fn test_equal_timestamp_does_not_rewrite() {
        let mut record = FlowRecord::new("k", &digest("10.0.0.1", "10.0.0.2", 200, 50));
        record.update(&digest("10.0.0.2", "10.0.0.1", 200, 50));

        assert_eq!(record.src_ip, "10.0.0.1");
        assert_eq!(record.timestamp_first, 200);
        assert_eq!(record.num_packets, 2);
    }

    #[test]
    fn test_duration_tracks_bounds() {
        let mut record = FlowRecord::new("k", &digest("10.0.0.1", "10.0.0.2", 200, 50));
        record.update(&digest("10.0.0.1", "10.0.0.2", 100, 40));
        record.update(&digest("10.0.0.1", "10.0.0.2", 300, 60));

        assert_eq!(record.timestamp_first, 100);
        assert_eq!(record.timestamp_last, 300);
        assert_eq!(record.duration, 200);
        assert_eq!(record.num_packets, 3);
        assert_eq!(record.total_size, 150);
    }

    #[test]
    fn test_app_payload_size_set_once() {
        let mut first = digest("10.0.0.1", "10.0.0.2", 100, 50);
        first.application = Some(crate::digest::AppDigest {
            proto: "HTTP".to_string(),
            payload_len: 10,
            banner: None,
        });
        let mut record = FlowRecord::new("k", &first);
        assert_eq!(record.app_payload_size, 10);

        let mut second = digest("10.0.0.1", "10.0.0.2", 200, 50);
        second.application = Some(crate::digest::AppDigest {
            proto: "HTTP".to_string(),
            payload_len: 999,
            banner: None,
        });
        record.update(&second);
        assert_eq!(record.app_payload_size, 10);
    }
}
