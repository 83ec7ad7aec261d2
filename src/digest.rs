//! Packet digests handed over by the capture source
//!
//! A digest carries one optional descriptor per layer plus capture metadata.
//! The capture driver serializes digests as NDJSON; absent layers stay `None`
//! and contribute empty fields to the flow record.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// Link layer descriptor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LinkDigest {
    /// Layer protocol name (e.g. "Ethernet")
    pub proto: String,
    pub src_mac: String,
    pub dst_mac: String,
}

/// Network layer descriptor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkDigest {
    /// Layer protocol name (e.g. "IPv4")
    pub proto: String,
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
}

/// Transport layer descriptor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransportDigest {
    /// Layer protocol name (e.g. "TCP")
    pub proto: String,
    pub src_port: u16,
    pub dst_port: u16,
}

/// Application layer descriptor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppDigest {
    /// Layer protocol name (e.g. "DNS")
    pub proto: String,
    /// Application payload length in bytes
    pub payload_len: u32,
    /// Printable payload text, when the capture source extracted one;
    /// feeds service detection and the software harvester
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub banner: Option<String>,
}

/// Digest of a single captured packet
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PacketDigest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<LinkDigest>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<NetworkDigest>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub transport: Option<TransportDigest>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub application: Option<AppDigest>,

    /// Capture timestamp in nanoseconds since epoch
    pub timestamp: i64,

    /// Bytes on the wire
    pub wire_len: u32,
}

impl PacketDigest {
    /// Canonical identifier of the directed flow this packet belongs to.
    ///
    /// The format `srcIP:srcPort->dstIP:dstPort` is stable across versions:
    /// flow uids are MD5 hashes of this string and are persisted. A digest
    /// with neither a network nor a transport layer yields an empty key and
    /// is dropped by the flow table.
    pub fn flow_key(&self) -> String {
        if self.network.is_none() && self.transport.is_none() {
            return String::new();
        }

        let (src_ip, dst_ip) = match &self.network {
            Some(n) => (n.src_ip.to_string(), n.dst_ip.to_string()),
            None => (String::new(), String::new()),
        };
        let (src_port, dst_port) = match &self.transport {
            Some(t) => (t.src_port.to_string(), t.dst_port.to_string()),
            None => (String::new(), String::new()),
        };

        format!("{}:{}->{}:{}", src_ip, src_port, dst_ip, dst_port)
    }
}
