//! NetAudit Core
//!
//! Passive network traffic analysis: flow tracking with idle eviction,
//! Nmap service-probe matching, and ground-truth attack labeling.

pub mod config;
pub mod digest;
pub mod flow;
pub mod label;
pub mod metrics;
pub mod output;
pub mod probe;
pub mod software;

pub use config::Config;
pub use digest::PacketDigest;
pub use flow::FlowTable;
pub use label::LabelIndex;
pub use probe::ServiceProbe;
pub use software::SoftwareHint;
