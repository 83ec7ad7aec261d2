//! Prometheus counters for the audit pipeline

use lazy_static::lazy_static;
use prometheus::{register_int_counter, IntCounter};

lazy_static! {
    /// Packet digests folded into the flow table
    pub static ref PACKETS_OBSERVED: IntCounter = register_int_counter!(
        "netaudit_packets_observed_total",
        "Packet digests observed by the flow table"
    )
    .expect("metric registration");

    /// Flows removed from the live table (eviction or drain)
    pub static ref FLOWS_EVICTED: IntCounter = register_int_counter!(
        "netaudit_flows_evicted_total",
        "Flows evicted from the live table"
    )
    .expect("metric registration");

    /// Flow audit records handed to the writer; bumped only when metrics
    /// export is enabled
    pub static ref FLOW_RECORDS_WRITTEN: IntCounter = register_int_counter!(
        "netaudit_flow_records_written_total",
        "Flow audit records written"
    )
    .expect("metric registration");

    /// Application banners matched by a service probe
    pub static ref SERVICES_DETECTED: IntCounter = register_int_counter!(
        "netaudit_services_detected_total",
        "Application banners matched by a service probe"
    )
    .expect("metric registration");

    /// Version evidence lines extracted from banners
    pub static ref SOFTWARE_HINTS: IntCounter = register_int_counter!(
        "netaudit_software_hints_total",
        "Software version evidence extracted from banners"
    )
    .expect("metric registration");
}
