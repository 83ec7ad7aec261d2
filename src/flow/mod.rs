//! Flow state tracking
//!
//! Maps packet digests to uni-directional flows and evicts idle entries.
//! Membership is guarded by a single table lock; every entry carries its own
//! lock. Lock order is table -> entry -> eviction channel; the channel send
//! always happens after the table lock is released, so the writer thread can
//! never deadlock against a producer.

pub mod record;

pub use record::FlowRecord;

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

use crate::config::FlowConfig;
use crate::digest::PacketDigest;
use crate::metrics;

const NANOS_PER_SEC: i64 = 1_000_000_000;

/// Concurrent table of live flows
pub struct FlowTable {
    flows: Mutex<HashMap<String, Arc<Mutex<FlowRecord>>>>,

    /// Total flows ever created; drives the opportunistic eviction pass
    num_flows: AtomicU64,

    /// Idle threshold in nanoseconds
    timeout: i64,

    /// Eviction pass every N inserts (0 disables)
    flush_interval: u64,

    evict_tx: Sender<FlowRecord>,
}

impl FlowTable {
    /// Create a flow table delivering evicted flows into `evict_tx`
    pub fn new(config: &FlowConfig, evict_tx: Sender<FlowRecord>) -> Self {
        Self {
            flows: Mutex::new(HashMap::new()),
            num_flows: AtomicU64::new(0),
            timeout: config.timeout_secs as i64 * NANOS_PER_SEC,
            flush_interval: config.flush_interval,
            evict_tx,
        }
    }

    /// Number of live flows
    pub fn len(&self) -> usize {
        self.flows.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.lock().is_empty()
    }

    /// Total flows ever created
    pub fn num_flows(&self) -> u64 {
        self.num_flows.load(Ordering::Relaxed)
    }

    /// Fold one packet digest into its flow.
    ///
    /// Digests without a flow key are dropped. On a miss the new entry is
    /// created from this packet's descriptors; every `flush_interval`-th
    /// insert additionally runs an eviction pass using this packet's
    /// timestamp as the reference.
    pub fn observe(&self, digest: &PacketDigest) {
        metrics::PACKETS_OBSERVED.inc();

        let key = digest.flow_key();
        if key.is_empty() {
            return;
        }

        let mut evicted = Vec::new();
        {
            let mut flows = self.flows.lock();

            if let Some(entry) = flows.get(&key) {
                let entry = Arc::clone(entry);
                let mut record = entry.lock();
                record.update(digest);
            } else {
                let record = FlowRecord::new(&key, digest);
                flows.insert(key, Arc::new(Mutex::new(record)));

                let count = self.num_flows.fetch_add(1, Ordering::SeqCst) + 1;
                if self.flush_interval > 0 && count % self.flush_interval == 0 {
                    evicted = Self::collect_idle(&mut flows, digest.timestamp, self.timeout);
                }
            }
        }

        self.deliver(evicted);
    }

    /// Evict every flow whose last-seen timestamp precedes `reference_ts` by
    /// more than the configured timeout. Returns the number of evictions.
    pub fn flush_idle(&self, reference_ts: i64) -> usize {
        let evicted = {
            let mut flows = self.flows.lock();
            Self::collect_idle(&mut flows, reference_ts, self.timeout)
        };

        let count = evicted.len();
        self.deliver(evicted);
        count
    }

    /// Hand every remaining flow to the writer and empty the table.
    ///
    /// Called at shutdown, after the producers have stopped.
    pub fn drain(&self) -> usize {
        let remaining: Vec<FlowRecord> = {
            let mut flows = self.flows.lock();
            flows.drain().map(|(_, entry)| entry.lock().clone()).collect()
        };

        let count = remaining.len();
        self.deliver(remaining);
        count
    }

    /// Remove idle entries while holding the table lock; the caller delivers
    /// the owning copies after releasing it.
    fn collect_idle(
        flows: &mut HashMap<String, Arc<Mutex<FlowRecord>>>,
        reference_ts: i64,
        timeout: i64,
    ) -> Vec<FlowRecord> {
        let mut evicted = Vec::new();

        flows.retain(|_, entry| {
            let record = entry.lock();
            if reference_ts - record.timestamp_last > timeout {
                evicted.push(record.clone());
                false
            } else {
                true
            }
        });

        evicted
    }

    fn deliver(&self, records: Vec<FlowRecord>) {
        for record in records {
            metrics::FLOWS_EVICTED.inc();
            if self.evict_tx.send(record).is_err() {
                warn!("eviction channel closed, dropping flow record");
            }
        }
    }
}
