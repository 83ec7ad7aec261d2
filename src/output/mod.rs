//! Audit record output
//!
//! The flow table only depends on the [`RecordWriter`] contract: synchronous
//! at-least-once writes with order preserved per caller, and an idempotent
//! close reporting the destination name and bytes written. A single writer
//! thread drains the bounded eviction channel so the capture path never
//! blocks on I/O; a write error is fatal and ends the thread with the error.

use anyhow::{Context, Result};
use crossbeam_channel::Receiver;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use tracing::{debug, info};

use crate::flow::FlowRecord;
use crate::label::LabelIndex;
use crate::metrics;

/// Destination for finished flow records
pub trait RecordWriter: Send {
    /// Write one record; an error is unrecoverable
    fn write(&mut self, record: &FlowRecord) -> Result<()>;

    /// Flush and report `(name, bytes_written)`
    fn close(self: Box<Self>) -> Result<(String, u64)>;
}

/// NDJSON file writer
pub struct NdjsonWriter {
    name: String,
    inner: BufWriter<File>,
    bytes_written: u64,
    records_written: u64,
}

impl NdjsonWriter {
    /// Create or truncate the destination file
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("Failed to create output file: {:?}", path))?;

        Ok(Self {
            name: path.display().to_string(),
            inner: BufWriter::new(file),
            bytes_written: 0,
            records_written: 0,
        })
    }
}

impl RecordWriter for NdjsonWriter {
    fn write(&mut self, record: &FlowRecord) -> Result<()> {
        let line = serde_json::to_string(record)
            .with_context(|| "Failed to serialize flow record")?;

        self.inner
            .write_all(line.as_bytes())
            .and_then(|_| self.inner.write_all(b"\n"))
            .with_context(|| format!("Failed to write to {}", self.name))?;

        self.bytes_written += line.len() as u64 + 1;
        self.records_written += 1;
        Ok(())
    }

    fn close(mut self: Box<Self>) -> Result<(String, u64)> {
        self.inner
            .flush()
            .with_context(|| format!("Failed to flush {}", self.name))?;

        debug!("{}: {} records, {} bytes", self.name, self.records_written, self.bytes_written);
        Ok((self.name, self.bytes_written))
    }
}

/// Counts and discards records; used by dry runs
#[derive(Default)]
pub struct DiscardWriter {
    records_written: u64,
}

impl RecordWriter for DiscardWriter {
    fn write(&mut self, _record: &FlowRecord) -> Result<()> {
        self.records_written += 1;
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<(String, u64)> {
        info!("dry run: {} flow records discarded", self.records_written);
        Ok(("discard".to_string(), 0))
    }
}

/// Spawn the writer thread.
///
/// Consumes evicted flows until the channel closes, then closes the writer
/// and returns its report. When `export_metrics` is set the per-record
/// counter is bumped before each write; when a label index is present,
/// flows falling into an attack window are logged.
pub fn spawn_writer(
    rx: Receiver<FlowRecord>,
    mut writer: Box<dyn RecordWriter>,
    export_metrics: bool,
    labels: Option<Arc<LabelIndex>>,
) -> thread::JoinHandle<Result<(String, u64)>> {
    thread::spawn(move || {
        for record in rx.iter() {
            if export_metrics {
                metrics::FLOW_RECORDS_WRITTEN.inc();
            }

            if let Some(index) = &labels {
                if let Some(attack) =
                    index.match_flow(record.timestamp_first, &record.src_ip, &record.dst_ip)
                {
                    debug!(uid = %record.uid, attack = %attack.name, "flow inside attack window");
                }
            }

            writer.write(&record)?;
        }

        writer.close()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;

    fn record(uid: &str) -> FlowRecord {
        FlowRecord {
            uid: uid.to_string(),
            timestamp_first: 100,
            timestamp_last: 200,
            duration: 100,
            num_packets: 2,
            total_size: 120,
            ..Default::default()
        }
    }

    #[test]
    fn test_ndjson_writer_reports_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flows.ndjson");

        let mut writer = Box::new(NdjsonWriter::create(&path).unwrap());
        writer.write(&record("a")).unwrap();
        writer.write(&record("b")).unwrap();
        let (name, bytes) = writer.close().unwrap();

        assert_eq!(name, path.display().to_string());
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.len() as u64, bytes);
        assert_eq!(content.lines().count(), 2);

        let parsed: FlowRecord = serde_json::from_str(content.lines().next().unwrap()).unwrap();
        assert_eq!(parsed.uid, "a");
        assert_eq!(parsed.num_packets, 2);
    }

    #[test]
    fn test_writer_thread_drains_channel() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flows.ndjson");

        let (tx, rx) = bounded(8);
        let writer = Box::new(NdjsonWriter::create(&path).unwrap());
        let handle = spawn_writer(rx, writer, false, None);

        for i in 0..5 {
            tx.send(record(&format!("uid-{}", i))).unwrap();
        }
        drop(tx);

        let (_, bytes) = handle.join().unwrap().unwrap();
        assert!(bytes > 0);
        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 5);
    }

    #[test]
    fn test_discard_writer() {
        let mut writer = Box::new(DiscardWriter::default());
        writer.write(&record("a")).unwrap();
        let (name, bytes) = writer.close().unwrap();
        assert_eq!(name, "discard");
        assert_eq!(bytes, 0);
    }
}
