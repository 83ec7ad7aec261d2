//! NetAudit - Passive Network Traffic Audit
//!
//! Consumes packet digests from a capture source, tracks flows, and emits
//! NDJSON audit records on eviction and shutdown.

use anyhow::{Context, Result};
use clap::Parser;
use std::collections::HashSet;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use netaudit::config::Config;
use netaudit::digest::PacketDigest;
use netaudit::flow::FlowTable;
use netaudit::label::LabelIndex;
use netaudit::metrics;
use netaudit::output::{spawn_writer, DiscardWriter, NdjsonWriter, RecordWriter};
use netaudit::probe::{load_probes, ServiceProbe};
use netaudit::software;

/// NetAudit passive traffic analyzer
#[derive(Parser, Debug)]
#[command(name = "netaudit")]
#[command(version)]
#[command(about = "Passive network traffic analysis and audit record generation", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "/opt/netaudit/config/netaudit.toml")]
    config: PathBuf,

    /// NDJSON packet digest stream ("-" for stdin)
    #[arg(short, long, default_value = "-")]
    input: String,

    /// Run in debug mode (verbose logging)
    #[arg(short, long)]
    debug: bool,

    /// Consume input but discard audit records
    #[arg(long)]
    dry_run: bool,

    /// Print the loaded probe set as JSON and exit
    #[arg(long)]
    dump_probes: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = Config::from_file(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    config.validate()?;

    // Setup logging
    setup_logging(&config, args.debug)?;

    if args.dump_probes {
        return dump_probes(&config);
    }

    info!("NetAudit starting...");
    info!("Input: {}", args.input);
    info!(
        "Flow timeout: {}s, flush interval: {}",
        config.flow.timeout_secs, config.flow.flush_interval
    );

    // Service probes are loaded once at startup and applied to every digest
    // carrying an application banner; a missing database is fatal
    let probes: Arc<Vec<ServiceProbe>> = if config.probes.enabled {
        let probes = load_probes(Path::new(&config.probes.path), &config.probes)?;
        info!("Loaded {} service probes from {}", probes.len(), config.probes.path);
        Arc::new(probes)
    } else {
        Arc::new(Vec::new())
    };

    // Attack labels, if configured
    let labels = match &config.labels.path {
        Some(path) if !path.is_empty() => {
            let excluded: HashSet<String> = config.labels.excluded.iter().cloned().collect();
            let index = LabelIndex::load(Path::new(path), config.labels.tz()?, &excluded)?;
            info!(
                "Loaded {} attack labels ({} duplicates)",
                index.records.len(),
                index.duplicates.len()
            );
            Some(Arc::new(index))
        }
        _ => None,
    };

    // Flow table -> bounded channel -> single writer thread
    let (evict_tx, evict_rx) = crossbeam_channel::bounded(config.flow.channel_capacity);

    let writer: Box<dyn RecordWriter> = if args.dry_run {
        info!("Dry run mode - audit records will be discarded");
        Box::new(DiscardWriter::default())
    } else {
        Box::new(NdjsonWriter::create(Path::new(&config.output.path))?)
    };
    let writer_handle = spawn_writer(evict_rx, writer, config.metrics.export, labels);

    let table = Arc::new(FlowTable::new(&config.flow, evict_tx));

    // Cooperative shutdown
    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        r.store(false, Ordering::SeqCst);
    })
    .context("Failed to set Ctrl+C handler")?;

    // Periodic stats
    let observed = Arc::new(AtomicU64::new(0));
    let stats_table = Arc::clone(&table);
    let stats_observed = Arc::clone(&observed);
    let stats_handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(10));
        interval.tick().await;
        loop {
            interval.tick().await;
            info!(
                "Stats: digests={}, live_flows={}, evicted_flows={}, services_detected={}",
                stats_observed.load(Ordering::Relaxed),
                stats_table.len(),
                metrics::FLOWS_EVICTED.get(),
                metrics::SERVICES_DETECTED.get()
            );
        }
    });

    // Ingest loop on a blocking task; producers never wait on writer I/O
    let ingest_table = Arc::clone(&table);
    let ingest_running = Arc::clone(&running);
    let ingest_observed = Arc::clone(&observed);
    let ingest_probes = Arc::clone(&probes);
    let input = args.input.clone();
    let ingest = tokio::task::spawn_blocking(move || -> Result<u64> {
        let reader: Box<dyn BufRead> = if input == "-" {
            Box::new(BufReader::new(io::stdin()))
        } else {
            Box::new(BufReader::new(
                File::open(&input).with_context(|| format!("Failed to open input: {}", input))?,
            ))
        };

        let mut count = 0u64;
        for line in reader.lines() {
            if !ingest_running.load(Ordering::SeqCst) {
                break;
            }

            let line = line.with_context(|| "Failed to read input")?;
            if line.is_empty() {
                continue;
            }

            match serde_json::from_str::<PacketDigest>(&line) {
                Ok(digest) => {
                    ingest_table.observe(&digest);
                    software::inspect_digest(&ingest_probes, &digest);
                    count += 1;
                    ingest_observed.store(count, Ordering::Relaxed);
                }
                Err(e) => warn!("Failed to parse packet digest: {}", e),
            }
        }

        Ok(count)
    });

    let count = ingest.await.context("Ingest task panicked")??;
    stats_handle.abort();

    // Shutdown: drain remaining flows, close the channel, join the writer
    info!("Draining {} live flows", table.len());
    table.drain();
    drop(table);

    let (name, bytes) = tokio::task::spawn_blocking(move || {
        writer_handle
            .join()
            .map_err(|_| anyhow::anyhow!("Writer thread panicked"))?
    })
    .await
    .context("Writer join task panicked")??;

    info!(
        "NetAudit stopped: {} digests observed, {} services detected, {} bytes written to {}",
        count,
        metrics::SERVICES_DETECTED.get(),
        bytes,
        name
    );
    Ok(())
}

/// Print the loaded probe set as JSON
fn dump_probes(config: &Config) -> Result<()> {
    let probes = load_probes(Path::new(&config.probes.path), &config.probes)?;
    for probe in &probes {
        let json = serde_json::to_string_pretty(probe)
            .with_context(|| "Failed to serialize probe")?;
        println!("{}", json);
    }
    Ok(())
}

/// Setup logging based on configuration
fn setup_logging(config: &Config, debug: bool) -> Result<()> {
    let level = if debug {
        Level::DEBUG
    } else {
        match config.logging.level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" | "warning" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        }
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(format!("netaudit={}", level).parse()?);

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.logging.format == "json" {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber.with(fmt::layer().with_target(true)).init();
    }

    Ok(())
}
