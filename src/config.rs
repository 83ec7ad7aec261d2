//! Configuration module for NetAudit

use anyhow::{Context, Result};
use chrono_tz::Tz;
use serde::Deserialize;
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub flow: FlowConfig,
    #[serde(default)]
    pub probes: ProbeConfig,
    #[serde(default)]
    pub labels: LabelConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Flow table settings
#[derive(Debug, Clone, Deserialize)]
pub struct FlowConfig {
    /// Idle eviction threshold in seconds
    #[serde(default = "default_flow_timeout")]
    pub timeout_secs: u64,

    /// Run an eviction pass every N newly created flows (0 disables)
    #[serde(default = "default_flush_interval")]
    pub flush_interval: u64,

    /// Capacity of the bounded channel between the flow table and the writer
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

/// Service probe settings
#[derive(Debug, Clone, Deserialize)]
pub struct ProbeConfig {
    /// Load the probe database at startup
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Path to an nmap-service-probes compatible file
    #[serde(default = "default_probes_path")]
    pub path: String,

    /// Use the finite-state engine with the pattern rewriter.
    /// When off, patterns compile unmodified with a backtracking engine.
    #[serde(default = "default_true")]
    pub use_re2: bool,
}

/// Attack label settings
#[derive(Debug, Clone, Deserialize)]
pub struct LabelConfig {
    /// Path to an attack descriptor file (.yml/.yaml or .csv); empty disables labeling
    #[serde(default)]
    pub path: Option<String>,

    /// IANA timezone for descriptor timestamps
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Classification names to drop after counting
    #[serde(default)]
    pub excluded: Vec<String>,
}

/// Audit record output settings
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Destination file for NDJSON flow audit records
    #[serde(default = "default_output_path")]
    pub path: String,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log to stdout
    #[serde(default = "default_true")]
    pub stdout: bool,

    /// Log format: "json" or "pretty"
    #[serde(default = "default_log_format")]
    pub format: String,
}

/// Metrics configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct MetricsConfig {
    /// Bump per-record counters when handing flows to the writer
    #[serde(default)]
    pub export: bool,
}

// Default value functions
fn default_flow_timeout() -> u64 { 30 }
fn default_flush_interval() -> u64 { 2000 }
fn default_channel_capacity() -> usize { 1024 }
fn default_probes_path() -> String { "/usr/local/etc/netaudit/dbs/nmap-service-probes".to_string() }
fn default_timezone() -> String { "Canada/Atlantic".to_string() }
fn default_output_path() -> String { "flows.ndjson".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "pretty".to_string() }
fn default_true() -> bool { true }

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_flow_timeout(),
            flush_interval: default_flush_interval(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: default_probes_path(),
            use_re2: true,
        }
    }
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            path: None,
            timezone: default_timezone(),
            excluded: Vec::new(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self { path: default_output_path() }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            stdout: true,
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        toml::from_str(&content)
            .with_context(|| "Failed to parse configuration")
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.flow.timeout_secs == 0 {
            anyhow::bail!("Flow timeout must be greater than zero");
        }

        if self.flow.channel_capacity == 0 {
            anyhow::bail!("Eviction channel capacity must be greater than zero");
        }

        if self.output.path.is_empty() {
            anyhow::bail!("Output path cannot be empty");
        }

        if self.probes.enabled && self.probes.path.is_empty() {
            anyhow::bail!("Probe database path cannot be empty when probes are enabled");
        }

        self.labels.tz()?;

        Ok(())
    }
}

impl LabelConfig {
    /// Resolve the configured timezone
    pub fn tz(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| anyhow::anyhow!("Invalid timezone '{}': {}", self.timezone, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let toml_content = r#"
[flow]
timeout_secs = 10
flush_interval = 500
channel_capacity = 256

[probes]
enabled = true
path = "/tmp/nmap-service-probes"
use_re2 = true

[labels]
path = "/tmp/attacks.csv"
timezone = "Canada/Atlantic"
excluded = ["normal"]

[output]
path = "/tmp/flows.ndjson"

[logging]
level = "debug"
stdout = true
format = "pretty"
"#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.flow.timeout_secs, 10);
        assert_eq!(config.flow.flush_interval, 500);
        assert_eq!(config.probes.path, "/tmp/nmap-service-probes");
        assert_eq!(config.labels.excluded, vec!["normal".to_string()]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.flow.timeout_secs, 30);
        assert_eq!(config.flow.flush_interval, 2000);
        assert!(config.probes.use_re2);
        assert_eq!(config.labels.timezone, "Canada/Atlantic");
        assert!(!config.metrics.export);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_timeout() {
        let config: Config = toml::from_str("[flow]\ntimeout_secs = 0\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_timezone() {
        let config: Config = toml::from_str("[labels]\ntimezone = \"Atlantis/Nowhere\"\n").unwrap();
        assert!(config.validate().is_err());
    }
}
