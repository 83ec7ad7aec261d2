//! Ground-truth attack labels
//!
//! Attack descriptors arrive as YAML or CSV and normalize into one canonical
//! model: records with absolute instants in a configured timezone, indexed
//! by their start second. The index is built once at startup and read-only
//! afterwards.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors invalidating a single descriptor; the rest of the file continues
#[derive(Debug, Error)]
pub enum LabelError {
    #[error("invalid timestamp '{value}': {source}")]
    InvalidTimestamp {
        value: String,
        source: chrono::ParseError,
    },

    #[error("timestamp '{0}' does not exist in the configured timezone")]
    NonexistentLocalTime(String),

    #[error("invalid attack number '{0}'")]
    InvalidNum(String),

    #[error("expected {expected} columns, found {found}")]
    MissingColumns { expected: usize, found: usize },
}

/// Attack descriptor as serialized on disk; timestamps are strings to
/// support the per-format layouts
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct AttackDescriptor {
    #[serde(default)]
    pub num: i64,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub start: String,
    #[serde(default)]
    pub end: String,

    /// Traffic from or towards these hosts inside the window is attributed
    #[serde(default)]
    pub ips: Vec<String>,

    #[serde(default)]
    pub proto: String,

    #[serde(default)]
    pub notes: String,

    #[serde(default)]
    pub category: String,

    /// MITRE tactic or technique name
    #[serde(default)]
    pub mitre: String,

    /// Day of the attack
    #[serde(default)]
    pub date: String,

    /// Traffic between victims and attackers is attributed
    #[serde(default)]
    pub victims: Vec<String>,
    #[serde(default)]
    pub attackers: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AttackFile {
    attacks: Vec<AttackDescriptor>,
}

/// Canonical attack record with parsed instants
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttackRecord {
    pub num: i64,
    pub name: String,
    pub start: DateTime<Tz>,
    pub end: DateTime<Tz>,
    pub date: DateTime<Tz>,
    pub ips: Vec<String>,
    pub proto: String,
    pub notes: String,
    pub category: String,
    pub mitre: String,
    pub victims: Vec<String>,
    pub attackers: Vec<String>,
}

/// Timestamp-indexed view over the loaded attack records
#[derive(Debug, Default, PartialEq)]
pub struct LabelIndex {
    /// All collected (non-excluded) records in file order
    pub records: Vec<AttackRecord>,

    /// Start second (decimal string) to first record seen for that second
    pub index: HashMap<String, AttackRecord>,

    /// Records whose start second was already taken; first seen wins
    pub duplicates: Vec<AttackRecord>,

    /// Occurrences per classification name, counted before exclusion
    pub classification: HashMap<String, u64>,
}

const CSV_COLUMNS: usize = 12;

impl LabelIndex {
    /// Load a descriptor file, dispatching on the extension.
    /// A missing or unreadable file is fatal.
    pub fn load(path: &Path, tz: Tz, excluded: &HashSet<String>) -> Result<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("yml") | Some("yaml") => Self::load_yaml(path, tz, excluded),
            _ => Self::load_csv(path, tz, excluded),
        }
    }

    /// Load a strict YAML descriptor file (`attacks:` list)
    pub fn load_yaml(path: &Path, tz: Tz, excluded: &HashSet<String>) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read attack descriptors: {:?}", path))?;
        Self::from_yaml_str(&data, tz, excluded)
    }

    /// Load a CSV descriptor file (header row plus 12 fixed columns)
    pub fn load_csv(path: &Path, tz: Tz, excluded: &HashSet<String>) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read attack descriptors: {:?}", path))?;
        Ok(Self::from_csv_str(&data, tz, excluded))
    }

    /// Parse YAML content. Unknown keys are rejected; records with bad
    /// timestamps are logged and skipped.
    pub fn from_yaml_str(data: &str, tz: Tz, excluded: &HashSet<String>) -> Result<Self> {
        let file: AttackFile =
            serde_yaml::from_str(data).with_context(|| "Failed to parse attack descriptors")?;

        let mut labels = Self::default();
        for (i, descriptor) in file.attacks.iter().enumerate() {
            match convert_yaml(i, descriptor, tz) {
                Ok(record) => labels.insert(record, excluded),
                Err(e) => warn!("skipping attack descriptor {}: {}", i, e),
            }
        }

        debug!("loaded {} attack labels", labels.records.len());
        Ok(labels)
    }

    /// Parse CSV content; malformed rows are logged and skipped
    pub fn from_csv_str(data: &str, tz: Tz, excluded: &HashSet<String>) -> Self {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(data.as_bytes());

        let mut labels = Self::default();
        for (i, row) in reader.records().enumerate() {
            let row = match row {
                Ok(r) => r,
                Err(e) => {
                    warn!("skipping attack row {}: {}", i, e);
                    continue;
                }
            };
            match convert_csv(&row, tz) {
                Ok(record) => labels.insert(record, excluded),
                Err(e) => warn!("skipping attack row {}: {}", i, e),
            }
        }

        debug!("loaded {} attack labels", labels.records.len());
        labels
    }

    /// Look up the attack starting at the given second
    pub fn lookup_second(&self, unix_secs: i64) -> Option<&AttackRecord> {
        self.index.get(&unix_secs.to_string())
    }

    /// Attribute a finalized flow to an attack: the flow must start inside
    /// the attack window and touch the listed hosts (any direction for
    /// `ips`, both ends for victims/attackers).
    pub fn match_flow(&self, start_ns: i64, src_ip: &str, dst_ip: &str) -> Option<&AttackRecord> {
        let secs = start_ns / 1_000_000_000;

        self.records.iter().find(|record| {
            if secs < record.start.timestamp() || secs > record.end.timestamp() {
                return false;
            }

            let ip_hit = record.ips.iter().any(|ip| ip == src_ip || ip == dst_ip);
            let between = record.victims.iter().any(|v| v == src_ip || v == dst_ip)
                && record.attackers.iter().any(|a| a == src_ip || a == dst_ip);

            ip_hit || between
        })
    }

    fn insert(&mut self, record: AttackRecord, excluded: &HashSet<String>) {
        // never index records without a name
        if record.name.trim().is_empty() {
            warn!("skipping attack descriptor with empty name");
            return;
        }

        // classification totals are counted before the exclusion filter
        *self.classification.entry(record.name.clone()).or_insert(0) += 1;

        if excluded.contains(&record.name) {
            return;
        }

        let key = record.start.timestamp().to_string();
        self.records.push(record.clone());

        if self.index.contains_key(&key) {
            self.duplicates.push(record);
        } else {
            self.index.insert(key, record);
        }
    }
}

/// YAML timestamps: `start`/`end` are `HH:MM` on the day given by `date`
/// (`Monday-02-01-2006` layout); `num` is the sequence index
fn convert_yaml(i: usize, a: &AttackDescriptor, tz: Tz) -> Result<AttackRecord, LabelError> {
    let date = parse_date(&a.date, "%A-%d-%m-%Y")?;
    let start = local_instant(tz, date.and_time(parse_time(&a.start)?), &a.start)?;
    let end = local_instant(tz, date.and_time(parse_time(&a.end)?), &a.end)?;
    let date = local_instant(tz, date.and_time(NaiveTime::MIN), &a.date)?;

    Ok(AttackRecord {
        num: i as i64,
        name: a.name.clone(),
        start,
        end,
        date,
        ips: a.ips.clone(),
        proto: a.proto.clone(),
        notes: a.notes.clone(),
        category: a.category.clone(),
        mitre: a.mitre.clone(),
        victims: a.victims.clone(),
        attackers: a.attackers.clone(),
    })
}

/// CSV rows: fixed column order
/// `num,name,start,end,ips,proto,notes,category,mitre,date,victims,attackers`
fn convert_csv(row: &csv::StringRecord, tz: Tz) -> Result<AttackRecord, LabelError> {
    if row.len() < CSV_COLUMNS {
        return Err(LabelError::MissingColumns {
            expected: CSV_COLUMNS,
            found: row.len(),
        });
    }

    let field = |idx: usize| row.get(idx).unwrap_or_default();

    let num: i64 = field(0)
        .trim()
        .parse()
        .map_err(|_| LabelError::InvalidNum(field(0).to_string()))?;

    let start = local_instant(tz, parse_datetime(field(2))?, field(2))?;
    let end = local_instant(tz, parse_datetime(field(3))?, field(3))?;
    let date_naive = parse_date(field(9), "%Y/%m/%d")?;
    let date = local_instant(tz, date_naive.and_time(NaiveTime::MIN), field(9))?;

    Ok(AttackRecord {
        num,
        name: field(1).to_string(),
        start,
        end,
        date,
        ips: split_hosts(field(4)),
        proto: field(5).to_string(),
        notes: field(6).to_string(),
        category: field(7).to_string(),
        mitre: field(8).to_string(),
        victims: split_hosts(field(10)),
        attackers: split_hosts(field(11)),
    })
}

fn parse_time(value: &str) -> Result<NaiveTime, LabelError> {
    NaiveTime::parse_from_str(value, "%H:%M").map_err(|source| LabelError::InvalidTimestamp {
        value: value.to_string(),
        source,
    })
}

fn parse_date(value: &str, layout: &str) -> Result<NaiveDate, LabelError> {
    NaiveDate::parse_from_str(value, layout).map_err(|source| LabelError::InvalidTimestamp {
        value: value.to_string(),
        source,
    })
}

fn parse_datetime(value: &str) -> Result<NaiveDateTime, LabelError> {
    NaiveDateTime::parse_from_str(value, "%Y/%m/%d %H:%M:%S").map_err(|source| {
        LabelError::InvalidTimestamp {
            value: value.to_string(),
            source,
        }
    })
}

fn local_instant(tz: Tz, naive: NaiveDateTime, raw: &str) -> Result<DateTime<Tz>, LabelError> {
    tz.from_local_datetime(&naive)
        .earliest()
        .ok_or_else(|| LabelError::NonexistentLocalTime(raw.to_string()))
}

/// Split a `;`-separated host list, tolerating wrapping double quotes
fn split_hosts(value: &str) -> Vec<String> {
    let trimmed = value.trim().trim_matches('"');
    if trimmed.is_empty() {
        return Vec::new();
    }

    trimmed
        .split(';')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
