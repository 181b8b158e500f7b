//! Parser for the AFL++ `fuzzer_stats` file.
//!
//! The file is a list of `key : value` lines rewritten by the fuzzer every
//! few seconds. Older AFL++ releases use `paths_*`/`unique_crashes`, newer
//! ones `corpus_*`/`saved_crashes`; both spellings are accepted.

use std::collections::HashMap;

use crate::snapshot::TelemetrySnapshot;

#[derive(Debug, thiserror::Error)]
pub enum StatsError {
    #[error("stats file is empty")]
    Empty,

    #[error("field '{key}' has unparsable value '{value}'")]
    InvalidNumber { key: String, value: String },

    #[error("field '{key}' is negative ({value})")]
    Negative { key: String, value: String },
}

const COVERAGE_KEYS: &[&str] = &["bitmap_cvg"];
const CRASH_KEYS: &[&str] = &["saved_crashes", "unique_crashes"];
const SPEED_KEYS: &[&str] = &["execs_per_sec"];
const QUEUE_KEYS: &[&str] = &["corpus_count", "paths_total"];
const FOUND_KEYS: &[&str] = &["corpus_found", "paths_found"];
const PENDING_KEYS: &[&str] = &["pending_total"];

/// Parse raw `fuzzer_stats` text into a snapshot.
///
/// `runtime_secs` is measured by the caller, the stats file's own
/// timestamps are ignored.
pub fn parse_fuzzer_stats(text: &str, runtime_secs: u64) -> Result<TelemetrySnapshot, StatsError> {
    let fields = split_fields(text);
    if fields.is_empty() {
        return Err(StatsError::Empty);
    }

    Ok(TelemetrySnapshot {
        coverage_rate: float_field(&fields, COVERAGE_KEYS)?,
        crash_count: int_field(&fields, CRASH_KEYS)?,
        exec_speed: float_field(&fields, SPEED_KEYS)?,
        queue_size: int_field(&fields, QUEUE_KEYS)?,
        unique_paths: int_field(&fields, FOUND_KEYS)?,
        pending_paths: int_field(&fields, PENDING_KEYS)?,
        runtime: runtime_secs,
    })
}

fn split_fields(text: &str) -> HashMap<&str, &str> {
    text.lines()
        .filter_map(|line| line.split_once(':'))
        .map(|(key, value)| (key.trim(), value.trim()))
        .filter(|(key, _)| !key.is_empty())
        .collect()
}

/// First present alias wins.
fn lookup<'a>(fields: &HashMap<&'a str, &'a str>, keys: &[&'a str]) -> Option<(&'a str, &'a str)> {
    keys.iter()
        .find_map(|key| fields.get(key).map(|value| (*key, *value)))
}

fn float_field(fields: &HashMap<&str, &str>, keys: &[&str]) -> Result<f64, StatsError> {
    let Some((key, raw)) = lookup(fields, keys) else {
        return Ok(0.0);
    };
    let trimmed = raw.trim_end_matches('%').trim();
    let value: f64 = trimmed.parse().map_err(|_| StatsError::InvalidNumber {
        key: key.to_string(),
        value: raw.to_string(),
    })?;
    if !value.is_finite() {
        return Err(StatsError::InvalidNumber {
            key: key.to_string(),
            value: raw.to_string(),
        });
    }
    if value < 0.0 {
        return Err(StatsError::Negative {
            key: key.to_string(),
            value: raw.to_string(),
        });
    }
    Ok(value)
}

fn int_field(fields: &HashMap<&str, &str>, keys: &[&str]) -> Result<u64, StatsError> {
    let Some((key, raw)) = lookup(fields, keys) else {
        return Ok(0);
    };
    if raw.starts_with('-') {
        return Err(StatsError::Negative {
            key: key.to_string(),
            value: raw.to_string(),
        });
    }
    raw.parse().map_err(|_| StatsError::InvalidNumber {
        key: key.to_string(),
        value: raw.to_string(),
    })
}
