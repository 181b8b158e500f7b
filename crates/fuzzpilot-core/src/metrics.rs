//! Per-tick metrics records and where they go.
//!
//! - MemorySink: keeps every record in process (used for run summaries)
//! - JsonlSink:  one JSON object per line
//! - NoopSink:   discards everything

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use fuzzpilot_telemetry::{MutationStrategy, TelemetrySnapshot};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("metrics I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("metrics encoding error: {0}")]
    Json(#[from] serde_json::Error),
}

/// One successful sampling tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickRecord {
    pub tick: u64,
    /// Seconds since campaign start.
    pub elapsed_secs: f64,
    pub time_hours: f64,
    #[serde(flatten)]
    pub telemetry: TelemetrySnapshot,
    pub reward: f64,
    pub advisory_penalty: f64,
    pub interesting: bool,
    /// Strategy chosen this tick; `None` on the first tick and in baseline runs.
    pub action: Option<MutationStrategy>,
    /// Mean loss if an update ran this tick.
    pub loss: Option<f64>,
}

pub trait MetricsSink {
    fn record(&mut self, record: &TickRecord) -> Result<(), MetricsError>;

    fn flush(&mut self) -> Result<(), MetricsError> {
        Ok(())
    }
}

impl<S: MetricsSink + ?Sized> MetricsSink for &mut S {
    fn record(&mut self, record: &TickRecord) -> Result<(), MetricsError> {
        (**self).record(record)
    }

    fn flush(&mut self) -> Result<(), MetricsError> {
        (**self).flush()
    }
}

impl<S: MetricsSink + ?Sized> MetricsSink for Box<S> {
    fn record(&mut self, record: &TickRecord) -> Result<(), MetricsError> {
        (**self).record(record)
    }

    fn flush(&mut self) -> Result<(), MetricsError> {
        (**self).flush()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl MetricsSink for NoopSink {
    fn record(&mut self, _record: &TickRecord) -> Result<(), MetricsError> {
        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    records: Vec<TickRecord>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[TickRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<TickRecord> {
        self.records
    }
}

impl MetricsSink for MemorySink {
    fn record(&mut self, record: &TickRecord) -> Result<(), MetricsError> {
        self.records.push(record.clone());
        Ok(())
    }
}

pub struct JsonlSink {
    writer: BufWriter<File>,
}

impl JsonlSink {
    pub fn create(path: &Path) -> Result<Self, MetricsError> {
        let file = File::create(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }
}

impl MetricsSink for JsonlSink {
    fn record(&mut self, record: &TickRecord) -> Result<(), MetricsError> {
        serde_json::to_writer(&mut self.writer, record)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), MetricsError> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Fans a record out to two sinks; both are attempted even if the first fails.
pub struct TeeSink<A, B> {
    first: A,
    second: B,
}

impl<A, B> TeeSink<A, B> {
    pub fn new(first: A, second: B) -> Self {
        Self { first, second }
    }

    pub fn into_parts(self) -> (A, B) {
        (self.first, self.second)
    }
}

impl<A: MetricsSink, B: MetricsSink> MetricsSink for TeeSink<A, B> {
    fn record(&mut self, record: &TickRecord) -> Result<(), MetricsError> {
        let first = self.first.record(record);
        let second = self.second.record(record);
        first.and(second)
    }

    fn flush(&mut self) -> Result<(), MetricsError> {
        let first = self.first.flush();
        let second = self.second.flush();
        first.and(second)
    }
}
