pub mod analytics;
pub mod campaign;
pub mod config;
pub mod fuzzer;
pub mod metrics;

pub use campaign::{Campaign, CampaignError, CampaignOutcome, CampaignPhase, StopReason};
pub use config::{ConfigError, PilotConfig};
pub use fuzzer::{AflFuzzer, Fuzzer, FuzzerError, TelemetryError};
pub use metrics::{JsonlSink, MemorySink, MetricsSink, NoopSink, TickRecord};
