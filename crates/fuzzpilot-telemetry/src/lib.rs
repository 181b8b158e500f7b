pub mod snapshot;
pub mod stats;
pub mod strategy;

pub use snapshot::TelemetrySnapshot;
pub use strategy::MutationStrategy;
