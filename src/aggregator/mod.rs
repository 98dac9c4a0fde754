/// Observation aggregator: normalization and idempotent ingestion
pub mod observation_aggregator;

pub use observation_aggregator::{IngestOutcome, IngestSummary, ObservationAggregator};
