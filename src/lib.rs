/// Error types for the care signal pipeline
pub mod error;

/// Raw domain events and canonical observations
pub mod events;

/// Observation aggregator with idempotent ingestion
pub mod aggregator;

/// Rolling baseline estimation
pub mod baseline;

/// Anomaly detector strategies
pub mod detectors;

/// Risk scoring
pub mod risk;

/// Issue prioritization and reviewer desk
pub mod issues;

/// Versioned per-tenant care state
pub mod state;

/// Persistence seam and in-memory adapter
pub mod store;

/// Run orchestration, triggers and mutual exclusion
pub mod orchestrator;

/// Self-monitoring of pipeline runs
pub mod monitoring;

/// Service facade for external collaborators
pub mod service;

/// Configuration management
pub mod config;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used types
pub use error::{
    ConfigError, DetectionError, IngestError, LifecycleError, PipelineError, StoreError,
};
pub use service::CareSignalService;
