/// Configuration loading and validation
#[allow(clippy::module_inception)]
mod config;

pub use config::{
    BacklogConfig, BaselineConfig, Config, DetectionConfig, PriorityConfig, SchedulerConfig,
    ScoringConfig, TenantsConfig,
};
