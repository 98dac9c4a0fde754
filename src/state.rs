//! Versioned per-tenant care state
//!
//! Replaces an ambient shared state row with an explicit object: readers take a
//! snapshot, writers must name the version they read.

use crate::events::{TenantId, Timestamp};
use serde::{Deserialize, Serialize};

/// Operating mode gating the pipeline for a tenant
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum CareMode {
    #[default]
    Normal,
    /// Every new observation counts toward an immediate run
    Emergency,
    /// Runs are skipped until the tenant is resumed
    Paused,
}

/// Snapshot of a tenant's care state
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CareState {
    pub tenant_id: TenantId,
    /// Incremented on every accepted update; 0 means never written
    pub version: u64,
    pub mode: CareMode,
    pub updated_at: Option<Timestamp>,
    pub updated_by: Option<String>,
}

impl CareState {
    /// Initial state for a tenant that has never been updated
    pub fn initial(tenant_id: &str) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            version: 0,
            mode: CareMode::Normal,
            updated_at: None,
            updated_by: None,
        }
    }

    /// Next version of this state with a new mode
    pub fn next(&self, mode: CareMode, actor: &str, now: Timestamp) -> Self {
        Self {
            tenant_id: self.tenant_id.clone(),
            version: self.version + 1,
            mode,
            updated_at: Some(now),
            updated_by: Some(actor.to_string()),
        }
    }
}
