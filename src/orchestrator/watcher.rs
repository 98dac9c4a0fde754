//! Backlog watcher emitting event-driven run signals

use crate::config::BacklogConfig;
use crate::error::StoreError;
use crate::orchestrator::{RunSignal, TriggerKind};
use crate::state::CareMode;
use crate::store::CareStore;
use chrono::{Duration, Utc};
use log::{debug, warn};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Fires a backlog signal when a tenant's unprocessed observations pile up
pub struct BacklogWatcher {
    store: Arc<dyn CareStore>,
    config: BacklogConfig,
    signals: mpsc::Sender<RunSignal>,
}

impl BacklogWatcher {
    pub fn new(
        store: Arc<dyn CareStore>,
        config: BacklogConfig,
        signals: mpsc::Sender<RunSignal>,
    ) -> Self {
        Self {
            store,
            config,
            signals,
        }
    }

    /// Unprocessed observations needed to fire in the given mode
    pub fn threshold_for(&self, mode: CareMode) -> usize {
        match mode {
            CareMode::Emergency => 1,
            CareMode::Normal | CareMode::Paused => self.config.threshold,
        }
    }

    /// Count the tenant's backlog and emit a signal if it reached the threshold
    ///
    /// Returns whether a signal was sent. Paused tenants never fire.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the care state or backlog cannot be read.
    pub fn check(&self, tenant_id: &str) -> Result<bool, StoreError> {
        let state = self.store.care_state(tenant_id)?;
        if state.mode == CareMode::Paused {
            return Ok(false);
        }

        let since = Utc::now() - Duration::minutes(self.config.lookback_minutes);
        let backlog = self.store.unprocessed_count(tenant_id, since)?;
        let threshold = self.threshold_for(state.mode);
        if backlog < threshold {
            return Ok(false);
        }

        debug!(
            "Tenant {} backlog {} reached threshold {}",
            tenant_id, backlog, threshold
        );
        match self
            .signals
            .try_send(RunSignal::new(tenant_id, TriggerKind::Backlog))
        {
            Ok(()) => Ok(true),
            Err(e) => {
                warn!("Could not queue backlog run for {}: {}", tenant_id, e);
                Ok(false)
            }
        }
    }
}
