//! Fixed-interval ticker emitting scheduled run signals

use crate::events::TenantId;
use crate::orchestrator::{RunSignal, TriggerKind};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Source of the tenants that should be scheduled
#[cfg_attr(test, mockall::automock)]
pub trait TenantRegistry: Send + Sync {
    fn active_tenants(&self) -> Vec<TenantId>;
}

/// Registry backed by the `[tenants]` section of the configuration
#[derive(Debug, Clone, Default)]
pub struct StaticTenantRegistry {
    tenants: Vec<TenantId>,
}

impl StaticTenantRegistry {
    pub fn new(tenants: Vec<TenantId>) -> Self {
        Self { tenants }
    }
}

impl TenantRegistry for StaticTenantRegistry {
    fn active_tenants(&self) -> Vec<TenantId> {
        self.tenants.clone()
    }
}

pub struct Scheduler {
    registry: Arc<dyn TenantRegistry>,
    signals: mpsc::Sender<RunSignal>,
    interval: Duration,
}

impl Scheduler {
    pub fn new(
        registry: Arc<dyn TenantRegistry>,
        signals: mpsc::Sender<RunSignal>,
        interval: Duration,
    ) -> Self {
        Self {
            registry,
            signals,
            interval,
        }
    }

    /// Emit one scheduled signal per active tenant
    ///
    /// Returns the number of signals accepted by the channel. A full channel
    /// drops the signal; the next tick or a backlog trigger will catch up.
    pub fn tick_once(&self) -> usize {
        let tenants = self.registry.active_tenants();
        debug!("Scheduler tick for {} tenants", tenants.len());

        let mut sent = 0;
        for tenant_id in tenants {
            match self
                .signals
                .try_send(RunSignal::new(tenant_id.clone(), TriggerKind::Scheduled))
            {
                Ok(()) => sent += 1,
                Err(TrySendError::Full(_)) => {
                    warn!("Run queue full, dropping scheduled run for {}", tenant_id)
                }
                Err(TrySendError::Closed(_)) => {
                    warn!("Run queue closed, scheduler tick abandoned");
                    break;
                }
            }
        }
        sent
    }

    /// Tick forever on the configured interval
    ///
    /// The first tick fires immediately. Abort the handle to stop.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Scheduler started with interval {:?}", self.interval);
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if self.signals.is_closed() {
                    info!("Scheduler stopping: run queue closed");
                    break;
                }
                self.tick_once();
            }
        })
    }
}
