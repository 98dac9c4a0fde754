//! Per-tenant mutual exclusion and run cancellation

use crate::events::TenantId;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Tracks which tenants currently have an active run
#[derive(Debug, Clone, Default)]
pub struct RunGuard {
    running: Arc<Mutex<HashSet<TenantId>>>,
}

impl RunGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the tenant, or `None` if a run is already active for it
    ///
    /// The claim lasts until the returned permit is dropped.
    pub fn try_acquire(&self, tenant_id: &str) -> Option<RunPermit> {
        let mut running = self.lock();
        if !running.insert(tenant_id.to_string()) {
            return None;
        }
        Some(RunPermit {
            tenant_id: tenant_id.to_string(),
            running: Arc::clone(&self.running),
        })
    }

    pub fn is_running(&self, tenant_id: &str) -> bool {
        self.lock().contains(tenant_id)
    }

    pub fn active_count(&self) -> usize {
        self.lock().len()
    }

    // The set is only ever inserted into or removed from, so a poisoned
    // lock still holds a consistent value.
    fn lock(&self) -> MutexGuard<'_, HashSet<TenantId>> {
        self.running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Exclusive claim on a tenant's run slot
#[derive(Debug)]
pub struct RunPermit {
    tenant_id: TenantId,
    running: Arc<Mutex<HashSet<TenantId>>>,
}

impl RunPermit {
    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }
}

impl Drop for RunPermit {
    fn drop(&mut self) {
        let mut running = self
            .running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        running.remove(&self.tenant_id);
    }
}

/// Cooperative cancellation flag shared between a dispatcher and a running pipeline
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_is_refused() {
        let guard = RunGuard::new();
        let permit = guard.try_acquire("t-1");
        assert!(permit.is_some());
        assert!(guard.try_acquire("t-1").is_none());
        assert!(guard.try_acquire("t-2").is_some());
    }

    #[test]
    fn test_drop_releases_tenant() {
        let guard = RunGuard::new();
        {
            let permit = guard.try_acquire("t-1").unwrap();
            assert_eq!(permit.tenant_id(), "t-1");
            assert!(guard.is_running("t-1"));
        }
        assert!(!guard.is_running("t-1"));
        assert_eq!(guard.active_count(), 0);
    }

    #[test]
    fn test_permit_released_from_another_thread() {
        let guard = RunGuard::new();
        let permit = guard.try_acquire("t-1").unwrap();
        std::thread::spawn(move || drop(permit)).join().unwrap();
        assert!(guard.try_acquire("t-1").is_some());
    }

    #[test]
    fn test_cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
