//! Background eviction of lapsed leases.
//!
//! Lease validation never depends on the reaper; it only keeps the registry
//! from accumulating leases abandoned by clients that never came back.

use crate::error::{ServerError, ServerResult};
use savesync_core::LeaseRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Periodic lease reaper.
pub struct LeaseReaper;

impl LeaseReaper {
    /// Spawns the reaper on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` if `interval` is zero and `Internal` if no
    /// runtime is running.
    pub fn start(registry: Arc<LeaseRegistry>, interval: Duration) -> ServerResult<ReaperHandle> {
        if interval.is_zero() {
            return Err(ServerError::InvalidRequest("reap interval must be positive".into()));
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| ServerError::Internal(format!("lease reaper needs a runtime: {e}")))?;

        let (shutdown, mut stopped) = watch::channel(false);
        let task = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let evicted = registry.reap();
                        if evicted > 0 {
                            tracing::info!(evicted, "lease reaper evicted expired leases");
                        }
                    }
                    changed = stopped.changed() => {
                        if changed.is_err() || *stopped.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("lease reaper stopped");
        });

        tracing::debug!(interval_ms = interval.as_millis() as u64, "lease reaper started");
        Ok(ReaperHandle {
            shutdown,
            task: Some(task),
        })
    }
}

/// Handle to a running reaper. Dropping it aborts the task.
#[derive(Debug)]
pub struct ReaperHandle {
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl ReaperHandle {
    /// Returns true while the task is running.
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Signals the reaper to stop and waits for it to exit.
    pub async fn stop(mut self) -> ServerResult<()> {
        let _ = self.shutdown.send(true);
        match self.task.take() {
            Some(task) => task
                .await
                .map_err(|e| ServerError::Internal(format!("lease reaper failed: {e}"))),
            None => Ok(()),
        }
    }
}

impl Drop for ReaperHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use savesync_core::{Clock, GameDirectory, Ledger, ManualClock, MemoryLedger, UserId};

    fn registry() -> (Arc<MemoryLedger>, Arc<ManualClock>, Arc<LeaseRegistry>) {
        let ledger = Arc::new(MemoryLedger::new());
        let clock = Arc::new(ManualClock::default());
        let registry = Arc::new(LeaseRegistry::new(
            Arc::clone(&ledger) as Arc<dyn Ledger>,
            Arc::clone(&clock) as Arc<dyn Clock>,
            Duration::from_secs(60),
        ));
        (ledger, clock, registry)
    }

    #[tokio::test]
    async fn evicts_expired_leases() {
        let (ledger, clock, registry) = registry();
        let user = UserId(1);
        for name in ["a", "b"] {
            let game = ledger.create_game(user, name).unwrap();
            registry.acquire(user, game.id).unwrap();
        }
        clock.advance(Duration::from_secs(61));
        assert_eq!(registry.len(), 2);

        let handle = LeaseReaper::start(Arc::clone(&registry), Duration::from_millis(10)).unwrap();
        for _ in 0..100 {
            if registry.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(registry.is_empty());
        handle.stop().await.unwrap();
    }

    #[tokio::test]
    async fn keeps_live_leases() {
        let (ledger, _clock, registry) = registry();
        let game = ledger.create_game(UserId(1), "a").unwrap();
        registry.acquire(UserId(1), game.id).unwrap();

        let handle = LeaseReaper::start(Arc::clone(&registry), Duration::from_millis(5)).unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(registry.live_count(), 1);
        handle.stop().await.unwrap();
    }

    #[tokio::test]
    async fn stop_ends_task() {
        let (_, _, registry) = registry();
        let handle = LeaseReaper::start(registry, Duration::from_secs(3600)).unwrap();
        assert!(handle.is_running());
        handle.stop().await.unwrap();
    }

    #[test]
    fn start_requires_runtime() {
        let (_, _, registry) = registry();
        let result = LeaseReaper::start(registry, Duration::from_secs(1));
        assert!(matches!(result, Err(ServerError::Internal(_))));
    }

    #[tokio::test]
    async fn zero_interval_rejected() {
        let (_, _, registry) = registry();
        let result = LeaseReaper::start(registry, Duration::ZERO);
        assert!(matches!(result, Err(ServerError::InvalidRequest(_))));
    }
}
