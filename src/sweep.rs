//! Background expiry sweep
//!
//! Periodically removes sessions whose heartbeat is older than the
//! configured timeout. A failed pass is logged and the loop keeps going.
//! When a repository is attached, every pass that removed something
//! rebuilds it from the registry so expired records leave the cache too.

use crate::admission::SessionAdmission;
use crate::error::Result;
use crate::registry::SessionRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

struct SweepTask {
    shutdown: Arc<Notify>,
    handle: JoinHandle<()>,
}

/// One sweep pass, shared by `sweep_once` and the background task
#[derive(Clone)]
struct SweepPass {
    registry: Arc<dyn SessionRegistry>,
    reconcile: Option<SessionAdmission>,
    timeout_secs: u64,
}

impl SweepPass {
    async fn run(&self) -> Result<usize> {
        let removed = self.registry.remove_expired(self.timeout_secs).await?;
        if removed > 0 {
            if let Some(admission) = &self.reconcile {
                // A stale cache does not fail the pass
                if let Err(e) = admission.rebuild_repository().await {
                    tracing::warn!(error = %e, "Repository rebuild after sweep failed");
                }
            }
        }
        Ok(removed)
    }
}

/// Periodic `remove_expired` driver
pub struct ExpirySweeper {
    pass: SweepPass,
    period: Duration,
    task: RwLock<Option<SweepTask>>,
}

impl ExpirySweeper {
    pub fn new(registry: Arc<dyn SessionRegistry>, timeout_secs: u64, period: Duration) -> Self {
        Self {
            pass: SweepPass {
                registry,
                reconcile: None,
                timeout_secs,
            },
            period: period.max(Duration::from_millis(1)),
            task: RwLock::new(None),
        }
    }

    /// Rebuild `admission`'s repository after every pass that removed sessions
    pub fn with_repository_rebuild(mut self, admission: SessionAdmission) -> Self {
        self.pass.reconcile = Some(admission);
        self
    }

    /// Heartbeat timeout applied by each pass
    pub fn timeout_secs(&self) -> u64 {
        self.pass.timeout_secs
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Run one sweep pass now
    pub async fn sweep_once(&self) -> Result<usize> {
        self.pass.run().await
    }

    /// Start the background task; no-op if already running
    ///
    /// The first pass runs immediately, then once per period.
    pub async fn start(&self) {
        let mut task = self.task.write().await;
        if task.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            return;
        }

        let shutdown = Arc::new(Notify::new());
        let pass = self.pass.clone();
        let period = self.period;
        let signal = shutdown.clone();

        tracing::info!(
            backend = pass.registry.name(),
            timeout_secs = pass.timeout_secs,
            interval_ms = period.as_millis() as u64,
            rebuilds_repository = pass.reconcile.is_some(),
            "Expiry sweeper started"
        );

        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = signal.notified() => break,
                    _ = ticker.tick() => {}
                }

                match pass.run().await {
                    Ok(0) => {}
                    Ok(removed) => tracing::debug!(removed, "Sweep pass complete"),
                    Err(e) => tracing::error!(error = %e, "Expiry sweep failed"),
                }
            }

            tracing::info!("Expiry sweeper stopped");
        });

        *task = Some(SweepTask { shutdown, handle });
    }

    /// Stop the background task and wait for it to exit
    pub async fn stop(&self) {
        let Some(task) = self.task.write().await.take() else {
            return;
        };
        // notify_one stores a permit, so a task mid-pass still sees it
        task.shutdown.notify_one();
        if let Err(e) = task.handle.await {
            tracing::warn!(error = %e, "Expiry sweeper task ended abnormally");
        }
    }

    pub async fn is_running(&self) -> bool {
        self.task
            .read()
            .await
            .as_ref()
            .is_some_and(|t| !t.handle.is_finished())
    }
}
