//! Background sweep loop.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{broadcast, mpsc};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use statesync_core::defaults::EVENT_CHANNEL_CAPACITY;
use statesync_core::{Error, Result};

use crate::config::SweepConfig;
use crate::coordinator::{GateMode, SweepCoordinator, SweepOptions};

/// Event emitted by the sweep scheduler.
#[derive(Debug, Clone, PartialEq)]
pub enum SweepEvent {
    /// Scheduler loop started.
    SchedulerStarted,
    /// A cycle over all active tenants began.
    CycleStarted { tenants: usize },
    /// One tenant's sweep finished.
    TenantCompleted {
        tenant_id: Uuid,
        in_sync: bool,
        error_count: usize,
        warning_count: usize,
        duration_ms: u64,
    },
    /// One tenant's sweep failed, timed out or was skipped.
    TenantFailed { tenant_id: Uuid, error: String },
    /// A cycle ended.
    CycleCompleted {
        swept: usize,
        failed: usize,
        duration_ms: u64,
    },
    /// Scheduler loop stopped.
    SchedulerStopped,
}

/// Handle for controlling a running scheduler.
pub struct SchedulerHandle {
    shutdown_tx: mpsc::Sender<()>,
    event_rx: broadcast::Receiver<SweepEvent>,
}

impl SchedulerHandle {
    /// Signal the scheduler to stop after the tenant in flight.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| Error::Internal("Failed to send shutdown signal".into()))?;
        Ok(())
    }

    /// Get a receiver for scheduler events.
    pub fn events(&self) -> broadcast::Receiver<SweepEvent> {
        self.event_rx.resubscribe()
    }
}

/// Sweeps every active tenant, one at a time, on a fixed interval.
pub struct SweepScheduler {
    coordinator: Arc<SweepCoordinator>,
    config: SweepConfig,
    event_tx: broadcast::Sender<SweepEvent>,
}

enum CycleEnd {
    Finished,
    Shutdown,
}

impl SweepScheduler {
    pub fn new(coordinator: Arc<SweepCoordinator>, config: SweepConfig) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            coordinator,
            config,
            event_tx,
        }
    }

    /// Get a receiver for scheduler events.
    pub fn events(&self) -> broadcast::Receiver<SweepEvent> {
        self.event_tx.subscribe()
    }

    /// Start the loop and return a handle for control.
    pub fn start(self) -> SchedulerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let event_rx = self.event_tx.subscribe();

        tokio::spawn(async move {
            self.run(&mut shutdown_rx).await;
        });

        SchedulerHandle {
            shutdown_tx,
            event_rx,
        }
    }

    async fn run(&self, shutdown_rx: &mut mpsc::Receiver<()>) {
        if !self.config.enabled {
            info!(
                subsystem = "jobs",
                component = "scheduler",
                "Sweep scheduler is disabled, not starting"
            );
            let _ = self.event_tx.send(SweepEvent::SchedulerStopped);
            return;
        }

        info!(
            subsystem = "jobs",
            component = "scheduler",
            interval_secs = self.config.interval.as_secs(),
            tenant_pause_ms = self.config.tenant_pause.as_millis() as u64,
            tenant_timeout_secs = self.config.tenant_timeout.as_secs(),
            repair = self.config.repair,
            "Sweep scheduler started"
        );
        let _ = self.event_tx.send(SweepEvent::SchedulerStarted);

        loop {
            if let CycleEnd::Shutdown = self.run_cycle(shutdown_rx).await {
                break;
            }
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = sleep(self.config.interval) => {}
            }
        }

        let _ = self.event_tx.send(SweepEvent::SchedulerStopped);
        info!(
            subsystem = "jobs",
            component = "scheduler",
            "Sweep scheduler stopped"
        );
    }

    /// Sweep every active tenant sequentially. A tenant failure is logged and
    /// the cycle moves on.
    async fn run_cycle(&self, shutdown_rx: &mut mpsc::Receiver<()>) -> CycleEnd {
        let ctx = self.coordinator.context();
        let tenants = match ctx
            .record("tenants.list_active_ids", || ctx.store.tenants().list_active_ids())
            .await
        {
            Ok(tenants) => tenants,
            Err(e) => {
                error!(
                    subsystem = "jobs",
                    component = "scheduler",
                    error = %e,
                    "Failed to enumerate tenants, skipping cycle"
                );
                return CycleEnd::Finished;
            }
        };

        let start = Instant::now();
        let _ = self.event_tx.send(SweepEvent::CycleStarted {
            tenants: tenants.len(),
        });
        debug!(
            subsystem = "jobs",
            component = "scheduler",
            tenants = tenants.len(),
            "Sweep cycle started"
        );

        let mut swept = 0;
        let mut failed = 0;
        for (i, tenant_id) in tenants.iter().copied().enumerate() {
            if i > 0 && !self.config.tenant_pause.is_zero() {
                tokio::select! {
                    _ = shutdown_rx.recv() => return CycleEnd::Shutdown,
                    _ = sleep(self.config.tenant_pause) => {}
                }
            } else if shutdown_rx.try_recv().is_ok() {
                return CycleEnd::Shutdown;
            }

            match self.sweep_tenant(tenant_id).await {
                Ok(event) => {
                    swept += 1;
                    let _ = self.event_tx.send(event);
                }
                Err(error) => {
                    failed += 1;
                    let _ = self.event_tx.send(SweepEvent::TenantFailed { tenant_id, error });
                }
            }
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        info!(
            subsystem = "jobs",
            component = "scheduler",
            swept,
            failed,
            duration_ms,
            "Sweep cycle completed"
        );
        let _ = self.event_tx.send(SweepEvent::CycleCompleted {
            swept,
            failed,
            duration_ms,
        });
        CycleEnd::Finished
    }

    async fn sweep_tenant(&self, tenant_id: Uuid) -> std::result::Result<SweepEvent, String> {
        let start = Instant::now();
        let options = SweepOptions::default()
            .with_repair(self.config.repair)
            .with_gate(GateMode::Reject);

        let outcome = tokio::time::timeout(
            self.config.tenant_timeout,
            self.coordinator.run_sweep(tenant_id, options),
        )
        .await;

        match outcome {
            Ok(Ok(result)) => Ok(SweepEvent::TenantCompleted {
                tenant_id,
                in_sync: result.is_fully_synced,
                error_count: result.total_errors(),
                warning_count: result.total_warnings(),
                duration_ms: start.elapsed().as_millis() as u64,
            }),
            Ok(Err(e)) => {
                warn!(
                    subsystem = "jobs",
                    component = "scheduler",
                    tenant_id = %tenant_id,
                    error = %e,
                    "Tenant sweep failed"
                );
                Err(e.to_string())
            }
            Err(_) => {
                let message = format!(
                    "sweep exceeded {}s",
                    self.config.tenant_timeout.as_secs()
                );
                warn!(
                    subsystem = "jobs",
                    component = "scheduler",
                    tenant_id = %tenant_id,
                    timeout_secs = self.config.tenant_timeout.as_secs(),
                    "Tenant sweep timed out"
                );
                Err(message)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use statesync_core::mock::{self, InMemoryRecordStore, MockDirectory, MockSecretStore};
    use statesync_engine::{EngineContext, ResilienceConfig, ValidatorConfig};

    fn scheduler(
        store: &InMemoryRecordStore,
        directory: MockDirectory,
        config: SweepConfig,
    ) -> (Arc<SweepCoordinator>, SweepScheduler) {
        let ctx = EngineContext::new(
            Arc::new(store.clone()),
            Arc::new(directory),
            Arc::new(MockSecretStore::new()),
            &ResilienceConfig::default(),
        );
        let coordinator = Arc::new(SweepCoordinator::new(ctx, ValidatorConfig::default(), &config));
        let scheduler = SweepScheduler::new(Arc::clone(&coordinator), config);
        (coordinator, scheduler)
    }

    async fn next_cycle(events: &mut broadcast::Receiver<SweepEvent>) -> Vec<SweepEvent> {
        let mut seen = Vec::new();
        loop {
            let event = events.recv().await.unwrap();
            let done = matches!(event, SweepEvent::CycleCompleted { .. });
            seen.push(event);
            if done {
                return seen;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_tenant_does_not_halt_the_cycle() {
        let store = InMemoryRecordStore::new();
        let vanished = Uuid::new_v4();
        let healthy = mock::tenant("Healthy", Some("collab"));
        store.insert_tenant(healthy.clone());
        store.insert_vanished_tenant(vanished);
        let directory = MockDirectory::new().with_group("collab", &[]);
        let (coordinator, scheduler) = scheduler(&store, directory, SweepConfig::default());

        let mut events = scheduler.events();
        let handle = scheduler.start();
        assert_eq!(events.recv().await.unwrap(), SweepEvent::SchedulerStarted);

        let cycle = next_cycle(&mut events).await;
        assert!(cycle
            .iter()
            .any(|e| matches!(e, SweepEvent::TenantFailed { tenant_id, .. } if *tenant_id == vanished)));
        assert!(cycle.iter().any(
            |e| matches!(e, SweepEvent::TenantCompleted { tenant_id, .. } if *tenant_id == healthy.id)
        ));
        assert!(matches!(
            cycle.last(),
            Some(SweepEvent::CycleCompleted { swept: 1, failed: 1, .. })
        ));
        assert!(coordinator.get_cached_result(healthy.id).await.is_some());

        handle.shutdown().await.unwrap();
        loop {
            if events.recv().await.unwrap() == SweepEvent::SchedulerStopped {
                break;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_tenant_is_bounded_by_timeout() {
        let store = InMemoryRecordStore::new();
        let tenant = mock::tenant("Slow", Some("collab"));
        store.insert_tenant(tenant.clone());
        let directory = MockDirectory::new()
            .with_group("collab", &[])
            .with_latency(Duration::from_secs(60));
        let config = SweepConfig::default().with_tenant_timeout(Duration::from_secs(5));
        let (coordinator, scheduler) = scheduler(&store, directory, config);

        let mut events = scheduler.events();
        let handle = scheduler.start();
        let cycle = next_cycle(&mut events).await;

        assert!(cycle.iter().any(|e| matches!(
            e,
            SweepEvent::TenantFailed { error, .. } if error.contains("exceeded")
        )));
        assert_eq!(
            coordinator.phase(tenant.id),
            crate::coordinator::SweepPhase::Idle
        );
        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycles_repeat_on_interval() {
        let store = InMemoryRecordStore::new();
        store.insert_tenant(mock::tenant("Acme", Some("collab")));
        let directory = MockDirectory::new().with_group("collab", &[]);
        let config = SweepConfig::default().with_interval(Duration::from_secs(60));
        let (_, scheduler) = scheduler(&store, directory, config);

        let mut events = scheduler.events();
        let handle = scheduler.start();
        next_cycle(&mut events).await;
        let before = tokio::time::Instant::now();
        next_cycle(&mut events).await;
        assert!(before.elapsed() >= Duration::from_secs(60));
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_disabled_scheduler_stops_immediately() {
        let store = InMemoryRecordStore::new();
        let (_, scheduler) = scheduler(
            &store,
            MockDirectory::new(),
            SweepConfig::default().with_enabled(false),
        );
        let mut events = scheduler.events();
        let _handle = scheduler.start();
        assert_eq!(events.recv().await.unwrap(), SweepEvent::SchedulerStopped);
    }
}
