//! Per-tenant sweep coordination.
//!
//! A sweep walks `Idle → Validating → (Repairing) → Cached`. Each tenant has
//! a non-reentrant gate; a second sweep for the same tenant either waits for
//! the first or is rejected with [`Error::SweepAlreadyRunning`]. Finished
//! results are kept in a time-bounded cache keyed by tenant.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock as StdRwLock};
use std::time::Instant;

use moka::future::Cache;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use statesync_core::{ComprehensiveStateSyncResult, Error, Result, ValidationResult};
use statesync_engine::{EngineContext, Repairer, Validator, ValidatorConfig};

use crate::config::SweepConfig;

/// Where a tenant's sweep currently is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SweepPhase {
    /// No sweep in flight and no cached result
    #[default]
    Idle,
    Validating,
    Repairing,
    /// Last sweep finished; its result is cached
    Cached,
}

impl std::fmt::Display for SweepPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Validating => write!(f, "validating"),
            Self::Repairing => write!(f, "repairing"),
            Self::Cached => write!(f, "cached"),
        }
    }
}

/// What a sweep does when another sweep holds the tenant's gate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GateMode {
    /// Wait for the running sweep, then run.
    #[default]
    Wait,
    /// Fail with `Error::SweepAlreadyRunning`.
    Reject,
}

/// Options for [`SweepCoordinator::run_sweep`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepOptions {
    /// Repair drift and re-validate before caching.
    pub repair: bool,
    pub gate: GateMode,
}

impl SweepOptions {
    pub fn with_repair(mut self, repair: bool) -> Self {
        self.repair = repair;
        self
    }

    pub fn with_gate(mut self, gate: GateMode) -> Self {
        self.gate = gate;
        self
    }
}

/// Repair activity grouped by the category it belongs to.
#[derive(Default)]
struct RepairLog {
    users: ValidationResult,
    groups: ValidationResult,
    credentials: ValidationResult,
}

/// Runs full tenant sweeps and caches their results.
pub struct SweepCoordinator {
    ctx: EngineContext,
    validator: Validator,
    repairer: Repairer,
    cache: Cache<Uuid, Arc<ComprehensiveStateSyncResult>>,
    gates: RwLock<HashMap<Uuid, Arc<Mutex<()>>>>,
    phases: StdRwLock<HashMap<Uuid, SweepPhase>>,
}

impl SweepCoordinator {
    pub fn new(ctx: EngineContext, validator_config: ValidatorConfig, config: &SweepConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.cache_capacity)
            .time_to_live(config.cache_ttl)
            .build();
        Self {
            validator: Validator::new(ctx.clone(), validator_config),
            repairer: Repairer::new(ctx.clone()),
            ctx,
            cache,
            gates: RwLock::new(HashMap::new()),
            phases: StdRwLock::new(HashMap::new()),
        }
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    pub fn repairer(&self) -> &Repairer {
        &self.repairer
    }

    /// Validate a tenant and cache the result, waiting for any sweep of the
    /// same tenant already in flight.
    pub async fn run_full_sweep(&self, tenant_id: Uuid) -> Result<Arc<ComprehensiveStateSyncResult>> {
        self.run_sweep(tenant_id, SweepOptions::default()).await
    }

    /// Run one sweep under the tenant's gate.
    ///
    /// With `options.repair`, a sweep that finds drift repairs the
    /// collaboration group, every active user's security group references and
    /// the credential activation tags, then re-validates. The cached result is
    /// the post-repair state with the repair actions attached.
    pub async fn run_sweep(
        &self,
        tenant_id: Uuid,
        options: SweepOptions,
    ) -> Result<Arc<ComprehensiveStateSyncResult>> {
        if tenant_id.is_nil() {
            return Err(Error::InvalidInput("tenant_id must be non-nil".to_string()));
        }

        let gate = self.gate(tenant_id).await;
        let _permit = match options.gate {
            GateMode::Wait => gate.lock_owned().await,
            GateMode::Reject => gate.try_lock_owned().map_err(|_| {
                debug!(
                    subsystem = "jobs",
                    component = "coordinator",
                    op = "run_sweep",
                    tenant_id = %tenant_id,
                    "Sweep rejected, another sweep holds the gate"
                );
                Error::SweepAlreadyRunning(tenant_id)
            })?,
        };

        let start = Instant::now();
        let mut phase = PhaseGuard {
            coordinator: self,
            tenant_id,
            finished: false,
        };
        phase.set(SweepPhase::Validating);

        let mut result = self.validator.validate_all(tenant_id).await?;
        if options.repair && !result.is_fully_synced {
            phase.set(SweepPhase::Repairing);
            let log = self.repair(tenant_id).await;
            let after = self.validator.validate_all(tenant_id).await?;
            result = attach_repairs(tenant_id, after, log);
        }

        let result = Arc::new(result);
        self.cache.insert(tenant_id, Arc::clone(&result)).await;
        phase.finish();

        info!(
            subsystem = "jobs",
            component = "coordinator",
            op = "run_sweep",
            tenant_id = %tenant_id,
            in_sync = result.is_fully_synced,
            error_count = result.total_errors(),
            warning_count = result.total_warnings(),
            repair_count = result.repairs().count(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Sweep completed"
        );
        Ok(result)
    }

    /// Last cached result of a tenant, if it has not expired.
    pub async fn get_cached_result(&self, tenant_id: Uuid) -> Option<Arc<ComprehensiveStateSyncResult>> {
        self.cache.get(&tenant_id).await
    }

    /// Current phase of a tenant's sweep.
    pub fn phase(&self, tenant_id: Uuid) -> SweepPhase {
        let phase = self
            .phases
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&tenant_id)
            .copied()
            .unwrap_or_default();
        match phase {
            SweepPhase::Cached if !self.cache.contains_key(&tenant_id) => SweepPhase::Idle,
            phase => phase,
        }
    }

    async fn gate(&self, tenant_id: Uuid) -> Arc<Mutex<()>> {
        if let Some(gate) = self.gates.read().await.get(&tenant_id) {
            return Arc::clone(gate);
        }
        let mut gates = self.gates.write().await;
        Arc::clone(
            gates
                .entry(tenant_id)
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    fn set_phase(&self, tenant_id: Uuid, phase: SweepPhase) {
        self.phases
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(tenant_id, phase);
    }

    async fn repair(&self, tenant_id: Uuid) -> RepairLog {
        let mut log = RepairLog::default();

        match self.repairer.repair_collaboration_group(tenant_id).await {
            Ok(outcome) => log.groups.repairs.extend(outcome.report.repairs),
            Err(e) => log
                .groups
                .add_warning(format!("collaboration group repair failed: {}", e)),
        }

        match self
            .ctx
            .record("users.list_active_for_tenant", || {
                self.ctx.store.users().list_active_for_tenant(tenant_id)
            })
            .await
        {
            Ok(users) => {
                for user in users {
                    match self
                        .repairer
                        .repair_security_group_references(user.id, tenant_id)
                        .await
                    {
                        Ok(outcome) => log.users.repairs.extend(outcome.report.repairs),
                        Err(e) => log.users.add_warning(format!(
                            "security group reference repair failed for user {}: {}",
                            user.external_id, e
                        )),
                    }
                }
            }
            Err(e) => log
                .users
                .add_warning(format!("security group reference repair skipped: {}", e)),
        }

        match self.repairer.repair_credential_activation_tags(tenant_id).await {
            Ok(outcome) => log.credentials.repairs.extend(outcome.report.repairs),
            Err(e) => log
                .credentials
                .add_warning(format!("credential activation tag repair failed: {}", e)),
        }

        log
    }
}

/// Fold repair activity into the post-repair validation result.
fn attach_repairs(
    tenant_id: Uuid,
    after: ComprehensiveStateSyncResult,
    log: RepairLog,
) -> ComprehensiveStateSyncResult {
    let ComprehensiveStateSyncResult {
        mut user_result,
        mut group_result,
        mut credential_result,
        ..
    } = after;
    user_result.merge("", log.users);
    group_result.merge("", log.groups);
    credential_result.merge("", log.credentials);
    ComprehensiveStateSyncResult::from_categories(
        tenant_id,
        user_result,
        group_result,
        credential_result,
    )
}

/// Resets a tenant's phase if its sweep ends without a cached result,
/// including when the sweep future is dropped mid-flight.
struct PhaseGuard<'a> {
    coordinator: &'a SweepCoordinator,
    tenant_id: Uuid,
    finished: bool,
}

impl PhaseGuard<'_> {
    fn set(&mut self, phase: SweepPhase) {
        self.coordinator.set_phase(self.tenant_id, phase);
    }

    fn finish(&mut self) {
        self.set(SweepPhase::Cached);
        self.finished = true;
    }
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            let fallback = if self.coordinator.cache.contains_key(&self.tenant_id) {
                SweepPhase::Cached
            } else {
                SweepPhase::Idle
            };
            self.coordinator.set_phase(self.tenant_id, fallback);
        }
    }
}
