//! # statesync-jobs
//!
//! Sweep coordination and background scheduling for statesync.
//!
//! A sweep validates one tenant end to end and, when asked, repairs the
//! drift it found and validates again. The [`SweepCoordinator`] runs at most
//! one sweep per tenant at a time, tracks each tenant's [`SweepPhase`] and
//! caches the latest result. The [`SweepScheduler`] walks every active tenant
//! on a fixed interval.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use statesync_jobs::{SweepConfig, SweepCoordinator, SweepScheduler};
//!
//! let config = SweepConfig::from_env();
//! let coordinator = Arc::new(SweepCoordinator::new(ctx, ValidatorConfig::from_env(), &config));
//! let handle = SweepScheduler::new(coordinator, config).start();
//!
//! // Later...
//! handle.shutdown().await?;
//! ```

pub mod config;
pub mod coordinator;
pub mod scheduler;

pub use config::SweepConfig;
pub use coordinator::{GateMode, SweepCoordinator, SweepOptions, SweepPhase};
pub use scheduler::{SchedulerHandle, SweepEvent, SweepScheduler};
