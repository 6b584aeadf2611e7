//! # Background engines
//!
//! Two independent actors share the storage gateway and the session registry:
//!
//! - [`tick::WorldTick`] - growth accrual for online sessions every tick and a
//!   batched sweep for offline accounts
//! - [`maintenance::MaintenanceScheduler`] - daily, weekday-gated replanting of
//!   special farms
//!
//! Each runs in its own tokio task with its own timer, so a slow storage round
//! trip in one never delays the other. Both serialize per-account
//! read-modify-write sequences through [`locks::AccountLocks`], the same locks
//! request handlers take.

pub mod locks;
pub mod maintenance;
pub mod tick;

pub use locks::{AccountGuard, AccountLocks};
pub use maintenance::{FarmStatus, MaintenanceError, MaintenanceOutcome, MaintenanceScheduler, RunReport};
pub use tick::{OnlineTickReport, SweepReport, WorldTick};
