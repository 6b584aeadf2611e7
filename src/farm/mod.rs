//! # Farm domain model
//!
//! Durable per-account state and the pure rules that act on it:
//!
//! - [`types`] - [`PlayerRecord`], [`LandPlot`], [`MaintenanceRecord`]
//! - [`growth`] - per-tick growth accrual shared by the live and offline paths
//! - [`planting`] - mass-planting policies for special farms
//! - [`wisdom`] - wisdom tree decay and care
//!
//! Nothing here touches storage or the network; the engines in
//! [`crate::engine`] load records, apply these rules, and persist the result.

pub mod growth;
pub mod planting;
pub mod types;
pub mod wisdom;

pub use growth::{accrue_plot, accrue_record, catch_up, AccrualSummary, PlotAccrual};
pub use planting::{plant_special_farm, PlantingError, PlantingReport};
pub use types::{LandPlot, MaintenanceRecord, PlayerRecord, PublicFarmView, WisdomTree, LAND_TIERS};
pub use wisdom::{decay_wisdom_tree, tend_wisdom_tree, TreeChore, TreeDecay};
