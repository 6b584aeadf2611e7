//! Scheduled maintenance for special (showcase) farms.
//!
//! The scheduler runs on the local wall clock rather than an OS cron: it polls
//! every `poll_secs`, and when the local date rolls over it replants every farm
//! whose weekday predicate matches. The stored `last_maintenance_timestamp` is
//! authoritative, so a restart on the same day never replants twice.
//!
//! # Features
//! - Startup check for runs missed while the process was down
//! - Per-farm weekday gating
//! - Manual runs from the CLI, optionally forced past the daily guard
//! - One farm failing never stops the others

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, Local, NaiveDate, NaiveDateTime, TimeZone, Utc};
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use thiserror::Error;
use tokio::time::MissedTickBehavior;

use crate::config::{CropCatalog, MaintenanceConfig, SpecialFarmConfig};
use crate::context::ServerContext;
use crate::engine::locks::AccountLocks;
use crate::farm::{plant_special_farm, MaintenanceRecord, PlantingError};
use crate::metrics;
use crate::server::Notifier;
use crate::shutdown::ShutdownRx;
use crate::storage::{Revision, StorageError, StorageGateway};

const DATE_FORMAT: &str = "%Y-%m-%d";
const STAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaintenanceOutcome {
    Planted { planted: usize },
    AlreadyMaintained,
    NotScheduledToday,
}

#[derive(Debug, Error)]
pub enum MaintenanceError {
    #[error("no special farm named '{0}'")]
    UnknownFarm(String),
    #[error("special farm account '{0}' has no record")]
    MissingAccount(String),
    #[error(transparent)]
    Planting(#[from] PlantingError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Result of one maintenance pass over every configured farm.
pub type RunReport = Vec<(String, Result<MaintenanceOutcome, MaintenanceError>)>;

/// Status information for display
#[derive(Debug, Clone)]
pub struct FarmStatus {
    pub name: String,
    pub account_id: String,
    pub last_maintenance: Option<String>,
    pub scheduled_today: bool,
}

pub struct MaintenanceScheduler {
    storage: StorageGateway,
    locks: Arc<AccountLocks>,
    notifier: Option<Notifier>,
    farms: Vec<SpecialFarmConfig>,
    crops: CropCatalog,
    config: MaintenanceConfig,
    last_checked_date: Option<NaiveDate>,
    rng: StdRng,
}

impl MaintenanceScheduler {
    pub fn new(ctx: &ServerContext) -> Self {
        Self::detached(
            ctx.storage.clone(),
            Arc::clone(&ctx.locks),
            ctx.config.special_farms.clone(),
            ctx.config.crops.clone(),
            ctx.config.maintenance.clone(),
        )
        .with_notifier(ctx.notifier.clone())
    }

    /// Scheduler without a session registry, for CLI runs outside the server.
    pub fn detached(
        storage: StorageGateway,
        locks: Arc<AccountLocks>,
        farms: Vec<SpecialFarmConfig>,
        crops: CropCatalog,
        config: MaintenanceConfig,
    ) -> Self {
        Self {
            storage,
            locks,
            notifier: None,
            farms,
            crops,
            config,
            last_checked_date: None,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn with_notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Deterministic planting for tests.
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    pub fn farms(&self) -> &[SpecialFarmConfig] {
        &self.farms
    }

    /// Immediate idempotent pass at process start.
    pub async fn startup_check(&mut self, now: NaiveDateTime) -> RunReport {
        info!(target: "sproutfarm::maintenance", "startup maintenance check for {} farm(s)", self.farms.len());
        self.last_checked_date = Some(now.date());
        self.run_all(now).await
    }

    /// Call every `poll_secs`. Runs all farms when the local date has rolled over
    /// since the previous call; returns `None` otherwise.
    pub async fn poll(&mut self, now: NaiveDateTime) -> Option<RunReport> {
        let today = now.date();
        match self.last_checked_date {
            Some(last) if last == today => None,
            Some(_) => {
                info!(target: "sproutfarm::maintenance", "date rolled over to {}, running maintenance", today);
                self.last_checked_date = Some(today);
                Some(self.run_all(now).await)
            }
            None => {
                self.last_checked_date = Some(today);
                None
            }
        }
    }

    /// Maintain every farm scheduled for `now`'s weekday.
    pub async fn run_all(&mut self, now: NaiveDateTime) -> RunReport {
        let farms = self.farms.clone();
        let mut report = Vec::with_capacity(farms.len());
        for farm in &farms {
            let result = self.maintain_farm(farm, now, true, false).await;
            match &result {
                Ok(MaintenanceOutcome::Planted { planted }) => info!(
                    target: "sproutfarm::maintenance",
                    "{}: planted {} plot(s)",
                    farm.name,
                    planted
                ),
                Ok(outcome) => debug!(target: "sproutfarm::maintenance", "{}: {:?}", farm.name, outcome),
                Err(e) => warn!(target: "sproutfarm::maintenance", "{}: maintenance failed: {}", farm.name, e),
            }
            report.push((farm.name.clone(), result));
        }
        report
    }

    /// Manual maintenance of one farm. Ignores weekday gating; `force` also skips
    /// the once-per-day guard.
    pub async fn maintain(
        &mut self,
        name: &str,
        now: NaiveDateTime,
        force: bool,
    ) -> Result<MaintenanceOutcome, MaintenanceError> {
        let farm = self
            .farms
            .iter()
            .find(|f| f.name == name || f.account_id == name)
            .cloned()
            .ok_or_else(|| MaintenanceError::UnknownFarm(name.to_string()))?;
        self.maintain_farm(&farm, now, false, force).await
    }

    async fn maintain_farm(
        &mut self,
        farm: &SpecialFarmConfig,
        now: NaiveDateTime,
        gate_weekday: bool,
        force: bool,
    ) -> Result<MaintenanceOutcome, MaintenanceError> {
        if gate_weekday && !farm.runs_on(now.weekday()) {
            return Ok(MaintenanceOutcome::NotScheduledToday);
        }

        let _guard = self.locks.lock(&farm.account_id).await;
        let mut record = self
            .storage
            .load(&farm.account_id)
            .await?
            .ok_or_else(|| MaintenanceError::MissingAccount(farm.account_id.clone()))?;

        let today = now.format(DATE_FORMAT).to_string();
        let done_today = record
            .maintenance
            .as_ref()
            .is_some_and(|m| m.maintained_on(&today));
        if done_today && !force {
            return Ok(MaintenanceOutcome::AlreadyMaintained);
        }

        let report = plant_special_farm(&mut record.land, farm, &self.crops, &mut self.rng)?;
        let stamp_utc = local_to_utc(now);
        record.maintenance = Some(MaintenanceRecord {
            last_maintenance_timestamp: now.format(STAMP_FORMAT).to_string(),
        });
        record.updated_at = stamp_utc;
        let expected = record.revision;
        let record = self.storage.save(record, Revision::Expect(expected)).await?;

        metrics::inc_maintenance_runs();
        if let Some(notifier) = &self.notifier {
            notifier.farm_changed(&record.account_id, &record.land, stamp_utc);
        }
        Ok(MaintenanceOutcome::Planted {
            planted: report.planted,
        })
    }

    /// Last maintenance stamp per farm, for the `status` subcommand.
    pub async fn status(&self, now: NaiveDateTime) -> Vec<FarmStatus> {
        let mut out = Vec::with_capacity(self.farms.len());
        for farm in &self.farms {
            let last = match self.storage.load(&farm.account_id).await {
                Ok(Some(record)) => record
                    .maintenance
                    .map(|m| m.last_maintenance_timestamp)
                    .filter(|s| !s.is_empty()),
                _ => None,
            };
            out.push(FarmStatus {
                name: farm.name.clone(),
                account_id: farm.account_id.clone(),
                last_maintenance: last,
                scheduled_today: farm.runs_on(now.weekday()),
            });
        }
        out
    }

    /// Startup check, then poll until shutdown.
    pub async fn run(mut self, mut shutdown: ShutdownRx) {
        if !self.config.enabled {
            info!(target: "sproutfarm::maintenance", "special farm maintenance disabled");
            return;
        }
        self.startup_check(Local::now().naive_local()).await;
        let mut poll = tokio::time::interval(Duration::from_secs(self.config.poll_secs));
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // first tick completes immediately; the startup check already covered it
        poll.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                _ = poll.tick() => {
                    self.poll(Local::now().naive_local()).await;
                }
            }
        }
        info!(target: "sproutfarm::maintenance", "maintenance scheduler stopped");
    }
}

fn local_to_utc(now: NaiveDateTime) -> DateTime<Utc> {
    Local
        .from_local_datetime(&now)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now)
}
