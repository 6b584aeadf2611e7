//! World tick: growth accrual for online accounts every tick and for offline
//! accounts in batched sweeps.
//!
//! Every accrual write stamps `updated_at` with the time its last tick covered.
//! Both paths (and the land-action handlers) use that marker to decide how many
//! ticks a record is owed, so an account moving between online and offline is
//! charged each tick window once, and a skipped record keeps its backlog.
//!
//! Sweeps walk the offline candidates in account id order from a cursor, so a
//! `sweep_limit` smaller than the candidate set still reaches every account.
//! Online ticks also run the wisdom tree decay check.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

use crate::config::{GrowthPolicy, TickConfig, WisdomTreePolicy};
use crate::context::ServerContext;
use crate::engine::locks::AccountLocks;
use crate::farm::{catch_up, decay_wisdom_tree, AccrualSummary, PlayerRecord, TreeDecay};
use crate::logutil::escape_log;
use crate::metrics;
use crate::server::{Notifier, SessionRegistry};
use crate::shutdown::ShutdownRx;
use crate::storage::{FieldUpdate, Projection, RecordFilter, StorageError, StorageGateway};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OnlineTickReport {
    pub accounts: usize,
    pub written: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Records returned by the sweep query.
    pub candidates: usize,
    /// Records that logged in, were busy, or were not yet owed a tick.
    pub skipped: usize,
    pub written: usize,
    pub plots_advanced: usize,
    /// Records whose revision moved under us; retried next sweep.
    pub conflicts: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct WorldTick {
    storage: StorageGateway,
    registry: Arc<SessionRegistry>,
    notifier: Notifier,
    locks: Arc<AccountLocks>,
    growth: GrowthPolicy,
    tick: TickConfig,
    wisdom: WisdomTreePolicy,
    /// Last account id the previous sweep reached.
    cursor: Arc<Mutex<Option<String>>>,
}

impl WorldTick {
    pub fn new(ctx: &ServerContext) -> Self {
        Self {
            storage: ctx.storage.clone(),
            registry: Arc::clone(&ctx.registry),
            notifier: ctx.notifier.clone(),
            locks: Arc::clone(&ctx.locks),
            growth: ctx.config.growth.clone(),
            tick: ctx.config.tick.clone(),
            wisdom: ctx.config.wisdom_tree.clone(),
            cursor: Arc::new(Mutex::new(None)),
        }
    }

    fn catch_up(&self, record: &mut PlayerRecord, now: DateTime<Utc>) -> Option<AccrualSummary> {
        catch_up(record, &self.growth, &self.tick, now)
    }

    fn decay_tree(&self, record: &mut PlayerRecord, now: DateTime<Utc>) -> TreeDecay {
        match record.wisdom_tree.as_mut() {
            Some(tree) => decay_wisdom_tree(tree, &self.wisdom, now, &mut rand::thread_rng()),
            None => TreeDecay::default(),
        }
    }

    /// One tick for every account with a live session.
    pub async fn online_tick(&self, now: DateTime<Utc>) -> OnlineTickReport {
        metrics::inc_online_ticks();
        let accounts = self.registry.online_accounts();
        let mut report = OnlineTickReport {
            accounts: accounts.len(),
            ..Default::default()
        };
        let mut tasks = JoinSet::new();
        for account_id in accounts {
            let this = self.clone();
            tasks.spawn(async move { this.tick_online_account(&account_id, now).await });
        }
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(true)) => report.written += 1,
                Ok(Ok(false)) => {}
                Ok(Err(())) => report.failed += 1,
                Err(e) => {
                    warn!(target: "sproutfarm::tick", "online tick task failed: {}", e);
                    report.failed += 1;
                }
            }
        }
        report
    }

    async fn tick_online_account(&self, account_id: &str, now: DateTime<Utc>) -> Result<bool, ()> {
        let _guard = self.locks.lock(account_id).await;
        if !self.registry.is_online(account_id) {
            // logged out while we waited; the sweep owns it now
            return Ok(false);
        }
        let mut record = match self.storage.load(account_id).await {
            Ok(Some(record)) => record,
            Ok(None) => return Ok(false),
            Err(e) => {
                metrics::inc_storage_failures();
                warn!(target: "sproutfarm::tick", "load {} failed: {}", escape_log(account_id), e);
                return Err(());
            }
        };
        // jitter can leave a tick unpaid here; the marker carries it to the next one
        let summary = self.catch_up(&mut record, now).unwrap_or_default();
        let decay = self.decay_tree(&mut record, now);
        if !summary.changed() && !decay.changed() {
            return Ok(false);
        }
        if decay.health_lost > 0 {
            info!(
                target: "sproutfarm::tick",
                "wisdom tree of {} lost {} health to neglect",
                escape_log(account_id),
                decay.health_lost
            );
        }
        let update = FieldUpdate::land_accrual(&record, record.updated_at)
            .and_then(|update| update.set("wisdom_tree", &record.wisdom_tree))
            .map_err(|e| {
                warn!(target: "sproutfarm::tick", "encode {} failed: {}", escape_log(account_id), e);
            })?;
        match self.storage.update_fields(account_id, update).await {
            Ok(_) => {
                metrics::add_plots_accrued(summary.plots_advanced as u64);
                if summary.changed() {
                    self.notifier.farm_changed(account_id, &record.land, now);
                }
                Ok(true)
            }
            Err(e) => {
                metrics::inc_storage_failures();
                warn!(
                    target: "sproutfarm::tick",
                    "saving growth for {} failed (retried next tick): {}",
                    escape_log(account_id),
                    e
                );
                Err(())
            }
        }
    }

    /// One batched pass over offline accounts with growing plots.
    pub async fn offline_sweep(&self, now: DateTime<Utc>) -> SweepReport {
        metrics::inc_offline_sweeps();
        let mut report = SweepReport::default();
        let candidates = match self.sweep_candidates().await {
            Ok(records) => records,
            Err(e) => {
                metrics::inc_storage_failures();
                warn!(target: "sproutfarm::tick", "sweep query failed: {}", e);
                report.failed += 1;
                return report;
            }
        };
        report.candidates = candidates.len();

        let mut guards = Vec::with_capacity(candidates.len());
        let mut batch = Vec::with_capacity(candidates.len());
        let mut changed = Vec::with_capacity(candidates.len());
        for mut record in candidates {
            // a busy lock means a handler (usually a login) is working on it
            let Some(guard) = self.locks.try_lock(&record.account_id) else {
                report.skipped += 1;
                continue;
            };
            if self.registry.is_online(&record.account_id) {
                report.skipped += 1;
                continue;
            }
            let Some(summary) = self.catch_up(&mut record, now) else {
                report.skipped += 1;
                continue;
            };
            let advanced = summary.plots_advanced;
            let marker = record.updated_at;
            match FieldUpdate::land_accrual(&record, marker) {
                Ok(update) => {
                    report.plots_advanced += advanced;
                    batch.push((record.account_id.clone(), update));
                    changed.push(record);
                    guards.push(guard);
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(target: "sproutfarm::tick", "encode {} failed: {}", escape_log(&record.account_id), e);
                }
            }
        }

        if !batch.is_empty() {
            let results = match self.storage.update_many(batch).await {
                Ok(results) => results,
                Err(e) => {
                    metrics::inc_storage_failures();
                    warn!(target: "sproutfarm::tick", "sweep batch failed: {}", e);
                    report.failed += changed.len();
                    return report;
                }
            };
            let written: HashSet<String> = results
                .into_iter()
                .filter_map(|(account_id, result)| match result {
                    Ok(_) => Some(account_id),
                    Err(e) if e.is_conflict() => {
                        report.conflicts += 1;
                        debug!(target: "sproutfarm::tick", "sweep conflict on {}: {}", escape_log(&account_id), e);
                        None
                    }
                    Err(e) => {
                        report.failed += 1;
                        metrics::inc_storage_failures();
                        warn!(
                            target: "sproutfarm::tick",
                            "sweep write for {} failed (retried next sweep): {}",
                            escape_log(&account_id),
                            e
                        );
                        None
                    }
                })
                .collect();
            report.written = written.len();
            for record in changed.iter().filter(|r| written.contains(&r.account_id)) {
                // owners are offline, but spectators may be watching
                self.notifier.farm_changed(&record.account_id, &record.land, now);
            }
        }
        drop(guards);

        metrics::add_plots_accrued(report.plots_advanced as u64);
        debug!(
            target: "sproutfarm::tick",
            "offline sweep: {} candidates, {} written, {} skipped, {} conflicts, {} failed",
            report.candidates,
            report.written,
            report.skipped,
            report.conflicts,
            report.failed
        );
        report
    }

    /// The next `sweep_limit` offline candidates after the cursor, wrapping to the
    /// start of the id space; advances the cursor past what was returned.
    async fn sweep_candidates(&self) -> Result<Vec<PlayerRecord>, StorageError> {
        let limit = self.tick.sweep_limit;
        let filter = |bound: Option<RecordFilter>| {
            let mut parts = vec![
                RecordFilter::HasGrowingPlot,
                RecordFilter::ExcludeAccounts(self.registry.online_accounts()),
            ];
            parts.extend(bound);
            RecordFilter::AllOf(parts)
        };
        let cursor = self.cursor.lock().unwrap_or_else(|p| p.into_inner()).clone();
        let mut candidates = match &cursor {
            Some(after) => {
                let mut first = self
                    .storage
                    .query(filter(Some(RecordFilter::IdAfter(after.clone()))), Projection::Land, limit)
                    .await?;
                if first.len() < limit {
                    let rest = self
                        .storage
                        .query(
                            filter(Some(RecordFilter::IdAtMost(after.clone()))),
                            Projection::Land,
                            limit - first.len(),
                        )
                        .await?;
                    first.extend(rest);
                }
                first
            }
            None => self.storage.query(filter(None), Projection::Land, limit).await?,
        };
        candidates.truncate(limit);
        let next = if candidates.len() < limit {
            // the whole candidate set fit; start over next time
            None
        } else {
            candidates.last().map(|r| r.account_id.clone())
        };
        *self.cursor.lock().unwrap_or_else(|p| p.into_inner()) = next;
        Ok(candidates)
    }

    /// Drive both cadences until shutdown.
    pub async fn run(self, mut shutdown: ShutdownRx) {
        let mut online = tokio::time::interval(Duration::from_millis(self.tick.online_interval_ms));
        online.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut sweep = tokio::time::interval(Duration::from_secs(self.tick.offline_sweep_secs));
        sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            target: "sproutfarm::tick",
            "world tick started (online every {}ms, offline sweep every {}s)",
            self.tick.online_interval_ms,
            self.tick.offline_sweep_secs
        );
        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                _ = online.tick() => {
                    self.online_tick(Utc::now()).await;
                }
                _ = sweep.tick() => {
                    let report = self.offline_sweep(Utc::now()).await;
                    if report.failed > 0 {
                        info!(target: "sproutfarm::tick", "offline sweep finished with {} failures", report.failed);
                    }
                    self.locks.prune();
                }
            }
        }
        info!(target: "sproutfarm::tick", "world tick stopped");
    }
}
