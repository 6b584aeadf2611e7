//! Operator-facing access to player records.
//!
//! The remote console and the CLI subcommands both go through [`AdminApi`]
//! so their writes serialize with request handlers and the tick engine on the
//! same per-account locks.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{info, warn};

use crate::config::{Config, SpecialFarmConfig};
use crate::context::ServerContext;
use crate::engine::AccountLocks;
use crate::farm::{LandPlot, PlayerRecord};
use crate::server::Notifier;
use crate::storage::{Revision, StorageError, StorageGateway};
use crate::validation::validate_account_id;

#[derive(Clone)]
pub struct AdminApi {
    storage: StorageGateway,
    locks: Arc<AccountLocks>,
    notifier: Option<Notifier>,
}

impl AdminApi {
    pub fn new(storage: StorageGateway, locks: Arc<AccountLocks>) -> Self {
        Self {
            storage,
            locks,
            notifier: None,
        }
    }

    /// Admin handle wired into a running server; saves push `crop_update`s.
    pub fn attached(ctx: &ServerContext) -> Self {
        Self {
            storage: ctx.storage.clone(),
            locks: Arc::clone(&ctx.locks),
            notifier: Some(ctx.notifier.clone()),
        }
    }

    pub async fn load_player_data(&self, account_id: &str) -> Result<PlayerRecord, StorageError> {
        self.storage
            .load(account_id)
            .await?
            .ok_or_else(|| StorageError::NotFound(account_id.to_string()))
    }

    /// Write back a record obtained from [`load_player_data`](Self::load_player_data).
    /// The record's own `account_id` must match, and a record that changed in
    /// storage since it was loaded is rejected with [`StorageError::Conflict`].
    pub async fn save_player_data(
        &self,
        account_id: &str,
        record: PlayerRecord,
    ) -> Result<PlayerRecord, StorageError> {
        if record.account_id != account_id {
            return Err(StorageError::InvalidUpdate {
                account_id: account_id.to_string(),
                reason: format!("record belongs to '{}'", record.account_id),
            });
        }
        let _guard = self.locks.lock(account_id).await;
        let expected = record.revision;
        let saved = match self.storage.save(record, Revision::Expect(expected)).await {
            Ok(saved) => saved,
            Err(e) => {
                if e.is_conflict() {
                    warn!(target: "sproutfarm::storage", "admin save for {} rejected: {}", account_id, e);
                }
                return Err(e);
            }
        };
        info!(target: "sproutfarm::storage", "admin saved record for {}", account_id);
        if let Some(notifier) = &self.notifier {
            notifier.farm_changed(account_id, &saved.land, Utc::now());
        }
        Ok(saved)
    }
}

/// Record for a special farm account: every plot dug, no password.
pub fn special_farm_record(farm: &SpecialFarmConfig, config: &Config, now: DateTime<Utc>) -> PlayerRecord {
    let mut record = PlayerRecord::from_template(&farm.account_id, &config.new_player, now);
    record.land = vec![LandPlot::dug_empty(); config.new_player.plot_count];
    record.nickname = farm.name.clone();
    record.farm_name = farm.name.clone();
    record.seeds.clear();
    record.wisdom_tree = None;
    record
}

/// Create records for special farms that do not exist yet. Returns the
/// account ids that were created.
pub async fn seed_special_farms(
    storage: &StorageGateway,
    config: &Config,
    now: DateTime<Utc>,
) -> Result<Vec<String>, StorageError> {
    let mut created = Vec::new();
    for farm in &config.special_farms {
        if validate_account_id(&farm.account_id).is_err() {
            continue;
        }
        if storage.load(&farm.account_id).await?.is_some() {
            continue;
        }
        let record = special_farm_record(farm, config, now);
        match storage.save(record, Revision::Expect(0)).await {
            Ok(_) => created.push(farm.account_id.clone()),
            // another process seeded it first
            Err(e) if e.is_conflict() => {}
            Err(e) => return Err(e),
        }
    }
    Ok(created)
}
