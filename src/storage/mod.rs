//! # Storage Module - Player Record Persistence
//!
//! The rest of the server talks to persistence only through the narrow
//! [`PlayerStore`] contract defined here:
//!
//! - [`PlayerStore::load_record`] / [`PlayerStore::save_record`] - whole-document access
//! - [`PlayerStore::query_records`] - predicate + projection + limit scans
//! - [`PlayerStore::update_fields`] - atomic top-level field merge for one document
//! - [`PlayerStore::update_many`] - one batch of field merges with a single flush
//!
//! ## Backends
//!
//! ```text
//! data/
//! ├── players/        ← sled database (default backend)
//! └── game_saves/     ← one <account>.json per player (json backend)
//! ```
//!
//! Both backends store records as JSON documents and maintain a per-record
//! `revision` counter. Writers may pass an expected revision; a mismatch is
//! reported as [`StorageError::Conflict`] instead of silently overwriting.
//!
//! ## Async access
//!
//! Backends are synchronous. Async callers go through [`StorageGateway`], which
//! moves each call onto tokio's blocking pool so a slow disk never stalls the
//! tick loop or connection tasks.
//!
//! ```rust,no_run
//! use sproutfarm::config::Config;
//! use sproutfarm::storage::StorageGateway;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     let storage = StorageGateway::open(&config.storage)?;
//!     if let Some(record) = storage.load("special_wheat").await? {
//!         println!("{} plots", record.land.len());
//!     }
//!     Ok(())
//! }
//! ```

pub mod errors;
pub mod json_store;
pub mod sled_store;

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::config::{StorageBackend, StorageConfig};
use crate::farm::PlayerRecord;

pub use errors::StorageError;
pub use json_store::JsonFilePlayerStore;
pub use sled_store::SledPlayerStore;

/// How a write treats the currently stored revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Revision {
    /// Overwrite regardless of what is stored.
    Any,
    /// Fail with [`StorageError::Conflict`] unless the stored revision equals this value.
    /// `Expect(0)` means "the record must not exist yet".
    Expect(u64),
}

/// Record predicate evaluated by [`PlayerStore::query_records`].
#[derive(Debug, Clone)]
pub enum RecordFilter {
    Any,
    /// At least one plot that is dug, planted, alive and not yet mature.
    HasGrowingPlot,
    ExcludeAccounts(HashSet<String>),
    /// Account ids that sort strictly after this one.
    IdAfter(String),
    /// Account ids that sort at or before this one.
    IdAtMost(String),
    AllOf(Vec<RecordFilter>),
}

impl RecordFilter {
    pub fn matches(&self, record: &PlayerRecord) -> bool {
        match self {
            RecordFilter::Any => true,
            RecordFilter::HasGrowingPlot => record.has_growing_plot(),
            RecordFilter::ExcludeAccounts(ids) => !ids.contains(&record.account_id),
            RecordFilter::IdAfter(id) => record.account_id.as_str() > id.as_str(),
            RecordFilter::IdAtMost(id) => record.account_id.as_str() <= id.as_str(),
            RecordFilter::AllOf(filters) => filters.iter().all(|f| f.matches(record)),
        }
    }
}

/// Which parts of a record a query returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Projection {
    Full,
    /// Account id, registration time, land, revision and `updated_at` only.
    Land,
}

impl Projection {
    pub fn apply(self, record: PlayerRecord) -> PlayerRecord {
        match self {
            Projection::Full => record,
            Projection::Land => {
                let mut slim = PlayerRecord::new(&record.account_id, 0, record.registered_at);
                slim.land = record.land;
                slim.revision = record.revision;
                slim.updated_at = record.updated_at;
                slim
            }
        }
    }
}

/// A set of top-level fields to merge into one stored record.
#[derive(Debug, Clone, Default)]
pub struct FieldUpdate {
    fields: Map<String, Value>,
    expected_revision: Option<u64>,
}

const PROTECTED_FIELDS: [&str; 2] = ["account_id", "revision"];

impl FieldUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `field` to the JSON encoding of `value`.
    pub fn set<T: Serialize + ?Sized>(mut self, field: &str, value: &T) -> Result<Self, StorageError> {
        self.fields
            .insert(field.to_string(), serde_json::to_value(value)?);
        Ok(self)
    }

    pub fn expect_revision(mut self, revision: u64) -> Self {
        self.expected_revision = Some(revision);
        self
    }

    /// The update the tick engine writes after accruing growth on `record`.
    pub fn land_accrual(record: &PlayerRecord, now: DateTime<Utc>) -> Result<Self, StorageError> {
        Ok(Self::new()
            .set("land", &record.land)?
            .set("updated_at", &now)?
            .expect_revision(record.revision))
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }
}

/// Storage contract shared by every component of the server.
pub trait PlayerStore: Send + Sync {
    fn load_record(&self, account_id: &str) -> Result<Option<PlayerRecord>, StorageError>;

    /// Replace the stored document. Returns the new revision.
    fn save_record(
        &self,
        account_id: &str,
        record: &PlayerRecord,
        revision: Revision,
    ) -> Result<u64, StorageError>;

    /// Up to `limit` matching records in ascending account id order.
    fn query_records(
        &self,
        filter: &RecordFilter,
        projection: Projection,
        limit: usize,
    ) -> Result<Vec<PlayerRecord>, StorageError>;

    /// Merge top-level fields into an existing document. Returns the new revision.
    fn update_fields(&self, account_id: &str, update: &FieldUpdate) -> Result<u64, StorageError>;

    /// Apply several independent updates and flush once. Results are per account,
    /// in input order; one failure does not stop the rest.
    fn update_many(
        &self,
        updates: &[(String, FieldUpdate)],
    ) -> Vec<(String, Result<u64, StorageError>)>;

    fn list_account_ids(&self) -> Result<Vec<String>, StorageError>;
}

fn stored_revision(doc: &Value) -> u64 {
    doc.get("revision").and_then(Value::as_u64).unwrap_or(0)
}

fn check_revision(account_id: &str, found: u64, expected: Option<u64>) -> Result<(), StorageError> {
    match expected {
        Some(expected) if expected != found => Err(StorageError::Conflict {
            account_id: account_id.to_string(),
            expected,
            found,
        }),
        _ => Ok(()),
    }
}

/// Compute the bytes that replace `current` for a whole-record save.
pub(crate) fn encode_save(
    account_id: &str,
    current: Option<&[u8]>,
    record: &PlayerRecord,
    revision: Revision,
) -> Result<(Vec<u8>, u64), StorageError> {
    let found = match current {
        Some(bytes) => stored_revision(&serde_json::from_slice::<Value>(bytes)?),
        None => 0,
    };
    if let Revision::Expect(expected) = revision {
        check_revision(account_id, found, Some(expected))?;
    }
    if record.account_id != account_id {
        return Err(StorageError::InvalidUpdate {
            account_id: account_id.to_string(),
            reason: format!("record belongs to '{}'", record.account_id),
        });
    }
    let mut stored = record.clone();
    stored.revision = found + 1;
    Ok((serde_json::to_vec(&stored)?, stored.revision))
}

/// Compute the bytes that replace `current` for a field merge.
pub(crate) fn encode_update(
    account_id: &str,
    current: Option<&[u8]>,
    update: &FieldUpdate,
) -> Result<(Vec<u8>, u64), StorageError> {
    let Some(bytes) = current else {
        return Err(StorageError::NotFound(format!("player: {}", account_id)));
    };
    if let Some(field) = update.field_names().find(|f| PROTECTED_FIELDS.contains(f)) {
        return Err(StorageError::InvalidUpdate {
            account_id: account_id.to_string(),
            reason: format!("field '{}' cannot be updated", field),
        });
    }
    let mut doc: Value = serde_json::from_slice(bytes)?;
    let found = stored_revision(&doc);
    check_revision(account_id, found, update.expected_revision)?;

    let Value::Object(map) = &mut doc else {
        return Err(StorageError::InvalidUpdate {
            account_id: account_id.to_string(),
            reason: "stored document is not an object".to_string(),
        });
    };
    for (key, value) in &update.fields {
        map.insert(key.clone(), value.clone());
    }
    let next = found + 1;
    map.insert("revision".to_string(), Value::from(next));

    // reject merges that no longer describe a valid record
    serde_json::from_value::<PlayerRecord>(doc.clone()).map_err(|e| StorageError::InvalidUpdate {
        account_id: account_id.to_string(),
        reason: e.to_string(),
    })?;
    Ok((serde_json::to_vec(&doc)?, next))
}

pub(crate) fn decode_record(bytes: &[u8]) -> Result<PlayerRecord, StorageError> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Open the configured backend under `config.data_dir`.
pub fn open_store(config: &StorageConfig) -> Result<Arc<dyn PlayerStore>, StorageError> {
    let root = Path::new(&config.data_dir);
    let store: Arc<dyn PlayerStore> = match config.backend {
        StorageBackend::Sled => Arc::new(SledPlayerStore::open(root.join("players"))?),
        StorageBackend::Json => Arc::new(JsonFilePlayerStore::open(root.join("game_saves"))?),
    };
    Ok(store)
}

/// Async front for a [`PlayerStore`]; every call runs on the blocking pool.
#[derive(Clone)]
pub struct StorageGateway {
    inner: Arc<dyn PlayerStore>,
}

impl StorageGateway {
    pub fn new(inner: Arc<dyn PlayerStore>) -> Self {
        Self { inner }
    }

    pub fn open(config: &StorageConfig) -> Result<Self, StorageError> {
        Ok(Self::new(open_store(config)?))
    }

    /// Direct access for synchronous callers such as CLI subcommands.
    pub fn store(&self) -> &dyn PlayerStore {
        self.inner.as_ref()
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn PlayerStore) -> Result<T, StorageError> + Send + 'static,
    {
        let store = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || f(store.as_ref()))
            .await
            .map_err(|e| StorageError::Internal(format!("storage task failed: {}", e)))?
    }

    pub async fn load(&self, account_id: &str) -> Result<Option<PlayerRecord>, StorageError> {
        let id = account_id.to_string();
        self.blocking(move |s| s.load_record(&id)).await
    }

    /// Save `record` and return it carrying the new revision.
    pub async fn save(
        &self,
        mut record: PlayerRecord,
        revision: Revision,
    ) -> Result<PlayerRecord, StorageError> {
        let to_write = record.clone();
        let next = self
            .blocking(move |s| s.save_record(&to_write.account_id, &to_write, revision))
            .await?;
        record.revision = next;
        Ok(record)
    }

    pub async fn query(
        &self,
        filter: RecordFilter,
        projection: Projection,
        limit: usize,
    ) -> Result<Vec<PlayerRecord>, StorageError> {
        self.blocking(move |s| s.query_records(&filter, projection, limit))
            .await
    }

    pub async fn update_fields(
        &self,
        account_id: &str,
        update: FieldUpdate,
    ) -> Result<u64, StorageError> {
        let id = account_id.to_string();
        self.blocking(move |s| s.update_fields(&id, &update)).await
    }

    pub async fn update_many(
        &self,
        updates: Vec<(String, FieldUpdate)>,
    ) -> Result<Vec<(String, Result<u64, StorageError>)>, StorageError> {
        self.blocking(move |s| Ok(s.update_many(&updates))).await
    }

    pub async fn list_account_ids(&self) -> Result<Vec<String>, StorageError> {
        self.blocking(|s| s.list_account_ids()).await
    }
}
