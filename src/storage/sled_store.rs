use std::path::Path;

use log::warn;

use super::{
    decode_record, encode_save, encode_update, FieldUpdate, PlayerStore, Projection, RecordFilter,
    Revision, StorageError,
};
use crate::farm::PlayerRecord;
use crate::logutil::escape_log;

const TREE_PLAYERS: &str = "players";
const KEY_PREFIX: &str = "players:";

/// Sled-backed player record store. Each record is one JSON document under
/// `players:<account_id>`; writes go through compare-and-swap so a document
/// is never replaced from a stale read.
pub struct SledPlayerStore {
    db: sled::Db,
    players: sled::Tree,
}

impl SledPlayerStore {
    /// Open (or create) the store rooted at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path_ref = path.as_ref();
        std::fs::create_dir_all(path_ref)?;
        Self::from_db(sled::open(path_ref)?)
    }

    /// In-memory store that disappears on drop (tests and dry runs).
    pub fn temporary() -> Result<Self, StorageError> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: sled::Db) -> Result<Self, StorageError> {
        let players = db.open_tree(TREE_PLAYERS)?;
        Ok(Self { db, players })
    }

    fn key(account_id: &str) -> Vec<u8> {
        format!("{}{}", KEY_PREFIX, account_id).into_bytes()
    }

    /// Read-modify-write one document without flushing.
    fn swap<F>(&self, account_id: &str, mut encode: F) -> Result<u64, StorageError>
    where
        F: FnMut(Option<&[u8]>) -> Result<(Vec<u8>, u64), StorageError>,
    {
        let key = Self::key(account_id);
        loop {
            let current = self.players.get(&key)?;
            let (next, revision) = encode(current.as_deref())?;
            match self.players.compare_and_swap(&key, current, Some(next))? {
                Ok(()) => return Ok(revision),
                // lost a race with another writer; re-read and re-check
                Err(_) => continue,
            }
        }
    }
}

impl PlayerStore for SledPlayerStore {
    fn load_record(&self, account_id: &str) -> Result<Option<PlayerRecord>, StorageError> {
        match self.players.get(Self::key(account_id))? {
            Some(bytes) => Ok(Some(decode_record(&bytes)?)),
            None => Ok(None),
        }
    }

    fn save_record(
        &self,
        account_id: &str,
        record: &PlayerRecord,
        revision: Revision,
    ) -> Result<u64, StorageError> {
        let next = self.swap(account_id, |current| {
            encode_save(account_id, current, record, revision)
        })?;
        self.players.flush()?;
        Ok(next)
    }

    fn query_records(
        &self,
        filter: &RecordFilter,
        projection: Projection,
        limit: usize,
    ) -> Result<Vec<PlayerRecord>, StorageError> {
        let mut out = Vec::new();
        for entry in self.players.scan_prefix(KEY_PREFIX.as_bytes()) {
            if out.len() >= limit {
                break;
            }
            let (key, bytes) = entry?;
            let record = match decode_record(&bytes) {
                Ok(record) => record,
                Err(e) => {
                    warn!(
                        target: "sproutfarm::storage",
                        "skipping undecodable record {}: {}",
                        escape_log(&String::from_utf8_lossy(&key)),
                        e
                    );
                    continue;
                }
            };
            if filter.matches(&record) {
                out.push(projection.apply(record));
            }
        }
        Ok(out)
    }

    fn update_fields(&self, account_id: &str, update: &FieldUpdate) -> Result<u64, StorageError> {
        let next = self.swap(account_id, |current| encode_update(account_id, current, update))?;
        self.players.flush()?;
        Ok(next)
    }

    fn update_many(
        &self,
        updates: &[(String, FieldUpdate)],
    ) -> Vec<(String, Result<u64, StorageError>)> {
        let mut results: Vec<(String, Result<u64, StorageError>)> = updates
            .iter()
            .map(|(id, update)| {
                let result = self.swap(id, |current| encode_update(id, current, update));
                (id.clone(), result)
            })
            .collect();
        if let Err(e) = self.db.flush() {
            let reason = e.to_string();
            for (_, result) in results.iter_mut() {
                if result.is_ok() {
                    *result = Err(StorageError::Internal(format!("flush failed: {}", reason)));
                }
            }
        }
        results
    }

    fn list_account_ids(&self) -> Result<Vec<String>, StorageError> {
        let mut ids = Vec::new();
        for entry in self.players.scan_prefix(KEY_PREFIX.as_bytes()) {
            let (key, _) = entry?;
            let text = String::from_utf8_lossy(&key);
            if let Some(id) = text.strip_prefix(KEY_PREFIX) {
                ids.push(id.to_string());
            }
        }
        Ok(ids)
    }
}
