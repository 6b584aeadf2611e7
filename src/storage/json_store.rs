use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use log::warn;
use percent_encoding::percent_decode_str;

use super::{
    decode_record, encode_save, encode_update, FieldUpdate, PlayerStore, Projection, RecordFilter,
    Revision, StorageError,
};
use crate::farm::PlayerRecord;
use crate::logutil::escape_log;
use crate::validation::safe_filename;

/// One pretty-printed JSON document per account under `game_saves/`.
///
/// Writers take an exclusive `fs2` lock on a hidden sidecar file, then replace
/// the document through a temp file and rename.
pub struct JsonFilePlayerStore {
    dir: PathBuf,
}

impl JsonFilePlayerStore {
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, StorageError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn record_path(&self, account_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", safe_filename(account_id)))
    }

    fn lock_path(&self, account_id: &str) -> PathBuf {
        self.dir.join(format!(".{}.lock", safe_filename(account_id)))
    }

    fn read_bytes(path: &Path) -> Result<Option<Vec<u8>>, StorageError> {
        match fs::read(path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Replace `path` with `content` via a temp file in the same directory.
    fn write_atomic(path: &Path, content: &[u8]) -> Result<(), StorageError> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let base = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("record.json");
        let mut counter = 0u32;
        let tmp_path = loop {
            let candidate = dir.join(format!(".{}.tmp-{}-{}", base, std::process::id(), counter));
            match OpenOptions::new().write(true).create_new(true).open(&candidate) {
                Ok(mut tmp) => {
                    tmp.write_all(content)?;
                    tmp.flush()?;
                    tmp.sync_all()?;
                    break candidate;
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    counter = counter.saturating_add(1);
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        };
        fs::rename(&tmp_path, path)?;
        // best effort: persist the rename
        if let Ok(dir_file) = File::open(dir) {
            let _ = dir_file.sync_all();
        }
        Ok(())
    }

    /// Read-modify-write one document while holding its lock.
    fn locked_rewrite<F>(&self, account_id: &str, encode: F) -> Result<u64, StorageError>
    where
        F: FnOnce(Option<&[u8]>) -> Result<(Vec<u8>, u64), StorageError>,
    {
        let lock_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(self.lock_path(account_id))?;
        lock_file.lock_exclusive()?;

        let path = self.record_path(account_id);
        let current = Self::read_bytes(&path)?;
        let (next, revision) = encode(current.as_deref())?;
        // store pretty for operators who edit saves by hand
        let pretty = serde_json::to_vec_pretty(&serde_json::from_slice::<serde_json::Value>(&next)?)?;
        Self::write_atomic(&path, &pretty)?;

        // dropping the handle releases the lock
        drop(lock_file);
        Ok(revision)
    }

    fn account_files(&self) -> Result<Vec<(String, PathBuf)>, StorageError> {
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|s| s.to_str()) else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            let Some(stem) = name.strip_suffix(".json") else {
                continue;
            };
            let id = percent_decode_str(stem).decode_utf8_lossy().into_owned();
            out.push((id, path));
        }
        out.sort();
        Ok(out)
    }
}

impl PlayerStore for JsonFilePlayerStore {
    fn load_record(&self, account_id: &str) -> Result<Option<PlayerRecord>, StorageError> {
        match Self::read_bytes(&self.record_path(account_id))? {
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
        self.locked_rewrite(account_id, |current| {
            encode_save(account_id, current, record, revision)
        })
    }

    fn query_records(
        &self,
        filter: &RecordFilter,
        projection: Projection,
        limit: usize,
    ) -> Result<Vec<PlayerRecord>, StorageError> {
        let mut out = Vec::new();
        for (id, path) in self.account_files()? {
            if out.len() >= limit {
                break;
            }
            let Some(bytes) = Self::read_bytes(&path)? else {
                continue;
            };
            match decode_record(&bytes) {
                Ok(record) if filter.matches(&record) => out.push(projection.apply(record)),
                Ok(_) => {}
                Err(e) => warn!(
                    target: "sproutfarm::storage",
                    "skipping undecodable save for {}: {}",
                    escape_log(&id),
                    e
                ),
            }
        }
        Ok(out)
    }

    fn update_fields(&self, account_id: &str, update: &FieldUpdate) -> Result<u64, StorageError> {
        self.locked_rewrite(account_id, |current| {
            encode_update(account_id, current, update)
        })
    }

    fn update_many(
        &self,
        updates: &[(String, FieldUpdate)],
    ) -> Vec<(String, Result<u64, StorageError>)> {
        updates
            .iter()
            .map(|(id, update)| (id.clone(), self.update_fields(id, update)))
            .collect()
    }

    fn list_account_ids(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.account_files()?.into_iter().map(|(id, _)| id).collect())
    }
}
