//! Per-account mutual exclusion for load → mutate → save sequences.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Held for the duration of one read-modify-write on an account.
pub type AccountGuard = OwnedMutexGuard<()>;

/// Lazily created async mutex per account id. Guards are owned so they can be held
/// across `.await` and moved into blocking storage tasks.
#[derive(Default)]
pub struct AccountLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl AccountLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self, account_id: &str) -> Arc<AsyncMutex<()>> {
        let mut map = self.locks.lock().unwrap_or_else(|p| p.into_inner());
        Arc::clone(
            map.entry(account_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
        )
    }

    pub async fn lock(&self, account_id: &str) -> AccountGuard {
        self.handle(account_id).lock_owned().await
    }

    /// Take the lock only if nobody holds it.
    pub fn try_lock(&self, account_id: &str) -> Option<AccountGuard> {
        self.handle(account_id).try_lock_owned().ok()
    }

    /// Forget locks nobody holds or waits on. Returns how many were dropped.
    pub fn prune(&self) -> usize {
        let mut map = self.locks.lock().unwrap_or_else(|p| p.into_inner());
        let before = map.len();
        map.retain(|_, lock| Arc::strong_count(lock) > 1);
        before - map.len()
    }

    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
