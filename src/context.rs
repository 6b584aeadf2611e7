use std::sync::Arc;

use crate::config::Config;
use crate::engine::AccountLocks;
use crate::server::{Notifier, SessionRegistry};
use crate::storage::StorageGateway;

/// Handles shared by connection tasks, the router and the engine actors.
#[derive(Clone)]
pub struct ServerContext {
    pub config: Arc<Config>,
    pub storage: StorageGateway,
    pub registry: Arc<SessionRegistry>,
    pub locks: Arc<AccountLocks>,
    pub notifier: Notifier,
}

impl ServerContext {
    pub fn new(config: Config, storage: StorageGateway) -> Self {
        let registry = Arc::new(SessionRegistry::new());
        Self {
            config: Arc::new(config),
            storage,
            notifier: Notifier::new(Arc::clone(&registry)),
            registry,
            locks: Arc::new(AccountLocks::new()),
        }
    }
}
