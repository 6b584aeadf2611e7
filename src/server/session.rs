//! Live connection state and the registry that indexes it.
//!
//! The registry is shared by connection tasks, the router and the two engine
//! actors. All access goes through short critical sections on one
//! `std::sync::RwLock`; nothing awaits while holding it.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use log::{debug, info};
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::logutil::escape_log;

pub type SessionId = Uuid;

/// Lines queued for a connection's writer half.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// One serialized JSON message, without the trailing newline.
    Line(String),
    /// Flush what is queued, then close the socket.
    Close { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    Anonymous,
    Authenticated { account_id: String },
}

#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub peer: SocketAddr,
    pub auth: AuthState,
    /// Account whose farm this session is viewing read-only.
    pub spectating: Option<String>,
    pub connected_at: DateTime<Utc>,
    pub authenticated_at: Option<DateTime<Utc>>,
    pub last_activity: DateTime<Utc>,
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl Session {
    pub fn account_id(&self) -> Option<&str> {
        match &self.auth {
            AuthState::Authenticated { account_id } => Some(account_id),
            AuthState::Anonymous => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.account_id().is_some()
    }

    pub fn is_spectating(&self) -> bool {
        self.spectating.is_some()
    }

    /// Seconds since login, for play-time accounting.
    pub fn play_secs(&self, now: DateTime<Utc>) -> u64 {
        self.authenticated_at
            .map(|at| now.signed_duration_since(at).num_seconds().max(0) as u64)
            .unwrap_or(0)
    }

    /// Queue a message; returns false if the connection is already gone.
    pub fn send_line(&self, line: String) -> bool {
        self.outbound.send(Outbound::Line(line)).is_ok()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("unknown session {0}")]
    UnknownSession(SessionId),
    #[error("session is not logged in")]
    NotAuthenticated,
}

/// A prior session displaced by a second login for the same account.
#[derive(Debug, Clone)]
pub struct Eviction {
    pub session_id: SessionId,
    pub account_id: String,
    pub play_secs: u64,
}

/// Who receives a farm update for one account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observer {
    pub session_id: SessionId,
    pub is_visiting: bool,
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<SessionId, Session>,
    by_account: HashMap<String, SessionId>,
}

#[derive(Default)]
pub struct SessionRegistry {
    inner: RwLock<Inner>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn register(&self, peer: SocketAddr, outbound: mpsc::UnboundedSender<Outbound>) -> SessionId {
        let now = Utc::now();
        let id = Uuid::new_v4();
        let session = Session {
            id,
            peer,
            auth: AuthState::Anonymous,
            spectating: None,
            connected_at: now,
            authenticated_at: None,
            last_activity: now,
            outbound,
        };
        self.write().sessions.insert(id, session);
        debug!(target: "sproutfarm::session", "registered session {} from {}", id, peer);
        id
    }

    /// Bind `account_id` to the session. A different session already bound to the
    /// account is downgraded to anonymous, told why, and asked to close.
    pub fn authenticate(
        &self,
        session_id: SessionId,
        account_id: &str,
    ) -> Result<Option<Eviction>, RegistryError> {
        let now = Utc::now();
        let mut inner = self.write();
        if !inner.sessions.contains_key(&session_id) {
            return Err(RegistryError::UnknownSession(session_id));
        }

        // re-login on the same session under a different account
        let previous = inner
            .sessions
            .get(&session_id)
            .and_then(|s| s.account_id().map(str::to_string));
        if let Some(previous) = previous {
            if previous != account_id && inner.by_account.get(&previous) == Some(&session_id) {
                inner.by_account.remove(&previous);
            }
        }

        let mut eviction = None;
        if let Some(old_id) = inner.by_account.get(account_id).copied() {
            if old_id != session_id {
                if let Some(old) = inner.sessions.get_mut(&old_id) {
                    eviction = Some(Eviction {
                        session_id: old_id,
                        account_id: account_id.to_string(),
                        play_secs: old.play_secs(now),
                    });
                    old.auth = AuthState::Anonymous;
                    old.spectating = None;
                    old.authenticated_at = None;
                    let notice = serde_json::json!({
                        "type": "error",
                        "message": "logged in elsewhere",
                    });
                    let _ = old.outbound.send(Outbound::Line(notice.to_string()));
                    let _ = old.outbound.send(Outbound::Close {
                        reason: "logged in elsewhere".to_string(),
                    });
                }
            }
        }

        if let Some(session) = inner.sessions.get_mut(&session_id) {
            let already = session.account_id() == Some(account_id);
            session.auth = AuthState::Authenticated {
                account_id: account_id.to_string(),
            };
            session.spectating = None;
            if !already {
                session.authenticated_at = Some(now);
            }
        }
        inner.by_account.insert(account_id.to_string(), session_id);
        if let Some(ev) = &eviction {
            info!(
                target: "sproutfarm::session",
                "account {} logged in again; evicting session {}",
                escape_log(account_id),
                ev.session_id
            );
        }
        Ok(eviction)
    }

    /// Drop authentication, returning the account and its play time.
    pub fn deauthenticate(&self, session_id: SessionId) -> Result<(String, u64), RegistryError> {
        let now = Utc::now();
        let mut inner = self.write();
        let session = inner
            .sessions
            .get_mut(&session_id)
            .ok_or(RegistryError::UnknownSession(session_id))?;
        let Some(account_id) = session.account_id().map(str::to_string) else {
            return Err(RegistryError::NotAuthenticated);
        };
        let played = session.play_secs(now);
        session.auth = AuthState::Anonymous;
        session.authenticated_at = None;
        session.spectating = None;
        if inner.by_account.get(&account_id) == Some(&session_id) {
            inner.by_account.remove(&account_id);
        }
        Ok((account_id, played))
    }

    pub fn set_spectating(
        &self,
        session_id: SessionId,
        target: Option<String>,
    ) -> Result<(), RegistryError> {
        let mut inner = self.write();
        let session = inner
            .sessions
            .get_mut(&session_id)
            .ok_or(RegistryError::UnknownSession(session_id))?;
        if !session.is_authenticated() {
            return Err(RegistryError::NotAuthenticated);
        }
        session.spectating = target;
        Ok(())
    }

    pub fn lookup_by_account(&self, account_id: &str) -> Option<SessionId> {
        self.read().by_account.get(account_id).copied()
    }

    pub fn get(&self, session_id: SessionId) -> Option<Session> {
        self.read().sessions.get(&session_id).cloned()
    }

    pub fn touch(&self, session_id: SessionId) {
        if let Some(session) = self.write().sessions.get_mut(&session_id) {
            session.last_activity = Utc::now();
        }
    }

    pub fn remove(&self, session_id: SessionId) -> Option<Session> {
        let mut inner = self.write();
        let session = inner.sessions.remove(&session_id)?;
        if let Some(account_id) = session.account_id() {
            if inner.by_account.get(account_id) == Some(&session_id) {
                inner.by_account.remove(account_id);
            }
        }
        debug!(target: "sproutfarm::session", "removed session {}", session_id);
        Some(session)
    }

    pub fn for_each_authenticated<F: FnMut(&Session)>(&self, mut f: F) {
        let inner = self.read();
        for session in inner.sessions.values().filter(|s| s.is_authenticated()) {
            f(session);
        }
    }

    /// Accounts with a live authenticated session.
    pub fn online_accounts(&self) -> HashSet<String> {
        self.read().by_account.keys().cloned().collect()
    }

    pub fn is_online(&self, account_id: &str) -> bool {
        self.read().by_account.contains_key(account_id)
    }

    /// Sessions that should see updates to `account_id`'s farm: the owner unless it is
    /// off viewing another farm, plus every session spectating the account.
    pub fn observers_of(&self, account_id: &str) -> Vec<Observer> {
        let inner = self.read();
        let mut out = Vec::new();
        if let Some(owner) = inner
            .by_account
            .get(account_id)
            .and_then(|id| inner.sessions.get(id))
        {
            if !owner.is_spectating() {
                out.push(Observer {
                    session_id: owner.id,
                    is_visiting: false,
                });
            }
        }
        for session in inner.sessions.values() {
            if session.spectating.as_deref() == Some(account_id) {
                out.push(Observer {
                    session_id: session.id,
                    is_visiting: true,
                });
            }
        }
        out
    }

    /// Queue a line for one session; false if it is unknown or disconnected.
    pub fn send_to(&self, session_id: SessionId, line: String) -> bool {
        self.read()
            .sessions
            .get(&session_id)
            .map(|s| s.send_line(line))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.read().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
