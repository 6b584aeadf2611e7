//! Request routing.
//!
//! [`Dispatcher::route`] takes one decoded frame from a connection and returns the
//! replies for that connection. Each handler runs in its own task so a panic is
//! reported to the client as an `error` instead of taking the connection down.
//! Farm updates for other audiences (spectators) go out through the
//! [`Notifier`](super::Notifier).

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use thiserror::Error;

use super::framer::Frame;
use super::protocol::{LoginRequest, LotRequest, Request, ServerMessage, VisitRequest, WisdomTreeRequest};
use super::session::{RegistryError, Session, SessionId};
use crate::auth;
use crate::context::ServerContext;
use crate::farm::{catch_up, tend_wisdom_tree, PlayerRecord, TreeChore};
use crate::logutil::escape_log;
use crate::metrics;
use crate::storage::{FieldUpdate, Revision, StorageError};
use crate::validation::validate_account_id;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("invalid {request} payload: {reason}")]
    BadPayload { request: String, reason: String },
    #[error("login required")]
    NotAuthenticated,
    #[error("unknown message type '{0}'")]
    UnknownType(String),
    #[error("{0}")]
    Rejected(String),
    #[error("storage unavailable, try again")]
    Storage(#[from] StorageError),
}

impl From<RegistryError> for DispatchError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::NotAuthenticated => DispatchError::NotAuthenticated,
            RegistryError::UnknownSession(_) => DispatchError::Rejected("session closed".into()),
        }
    }
}

type Replies = Vec<ServerMessage>;

/// Structural land actions a logged-in player can take on their own farm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LandAction {
    Dig,
    Plant,
    Fertilize,
    Harvest,
}

impl LandAction {
    fn from_kind(kind: &str) -> Option<Self> {
        match kind {
            "dig_ground" => Some(LandAction::Dig),
            "plant_crop" => Some(LandAction::Plant),
            "fertilize_crop" => Some(LandAction::Fertilize),
            "harvest_crop" => Some(LandAction::Harvest),
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    ctx: ServerContext,
}

impl Dispatcher {
    pub fn new(ctx: ServerContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &ServerContext {
        &self.ctx
    }

    /// Route one frame from `session_id` and return the replies for it.
    pub async fn route(&self, session_id: SessionId, frame: Frame) -> Replies {
        self.ctx.registry.touch(session_id);
        let value = match frame {
            Frame::Text(text) => {
                debug!(target: "sproutfarm::network", "raw text from {}: {}", session_id, escape_log(&text));
                return vec![ServerMessage::TextResponse {
                    content: format!("received: {}", text),
                }];
            }
            Frame::Json(value) => value,
        };
        let request = match Request::from_value(value) {
            Ok(request) => request,
            Err(reason) => {
                metrics::inc_protocol_errors();
                return vec![ServerMessage::error(reason)];
            }
        };

        let kind = request.kind.clone();
        let this = self.clone();
        let handled = tokio::spawn(async move { this.handle(session_id, request).await }).await;
        match handled {
            Ok(Ok(replies)) => replies,
            Ok(Err(e)) => {
                if let DispatchError::Storage(inner) = &e {
                    metrics::inc_storage_failures();
                    warn!(target: "sproutfarm::session", "{} for {} hit storage error: {}", kind, session_id, inner);
                }
                vec![ServerMessage::error_for(&kind, e.to_string())]
            }
            Err(join) => {
                if join.is_panic() {
                    metrics::inc_handler_panics();
                    error!(target: "sproutfarm::session", "handler for '{}' panicked (session {})", escape_log(&kind), session_id);
                }
                vec![ServerMessage::error_for(&kind, "internal error")]
            }
        }
    }

    async fn handle(&self, session_id: SessionId, request: Request) -> Result<Replies, DispatchError> {
        match request.kind.as_str() {
            "ping" => Ok(vec![ServerMessage::Pong { timestamp: Utc::now() }]),
            "pong" => Ok(Vec::new()),
            "login" => self.handle_login(session_id, &request).await,
            "logout" => self.handle_logout(session_id).await,
            "visit_player" => self.handle_visit(session_id, &request).await,
            "return_my_farm" => self.handle_return_home(session_id).await,
            "wisdom_tree_operation" => self.handle_wisdom_tree(session_id, &request).await,
            #[cfg(test)]
            "test_panic" => panic!("handler panic requested by test"),
            kind => match LandAction::from_kind(kind) {
                Some(action) => self.handle_land_action(session_id, action, &request).await,
                None => {
                    metrics::inc_protocol_errors();
                    Err(DispatchError::UnknownType(kind.to_string()))
                }
            },
        }
    }

    /// Guard for handlers that need a logged-in session.
    fn require_authenticated(&self, session_id: SessionId) -> Result<(Session, String), DispatchError> {
        let session = self
            .ctx
            .registry
            .get(session_id)
            .ok_or(DispatchError::Rejected("session closed".into()))?;
        let account_id = session
            .account_id()
            .map(str::to_string)
            .ok_or(DispatchError::NotAuthenticated)?;
        Ok((session, account_id))
    }

    fn parse<T: for<'de> serde::Deserialize<'de>>(request: &Request) -> Result<T, DispatchError> {
        request.parse().map_err(|e| DispatchError::BadPayload {
            request: request.kind.clone(),
            reason: e.to_string(),
        })
    }

    async fn handle_login(&self, session_id: SessionId, request: &Request) -> Result<Replies, DispatchError> {
        let login: LoginRequest = Self::parse(request)?;
        let fail = |message: &str| {
            Ok(vec![ServerMessage::LoginResponse {
                success: false,
                message: message.to_string(),
                player: None,
                is_new_player: None,
            }])
        };
        if let Err(e) = validate_account_id(&login.account_id) {
            return fail(&e.to_string());
        }
        if login.password.is_empty() {
            return fail("password required");
        }
        if self
            .ctx
            .config
            .special_farms
            .iter()
            .any(|f| f.account_id == login.account_id)
        {
            return fail("this farm is maintained by the server");
        }

        let account_id = login.account_id.clone();
        let now = Utc::now();
        let _guard = self.ctx.locks.lock(&account_id).await;

        let (mut record, created) = match self.ctx.storage.load(&account_id).await? {
            Some(record) => {
                let Some(stored) = record.password_hash.clone() else {
                    return fail("account has no password set");
                };
                let password = login.password.clone();
                let ok = tokio::task::spawn_blocking(move || auth::verify_password(&stored, &password))
                    .await
                    .unwrap_or(false);
                if !ok {
                    info!(target: "sproutfarm::session", "failed login for {}", escape_log(&account_id));
                    return fail("invalid account or password");
                }
                (record, false)
            }
            None => {
                let password = login.password.clone();
                let hash = tokio::task::spawn_blocking(move || auth::hash_password(&password))
                    .await
                    .map_err(|e| DispatchError::Rejected(format!("login failed: {}", e)))?
                    .map_err(|e| DispatchError::Rejected(format!("login failed: {}", e)))?;
                let mut record = PlayerRecord::from_template(&account_id, &self.ctx.config.new_player, now);
                record.password_hash = Some(hash);
                (record, true)
            }
        };

        record.last_login = Some(now);
        let record = if created {
            self.ctx.storage.save(record, Revision::Expect(0)).await?
        } else {
            let update = FieldUpdate::new()
                .set("last_login", &now)?
                .expect_revision(record.revision);
            record.revision = self.ctx.storage.update_fields(&account_id, update).await?;
            record
        };

        if let Some(eviction) = self.ctx.registry.authenticate(session_id, &account_id)? {
            // the displaced session will not get a normal logout
            self.add_play_time_locked(&account_id, eviction.play_secs).await;
        }
        info!(
            target: "sproutfarm::session",
            "{} logged in{} (session {})",
            escape_log(&account_id),
            if created { " as a new player" } else { "" },
            session_id
        );
        Ok(vec![
            ServerMessage::LoginResponse {
                success: true,
                message: "login successful".into(),
                player: Some(record.public_view()),
                is_new_player: Some(created),
            },
            crop_snapshot(&record, None, now),
        ])
    }

    async fn handle_logout(&self, session_id: SessionId) -> Result<Replies, DispatchError> {
        self.require_authenticated(session_id)?;
        let (account_id, played) = self.ctx.registry.deauthenticate(session_id)?;
        self.add_play_time(&account_id, played).await;
        info!(target: "sproutfarm::session", "{} logged out", escape_log(&account_id));
        Ok(vec![ServerMessage::LogoutResponse {
            success: true,
            message: "logged out".into(),
        }])
    }

    async fn handle_visit(&self, session_id: SessionId, request: &Request) -> Result<Replies, DispatchError> {
        let (_, account_id) = self.require_authenticated(session_id)?;
        let visit: VisitRequest = Self::parse(request)?;
        let reject = |message: &str| {
            Ok(vec![ServerMessage::VisitPlayerResponse {
                success: false,
                message: message.to_string(),
                target: None,
            }])
        };
        if visit.target_username == account_id {
            return reject("that is your own farm");
        }
        let Some(target) = self.ctx.storage.load(&visit.target_username).await? else {
            return reject("player not found");
        };
        self.ctx
            .registry
            .set_spectating(session_id, Some(target.account_id.clone()))?;
        Ok(vec![
            ServerMessage::VisitPlayerResponse {
                success: true,
                message: format!("visiting {}", target.farm_name),
                target: Some(target.public_view()),
            },
            crop_snapshot(&target, Some(&target.account_id), Utc::now()),
        ])
    }

    async fn handle_return_home(&self, session_id: SessionId) -> Result<Replies, DispatchError> {
        let (_, account_id) = self.require_authenticated(session_id)?;
        self.ctx.registry.set_spectating(session_id, None)?;
        let record = self
            .ctx
            .storage
            .load(&account_id)
            .await?
            .ok_or_else(|| DispatchError::Rejected("your farm could not be loaded".into()))?;
        Ok(vec![
            ServerMessage::ReturnMyFarmResponse {
                success: true,
                message: "welcome home".into(),
                player: Some(record.public_view()),
            },
            crop_snapshot(&record, None, Utc::now()),
        ])
    }

    async fn handle_land_action(
        &self,
        session_id: SessionId,
        action: LandAction,
        request: &Request,
    ) -> Result<Replies, DispatchError> {
        let (session, account_id) = self.require_authenticated(session_id)?;
        if session.is_spectating() {
            return Err(DispatchError::Rejected(
                "return to your own farm before changing it".into(),
            ));
        }
        let lot: LotRequest = Self::parse(request)?;
        let now = Utc::now();

        let _guard = self.ctx.locks.lock(&account_id).await;
        let mut record = self
            .ctx
            .storage
            .load(&account_id)
            .await?
            .ok_or_else(|| DispatchError::Rejected("your farm could not be loaded".into()))?;

        let respond = |success: bool, message: String| {
            vec![ServerMessage::ActionResponse {
                action: request.kind.clone(),
                success,
                message,
                lot_index: lot.lot_index,
            }]
        };
        // pay the ticks owed so far before the land changes shape
        let was_growing = record.has_growing_plot();
        catch_up(&mut record, &self.ctx.config.growth, &self.ctx.config.tick, now);
        let message = match self.apply_land_action(&mut record, action, &lot, now) {
            Ok(message) => message,
            Err(reason) => return Ok(respond(false, reason)),
        };
        if !was_growing {
            // nothing was accruing, so the first tick of new growth is a full interval away
            record.updated_at = now;
        }
        let expected = record.revision;
        let record = match self.ctx.storage.save(record, Revision::Expect(expected)).await {
            Ok(record) => record,
            Err(e) if e.is_conflict() => {
                return Ok(respond(false, "farm changed meanwhile, try again".into()));
            }
            Err(e) => return Err(e.into()),
        };
        // owner gets the reply below plus a crop_update; spectators get the crop_update
        self.ctx.notifier.farm_changed(&account_id, &record.land, now);
        Ok(respond(true, message))
    }

    async fn handle_wisdom_tree(&self, session_id: SessionId, request: &Request) -> Result<Replies, DispatchError> {
        let (_, account_id) = self.require_authenticated(session_id)?;
        let body: WisdomTreeRequest = Self::parse(request)?;
        let respond = |success: bool, message: String, record: Option<&PlayerRecord>| {
            vec![ServerMessage::WisdomTreeOperationResponse {
                operation_type: body.operation_type.clone(),
                success,
                message,
                wisdom_tree: record.and_then(|r| r.wisdom_tree.clone()),
            }]
        };
        let Some(chore) = TreeChore::from_operation(&body.operation_type) else {
            return Ok(respond(false, format!("unknown operation '{}'", body.operation_type), None));
        };

        let _guard = self.ctx.locks.lock(&account_id).await;
        let mut record = self
            .ctx
            .storage
            .load(&account_id)
            .await?
            .ok_or_else(|| DispatchError::Rejected("your farm could not be loaded".into()))?;
        let Some(tree) = record.wisdom_tree.as_mut() else {
            return Ok(respond(false, "this farm has no wisdom tree".into(), None));
        };
        let healed = match tend_wisdom_tree(tree, chore, &self.ctx.config.wisdom_tree, Utc::now()) {
            Ok(healed) => healed,
            Err(reason) => return Ok(respond(false, reason, Some(&record))),
        };
        let update = FieldUpdate::new()
            .set("wisdom_tree", &record.wisdom_tree)?
            .expect_revision(record.revision);
        match self.ctx.storage.update_fields(&account_id, update).await {
            Ok(revision) => record.revision = revision,
            Err(e) if e.is_conflict() => {
                return Ok(respond(false, "farm changed meanwhile, try again".into(), None));
            }
            Err(e) => return Err(e.into()),
        }
        Ok(respond(true, format!("health +{}", healed), Some(&record)))
    }

    fn apply_land_action(
        &self,
        record: &mut PlayerRecord,
        action: LandAction,
        lot: &LotRequest,
        now: DateTime<Utc>,
    ) -> Result<String, String> {
        let plot_count = record.land.len();
        let Some(plot) = record.land.get_mut(lot.lot_index) else {
            return Err(format!("plot {} does not exist ({} plots)", lot.lot_index, plot_count));
        };
        match action {
            LandAction::Dig => {
                if plot.dug {
                    return Err("plot is already dug".into());
                }
                plot.dug = true;
                Ok("plot dug".into())
            }
            LandAction::Plant => {
                let crop = lot
                    .crop_type
                    .as_deref()
                    .filter(|c| !c.is_empty())
                    .ok_or("crop_type is required")?;
                if !plot.dug {
                    return Err("dig the plot first".into());
                }
                if plot.planted {
                    return Err("plot is already planted".into());
                }
                let spec = self
                    .ctx
                    .config
                    .crops
                    .get(crop)
                    .ok_or_else(|| format!("unknown crop '{}'", crop))?;
                let seeds = record.seeds.get(crop).copied().unwrap_or(0);
                if seeds == 0 {
                    return Err(format!("no {} seeds left", crop));
                }
                plot.plant(crop, spec.grow_time);
                if seeds == 1 {
                    record.seeds.remove(crop);
                } else {
                    record.seeds.insert(crop.to_string(), seeds - 1);
                }
                Ok(format!("planted {}", crop))
            }
            LandAction::Fertilize => {
                if !plot.is_growing() {
                    return Err("nothing growing on this plot".into());
                }
                if plot.fertilized {
                    return Err("plot is already fertilized".into());
                }
                let growth = &self.ctx.config.growth;
                plot.fertilized = true;
                plot.fertilize_started_at = Some(now);
                plot.fertilize_duration = growth.fertilizer_duration_secs;
                plot.fertilize_bonus = growth.fertilizer_bonus;
                Ok("fertilized".into())
            }
            LandAction::Harvest => {
                if !plot.is_mature() {
                    return Err("crop is not ready".into());
                }
                let crop = plot.crop_type.clone();
                plot.clear_crop();
                *record.items.entry(crop.clone()).or_insert(0) += 1;
                Ok(format!("harvested {}", crop))
            }
        }
    }

    /// Credit play time while already holding the account lock.
    async fn add_play_time_locked(&self, account_id: &str, secs: u64) {
        if secs == 0 {
            return;
        }
        if let Err(e) = self.store_play_time(account_id, secs).await {
            metrics::inc_storage_failures();
            warn!(target: "sproutfarm::session", "could not record play time for {}: {}", escape_log(account_id), e);
        }
    }

    async fn store_play_time(&self, account_id: &str, secs: u64) -> Result<(), StorageError> {
        let Some(record) = self.ctx.storage.load(account_id).await? else {
            return Ok(());
        };
        let update = FieldUpdate::new()
            .set("total_play_secs", &record.total_play_secs.saturating_add(secs))?
            .expect_revision(record.revision);
        self.ctx.storage.update_fields(account_id, update).await?;
        Ok(())
    }

    /// Add `secs` to the account's `total_play_secs`. Best effort.
    pub async fn add_play_time(&self, account_id: &str, secs: u64) {
        let _guard = self.ctx.locks.lock(account_id).await;
        self.add_play_time_locked(account_id, secs).await;
    }

    /// Connection teardown: drop the session and credit its play time.
    pub async fn teardown(&self, session_id: SessionId) {
        let Some(session) = self.ctx.registry.remove(session_id) else {
            return;
        };
        if let Some(account_id) = session.account_id() {
            let played = session.play_secs(Utc::now());
            self.add_play_time(account_id, played).await;
            info!(
                target: "sproutfarm::session",
                "{} disconnected after {}s",
                escape_log(account_id),
                played
            );
        }
    }
}

fn crop_snapshot(record: &PlayerRecord, visited: Option<&str>, now: DateTime<Utc>) -> ServerMessage {
    ServerMessage::CropUpdate {
        farm_lots: record.land.clone(),
        timestamp: now,
        is_visiting: visited.is_some(),
        visited_player: visited.map(str::to_string),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::storage::{SledPlayerStore, StorageGateway};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn dispatcher() -> (Dispatcher, SessionId) {
        let storage = StorageGateway::new(Arc::new(SledPlayerStore::temporary().unwrap()));
        let ctx = ServerContext::new(Config::default(), storage);
        let (tx, _rx) = mpsc::unbounded_channel();
        let session = ctx.registry.register("127.0.0.1:9".parse().unwrap(), tx);
        (Dispatcher::new(ctx), session)
    }

    #[tokio::test]
    async fn handler_panic_becomes_error_reply() {
        let (dispatcher, session) = dispatcher();
        let before = metrics::snapshot().handler_panics;
        let replies = dispatcher
            .route(session, Frame::Json(serde_json::json!({"type": "test_panic"})))
            .await;
        assert_eq!(replies.len(), 1);
        match &replies[0] {
            ServerMessage::Error { message, request } => {
                assert_eq!(message, "internal error");
                assert_eq!(request.as_deref(), Some("test_panic"));
            }
            other => panic!("unexpected reply {:?}", other),
        }
        assert!(metrics::snapshot().handler_panics > before);

        // the router keeps working afterwards
        let replies = dispatcher
            .route(session, Frame::Json(serde_json::json!({"type": "ping"})))
            .await;
        assert!(matches!(replies[0], ServerMessage::Pong { .. }));
    }

    #[tokio::test]
    async fn empty_password_is_rejected_before_storage() {
        let (dispatcher, session) = dispatcher();
        let replies = dispatcher
            .route(
                session,
                Frame::Json(serde_json::json!({"type": "login", "account_id": "gina", "password": ""})),
            )
            .await;
        assert!(matches!(
            &replies[0],
            ServerMessage::LoginResponse { success: false, .. }
        ));
        assert!(dispatcher.context().storage.load("gina").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn teardown_removes_session() {
        let (dispatcher, session) = dispatcher();
        dispatcher.context().registry.authenticate(session, "hank").unwrap();
        dispatcher.teardown(session).await;
        assert!(dispatcher.context().registry.get(session).is_none());
        assert!(!dispatcher.context().registry.is_online("hank"));
    }
}
