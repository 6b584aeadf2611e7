//! Test utilities & fixtures shared by the integration tests.
#![allow(dead_code)] // each test binary uses a different subset

use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;
use tokio::sync::mpsc;

use sproutfarm::config::Config;
use sproutfarm::context::ServerContext;
use sproutfarm::farm::{LandPlot, PlayerRecord};
use sproutfarm::server::{Outbound, SessionId};
use sproutfarm::storage::{SledPlayerStore, StorageGateway};

/// Config bound to loopback on an ephemeral port, no log file.
pub fn test_config() -> Config {
    let mut cfg = Config::default();
    cfg.server.host = "127.0.0.1".into();
    cfg.server.port = 0;
    cfg.logging.file = None;
    cfg
}

pub fn memory_storage() -> StorageGateway {
    StorageGateway::new(Arc::new(SledPlayerStore::temporary().expect("temporary sled")))
}

pub fn context() -> ServerContext {
    context_with(test_config())
}

pub fn context_with(config: Config) -> ServerContext {
    ServerContext::new(config, memory_storage())
}

/// Fixed instant so growth arithmetic is reproducible.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 6, 12, 0, 0).unwrap()
}

/// Local wall-clock time on 2024-05-06 (a Monday) plus `days`.
pub fn local_day(days: i64, h: u32, m: u32, s: u32) -> NaiveDateTime {
    let monday = NaiveDate::from_ymd_opt(2024, 5, 6).unwrap();
    (monday + Duration::days(days)).and_hms_opt(h, m, s).unwrap()
}

/// A veteran account (no new-player bonus) with `growing` wheat plots whose
/// accrual marker is `updated_at`.
pub fn growing_record(account_id: &str, plots: usize, growing: usize, updated_at: DateTime<Utc>) -> PlayerRecord {
    let mut record = PlayerRecord::new(account_id, plots, updated_at - Duration::days(30));
    for plot in record.land.iter_mut().take(growing) {
        *plot = LandPlot::dug_empty();
        plot.plant("wheat", 600);
    }
    record.updated_at = updated_at;
    record
}

/// Register a fake connection; the receiver collects everything sent to it.
pub fn fake_session(ctx: &ServerContext) -> (SessionId, mpsc::UnboundedReceiver<Outbound>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let peer: SocketAddr = "127.0.0.1:50000".parse().unwrap();
    (ctx.registry.register(peer, tx), rx)
}

pub fn login_session(ctx: &ServerContext, account_id: &str) -> (SessionId, mpsc::UnboundedReceiver<Outbound>) {
    let (id, rx) = fake_session(ctx);
    ctx.registry.authenticate(id, account_id).expect("authenticate");
    (id, rx)
}

/// Everything queued for a fake session so far, decoded.
pub fn drain_json(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Vec<Value> {
    let mut out = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        if let Outbound::Line(line) = msg {
            out.push(serde_json::from_str(&line).expect("outbound line is JSON"));
        }
    }
    out
}
