//! # Sproutfarm - Multiplayer Farming Game Server
//!
//! Sproutfarm is the network and simulation core of a persistent farming game.
//! Clients hold long-lived TCP connections speaking newline-delimited JSON;
//! the server keeps per-connection session state and advances crop growth in
//! the background for both connected and disconnected players.
//!
//! ## Features
//!
//! - **Line Protocol**: Bounded newline framer, tagged JSON messages, raw-text fallback.
//! - **Sessions**: Login with Argon2id password hashes, single-session-per-account eviction, spectating.
//! - **World Tick**: Per-second accrual for online players plus a batched offline sweep that never double-applies growth.
//! - **Special Farms**: Weekday-scheduled, idempotent replanting of showcase accounts.
//! - **Storage**: Embedded sled store (or one JSON document per account) behind a small trait, with optimistic revisions.
//! - **Async Design**: Built with Tokio; storage runs on the blocking pool.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sproutfarm::config::Config;
//! use sproutfarm::context::ServerContext;
//! use sproutfarm::server::GameServer;
//! use sproutfarm::shutdown::shutdown_channel;
//! use sproutfarm::storage::StorageGateway;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     let storage = StorageGateway::open(&config.storage)?;
//!     let ctx = ServerContext::new(config, storage);
//!
//!     let (_tx, rx) = shutdown_channel();
//!     GameServer::bind(ctx).await?.run(rx).await
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`server`] - Listener, framer, session registry, router and notifier
//! - [`engine`] - World tick, special-farm maintenance and per-account locks
//! - [`farm`] - Player records, growth accrual and planting policies
//! - [`storage`] - Player record persistence
//! - [`config`] - Configuration management and validation
//! - [`admin`] - Operator access to records
//! - [`validation`] - Account id validation and filename safety
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐
//! │  TCP Listener   │     │   World Tick /  │
//! │  + Dispatcher   │     │   Maintenance   │
//! └─────────────────┘     └─────────────────┘
//!          │    AccountLocks + Registry │
//!          └─────────────┬──────────────┘
//!                ┌─────────────────┐
//!                │ Storage Gateway │
//!                └─────────────────┘
//! ```

pub mod admin;
pub mod auth;
pub mod config;
pub mod context;
pub mod engine;
pub mod farm;
pub mod logutil;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod storage;
pub mod validation;
