//! # Server Module - Connections, Sessions and Routing
//!
//! ```text
//! TcpListener ─accept─▶ connection task ──frames──▶ Dispatcher ──▶ handlers
//!                          ▲   │                                     │
//!                 Outbound │   └─ register/remove ─▶ SessionRegistry │
//!                          └──────────── Notifier ◀──────────────────┘
//! ```
//!
//! - [`framer`] - newline-delimited frame splitting with a bounded buffer
//! - [`session`] - [`SessionRegistry`]: connection → auth/spectating state
//! - [`protocol`] - wire message types
//! - [`dispatch`] - [`Dispatcher`]: `type` → handler table, error mapping, panic isolation
//! - [`notify`] - [`Notifier`]: `crop_update` fan-out to owners and spectators
//! - [`listener`] - [`GameServer`]: accept loop and per-connection tasks

pub mod dispatch;
pub mod framer;
pub mod listener;
pub mod notify;
pub mod protocol;
pub mod session;

pub use dispatch::{DispatchError, Dispatcher};
pub use framer::{Frame, FrameError, LineFramer};
pub use listener::GameServer;
pub use notify::Notifier;
pub use protocol::ServerMessage;
pub use session::{AuthState, Eviction, Observer, Outbound, Session, SessionId, SessionRegistry};
