//! Hearthbeat - authenticated real-time synchronization for a shared family calendar
//!
//! Session-based authentication (rotating refresh tokens, anti-forgery
//! protection, one-time email tokens), lens-scoped access control and a
//! live event broker delivering state changes over WebSocket.

pub mod auth;
pub mod calendar;
pub mod channels;
pub mod config;
pub mod live;
pub mod ratelimit;
pub mod server;
pub mod storage;

pub use auth::{AccessResolver, AuthContext, SessionProtocol};
pub use channels::Channel;
pub use config::Settings;
pub use live::{LiveBroker, LiveEvent, LiveEventKind};
pub use server::AppState;
