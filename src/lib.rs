//! One-to-many WebRTC broadcast relay
//!
//! A single presenter streams to any number of viewers through a remote
//! media server (Kurento or anything speaking its JSON-RPC protocol). The
//! relay only does signaling: it owns the room, negotiates SDP against the
//! media server and shuttles ICE candidates between browsers and endpoints.
//!
//! # Layout
//!
//! ```text
//!   browser ──ws──► server::Connection ──► protocol::MessageRouter
//!                                                  │
//!                                                  ▼
//!                                          relay::SessionRelay ──► registry::Room
//!                                                  │                registry::CandidateQueue
//!                                                  ▼
//!                                          engine::MediaEngine (Kurento JSON-RPC)
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use broadcast_relay::relay::{RelayConfig, SessionRelay};
//! use broadcast_relay::server::{RelayServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> broadcast_relay::Result<()> {
//!     let relay = Arc::new(SessionRelay::with_kurento(RelayConfig::default()));
//!     let server = RelayServer::new(ServerConfig::default(), relay);
//!
//!     server
//!         .run_until(async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await
//! }
//! ```

pub mod engine;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod relay;
pub mod server;
pub mod session;

pub use error::{Error, Result};
pub use relay::{RelayConfig, SessionRelay};
pub use server::{RelayServer, ServerConfig};
