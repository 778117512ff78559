//! pilot-runtime - CDP transport, correlation, and reconnectable client
//!
//! Low-level runtime infrastructure for talking to a browser over its remote
//! debugging protocol:
//!
//! - **Transport**: WebSocket framing and endpoint discovery
//! - **Connection**: command/response correlation and event fan-out
//! - **Client**: generation-tagged reconnect supervision
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐
//! │ pilot-core  │  Browser session operations
//! └──────┬──────┘
//!        │
//! ┌──────▼──────┐
//! │pilot-runtime│  This crate
//! │  ┌────────┐ │
//! │  │ Client │ │  Reconnect supervision
//! │  └────────┘ │
//! │  ┌────────┐ │
//! │  │ Conn   │ │  Command correlation + events
//! │  └────────┘ │
//! │  ┌────────┐ │
//! │  │ Trans  │ │  WebSocket transport
//! │  └────────┘ │
//! └─────────────┘
//! ```

pub mod client;
pub mod connection;
pub mod error;
pub mod transport;

pub use client::{Client, ClientOptions};
pub use connection::{CdpEvent, Connection};
pub use error::{Error, Result};
