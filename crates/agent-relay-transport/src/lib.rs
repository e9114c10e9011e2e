//! WebSocket endpoints and connection lifecycle for the agent relay.
//!
//! Provides:
//! - Endpoint paths and connection roles
//! - Token-based agent resolution
//! - `Endpoint` - Resolve, register, receive loop, unregister
//! - WebSocket transport (feature: websocket)

pub mod auth;
pub mod lifecycle;
pub mod protocol;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use auth::TokenAgentResolver;
pub use lifecycle::{Endpoint, ReceiveError};
pub use protocol::Role;

#[cfg(feature = "websocket")]
pub use websocket::create_relay_router;
