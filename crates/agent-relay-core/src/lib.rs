//! Core abstractions for the agent relay.
//!
//! This crate provides the building blocks shared by the registry, router
//! and transport:
//! - `ConnectionId` - Hex-only process-unique connection identifier
//! - `correlation` - Request id encoding/decoding for response routing
//! - `RpcResponse` - JSON-RPC envelopes synthesized by the relay
//! - `RelaySocket` and `AgentResolver` collaborator traits

pub mod correlation;
pub mod ids;
pub mod jsonrpc;
pub mod traits;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use correlation::RequestId;
pub use ids::ConnectionId;
pub use jsonrpc::RpcResponse;
pub use traits::{AgentResolver, AuthError, HandshakeContext, RelaySocket, SendError};
