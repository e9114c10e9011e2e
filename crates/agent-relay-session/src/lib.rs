//! Connection registry and message routing for the agent relay.
//!
//! Provides:
//! - `Registry` - Backend/client pools keyed by agent and connection id
//! - `Router` - Client/backend frame routing with id correlation

pub mod registry;
pub mod router;

pub use registry::{ConnectionStats, ForwardError, Registry, SharedSocket};
pub use router::Router;
