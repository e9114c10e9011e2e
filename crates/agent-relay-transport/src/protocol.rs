//! Endpoint paths and connection roles.

use std::fmt;

/// Path backends connect to.
pub const BACKEND_PATH: &str = "/mcp_endpoint/mcp/";
/// Path clients connect to.
pub const CLIENT_PATH: &str = "/mcp_endpoint/call/";
/// Query parameter carrying the agent token.
pub const TOKEN_PARAM: &str = "token";

/// Which pool a connection belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Tool/device side, one per agent.
    Backend,
    /// Requester side, many per agent.
    Client,
}

impl Role {
    /// Path this role connects to.
    #[must_use]
    pub const fn path(self) -> &'static str {
        match self {
            Self::Backend => BACKEND_PATH,
            Self::Client => CLIENT_PATH,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Backend => f.write_str("backend"),
            Self::Client => f.write_str("client"),
        }
    }
}
