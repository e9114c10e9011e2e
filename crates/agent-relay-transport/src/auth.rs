//! Agent resolution from handshake tokens.

use agent_relay_core::{AgentResolver, AuthError, HandshakeContext};
use async_trait::async_trait;
use base64::{
    Engine as _,
    engine::general_purpose::{STANDARD as BASE64, URL_SAFE, URL_SAFE_NO_PAD},
};
use serde::{Deserialize, Serialize};

use crate::protocol::TOKEN_PARAM;

#[derive(Serialize, Deserialize)]
struct TokenPayload {
    #[serde(rename = "agentId", default, skip_serializing_if = "Option::is_none")]
    agent_id: Option<String>,
}

/// Resolves the agent id from a base64 JSON token (`{"agentId": "..."}`).
///
/// The token is not signed or encrypted; this resolver identifies agents but
/// does not authenticate them. Swap in another [`AgentResolver`] for that.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokenAgentResolver;

impl TokenAgentResolver {
    /// Build the token for an agent id.
    #[must_use]
    pub fn encode_token(agent_id: &str) -> String {
        let payload = TokenPayload {
            agent_id: Some(agent_id.to_string()),
        };
        BASE64.encode(serde_json::to_vec(&payload).unwrap_or_default())
    }

    /// Extract the agent id from a token.
    ///
    /// # Errors
    /// Returns [`AuthError::InvalidToken`] if the token is not base64 JSON, or
    /// [`AuthError::MissingAgentId`] if it has no non-empty `agentId`.
    pub fn decode_token(token: &str) -> Result<String, AuthError> {
        // An unescaped `+` arrives as a space after query decoding.
        let token = token.trim().replace(' ', "+");
        let bytes = BASE64
            .decode(&token)
            .or_else(|_| URL_SAFE.decode(&token))
            .or_else(|_| URL_SAFE_NO_PAD.decode(&token))
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?;

        let payload: TokenPayload = serde_json::from_slice(&bytes)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?;

        payload
            .agent_id
            .filter(|id| !id.is_empty())
            .ok_or(AuthError::MissingAgentId)
    }
}

#[async_trait]
impl AgentResolver for TokenAgentResolver {
    async fn resolve(&self, ctx: &HandshakeContext) -> Result<String, AuthError> {
        let token = ctx
            .query_param(TOKEN_PARAM)
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::MissingToken)?;
        Self::decode_token(token)
    }
}
