//! HTTP wire format for command requests.
//!
//! `PUT /` with a JSON body `{"command_id": "<id>"}`. Credentials travel in
//! headers: the auth method selector plus method-specific headers.

use serde::{Deserialize, Serialize};

/// Path accepting command requests.
pub const COMMAND_PATH: &str = "/";

/// Selects the auth method (e.g. `api_token`).
pub const AUTH_METHOD_HEADER: &str = "X-Poke-Auth-Method";

/// Carries the token for `api_token`.
pub const API_TOKEN_HEADER: &str = "X-Poke-API-Token";

/// Request body. Unknown fields are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandPayload {
    #[serde(default)]
    pub command_id: Option<String>,
}

impl CommandPayload {
    pub fn new(command_id: impl Into<String>) -> Self {
        Self {
            command_id: Some(command_id.into()),
        }
    }

    /// The command ID when present and non-empty.
    pub fn command_id(&self) -> Option<&str> {
        self.command_id.as_deref().filter(|id| !id.is_empty())
    }
}
