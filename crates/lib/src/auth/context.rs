use std::fmt;

use super::AuthMethod;

/// Request-scoped credentials, built fresh from transport headers for each
/// inbound request and never stored.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct AuthContext {
    /// Selects the validator (e.g. `api_token`).
    pub auth_kind: String,
    /// Listener type the request arrived on (e.g. `http`).
    pub listener_type: String,
    /// Caller-provided token for `api_token`.
    pub api_token: String,
}

impl AuthContext {
    pub fn api_token(listener_type: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            auth_kind: AuthMethod::ApiToken.as_str().to_string(),
            listener_type: listener_type.into(),
            api_token: token.into(),
        }
    }
}

impl fmt::Debug for AuthContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthContext")
            .field("auth_kind", &self.auth_kind)
            .field("listener_type", &self.listener_type)
            .field("api_token", &"<redacted>")
            .finish()
    }
}
