//! `api_token` validator: a shared secret sent in a request header.
//!
//! The secret comes from exactly one source (a literal `token`, an `env`
//! variable name, or a `file` path) and is resolved once when config is
//! loaded. Whatever the source, the value is whitespace-trimmed and must be
//! non-empty.

use serde::Deserialize;
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use subtle::ConstantTimeEq;

use super::{AuthConfigError, AuthContext, AuthError, AuthMethod, Validator};

/// Where the secret was read from. Kept for diagnostics only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TokenSource {
    #[default]
    Literal,
    Env {
        name: String,
    },
    File {
        path: PathBuf,
    },
}

/// Resolved `api_token` configuration.
#[derive(Clone, Default)]
pub struct ApiTokenConfig {
    secret: String,
    source: TokenSource,
    /// Listener types allowed to use this validator; empty allows all.
    listeners: BTreeSet<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ApiTokenInput {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    env: Option<String>,
    #[serde(default)]
    file: Option<String>,
    #[serde(default)]
    listeners: Vec<String>,
}

impl ApiTokenConfig {
    /// Secret given inline in config.
    pub fn literal(token: &str) -> Result<Self, AuthConfigError> {
        let secret = token.trim();
        if secret.is_empty() {
            return Err(AuthConfigError::EmptyToken);
        }
        Ok(Self::resolved(secret.to_string(), TokenSource::Literal))
    }

    /// Secret read from the environment variable `name`.
    pub fn from_env(name: &str) -> Result<Self, AuthConfigError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AuthConfigError::EmptyEnvName);
        }
        let value =
            std::env::var(name).map_err(|_| AuthConfigError::EnvNotSet(name.to_string()))?;
        let secret = value.trim();
        if secret.is_empty() {
            return Err(AuthConfigError::EnvEmpty(name.to_string()));
        }
        Ok(Self::resolved(
            secret.to_string(),
            TokenSource::Env {
                name: name.to_string(),
            },
        ))
    }

    /// Secret read from the file at `path` (trailing newline and other
    /// surrounding whitespace dropped).
    pub fn from_file(path: &str) -> Result<Self, AuthConfigError> {
        let path = path.trim();
        if path.is_empty() {
            return Err(AuthConfigError::EmptyFilePath);
        }
        let path = PathBuf::from(path);
        let data = std::fs::read_to_string(&path).map_err(|source| AuthConfigError::FileRead {
            path: path.clone(),
            source,
        })?;
        let secret = data.trim();
        if secret.is_empty() {
            return Err(AuthConfigError::FileEmpty(path));
        }
        Ok(Self::resolved(secret.to_string(), TokenSource::File { path }))
    }

    fn resolved(secret: String, source: TokenSource) -> Self {
        Self {
            secret,
            source,
            listeners: BTreeSet::new(),
        }
    }

    /// Restrict this validator to the given listener types.
    pub fn with_listeners<I, S>(mut self, listeners: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.listeners = listeners.into_iter().map(Into::into).collect();
        self
    }

    pub fn source(&self) -> &TokenSource {
        &self.source
    }

    pub fn listeners(&self) -> &BTreeSet<String> {
        &self.listeners
    }

    /// Parse an `auth.api_token` block.
    pub fn from_yaml(value: serde_yaml::Value) -> Result<Self, AuthConfigError> {
        let input: ApiTokenInput = match value {
            serde_yaml::Value::Null => return Err(AuthConfigError::NoTokenSource),
            other => serde_yaml::from_value(other)?,
        };
        let sources = [&input.token, &input.env, &input.file]
            .iter()
            .filter(|s| s.is_some())
            .count();
        let config = match (sources, input.token, input.env, input.file) {
            (0, ..) => return Err(AuthConfigError::NoTokenSource),
            (1, Some(token), _, _) => Self::literal(&token)?,
            (1, _, Some(env), _) => Self::from_env(&env)?,
            (1, _, _, Some(file)) => Self::from_file(&file)?,
            _ => return Err(AuthConfigError::MultipleTokenSources),
        };
        let listeners = input
            .listeners
            .iter()
            .map(|l| l.trim())
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect::<Vec<_>>();
        Ok(config.with_listeners(listeners))
    }
}

impl Validator for ApiTokenConfig {
    fn validate(&self, ctx: &AuthContext) -> Result<(), AuthError> {
        let expected = AuthMethod::ApiToken.as_str();
        if ctx.auth_kind != expected {
            return Err(AuthError::AuthMethodMismatch {
                expected,
                got: ctx.auth_kind.clone(),
            });
        }
        if self.secret.is_empty() {
            return Err(AuthError::NotConfigured(expected));
        }
        if !self.listeners.is_empty() && !self.listeners.contains(&ctx.listener_type) {
            return Err(AuthError::ListenerNotAllowed(ctx.listener_type.clone()));
        }
        if !validate_secret(&self.secret, &ctx.api_token) {
            return Err(AuthError::InvalidToken);
        }
        Ok(())
    }
}

impl fmt::Debug for ApiTokenConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiTokenConfig")
            .field("secret", &"<redacted>")
            .field("source", &self.source)
            .field("listeners", &self.listeners)
            .finish()
    }
}

/// Constant-time token comparison.
fn validate_secret(expected: &str, provided: &str) -> bool {
    let expected = expected.as_bytes();
    let provided = provided.as_bytes();
    if expected.len() != provided.len() {
        // Same-length dummy comparison so a length mismatch takes as long as a miss.
        let _ = expected.ct_eq(expected);
        return false;
    }
    expected.ct_eq(provided).into()
}
