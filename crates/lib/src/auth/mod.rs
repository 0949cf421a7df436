//! Request authentication.
//!
//! Each listener carries an [`Auth`] block mapping auth-method names to
//! validators. A request names its method (e.g. `api_token`); the matching
//! validator checks the request's [`AuthContext`].

mod api_token;
mod context;

use std::collections::BTreeMap;
use std::path::PathBuf;

pub use api_token::{ApiTokenConfig, TokenSource};
pub use context::AuthContext;

/// Built-in auth methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    ApiToken,
}

impl AuthMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMethod::ApiToken => "api_token",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "api_token" => Some(AuthMethod::ApiToken),
            _ => None,
        }
    }
}

/// Request-time authentication failure.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("auth method mismatch: expected {expected:?} got {got:?}")]
    AuthMethodMismatch { expected: &'static str, got: String },
    #[error("{0} is not configured")]
    NotConfigured(&'static str),
    #[error("listener {0:?} is not allowed for this auth method")]
    ListenerNotAllowed(String),
    #[error("invalid api token")]
    InvalidToken,
    #[error("no auth validators configured")]
    NoValidators,
    #[error("auth kind is required")]
    MissingAuthKind,
    #[error("unsupported auth method {0:?}")]
    UnsupportedMethod(String),
}

/// Load-time auth configuration error.
#[derive(Debug, thiserror::Error)]
pub enum AuthConfigError {
    #[error("auth method must be a string")]
    NonStringMethod,
    #[error("unsupported auth method {0:?}")]
    UnsupportedMethod(String),
    #[error("api_token requires exactly one of token, env, or file")]
    NoTokenSource,
    #[error("api_token must not combine token, env, and/or file")]
    MultipleTokenSources,
    #[error("api_token token must not be empty")]
    EmptyToken,
    #[error("api_token env must not be empty")]
    EmptyEnvName,
    #[error("api_token env {0:?} is not set")]
    EnvNotSet(String),
    #[error("api_token env {0:?} is empty")]
    EnvEmpty(String),
    #[error("api_token file must not be empty")]
    EmptyFilePath,
    #[error("api_token file {}: {source}", .path.display())]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("api_token file {} is empty", .0.display())]
    FileEmpty(PathBuf),
    #[error("api_token: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Checks a request-scoped context against configured credentials.
pub trait Validator: Send + Sync {
    fn validate(&self, ctx: &AuthContext) -> Result<(), AuthError>;
}

/// One configured validator per built-in auth method.
#[derive(Debug, Clone)]
pub enum ValidatorConfig {
    ApiToken(ApiTokenConfig),
}

impl ValidatorConfig {
    pub fn method(&self) -> AuthMethod {
        match self {
            ValidatorConfig::ApiToken(_) => AuthMethod::ApiToken,
        }
    }
}

impl Validator for ValidatorConfig {
    fn validate(&self, ctx: &AuthContext) -> Result<(), AuthError> {
        match self {
            ValidatorConfig::ApiToken(cfg) => cfg.validate(ctx),
        }
    }
}

impl From<ApiTokenConfig> for ValidatorConfig {
    fn from(cfg: ApiTokenConfig) -> Self {
        ValidatorConfig::ApiToken(cfg)
    }
}

/// Auth-method name -> validator for one listener.
#[derive(Debug, Clone, Default)]
pub struct Auth {
    validators: BTreeMap<String, ValidatorConfig>,
}

impl Auth {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `validator` under its method name, replacing any previous one.
    pub fn with_validator(mut self, validator: impl Into<ValidatorConfig>) -> Self {
        let validator = validator.into();
        self.validators
            .insert(validator.method().as_str().to_string(), validator);
        self
    }

    /// Parse a listener's `auth` mapping. Unknown methods are rejected.
    pub fn from_yaml(raw: serde_yaml::Mapping) -> Result<Self, AuthConfigError> {
        let mut auth = Self::new();
        for (key, value) in raw {
            let serde_yaml::Value::String(name) = key else {
                return Err(AuthConfigError::NonStringMethod);
            };
            match AuthMethod::from_name(&name) {
                Some(AuthMethod::ApiToken) => {
                    auth = auth.with_validator(ApiTokenConfig::from_yaml(value)?);
                }
                None => return Err(AuthConfigError::UnsupportedMethod(name)),
            }
        }
        Ok(auth)
    }

    pub fn get(&self, method: &str) -> Option<&ValidatorConfig> {
        self.validators.get(method)
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    /// Configured method names, sorted.
    pub fn methods(&self) -> impl Iterator<Item = &str> {
        self.validators.keys().map(String::as_str)
    }
}

impl Validator for Auth {
    /// Route `ctx` to the validator registered for `ctx.auth_kind`.
    fn validate(&self, ctx: &AuthContext) -> Result<(), AuthError> {
        if self.validators.is_empty() {
            return Err(AuthError::NoValidators);
        }
        let kind = ctx.auth_kind.trim();
        if kind.is_empty() {
            return Err(AuthError::MissingAuthKind);
        }
        match self.validators.get(kind) {
            Some(v) => v.validate(ctx),
            None => Err(AuthError::UnsupportedMethod(kind.to_string())),
        }
    }
}
