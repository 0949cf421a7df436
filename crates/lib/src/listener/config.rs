//! HTTP listener configuration (`listeners.http`).

use serde::Deserialize;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::auth::{Auth, AuthConfigError};
use crate::config::deserialize_duration;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8008;

#[derive(Debug, thiserror::Error)]
pub enum HttpConfigError {
    #[error("{0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("host must not be empty")]
    EmptyHost,
    #[error("port must be between 1 and 65535, got {0}")]
    PortOutOfRange(i64),
    #[error("tls requires both cert_file and key_file")]
    TlsIncomplete,
    #[error("tls {field}: missing environment variable(s): {}", .names.join(", "))]
    TlsMissingEnv {
        field: &'static str,
        names: Vec<String>,
    },
    #[error("tls {field} {}: {source}", .path.display())]
    TlsFile {
        field: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("tls {field} {}: path is a directory", .path.display())]
    TlsNotAFile { field: &'static str, path: PathBuf },
    #[error("auth is required for listener http")]
    MissingAuth,
    #[error("auth must configure at least one method")]
    NoAuthMethods,
    #[error("auth: {0}")]
    Auth(#[from] AuthConfigError),
}

/// Certificate and private key (PEM) for serving HTTPS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsConfig {
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
}

impl TlsConfig {
    pub fn new(cert_file: impl Into<PathBuf>, key_file: impl Into<PathBuf>) -> Self {
        Self {
            cert_file: cert_file.into(),
            key_file: key_file.into(),
        }
    }

    /// Both files must exist, be regular files and be readable.
    pub fn validate(&self) -> Result<(), HttpConfigError> {
        ensure_readable_file("cert_file", &self.cert_file)?;
        ensure_readable_file("key_file", &self.key_file)
    }
}

/// Validated settings for one HTTP listener.
#[derive(Clone)]
pub struct HttpListenerConfig {
    pub host: String,
    pub port: u16,
    /// Deadline for reading the request body.
    pub read_timeout: Option<Duration>,
    /// Deadline for handling a request, enqueue included.
    pub write_timeout: Option<Duration>,
    pub tls: Option<TlsConfig>,
    pub auth: Auth,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct HttpListenerInput {
    #[serde(default)]
    host: Option<String>,
    #[serde(default)]
    port: Option<i64>,
    #[serde(default, deserialize_with = "deserialize_duration")]
    read_timeout: Option<Duration>,
    #[serde(default, deserialize_with = "deserialize_duration")]
    write_timeout: Option<Duration>,
    #[serde(default)]
    tls: Option<TlsInput>,
    #[serde(default)]
    auth: Option<serde_yaml::Mapping>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct TlsInput {
    #[serde(default)]
    cert_file: Option<String>,
    #[serde(default)]
    key_file: Option<String>,
}

impl HttpListenerConfig {
    /// Listener on the default address with the given auth.
    pub fn new(auth: Auth) -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            read_timeout: None,
            write_timeout: None,
            tls: None,
            auth,
        }
    }

    pub fn with_address(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = host.into();
        self.port = port;
        self
    }

    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn with_timeouts(mut self, read: Option<Duration>, write: Option<Duration>) -> Self {
        self.read_timeout = read;
        self.write_timeout = write;
        self
    }

    /// `host:port`, for logs and errors.
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Check the invariants a listener needs before binding. Port 0 is
    /// accepted here so callers may ask the OS for an ephemeral port; the YAML
    /// form requires 1..=65535.
    pub fn validate(&self) -> Result<(), HttpConfigError> {
        if self.host.trim().is_empty() {
            return Err(HttpConfigError::EmptyHost);
        }
        if let Some(tls) = &self.tls {
            tls.validate()?;
        }
        if self.auth.is_empty() {
            return Err(HttpConfigError::NoAuthMethods);
        }
        Ok(())
    }

    /// Parse a `listeners.http` block, applying defaults.
    pub fn from_yaml(value: serde_yaml::Value) -> Result<Self, HttpConfigError> {
        let input: HttpListenerInput = match value {
            serde_yaml::Value::Null => HttpListenerInput::default(),
            other => serde_yaml::from_value(other)?,
        };

        let port = match input.port {
            None => DEFAULT_PORT,
            Some(p) => u16::try_from(p)
                .ok()
                .filter(|p| *p != 0)
                .ok_or(HttpConfigError::PortOutOfRange(p))?,
        };
        let tls = input.tls.map(TlsInput::resolve).transpose()?;
        let auth = match input.auth {
            None => return Err(HttpConfigError::MissingAuth),
            Some(raw) => Auth::from_yaml(raw)?,
        };

        let config = Self {
            host: input.host.unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port,
            read_timeout: input.read_timeout.filter(|d| !d.is_zero()),
            write_timeout: input.write_timeout.filter(|d| !d.is_zero()),
            tls,
            auth,
        };
        config.validate()?;
        Ok(config)
    }
}

impl fmt::Debug for HttpListenerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpListenerConfig")
            .field("address", &self.address())
            .field("read_timeout", &self.read_timeout)
            .field("write_timeout", &self.write_timeout)
            .field("tls", &self.tls)
            .field("auth", &self.auth.methods().collect::<Vec<_>>())
            .finish()
    }
}

impl TlsInput {
    fn resolve(self) -> Result<TlsConfig, HttpConfigError> {
        let cert = self.cert_file.filter(|s| !s.trim().is_empty());
        let key = self.key_file.filter(|s| !s.trim().is_empty());
        let (Some(cert), Some(key)) = (cert, key) else {
            return Err(HttpConfigError::TlsIncomplete);
        };
        let cert = expand_env_strict(cert.trim())
            .map_err(|names| HttpConfigError::TlsMissingEnv {
                field: "cert_file",
                names,
            })?;
        let key = expand_env_strict(key.trim()).map_err(|names| HttpConfigError::TlsMissingEnv {
            field: "key_file",
            names,
        })?;
        let tls = TlsConfig::new(cert, key);
        tls.validate()?;
        Ok(tls)
    }
}

fn ensure_readable_file(field: &'static str, path: &Path) -> Result<(), HttpConfigError> {
    let file_err = |source| HttpConfigError::TlsFile {
        field,
        path: path.to_path_buf(),
        source,
    };
    let meta = std::fs::metadata(path).map_err(file_err)?;
    if meta.is_dir() {
        return Err(HttpConfigError::TlsNotAFile {
            field,
            path: path.to_path_buf(),
        });
    }
    std::fs::File::open(path).map_err(file_err)?;
    Ok(())
}

/// Expand `$NAME` and `${NAME}` from the process environment. Every
/// referenced variable must be set; the missing names are returned sorted.
pub(crate) fn expand_env_strict(input: &str) -> Result<String, Vec<String>> {
    expand_with(input, |name| std::env::var(name).ok())
}

fn expand_with<F>(input: &str, lookup: F) -> Result<String, Vec<String>>
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(input.len());
    let mut missing: Vec<String> = Vec::new();
    let mut rest = input;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        let (name, consumed) = if let Some(braced) = after.strip_prefix('{') {
            match braced.find('}') {
                Some(end) => (&braced[..end], end + 2),
                None => ("", 0),
            }
        } else {
            let end = after
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(after.len());
            (&after[..end], end)
        };

        if name.is_empty() {
            out.push('$');
            rest = after;
            continue;
        }
        match lookup(name) {
            Some(value) => out.push_str(&value),
            None => {
                if !missing.iter().any(|m| m == name) {
                    missing.push(name.to_string());
                }
            }
        }
        rest = &after[consumed..];
    }
    out.push_str(rest);

    if missing.is_empty() {
        Ok(out)
    } else {
        missing.sort();
        Err(missing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn parse(yaml: &str) -> Result<HttpListenerConfig, HttpConfigError> {
        HttpListenerConfig::from_yaml(serde_yaml::from_str(yaml).unwrap())
    }

    const AUTH: &str = "auth:\n  api_token:\n    token: secret\n";

    #[test]
    fn defaults_apply() {
        let cfg = parse(AUTH).unwrap();
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.port, 8008);
        assert_eq!(cfg.read_timeout, None);
        assert_eq!(cfg.write_timeout, None);
        assert!(cfg.tls.is_none());
        assert_eq!(cfg.address(), "127.0.0.1:8008");
    }

    #[test]
    fn explicit_values() {
        let cfg = parse(&format!(
            "host: 0.0.0.0\nport: 9000\nread_timeout: 1s\nwrite_timeout: 2s\n{}",
            AUTH
        ))
        .unwrap();
        assert_eq!(cfg.address(), "0.0.0.0:9000");
        assert_eq!(cfg.read_timeout, Some(Duration::from_secs(1)));
        assert_eq!(cfg.write_timeout, Some(Duration::from_secs(2)));
    }

    #[test]
    fn ipv6_address_is_bracketed() {
        let cfg = HttpListenerConfig::new(Auth::new()).with_address("::1", 8008);
        assert_eq!(cfg.address(), "[::1]:8008");
    }

    #[test]
    fn auth_is_required() {
        assert!(matches!(parse("port: 9000"), Err(HttpConfigError::MissingAuth)));
        assert!(matches!(parse("~"), Err(HttpConfigError::MissingAuth)));
    }

    #[test]
    fn auth_needs_a_method() {
        assert!(matches!(
            parse("auth: {}"),
            Err(HttpConfigError::NoAuthMethods)
        ));
    }

    #[test]
    fn unknown_auth_method_is_rejected() {
        assert!(matches!(
            parse("auth:\n  basic: {}\n"),
            Err(HttpConfigError::Auth(AuthConfigError::UnsupportedMethod(_)))
        ));
    }

    #[test]
    fn port_range() {
        for bad in ["0", "70000", "-1"] {
            let result = parse(&format!("port: {}\n{}", bad, AUTH));
            assert!(
                matches!(result, Err(HttpConfigError::PortOutOfRange(_))),
                "port {} accepted",
                bad
            );
        }
        assert_eq!(parse(&format!("port: 65535\n{}", AUTH)).unwrap().port, 65535);
    }

    #[test]
    fn blank_host_is_rejected() {
        assert!(matches!(
            parse(&format!("host: \"  \"\n{}", AUTH)),
            Err(HttpConfigError::EmptyHost)
        ));
    }

    #[test]
    fn unknown_field_is_rejected() {
        assert!(parse(&format!("keepalive: true\n{}", AUTH)).is_err());
    }

    #[test]
    fn tls_requires_both_files() {
        assert!(matches!(
            parse(&format!("tls:\n  cert_file: /tmp/cert.pem\n{}", AUTH)),
            Err(HttpConfigError::TlsIncomplete)
        ));
    }

    #[test]
    fn tls_files_must_exist() {
        let result = parse(&format!(
            "tls:\n  cert_file: /nonexistent/cert.pem\n  key_file: /nonexistent/key.pem\n{}",
            AUTH
        ));
        assert!(matches!(
            result,
            Err(HttpConfigError::TlsFile {
                field: "cert_file",
                ..
            })
        ));
    }

    #[test]
    fn tls_directory_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let tls = TlsConfig::new(dir.path(), dir.path());
        assert!(matches!(
            tls.validate(),
            Err(HttpConfigError::TlsNotAFile { .. })
        ));
    }

    #[test]
    fn tls_paths_expand_environment() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("cert.pem"), "cert").unwrap();
        std::fs::write(dir.path().join("key.pem"), "key").unwrap();
        std::env::set_var("POKE_TEST_TLS_DIR", dir.path());
        let cfg = parse(&format!(
            "tls:\n  cert_file: ${{POKE_TEST_TLS_DIR}}/cert.pem\n  key_file: $POKE_TEST_TLS_DIR/key.pem\n{}",
            AUTH
        ))
        .unwrap();
        let tls = cfg.tls.unwrap();
        assert_eq!(tls.cert_file, dir.path().join("cert.pem"));
        assert_eq!(tls.key_file, dir.path().join("key.pem"));
    }

    #[test]
    fn tls_missing_env_is_an_error() {
        std::env::remove_var("POKE_TEST_TLS_UNSET");
        let result = parse(&format!(
            "tls:\n  cert_file: ${{POKE_TEST_TLS_UNSET}}/cert.pem\n  key_file: /tmp/key.pem\n{}",
            AUTH
        ));
        assert!(matches!(
            result,
            Err(HttpConfigError::TlsMissingEnv { field: "cert_file", names }) if names == vec!["POKE_TEST_TLS_UNSET"]
        ));
    }

    #[test]
    fn expand_forms() {
        let env: HashMap<&str, &str> = [("A", "1"), ("B_2", "two")].into_iter().collect();
        let lookup = |name: &str| env.get(name).map(|v| v.to_string());
        assert_eq!(expand_with("x/$A/${B_2}/y", lookup).unwrap(), "x/1/two/y");
        assert_eq!(expand_with("plain", lookup).unwrap(), "plain");
        assert_eq!(expand_with("cost$", lookup).unwrap(), "cost$");
        assert_eq!(
            expand_with("$Z/${Y}/$Z", lookup).unwrap_err(),
            vec!["Y", "Z"]
        );
    }

    #[test]
    fn debug_hides_credentials() {
        let cfg = parse("auth:\n  api_token:\n    token: hunter2\n").unwrap();
        let out = format!("{:?}", cfg);
        assert!(!out.contains("hunter2"));
        assert!(out.contains("api_token"));
    }
}
