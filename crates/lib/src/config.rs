//! Configuration types and loading.
//!
//! Config is a single YAML file (e.g. `/etc/poke/poke.yml`) with three
//! top-level blocks: `commands`, `listeners` and `logging`. Each block is
//! parsed by the module that owns it; this module composes them and handles
//! file discovery.

use anyhow::{Context, Result};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::dispatch::{CommandRegistry, RegistryError};
use crate::listener::{ListenerConfig, ListenerConfigError};
use crate::logging::LoggingConfig;

/// Top-level server config.
#[derive(Debug, Default)]
pub struct Config {
    pub commands: CommandRegistry,
    pub listeners: ListenerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid config: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("top-level auth is no longer supported; configure auth under listeners.<type>.auth")]
    TopLevelAuth,
    #[error("commands: {0}")]
    Commands(#[from] RegistryError),
    #[error(transparent)]
    Listeners(#[from] ListenerConfigError),
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigInput {
    #[serde(default)]
    commands: Option<serde_yaml::Mapping>,
    #[serde(default)]
    listeners: Option<serde_yaml::Mapping>,
    #[serde(default)]
    logging: Option<LoggingConfig>,
    /// Legacy location; only read to reject it with a clear message.
    #[serde(default)]
    auth: Option<serde_yaml::Value>,
}

impl Config {
    /// Parse and validate a YAML document. An empty document is an empty config.
    pub fn parse(input: &str) -> Result<Self, ConfigError> {
        let raw: ConfigInput = if input.trim().is_empty() {
            ConfigInput::default()
        } else {
            serde_yaml::from_str::<Option<ConfigInput>>(input)?.unwrap_or_default()
        };
        if raw.auth.is_some() {
            return Err(ConfigError::TopLevelAuth);
        }
        let commands = CommandRegistry::from_yaml(raw.commands.unwrap_or_default())?;
        let listeners = ListenerConfig::from_yaml(raw.listeners.unwrap_or_default())?;
        Ok(Self {
            commands,
            listeners,
            logging: raw.logging.unwrap_or_default(),
        })
    }
}

/// Default config locations, in lookup order.
pub fn default_config_candidates() -> Vec<PathBuf> {
    let mut candidates = vec![PathBuf::from("/etc/poke/poke.yml")];
    if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        candidates.push(PathBuf::from(xdg).join("poke").join("poke.yml"));
    }
    if let Some(home) = dirs::home_dir() {
        candidates.push(home.join("config").join("poke").join("poke.yml"));
        candidates.push(home.join(".poke").join("poke.yml"));
    }
    candidates
}

/// Pick the config file: the explicit path when given, else the first default
/// candidate that exists.
pub fn find_config_path(explicit: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path);
    }
    let candidates = default_config_candidates();
    for path in &candidates {
        match std::fs::metadata(path) {
            Ok(_) => return Ok(path.clone()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => {
                return Err(e).with_context(|| format!("checking config path {}", path.display()))
            }
        }
    }
    let searched: Vec<String> = candidates.iter().map(|p| p.display().to_string()).collect();
    anyhow::bail!("config file not found; searched: {}", searched.join(", "))
}

/// Read and parse the config file at `path`.
pub fn load_config(path: &Path) -> Result<Config> {
    let s = std::fs::read_to_string(path)
        .with_context(|| format!("reading config from {}", path.display()))?;
    let config =
        Config::parse(&s).with_context(|| format!("parsing config from {}", path.display()))?;
    log::debug!(
        "loaded config from {}: {} command(s), {} listener(s)",
        path.display(),
        config.commands.len(),
        config.listeners.len()
    );
    Ok(config)
}

/// Parse a duration such as `"300ms"`, `"1.5h"` or `"2h45m"`.
///
/// Units: `ns`, `us` (or `µs`), `ms`, `s`, `m`, `h`. A bare `0` is zero.
/// Negative durations are rejected.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let s = input.trim();
    if s.is_empty() {
        return Err("empty duration".to_string());
    }
    if s == "0" {
        return Ok(Duration::ZERO);
    }
    if s.starts_with('-') {
        return Err(format!("negative duration {:?}", input));
    }

    let invalid = || format!("invalid duration {:?}", input);
    let mut rest = s.strip_prefix('+').unwrap_or(s);
    let mut total: u128 = 0;

    while !rest.is_empty() {
        let num_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let (number, tail) = rest.split_at(num_len);
        let (whole, frac) = number.split_once('.').unwrap_or((number, ""));
        if whole.is_empty() && frac.is_empty() {
            return Err(invalid());
        }
        if frac.contains('.') {
            return Err(invalid());
        }

        let unit_len = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, next) = tail.split_at(unit_len);
        let scale: u128 = match unit {
            "ns" => 1,
            "us" | "µs" | "μs" => 1_000,
            "ms" => 1_000_000,
            "s" => 1_000_000_000,
            "m" => 60 * 1_000_000_000,
            "h" => 3_600 * 1_000_000_000,
            "" => return Err(format!("missing unit in duration {:?}", input)),
            other => return Err(format!("unknown unit {:?} in duration {:?}", other, input)),
        };

        let whole: u128 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| invalid())?
        };
        let mut part = whole.checked_mul(scale).ok_or_else(invalid)?;
        if !frac.is_empty() {
            // Fractions finer than a nanosecond are truncated.
            let digits = &frac[..frac.len().min(18)];
            let numer: u128 = digits.parse().map_err(|_| invalid())?;
            let denom = 10u128.pow(digits.len() as u32);
            part = part
                .checked_add(numer * scale / denom)
                .ok_or_else(invalid)?;
        }
        total = total.checked_add(part).ok_or_else(invalid)?;
        rest = next;
    }

    let nanos = u64::try_from(total).map_err(|_| format!("duration {:?} overflows", input))?;
    Ok(Duration::from_nanos(nanos))
}

/// Serde helper for optional duration fields: a string such as `"5s"`, the
/// integer `0`, or null.
pub(crate) fn deserialize_duration<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<serde_yaml::Value>::deserialize(deserializer)? {
        None | Some(serde_yaml::Value::Null) => Ok(None),
        Some(serde_yaml::Value::String(s)) => parse_duration(&s).map(Some).map_err(D::Error::custom),
        Some(serde_yaml::Value::Number(n)) if n.as_u64() == Some(0) => Ok(Some(Duration::ZERO)),
        Some(other) => Err(D::Error::custom(format!(
            "invalid duration {:?}: expected a string such as \"5s\"",
            other
        ))),
    }
}

/// Stringify a YAML scalar. Null becomes the empty string; sequences and
/// mappings have no string form.
pub(crate) fn yaml_scalar_to_string(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::Null => Some(String::new()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Tagged(t) => yaml_scalar_to_string(&t.value),
        serde_yaml::Value::Sequence(_) | serde_yaml::Value::Mapping(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::LogFormat;

    const MINIMAL: &str = r#"
commands:
  uptime: uptime
listeners:
  http:
    auth:
      api_token:
        token: "secret"
"#;

    #[test]
    fn parse_populates_commands_and_listeners() {
        let config = Config::parse(MINIMAL).unwrap();
        let cmd = config.commands.get("uptime").unwrap();
        assert_eq!(cmd.id, "uptime");
        assert_eq!(cmd.args, vec!["uptime"]);
        assert_eq!(config.listeners.types(), vec!["http"]);
        assert_eq!(config.logging, LoggingConfig::default());
    }

    #[test]
    fn empty_document_is_empty_config() {
        let config = Config::parse("").unwrap();
        assert!(config.commands.is_empty());
        assert!(config.listeners.is_empty());
    }

    #[test]
    fn rejects_top_level_auth() {
        let input = format!("{}auth:\n  api_token:\n    token: legacy\n", MINIMAL);
        assert!(matches!(
            Config::parse(&input),
            Err(ConfigError::TopLevelAuth)
        ));
    }

    #[test]
    fn rejects_listener_without_auth() {
        assert!(Config::parse("listeners:\n  http: {}\n").is_err());
    }

    #[test]
    fn rejects_unknown_listener_type() {
        assert!(Config::parse("listeners:\n  bogus: {}\n").is_err());
    }

    #[test]
    fn rejects_invalid_command() {
        let input = "commands:\n  bad:\n    name: nope\n";
        assert!(matches!(
            Config::parse(input),
            Err(ConfigError::Commands(_))
        ));
    }

    #[test]
    fn rejects_unknown_top_level_key() {
        assert!(Config::parse("plugins: {}\n").is_err());
    }

    #[test]
    fn parses_logging_block() {
        let input = "logging:\n  level: DEBUG\n  format: json\n";
        let config = Config::parse(input).unwrap();
        assert_eq!(config.logging.level, log::LevelFilter::Debug);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn load_config_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("poke.yml");
        std::fs::write(&path, MINIMAL).unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.commands.len(), 1);
    }

    #[test]
    fn load_config_missing_file_names_path() {
        let err = load_config(Path::new("/nonexistent/poke.yml")).unwrap_err();
        assert!(format!("{:#}", err).contains("/nonexistent/poke.yml"));
    }

    #[test]
    fn explicit_config_path_wins() {
        let path = find_config_path(Some(PathBuf::from("/tmp/custom.yml"))).unwrap();
        assert_eq!(path, PathBuf::from("/tmp/custom.yml"));
    }

    #[test]
    fn default_candidates_start_with_etc() {
        let candidates = default_config_candidates();
        assert_eq!(candidates[0], PathBuf::from("/etc/poke/poke.yml"));
        assert!(candidates
            .iter()
            .all(|p| p.ends_with(Path::new("poke.yml"))));
    }

    #[test]
    fn parse_duration_units() {
        assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);
        assert_eq!(parse_duration("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("300ms").unwrap(), Duration::from_millis(300));
        assert_eq!(parse_duration("1.5h").unwrap(), Duration::from_secs(5400));
        assert_eq!(
            parse_duration("2h45m").unwrap(),
            Duration::from_secs(2 * 3600 + 45 * 60)
        );
        assert_eq!(parse_duration("10us").unwrap(), Duration::from_micros(10));
        assert_eq!(parse_duration("10µs").unwrap(), Duration::from_micros(10));
        assert_eq!(parse_duration("7ns").unwrap(), Duration::from_nanos(7));
    }

    #[test]
    fn parse_duration_rejects_bad_input() {
        for bad in ["", "5", "s", "-1s", "5x", "1..5s", "soon"] {
            assert!(parse_duration(bad).is_err(), "accepted {:?}", bad);
        }
    }

    #[test]
    fn scalar_to_string() {
        use serde_yaml::Value;
        assert_eq!(yaml_scalar_to_string(&Value::Null).unwrap(), "");
        assert_eq!(yaml_scalar_to_string(&Value::Bool(true)).unwrap(), "true");
        assert_eq!(yaml_scalar_to_string(&Value::from(42)).unwrap(), "42");
        assert!(yaml_scalar_to_string(&Value::Sequence(vec![])).is_none());
    }
}
