//! Logger setup from the `logging` config block.
//!
//! The library only emits through the `log` facade; the binary calls [`init`]
//! once at startup. `POKE_LOG` (env_logger filter syntax) overrides the
//! configured level.

use log::{LevelFilter, Record};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::io::Write;

/// Environment variable overriding the configured filter.
pub const LOG_ENV: &str = "POKE_LOG";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("logging level must be one of debug, info, warn, error")]
    Level,
    #[error("logging format must be one of json or text")]
    Format,
    #[error("logging sink type must be stdout")]
    Sink,
    #[error("logging sink journald is not supported by this build; use stdout and let the service manager collect it")]
    Journald,
}

/// Validated logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "LoggingInput")]
pub struct LoggingConfig {
    pub level: LevelFilter,
    pub format: LogFormat,
    /// Include `file:line` of the call site.
    pub add_source: bool,
    /// Extra fields on every record, emitted in key order.
    pub static_fields: BTreeMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LevelFilter::Info,
            format: LogFormat::Text,
            add_source: false,
            static_fields: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct LoggingInput {
    #[serde(default)]
    level: Option<String>,
    #[serde(default)]
    format: Option<String>,
    #[serde(default)]
    add_source: Option<bool>,
    #[serde(default)]
    static_fields: Option<BTreeMap<String, String>>,
    #[serde(default)]
    sink: Option<SinkInput>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SinkInput {
    #[serde(default, rename = "type")]
    typ: Option<String>,
    #[serde(default)]
    journald: Option<serde_yaml::Value>,
}

fn normalize(token: &str) -> String {
    token.trim().to_lowercase()
}

impl TryFrom<LoggingInput> for LoggingConfig {
    type Error = LoggingError;

    fn try_from(input: LoggingInput) -> Result<Self, Self::Error> {
        let level = match input.level.as_deref().map(normalize).as_deref() {
            None | Some("") | Some("info") => LevelFilter::Info,
            Some("debug") => LevelFilter::Debug,
            Some("warn") => LevelFilter::Warn,
            Some("error") => LevelFilter::Error,
            Some(_) => return Err(LoggingError::Level),
        };
        let format = match input.format.as_deref().map(normalize).as_deref() {
            None | Some("") | Some("text") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(_) => return Err(LoggingError::Format),
        };
        if let Some(sink) = input.sink {
            match sink.typ.as_deref().map(normalize).as_deref() {
                None | Some("") | Some("stdout") => {}
                Some("journald") => return Err(LoggingError::Journald),
                Some(_) => return Err(LoggingError::Sink),
            }
            if sink.journald.is_some() {
                return Err(LoggingError::Journald);
            }
        }
        Ok(Self {
            level,
            format,
            add_source: input.add_source.unwrap_or(false),
            static_fields: input.static_fields.unwrap_or_default(),
        })
    }
}

/// Build an env_logger writing to stdout in the configured format.
pub fn builder(config: &LoggingConfig) -> env_logger::Builder {
    let mut builder = env_logger::Builder::new();
    builder
        .filter_level(config.level)
        .parse_env(env_logger::Env::new().filter(LOG_ENV))
        .target(env_logger::Target::Stdout);

    let config = config.clone();
    builder.format(move |buf, record| {
        let time = buf.timestamp_millis().to_string();
        writeln!(buf, "{}", render(&config, &time, record))
    });
    builder
}

/// Install the global logger. Fails if one is already installed.
pub fn init(config: &LoggingConfig) -> Result<(), log::SetLoggerError> {
    builder(config).try_init()
}

fn level_name(record: &Record) -> &'static str {
    match record.level() {
        log::Level::Error => "error",
        log::Level::Warn => "warn",
        log::Level::Info => "info",
        log::Level::Debug => "debug",
        log::Level::Trace => "trace",
    }
}

fn source(record: &Record) -> Option<String> {
    Some(format!("{}:{}", record.file()?, record.line()?))
}

/// One output line, without the trailing newline.
fn render(config: &LoggingConfig, time: &str, record: &Record) -> String {
    match config.format {
        LogFormat::Text => {
            let mut line = format!(
                "{} {:<5} {}: {}",
                time,
                level_name(record),
                record.target(),
                record.args()
            );
            if config.add_source {
                if let Some(src) = source(record) {
                    line.push_str(&format!(" source={}", src));
                }
            }
            for (k, v) in &config.static_fields {
                line.push_str(&format!(" {}={}", k, v));
            }
            line
        }
        LogFormat::Json => {
            let mut obj = serde_json::Map::new();
            obj.insert("time".into(), time.into());
            obj.insert("level".into(), level_name(record).into());
            obj.insert("target".into(), record.target().into());
            obj.insert("msg".into(), record.args().to_string().into());
            if config.add_source {
                if let Some(src) = source(record) {
                    obj.insert("source".into(), src.into());
                }
            }
            for (k, v) in &config.static_fields {
                obj.insert(k.clone(), v.clone().into());
            }
            serde_json::Value::Object(obj).to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> Result<LoggingConfig, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    #[test]
    fn defaults() {
        let cfg = parse("{}").unwrap();
        assert_eq!(cfg, LoggingConfig::default());
        assert_eq!(cfg.level, LevelFilter::Info);
        assert_eq!(cfg.format, LogFormat::Text);
    }

    #[test]
    fn tokens_are_normalized() {
        let cfg = parse("level: \" WARN \"\nformat: JSON\nsink:\n  type: Stdout\n").unwrap();
        assert_eq!(cfg.level, LevelFilter::Warn);
        assert_eq!(cfg.format, LogFormat::Json);
    }

    #[test]
    fn rejects_unknown_level_and_format() {
        assert!(parse("level: verbose").is_err());
        assert!(parse("format: xml").is_err());
    }

    #[test]
    fn rejects_journald_sink() {
        let err = parse("sink:\n  type: journald\n  journald:\n    identifier: poke\n").unwrap_err();
        assert!(err.to_string().contains("journald"), "{}", err);
    }

    #[test]
    fn rejects_unknown_sink() {
        assert!(parse("sink:\n  type: syslog\n").is_err());
    }

    #[test]
    fn text_line_has_static_fields_in_key_order() {
        let cfg = parse("static_fields:\n  service: poke\n  env: prod\n").unwrap();
        let line = render(
            &cfg,
            "T",
            &Record::builder()
                .args(format_args!("listener started"))
                .level(log::Level::Info)
                .target("poke::listener")
                .build(),
        );
        assert_eq!(line, "T info  poke::listener: listener started env=prod service=poke");
    }

    #[test]
    fn json_line_is_one_object() {
        let cfg = parse("format: json\nstatic_fields:\n  service: poke\n").unwrap();
        let line = render(
            &cfg,
            "T",
            &Record::builder()
                .args(format_args!("command {} completed", "uptime"))
                .level(log::Level::Warn)
                .target("poke::dispatch")
                .build(),
        );
        let v: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(v["level"], "warn");
        assert_eq!(v["target"], "poke::dispatch");
        assert_eq!(v["msg"], "command uptime completed");
        assert_eq!(v["service"], "poke");
    }

    #[test]
    fn source_is_added_when_enabled() {
        let cfg = parse("add_source: true").unwrap();
        let line = render(
            &cfg,
            "T",
            &Record::builder()
                .args(format_args!("x"))
                .level(log::Level::Debug)
                .target("poke")
                .file(Some("src/lib.rs"))
                .line(Some(7))
                .build(),
        );
        assert!(line.ends_with("source=src/lib.rs:7"), "{}", line);
    }
}
