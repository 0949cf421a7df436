//! Outcome of one command execution.

use std::borrow::Cow;
use std::time::Duration;

/// Exit code reported when the process never reached a terminal state of its
/// own (rejected before spawn, failed to start, killed, or signaled).
pub const EXIT_CODE_UNSET: i32 = -1;

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("command {label} has no arguments")]
    InvalidCommand { label: String },
    #[error("command {label} failed to execute: {source}")]
    Spawn {
        label: String,
        #[source]
        source: std::io::Error,
    },
    #[error("command {label} failed while collecting output: {source}")]
    Io {
        label: String,
        #[source]
        source: std::io::Error,
    },
    #[error("command {label} timed out after {timeout:?}")]
    TimedOut { label: String, timeout: Duration },
    #[error("command {label} canceled by shutdown")]
    Canceled { label: String },
    #[error("command {label} terminated by signal {}", signal_name(.signal))]
    Signaled { label: String, signal: Option<i32> },
    #[error("command {label} exited with status {code}")]
    NonZeroExit { label: String, code: i32 },
}

fn signal_name(signal: &Option<i32>) -> String {
    signal.map_or_else(|| "unknown".to_string(), |s| s.to_string())
}

/// Combined stdout+stderr, exit code and error of one run.
///
/// Check `exit_code` and `error` together: `exit_code == -1` means the command
/// could not run to completion, a real non-zero code with `NonZeroExit` means
/// it ran and failed.
#[derive(Debug)]
pub struct ExecutionResult {
    pub output: Vec<u8>,
    pub exit_code: i32,
    pub error: Option<ExecError>,
}

impl ExecutionResult {
    /// The process did not produce exit information.
    pub fn unfinished(output: Vec<u8>, error: ExecError) -> Self {
        Self {
            output,
            exit_code: EXIT_CODE_UNSET,
            error: Some(error),
        }
    }

    /// The process exited on its own with `code`.
    pub fn exited(output: Vec<u8>, code: i32, error: Option<ExecError>) -> Self {
        Self {
            output,
            exit_code: code,
            error,
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0 && self.error.is_none()
    }

    /// True when the process reached a terminal state with a real exit code.
    pub fn finished(&self) -> bool {
        self.exit_code != EXIT_CODE_UNSET
    }

    pub fn output_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.output)
    }
}
