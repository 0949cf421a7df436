//! Binary executor: run `args[0]` with `args[1..]` as an OS process.
//! No shell is involved; arguments are passed as a list.

use async_trait::async_trait;
use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Child;
use tokio_util::sync::CancellationToken;

use super::{Command, ExecError, ExecutionResult, Executor};

const READ_CHUNK: usize = 8 * 1024;

/// Spawns each command as a child process with a freshly built environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryExecutor;

enum Outcome {
    Finished(io::Result<ExitStatus>),
    TimedOut,
    Canceled,
}

#[async_trait]
impl Executor for BinaryExecutor {
    async fn execute(&self, cancel: &CancellationToken, command: &Command) -> ExecutionResult {
        let label = command.label();
        log::info!("start command {}", label);

        // Execution scope: canceled with the parent and on every return path below.
        let scope = cancel.child_token();
        let _scope_guard = scope.clone().drop_guard();

        let Some((program, rest)) = command.args.split_first() else {
            log::warn!("invalid command {}: no arguments", label);
            return ExecutionResult::unfinished(Vec::new(), ExecError::InvalidCommand { label });
        };

        let env = command.env.resolve();
        log::debug!(
            "exec {} argv={:?} env_strategy={} env_len={}",
            label,
            command.args,
            command.env.strategy.as_str(),
            env.len()
        );

        let spawned = tokio::process::Command::new(program)
            .args(rest)
            .env_clear()
            .envs(env.iter())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();
        let mut child = match spawned {
            Ok(c) => c,
            Err(e) => {
                log::warn!("failed to execute {}: {}", label, e);
                return ExecutionResult::unfinished(
                    Vec::new(),
                    ExecError::Spawn { label, source: e },
                );
            }
        };

        let mut output = Vec::new();
        let outcome = tokio::select! {
            status = capture(&mut child, &mut output) => Outcome::Finished(status),
            _ = deadline(command.timeout) => Outcome::TimedOut,
            _ = scope.cancelled() => Outcome::Canceled,
        };

        match outcome {
            Outcome::Finished(Ok(status)) => finished(label, output, status),
            Outcome::Finished(Err(e)) => {
                kill(&mut child, &label).await;
                log::warn!("failed to collect output of {}: {}", label, e);
                ExecutionResult::unfinished(output, ExecError::Io { label, source: e })
            }
            Outcome::TimedOut => {
                if let Some(status) = exited(&mut child) {
                    log::warn!(
                        "command {} exited but its output stayed open past {:?}",
                        label,
                        command.timeout
                    );
                    return finished(label, output, status);
                }
                kill(&mut child, &label).await;
                log::warn!("command {} timed out after {:?}", label, command.timeout);
                ExecutionResult::unfinished(
                    output,
                    ExecError::TimedOut {
                        label,
                        timeout: command.timeout,
                    },
                )
            }
            Outcome::Canceled => {
                if let Some(status) = exited(&mut child) {
                    log::warn!("command {} exited but its output stayed open until cancel", label);
                    return finished(label, output, status);
                }
                kill(&mut child, &label).await;
                log::warn!("command {} canceled", label);
                ExecutionResult::unfinished(output, ExecError::Canceled { label })
            }
        }
    }
}

fn finished(label: String, output: Vec<u8>, status: ExitStatus) -> ExecutionResult {
    match status.code() {
        Some(0) => {
            log::info!("exit 0 for {}", label);
            ExecutionResult::exited(output, 0, None)
        }
        Some(code) => {
            log::info!("exit {} for {}", code, label);
            ExecutionResult::exited(output, code, Some(ExecError::NonZeroExit { label, code }))
        }
        None => {
            let signal = exit_signal(&status);
            log::warn!("command {} terminated by signal {:?}", label, signal);
            ExecutionResult::unfinished(output, ExecError::Signaled { label, signal })
        }
    }
}

#[cfg(unix)]
fn exit_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &ExitStatus) -> Option<i32> {
    None
}

/// Resolves after `timeout`; never resolves for a zero timeout.
async fn deadline(timeout: Duration) {
    if timeout.is_zero() {
        std::future::pending::<()>().await;
    } else {
        tokio::time::sleep(timeout).await;
    }
}

/// Read stdout and stderr into `output` in arrival order, then reap the child.
async fn capture(child: &mut Child, output: &mut Vec<u8>) -> io::Result<ExitStatus> {
    let mut stdout = child.stdout.take();
    let mut stderr = child.stderr.take();
    let mut out_buf = vec![0u8; READ_CHUNK];
    let mut err_buf = vec![0u8; READ_CHUNK];

    while stdout.is_some() || stderr.is_some() {
        tokio::select! {
            n = read_chunk(&mut stdout, &mut out_buf) => match n? {
                0 => stdout = None,
                n => output.extend_from_slice(&out_buf[..n]),
            },
            n = read_chunk(&mut stderr, &mut err_buf) => match n? {
                0 => stderr = None,
                n => output.extend_from_slice(&err_buf[..n]),
            },
        }
    }
    child.wait().await
}

/// Read from an open pipe; a closed pipe (`None`) never resolves.
async fn read_chunk<R>(pipe: &mut Option<R>, buf: &mut [u8]) -> io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    match pipe {
        Some(r) => r.read(buf).await,
        None => std::future::pending().await,
    }
}

/// Exit status of a child that already terminated. Output pipes may still be
/// held open by processes it left behind.
fn exited(child: &mut Child) -> Option<ExitStatus> {
    child.try_wait().ok().flatten()
}

/// Kill and reap; the process must not outlive the execution scope.
async fn kill(child: &mut Child, label: &str) {
    if let Err(e) = child.kill().await {
        log::warn!("failed to kill {}: {}", label, e);
    }
}
