//! Shell command execution with a hard timeout and external cancellation.
//!
//! Commands run through `sh -c`; stdout and stderr are captured
//! separately. On timeout or cancel the child is killed and the partial
//! output is returned inside the error.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::AsyncReadExt;
use tokio::process::Command;

use tether_domain::CancelToken;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Working directory; inherits the parent's when unset.
    pub dir: Option<PathBuf>,
    /// Extra environment merged over the parent environment.
    pub env: HashMap<String, String>,
    pub timeout: Duration,
    pub cancel: CancelToken,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            dir: None,
            env: HashMap::new(),
            timeout: DEFAULT_TIMEOUT,
            cancel: CancelToken::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

#[derive(thiserror::Error, Debug)]
pub enum CommandError {
    #[error("command exited with status {}", output.exit_code)]
    ExitStatus { output: CommandOutput },

    #[error("command timed out after {timeout_ms} ms")]
    TimedOut {
        output: CommandOutput,
        timeout_ms: u64,
    },

    #[error("command canceled")]
    Canceled { output: CommandOutput },

    #[error("failed to spawn: {0}")]
    Spawn(#[from] std::io::Error),
}

impl CommandError {
    /// The partial or full output, when the command got far enough to
    /// produce one.
    pub fn output(&self) -> Option<&CommandOutput> {
        match self {
            CommandError::ExitStatus { output }
            | CommandError::TimedOut { output, .. }
            | CommandError::Canceled { output } => Some(output),
            CommandError::Spawn(_) => None,
        }
    }
}

/// Run `cmd` through a shell. A zero exit yields `Ok`; everything else is
/// a [`CommandError`] carrying whatever output was captured.
pub async fn run_command(cmd: &str, opts: RunOptions) -> Result<CommandOutput, CommandError> {
    let started = Instant::now();

    let mut command = Command::new("sh");
    command.arg("-c").arg(cmd);
    command.stdin(Stdio::null());
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());
    command.kill_on_drop(true);
    if let Some(dir) = &opts.dir {
        command.current_dir(dir);
    }
    for (k, v) in &opts.env {
        command.env(k, v);
    }

    let mut child = command.spawn()?;
    let mut stdout_pipe = child.stdout.take();
    let mut stderr_pipe = child.stderr.take();

    let stdout_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(pipe) = stdout_pipe.as_mut() {
            let _ = pipe.read_to_end(&mut buf).await;
        }
        String::from_utf8_lossy(&buf).into_owned()
    });
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(pipe) = stderr_pipe.as_mut() {
            let _ = pipe.read_to_end(&mut buf).await;
        }
        String::from_utf8_lossy(&buf).into_owned()
    });

    enum Outcome {
        Exited(std::process::ExitStatus),
        TimedOut,
        Canceled,
    }

    let outcome = tokio::select! {
        status = child.wait() => Outcome::Exited(status?),
        _ = tokio::time::sleep(opts.timeout) => Outcome::TimedOut,
        _ = opts.cancel.cancelled() => Outcome::Canceled,
    };

    if !matches!(outcome, Outcome::Exited(_)) {
        let _ = child.kill().await;
        let _ = child.wait().await;
    }

    let stdout = stdout_task.await.unwrap_or_default();
    let stderr = stderr_task.await.unwrap_or_default();
    let duration_ms = started.elapsed().as_millis() as u64;

    match outcome {
        Outcome::Exited(status) => {
            let exit_code = status.code().unwrap_or(-1);
            let output = CommandOutput {
                exit_code,
                stdout,
                stderr,
                duration_ms,
            };
            if exit_code == 0 {
                Ok(output)
            } else {
                Err(CommandError::ExitStatus { output })
            }
        }
        Outcome::TimedOut => Err(CommandError::TimedOut {
            output: CommandOutput {
                exit_code: -1,
                stdout,
                stderr,
                duration_ms,
            },
            timeout_ms: opts.timeout.as_millis() as u64,
        }),
        Outcome::Canceled => Err(CommandError::Canceled {
            output: CommandOutput {
                exit_code: -1,
                stdout,
                stderr,
                duration_ms,
            },
        }),
    }
}
