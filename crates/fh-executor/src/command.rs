//! Run each job as a shell command.
//!
//! Protocol with the analysis process:
//! - the job payload arrives on stdin, identity in `FH_JOB_ID`,
//!   `FH_JOB_CLASS` and `FH_PROVIDERS` (comma separated);
//! - stdout lines `progress: <message>` become progress reports, any other
//!   stdout is ignored;
//! - a stdout line `provider: <name>` names the upstream a later failure
//!   belongs to;
//! - exit 0 is success, anything else is normalised from stderr.

use async_trait::async_trait;
use fh_core::{Outcome, TaskError};
use std::collections::HashMap;
use std::process::Stdio;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::normalize::from_process_output;
use crate::{JobContext, TaskExecutor};

const PROGRESS_PREFIX: &str = "progress:";
const PROVIDER_PREFIX: &str = "provider:";
/// Stderr kept for error normalisation.
const MAX_STDERR_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct CommandExecutor {
    command: String,
    env: HashMap<String, String>,
}

impl CommandExecutor {
    pub fn new(command: impl Into<String>, env: HashMap<String, String>) -> Self {
        Self {
            command: command.into(),
            env,
        }
    }

    fn build(&self, ctx: &JobContext) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&self.command)
            .envs(&self.env)
            .env("FH_JOB_ID", &ctx.job.id)
            .env("FH_JOB_CLASS", ctx.job.class.as_str())
            .env("FH_PROVIDERS", ctx.job.providers.join(","))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Own process group so cancellation reaches grandchildren.
        // SAFETY: setsid() is async-signal-safe and runs before exec, so no
        // Rust runtime state exists in the child yet.
        #[cfg(unix)]
        unsafe {
            cmd.pre_exec(|| {
                libc::setsid();
                Ok(())
            });
        }
        cmd
    }

    async fn execute(&self, ctx: &JobContext) -> std::io::Result<Outcome> {
        let started = Instant::now();
        let mut child = self.build(ctx).spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            let payload = ctx.job.payload.clone();
            tokio::spawn(async move {
                // A child that never reads stdin closes the pipe; ignore that.
                let _ = stdin.write_all(payload.as_bytes()).await;
                let _ = stdin.shutdown().await;
            });
        }

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("child stdout not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| std::io::Error::other("child stderr not captured"))?;
        let mut stdout_lines = BufReader::new(stdout).lines();
        let mut stderr_lines = BufReader::new(stderr).lines();

        let mut declared_provider: Option<String> = None;
        let mut stderr_output = String::new();
        let mut stdout_done = false;
        let mut stderr_done = false;

        while !stdout_done || !stderr_done {
            tokio::select! {
                _ = ctx.cancel.cancelled() => {
                    debug!(job = %ctx.job.id, "cancelling analysis process");
                    terminate(&mut child).await;
                    return Ok(Outcome::Cancelled);
                }
                line = stdout_lines.next_line(), if !stdout_done => match line {
                    Ok(Some(line)) => {
                        if let Some(message) = line.strip_prefix(PROGRESS_PREFIX) {
                            if let Err(e) = ctx.progress.report(message.trim()).await {
                                warn!(job = %ctx.job.id, error = %e, "failed to record progress");
                            }
                        } else if let Some(name) = line.strip_prefix(PROVIDER_PREFIX) {
                            declared_provider = Some(name.trim().to_string());
                        }
                    }
                    Ok(None) | Err(_) => stdout_done = true,
                },
                line = stderr_lines.next_line(), if !stderr_done => match line {
                    Ok(Some(line)) => {
                        if stderr_output.len() < MAX_STDERR_BYTES {
                            stderr_output.push_str(&line);
                            stderr_output.push('\n');
                        }
                    }
                    Ok(None) | Err(_) => stderr_done = true,
                },
            }
        }

        let status = tokio::select! {
            _ = ctx.cancel.cancelled() => {
                terminate(&mut child).await;
                return Ok(Outcome::Cancelled);
            }
            status = child.wait() => status?,
        };

        if status.success() {
            return Ok(Outcome::Succeeded);
        }
        let exit_code = status.code().unwrap_or_else(|| {
            warn!(job = %ctx.job.id, "analysis terminated by signal, using exit code 1");
            1
        });
        let provider = declared_provider.or_else(|| match ctx.job.providers.as_slice() {
            [only] => Some(only.clone()),
            _ => None,
        });
        Ok(Outcome::Failed(from_process_output(
            provider.as_deref(),
            exit_code,
            &stderr_output,
            started.elapsed(),
        )))
    }
}

/// Kill the child's whole process group, then reap it.
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        // SAFETY: negative pid targets the process group created by setsid()
        // in `build`; SIGKILL cannot be caught.
        unsafe {
            libc::kill(-(pid as libc::pid_t), libc::SIGKILL);
        }
    }
    let _ = child.start_kill();
    let _ = child.wait().await;
}

#[async_trait]
impl TaskExecutor for CommandExecutor {
    async fn run(&self, ctx: JobContext) -> Outcome {
        match self.execute(&ctx).await {
            Ok(outcome) => outcome,
            Err(e) => Outcome::Failed(TaskError::Other {
                message: format!("failed to run analysis command: {e}"),
            }),
        }
    }
}

#[cfg(test)]
#[path = "command_tests.rs"]
mod tests;
