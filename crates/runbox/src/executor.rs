//! Child process execution.
//!
//! One run moves through `Created → Spawned → {Completed | Failed | Cancelled}`:
//! the instrumented script is written to a temp file named after the
//! execution id, the interpreter is spawned on it, both output streams are
//! accumulated in full and the result is recovered with
//! [`protocol::parse`](crate::protocol::parse).

use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tempfile::TempPath;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::execution::{
    ExecuteStats, ExecutionError, ExecutionId, ExecutionOutcome, ExecutionResult, MagicComment,
    ProbeResult,
};
use crate::instrument::InstrumentedScript;
use crate::protocol::{self, Recovery};

/// How the wait for the child ended.
enum Ending {
    Exited(io::Result<ExitStatus>),
    Cancelled,
    TimedOut(Duration),
}

/// Spawns interpreters on instrumented scripts.
#[derive(Debug, Clone)]
pub(crate) struct ProcessExecutor {
    temp_dir: PathBuf,
    timeout: Option<Duration>,
}

impl ProcessExecutor {
    pub(crate) fn new(temp_dir: PathBuf, timeout: Option<Duration>) -> Self {
        Self { temp_dir, timeout }
    }

    /// Run `script` with `interpreter` until it exits, times out or `token`
    /// is cancelled.
    pub(crate) async fn run(
        &self,
        id: ExecutionId,
        script: &InstrumentedScript,
        interpreter: &Path,
        packages_dir: &Path,
        token: &CancellationToken,
    ) -> ExecutionOutcome {
        let language = script.language();
        let profile = language.profile();
        let path = self.temp_dir.join(format!(
            "runbox-{}{}",
            id.simple(),
            profile.script_extension()
        ));

        let write = tokio::fs::write(&path, script.source()).await;
        // Owned from here on so the file goes away on every exit path.
        let script_path = TempPath::from_path(&path);
        if let Err(e) = write {
            tracing::warn!(path = %path.display(), error = %e, "Failed to write script");
            return ExecutionOutcome::Finished(ExecutionResult::from_error(ExecutionError::new(
                format!("Failed to write script to {}: {e}", path.display()),
            )));
        }

        let mut command = Command::new(interpreter);
        command
            .args(profile.interpreter_args())
            .arg(&*script_path)
            .envs(profile.package_env(packages_dir))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let started = Instant::now();
        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                tracing::debug!(
                    interpreter = %interpreter.display(),
                    error = %e,
                    "Failed to spawn interpreter"
                );
                return ExecutionOutcome::Finished(ExecutionResult::from_error(
                    ExecutionError::new(format!(
                        "Failed to start {language} interpreter at {}: {e}",
                        interpreter.display()
                    )),
                ));
            }
        };
        tracing::debug!(pid = ?child.id(), interpreter = %interpreter.display(), "Spawned interpreter");

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let mut stdout_buf = Vec::new();
        let mut stderr_buf = Vec::new();

        let ending = {
            let collect = async {
                tokio::join!(
                    drain(stdout, &mut stdout_buf, "stdout"),
                    drain(stderr, &mut stderr_buf, "stderr"),
                );
                child.wait().await
            };
            let deadline = async {
                match self.timeout {
                    Some(limit) => {
                        tokio::time::sleep(limit).await;
                        limit
                    }
                    None => std::future::pending().await,
                }
            };
            tokio::select! {
                status = collect => Ending::Exited(status),
                () = token.cancelled() => Ending::Cancelled,
                limit = deadline => Ending::TimedOut(limit),
            }
        };

        let (exit_code, timed_out) = match ending {
            Ending::Exited(Ok(status)) => (status.code(), None),
            Ending::Exited(Err(e)) => {
                tracing::warn!(error = %e, "Failed to wait for interpreter");
                (None, None)
            }
            Ending::Cancelled => {
                kill(&mut child).await;
                tracing::debug!("Execution cancelled, discarding output");
                return ExecutionOutcome::Cancelled;
            }
            Ending::TimedOut(limit) => {
                kill(&mut child).await;
                tracing::debug!(timeout = ?limit, "Execution timed out");
                (None, Some(limit))
            }
        };
        let collected = Collected {
            stdout: String::from_utf8_lossy(&stdout_buf).into_owned(),
            stderr: String::from_utf8_lossy(&stderr_buf).into_owned(),
            exit_code,
            timed_out,
            duration: started.elapsed(),
        };
        let (outcome, rejected) = finish(script, &collected, token);

        if rejected {
            match script_path.keep() {
                Ok(kept) => tracing::warn!(
                    path = %kept.display(),
                    "Interpreter rejected the script, keeping it for inspection"
                ),
                Err(e) => tracing::warn!(error = %e, "Failed to keep rejected script"),
            }
        }
        outcome
    }
}

/// Everything a child left behind once it exited or was killed.
#[derive(Debug)]
struct Collected {
    stdout: String,
    stderr: String,
    exit_code: Option<i32>,
    timed_out: Option<Duration>,
    duration: Duration,
}

/// Turn collected streams into the delivered outcome. The flag is set when
/// the interpreter appears to have rejected the script outright.
fn finish(
    script: &InstrumentedScript,
    collected: &Collected,
    token: &CancellationToken,
) -> (ExecutionOutcome, bool) {
    let profile = script.language().profile();
    let (mut result, recovery) =
        protocol::parse(&collected.stdout, &collected.stderr, profile.sentinels());
    tracing::debug!(
        exit_code = ?collected.exit_code,
        duration = ?collected.duration,
        ?recovery,
        "Interpreter finished"
    );

    // A result that raced with a cancel is never delivered.
    if token.is_cancelled() {
        return (ExecutionOutcome::Cancelled, false);
    }

    // Keep an error the payload reported; replace one the ladder made up.
    if let Some(limit) = collected.timed_out
        && (result.error.is_none()
            || !matches!(recovery, Recovery::Sentinel | Recovery::EmbeddedPayload))
    {
        result.error = Some(ExecutionError::new(format!(
            "Execution timed out after {}ms",
            limit.as_millis()
        )));
    }
    reconcile_probes(&mut result.probes, script.probes());
    result.stats = Some(ExecuteStats {
        duration: collected.duration,
        exit_code: collected.exit_code,
    });

    let rejected = recovery != Recovery::Sentinel
        && profile
            .fatal_parse_markers()
            .iter()
            .any(|marker| collected.stderr.contains(marker));
    (ExecutionOutcome::Finished(result), rejected)
}

async fn drain<R: AsyncRead + Unpin>(stream: Option<R>, buf: &mut Vec<u8>, name: &str) {
    let Some(mut stream) = stream else {
        return;
    };
    if let Err(e) = stream.read_to_end(buf).await {
        tracing::warn!(stream = name, error = %e, "Failed to read interpreter output");
    }
}

async fn kill(child: &mut tokio::process::Child) {
    if let Err(e) = child.kill().await {
        tracing::warn!(error = %e, "Failed to kill interpreter");
    }
}

/// Sort probes by line and make every requested line appear exactly once.
fn reconcile_probes(probes: &mut Vec<ProbeResult>, requested: &[MagicComment]) {
    for comment in requested {
        if !probes.iter().any(|probe| probe.line == comment.line) {
            probes.push(ProbeResult::unevaluated(comment));
        }
    }
    probes.sort_by_key(|probe| probe.line);
    probes.dedup_by_key(|probe| probe.line);
}
