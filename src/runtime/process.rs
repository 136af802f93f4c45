//! Subprocess execution shared by the runtimes
//!
//! Spawns a command with piped stdout/stderr, drains both concurrently,
//! echoes each line to the terminal, and races the child against the
//! cancel signal. Captures are the bytes the child wrote, unmodified.

use std::process::Stdio;

use colored::Colorize;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;

use super::cancel::CancelSignal;
use super::ExecOutput;
use crate::error::RuntimeError;

/// Run a command to completion, capturing its output.
///
/// A non-zero exit is not an error here; the caller decides. If `cancel`
/// fires, the child is killed and `RuntimeError::Cancelled` is returned.
pub async fn run_command(
    mut cmd: Command,
    cancel: &CancelSignal,
) -> Result<ExecOutput, RuntimeError> {
    let program = cmd.as_std().get_program().to_string_lossy().into_owned();

    if cancel.is_cancelled() {
        return Err(RuntimeError::Cancelled);
    }

    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|source| RuntimeError::Spawn {
        program: program.clone(),
        source,
    })?;

    let stdout_handle = child.stdout.take().map(capture_output);
    let stderr_handle = child.stderr.take().map(capture_output);

    let status = tokio::select! {
        status = child.wait() => status.map_err(|e| RuntimeError::Wait {
            program: program.clone(),
            message: e.to_string(),
        })?,
        () = cancel.cancelled() => {
            let _ = child.kill().await;
            for handle in [stdout_handle, stderr_handle].into_iter().flatten() {
                handle.abort();
            }
            return Err(RuntimeError::Cancelled);
        }
    };

    let stdout = join_capture(stdout_handle, &program).await?;
    let stderr = join_capture(stderr_handle, &program).await?;

    Ok(ExecOutput {
        stdout,
        stderr,
        exit_code: status.code(),
    })
}

/// Drain a child pipe to EOF, echoing each line dimmed to stderr.
///
/// The bytes are kept exactly as written. Invalid UTF-8 only affects the
/// echo and the final conversion, never the draining.
fn capture_output<S>(stream: S) -> JoinHandle<String>
where
    S: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut captured = Vec::new();
        let mut line = Vec::new();
        loop {
            line.clear();
            match reader.read_until(b'\n', &mut line).await {
                Ok(0) => break,
                Ok(_) => {
                    let shown = String::from_utf8_lossy(&line);
                    eprintln!("    {}", shown.trim_end_matches(['\n', '\r']).dimmed());
                    captured.extend_from_slice(&line);
                }
                Err(e) => {
                    eprintln!("    {}", format!("output read failed: {e}").yellow());
                    break;
                }
            }
        }
        String::from_utf8_lossy(&captured).into_owned()
    })
}

async fn join_capture(
    handle: Option<JoinHandle<String>>,
    program: &str,
) -> Result<String, RuntimeError> {
    match handle {
        Some(handle) => handle.await.map_err(|e| RuntimeError::Wait {
            program: program.to_string(),
            message: format!("output reader failed: {e}"),
        }),
        None => Ok(String::new()),
    }
}
