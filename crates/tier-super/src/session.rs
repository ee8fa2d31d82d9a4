//! Long-lived elevated shell session.
//!
//! One driver task owns the shell child and serializes jobs off an mpsc
//! queue. Each job writes the command line followed by two sentinel prints
//! (stdout carries the exit code, stderr just marks the boundary), then
//! drains both streams up to their sentinels. Background jobs run the same
//! way; nobody waits on their reply.

use anyhow::{Context, Result};
use std::process::Stdio;
use tier_api::NO_PROCESS_EXIT;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;
use uuid::Uuid;

const JOB_QUEUE_DEPTH: usize = 16;

/// Captured output and exit code of one session job.
pub(crate) type SessionReply = (String, String, i32);

pub(crate) struct SessionJob {
    pub line: String,
    /// `None` for fire-and-forget jobs.
    pub reply: Option<oneshot::Sender<SessionReply>>,
}

/// Handle to a running session driver.
pub(crate) struct Session {
    jobs: mpsc::Sender<SessionJob>,
}

impl Session {
    /// Spawn the elevated shell and its driver task.
    pub fn start(su_binary: &str) -> Result<Self> {
        let mut child = Command::new(su_binary)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to create process: {su_binary}"))?;

        let stdin = child.stdin.take().context("elevated shell has no stdin")?;
        let stdout = child.stdout.take().context("elevated shell has no stdout")?;
        let stderr = child.stderr.take().context("elevated shell has no stderr")?;

        let (jobs_tx, jobs_rx) = mpsc::channel(JOB_QUEUE_DEPTH);
        tokio::spawn(drive(child, stdin, stdout, stderr, jobs_rx));
        debug!(target: "tier_super::session", su = %su_binary, "started elevated session");

        Ok(Self { jobs: jobs_tx })
    }

    /// Hand a job to the driver; gives the job back if the driver is gone.
    pub async fn submit(&self, job: SessionJob) -> Result<(), SessionJob> {
        self.jobs.send(job).await.map_err(|err| err.0)
    }
}

async fn drive(
    mut child: Child,
    mut stdin: ChildStdin,
    stdout: ChildStdout,
    stderr: ChildStderr,
    mut jobs: mpsc::Receiver<SessionJob>,
) {
    let mut stdout_lines = BufReader::new(stdout).lines();
    let mut stderr_lines = BufReader::new(stderr).lines();

    while let Some(job) = jobs.recv().await {
        let marker = format!("__echelon_done_{}_", Uuid::now_v7().simple());
        let script = format!(
            "{}\nprintf '{marker}%s\\n' \"$?\"\nprintf '{marker}\\n' >&2\n",
            job.line
        );
        if stdin.write_all(script.as_bytes()).await.is_err() {
            // Shell is gone; dropping the reply sender tells the caller.
            break;
        }

        let ((stdout_buf, code), stderr_buf) = tokio::join!(
            drain_stdout(&mut stdout_lines, &marker),
            drain_stderr(&mut stderr_lines, &marker),
        );
        if let Some(reply) = job.reply {
            let _ = reply.send((stdout_buf, stderr_buf, code));
        }
        if code == NO_PROCESS_EXIT {
            debug!(target: "tier_super::session", "elevated shell ended mid-job");
            break;
        }
    }

    let _ = child.kill().await;
    let _ = child.wait().await;
}

/// Collect stdout lines up to the sentinel; the sentinel's suffix is the
/// job's exit code. When the job's output does not end in a newline the
/// sentinel lands mid-line, so it is matched anywhere and the prefix kept
/// as the final unterminated chunk. EOF before the sentinel means the
/// shell died.
async fn drain_stdout(
    lines: &mut Lines<BufReader<ChildStdout>>,
    marker: &str,
) -> (String, i32) {
    let mut buf = String::new();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if let Some(at) = line.find(marker) {
                    buf.push_str(&line[..at]);
                    let code = line[at + marker.len()..].parse().unwrap_or(NO_PROCESS_EXIT);
                    return (buf, code);
                }
                buf.push_str(&line);
                buf.push('\n');
            }
            Ok(None) | Err(_) => return (buf, NO_PROCESS_EXIT),
        }
    }
}

async fn drain_stderr(lines: &mut Lines<BufReader<ChildStderr>>, marker: &str) -> String {
    let mut buf = String::new();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if let Some(at) = line.find(marker) {
                    buf.push_str(&line[..at]);
                    return buf;
                }
                buf.push_str(&line);
                buf.push('\n');
            }
            Ok(None) | Err(_) => return buf,
        }
    }
}
