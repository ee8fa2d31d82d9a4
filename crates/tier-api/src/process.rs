use std::io::ErrorKind;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Child;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

const CHUNK_SIZE: usize = 8192;
const CHANNEL_DEPTH: usize = 64;

/// One consumable-once output sequence of a running process.
///
/// Chunks arrive as the process produces them; `None` means end-of-stream
/// (EOF, destruction, or the process exiting). Obtained once from
/// [`RunningProcess::take_stdout`] / [`RunningProcess::take_stderr`].
#[derive(Debug)]
pub struct OutputStream {
    rx: mpsc::Receiver<Vec<u8>>,
}

impl OutputStream {
    pub(crate) fn new(rx: mpsc::Receiver<Vec<u8>>) -> Self {
        Self { rx }
    }

    /// Next chunk of output, or `None` at end of stream.
    pub async fn next_chunk(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }

    /// Drain the stream to completion and return it as lossy UTF-8.
    pub async fn read_to_string(mut self) -> String {
        let mut buf = Vec::new();
        while let Some(chunk) = self.rx.recv().await {
            buf.extend_from_slice(&chunk);
        }
        String::from_utf8_lossy(&buf).into_owned()
    }
}

/// Clonable handle that can destroy a process from another task.
///
/// Destruction is idempotent; a wait pending on the process resolves once
/// the destruction has taken effect.
#[derive(Clone)]
pub struct DestroyHandle {
    cancel: CancellationToken,
}

impl DestroyHandle {
    pub fn destroy(&self) {
        self.cancel.cancel();
    }
}

/// Channel bundle for building a [`RunningProcess`] around a remote or
/// otherwise non-local process. The producer owns the real handle and must:
/// feed `stdout`/`stderr` until end of stream, publish the exit code on
/// `exit` exactly once, and terminate the process when `cancel` fires.
pub struct ProcessChannels {
    pub id: String,
    pub stdout: mpsc::Receiver<Vec<u8>>,
    pub stderr: mpsc::Receiver<Vec<u8>>,
    pub exit: watch::Receiver<Option<i32>>,
    pub cancel: CancellationToken,
}

/// An interactive process owned by its creator.
///
/// Output is exposed as two independent consumable-once streams, each fed by
/// its own pump task; liveness and the final exit code come from a
/// supervisor that owns the underlying handle. There is no implicit timeout:
/// the process runs until it exits or [`RunningProcess::destroy`] is called.
#[derive(Debug)]
pub struct RunningProcess {
    id: String,
    stdout: Option<OutputStream>,
    stderr: Option<OutputStream>,
    exit: watch::Receiver<Option<i32>>,
    cancel: CancellationToken,
}

impl RunningProcess {
    /// Wrap a locally spawned child. The child's stdout/stderr pipes must
    /// still be attached; they are taken over by the pump tasks.
    pub fn from_child(mut child: Child) -> Self {
        let id = format!("prc_{}", Uuid::now_v7());
        let cancel = CancellationToken::new();
        let (exit_tx, exit_rx) = watch::channel(None);

        let stdout = child
            .stdout
            .take()
            .map(|pipe| spawn_pump(pipe, cancel.child_token(), "stdout"));
        let stderr = child
            .stderr
            .take()
            .map(|pipe| spawn_pump(pipe, cancel.child_token(), "stderr"));

        let supervisor_cancel = cancel.clone();
        let supervisor_id = id.clone();
        tokio::spawn(async move {
            let code = tokio::select! {
                status = child.wait() => match status {
                    Ok(status) => exit_code(status),
                    Err(err) => {
                        warn!(target: "tier_api::process", id = %supervisor_id, error = %err, "wait on child failed");
                        -1
                    }
                },
                _ = supervisor_cancel.cancelled() => {
                    if let Err(err) = child.kill().await {
                        // Already exited between cancel and kill.
                        debug!(target: "tier_api::process", id = %supervisor_id, error = %err, "kill after destroy");
                    }
                    match child.wait().await {
                        Ok(status) => exit_code(status),
                        Err(_) => -1,
                    }
                }
            };
            debug!(target: "tier_api::process", id = %supervisor_id, exit = code, "process finished");
            let _ = exit_tx.send(Some(code));
        });

        Self {
            id,
            stdout: stdout.map(OutputStream::new),
            stderr: stderr.map(OutputStream::new),
            exit: exit_rx,
            cancel,
        }
    }

    /// Wrap a process whose handle lives elsewhere (e.g. behind the
    /// privileged broker). See [`ProcessChannels`] for the producer's
    /// obligations.
    pub fn from_channels(channels: ProcessChannels) -> Self {
        Self {
            id: channels.id,
            stdout: Some(OutputStream::new(channels.stdout)),
            stderr: Some(OutputStream::new(channels.stderr)),
            exit: channels.exit,
            cancel: channels.cancel,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Take the stdout stream. Subsequent calls return `None`.
    pub fn take_stdout(&mut self) -> Option<OutputStream> {
        self.stdout.take()
    }

    /// Take the stderr stream. Subsequent calls return `None`.
    pub fn take_stderr(&mut self) -> Option<OutputStream> {
        self.stderr.take()
    }

    /// Whether the process has not yet published an exit code.
    pub fn is_alive(&self) -> bool {
        self.exit.borrow().is_none()
    }

    /// Handle for destroying this process from another task, concurrently
    /// with a pending [`RunningProcess::wait`].
    pub fn destroy_handle(&self) -> DestroyHandle {
        DestroyHandle {
            cancel: self.cancel.clone(),
        }
    }

    /// Terminate the process. Idempotent; resolves any pending wait.
    pub fn destroy(&self) {
        self.cancel.cancel();
    }

    /// Suspend until the process exits or is destroyed; returns the exit
    /// code (`128 + signal` for a signal death, `-1` when none exists).
    pub async fn wait(&mut self) -> i32 {
        match self.exit.wait_for(|code| code.is_some()).await {
            Ok(code) => code.unwrap_or(-1),
            // Publisher dropped without an exit code; treat as destroyed.
            Err(_) => -1,
        }
    }
}

/// Read `reader` to EOF in fixed-size chunks, forwarding each to a bounded
/// channel, until cancelled. Transient interruptions are retried in place.
fn spawn_pump<R>(
    mut reader: R,
    cancel: CancellationToken,
    label: &'static str,
) -> mpsc::Receiver<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
    tokio::spawn(async move {
        let mut chunk = [0u8; CHUNK_SIZE];
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                read = reader.read(&mut chunk) => match read {
                    Ok(0) => break,
                    Ok(n) => {
                        if tx.send(chunk[..n].to_vec()).await.is_err() {
                            // Consumer dropped the stream; stop pumping.
                            break;
                        }
                    }
                    Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                    Err(err) => {
                        warn!(target: "tier_api::process", stream = label, error = %err, "pump read failed");
                        break;
                    }
                },
            }
        }
    });
    rx
}

/// Exit code with signal parity: `128 + signal` for terminated
/// processes, the plain code otherwise.
pub fn exit_code(status: std::process::ExitStatus) -> i32 {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(code) = status.code() {
            code
        } else if let Some(signal) = status.signal() {
            128 + signal
        } else {
            -1
        }
    }
    #[cfg(not(unix))]
    {
        status.code().unwrap_or(-1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Stdio;
    use tokio::process::Command;

    fn spawn(cmd: &str) -> RunningProcess {
        let child = Command::new("sh")
            .arg("-c")
            .arg(cmd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .expect("spawn sh");
        RunningProcess::from_child(child)
    }

    #[tokio::test]
    async fn test_streams_capture_output() {
        let mut process = spawn("printf out; printf err >&2");
        let stdout = process.take_stdout().expect("stdout stream");
        let stderr = process.take_stderr().expect("stderr stream");

        assert_eq!(stdout.read_to_string().await, "out");
        assert_eq!(stderr.read_to_string().await, "err");
        assert_eq!(process.wait().await, 0);
    }

    #[tokio::test]
    async fn test_streams_are_consumable_once() {
        let mut process = spawn("true");
        assert!(process.take_stdout().is_some());
        assert!(process.take_stdout().is_none());
        assert!(process.take_stderr().is_some());
        assert!(process.take_stderr().is_none());
        process.wait().await;
    }

    #[tokio::test]
    async fn test_wait_returns_exit_code() {
        let mut process = spawn("exit 7");
        assert_eq!(process.wait().await, 7);
        assert!(!process.is_alive());
    }

    #[tokio::test]
    async fn test_liveness_flips_on_exit() {
        let mut process = spawn("sleep 5");
        assert!(process.is_alive());
        process.destroy();
        process.wait().await;
        assert!(!process.is_alive());
    }

    #[tokio::test]
    async fn test_destroy_resolves_pending_wait() {
        let mut process = spawn("sleep 30");
        let handle = process.destroy_handle();

        let killer = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            handle.destroy();
        });

        // SIGKILL surfaces as 128 + 9.
        let code = process.wait().await;
        assert_eq!(code, 137);
        killer.await.expect("killer task");
    }

    #[tokio::test]
    async fn test_destroy_is_idempotent() {
        let mut process = spawn("sleep 30");
        process.destroy();
        process.destroy();
        process.destroy_handle().destroy();
        process.wait().await;
    }

    #[tokio::test]
    async fn test_destroy_ends_streams() {
        let mut process = spawn("sleep 30");
        let stdout = process.take_stdout().expect("stdout stream");
        process.destroy();
        assert_eq!(stdout.read_to_string().await, "");
    }

    #[tokio::test]
    async fn test_chunked_streaming_delivers_while_running() {
        let mut process = spawn("printf first; sleep 5");
        let mut stdout = process.take_stdout().expect("stdout stream");

        let chunk = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            stdout.next_chunk(),
        )
        .await
        .expect("chunk before process exit")
        .expect("some output");
        assert_eq!(chunk, b"first");

        process.destroy();
        process.wait().await;
    }
}
