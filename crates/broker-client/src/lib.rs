//! Client for the privileged command broker.
//!
//! The broker is an external daemon listening on a Unix socket. One control
//! connection per client carries spawn/kill/ping round-trips; each spawned
//! process gets its own stream connection for stdio. The broker's identity
//! (its credential for cache keying) is the owner uid of its control
//! socket.

use broker_api::{codec, BrokerError, ControlRequest, ControlResponse, SpawnSpec, StreamRequest};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::net::UnixStream;
use tokio::sync::Mutex;
use tracing::{debug, warn};

mod process;
pub mod retry;

pub use process::RemoteProcess;
pub use retry::RetryConfig;

/// Ceiling on a liveness probe round-trip. Probes run before every
/// execution, so a hung broker must read as dead quickly.
const PING_TIMEOUT: Duration = Duration::from_secs(2);

/// Credential id of the broker behind `socket_path`: the socket file's
/// owner uid. Fails when the socket does not exist.
pub fn service_credential(socket_path: &Path) -> Result<u32, BrokerError> {
    use std::os::unix::fs::MetadataExt;
    let metadata = std::fs::metadata(socket_path)?;
    Ok(metadata.uid())
}

/// Connected client for one broker daemon.
pub struct BrokerClient {
    socket_path: PathBuf,
    uid: u32,
    control: Mutex<UnixStream>,
    retry: RetryConfig,
}

impl BrokerClient {
    /// Connect to the broker's control socket and capture its credential.
    pub async fn connect(socket_path: &Path) -> Result<Self, BrokerError> {
        Self::connect_with_retry_config(socket_path, RetryConfig::default()).await
    }

    /// Connect with an explicit stream-read retry policy.
    pub async fn connect_with_retry_config(
        socket_path: &Path,
        retry: RetryConfig,
    ) -> Result<Self, BrokerError> {
        let uid = service_credential(socket_path)?;
        let control = UnixStream::connect(socket_path).await?;
        debug!(target: "broker_client", socket = %socket_path.display(), uid, "connected to broker");
        Ok(Self {
            socket_path: socket_path.to_path_buf(),
            uid,
            control: Mutex::new(control),
            retry,
        })
    }

    /// Owner uid of the broker socket, captured at connect time.
    pub fn uid(&self) -> u32 {
        self.uid
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// One control round-trip. The control connection is serialized; the
    /// broker answers every request with exactly one response.
    async fn request(&self, request: &ControlRequest) -> Result<ControlResponse, BrokerError> {
        let mut control = self.control.lock().await;
        codec::write_frame(&mut *control, request).await?;
        codec::read_frame(&mut *control).await
    }

    /// Cheap liveness probe; returns the broker's reported uid.
    ///
    /// Any failure (transport gone, timeout, unexpected answer) means the
    /// connection is dead and should be evicted.
    pub async fn ping(&self) -> Result<u32, BrokerError> {
        let response = tokio::time::timeout(PING_TIMEOUT, self.request(&ControlRequest::Ping))
            .await
            .map_err(|_| BrokerError::Service("ping timed out".to_string()))??;
        match response {
            ControlResponse::Pong { uid, version } => {
                if version != broker_api::PROTOCOL_VERSION {
                    warn!(
                        target: "broker_client",
                        ours = broker_api::PROTOCOL_VERSION,
                        theirs = version,
                        "broker speaks a different protocol revision"
                    );
                }
                Ok(uid)
            }
            ControlResponse::Error { message } => Err(BrokerError::Service(message)),
            other => Err(BrokerError::Protocol(format!(
                "unexpected response to ping: {other:?}"
            ))),
        }
    }

    /// Ask the broker to create a process; returns its id.
    pub async fn spawn(&self, spec: SpawnSpec) -> Result<String, BrokerError> {
        match self.request(&ControlRequest::Spawn { spec }).await? {
            ControlResponse::Spawned { id } => Ok(id),
            ControlResponse::Error { message } => Err(BrokerError::Service(message)),
            other => Err(BrokerError::Protocol(format!(
                "unexpected response to spawn: {other:?}"
            ))),
        }
    }

    /// Terminate a broker-side process.
    pub async fn kill(&self, id: &str) -> Result<(), BrokerError> {
        match self
            .request(&ControlRequest::Kill { id: id.to_string() })
            .await?
        {
            ControlResponse::Killed { .. } => Ok(()),
            ControlResponse::Error { message } => Err(BrokerError::Service(message)),
            other => Err(BrokerError::Protocol(format!(
                "unexpected response to kill: {other:?}"
            ))),
        }
    }

    /// Open the stream connection for a spawned process's stdio.
    pub async fn attach(&self, id: &str) -> Result<RemoteProcess, BrokerError> {
        let mut stream = UnixStream::connect(&self.socket_path).await?;
        codec::write_frame(
            &mut stream,
            &StreamRequest::Attach { id: id.to_string() },
        )
        .await?;
        Ok(RemoteProcess::new(
            id.to_string(),
            stream,
            self.retry.clone(),
        ))
    }
}
