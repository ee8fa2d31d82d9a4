use broker_api::BrokerError;
use broker_client::{service_credential, BrokerClient, RetryConfig};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Connection reuse across executions, keyed by the daemon's credential.
///
/// The broker can be restarted, or replaced by one running as a different
/// user, between two commands. Before every execution the cache resolves
/// the socket's current owner uid, pings any cached client under that
/// uid, and either reuses it or replaces it with a fresh connection.
pub struct ConnectionCache {
    socket_path: PathBuf,
    retry: RetryConfig,
    entries: Mutex<HashMap<u32, Arc<BrokerClient>>>,
}

impl ConnectionCache {
    pub fn new(socket_path: PathBuf) -> Self {
        Self::with_retry_config(socket_path, RetryConfig::default())
    }

    pub fn with_retry_config(socket_path: PathBuf, retry: RetryConfig) -> Self {
        Self {
            socket_path,
            retry,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// A live client for the daemon currently behind the socket.
    ///
    /// The map lock is held across the probe so evict-and-reconnect is
    /// atomic per credential.
    pub async fn client(&self) -> Result<Arc<BrokerClient>, BrokerError> {
        let uid = service_credential(&self.socket_path)?;
        let mut entries = self.entries.lock().await;

        if let Some(existing) = entries.get(&uid) {
            if existing.ping().await.is_ok() {
                return Ok(existing.clone());
            }
            debug!(target: "tier_ipc::cache", uid, "cached broker connection is dead, evicting");
            entries.remove(&uid);
        }

        let fresh = Arc::new(
            BrokerClient::connect_with_retry_config(&self.socket_path, self.retry.clone()).await?,
        );
        entries.insert(uid, fresh.clone());
        Ok(fresh)
    }

    /// Number of cached connections, live or not.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop every cached connection.
    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }
}
