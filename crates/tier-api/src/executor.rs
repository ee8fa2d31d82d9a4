use crate::{CommandResult, PermissionStatus, PermissionTier, RunningProcess, ShellIdentity};
use anyhow::Result;
use async_trait::async_trait;

/// The uniform contract every execution tier implements.
///
/// All entry points are async and safe to call off any thread that must
/// stay responsive. Failures are values: `execute` reports problems through
/// [`CommandResult`], not errors — the exceptions are launcher staging
/// (which fails before any process exists) and `start_process` spawn
/// failures, where no result shape applies.
#[async_trait]
pub trait ShellExecutor: Send + Sync {
    /// The tier this backend operates under.
    fn tier(&self) -> PermissionTier;

    /// One-time setup (e.g. staging the launcher binary). Safe to call
    /// repeatedly.
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    /// Whether this backend can work on the current host at all.
    async fn is_available(&self) -> bool;

    /// Current permission state, without side effects.
    async fn permission_status(&self) -> PermissionStatus;

    /// Actively (re-)acquire permission, e.g. re-probe superuser access.
    /// Defaults to reporting the current state.
    async fn request_permission(&self) -> PermissionStatus {
        self.permission_status().await
    }

    /// Run a command to completion and capture its output.
    async fn execute(&self, command: &str, identity: ShellIdentity) -> Result<CommandResult>;

    /// Start an interactive process with live output streams and no
    /// implicit timeout.
    async fn start_process(&self, command: &str) -> Result<RunningProcess>;
}
