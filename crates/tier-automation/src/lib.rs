//! Automation-tier stand-in.
//!
//! The automation engine can drive UI flows but has no shell of its own,
//! so every command is answered with a fixed failure instead of being
//! attempted. The tier still participates in availability listings: the
//! embedding engine flips [`AutomationExecutor::set_connected`] when its
//! session comes and goes.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use tier_api::{
    CommandResult, PermissionStatus, PermissionTier, RunningProcess, ShellExecutor, ShellIdentity,
};
use tracing::debug;

const CANNOT_EXECUTE: &str = "The automation service cannot directly execute shell commands";

pub struct AutomationExecutor {
    connected: AtomicBool,
}

impl AutomationExecutor {
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(false),
        }
    }

    /// Called by the embedding automation engine when its session
    /// connects or drops.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl Default for AutomationExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ShellExecutor for AutomationExecutor {
    fn tier(&self) -> PermissionTier {
        PermissionTier::Automation
    }

    async fn is_available(&self) -> bool {
        self.is_connected()
    }

    async fn permission_status(&self) -> PermissionStatus {
        if self.is_connected() {
            PermissionStatus::granted_with("Automation service connected")
        } else {
            PermissionStatus::denied_with("Automation service not connected")
        }
    }

    async fn execute(&self, command: &str, _identity: ShellIdentity) -> Result<CommandResult> {
        debug!(target: "tier_automation", command_len = command.len(), "rejecting shell command");
        Ok(CommandResult::failed(CANNOT_EXECUTE))
    }

    async fn start_process(&self, _command: &str) -> Result<RunningProcess> {
        Err(anyhow::anyhow!(CANNOT_EXECUTE))
    }
}
