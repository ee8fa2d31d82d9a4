//! Device-policy tier: a closed command vocabulary mapped onto
//! device-management actions.
//!
//! Unlike every other tier this one never interprets its input as a
//! shell command. `lock` and `wipe` dispatch to a [`DeviceController`];
//! anything else is reported as unsupported without being attempted.

mod controller;

pub use controller::{DeviceController, SystemController};

use anyhow::Result;
use async_trait::async_trait;
use echelon_common::Settings;
use std::sync::Arc;
use tier_api::{
    CommandResult, ExecError, PermissionStatus, PermissionTier, RunningProcess, ShellExecutor,
    ShellIdentity,
};
use tracing::debug;

pub struct PolicyExecutor {
    controller: Arc<dyn DeviceController>,
}

impl PolicyExecutor {
    pub fn new(settings: &Settings) -> Self {
        Self {
            controller: Arc::new(SystemController::new(settings.device.clone())),
        }
    }

    /// Inject a custom controller (platform integrations, tests).
    pub fn with_controller(controller: Arc<dyn DeviceController>) -> Self {
        Self { controller }
    }
}

#[async_trait]
impl ShellExecutor for PolicyExecutor {
    fn tier(&self) -> PermissionTier {
        PermissionTier::DevicePolicy
    }

    async fn is_available(&self) -> bool {
        self.controller.is_active().await
    }

    async fn permission_status(&self) -> PermissionStatus {
        if self.controller.is_active().await {
            PermissionStatus::granted_with("Device administrator active")
        } else {
            PermissionStatus::denied_with("Device administrator not active")
        }
    }

    async fn execute(&self, command: &str, _identity: ShellIdentity) -> Result<CommandResult> {
        // The vocabulary is exact: a bare verb, nothing else.
        let tokens = echelon_cmdline::tokenize(command).tokens;
        match tokens.as_slice() {
            [verb] if verb.eq_ignore_ascii_case("lock") => self.controller.lock().await,
            [verb] if verb.eq_ignore_ascii_case("wipe") => self.controller.wipe().await,
            _ => {
                debug!(target: "tier_policy", command = %command.trim(), "outside vocabulary");
                Ok(CommandResult::failed(
                    ExecError::UnsupportedCommand(command.trim().to_string()).to_string(),
                ))
            }
        }
    }

    async fn start_process(&self, _command: &str) -> Result<RunningProcess> {
        Err(anyhow::anyhow!(
            "The device-policy tier does not support interactive processes"
        ))
    }
}
