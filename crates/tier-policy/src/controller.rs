use anyhow::Result;
use async_trait::async_trait;
use echelon_common::settings::DeviceSettings;
use std::process::Stdio;
use tier_api::{exit_code, CommandResult, ExecError};
use tokio::process::Command;
use tracing::info;

/// Device-management actions the policy tier can perform.
///
/// The executor never passes raw command strings through this seam; it
/// dispatches the closed vocabulary onto these methods.
#[async_trait]
pub trait DeviceController: Send + Sync {
    /// Whether the controller currently holds device-management rights.
    async fn is_active(&self) -> bool;

    async fn lock(&self) -> Result<CommandResult>;

    async fn wipe(&self) -> Result<CommandResult>;
}

/// Controller shipping with the policy tier: each verb maps to a host
/// command configured under `[device]`. A verb without a configured
/// command reports failure without running anything.
pub struct SystemController {
    device: DeviceSettings,
}

impl SystemController {
    pub fn new(device: DeviceSettings) -> Self {
        Self { device }
    }

    async fn run_configured(&self, verb: &str, configured: Option<&str>) -> CommandResult {
        let Some(command) = configured else {
            return CommandResult::failed(format!("No {verb} command configured"));
        };

        info!(target: "tier_policy", verb, "running device command");

        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await;

        match output {
            Ok(output) => {
                let code = exit_code(output.status);
                CommandResult::new(
                    code == 0,
                    String::from_utf8_lossy(&output.stdout).into_owned(),
                    String::from_utf8_lossy(&output.stderr).into_owned(),
                    code,
                )
            }
            Err(err) => {
                CommandResult::failed(ExecError::ProcessCreation(err.to_string()).to_string())
            }
        }
    }
}

#[async_trait]
impl DeviceController for SystemController {
    async fn is_active(&self) -> bool {
        self.device.lock_command.is_some() || self.device.wipe_command.is_some()
    }

    async fn lock(&self) -> Result<CommandResult> {
        Ok(self
            .run_configured("lock", self.device.lock_command.as_deref())
            .await)
    }

    async fn wipe(&self) -> Result<CommandResult> {
        Ok(self
            .run_configured("wipe", self.device.wipe_command.as_deref())
            .await)
    }
}
