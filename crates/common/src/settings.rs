use crate::paths;
use crate::policy::CommandPolicy;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

/// Selects how the superuser tier drives its elevated shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuStrategy {
    /// One long-lived elevated shell; commands are enqueued as jobs.
    Session,
    /// A fresh elevated shell per command.
    Raw,
}

impl SuStrategy {
    /// Convert strategy to its canonical string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Session => "session",
            Self::Raw => "raw",
        }
    }

    /// Parse a strategy string (case-insensitive).
    pub fn parse(value: &str) -> Option<Self> {
        value.parse().ok()
    }
}

impl FromStr for SuStrategy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "session" => Ok(Self::Session),
            "raw" => Ok(Self::Raw),
            other => Err(format!("invalid superuser strategy: {}", other)),
        }
    }
}

impl fmt::Display for SuStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Workspace-wide settings, loaded from `$ECHELON_HOME/config.toml`.
///
/// A missing file yields the defaults; a malformed file is an error. Env
/// overrides (`ECHELON_BROKER_SOCKET`, `ECHELON_SU_STRATEGY`) win over the
/// file in either case.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub execution: ExecutionSettings,
    pub superuser: SuperuserSettings,
    pub device: DeviceSettings,
    pub broker: BrokerSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutionSettings {
    /// Wall-clock limit for one-shot commands in the unprivileged tier.
    pub timeout_secs: u64,
    /// Command families for which exit code 1 still counts as success.
    pub lenient_families: Vec<String>,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            lenient_families: CommandPolicy::default_families(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SuperuserSettings {
    pub strategy: SuStrategy,
    /// Elevation binary spawned to obtain a superuser shell.
    pub su_binary: String,
}

impl Default for SuperuserSettings {
    fn default() -> Self {
        Self {
            strategy: SuStrategy::Session,
            su_binary: "su".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    /// Command invoked for the device-policy `lock` verb.
    pub lock_command: Option<String>,
    /// Command invoked for the device-policy `wipe` verb.
    pub wipe_command: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BrokerSettings {
    /// Control socket of the privileged command broker. Defaults to
    /// `$ECHELON_HOME/sock/broker.sock`.
    pub socket: Option<PathBuf>,
}

impl Settings {
    /// Load settings from the standard config file location.
    pub fn load() -> Result<Self> {
        let path = paths::config_file()?;
        let mut settings = if path.exists() {
            Self::load_from(&path)?
        } else {
            debug!(target: "echelon_common::settings", path = %path.display(), "no config file, using defaults");
            Self::default()
        };
        settings.apply_env_overrides();
        Ok(settings)
    }

    /// Load settings from an explicit file path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file: {}", path.display()))
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(socket) = std::env::var("ECHELON_BROKER_SOCKET") {
            if !socket.trim().is_empty() {
                self.broker.socket = Some(PathBuf::from(socket.trim()));
            }
        }
        if let Ok(strategy) = std::env::var("ECHELON_SU_STRATEGY") {
            match strategy.parse() {
                Ok(parsed) => self.superuser.strategy = parsed,
                Err(err) => {
                    debug!(target: "echelon_common::settings", %err, "ignoring ECHELON_SU_STRATEGY")
                }
            }
        }
    }

    /// Success-classification policy built from the configured families.
    pub fn command_policy(&self) -> CommandPolicy {
        CommandPolicy::new(self.execution.lenient_families.clone())
    }

    /// Broker control-socket path, configured or defaulted.
    pub fn broker_socket(&self) -> Result<PathBuf> {
        match &self.broker.socket {
            Some(path) => Ok(path.clone()),
            None => paths::broker_socket(),
        }
    }
}
