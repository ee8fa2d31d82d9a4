use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Privilege tiers, ordered from least to most capable.
///
/// The ordering exists for display and escalation listings only; no backend
/// compares tiers to make privilege decisions.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum PermissionTier {
    /// Plain process spawn with the caller's own privileges.
    Standard,
    /// Automation-service stand-in; cannot run real shell commands.
    Automation,
    /// Device-policy controller with a closed command vocabulary.
    DevicePolicy,
    /// Out-of-process privileged command broker reached over IPC.
    Privileged,
    /// Elevated shell obtained through a superuser binary.
    Superuser,
}

impl PermissionTier {
    /// All tiers in escalation order.
    pub const ALL: [PermissionTier; 5] = [
        Self::Standard,
        Self::Automation,
        Self::DevicePolicy,
        Self::Privileged,
        Self::Superuser,
    ];

    /// Convert tier to its canonical string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Automation => "automation",
            Self::DevicePolicy => "device-policy",
            Self::Privileged => "privileged",
            Self::Superuser => "superuser",
        }
    }

    /// Parse a tier string (case-insensitive).
    pub fn parse(value: &str) -> Option<Self> {
        value.parse().ok()
    }
}

impl FromStr for PermissionTier {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "standard" => Ok(Self::Standard),
            "automation" => Ok(Self::Automation),
            "device-policy" | "device_policy" => Ok(Self::DevicePolicy),
            "privileged" => Ok(Self::Privileged),
            "superuser" => Ok(Self::Superuser),
            other => Err(format!("invalid permission tier: {}", other)),
        }
    }
}

impl fmt::Display for PermissionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a permission check, always carrying a human-readable reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionStatus {
    pub granted: bool,
    pub reason: String,
}

impl PermissionStatus {
    pub fn granted() -> Self {
        Self {
            granted: true,
            reason: "Permission granted".to_string(),
        }
    }

    pub fn granted_with(reason: impl Into<String>) -> Self {
        Self {
            granted: true,
            reason: reason.into(),
        }
    }

    pub fn denied() -> Self {
        Self {
            granted: false,
            reason: "Permission denied".to_string(),
        }
    }

    pub fn denied_with(reason: impl Into<String>) -> Self {
        Self {
            granted: false,
            reason: reason.into(),
        }
    }
}

/// Effective identity a command should run as, independent of the backend
/// that executes it.
///
/// Only [`ShellIdentity::Shell`] changes execution: elevated backends route
/// the command through the staged launcher binary so it runs with a
/// narrower identity than the backend's own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShellIdentity {
    #[default]
    Default,
    Shell,
    Root,
    App,
}

impl ShellIdentity {
    /// Convert identity to its canonical string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Shell => "shell",
            Self::Root => "root",
            Self::App => "app",
        }
    }

    /// Whether this identity requires launcher wrapping.
    pub fn wraps_launcher(&self) -> bool {
        matches!(self, Self::Shell)
    }
}

impl FromStr for ShellIdentity {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "default" => Ok(Self::Default),
            "shell" => Ok(Self::Shell),
            "root" => Ok(Self::Root),
            "app" => Ok(Self::App),
            other => Err(format!("invalid shell identity: {}", other)),
        }
    }
}

impl fmt::Display for ShellIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
