/// Error taxonomy shared by the execution tiers.
///
/// Backends convert almost everything into [`crate::CommandResult`] or
/// [`crate::PermissionStatus`] values instead of returning errors; the
/// variants here surface only where no result shape exists yet — launcher
/// staging before a process exists, or stream plumbing inside a backend.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("Failed to create process: {0}")]
    ProcessCreation(String),
    #[error("Interrupted read on process stream")]
    InterruptedRead,
    #[error("Command timed out after {0}s")]
    Timeout(u64),
    #[error("Unsupported command: {0}")]
    UnsupportedCommand(String),
    #[error("Failed to stage launcher: {0}")]
    Staging(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_match_result_phrasing() {
        assert_eq!(
            ExecError::ProcessCreation("no such file".to_string()).to_string(),
            "Failed to create process: no such file"
        );
        assert_eq!(
            ExecError::Timeout(30).to_string(),
            "Command timed out after 30s"
        );
        assert_eq!(
            ExecError::UnsupportedCommand("reboot".to_string()).to_string(),
            "Unsupported command: reboot"
        );
    }
}
