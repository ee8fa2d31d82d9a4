use serde::{Deserialize, Serialize};

/// Exit code reported when no process could be created at all.
pub const NO_PROCESS_EXIT: i32 = -1;

/// Outcome of a one-shot command execution.
///
/// `success` is not simply `exit_code == 0`: backends derive it through the
/// configured command policy, so a search command that found nothing can
/// still succeed. When the process never came into existence (spawn failure,
/// timeout kill) `exit_code` is [`NO_PROCESS_EXIT`] and the explanation is
/// in `stderr`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandResult {
    pub fn new(success: bool, stdout: String, stderr: String, exit_code: i32) -> Self {
        Self {
            success,
            stdout,
            stderr,
            exit_code,
        }
    }

    /// Result for a command that never produced an exit code.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: reason.into(),
            exit_code: NO_PROCESS_EXIT,
        }
    }

    /// Immediate result for a fire-and-forget background command.
    pub fn background() -> Self {
        Self {
            success: true,
            stdout: String::new(),
            stderr: String::new(),
            exit_code: 0,
        }
    }
}
