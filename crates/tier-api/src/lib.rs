//! Execution-tier abstraction for echelon.
//!
//! Five mutually exclusive backends satisfy one contract: run a shell-like
//! command under a given privilege tier. This crate holds the contract and
//! everything the backends share — the permission model, the one-shot
//! [`CommandResult`], the interactive [`RunningProcess`], and the
//! [`ShellExecutor`] trait the tiers implement.

mod error;
mod executor;
mod process;
mod result;
mod tier;

pub use error::ExecError;
pub use executor::ShellExecutor;
pub use process::{exit_code, DestroyHandle, OutputStream, ProcessChannels, RunningProcess};
pub use result::{CommandResult, NO_PROCESS_EXIT};
pub use tier::{PermissionStatus, PermissionTier, ShellIdentity};
