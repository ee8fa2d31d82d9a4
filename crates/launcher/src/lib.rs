//! Staged helper that re-narrows identity around wrapped commands.
//!
//! Privileged executors never hand their own identity to shell
//! commands. When a caller asks for the `Shell` identity, the executor
//! stages this crate's binary into a private executable directory and
//! prepends it to the command line. At run time the helper scrubs
//! loader-sensitive environment variables, optionally drops to an
//! explicit uid/gid, and runs the wrapped argv with exit-code parity.

pub mod lock;
pub mod run;
pub mod stage;

pub use run::{run, Invocation};
pub use stage::{ensure_staged, LauncherStager, StageStatus};
