//! Command-line front end over the execution tiers.

mod cli;

pub use cli::{
    run_cli, run_cli_with, Cli, ExecCmd, IdentityArg, InitCmd, SubCommands, TierArg, TiersCmd,
};
