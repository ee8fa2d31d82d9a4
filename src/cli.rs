use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use echelon_common::Settings;
use std::io::Write;
use tier_api::{OutputStream, PermissionTier, ShellExecutor, ShellIdentity};
use tracing::debug;
use tracing_subscriber::prelude::*;

#[derive(Copy, Clone, Debug, ValueEnum, PartialEq, Eq)]
#[value(rename_all = "kebab-case")]
pub enum TierArg {
    Standard,
    Automation,
    DevicePolicy,
    Privileged,
    Superuser,
}

impl From<TierArg> for PermissionTier {
    fn from(value: TierArg) -> Self {
        match value {
            TierArg::Standard => PermissionTier::Standard,
            TierArg::Automation => PermissionTier::Automation,
            TierArg::DevicePolicy => PermissionTier::DevicePolicy,
            TierArg::Privileged => PermissionTier::Privileged,
            TierArg::Superuser => PermissionTier::Superuser,
        }
    }
}

#[derive(Copy, Clone, Debug, ValueEnum, PartialEq, Eq)]
#[value(rename_all = "kebab-case")]
pub enum IdentityArg {
    Default,
    Shell,
    Root,
    App,
}

impl From<IdentityArg> for ShellIdentity {
    fn from(value: IdentityArg) -> Self {
        match value {
            IdentityArg::Default => ShellIdentity::Default,
            IdentityArg::Shell => ShellIdentity::Shell,
            IdentityArg::Root => ShellIdentity::Root,
            IdentityArg::App => ShellIdentity::App,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "echelon")]
#[command(version, about = "Tiered shell execution with privileged brokering", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub sub: SubCommands,
}

#[derive(Subcommand, Debug)]
pub enum SubCommands {
    /// Run a single command on a chosen tier
    Exec(ExecCmd),
    /// Show every tier with its availability and permission state
    Tiers(TiersCmd),
    /// Run one-time tier initialization (launcher staging and the like)
    Init(InitCmd),
}

#[derive(Args, Debug)]
pub struct ExecCmd {
    /// Command to execute
    #[arg(short = 'c', long = "command", value_name = "CMD")]
    pub command: String,

    /// Tier the command runs on
    #[arg(long = "tier", value_name = "TIER", default_value = "standard")]
    pub tier: TierArg,

    /// Identity the command runs under
    #[arg(long = "identity", value_name = "IDENTITY", default_value = "default")]
    pub identity: IdentityArg,

    /// Stream output live instead of collecting it
    #[arg(long = "stream", conflicts_with = "json")]
    pub stream: bool,

    /// Print the collected result as JSON
    #[arg(long = "json")]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct TiersCmd {
    /// Print the table as JSON
    #[arg(long = "json")]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct InitCmd {
    /// Initialize a single tier instead of all of them
    #[arg(long = "tier", value_name = "TIER")]
    pub tier: Option<TierArg>,
}

/// Entry point for the `echelon` binary.
pub fn run_cli() -> Result<i32> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    run_cli_with(Cli::parse())
}

pub fn run_cli_with(cli: Cli) -> Result<i32> {
    let settings = Settings::load()?;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        match cli.sub {
            SubCommands::Exec(cmd) => run_exec(cmd, &settings).await,
            SubCommands::Tiers(cmd) => run_tiers(cmd, &settings).await,
            SubCommands::Init(cmd) => run_init(cmd, &settings).await,
        }
    })
}

async fn run_exec(cmd: ExecCmd, settings: &Settings) -> Result<i32> {
    let executor = tier_factory::executor_for(cmd.tier.into(), settings)?;
    debug!(
        target: "echelon",
        tier = executor.tier().as_str(),
        stream = cmd.stream,
        "dispatching command"
    );

    if cmd.stream {
        return stream_exec(executor.as_ref(), &cmd.command).await;
    }

    let result = executor.execute(&cmd.command, cmd.identity.into()).await?;

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print!("{}", result.stdout);
        eprint!("{}", result.stderr);
    }

    Ok(result.exit_code)
}

async fn stream_exec(executor: &dyn ShellExecutor, command: &str) -> Result<i32> {
    let mut process = executor.start_process(command).await?;

    let stdout = process.take_stdout();
    let stderr = process.take_stderr();
    let out_task = tokio::spawn(pump(stdout, false));
    let err_task = tokio::spawn(pump(stderr, true));

    let code = process.wait().await;

    // Let the pumps drain whatever the channels still hold.
    let _ = out_task.await;
    let _ = err_task.await;

    Ok(code)
}

async fn pump(stream: Option<OutputStream>, to_stderr: bool) {
    let Some(mut stream) = stream else { return };

    while let Some(chunk) = stream.next_chunk().await {
        let written = if to_stderr {
            let mut sink = std::io::stderr();
            sink.write_all(&chunk).and_then(|_| sink.flush())
        } else {
            let mut sink = std::io::stdout();
            sink.write_all(&chunk).and_then(|_| sink.flush())
        };
        if written.is_err() {
            break;
        }
    }
}

async fn run_tiers(cmd: TiersCmd, settings: &Settings) -> Result<i32> {
    let mut rows = Vec::new();
    for executor in tier_factory::all_executors(settings)? {
        let available = executor.is_available().await;
        let permission = executor.permission_status().await;
        rows.push((executor.tier(), available, permission));
    }

    if cmd.json {
        let rows: Vec<_> = rows
            .into_iter()
            .map(|(tier, available, permission)| {
                serde_json::json!({
                    "tier": tier.as_str(),
                    "available": available,
                    "granted": permission.granted,
                    "reason": permission.reason,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else {
        for (tier, available, permission) in &rows {
            println!(
                "{:<14} {:<12} {:<8} {}",
                tier.as_str(),
                if *available { "available" } else { "unavailable" },
                if permission.granted { "granted" } else { "denied" },
                permission.reason
            );
        }
    }

    Ok(0)
}

async fn run_init(cmd: InitCmd, settings: &Settings) -> Result<i32> {
    let executors = match cmd.tier {
        Some(tier) => vec![tier_factory::executor_for(tier.into(), settings)?],
        None => tier_factory::all_executors(settings)?,
    };

    let mut failed = false;
    for executor in &executors {
        match executor.initialize().await {
            Ok(()) => println!("{:<14} initialized", executor.tier().as_str()),
            Err(err) => {
                failed = true;
                eprintln!("{:<14} {err:#}", executor.tier().as_str());
            }
        }
    }

    Ok(if failed { 1 } else { 0 })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_exec_parses_tier_and_identity() {
        let cli = parse(&[
            "echelon",
            "exec",
            "-c",
            "ls -la",
            "--tier",
            "privileged",
            "--identity",
            "shell",
        ]);

        let SubCommands::Exec(cmd) = cli.sub else {
            panic!("expected exec subcommand");
        };
        assert_eq!(cmd.command, "ls -la");
        assert_eq!(cmd.tier, TierArg::Privileged);
        assert_eq!(cmd.identity, IdentityArg::Shell);
        assert!(!cmd.stream);
        assert!(!cmd.json);
    }

    #[test]
    fn test_exec_defaults_to_standard_tier() {
        let cli = parse(&["echelon", "exec", "--command", "pwd"]);

        let SubCommands::Exec(cmd) = cli.sub else {
            panic!("expected exec subcommand");
        };
        assert_eq!(cmd.tier, TierArg::Standard);
        assert_eq!(cmd.identity, IdentityArg::Default);
    }

    #[test]
    fn test_exec_stream_conflicts_with_json() {
        let parsed = Cli::try_parse_from(["echelon", "exec", "-c", "ls", "--stream", "--json"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_tier_arg_covers_every_tier() {
        let mapped: Vec<PermissionTier> = [
            TierArg::Standard,
            TierArg::Automation,
            TierArg::DevicePolicy,
            TierArg::Privileged,
            TierArg::Superuser,
        ]
        .into_iter()
        .map(PermissionTier::from)
        .collect();

        assert_eq!(mapped, PermissionTier::ALL.to_vec());
    }

    #[test]
    fn test_kebab_case_tier_names_parse() {
        let cli = parse(&["echelon", "init", "--tier", "device-policy"]);

        let SubCommands::Init(cmd) = cli.sub else {
            panic!("expected init subcommand");
        };
        assert_eq!(cmd.tier, Some(TierArg::DevicePolicy));
    }

    #[test]
    fn test_tiers_accepts_json_flag() {
        let cli = parse(&["echelon", "tiers", "--json"]);

        let SubCommands::Tiers(cmd) = cli.sub else {
            panic!("expected tiers subcommand");
        };
        assert!(cmd.json);
    }
}
