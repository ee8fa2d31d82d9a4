//! Launcher-side execution: identity narrowing, environment scrub, and
//! the wrapped command run with exit-code parity.

use anyhow::{anyhow, Context, Result};
use std::env;
use std::ffi::{OsStr, OsString};
use std::path::PathBuf;
use std::process::{Command, ExitStatus};

#[cfg(unix)]
use std::os::unix::process::CommandExt;

/// Loader-sensitive variables stripped before the wrapped command runs.
const SCRUBBED_VARS: &[&str] = &["LD_PRELOAD", "LD_LIBRARY_PATH", "DYLD_INSERT_LIBRARIES"];

/// Parsed launcher invocation: optional identity override plus the
/// wrapped argv.
#[derive(Debug, PartialEq)]
pub struct Invocation {
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub argv: Vec<OsString>,
}

/// Entry point for the `echelon-launcher` binary.
pub fn run() -> Result<i32> {
    let invocation = parse_invocation(env::args_os().skip(1).collect())?;
    execute(invocation)
}

/// Usage: `echelon-launcher [--uid N] [--gid N] [--] command [args...]`
pub fn parse_invocation(args: Vec<OsString>) -> Result<Invocation> {
    let mut uid = None;
    let mut gid = None;
    let mut idx = 0;

    while idx < args.len() {
        match args[idx].to_str() {
            Some("--uid") => {
                let value = args
                    .get(idx + 1)
                    .ok_or_else(|| anyhow!("--uid requires a value"))?;
                uid = Some(parse_id(value, "--uid")?);
                idx += 2;
            }
            Some("--gid") => {
                let value = args
                    .get(idx + 1)
                    .ok_or_else(|| anyhow!("--gid requires a value"))?;
                gid = Some(parse_id(value, "--gid")?);
                idx += 2;
            }
            Some("--") => {
                idx += 1;
                break;
            }
            _ => break,
        }
    }

    let argv: Vec<OsString> = args[idx..].to_vec();
    if argv.is_empty() {
        return Err(anyhow!("No command given to launch"));
    }

    Ok(Invocation { uid, gid, argv })
}

pub fn execute(invocation: Invocation) -> Result<i32> {
    let program = resolve_program(&invocation.argv[0])?;

    let mut cmd = Command::new(&program);
    cmd.args(&invocation.argv[1..]);

    for var in SCRUBBED_VARS {
        cmd.env_remove(var);
    }

    #[cfg(unix)]
    {
        cmd.arg0(&invocation.argv[0]); // Preserve argv[0] semantics
        apply_identity(&mut cmd, invocation.uid, invocation.gid);
    }

    let status = cmd
        .status()
        .with_context(|| format!("Failed to execute {}", program.display()))?;

    Ok(exit_code(&status))
}

/// Picks the target identity for the wrapped command.
///
/// Explicit `--uid`/`--gid` flags win. Without them, a setuid context
/// (effective id differs from the real id) falls back to the invoking
/// user's real identity; otherwise nothing changes.
#[cfg(unix)]
fn apply_identity(cmd: &mut Command, uid: Option<u32>, gid: Option<u32>) {
    use nix::unistd::{Gid, Uid};

    let target_gid = gid.or_else(|| {
        let real = Gid::current();
        (Gid::effective() != real).then(|| real.as_raw())
    });
    let target_uid = uid.or_else(|| {
        let real = Uid::current();
        (Uid::effective() != real).then(|| real.as_raw())
    });

    // Group first so the uid drop cannot strand a privileged gid
    if let Some(gid) = target_gid {
        cmd.gid(gid);
    }
    if let Some(uid) = target_uid {
        cmd.uid(uid);
    }
}

fn resolve_program(first: &OsString) -> Result<PathBuf> {
    let path = PathBuf::from(first);

    // Explicit paths get checked up front for a clearer error; bare
    // names go through the normal PATH lookup at spawn time.
    if first.to_string_lossy().contains(std::path::MAIN_SEPARATOR) && !is_executable(&path) {
        return Err(anyhow!("Command {:?} is not executable", path));
    }

    Ok(path)
}

fn parse_id(value: &OsStr, flag: &str) -> Result<u32> {
    value
        .to_str()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| anyhow!("{flag} expects a numeric id, got {value:?}"))
}

fn exit_code(status: &ExitStatus) -> i32 {
    // Unix signal exit status parity - 128 + signal for terminated processes
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    status.code().unwrap_or(1)
}

/// Check if a path is executable (cross-platform)
fn is_executable(path: &std::path::Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(metadata) = std::fs::metadata(path) {
            metadata.is_file() && (metadata.permissions().mode() & 0o111 != 0)
        } else {
            false
        }
    }

    #[cfg(windows)]
    {
        std::fs::metadata(path).map(|m| m.is_file()).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use tempfile::TempDir;

    fn os(args: &[&str]) -> Vec<OsString> {
        args.iter().map(OsString::from).collect()
    }

    #[test]
    fn test_parse_plain_command() {
        let inv = parse_invocation(os(&["ls", "-la"])).unwrap();
        assert_eq!(inv.uid, None);
        assert_eq!(inv.gid, None);
        assert_eq!(inv.argv, os(&["ls", "-la"]));
    }

    #[test]
    fn test_parse_identity_flags() {
        let inv = parse_invocation(os(&["--uid", "2000", "--gid", "2000", "id"])).unwrap();
        assert_eq!(inv.uid, Some(2000));
        assert_eq!(inv.gid, Some(2000));
        assert_eq!(inv.argv, os(&["id"]));
    }

    #[test]
    fn test_parse_double_dash_guards_flag_like_commands() {
        let inv = parse_invocation(os(&["--", "--uid"])).unwrap();
        assert_eq!(inv.uid, None);
        assert_eq!(inv.argv, os(&["--uid"]));
    }

    #[test]
    fn test_parse_missing_value_errors() {
        let err = parse_invocation(os(&["--uid"])).unwrap_err();
        assert!(err.to_string().contains("--uid requires a value"));
    }

    #[test]
    fn test_parse_non_numeric_id_errors() {
        let err = parse_invocation(os(&["--uid", "shell", "id"])).unwrap_err();
        assert!(err.to_string().contains("numeric id"));
    }

    #[test]
    fn test_parse_empty_errors() {
        assert!(parse_invocation(Vec::new()).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_execute_forwards_exit_code() {
        let inv = parse_invocation(os(&["sh", "-c", "exit 7"])).unwrap();
        assert_eq!(execute(inv).unwrap(), 7);
    }

    #[cfg(unix)]
    #[test]
    #[serial]
    fn test_execute_scrubs_loader_vars() {
        std::env::set_var("LD_PRELOAD", "/tmp/evil.so");
        let inv = parse_invocation(os(&["sh", "-c", "test -z \"$LD_PRELOAD\""])).unwrap();
        let code = execute(inv).unwrap();
        std::env::remove_var("LD_PRELOAD");

        assert_eq!(code, 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_execute_rejects_non_executable_path() {
        let temp = TempDir::new().unwrap();
        let plain = temp.path().join("not_exec");
        fs::write(&plain, "content").unwrap();

        let inv = parse_invocation(vec![plain.clone().into_os_string()]).unwrap();
        let err = execute(inv).unwrap_err();
        assert!(err.to_string().contains("not executable"));
    }

    #[cfg(unix)]
    #[test]
    fn test_exit_code_signal_parity() {
        use std::os::unix::process::ExitStatusExt;

        let killed = ExitStatus::from_raw(9); // terminated by SIGKILL
        assert_eq!(exit_code(&killed), 137);

        let exited = ExitStatus::from_raw(7 << 8);
        assert_eq!(exit_code(&exited), 7);
    }

    #[test]
    fn test_executable_bit_check() {
        let temp = TempDir::new().unwrap();
        let non_executable = temp.path().join("not_exec");
        fs::write(&non_executable, "content").unwrap();

        assert!(!is_executable(&non_executable));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let executable = temp.path().join("exec");
            fs::write(&executable, "#!/bin/sh\necho test").unwrap();
            let mut perms = fs::metadata(&executable).unwrap().permissions();
            perms.set_mode(0o755);
            fs::set_permissions(&executable, perms).unwrap();

            assert!(is_executable(&executable));
        }
    }
}
