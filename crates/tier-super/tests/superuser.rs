#![cfg(unix)]

use echelon_common::settings::Settings;
use echelon_common::SuStrategy;
use serial_test::serial;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tier_api::{PermissionTier, ShellExecutor, ShellIdentity};
use tier_super::SuperuserExecutor;

/// A stand-in `su` binary: a script that execs a plain shell, with a fake
/// `id` on PATH reporting a chosen uid so access probes are deterministic.
struct FakeSu {
    dir: tempfile::TempDir,
    su: PathBuf,
}

impl FakeSu {
    fn with_uid(uid: u32) -> Self {
        let dir = tempfile::tempdir().expect("fixture dir");
        let bin = dir.path().join("bin");
        std::fs::create_dir_all(&bin).expect("bin dir");
        write_script(
            &bin.join("id"),
            &format!("#!/bin/sh\necho \"uid={uid}(test) gid={uid}(test)\"\n"),
        );
        let su = dir.path().join("su");
        write_script(
            &su,
            &format!(
                "#!/bin/sh\nPATH=\"{}:$PATH\" exec /bin/sh \"$@\"\n",
                bin.display()
            ),
        );
        Self { dir, su }
    }

    fn id_script(&self) -> PathBuf {
        self.dir.path().join("bin").join("id")
    }

    fn settings(&self, strategy: SuStrategy) -> Settings {
        let mut settings = Settings::default();
        settings.superuser.su_binary = self.su.display().to_string();
        settings.superuser.strategy = strategy;
        settings
    }
}

fn write_script(path: &Path, content: &str) {
    std::fs::write(path, content).expect("write script");
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
        .expect("mark script executable");
}

fn executor(fake: &FakeSu, strategy: SuStrategy) -> SuperuserExecutor {
    SuperuserExecutor::new(&fake.settings(strategy))
}

/// Redirects launcher staging into temp directories; restores the previous
/// environment on drop.
struct LauncherEnv {
    _home: tempfile::TempDir,
    _source_dir: tempfile::TempDir,
    prev_home: Option<std::ffi::OsString>,
    prev_source: Option<std::ffi::OsString>,
}

impl LauncherEnv {
    fn with_script(content: &str) -> Self {
        let home = tempfile::tempdir().expect("home dir");
        let source_dir = tempfile::tempdir().expect("source dir");
        let source = source_dir.path().join("echelon-launcher");
        write_script(&source, content);
        Self::install(home, source_dir, source)
    }

    fn with_missing_source() -> Self {
        let home = tempfile::tempdir().expect("home dir");
        let source_dir = tempfile::tempdir().expect("source dir");
        let source = source_dir.path().join("missing-launcher");
        Self::install(home, source_dir, source)
    }

    fn install(
        home: tempfile::TempDir,
        source_dir: tempfile::TempDir,
        source: PathBuf,
    ) -> Self {
        let prev_home = std::env::var_os("ECHELON_HOME");
        let prev_source = std::env::var_os("ECHELON_LAUNCHER_SOURCE");
        std::env::set_var("ECHELON_HOME", home.path());
        std::env::set_var("ECHELON_LAUNCHER_SOURCE", &source);
        Self {
            _home: home,
            _source_dir: source_dir,
            prev_home,
            prev_source,
        }
    }
}

impl Drop for LauncherEnv {
    fn drop(&mut self) {
        restore_env("ECHELON_HOME", self.prev_home.take());
        restore_env("ECHELON_LAUNCHER_SOURCE", self.prev_source.take());
    }
}

fn restore_env(key: &str, value: Option<std::ffi::OsString>) {
    match value {
        Some(value) => std::env::set_var(key, value),
        None => std::env::remove_var(key),
    }
}

#[tokio::test]
async fn test_raw_captures_both_streams() {
    let fake = FakeSu::with_uid(0);
    let executor = executor(&fake, SuStrategy::Raw);

    let result = executor
        .execute("echo raw out; echo raw err >&2", ShellIdentity::Default)
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.exit_code, 0);
    assert_eq!(result.stdout, "raw out\n");
    assert_eq!(result.stderr, "raw err\n");
}

#[tokio::test]
async fn test_raw_reports_exit_codes() {
    let fake = FakeSu::with_uid(0);
    let executor = executor(&fake, SuStrategy::Raw);

    let result = executor
        .execute("exit 4", ShellIdentity::Default)
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.exit_code, 4);
}

#[tokio::test]
async fn test_session_keeps_one_shell_alive() {
    let fake = FakeSu::with_uid(0);
    let executor = executor(&fake, SuStrategy::Session);

    let set = executor
        .execute("ECHELON_TEST_VALUE=carried", ShellIdentity::Default)
        .await
        .unwrap();
    assert!(set.success);

    let get = executor
        .execute("echo $ECHELON_TEST_VALUE", ShellIdentity::Default)
        .await
        .unwrap();
    assert_eq!(get.stdout, "carried\n");
}

#[tokio::test]
async fn test_session_reports_exit_codes() {
    let fake = FakeSu::with_uid(0);
    let executor = executor(&fake, SuStrategy::Session);

    let result = executor
        .execute("(exit 5)", ShellIdentity::Default)
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.exit_code, 5);
    assert!(result.stdout.is_empty());
}

#[tokio::test]
async fn test_session_separates_streams() {
    let fake = FakeSu::with_uid(0);
    let executor = executor(&fake, SuStrategy::Session);

    let result = executor
        .execute(
            "echo one; echo two >&2; echo three",
            ShellIdentity::Default,
        )
        .await
        .unwrap();

    assert_eq!(result.stdout, "one\nthree\n");
    assert_eq!(result.stderr, "two\n");
    assert_eq!(result.exit_code, 0);
}

#[tokio::test]
async fn test_session_handles_unterminated_output() {
    let fake = FakeSu::with_uid(0);
    let executor = executor(&fake, SuStrategy::Session);

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        executor.execute("printf out-tail", ShellIdentity::Default),
    )
    .await
    .expect("must not hang on unterminated stdout")
    .unwrap();
    assert!(result.success);
    assert_eq!(result.stdout, "out-tail");
    assert_eq!(result.exit_code, 0);

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        executor.execute("(printf err-tail >&2; exit 3)", ShellIdentity::Default),
    )
    .await
    .expect("must not hang on unterminated stderr")
    .unwrap();
    assert_eq!(result.stderr, "err-tail");
    assert_eq!(result.exit_code, 3);

    // The shell survives the partial lines and takes the next job.
    let result = executor
        .execute("echo still-here", ShellIdentity::Default)
        .await
        .unwrap();
    assert_eq!(result.stdout, "still-here\n");
}

#[tokio::test]
async fn test_search_family_leniency_applies() {
    let fake = FakeSu::with_uid(0);
    let executor = executor(&fake, SuStrategy::Raw);

    let result = executor
        .execute("grep needle /dev/null", ShellIdentity::Default)
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.exit_code, 1);
}

#[tokio::test]
async fn test_missing_su_binary_fails_as_value() {
    let mut settings = Settings::default();
    settings.superuser.su_binary = "/definitely/not/su".to_string();
    settings.superuser.strategy = SuStrategy::Raw;
    let executor = SuperuserExecutor::new(&settings);

    let result = executor
        .execute("echo hi", ShellIdentity::Default)
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.exit_code, -1);
    assert!(result.stderr.contains("Failed to create process"));

    settings.superuser.strategy = SuStrategy::Session;
    let executor = SuperuserExecutor::new(&settings);
    let result = executor
        .execute("echo hi", ShellIdentity::Default)
        .await
        .unwrap();
    assert!(result.stderr.contains("Failed to create process"));
}

#[tokio::test]
async fn test_availability_follows_id_probe() {
    let root = FakeSu::with_uid(0);
    let granted = executor(&root, SuStrategy::Raw);
    assert!(granted.is_available().await);
    let status = granted.permission_status().await;
    assert!(status.granted);
    assert_eq!(status.reason, "Superuser access verified");

    let user = FakeSu::with_uid(1000);
    let denied = executor(&user, SuStrategy::Raw);
    assert!(!denied.is_available().await);
    let status = denied.permission_status().await;
    assert!(!status.granted);
    assert_eq!(status.reason, "Superuser access not available");
}

#[tokio::test]
async fn test_request_permission_reprobes() {
    let fake = FakeSu::with_uid(1000);
    let executor = executor(&fake, SuStrategy::Raw);

    assert!(!executor.permission_status().await.granted);

    // Access changes on the host; the cached probe must not notice...
    write_script(
        &fake.id_script(),
        "#!/bin/sh\necho \"uid=0(root) gid=0(root)\"\n",
    );
    assert!(!executor.permission_status().await.granted);

    // ...until an explicit re-check.
    assert!(executor.request_permission().await.granted);
    assert!(executor.is_available().await);
}

#[tokio::test]
async fn test_background_returns_immediately() {
    let fake = FakeSu::with_uid(0);

    for strategy in [SuStrategy::Raw, SuStrategy::Session] {
        let executor = executor(&fake, strategy);
        let started = Instant::now();
        let result = executor
            .execute("sleep 5 &", ShellIdentity::Default)
            .await
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(result.success);
        assert_eq!(result.exit_code, 0);
        assert!(result.stdout.is_empty());
    }
}

#[tokio::test]
#[serial]
async fn test_shell_identity_wraps_launcher() {
    let _env = LauncherEnv::with_script("#!/bin/sh\necho launcher-ran \"$@\"\n");
    let fake = FakeSu::with_uid(0);
    let executor = executor(&fake, SuStrategy::Raw);

    let result = executor
        .execute("echo wrapped", ShellIdentity::Shell)
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.stdout, "launcher-ran echo wrapped\n");
}

#[tokio::test]
#[serial]
async fn test_shell_identity_wraps_whole_pipeline() {
    let _env = LauncherEnv::with_script("#!/bin/sh\necho \"launcher-saw $#\"\nexec \"$@\"\n");
    let fake = FakeSu::with_uid(0);
    let executor = executor(&fake, SuStrategy::Raw);

    // One launcher invocation carries the full pipeline, which still runs.
    let result = executor
        .execute("echo alpha | tr a-z A-Z", ShellIdentity::Shell)
        .await
        .unwrap();
    assert!(result.success);
    assert_eq!(result.stdout, "launcher-saw 3\nALPHA\n");

    // Single quotes inside the line survive the wrapping.
    let result = executor
        .execute("printf '%s' alpha | tr a-z A-Z", ShellIdentity::Shell)
        .await
        .unwrap();
    assert_eq!(result.stdout, "launcher-saw 3\nALPHA");
}

#[tokio::test]
#[serial]
async fn test_staging_failure_precedes_spawn() {
    let _env = LauncherEnv::with_missing_source();
    let fake = FakeSu::with_uid(0);

    // A su wrapper that records every invocation.
    let witness = fake.dir.path().join("su-ran");
    write_script(
        &fake.su,
        &format!(
            "#!/bin/sh\ntouch \"{}\"\nexec /bin/sh \"$@\"\n",
            witness.display()
        ),
    );
    let executor = executor(&fake, SuStrategy::Raw);

    let err = executor
        .execute("echo hi", ShellIdentity::Shell)
        .await
        .expect_err("staging must fail");

    assert!(format!("{err:#}").contains("Failed to stage launcher"));
    assert!(!witness.exists());
}

#[tokio::test]
async fn test_start_process_streams_through_shell() {
    let fake = FakeSu::with_uid(0);
    let executor = executor(&fake, SuStrategy::Raw);

    let mut process = executor
        .start_process("echo streaming; echo done")
        .await
        .unwrap();

    let stdout = process.take_stdout().expect("stdout stream");
    assert_eq!(stdout.read_to_string().await, "streaming\ndone\n");
    assert_eq!(process.wait().await, 0);
}

#[tokio::test]
async fn test_empty_command_is_a_failed_result() {
    let fake = FakeSu::with_uid(0);
    let executor = executor(&fake, SuStrategy::Raw);

    for command in ["   ", " & "] {
        let result = executor
            .execute(command, ShellIdentity::Default)
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.stderr, "Empty command");
    }

    assert_eq!(executor.tier(), PermissionTier::Superuser);
}
