use anyhow::{Context, Result};
use echelon_common::paths;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tempfile::Builder;
use tracing::debug;

use crate::lock::StageLock;

#[derive(Debug, PartialEq)]
pub enum StageStatus {
    Current, // Staged copy is up to date
    Staged,  // A fresh copy was written
}

#[derive(Debug, Serialize, Deserialize)]
struct StagedVersion {
    version: String,
    source_sha256: String,
    staged_at: SystemTime,
}

pub struct LauncherStager {
    bin_dir: PathBuf,
    launcher_path: PathBuf,
    version_file: PathBuf,
    lock_file: PathBuf,
}

impl LauncherStager {
    pub fn new() -> Result<Self> {
        Ok(Self {
            bin_dir: paths::bin_dir()?,
            launcher_path: paths::launcher_path()?,
            version_file: paths::launcher_version_file()?,
            lock_file: paths::stage_lock_file()?,
        })
    }

    /// Guarantees a current copy of the launcher under the private
    /// executable directory and returns its path.
    ///
    /// Privileged executors call this before wrapping a command for the
    /// `Shell` identity. A failure here surfaces before any process is
    /// created.
    pub fn ensure_staged(&self) -> Result<(PathBuf, StageStatus)> {
        let source = self.locate_source()?;

        if !self.is_staging_needed(&source)? {
            return Ok((self.launcher_path.clone(), StageStatus::Current));
        }

        let _lock = StageLock::acquire(&self.lock_file, Duration::from_secs(5))
            .context("Failed to lock launcher staging")?;

        // Double-check after acquiring the lock
        if !self.is_staging_needed(&source)? {
            return Ok((self.launcher_path.clone(), StageStatus::Current));
        }

        self.stage(&source)?;
        self.write_version_file(&source)?;
        debug!(
            target: "echelon_launcher",
            path = %self.launcher_path.display(),
            "staged launcher"
        );

        Ok((self.launcher_path.clone(), StageStatus::Staged))
    }

    fn is_staging_needed(&self, source: &Path) -> Result<bool> {
        if !self.launcher_path.exists() {
            return Ok(true);
        }
        if !self.version_file.exists() {
            return Ok(true);
        }

        let contents = fs::read_to_string(&self.version_file)
            .context("Failed to read launcher version file")?;
        let staged: StagedVersion =
            serde_json::from_str(&contents).context("Failed to parse launcher version file")?;

        let current_version = env!("CARGO_PKG_VERSION");
        if !staged.version.starts_with(current_version) {
            return Ok(true);
        }

        // Catches rebuilds that did not bump the package version
        if staged.source_sha256 != sha256_hex(source)? {
            return Ok(true);
        }

        Ok(false)
    }

    fn stage(&self, source: &Path) -> Result<()> {
        fs::create_dir_all(&self.bin_dir)
            .context("Failed to create private executable directory")?;

        // Write next to the final path, then swap in with a rename
        let temp = Builder::new()
            .prefix(".echelon-launcher-")
            .tempfile_in(&self.bin_dir)
            .context("Failed to create staging file")?;

        fs::copy(source, temp.path())
            .with_context(|| format!("Failed to copy launcher from {source:?}"))?;

        #[cfg(unix)]
        {
            let mut perms = fs::metadata(temp.path())?.permissions();
            perms.set_mode(0o755);
            fs::set_permissions(temp.path(), perms)
                .context("Failed to set executable permissions")?;
        }

        temp.persist(&self.launcher_path)
            .context("Failed to move launcher to final location")?;

        Ok(())
    }

    fn locate_source(&self) -> Result<PathBuf> {
        // Explicit override wins (packaged installs and tests)
        if let Ok(explicit) = std::env::var("ECHELON_LAUNCHER_SOURCE") {
            let trimmed = explicit.trim();
            if !trimmed.is_empty() {
                let path = PathBuf::from(trimmed);
                if path.exists() {
                    return Ok(path);
                }
                return Err(anyhow::anyhow!(
                    "ECHELON_LAUNCHER_SOURCE points at a missing file: {trimmed}"
                ));
            }
        }

        let current_exe =
            std::env::current_exe().context("Failed to get current executable path")?;
        let exe_dir = current_exe
            .parent()
            .ok_or_else(|| anyhow::anyhow!("Failed to get executable directory"))?;

        let bin_name = if cfg!(windows) {
            "echelon-launcher.exe"
        } else {
            paths::LAUNCHER_BIN_NAME
        };

        let sibling = exe_dir.join(bin_name);
        if sibling.exists() {
            return Ok(sibling);
        }

        Ok(which::which(bin_name).context(
            "Failed to find echelon-launcher binary. Please ensure it's built and in PATH.",
        )?)
    }

    fn write_version_file(&self, source: &Path) -> Result<()> {
        let staged = StagedVersion {
            version: env!("CARGO_PKG_VERSION").to_string(),
            source_sha256: sha256_hex(source)?,
            staged_at: SystemTime::now(),
        };

        let json =
            serde_json::to_string_pretty(&staged).context("Failed to serialize version info")?;
        fs::write(&self.version_file, json).context("Failed to write launcher version file")?;

        Ok(())
    }
}

fn sha256_hex(path: &Path) -> Result<String> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read {path:?} for hashing"))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Stages the launcher if needed and returns the path callers prepend
/// to a wrapped command line.
pub fn ensure_staged() -> Result<PathBuf> {
    let (path, _) = LauncherStager::new()?.ensure_staged()?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::{tempdir, TempDir};

    struct StageEnv {
        _home: TempDir,
        _src_dir: TempDir,
        source: PathBuf,
        prev_home: Option<String>,
        prev_source: Option<String>,
    }

    impl StageEnv {
        fn new() -> Self {
            let home = tempdir().unwrap();
            let src_dir = tempdir().unwrap();
            let source = src_dir.path().join("echelon-launcher");
            fs::write(&source, b"#!/bin/sh\nexit 0\n").unwrap();

            let prev_home = std::env::var("ECHELON_HOME").ok();
            let prev_source = std::env::var("ECHELON_LAUNCHER_SOURCE").ok();
            std::env::set_var("ECHELON_HOME", home.path());
            std::env::set_var("ECHELON_LAUNCHER_SOURCE", &source);

            Self {
                _home: home,
                _src_dir: src_dir,
                source,
                prev_home,
                prev_source,
            }
        }
    }

    impl Drop for StageEnv {
        fn drop(&mut self) {
            match self.prev_home.take() {
                Some(v) => std::env::set_var("ECHELON_HOME", v),
                None => std::env::remove_var("ECHELON_HOME"),
            }
            match self.prev_source.take() {
                Some(v) => std::env::set_var("ECHELON_LAUNCHER_SOURCE", v),
                None => std::env::remove_var("ECHELON_LAUNCHER_SOURCE"),
            }
        }
    }

    #[test]
    #[serial]
    fn test_first_call_stages_fresh_copy() {
        let _env = StageEnv::new();

        let stager = LauncherStager::new().unwrap();
        let (path, status) = stager.ensure_staged().unwrap();

        assert_eq!(status, StageStatus::Staged);
        assert!(path.exists());
        assert!(paths::launcher_version_file().unwrap().exists());

        #[cfg(unix)]
        {
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o755);
        }
    }

    #[test]
    #[serial]
    fn test_second_call_is_current() {
        let _env = StageEnv::new();

        let stager = LauncherStager::new().unwrap();
        let (_, first) = stager.ensure_staged().unwrap();
        let (_, second) = stager.ensure_staged().unwrap();

        assert_eq!(first, StageStatus::Staged);
        assert_eq!(second, StageStatus::Current);
    }

    #[test]
    #[serial]
    fn test_source_change_restages() {
        let env = StageEnv::new();

        let stager = LauncherStager::new().unwrap();
        let (path, _) = stager.ensure_staged().unwrap();

        fs::write(&env.source, b"#!/bin/sh\nexit 1\n").unwrap();
        let (_, status) = stager.ensure_staged().unwrap();

        assert_eq!(status, StageStatus::Staged);
        assert_eq!(fs::read(&path).unwrap(), b"#!/bin/sh\nexit 1\n");
    }

    #[test]
    #[serial]
    fn test_missing_source_errors() {
        let env = StageEnv::new();
        fs::remove_file(&env.source).unwrap();

        let stager = LauncherStager::new().unwrap();
        let err = stager.ensure_staged().unwrap_err();

        assert!(err.to_string().contains("missing file"));
        assert!(!paths::launcher_path().unwrap().exists());
    }

    #[test]
    fn test_sha256_hex_tracks_content() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("payload");

        fs::write(&file, b"one").unwrap();
        let first = sha256_hex(&file).unwrap();
        fs::write(&file, b"two").unwrap();
        let second = sha256_hex(&file).unwrap();

        assert_ne!(first, second);
        assert_eq!(first.len(), 64);
    }
}
