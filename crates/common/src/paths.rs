use anyhow::Result;
use std::path::PathBuf;

pub const ECHELON_DIR_NAME: &str = ".echelon";
pub const BIN_SUBDIR: &str = "bin";
pub const SOCK_SUBDIR: &str = "sock";
pub const LAUNCHER_BIN_NAME: &str = "echelon-launcher";

pub fn echelon_home() -> Result<PathBuf> {
    if let Ok(override_home) = std::env::var("ECHELON_HOME") {
        let trimmed = override_home.trim();
        if !trimmed.is_empty() {
            return Ok(PathBuf::from(trimmed));
        }
    }
    Ok(dirs::home_dir()
        .ok_or_else(|| anyhow::anyhow!("No home directory found"))?
        .join(ECHELON_DIR_NAME))
}

/// Private executable directory holding the staged launcher binary.
pub fn bin_dir() -> Result<PathBuf> {
    Ok(echelon_home()?.join(BIN_SUBDIR))
}

pub fn launcher_path() -> Result<PathBuf> {
    Ok(bin_dir()?.join(LAUNCHER_BIN_NAME))
}

pub fn launcher_version_file() -> Result<PathBuf> {
    Ok(bin_dir()?.join(".version"))
}

pub fn stage_lock_file() -> Result<PathBuf> {
    Ok(echelon_home()?.join(".echelon.lock"))
}

pub fn sock_dir() -> Result<PathBuf> {
    Ok(echelon_home()?.join(SOCK_SUBDIR))
}

/// Default control socket of the privileged command broker.
pub fn broker_socket() -> Result<PathBuf> {
    Ok(sock_dir()?.join("broker.sock"))
}

pub fn config_file() -> Result<PathBuf> {
    Ok(echelon_home()?.join("config.toml"))
}
