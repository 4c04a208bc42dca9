/// Filesystem layout of the frontend profile.
///
/// Everything the launcher touches lives under one profile directory
/// (`~/.xware-desktop` unless `XWARE_DESKTOP_HOME` says otherwise):
/// - `frontend.lock` - single-instance advisory lock
/// - `frontend.sock` - command channel endpoint of the primary instance
/// - `log.txt` / `frontend.fault.log` - logging sinks
/// - `etc/frontend.json` - persisted settings
/// - `tmp/xwared.sock` - daemon control socket
/// - `mounts` - fake mount table handed to the daemon
use anyhow::{anyhow, Context, Result};
use directories::BaseDirs;
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable overriding the profile directory
pub const PROFILE_ENV: &str = "XWARE_DESKTOP_HOME";

const PROFILE_DIR_NAME: &str = ".xware-desktop";
const DESKTOP_FILE_NAME: &str = "xware-desktop.desktop";

/// Resolved paths for one profile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    pub profile_dir: PathBuf,
    pub lock_file: PathBuf,
    pub command_socket: PathBuf,
    pub log_file: PathBuf,
    pub fault_log_file: PathBuf,
    pub config_file: PathBuf,
    pub daemon_socket: PathBuf,
    pub mounts_file: PathBuf,
    /// Installed launcher entry that autostart links to
    pub desktop_file: PathBuf,
    /// Link location inside the session autostart directory
    pub autostart_file: PathBuf,
}

impl AppPaths {
    /// Resolve paths for the current user
    pub fn discover() -> Result<Self> {
        let base = BaseDirs::new().ok_or_else(|| anyhow!("Failed to determine home directory"))?;

        let profile_dir = match std::env::var_os(PROFILE_ENV) {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => base.home_dir().join(PROFILE_DIR_NAME),
        };

        let mut paths = Self::under(&profile_dir);
        paths.desktop_file = base
            .data_dir()
            .join("applications")
            .join(DESKTOP_FILE_NAME);
        paths.autostart_file = base.config_dir().join("autostart").join(DESKTOP_FILE_NAME);
        Ok(paths)
    }

    /// Lay out every path beneath `profile_dir`
    pub fn under(profile_dir: &Path) -> Self {
        Self {
            profile_dir: profile_dir.to_path_buf(),
            lock_file: profile_dir.join("frontend.lock"),
            command_socket: profile_dir.join("frontend.sock"),
            log_file: profile_dir.join("log.txt"),
            fault_log_file: profile_dir.join("frontend.fault.log"),
            config_file: profile_dir.join("etc").join("frontend.json"),
            daemon_socket: profile_dir.join("tmp").join("xwared.sock"),
            mounts_file: profile_dir.join("mounts"),
            desktop_file: profile_dir.join(DESKTOP_FILE_NAME),
            autostart_file: profile_dir.join("autostart").join(DESKTOP_FILE_NAME),
        }
    }

    /// Create the profile directory tree. Safe to call repeatedly.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [
            self.profile_dir.clone(),
            self.profile_dir.join("etc"),
            self.profile_dir.join("tmp"),
        ] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create data directory {}", dir.display()))?;
        }
        Ok(())
    }
}
