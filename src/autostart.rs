//! Start-on-login toggle
//!
//! Enabled means a symlink to the installed `.desktop` entry exists in the
//! session autostart directory.

use crate::config::AppPaths;
use anyhow::{Context, Result};
use std::fs;
use std::io;
use std::path::PathBuf;

pub struct Autostart {
    desktop_file: PathBuf,
    link: PathBuf,
}

impl Autostart {
    pub fn new(paths: &AppPaths) -> Self {
        Self {
            desktop_file: paths.desktop_file.clone(),
            link: paths.autostart_file.clone(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        fs::symlink_metadata(&self.link).is_ok()
    }

    pub fn set_enabled(&self, on: bool) -> Result<()> {
        if on {
            if self.is_enabled() {
                return Ok(());
            }
            if let Some(dir) = self.link.parent() {
                fs::create_dir_all(dir)
                    .with_context(|| format!("Failed to create {}", dir.display()))?;
            }
            std::os::unix::fs::symlink(&self.desktop_file, &self.link)
                .with_context(|| format!("Failed to link {}", self.link.display()))?;
            tracing::info!("Autostart enabled");
        } else {
            match fs::remove_file(&self.link) {
                Ok(()) => tracing::info!("Autostart disabled"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(e).with_context(|| format!("Failed to remove {}", self.link.display()))
                }
            }
        }
        Ok(())
    }
}
