/// Fake mount table for the daemon
///
/// The daemon only offers download targets that look like mount points, so
/// the frontend writes a table listing each configured download directory.
use crate::settings::{Settings, MOUNTS, MOUNT_DIRS};
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

pub struct MountsFaker {
    path: PathBuf,
}

impl MountsFaker {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Configured download directories, in settings order, without blanks
    pub fn configured_dirs(settings: &Settings) -> Vec<String> {
        settings
            .get(MOUNTS, MOUNT_DIRS)
            .unwrap_or_default()
            .split(';')
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// One fstab-style line per directory
    pub fn render(dirs: &[String]) -> String {
        dirs.iter()
            .enumerate()
            .map(|(index, dir)| {
                let escaped = dir.replace(' ', "\\040");
                format!("xware-fake{} {} fuseblk rw,relatime 0 0\n", index, escaped)
            })
            .collect()
    }

    /// Rewrite the table from current settings
    pub fn sync(&self, settings: &Settings) -> Result<usize> {
        let dirs = Self::configured_dirs(settings);
        fs::write(&self.path, Self::render(&dirs))
            .with_context(|| format!("Failed to write {}", self.path.display()))?;
        tracing::debug!("Wrote {} fake mounts to {}", dirs.len(), self.path.display());
        Ok(dirs.len())
    }
}
