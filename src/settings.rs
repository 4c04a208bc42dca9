//! Settings accessor
//!
//! Sectioned key/value store persisted as JSON. Reads fall back to the
//! defaults table; a missing or unreadable file never stops startup.
//! Interested components call [`Settings::subscribe`] and are told through a
//! crossbeam channel every time settings are (re)applied.

use crossbeam::channel::{unbounded, Receiver, Sender};
use once_cell::sync::Lazy;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub type Section = BTreeMap<String, String>;
pub type SettingsMap = BTreeMap<String, Section>;

pub const FRONTEND: &str = "frontend";
pub const INTERNAL: &str = "internal";
pub const XWARED: &str = "xwared";
pub const MOUNTS: &str = "mounts";

pub const SHOW_MONITOR_WINDOW: &str = "showmonitorwindow";
pub const NOTIFY_ON_COMMAND: &str = "notifyoncommand";
pub const PREVIOUS_VERSION: &str = "previousversion";
pub const DAEMON_SOCKET: &str = "socket";
pub const MOUNT_DIRS: &str = "dirs";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to write settings to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to serialize settings: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Payload-free "settings were applied" notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettingsApplied;

pub type SubscriptionId = u64;

/// Receiving end of the settings-applied broadcast
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    receiver: Receiver<SettingsApplied>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Pop one pending notification, if any
    pub fn try_next(&self) -> Option<SettingsApplied> {
        self.receiver.try_recv().ok()
    }
}

/// Built-in values for every key the frontend reads
static DEFAULTS: Lazy<SettingsMap> = Lazy::new(|| {
    let mut map = SettingsMap::new();
    let mut put = |section: &str, key: &str, value: &str| {
        map.entry(section.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
    };

    put(FRONTEND, SHOW_MONITOR_WINDOW, "0");
    put(FRONTEND, NOTIFY_ON_COMMAND, "1");
    // A fresh profile reports the last release without the usage guide
    put(INTERNAL, PREVIOUS_VERSION, "0.8");
    put(XWARED, DAEMON_SOCKET, "");
    put(MOUNTS, MOUNT_DIRS, "");

    map
});

/// Owned copy of the defaults table
pub fn default_settings() -> SettingsMap {
    DEFAULTS.clone()
}

pub struct Settings {
    path: PathBuf,
    values: SettingsMap,
    defaults: SettingsMap,
    subscribers: Vec<(SubscriptionId, Sender<SettingsApplied>)>,
    next_id: SubscriptionId,
}

impl Settings {
    /// Load from `path`, substituting defaults for anything missing or corrupt
    pub fn load(path: &Path, defaults: SettingsMap) -> Self {
        let values = match fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<SettingsMap>(&contents) {
                Ok(values) => values,
                Err(e) => {
                    tracing::warn!("Ignoring corrupt settings file {}: {}", path.display(), e);
                    SettingsMap::new()
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => SettingsMap::new(),
            Err(e) => {
                tracing::warn!("Cannot read settings file {}: {}", path.display(), e);
                SettingsMap::new()
            }
        };

        Self {
            path: path.to_path_buf(),
            values,
            defaults,
            subscribers: Vec::new(),
            next_id: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.values
            .get(section)
            .and_then(|s| s.get(key))
            .or_else(|| self.defaults.get(section).and_then(|s| s.get(key)))
            .map(String::as_str)
    }

    pub fn get_bool(&self, section: &str, key: &str) -> bool {
        matches!(
            self.get(section, key).map(|v| v.trim().to_ascii_lowercase()).as_deref(),
            Some("1" | "true" | "yes" | "on")
        )
    }

    pub fn set(&mut self, section: &str, key: &str, value: impl Into<String>) {
        self.values
            .entry(section.to_string())
            .or_default()
            .insert(key.to_string(), value.into());
    }

    pub fn set_bool(&mut self, section: &str, key: &str, value: bool) {
        self.set(section, key, if value { "1" } else { "0" });
    }

    /// Write the explicitly set values back to disk
    pub fn save(&self) -> Result<(), SettingsError> {
        let json = serde_json::to_string_pretty(&self.values)?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| SettingsError::Write {
                path: self.path.clone(),
                source,
            })?;
        }

        fs::write(&self.path, json).map_err(|source| SettingsError::Write {
            path: self.path.clone(),
            source,
        })
    }

    pub fn subscribe(&mut self) -> Subscription {
        let (tx, rx) = unbounded();
        let id = self.next_id;
        self.next_id += 1;
        self.subscribers.push((id, tx));
        Subscription { id, receiver: rx }
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) {
        self.subscribers.retain(|(sub_id, _)| *sub_id != id);
    }

    /// Notify every live subscriber; returns how many were reached
    pub fn apply(&mut self) -> usize {
        tracing::debug!("Applying settings to {} subscribers", self.subscribers.len());
        self.subscribers
            .retain(|(_, tx)| tx.send(SettingsApplied).is_ok());
        self.subscribers.len()
    }
}
