//! Xware Desktop frontend
//!
//! Launcher for the desktop frontend of the Xware download daemon
//!
//! Architecture:
//! - One primary process per profile, guarded by an advisory lock (instance module)
//! - Later launches relay their arguments to the primary and exit (relay, ipc modules)
//! - The primary owns settings, tray, windows and the daemon proxy (app module)

pub mod app;
pub mod autostart;
pub mod config;
pub mod daemon;
pub mod instance;
pub mod ipc;
pub mod logging;
pub mod monitor;
pub mod mounts;
pub mod notify;
pub mod relay;
pub mod settings;
pub mod tray;
pub mod windows;
