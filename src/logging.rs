//! Log and fault sinks
//!
//! Both are best effort: when a file cannot be opened the frontend logs to
//! stderr and keeps the default panic hook.

use crate::config::AppPaths;
use parking_lot::Mutex;
use std::any::Any;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::Level;

/// Environment variable selecting the log level
pub const LOG_ENV: &str = "XWARE_DESKTOP_LOG";

pub fn level_from_env() -> Level {
    std::env::var(LOG_ENV)
        .ok()
        .and_then(|v| v.trim().parse::<Level>().ok())
        .unwrap_or(Level::INFO)
}

/// Install the global subscriber and the panic hook
pub fn init(paths: &AppPaths) {
    let level = level_from_env();

    let installed = match OpenOptions::new().create(true).append(true).open(&paths.log_file) {
        Ok(file) => tracing_subscriber::fmt()
            .with_max_level(level)
            .with_ansi(false)
            .with_writer(std::sync::Mutex::new(file))
            .try_init(),
        Err(e) => {
            eprintln!("Cannot open {}: {}; logging to stderr", paths.log_file.display(), e);
            tracing_subscriber::fmt()
                .with_max_level(level)
                .with_writer(io::stderr)
                .try_init()
        }
    };
    if let Err(e) = installed {
        eprintln!("Logging already initialized: {}", e);
    }

    if let Err(e) = install_fault_log(&paths.fault_log_file) {
        tracing::warn!("Fault log unavailable at {}: {}", paths.fault_log_file.display(), e);
    }
}

/// Append every panic to `path`, then run the previous hook
pub fn install_fault_log(path: &Path) -> io::Result<()> {
    let file = Mutex::new(OpenOptions::new().create(true).append(true).open(path)?);
    let previous = std::panic::take_hook();

    std::panic::set_hook(Box::new(move |info| {
        let thread = std::thread::current();
        let location = info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_else(|| "unknown location".to_string());
        let line = fault_line(
            thread.name().unwrap_or("<unnamed>"),
            &location,
            &payload_text(info.payload()),
        );

        {
            let mut file = file.lock();
            let _ = file.write_all(line.as_bytes());
            let _ = file.flush();
        }
        tracing::error!("{}", line.trim_end());

        previous(info);
    }));

    Ok(())
}

fn payload_text(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn fault_line(thread: &str, location: &str, message: &str) -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format!("[{}] thread '{}' panicked at {}: {}\n", secs, thread, location, message)
}
