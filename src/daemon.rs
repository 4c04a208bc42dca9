//! Proxy for the background download daemon
//!
//! Commands relayed from the command line are forwarded to the daemon's
//! control socket as newline-delimited JSON. While the daemon is down they
//! wait in a bounded queue and go out on the next successful contact.
//!
//! Every flush uses a fresh connection. A batch leaves the queue only after
//! its whole line was written, so a write that fails halfway is retried in
//! full on the next connection, and the daemon discards the cut-off line
//! when the broken one closes.

use crate::config::AppPaths;
use crate::ipc::CommandBatch;
use crate::settings::{Settings, DAEMON_SOCKET, XWARED};
use serde::Serialize;
use std::collections::VecDeque;
use std::io::{self, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const WRITE_TIMEOUT: Duration = Duration::from_secs(2);

/// Batches kept while the daemon is unreachable; the oldest go first
pub const MAX_PENDING: usize = 64;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("daemon socket error: {0}")]
    Io(#[from] io::Error),
    #[error("failed to encode daemon request: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    Queued,
}

#[derive(Serialize)]
struct DaemonRequest<'a> {
    method: &'a str,
    params: &'a [String],
}

pub struct DaemonProxy {
    socket: PathBuf,
    pending: VecDeque<CommandBatch>,
}

impl DaemonProxy {
    pub fn new(paths: &AppPaths, settings: &Settings) -> Self {
        let socket = match settings.get(XWARED, DAEMON_SOCKET) {
            Some(custom) if !custom.trim().is_empty() => PathBuf::from(custom.trim()),
            _ => paths.daemon_socket.clone(),
        };
        tracing::info!("Daemon control socket: {}", socket.display());

        Self {
            socket,
            pending: VecDeque::new(),
        }
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn is_online(&self) -> bool {
        UnixStream::connect(&self.socket).is_ok()
    }

    /// Queue `batch` and try to flush everything pending
    pub fn submit(&mut self, batch: CommandBatch) -> Result<Delivery, DaemonError> {
        self.pending.push_back(batch);
        while self.pending.len() > MAX_PENDING {
            if let Some(dropped) = self.pending.pop_front() {
                tracing::warn!(
                    "Daemon queue full, dropping {} oldest commands",
                    dropped.len()
                );
            }
        }
        self.flush()?;
        Ok(if self.pending.is_empty() {
            Delivery::Sent
        } else {
            Delivery::Queued
        })
    }

    /// Send queued batches in order; returns how many went out
    pub fn flush(&mut self) -> Result<usize, DaemonError> {
        if self.pending.is_empty() {
            return Ok(0);
        }

        let mut stream = match UnixStream::connect(&self.socket) {
            Ok(stream) => stream,
            Err(e) if matches!(e.kind(), io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused) => {
                tracing::debug!("Daemon offline, {} batches queued", self.pending.len());
                return Ok(0);
            }
            Err(e) => return Err(e.into()),
        };
        stream.set_write_timeout(Some(WRITE_TIMEOUT))?;

        let mut sent = 0;
        while let Some(batch) = self.pending.front() {
            let line = encode_line(batch)?;
            if let Err(e) = stream.write_all(&line).and_then(|()| stream.flush()) {
                tracing::warn!(
                    "Daemon write failed after {} batches, {} kept for the next connection: {}",
                    sent,
                    self.pending.len(),
                    e
                );
                return Err(e.into());
            }

            self.pending.pop_front();
            sent += 1;
        }

        tracing::info!("Forwarded {} command batches to daemon", sent);
        Ok(sent)
    }
}

fn encode_line(batch: &CommandBatch) -> Result<Vec<u8>, serde_json::Error> {
    let request = DaemonRequest {
        method: "commands",
        params: batch.as_slice(),
    };
    let mut line = serde_json::to_vec(&request)?;
    line.push(b'\n');
    Ok(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::default_settings;
    use std::io::{BufRead, BufReader};
    use std::os::unix::net::UnixListener;

    fn setup() -> (tempfile::TempDir, AppPaths, Settings) {
        let dir = tempfile::tempdir().unwrap();
        let paths = AppPaths::under(dir.path());
        paths.ensure_dirs().unwrap();
        let settings = Settings::load(&paths.config_file, default_settings());
        (dir, paths, settings)
    }

    fn batch(items: &[&str]) -> CommandBatch {
        CommandBatch::new(items.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn test_socket_override_from_settings() {
        let (_dir, paths, mut settings) = setup();
        assert_eq!(DaemonProxy::new(&paths, &settings).socket(), paths.daemon_socket);

        settings.set(XWARED, DAEMON_SOCKET, "/run/xware/ctl.sock");
        assert_eq!(
            DaemonProxy::new(&paths, &settings).socket(),
            Path::new("/run/xware/ctl.sock")
        );
    }

    #[test]
    fn test_offline_daemon_queues() {
        let (_dir, paths, settings) = setup();
        let mut proxy = DaemonProxy::new(&paths, &settings);

        assert!(!proxy.is_online());
        assert_eq!(proxy.submit(batch(&["start", "task1"])).unwrap(), Delivery::Queued);
        assert_eq!(proxy.pending(), 1);
    }

    #[test]
    fn test_offline_queue_is_capped_dropping_oldest() {
        let (_dir, paths, settings) = setup();
        let mut proxy = DaemonProxy::new(&paths, &settings);

        for i in 0..MAX_PENDING + 3 {
            proxy.submit(batch(&["start", &format!("task{}", i)])).unwrap();
        }

        assert_eq!(proxy.pending(), MAX_PENDING);
        assert_eq!(proxy.pending.front(), Some(&batch(&["start", "task3"])));
        assert_eq!(
            proxy.pending.back(),
            Some(&batch(&["start", &format!("task{}", MAX_PENDING + 2)]))
        );
    }

    #[test]
    fn test_encoded_line_is_one_complete_request() {
        let line = encode_line(&batch(&["pause", "all"])).unwrap();

        assert_eq!(line.iter().filter(|&&b| b == b'\n').count(), 1);
        assert_eq!(line.last(), Some(&b'\n'));
        assert_eq!(line, [&br#"{"method":"commands","params":["pause","all"]}"#[..], b"\n"].concat());
    }

    #[test]
    fn test_queue_flushed_in_order_once_online() {
        let (_dir, paths, settings) = setup();
        let mut proxy = DaemonProxy::new(&paths, &settings);
        proxy.submit(batch(&["pause", "all"])).unwrap();

        let listener = UnixListener::bind(&paths.daemon_socket).unwrap();
        let reader = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            BufReader::new(stream)
                .lines()
                .map(|l| l.unwrap())
                .collect::<Vec<_>>()
        });

        assert_eq!(proxy.submit(batch(&["start", "task1"])).unwrap(), Delivery::Sent);
        drop(proxy);

        let lines = reader.join().unwrap();
        assert_eq!(
            lines,
            vec![
                r#"{"method":"commands","params":["pause","all"]}"#,
                r#"{"method":"commands","params":["start","task1"]}"#,
            ]
        );
    }
}
