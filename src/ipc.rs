/// Command channel between a secondary launch and the primary instance
/// Uses a Unix domain socket inside the profile directory
///
/// Each message is a 4-byte little-endian length followed by a bincode payload.
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;

/// Largest frame either side will accept
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Read/write timeout on both ends of a connection
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// Ordered, opaque command-line arguments forwarded to the primary
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandBatch(Vec<String>);

impl CommandBatch {
    pub fn new(commands: Vec<String>) -> Self {
        Self(commands)
    }

    /// Everything after the program name
    pub fn from_args(args: impl IntoIterator<Item = String>) -> Self {
        Self(args.into_iter().skip(1).collect())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<String> {
        self.0
    }
}

impl From<Vec<String>> for CommandBatch {
    fn from(commands: Vec<String>) -> Self {
        Self(commands)
    }
}

/// Messages from a secondary launch to the primary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelayRequest {
    /// Hand the batch to the primary's command handler
    Submit(CommandBatch),
}

/// Primary's answer to a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelayReply {
    /// Batch was queued for the handler
    Accepted,
    /// Batch was refused, with a reason for the log
    Rejected(String),
}

#[derive(Debug, Error)]
pub enum IpcError {
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed message: {0}")]
    Codec(#[from] bincode::Error),
    #[error("frame of {0} bytes exceeds limit")]
    FrameTooLarge(usize),
}

pub fn write_frame<T: Serialize, W: Write>(writer: &mut W, message: &T) -> Result<(), IpcError> {
    let data = bincode::serialize(message)?;
    if data.len() > MAX_FRAME_LEN {
        return Err(IpcError::FrameTooLarge(data.len()));
    }

    writer.write_all(&(data.len() as u32).to_le_bytes())?;
    writer.write_all(&data)?;
    writer.flush()?;
    Ok(())
}

pub fn read_frame<T: DeserializeOwned, R: Read>(reader: &mut R) -> Result<T, IpcError> {
    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes)?;

    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_FRAME_LEN {
        return Err(IpcError::FrameTooLarge(len));
    }

    let mut buffer = vec![0u8; len];
    reader.read_exact(&mut buffer)?;
    Ok(bincode::deserialize(&buffer)?)
}

/// Listening end of the command channel, owned by the primary instance
pub struct CommandServer {
    path: PathBuf,
    shutdown: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl CommandServer {
    /// Bind the endpoint and start accepting batches on a background thread.
    ///
    /// Each accepted connection is served on its own thread, so a client that
    /// never sends its request cannot hold up later launches. `on_batch` runs
    /// on the connection thread, one call at a time; returning `Err` sends a
    /// rejection back to the client. Any socket file already at `path` is
    /// treated as stale, since only the lock holder may bind here.
    pub fn bind<F>(path: &Path, on_batch: F) -> Result<Self, IpcError>
    where
        F: Fn(CommandBatch) -> Result<(), String> + Send + 'static,
    {
        match std::fs::remove_file(path) {
            Ok(()) => tracing::info!("Removed stale command socket {}", path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let listener = UnixListener::bind(path)?;
        tracing::info!("Command server listening on {}", path.display());

        let on_batch = Arc::new(Mutex::new(on_batch));
        let shutdown = Arc::new(AtomicBool::new(false));
        let stop = Arc::clone(&shutdown);
        let worker = std::thread::Builder::new()
            .name("command-server".into())
            .spawn(move || {
                for stream in listener.incoming() {
                    if stop.load(Ordering::SeqCst) {
                        break;
                    }
                    match stream {
                        Ok(stream) => {
                            let handler = Arc::clone(&on_batch);
                            let spawned = std::thread::Builder::new()
                                .name("command-client".into())
                                .spawn(move || {
                                    if let Err(e) = serve_client(stream, &*handler) {
                                        tracing::warn!("Command client error: {}", e);
                                    }
                                });
                            if let Err(e) = spawned {
                                tracing::warn!("Failed to spawn command client thread: {}", e);
                            }
                        }
                        Err(e) => tracing::warn!("Accept failed on command socket: {}", e),
                    }
                }
                tracing::debug!("Command server thread exiting");
            })?;

        Ok(Self {
            path: path.to_path_buf(),
            shutdown,
            worker: Some(worker),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stop accepting and remove the socket file
    pub fn shutdown(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };

        self.shutdown.store(true, Ordering::SeqCst);
        // Wake the blocking accept so the thread sees the flag
        let _ = UnixStream::connect(&self.path);
        let _ = worker.join();
        let _ = std::fs::remove_file(&self.path);
        tracing::info!("Command server closed");
    }
}

impl Drop for CommandServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn serve_client<F>(mut stream: UnixStream, on_batch: &Mutex<F>) -> Result<(), IpcError>
where
    F: Fn(CommandBatch) -> Result<(), String>,
{
    stream.set_read_timeout(Some(DEFAULT_TIMEOUT))?;
    stream.set_write_timeout(Some(DEFAULT_TIMEOUT))?;

    let reply = match read_frame::<RelayRequest, _>(&mut stream)? {
        RelayRequest::Submit(batch) if batch.is_empty() => {
            RelayReply::Rejected("empty command batch".into())
        }
        RelayRequest::Submit(batch) => {
            tracing::info!("Received {} relayed commands", batch.len());
            let handled = (*on_batch.lock())(batch);
            match handled {
                Ok(()) => RelayReply::Accepted,
                Err(reason) => RelayReply::Rejected(reason),
            }
        }
    };

    write_frame(&mut stream, &reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::unbounded;

    fn batch(items: &[&str]) -> CommandBatch {
        CommandBatch::new(items.iter().map(|s| s.to_string()).collect())
    }

    fn submit(path: &Path, commands: CommandBatch) -> RelayReply {
        let mut stream = UnixStream::connect(path).unwrap();
        write_frame(&mut stream, &RelayRequest::Submit(commands)).unwrap();
        read_frame(&mut stream).unwrap()
    }

    #[test]
    fn test_from_args_skips_program_name() {
        let args = ["xware-desktop", "pause", "all"].map(String::from);
        assert_eq!(CommandBatch::from_args(args), batch(&["pause", "all"]));
        assert!(CommandBatch::from_args(["xware-desktop".to_string()]).is_empty());
    }

    #[test]
    fn test_oversized_frame_is_refused() {
        let mut bytes = ((MAX_FRAME_LEN + 1) as u32).to_le_bytes().to_vec();
        bytes.extend_from_slice(&[0u8; 8]);

        let result = read_frame::<RelayReply, _>(&mut bytes.as_slice());
        assert!(matches!(result, Err(IpcError::FrameTooLarge(_))));
    }

    #[test]
    fn test_server_forwards_batch_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frontend.sock");
        let (tx, rx) = unbounded();

        let _server = CommandServer::bind(&path, move |batch| {
            tx.send(batch).map_err(|e| e.to_string())
        })
        .unwrap();

        assert_eq!(submit(&path, batch(&["start", "task1"])), RelayReply::Accepted);
        assert_eq!(rx.recv_timeout(DEFAULT_TIMEOUT).unwrap(), batch(&["start", "task1"]));
    }

    #[test]
    fn test_server_rejects_empty_batch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frontend.sock");

        let _server = CommandServer::bind(&path, |_| Ok(())).unwrap();

        assert!(matches!(submit(&path, CommandBatch::default()), RelayReply::Rejected(_)));
    }

    #[test]
    fn test_handler_error_becomes_rejection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frontend.sock");

        let _server = CommandServer::bind(&path, |_| Err("closing".to_string())).unwrap();

        assert_eq!(
            submit(&path, batch(&["pause", "all"])),
            RelayReply::Rejected("closing".into())
        );
    }

    #[test]
    fn test_idle_client_does_not_block_relay() {
        use crate::relay::{RelayClient, RelayOutcome};

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frontend.sock");
        let (tx, rx) = unbounded();

        let _server = CommandServer::bind(&path, move |batch| {
            tx.send(batch).map_err(|e| e.to_string())
        })
        .unwrap();

        // Connected but never sends a request
        let _idle = UnixStream::connect(&path).unwrap();

        let outcome = RelayClient::new(&path)
            .with_timeout(Duration::from_millis(500))
            .relay(&batch(&["pause", "all"]));

        assert_eq!(outcome, RelayOutcome::Delivered);
        assert_eq!(rx.recv_timeout(DEFAULT_TIMEOUT).unwrap(), batch(&["pause", "all"]));
    }

    #[test]
    fn test_stale_socket_replaced_and_removed_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frontend.sock");
        std::fs::write(&path, b"").unwrap();

        let mut server = CommandServer::bind(&path, |_| Ok(())).unwrap();
        assert_eq!(submit(&path, batch(&["x"])), RelayReply::Accepted);

        server.shutdown();
        assert!(!path.exists());
    }
}
