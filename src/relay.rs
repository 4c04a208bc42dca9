//! Command-line client used when another instance owns the lock
//!
//! Every failure collapses into [`RelayOutcome::Unreachable`]; the caller
//! only decides between "exit quietly" and "show the error dialog".

use crate::ipc::{read_frame, write_frame, CommandBatch, IpcError, RelayReply, RelayRequest, DEFAULT_TIMEOUT};
use std::fmt;
use std::io;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Exit status for a contended launch that could not hand off its commands
pub const EXIT_UNREACHABLE: i32 = -1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnreachableReason {
    /// Nothing to forward, so no connection was attempted
    NoCommands,
    /// Socket file is missing
    NoEndpoint,
    /// Socket exists but nobody is accepting
    Refused,
    /// Primary did not answer in time
    Timeout,
    /// Primary answered with a rejection
    Rejected(String),
    Other(String),
}

impl fmt::Display for UnreachableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnreachableReason::NoCommands => write!(f, "no commands to relay"),
            UnreachableReason::NoEndpoint => write!(f, "command socket does not exist"),
            UnreachableReason::Refused => write!(f, "connection refused"),
            UnreachableReason::Timeout => write!(f, "timed out waiting for the running instance"),
            UnreachableReason::Rejected(reason) => write!(f, "rejected: {}", reason),
            UnreachableReason::Other(e) => write!(f, "{}", e),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    Delivered,
    Unreachable(UnreachableReason),
}

impl RelayOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            RelayOutcome::Delivered => 0,
            RelayOutcome::Unreachable(_) => EXIT_UNREACHABLE,
        }
    }
}

pub struct RelayClient {
    endpoint: PathBuf,
    timeout: Duration,
}

impl RelayClient {
    pub fn new(endpoint: &Path) -> Self {
        Self {
            endpoint: endpoint.to_path_buf(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Forward `commands` to the primary instance
    pub fn relay(&self, commands: &CommandBatch) -> RelayOutcome {
        if commands.is_empty() {
            return RelayOutcome::Unreachable(UnreachableReason::NoCommands);
        }

        match self.submit(commands) {
            Ok(RelayReply::Accepted) => {
                tracing::info!("Relayed {} commands to running instance", commands.len());
                RelayOutcome::Delivered
            }
            Ok(RelayReply::Rejected(reason)) => {
                tracing::warn!("Running instance rejected commands: {}", reason);
                RelayOutcome::Unreachable(UnreachableReason::Rejected(reason))
            }
            Err(e) => {
                let reason = classify(e);
                tracing::warn!("Cannot reach running instance at {}: {}", self.endpoint.display(), reason);
                RelayOutcome::Unreachable(reason)
            }
        }
    }

    fn submit(&self, commands: &CommandBatch) -> Result<RelayReply, IpcError> {
        let mut stream = UnixStream::connect(&self.endpoint)?;
        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(self.timeout))?;

        write_frame(&mut stream, &RelayRequest::Submit(commands.clone()))?;
        read_frame(&mut stream)
    }
}

fn classify(err: IpcError) -> UnreachableReason {
    match err {
        IpcError::Io(e) => match e.kind() {
            io::ErrorKind::NotFound => UnreachableReason::NoEndpoint,
            io::ErrorKind::ConnectionRefused => UnreachableReason::Refused,
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => UnreachableReason::Timeout,
            _ => UnreachableReason::Other(e.to_string()),
        },
        other => UnreachableReason::Other(other.to_string()),
    }
}
