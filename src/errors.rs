//! Rack Sync Error Hierarchy
//!
//! Every failure the engine can hit is fatal: errors travel up through typed
//! results to the supervisor, which logs them and decides how the process
//! ends. The variants below are grouped by the component that raises them.

use std::path::PathBuf;
use std::time::Duration;

use config::ConfigError;
use tokio::task::JoinError;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Session could not be established or was irrecoverably lost
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Coverage over the watched subtree could not be (re)registered
    #[error(transparent)]
    Watch(#[from] WatchError),

    /// A host identifier could not be turned into an address
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    /// Topology file could not be written
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Listing or fetching from the coordination service failed
    #[error(transparent)]
    Coordination(#[from] CoordinationError),

    /// Configuration loading failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Unrecoverable failures requiring process termination
    #[error("Fatal error: {0}")]
    Fatal(String),
}

/// Raw failures reported by a coordination-service client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoordinationError {
    #[error("Node does not exist: {0}")]
    NoNode(String),

    /// Session expired or was closed underneath the call
    #[error("Session lost while accessing {0}")]
    SessionLost(String),

    /// Transient disconnect, the session may still come back
    #[error("Connection loss while accessing {0}")]
    ConnectionLoss(String),

    #[error("Coordination client error: {0}")]
    Other(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// Retry policy exhaustion
    #[error("Failed to connect to {endpoint} after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        endpoint: String,
        attempts: usize,
        last_error: String,
    },

    /// A single connect attempt did not finish in time
    #[error("Connect attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error("Connect attempt failed: {0}")]
    Attempt(String),

    #[error("Background task failed: {0}")]
    TaskFailed(#[from] JoinError),
}

#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// Base path vanished while we tried to cover it
    #[error("Watched path {0} no longer exists")]
    PathGone(String),

    /// Session could not be used to register a watch
    #[error("Failed to register watch on {path}: {source}")]
    Registration {
        path: String,
        #[source]
        source: CoordinationError,
    },

    #[error("Session closed, watch coverage on {0} ended")]
    SessionClosed(String),

    #[error("Change signal receiver dropped")]
    SignalChannelClosed,
}

#[derive(Debug, thiserror::Error)]
pub enum ResolutionError {
    #[error("Failed to resolve host {host}: {reason}")]
    Unresolvable { host: String, reason: String },

    #[error("Resolver returned no address for host {0}")]
    NoAddress(String),
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Disk I/O failures while writing the topology file
    #[error(transparent)]
    IoError(#[from] std::io::Error),

    /// I/O failure tied to a concrete path
    #[error("Error occurred at path: {path}")]
    PathError {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Atomic rename of the temp file over the destination failed
    #[error("Failed to persist {path}: {source}")]
    Persist {
        path: PathBuf,
        source: std::io::Error,
    },
}

// ============== Conversion Implementations ============== //
impl From<JoinError> for Error {
    fn from(err: JoinError) -> Self {
        ConnectionError::TaskFailed(err).into()
    }
}

impl Error {
    /// Short, stable label for the error family. Used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Connection(_) => "connection",
            Error::Watch(_) => "watch",
            Error::Resolution(_) => "resolution",
            Error::Storage(_) => "io",
            Error::Coordination(_) => "coordination",
            Error::Config(_) => "config",
            Error::Fatal(_) => "fatal",
        }
    }
}
