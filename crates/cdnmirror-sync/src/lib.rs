//! cdnmirror sync - from filesystem events to remote operations
//!
//! Provides:
//! - A registry of inotify watches with path <-> handle lookup
//! - The inotify event source, integrated with the tokio reactor
//! - Pairing of rename halves by cookie, with orphan timeout
//! - Translation of resolved events into jobs
//! - Per-destination workers with ordered queues and retry
//!
//! ## Modules
//!
//! - [`registry`] - watch bookkeeping and recursive watch installation
//! - [`events`] - event types and the [`events::EventSource`] trait
//! - [`inotify`] - the Linux inotify backend and event reader
//! - [`pairing`] - moved-from / moved-to correlation
//! - [`translator`] - event + rule -> job
//! - [`worker`] - worker manager, workers, retry
//! - [`remote`] - object-store request builders and listing format
//! - [`pipeline`] - the watch loop tying it all together

pub mod events;
pub mod inotify;
pub mod pairing;
pub mod pipeline;
pub mod registry;
pub mod remote;
pub mod translator;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

use std::path::PathBuf;

use cdnmirror_core::ports::TransportError;
use thiserror::Error;

use crate::events::WatchHandle;

/// Errors from the watch registry and the event source
#[derive(Debug, Error)]
pub enum WatchError {
    /// The path already has a watch
    #[error("already watching {0}")]
    DuplicateWatch(PathBuf),

    /// The OS returned a handle that is still mapped to another path
    /// (the same directory reached through two paths)
    #[error("watch handle {handle} for {path} is already used by {existing}")]
    HandleInUse {
        handle: WatchHandle,
        path: PathBuf,
        existing: PathBuf,
    },

    /// The handle is not (or no longer) registered
    #[error("unknown watch handle {0}")]
    UnknownHandle(WatchHandle),

    /// Installing or walking a watch failed
    #[error("cannot watch {path}: {source}")]
    Os {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The notification channel itself failed; watching cannot continue
    #[error("notification channel failed: {0}")]
    Fatal(#[source] std::io::Error),
}

impl WatchError {
    /// Whether the watch loop must stop
    pub fn is_fatal(&self) -> bool {
        matches!(self, WatchError::Fatal(_))
    }
}

/// Outcome classes of a failed remote operation
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Network/TLS failure, timeout, 5xx or 429; worth retrying
    #[error("transient failure: {0}")]
    Transient(String),

    /// The request itself is wrong (4xx) or cannot be built
    #[error("permanent failure{}: {message}", status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    Permanent {
        status: Option<u16>,
        message: String,
    },

    /// Retried up to the attempt ceiling without success
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },
}

impl RemoteError {
    /// Classifies a response status; `None` for 2xx
    pub fn from_status(status: u16, context: &str) -> Option<Self> {
        match status {
            200..=299 => None,
            429 | 500..=599 => Some(RemoteError::Transient(format!("{context}: HTTP {status}"))),
            _ => Some(RemoteError::Permanent {
                status: Some(status),
                message: context.to_string(),
            }),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        RemoteError::Permanent {
            status: None,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Transient(_))
    }

    /// HTTP status of a permanent failure, when there was one
    pub fn status(&self) -> Option<u16> {
        match self {
            RemoteError::Permanent { status, .. } => *status,
            _ => None,
        }
    }
}

impl From<TransportError> for RemoteError {
    fn from(err: TransportError) -> Self {
        if err.is_transient() {
            RemoteError::Transient(err.to_string())
        } else {
            RemoteError::permanent(err.to_string())
        }
    }
}
