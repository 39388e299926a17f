//! Unified error type.

use std::io;

/// The error type returned by baton's fallible operations.
///
/// Routing misses are never errors: an unknown controller or action becomes
/// a not-found [`Response`](crate::Response). This type surfaces
/// infrastructure failures: building the action table, binding or inheriting
/// the listener, and launching a successor process.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] io::Error),

    /// The controller set handed to the registry is malformed.
    #[error("registration: {0}")]
    Registration(String),

    /// A restart was requested while the listener was draining or closed.
    #[error("listener is not active")]
    NotActive,

    /// A restart was requested while another one is still waiting on its
    /// successor.
    #[error("a restart is already in progress")]
    RestartInProgress,

    /// The successor process could not be started.
    #[error("failed to launch successor: {0}")]
    Launch(#[source] io::Error),

    /// The successor went away before acknowledging readiness.
    #[error("successor failed before becoming ready: {0}")]
    SuccessorFailed(String),

    /// Inherit mode was requested but the socket slot is empty or invalid.
    #[error("inherited listener unavailable: {0}")]
    InheritedListener(String),

    #[error("config: {0}")]
    Config(String),
}
