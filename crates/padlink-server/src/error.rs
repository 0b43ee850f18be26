//! Server error types.

use thiserror::Error;

/// Errors that prevent the server from starting or keep it from serving.
///
/// Per-session protocol failures are not errors at this level; they produce
/// wire `Error` replies (or drop the offending connection) and the server
/// keeps running.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Configuration error (bad bind address, unreadable key file, invalid
    /// TLS material). Fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// Transport error (bind failure, accept failure).
    #[error("transport error: {0}")]
    Transport(String),
}
