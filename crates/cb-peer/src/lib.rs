//! TCP session and framing toward the Command Bridge peer process.
//!
//! One [`PeerSession`] owns one connection to the peer. Commands go out as
//! single-write JSON frames; responses are read incrementally until the
//! accumulated bytes parse as a complete JSON value. Any I/O failure
//! invalidates the socket handle, forcing a lazy reconnect on the next use.

pub mod session;

/// Result type for peer communication.
pub type Result<T> = std::result::Result<T, PeerError>;

/// Errors that can occur when communicating with the peer.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// The peer socket could not be reached or maintained.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Response bytes never resolved to valid JSON, even after salvage.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The peer explicitly replied with an error status.
    #[error("Peer command error: {0}")]
    Command(String),

    /// No complete message arrived within the receive deadline.
    #[error("Timeout error: {0}")]
    Timeout(String),
}

pub use session::{PeerSession, DEFAULT_RECV_TIMEOUT};
