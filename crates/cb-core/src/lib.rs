//! Session broker and job dispatcher for the Command Bridge.
//!
//! This crate ties the job ledger to the peer session: the [`SessionBroker`]
//! serializes all command traffic through the single peer connection, and
//! the [`Dispatcher`] drives one job from claimed to terminal, converting
//! every failure into a `failed` job record instead of letting it propagate.

pub mod broker;
pub mod dispatcher;

/// Result type for bridge operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type uniting the ledger and peer failure domains.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Store error: {0}")]
    Store(#[from] cb_local_db::Error),

    #[error(transparent)]
    Peer(#[from] cb_peer::PeerError),
}

/// Serialization gate over the one peer connection.
pub use broker::SessionBroker;

/// Per-job dispatch from claim to terminal state.
pub use dispatcher::{DispatchHandle, Dispatcher};
