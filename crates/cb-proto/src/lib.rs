//! Wire protocol types and framing for the Command Bridge peer protocol.
//!
//! The peer speaks UTF-8 JSON over a raw TCP stream with no length prefix:
//! a request is a single JSON object written in one send, and a response is
//! complete as soon as the accumulated bytes parse as a JSON value. This
//! crate owns the request/response shapes and the incremental frame decoder
//! that implements that rule, so the transport and the job ledger never need
//! to know how message boundaries are detected.

pub mod framing;
pub mod types;

/// Incremental frame detection for peer responses.
pub use framing::{FrameDecoder, JsonFrameDecoder};

/// Request and response shapes on the peer wire.
pub use types::{Command, PeerResponse};
