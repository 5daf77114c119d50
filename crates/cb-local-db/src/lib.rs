//! SQLite job ledger and project registry for the Command Bridge.
//!
//! This crate provides durable storage for command jobs and their FIFO
//! pending queue, plus the project registry jobs may attach to. All job and
//! queue mutation goes through [`JobStore`]; the queue table references
//! exactly the set of jobs that are currently pending.

pub mod connection;
pub mod migrations;
pub mod models;
pub mod schema;

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for ledger operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Migration error: {message}")]
    Migration { message: String },

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Generic ledger error: {0}")]
    Generic(String),
}

impl Error {
    /// Create a new migration error.
    pub fn migration<S: Into<String>>(message: S) -> Self {
        Self::Migration {
            message: message.into(),
        }
    }

    /// Create a new generic ledger error.
    pub fn generic<S: Into<String>>(message: S) -> Self {
        Self::Generic(message.into())
    }
}

/// Database connection and management.
pub use connection::Database;

/// Ledger models and operations.
pub use models::{
    Job, JobId, JobStatus, JobStore, Project, ProjectId, ProjectStatus, ProjectStore,
    ProjectUpdate,
};

/// Schema definitions and constants.
pub use schema::*;
