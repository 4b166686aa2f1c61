//! Error types for the `candlefill` crate.
//!
//! All fallible operations in this crate return [`Result<T>`], which is an
//! alias for `std::result::Result<T, BackfillError>`.
//!
//! [`BackfillError`] covers:
//! - **HTTP transport errors** — Network, TLS, timeout failures
//! - **Handshake failures** — The session-validation request was rejected
//! - **JSON errors** — Response envelope deserialization failures
//! - **I/O errors** — Store file read/write failures
//! - **Date errors** — Malformed resume dates or configuration dates
//! - **Setup errors** — Catastrophic configuration problems (unwritable root)
//!
//! Per the propagation policy, only setup-class errors escape the top-level
//! [`backfill`](crate::backfill::backfill) call; everything else is recovered
//! (retried, re-queued, or logged and isolated) inside the subsystem.

/// All possible errors produced by the backfill subsystem.
#[derive(Debug, thiserror::Error)]
pub enum BackfillError {
    /// A network or transport-level error from `reqwest`.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The initial session handshake was rejected, aborting the run.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// Failed to deserialize a JSON response body.
    #[error("JSON deserialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// A store file could not be read or written.
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A date string could not be parsed.
    #[error("invalid date: {0}")]
    Date(#[from] chrono::ParseError),

    /// The subsystem could not be set up at all (e.g. root path not writable).
    #[error("setup error: {0}")]
    Setup(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, BackfillError>;
