//! Error types for prompt-dj-rs.

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type.
///
/// Nothing in this crate is fatal: every variant is recoverable back to a
/// stable session state. Superseded or cancelled work is discarded silently
/// and never surfaces as an error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid input: unknown channel id, or a live session started with no
    /// active channels.
    #[error("validation: {0}")]
    Validation(String),

    /// The remote generation call rejected or timed out.
    #[error("generation: {0}")]
    Generation(String),

    /// An audio handle was returned but failed to decode/load into a player.
    #[error("load: {0}")]
    Load(String),

    /// I/O error (preference store).
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error (preference store records).
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}
