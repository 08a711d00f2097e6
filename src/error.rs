//! Failure taxonomy for the detection engine.
//!
//! Every failure is contained at the boundary where it occurs; the only
//! externally visible effect is an empty or partial result set.

use thiserror::Error;

pub type ScoutResult<T> = Result<T, ScoutError>;

#[derive(Error, Debug)]
pub enum ScoutError {
    /// The catalog index could not be retrieved or parsed. Fatal for the
    /// load attempt; the caller may retry.
    #[error("catalog index unavailable: {0}")]
    CatalogIndex(String),

    /// A single detector definition is malformed. Logged and skipped;
    /// never aborts a catalog load.
    #[error("malformed detector definition '{name}': {reason}")]
    Definition { name: String, reason: String },

    /// A rule pattern failed to compile or match. Treated as a non-match.
    #[error("pattern error: {0}")]
    Pattern(String),

    /// Cross-context message delivery failed (target context torn down).
    #[error("channel failure: {0}")]
    Channel(String),

    /// A host key-value operation failed. Callers fall back to in-memory
    /// defaults.
    #[error("storage failure: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
