//! Error types for the synchronization core.

use thiserror::Error;

/// Failures an embedding application can act on directly. Handler entry points invoked by
/// the transport never return this — they log and absorb their own errors (see module docs
/// on `full` and `partial::producer`).
#[derive(Debug, Error)]
pub enum NamesyncError {
    #[error("bloom filter parameters infeasible for n={n}, p={p}")]
    InfeasibleBloomParams { n: u64, p: f64 },

    #[error("iblt cell count mismatch: {expected} expected, got {got}")]
    IbltSizeMismatch { expected: usize, got: usize },

    #[error("wire decode failed: {0}")]
    Decode(#[from] postcard::Error),

    #[error("unknown sync prefix: {0}")]
    UnknownPrefix(String),

    #[error("malformed name: {0}")]
    MalformedName(String),
}

pub type Result<T> = std::result::Result<T, NamesyncError>;
