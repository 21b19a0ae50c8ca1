use crate::resolution::Resolution;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// All errors generated in `barter-rollup`.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Deserialize, Serialize, Error)]
pub enum RollupError {
    #[error("decimal result needs {digits} significant digits, configured maximum is {max_digits}")]
    PrecisionOverflow { digits: u32, max_digits: u32 },

    #[error("failed to parse decimal from '{input}': {reason}")]
    Parse { input: String, reason: String },

    #[error("sub-bar epoch {epoch} lies outside {resolution} window starting {window_start}")]
    OutOfWindow {
        resolution: Resolution,
        window_start: DateTime<Utc>,
        epoch: DateTime<Utc>,
    },

    #[error("sub-bars are not ascending: {next} follows {previous}")]
    UnorderedSubBars {
        previous: DateTime<Utc>,
        next: DateTime<Utc>,
    },

    #[error("cannot aggregate an empty {resolution} window starting {window_start}")]
    EmptyWindow {
        resolution: Resolution,
        window_start: DateTime<Utc>,
    },

    #[error("bar windows do not match: spot {spot} vs futures {futures}")]
    WindowMismatch {
        spot: DateTime<Utc>,
        futures: DateTime<Utc>,
    },

    #[error("tenor index {0} outside 0..{max}", max = crate::curve::TENOR_SLOTS)]
    InvalidTenorIndex(usize),

    #[error("premium index denominator (spot close) is zero")]
    DivisionByZero,

    #[error("bar at {epoch} violates OHLCV invariants: {reason}")]
    InvalidBar {
        epoch: DateTime<Utc>,
        reason: String,
    },

    #[error("invalid premium pair: {0}")]
    InvalidPair(String),

    #[error("pipeline is no longer accepting input")]
    PipelineClosed,

    #[error("StoreError: {0}")]
    Store(#[from] StoreError),
}

/// Errors surfaced by the storage collaborator.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Deserialize, Serialize, Error)]
pub enum StoreError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: String, id: u64 },

    #[error("storage rejected write: {0}")]
    Rejected(String),
}

impl StoreError {
    /// Determine if a failed write is worth retrying.
    ///
    /// Upserts are idempotent, so any transient failure may be replayed safely.
    #[allow(clippy::match_like_matches_macro)]
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Unavailable(_) => true,
            _ => false,
        }
    }
}
