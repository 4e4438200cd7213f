//! Failure taxonomy shared by every pipeline step.
//!
//! Steps report failures as values; nothing in the library panics or
//! propagates an opaque error past a step boundary.
use serde::Serialize;
use thiserror::Error;

use crate::feed::FeedId;

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
pub enum PipelineError {
    /// The attestation service could not be reached, answered with an
    /// error status, or returned a payload that failed to decode.
    #[error("attestation fetch failed: {cause}")]
    FetchFailed { cause: String },

    /// The caller's balance does not cover the computed update fee. No
    /// transaction has been sent.
    #[error("update fee of {required} wei exceeds available balance of {available} wei")]
    InsufficientFunds { required: u128, available: u128 },

    /// The computed update fee exceeds the configured ceiling. No
    /// transaction has been sent.
    #[error("update fee of {required} wei exceeds configured ceiling of {ceiling} wei")]
    FeeAboveCeiling { required: u128, ceiling: u128 },

    /// The ledger refused the update package, e.g. its publish time fell
    /// outside the contract's acceptance window.
    #[error("ledger rejected update: {cause}")]
    SubmissionRejected { cause: String },

    /// Inclusion was not observed before the submission timeout elapsed.
    #[error("inclusion not observed within {elapsed_seconds}s")]
    Timeout { elapsed_seconds: u64 },

    /// The ledger has never stored a price for this feed.
    #[error("no price record stored for feed {feed_id}")]
    NoRecord { feed_id: FeedId },

    /// A node-level fault while talking to the ledger: distinct from
    /// `SubmissionRejected` so callers can tell a bad package from an
    /// unreachable node.
    #[error("ledger unavailable: {cause}")]
    LedgerUnavailable { cause: String },
}
