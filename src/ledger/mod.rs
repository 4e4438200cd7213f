use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::attestation_fetcher::UpdatePackage;
use crate::error::PipelineError;
use crate::feed::FeedId;

pub mod ethereum;
pub mod memory;

/// A price as stored by the ledger contract, mantissa `* 10^expo`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OnChainPrice {
    pub price: i64,
    pub conf: u64,
    pub expo: i32,
    pub publish_time: i64,
}

impl OnChainPrice {
    pub fn value(&self) -> f64 {
        self.price as f64 * 10f64.powi(self.expo)
    }

    pub fn confidence(&self) -> f64 {
        self.conf as f64 * 10f64.powi(self.expo)
    }
}

/// Proof of an included update submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmitReceipt {
    pub transaction_id: String,
    pub block_height: u64,
    pub gas_used: u64,
    pub fee_spent: u128,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// The contract refused the call, e.g. a reverted submission.
    #[error("rejected by ledger: {0}")]
    Rejected(String),
    /// Node-level fault: the call never reached a verdict.
    #[error("ledger transport error: {0}")]
    Transport(String),
}

impl From<LedgerError> for PipelineError {
    fn from(error: LedgerError) -> PipelineError {
        match error {
            LedgerError::Rejected(cause) => PipelineError::SubmissionRejected { cause },
            LedgerError::Transport(cause) => PipelineError::LedgerUnavailable { cause },
        }
    }
}

/// The four ledger operations the pipeline consumes, plus the caller
/// balance read the submission precondition needs. The contract itself is
/// external; verification of update blobs is its job, not ours.
#[async_trait]
pub trait LedgerContract: Send + Sync {
    /// Fee the ledger demands for submitting `package`.
    async fn estimate_fee(&self, package: &UpdatePackage) -> Result<u128, LedgerError>;

    /// Current balance of the submitting account.
    async fn balance(&self) -> Result<u128, LedgerError>;

    /// Submit `package` with `fee` attached, blocking until inclusion.
    async fn submit_update(
        &self,
        package: &UpdatePackage,
        fee: u128,
        gas_limit: u64,
    ) -> Result<SubmitReceipt, LedgerError>;

    /// Stored price for `feed_id` no older than `max_age_seconds`, if any.
    async fn read_fresh(
        &self,
        feed_id: &FeedId,
        max_age_seconds: u64,
    ) -> Result<Option<OnChainPrice>, LedgerError>;

    /// Most recent stored price for `feed_id` regardless of age, if any.
    async fn read_any(&self, feed_id: &FeedId) -> Result<Option<OnChainPrice>, LedgerError>;
}
