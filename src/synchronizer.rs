//! # On-chain synchronizer
//! Step 2 of the workflow: compute the update fee, check it against the
//! configured ceiling and the caller's balance, then submit with a bounded
//! gas allowance and an inclusion timeout. Preconditions fail fast; no
//! transaction is sent unless every check passes.
use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;

use crate::attestation_fetcher::UpdatePackage;
use crate::error::PipelineError;
use crate::ledger::{LedgerContract, SubmitReceipt};

pub struct OnChainSynchronizer<L> {
    ledger: Arc<L>,
    fee_ceiling: u128,
    gas_limit: u64,
    submit_timeout: Duration,
}

impl<L: LedgerContract> OnChainSynchronizer<L> {
    pub fn new(
        ledger: Arc<L>,
        fee_ceiling: u128,
        gas_limit: u64,
        submit_timeout: Duration,
    ) -> OnChainSynchronizer<L> {
        OnChainSynchronizer {
            ledger,
            fee_ceiling,
            gas_limit,
            submit_timeout,
        }
    }

    /// Submit `package` as a unit. Every failure comes back as a tagged
    /// [`PipelineError`]; retrying is the caller's decision and is a brand
    /// new call.
    pub async fn submit(&self, package: &UpdatePackage) -> Result<SubmitReceipt, PipelineError> {
        if package.is_empty() {
            return Err(PipelineError::SubmissionRejected {
                cause: "empty update package".to_string(),
            });
        }

        let required = self.ledger.estimate_fee(package).await?;
        if required > self.fee_ceiling {
            log::warn!(
                "Skipping submission, fee {} wei exceeds ceiling {} wei",
                required,
                self.fee_ceiling
            );
            return Err(PipelineError::FeeAboveCeiling {
                required,
                ceiling: self.fee_ceiling,
            });
        }

        let available = self.ledger.balance().await?;
        if available < required {
            log::warn!(
                "Skipping submission, fee {} wei exceeds balance {} wei",
                required,
                available
            );
            return Err(PipelineError::InsufficientFunds {
                required,
                available,
            });
        }

        log::info!(
            "Submitting {} update blob(s) with fee {} wei",
            package.len(),
            required
        );
        match timeout(
            self.submit_timeout,
            self.ledger.submit_update(package, required, self.gas_limit),
        )
        .await
        {
            Err(_) => {
                log::error!(
                    "Hit {}s inclusion timeout for update submission",
                    self.submit_timeout.as_secs()
                );
                Err(PipelineError::Timeout {
                    elapsed_seconds: self.submit_timeout.as_secs(),
                })
            }
            Ok(Err(err)) => Err(err.into()),
            Ok(Ok(receipt)) => {
                log::info!(
                    "Update {} included in block {} using {} gas",
                    receipt.transaction_id,
                    receipt.block_height,
                    receipt.gas_used
                );
                Ok(receipt)
            }
        }
    }
}
