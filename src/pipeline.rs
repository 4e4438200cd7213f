//! # Pipeline orchestrator
//! The public entry point. Exposes the four workflow steps individually
//! (fetch, submit, read, push loop) and as one composed pass, translating
//! every step failure into a tagged result. Nothing here panics past the
//! component boundary.
use std::sync::Arc;
use std::time::Duration;

use eyre::{eyre, Result};
use serde::Serialize;

use crate::attestation_fetcher::{AttestationFetcher, FetchedUpdate, UpdatePackage};
use crate::clock::Clock;
use crate::error::PipelineError;
use crate::feed::FeedId;
use crate::ledger::{LedgerContract, SubmitReceipt};
use crate::price_reader::{PriceReader, ReadOutcome};
use crate::sync_loop::{PushSummary, StopSignal, SyncLoop};
use crate::synchronizer::OnChainSynchronizer;

pub const DEFAULT_MAX_AGE_SECONDS: u64 = 300;
pub const DEFAULT_GAS_LIMIT: u64 = 500_000;
/// 0.01 ether.
pub const DEFAULT_FEE_CEILING_WEI: u128 = 10_000_000_000_000_000;
pub const DEFAULT_SUBMIT_TIMEOUT: Duration = Duration::from_secs(60);

/// Explicit configuration for one pipeline instance. There is no global
/// state; two pipelines with different configs can run side by side.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub feed_ids: Vec<FeedId>,
    pub max_age_seconds: u64,
    pub fee_ceiling: u128,
    pub gas_limit: u64,
    pub submit_timeout: Duration,
}

impl PipelineConfig {
    pub fn new(feed_ids: Vec<FeedId>) -> PipelineConfig {
        PipelineConfig {
            feed_ids,
            max_age_seconds: DEFAULT_MAX_AGE_SECONDS,
            fee_ceiling: DEFAULT_FEE_CEILING_WEI,
            gas_limit: DEFAULT_GAS_LIMIT,
            submit_timeout: DEFAULT_SUBMIT_TIMEOUT,
        }
    }
}

/// Composite result of one fetch -> submit -> read pass. A later step's
/// absence or failure never hides an earlier step's success.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowOutcome {
    pub fetch: Result<FetchedUpdate, PipelineError>,
    pub sync: Option<Result<SubmitReceipt, PipelineError>>,
    pub read: Option<Vec<Result<ReadOutcome, PipelineError>>>,
}

pub struct Pipeline<F, L> {
    fetcher: F,
    synchronizer: OnChainSynchronizer<L>,
    reader: PriceReader<L>,
    clock: Arc<dyn Clock>,
    config: PipelineConfig,
}

impl<F: AttestationFetcher, L: LedgerContract> Pipeline<F, L> {
    pub fn new(
        fetcher: F,
        ledger: Arc<L>,
        clock: Arc<dyn Clock>,
        config: PipelineConfig,
    ) -> Result<Pipeline<F, L>> {
        if config.feed_ids.is_empty() {
            return Err(eyre!("at least one feed id is required"));
        }
        let synchronizer = OnChainSynchronizer::new(
            ledger.clone(),
            config.fee_ceiling,
            config.gas_limit,
            config.submit_timeout,
        );
        let reader = PriceReader::new(ledger, clock.clone());
        Ok(Pipeline {
            fetcher,
            synchronizer,
            reader,
            clock,
            config,
        })
    }

    pub fn feed_ids(&self) -> &[FeedId] {
        &self.config.feed_ids
    }

    pub fn max_age_seconds(&self) -> u64 {
        self.config.max_age_seconds
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    /// Step 1: pull the latest attestations for the configured feeds.
    pub async fn fetch(&self) -> Result<FetchedUpdate, PipelineError> {
        self.fetcher.fetch(&self.config.feed_ids).await
    }

    /// Step 2: push an update package on-chain.
    pub async fn submit(&self, package: &UpdatePackage) -> Result<SubmitReceipt, PipelineError> {
        self.synchronizer.submit(package).await
    }

    /// Step 3: read the ledger-resident price under a freshness window.
    pub async fn read(
        &self,
        feed_id: &FeedId,
        max_age_seconds: u64,
    ) -> Result<ReadOutcome, PipelineError> {
        self.reader.read(feed_id, max_age_seconds).await
    }

    /// Step 4: run the repeating push loop until `max_cycles` cycles have
    /// completed or `signal` requests a stop.
    pub async fn push_loop(
        self: Arc<Self>,
        interval: Duration,
        max_cycles: Option<u64>,
        signal: StopSignal,
    ) -> Result<PushSummary> {
        let sync_loop = SyncLoop::new(self, interval, max_cycles, signal)?;
        Ok(sync_loop.run().await)
    }

    /// One composed fetch -> submit -> read pass. A step failure aborts
    /// only the remaining steps; earlier outcomes stay in the result.
    pub async fn run_complete(&self) -> WorkflowOutcome {
        log::info!(
            "Running complete workflow for {} feed(s)",
            self.config.feed_ids.len()
        );

        let fetch = self.fetch().await;
        let update = match &fetch {
            Ok(update) => update,
            Err(_) => {
                return WorkflowOutcome {
                    fetch,
                    sync: None,
                    read: None,
                }
            }
        };

        let sync = self.submit(&update.update_package).await;
        if sync.is_err() {
            return WorkflowOutcome {
                fetch,
                sync: Some(sync),
                read: None,
            };
        }

        let mut reads = Vec::with_capacity(self.config.feed_ids.len());
        for feed_id in &self.config.feed_ids {
            reads.push(self.read(feed_id, self.config.max_age_seconds).await);
        }
        WorkflowOutcome {
            fetch,
            sync: Some(sync),
            read: Some(reads),
        }
    }
}
