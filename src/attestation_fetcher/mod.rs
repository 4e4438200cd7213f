use async_trait::async_trait;
use serde::Serialize;

use crate::error::PipelineError;
use crate::feed::{FeedId, PriceRecord};

pub mod hermes;

/// Ordered opaque blobs from one fetch, submitted to the ledger as a unit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UpdatePackage(Vec<Vec<u8>>);

impl UpdatePackage {
    pub fn new(blobs: Vec<Vec<u8>>) -> UpdatePackage {
        UpdatePackage(blobs)
    }

    pub fn blobs(&self) -> &[Vec<u8>] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Result of one fetch: a record per requested feed, in request order, and
/// the package whose blobs attest to the same data.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetchedUpdate {
    pub prices: Vec<PriceRecord>,
    pub update_package: UpdatePackage,
}

impl FetchedUpdate {
    pub fn price_for(&self, feed_id: &FeedId) -> Option<&PriceRecord> {
        self.prices.iter().find(|record| record.feed_id == *feed_id)
    }
}

/// Retrieves signed price updates for a set of feeds from an external
/// attestation service. Pure read: safe to call concurrently and repeatedly.
#[async_trait]
pub trait AttestationFetcher: Send + Sync {
    /// All-or-nothing: any transport or decoding failure aborts the whole
    /// call with [`PipelineError::FetchFailed`], never a partial result.
    async fn fetch(&self, feed_ids: &[FeedId]) -> Result<FetchedUpdate, PipelineError>;
}
