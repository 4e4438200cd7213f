//! # Price reader
//! Step 3 of the workflow: read the ledger-resident price for a feed under
//! a freshness constraint, falling back to the latest stored record when
//! nothing inside the window exists. The caller can always tell which mode
//! produced the answer.
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::clock::Clock;
use crate::error::PipelineError;
use crate::feed::FeedId;
use crate::ledger::{LedgerContract, OnChainPrice};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadMethod {
    /// The record satisfied the caller's freshness window.
    Fresh,
    /// No record inside the window; this is the latest stored record and
    /// may be arbitrarily old. Inspect `age_seconds` before using it.
    Fallback,
}

impl fmt::Display for ReadMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadMethod::Fresh => write!(f, "fresh"),
            ReadMethod::Fallback => write!(f, "fallback"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReadOutcome {
    pub feed_id: FeedId,
    pub price: OnChainPrice,
    pub age_seconds: u64,
    pub method: ReadMethod,
}

pub struct PriceReader<L> {
    ledger: Arc<L>,
    clock: Arc<dyn Clock>,
}

impl<L: LedgerContract> PriceReader<L> {
    pub fn new(ledger: Arc<L>, clock: Arc<dyn Clock>) -> PriceReader<L> {
        PriceReader { ledger, clock }
    }

    /// Read the stored price for `feed_id`, preferring a record no older
    /// than `max_age_seconds`. No side effects.
    pub async fn read(
        &self,
        feed_id: &FeedId,
        max_age_seconds: u64,
    ) -> Result<ReadOutcome, PipelineError> {
        if let Some(record) = self.ledger.read_fresh(feed_id, max_age_seconds).await? {
            return Ok(self.outcome(feed_id, record, ReadMethod::Fresh));
        }

        log::warn!(
            "No record within {}s for {}, falling back to latest stored price",
            max_age_seconds,
            feed_id.label()
        );
        match self.ledger.read_any(feed_id).await? {
            Some(record) => Ok(self.outcome(feed_id, record, ReadMethod::Fallback)),
            None => Err(PipelineError::NoRecord { feed_id: *feed_id }),
        }
    }

    fn outcome(&self, feed_id: &FeedId, price: OnChainPrice, method: ReadMethod) -> ReadOutcome {
        let age_seconds = (self.clock.now_unix() - price.publish_time).max(0) as u64;
        log::info!(
            "{}: {:.2} +/- {:.2} ({}s old, {} read)",
            feed_id.label(),
            price.value(),
            price.confidence(),
            age_seconds,
            method
        );
        ReadOutcome {
            feed_id: *feed_id,
            price,
            age_seconds,
            method,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::feed::resolve_feed;
    use crate::ledger::memory::InMemoryLedger;

    const NOW: i64 = 1_700_000_000;

    async fn reader_with_record(
        publish_time: i64,
    ) -> (Arc<ManualClock>, PriceReader<InMemoryLedger>, FeedId) {
        let clock = Arc::new(ManualClock::new(NOW));
        let ledger = Arc::new(InMemoryLedger::new(clock.clone(), 1_000, 100, 60));
        let eth = resolve_feed("ETH_USD").unwrap();
        ledger
            .seed_record(
                eth,
                OnChainPrice {
                    price: 250_000_000_000,
                    conf: 120_000_000,
                    expo: -8,
                    publish_time,
                },
            )
            .await;
        let reader = PriceReader::new(ledger, clock.clone());
        (clock, reader, eth)
    }

    #[tokio::test]
    async fn record_inside_the_window_reads_fresh() {
        let (_clock, reader, eth) = reader_with_record(NOW - 10).await;
        let outcome = reader.read(&eth, 60).await.unwrap();

        assert_eq!(outcome.method, ReadMethod::Fresh);
        assert_eq!(outcome.age_seconds, 10);
        assert!((outcome.price.value() - 2500.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn stale_record_is_labeled_fallback_with_true_age() {
        let (_clock, reader, eth) = reader_with_record(NOW - 90).await;
        let outcome = reader.read(&eth, 60).await.unwrap();

        assert_eq!(outcome.method, ReadMethod::Fallback);
        assert_eq!(outcome.age_seconds, 90);
    }

    #[tokio::test]
    async fn unknown_feed_reports_no_record() {
        let (_clock, reader, _eth) = reader_with_record(NOW).await;
        let btc = resolve_feed("BTC_USD").unwrap();
        let err = reader.read(&btc, 60).await.unwrap_err();
        assert_eq!(err, PipelineError::NoRecord { feed_id: btc });
    }

    #[tokio::test]
    async fn repeated_reads_return_identical_content() {
        let (_clock, reader, eth) = reader_with_record(NOW - 10).await;
        let first = reader.read(&eth, 60).await.unwrap();
        let second = reader.read(&eth, 60).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn freshness_follows_the_clock() {
        let (clock, reader, eth) = reader_with_record(NOW - 10).await;
        assert_eq!(reader.read(&eth, 60).await.unwrap().method, ReadMethod::Fresh);

        clock.advance(100);
        let outcome = reader.read(&eth, 60).await.unwrap();
        assert_eq!(outcome.method, ReadMethod::Fallback);
        assert_eq!(outcome.age_seconds, 110);
    }
}
