//! In-memory ledger used by tests and local demos.
//!
//! Real contracts verify attestation signatures; this stand-in instead
//! expects each blob to be a JSON-encoded [`BlobUpdate`] list, and applies
//! the same observable rules as the real thing: an update fee per blob, an
//! acceptance window on publish times, a gas allowance, and latest-wins
//! storage per feed.
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::attestation_fetcher::UpdatePackage;
use crate::clock::Clock;
use crate::feed::FeedId;
use crate::ledger::{LedgerContract, LedgerError, OnChainPrice, SubmitReceipt};

const BASE_GAS: u64 = 60_000;
const GAS_PER_BLOB: u64 = 30_000;

/// One decoded entry of an update blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobUpdate {
    pub id: FeedId,
    pub price: i64,
    pub conf: u64,
    pub expo: i32,
    pub publish_time: i64,
}

/// Encode updates into the blob format [`InMemoryLedger`] accepts.
pub fn encode_blob(updates: &[BlobUpdate]) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(updates)
}

struct LedgerState {
    balance: u128,
    block_height: u64,
    submissions: u64,
    records: HashMap<FeedId, OnChainPrice>,
}

pub struct InMemoryLedger {
    clock: Arc<dyn Clock>,
    fee_per_blob: u128,
    acceptance_window_seconds: i64,
    state: Mutex<LedgerState>,
}

impl InMemoryLedger {
    pub fn new(
        clock: Arc<dyn Clock>,
        balance: u128,
        fee_per_blob: u128,
        acceptance_window_seconds: i64,
    ) -> InMemoryLedger {
        InMemoryLedger {
            clock,
            fee_per_blob,
            acceptance_window_seconds,
            state: Mutex::new(LedgerState {
                balance,
                block_height: 0,
                submissions: 0,
                records: HashMap::new(),
            }),
        }
    }

    /// Number of submissions the ledger has seen, successful or not.
    pub async fn submission_count(&self) -> u64 {
        self.state.lock().await.submissions
    }

    /// Store a record directly, bypassing submission. Lets tests and demos
    /// start from a ledger with history.
    pub async fn seed_record(&self, feed_id: FeedId, record: OnChainPrice) {
        self.state.lock().await.records.insert(feed_id, record);
    }

    fn decode_package(&self, package: &UpdatePackage) -> Result<Vec<BlobUpdate>, LedgerError> {
        let mut updates = Vec::new();
        for blob in package.blobs() {
            let decoded: Vec<BlobUpdate> = serde_json::from_slice(blob)
                .map_err(|err| LedgerError::Rejected(format!("malformed update blob: {err}")))?;
            updates.extend(decoded);
        }
        if updates.is_empty() {
            return Err(LedgerError::Rejected("empty update package".to_string()));
        }
        Ok(updates)
    }
}

#[async_trait]
impl LedgerContract for InMemoryLedger {
    async fn estimate_fee(&self, package: &UpdatePackage) -> Result<u128, LedgerError> {
        Ok(self.fee_per_blob * package.len() as u128)
    }

    async fn balance(&self) -> Result<u128, LedgerError> {
        Ok(self.state.lock().await.balance)
    }

    async fn submit_update(
        &self,
        package: &UpdatePackage,
        fee: u128,
        gas_limit: u64,
    ) -> Result<SubmitReceipt, LedgerError> {
        let now = self.clock.now_unix();
        let mut state = self.state.lock().await;
        state.submissions += 1;

        let required_fee = self.fee_per_blob * package.len() as u128;
        if fee < required_fee {
            return Err(LedgerError::Rejected(format!(
                "insufficient fee: got {fee} wei, need {required_fee} wei"
            )));
        }
        if state.balance < fee {
            return Err(LedgerError::Rejected(
                "submitter cannot cover the attached fee".to_string(),
            ));
        }

        let gas_used = BASE_GAS + GAS_PER_BLOB * package.len() as u64;
        if gas_used > gas_limit {
            return Err(LedgerError::Rejected(format!(
                "out of gas: needs {gas_used}, allowance {gas_limit}"
            )));
        }

        let updates = self.decode_package(package)?;
        for update in &updates {
            let age = now - update.publish_time;
            if age.abs() > self.acceptance_window_seconds {
                return Err(LedgerError::Rejected(format!(
                    "publish time {} outside acceptance window of {}s",
                    update.publish_time, self.acceptance_window_seconds
                )));
            }
        }

        for update in updates {
            let record = OnChainPrice {
                price: update.price,
                conf: update.conf,
                expo: update.expo,
                publish_time: update.publish_time,
            };
            // Latest publish time wins; an older update never overwrites.
            state
                .records
                .entry(update.id)
                .and_modify(|stored| {
                    if record.publish_time > stored.publish_time {
                        *stored = record;
                    }
                })
                .or_insert(record);
        }

        state.balance -= fee;
        state.block_height += 1;
        let receipt = SubmitReceipt {
            transaction_id: format!("0x{:064x}", state.submissions),
            block_height: state.block_height,
            gas_used,
            fee_spent: fee,
        };
        Ok(receipt)
    }

    async fn read_fresh(
        &self,
        feed_id: &FeedId,
        max_age_seconds: u64,
    ) -> Result<Option<OnChainPrice>, LedgerError> {
        let now = self.clock.now_unix();
        let state = self.state.lock().await;
        Ok(state
            .records
            .get(feed_id)
            .filter(|record| now - record.publish_time <= max_age_seconds as i64)
            .copied())
    }

    async fn read_any(&self, feed_id: &FeedId) -> Result<Option<OnChainPrice>, LedgerError> {
        let state = self.state.lock().await;
        Ok(state.records.get(feed_id).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::feed::resolve_feed;

    const NOW: i64 = 1_700_000_000;

    fn ledger(balance: u128) -> (Arc<ManualClock>, InMemoryLedger) {
        let clock = Arc::new(ManualClock::new(NOW));
        let ledger = InMemoryLedger::new(clock.clone(), balance, 100, 60);
        (clock, ledger)
    }

    fn package(publish_time: i64) -> UpdatePackage {
        let update = BlobUpdate {
            id: resolve_feed("ETH_USD").unwrap(),
            price: 250_000_000_000,
            conf: 120_000_000,
            expo: -8,
            publish_time,
        };
        UpdatePackage::new(vec![encode_blob(&[update]).unwrap()])
    }

    #[tokio::test]
    async fn accepted_submission_charges_fee_and_stores_record() {
        let (_clock, ledger) = ledger(1_000);
        let receipt = ledger
            .submit_update(&package(NOW - 5), 100, 500_000)
            .await
            .unwrap();

        assert_eq!(receipt.fee_spent, 100);
        assert_eq!(receipt.block_height, 1);
        assert_eq!(ledger.balance().await.unwrap(), 900);

        let eth = resolve_feed("ETH_USD").unwrap();
        let stored = ledger.read_any(&eth).await.unwrap().unwrap();
        assert_eq!(stored.publish_time, NOW - 5);
        assert!((stored.value() - 2500.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn publish_time_outside_window_is_rejected() {
        let (_clock, ledger) = ledger(1_000);
        let err = ledger
            .submit_update(&package(NOW - 120), 100, 500_000)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Rejected(_)));

        let eth = resolve_feed("ETH_USD").unwrap();
        assert!(ledger.read_any(&eth).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn underpaid_fee_and_gas_shortfall_are_rejected() {
        let (_clock, ledger) = ledger(1_000);
        let underpaid = ledger
            .submit_update(&package(NOW), 99, 500_000)
            .await
            .unwrap_err();
        assert!(matches!(underpaid, LedgerError::Rejected(_)));

        let no_gas = ledger
            .submit_update(&package(NOW), 100, 10_000)
            .await
            .unwrap_err();
        assert!(matches!(no_gas, LedgerError::Rejected(_)));
        assert_eq!(ledger.submission_count().await, 2);
    }

    #[tokio::test]
    async fn older_update_never_overwrites_a_newer_record() {
        let (_clock, ledger) = ledger(1_000);
        ledger
            .submit_update(&package(NOW - 5), 100, 500_000)
            .await
            .unwrap();
        ledger
            .submit_update(&package(NOW - 30), 100, 500_000)
            .await
            .unwrap();

        let eth = resolve_feed("ETH_USD").unwrap();
        let stored = ledger.read_any(&eth).await.unwrap().unwrap();
        assert_eq!(stored.publish_time, NOW - 5);
    }

    #[tokio::test]
    async fn read_fresh_enforces_the_age_window() {
        let (clock, ledger) = ledger(1_000);
        ledger
            .submit_update(&package(NOW - 10), 100, 500_000)
            .await
            .unwrap();

        let eth = resolve_feed("ETH_USD").unwrap();
        assert!(ledger.read_fresh(&eth, 60).await.unwrap().is_some());
        assert!(ledger.read_fresh(&eth, 5).await.unwrap().is_none());

        clock.advance(100);
        assert!(ledger.read_fresh(&eth, 60).await.unwrap().is_none());
        assert!(ledger.read_any(&eth).await.unwrap().is_some());
    }
}
