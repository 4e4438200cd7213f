//! # Sync loop
//! Step 4 of the workflow: drive fetch -> submit -> read on a fixed
//! interval, strictly one cycle at a time. A fetch failure short-circuits
//! its cycle; any in-cycle failure marks the cycle failed without ending
//! the loop. A stop request is honored before the next cycle begins; a
//! cycle already in flight runs to completion.
use std::sync::Arc;
use std::time::Duration;

use eyre::{eyre, Result};
use serde::Serialize;
use tokio::sync::watch;

use crate::attestation_fetcher::{AttestationFetcher, FetchedUpdate};
use crate::error::PipelineError;
use crate::ledger::{LedgerContract, SubmitReceipt};
use crate::pipeline::Pipeline;
use crate::price_reader::ReadOutcome;

/// Create a linked stop handle/signal pair for one loop.
pub fn stop_channel() -> (StopHandle, StopSignal) {
    let (tx, rx) = watch::channel(false);
    (StopHandle { tx: Arc::new(tx) }, StopSignal { rx })
}

#[derive(Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    /// Request the loop to stop before its next cycle. Idempotent.
    pub fn stop(&self) {
        let _ = self.tx.send(true);
    }
}

#[derive(Clone)]
pub struct StopSignal {
    rx: watch::Receiver<bool>,
}

impl StopSignal {
    fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }

    async fn stopped(&mut self) {
        loop {
            if *self.rx.borrow() {
                return;
            }
            if self.rx.changed().await.is_err() {
                // Every handle is gone; this loop can never be stopped.
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Outcome of one loop cycle. `sync` and `read` are `None` when the fetch
/// failed and the rest of the cycle was skipped.
#[derive(Debug, Clone, Serialize)]
pub struct CycleResult {
    pub cycle_index: u64,
    pub timestamp: i64,
    pub fetch: Result<FetchedUpdate, PipelineError>,
    pub sync: Option<Result<SubmitReceipt, PipelineError>>,
    pub read: Option<Vec<Result<ReadOutcome, PipelineError>>>,
}

impl CycleResult {
    pub fn succeeded(&self) -> bool {
        self.fetch.is_ok()
            && matches!(&self.sync, Some(Ok(_)))
            && matches!(&self.read, Some(reads) if reads.iter().all(|read| read.is_ok()))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PushSummary {
    pub total_cycles: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub success_rate: f64,
    pub cycles: Vec<CycleResult>,
}

impl PushSummary {
    fn from_cycles(cycles: Vec<CycleResult>) -> PushSummary {
        let total_cycles = cycles.len() as u64;
        let success_count = cycles.iter().filter(|cycle| cycle.succeeded()).count() as u64;
        let success_rate = if total_cycles == 0 {
            0.0
        } else {
            success_count as f64 / total_cycles as f64
        };
        PushSummary {
            total_cycles,
            success_count,
            failure_count: total_cycles - success_count,
            success_rate,
            cycles,
        }
    }
}

pub struct SyncLoop<F, L> {
    pipeline: Arc<Pipeline<F, L>>,
    interval: Duration,
    max_cycles: Option<u64>,
    signal: StopSignal,
}

impl<F: AttestationFetcher, L: LedgerContract> SyncLoop<F, L> {
    pub fn new(
        pipeline: Arc<Pipeline<F, L>>,
        interval: Duration,
        max_cycles: Option<u64>,
        signal: StopSignal,
    ) -> Result<SyncLoop<F, L>> {
        if interval.is_zero() {
            return Err(eyre!("push interval must be positive"));
        }
        if max_cycles == Some(0) {
            return Err(eyre!("max_cycles must be at least 1 when bounded"));
        }
        Ok(SyncLoop {
            pipeline,
            interval,
            max_cycles,
            signal,
        })
    }

    pub async fn run(mut self) -> PushSummary {
        log::info!(
            "Starting push loop with interval {:?} and max cycles {:?}",
            self.interval,
            self.max_cycles
        );
        let clock = self.pipeline.clock();
        let mut cycles: Vec<CycleResult> = Vec::new();

        loop {
            if self.signal.is_stopped() {
                log::info!("Stop requested, ending loop after {} cycle(s)", cycles.len());
                break;
            }

            let cycle_index = cycles.len() as u64 + 1;
            let result = self.run_cycle(cycle_index).await;
            if result.succeeded() {
                log::info!("Cycle {} completed", cycle_index);
            } else {
                log::warn!("Cycle {} recorded as failed", cycle_index);
            }
            cycles.push(result);

            if let Some(max_cycles) = self.max_cycles {
                if cycles.len() as u64 >= max_cycles {
                    log::info!("Max cycles reached, stopping.");
                    break;
                }
            }

            tokio::select! {
                _ = clock.sleep(self.interval) => {}
                _ = self.signal.stopped() => {
                    log::info!("Stop requested during inter-cycle wait");
                    break;
                }
            }
        }

        let summary = PushSummary::from_cycles(cycles);
        log::info!(
            "Push loop finished: {}/{} cycle(s) succeeded",
            summary.success_count,
            summary.total_cycles
        );
        summary
    }

    async fn run_cycle(&self, cycle_index: u64) -> CycleResult {
        let clock = self.pipeline.clock();
        let started_at = clock.now_unix();
        log::info!("Running cycle {}", cycle_index);

        let fetch = self.pipeline.fetch().await;
        let (sync, read) = match &fetch {
            Ok(update) => {
                let sync = self.pipeline.submit(&update.update_package).await;
                // A failed submission does not block the read; a stale but
                // present record may still be usable.
                let mut reads = Vec::with_capacity(self.pipeline.feed_ids().len());
                for feed_id in self.pipeline.feed_ids() {
                    reads.push(
                        self.pipeline
                            .read(feed_id, self.pipeline.max_age_seconds())
                            .await,
                    );
                }
                (Some(sync), Some(reads))
            }
            Err(err) => {
                log::warn!(
                    "Cycle {} fetch failed, skipping sync and read: {}",
                    cycle_index,
                    err
                );
                (None, None)
            }
        };

        log::info!(
            "Finished cycle {} after {} seconds",
            cycle_index,
            clock.now_unix() - started_at
        );
        CycleResult {
            cycle_index,
            timestamp: started_at,
            fetch,
            sync,
            read,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attestation_fetcher::UpdatePackage;
    use crate::clock::ManualClock;
    use crate::feed::{resolve_feed, FeedId, PriceRecord};
    use crate::ledger::memory::{encode_blob, BlobUpdate, InMemoryLedger};
    use crate::pipeline::PipelineConfig;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    const NOW: i64 = 1_700_000_000;
    const INTERVAL: Duration = Duration::from_secs(30);

    fn fetched_update() -> FetchedUpdate {
        let eth = resolve_feed("ETH_USD").unwrap();
        let record = PriceRecord {
            feed_id: eth,
            price: 250_000_000_000,
            conf: 120_000_000,
            expo: -8,
            publish_time: NOW - 2,
        };
        let blob = encode_blob(&[BlobUpdate {
            id: eth,
            price: record.price,
            conf: record.conf,
            expo: record.expo,
            publish_time: record.publish_time,
        }])
        .unwrap();
        FetchedUpdate {
            prices: vec![record],
            update_package: UpdatePackage::new(vec![blob]),
        }
    }

    struct ScriptedFetcher {
        script: Mutex<VecDeque<Result<FetchedUpdate, PipelineError>>>,
    }

    impl ScriptedFetcher {
        fn new(script: Vec<Result<FetchedUpdate, PipelineError>>) -> ScriptedFetcher {
            ScriptedFetcher {
                script: Mutex::new(script.into()),
            }
        }
    }

    #[async_trait]
    impl AttestationFetcher for ScriptedFetcher {
        async fn fetch(&self, _feed_ids: &[FeedId]) -> Result<FetchedUpdate, PipelineError> {
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .expect("fetch called more often than scripted")
        }
    }

    fn pipeline_with<F: AttestationFetcher>(
        fetcher: F,
        clock: Arc<ManualClock>,
    ) -> Arc<Pipeline<F, InMemoryLedger>> {
        // Wide windows keep scripted updates valid as the manual clock
        // advances across cycles.
        let ledger = Arc::new(InMemoryLedger::new(clock.clone(), 1_000, 100, 3_600));
        let eth = resolve_feed("ETH_USD").unwrap();
        let mut config = PipelineConfig::new(vec![eth]);
        config.max_age_seconds = 3_600;
        Arc::new(Pipeline::new(fetcher, ledger, clock, config).unwrap())
    }

    #[tokio::test]
    async fn bounded_loop_records_exactly_max_cycles() {
        let clock = Arc::new(ManualClock::new(NOW));
        let fetcher = ScriptedFetcher::new(vec![
            Ok(fetched_update()),
            Ok(fetched_update()),
            Ok(fetched_update()),
        ]);
        let pipeline = pipeline_with(fetcher, clock.clone());

        let (_handle, signal) = stop_channel();
        let sync_loop = SyncLoop::new(pipeline, INTERVAL, Some(3), signal).unwrap();
        let summary = sync_loop.run().await;

        assert_eq!(summary.total_cycles, 3);
        assert_eq!(summary.success_count, 3);
        assert_eq!(summary.failure_count, 0);
        assert!((summary.success_rate - 1.0).abs() < f64::EPSILON);
        let indices: Vec<u64> = summary.cycles.iter().map(|c| c.cycle_index).collect();
        assert_eq!(indices, vec![1, 2, 3]);
        // No suspension after the final cycle.
        assert_eq!(clock.sleeps(), vec![INTERVAL, INTERVAL]);
    }

    #[tokio::test]
    async fn fetch_failure_skips_the_rest_of_the_cycle_only() {
        let clock = Arc::new(ManualClock::new(NOW));
        let fetcher = ScriptedFetcher::new(vec![
            Ok(fetched_update()),
            Err(PipelineError::FetchFailed {
                cause: "attestation service down".to_string(),
            }),
            Ok(fetched_update()),
        ]);
        let pipeline = pipeline_with(fetcher, clock);

        let (_handle, signal) = stop_channel();
        let sync_loop = SyncLoop::new(pipeline, INTERVAL, Some(3), signal).unwrap();
        let summary = sync_loop.run().await;

        assert_eq!(summary.total_cycles, 3);
        assert_eq!(summary.success_count, 2);
        assert_eq!(summary.failure_count, 1);

        let failed = &summary.cycles[1];
        assert!(failed.fetch.is_err());
        assert!(failed.sync.is_none());
        assert!(failed.read.is_none());
        assert!(summary.cycles[2].succeeded());
    }

    #[tokio::test]
    async fn failed_submission_still_reads_and_fails_the_cycle() {
        let clock = Arc::new(ManualClock::new(NOW));
        // Balance 50 cannot cover the 100 wei fee.
        let ledger = Arc::new(InMemoryLedger::new(clock.clone(), 50, 100, 3_600));
        let eth = resolve_feed("ETH_USD").unwrap();
        ledger
            .seed_record(
                eth,
                crate::ledger::OnChainPrice {
                    price: 240_000_000_000,
                    conf: 100_000_000,
                    expo: -8,
                    publish_time: NOW - 20,
                },
            )
            .await;
        let mut config = PipelineConfig::new(vec![eth]);
        config.max_age_seconds = 3_600;
        let fetcher = ScriptedFetcher::new(vec![Ok(fetched_update())]);
        let pipeline = Arc::new(Pipeline::new(fetcher, ledger, clock, config).unwrap());

        let (_handle, signal) = stop_channel();
        let sync_loop = SyncLoop::new(pipeline, INTERVAL, Some(1), signal).unwrap();
        let summary = sync_loop.run().await;

        let cycle = &summary.cycles[0];
        assert!(cycle.fetch.is_ok());
        assert!(matches!(
            cycle.sync,
            Some(Err(PipelineError::InsufficientFunds { .. }))
        ));
        let reads = cycle.read.as_ref().unwrap();
        assert!(reads[0].is_ok());
        assert!(!cycle.succeeded());
        assert_eq!(summary.failure_count, 1);
    }

    struct StoppingFetcher {
        handle: StopHandle,
    }

    #[async_trait]
    impl AttestationFetcher for StoppingFetcher {
        async fn fetch(&self, _feed_ids: &[FeedId]) -> Result<FetchedUpdate, PipelineError> {
            // Request the stop mid-cycle; the cycle must still finish.
            self.handle.stop();
            Ok(fetched_update())
        }
    }

    #[tokio::test]
    async fn stop_during_a_cycle_lets_the_cycle_finish() {
        let clock = Arc::new(ManualClock::new(NOW));
        let (handle, signal) = stop_channel();
        let pipeline = pipeline_with(StoppingFetcher { handle }, clock);

        let sync_loop = SyncLoop::new(pipeline, INTERVAL, None, signal).unwrap();
        let summary = sync_loop.run().await;

        assert_eq!(summary.total_cycles, 1);
        assert!(summary.cycles[0].succeeded());
    }

    #[tokio::test]
    async fn stop_before_start_runs_no_cycles() {
        let clock = Arc::new(ManualClock::new(NOW));
        let fetcher = ScriptedFetcher::new(vec![]);
        let pipeline = pipeline_with(fetcher, clock);

        let (handle, signal) = stop_channel();
        handle.stop();
        let sync_loop = SyncLoop::new(pipeline, INTERVAL, None, signal).unwrap();
        let summary = sync_loop.run().await;

        assert_eq!(summary.total_cycles, 0);
        assert_eq!(summary.success_rate, 0.0);
    }

    #[tokio::test]
    async fn rejects_zero_interval_and_zero_max_cycles() {
        let clock = Arc::new(ManualClock::new(NOW));
        let pipeline = pipeline_with(ScriptedFetcher::new(vec![]), clock);

        let (_handle, signal) = stop_channel();
        assert!(SyncLoop::new(pipeline.clone(), Duration::ZERO, None, signal.clone()).is_err());
        assert!(SyncLoop::new(pipeline, INTERVAL, Some(0), signal).is_err());
    }
}
