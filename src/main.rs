use std::sync::Arc;
use std::time::Duration;

use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::Address;
use eyre::{Context, Result};

use pyth_sync::attestation_fetcher::hermes::{HermesAttestationFetcher, DEFAULT_HERMES_URL};
use pyth_sync::clock::{Clock, SystemClock};
use pyth_sync::feed::{resolve_feed, FeedId};
use pyth_sync::ledger::ethereum::EthereumLedger;
use pyth_sync::pipeline::{Pipeline, PipelineConfig};
use pyth_sync::sync_loop::stop_channel;

fn feed_ids_from_env() -> Result<Vec<FeedId>> {
    let raw = std::env::var("FEED_IDS").unwrap_or_else(|_| "ETH_USD".to_string());
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| resolve_feed(entry).wrap_err_with(|| format!("bad feed entry: {entry}")))
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let hermes_url =
        std::env::var("HERMES_URL").unwrap_or_else(|_| DEFAULT_HERMES_URL.to_string());
    let rpc_url = std::env::var("RPC_URL").wrap_err("RPC_URL must be set")?;
    let private_key = std::env::var("PRIVATE_KEY").wrap_err("PRIVATE_KEY must be set")?;
    let contract_address: Address = std::env::var("PYTH_CONTRACT_ADDRESS")
        .wrap_err("PYTH_CONTRACT_ADDRESS must be set")?
        .parse()
        .wrap_err("invalid PYTH_CONTRACT_ADDRESS")?;
    let feed_ids = feed_ids_from_env()?;
    let interval_seconds: u64 = std::env::var("INTERVAL_SECONDS")
        .unwrap_or_else(|_| "60".to_string())
        .parse()
        .wrap_err("invalid INTERVAL_SECONDS")?;
    let max_cycles: Option<u64> = match std::env::var("MAX_CYCLES") {
        Ok(raw) => Some(raw.parse().wrap_err("invalid MAX_CYCLES")?),
        Err(_) => None,
    };

    let provider = Provider::<Http>::try_from(rpc_url.as_str()).wrap_err("invalid RPC_URL")?;
    let chain_id = provider.get_chainid().await.wrap_err("querying chain id")?;
    let wallet: LocalWallet = private_key
        .parse::<LocalWallet>()
        .wrap_err("invalid PRIVATE_KEY")?
        .with_chain_id(chain_id.as_u64());
    let owner = wallet.address();
    let client = Arc::new(SignerMiddleware::new(provider, wallet));
    log::info!("Initialized wallet {owner:?} against chain {chain_id}");

    let fetcher = HermesAttestationFetcher::new(&hermes_url);
    log::info!("Initialized attestation fetcher for {hermes_url}");
    let ledger = Arc::new(EthereumLedger::new(client, contract_address, owner));
    log::info!("Initialized ledger contract at {contract_address:?}");
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let pipeline = Arc::new(Pipeline::new(
        fetcher,
        ledger,
        clock,
        PipelineConfig::new(feed_ids),
    )?);

    let (handle, signal) = stop_channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Ctrl-c received, stopping after the current cycle");
            handle.stop();
        }
    });

    let summary = pipeline
        .push_loop(Duration::from_secs(interval_seconds), max_cycles, signal)
        .await?;
    log::info!(
        "Push loop finished: {}/{} cycle(s) succeeded ({:.0}% success rate)",
        summary.success_count,
        summary.total_cycles,
        summary.success_rate * 100.0
    );
    Ok(())
}
