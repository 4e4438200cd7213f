//! EVM ledger backend speaking the Pyth contract interface.
use std::sync::Arc;

use async_trait::async_trait;
use ethers::contract::{abigen, ContractError};
use ethers::providers::Middleware;
use ethers::types::{Address, Bytes, U256, U64};

use crate::attestation_fetcher::UpdatePackage;
use crate::feed::FeedId;
use crate::ledger::{LedgerContract, LedgerError, OnChainPrice, SubmitReceipt};

abigen!(
    IPyth,
    r#"[
        function updatePriceFeeds(bytes[] calldata updateData) external payable
        function getUpdateFee(bytes[] calldata updateData) external view returns (uint256 feeAmount)
        function getPriceNoOlderThan(bytes32 id, uint256 age) external view returns (int64 price, uint64 conf, int32 expo, uint256 publishTime)
        function getPriceUnsafe(bytes32 id) external view returns (int64 price, uint64 conf, int32 expo, uint256 publishTime)
    ]"#
);

pub struct EthereumLedger<M: Middleware> {
    contract: IPyth<M>,
    client: Arc<M>,
    owner: Address,
}

impl<M: Middleware + 'static> EthereumLedger<M> {
    /// `owner` is the account whose balance gates submissions, normally the
    /// signer behind `client`.
    pub fn new(client: Arc<M>, contract_address: Address, owner: Address) -> EthereumLedger<M> {
        let contract = IPyth::new(contract_address, client.clone());
        EthereumLedger {
            contract,
            client,
            owner,
        }
    }

    fn package_bytes(package: &UpdatePackage) -> Vec<Bytes> {
        package
            .blobs()
            .iter()
            .map(|blob| Bytes::from(blob.clone()))
            .collect()
    }

    fn map_call_error(error: ContractError<M>) -> LedgerError {
        let message = error.to_string();
        match error {
            ContractError::Revert(_) => LedgerError::Rejected(message),
            _ => LedgerError::Transport(message),
        }
    }

    async fn read_price(
        &self,
        feed_id: &FeedId,
        max_age_seconds: Option<u64>,
    ) -> Result<Option<OnChainPrice>, LedgerError> {
        let result = match max_age_seconds {
            Some(max_age) => {
                self.contract
                    .get_price_no_older_than(*feed_id.as_bytes(), U256::from(max_age))
                    .call()
                    .await
            }
            None => {
                self.contract
                    .get_price_unsafe(*feed_id.as_bytes())
                    .call()
                    .await
            }
        };
        match result {
            Ok((price, conf, expo, publish_time)) => Ok(Some(OnChainPrice {
                price,
                conf,
                expo,
                publish_time: publish_time.low_u64() as i64,
            })),
            // The contract reverts both for "no such feed" and "too old";
            // either way there is no usable record behind this read.
            Err(ContractError::Revert(_)) => Ok(None),
            Err(other) => Err(LedgerError::Transport(other.to_string())),
        }
    }
}

fn u256_to_u128_saturating(value: U256) -> u128 {
    if value > U256::from(u128::MAX) {
        u128::MAX
    } else {
        value.as_u128()
    }
}

#[async_trait]
impl<M: Middleware + 'static> LedgerContract for EthereumLedger<M> {
    async fn estimate_fee(&self, package: &UpdatePackage) -> Result<u128, LedgerError> {
        let fee = self
            .contract
            .get_update_fee(Self::package_bytes(package))
            .call()
            .await
            .map_err(Self::map_call_error)?;
        Ok(u256_to_u128_saturating(fee))
    }

    async fn balance(&self) -> Result<u128, LedgerError> {
        let balance = self
            .client
            .get_balance(self.owner, None)
            .await
            .map_err(|err| LedgerError::Transport(err.to_string()))?;
        Ok(u256_to_u128_saturating(balance))
    }

    async fn submit_update(
        &self,
        package: &UpdatePackage,
        fee: u128,
        gas_limit: u64,
    ) -> Result<SubmitReceipt, LedgerError> {
        let call = self
            .contract
            .update_price_feeds(Self::package_bytes(package))
            .value(fee)
            .gas(gas_limit);
        let pending = call.send().await.map_err(Self::map_call_error)?;
        let receipt = pending
            .await
            .map_err(|err| LedgerError::Transport(err.to_string()))?
            .ok_or_else(|| LedgerError::Transport("transaction dropped from mempool".to_string()))?;

        if receipt.status != Some(U64::from(1u64)) {
            return Err(LedgerError::Rejected(format!(
                "transaction {:#x} reverted on-chain",
                receipt.transaction_hash
            )));
        }
        Ok(SubmitReceipt {
            transaction_id: format!("{:#x}", receipt.transaction_hash),
            block_height: receipt.block_number.map(|n| n.as_u64()).unwrap_or_default(),
            gas_used: receipt.gas_used.map(|g| g.low_u64()).unwrap_or_default(),
            fee_spent: fee,
        })
    }

    async fn read_fresh(
        &self,
        feed_id: &FeedId,
        max_age_seconds: u64,
    ) -> Result<Option<OnChainPrice>, LedgerError> {
        self.read_price(feed_id, Some(max_age_seconds)).await
    }

    async fn read_any(&self, feed_id: &FeedId) -> Result<Option<OnChainPrice>, LedgerError> {
        self.read_price(feed_id, None).await
    }
}
