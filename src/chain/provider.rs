//! HTTP chain provider

use super::RpcClient;
use crate::config::NetworkConfig;
use crate::error::{PledgeError, PledgeResult, RpcFailure};

use async_trait::async_trait;
use ethers::providers::{Http, Middleware, Provider};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, BlockId, BlockNumber, Bytes, TransactionReceipt, H256, U256};
use tracing::{debug, info};

/// Single-endpoint JSON-RPC provider
pub struct ChainProvider {
    /// Network configuration
    config: NetworkConfig,
    /// HTTP transport
    http: Provider<Http>,
}

impl ChainProvider {
    /// Create a provider for the configured endpoint
    pub fn new(config: NetworkConfig) -> PledgeResult<Self> {
        let http = Provider::<Http>::try_from(config.rpc_url.as_str()).map_err(|e| {
            PledgeError::Config(format!("Invalid RPC URL for {}: {}", config.name, e))
        })?;

        debug!("Created HTTP provider for {}", config.name);

        Ok(Self { config, http })
    }

    /// Create a provider and check that the endpoint serves the configured chain
    pub async fn connect(config: NetworkConfig) -> PledgeResult<Self> {
        let provider = Self::new(config)?;
        provider.ensure_chain().await?;
        Ok(provider)
    }

    /// Fail unless the node answers and reports the configured chain id
    pub async fn ensure_chain(&self) -> PledgeResult<()> {
        let remote = self
            .remote_chain_id()
            .await
            .map_err(|e| e.into_connection(self.config.chain_id))?;

        if remote != self.config.chain_id {
            return Err(PledgeError::Config(format!(
                "Endpoint for {} serves chain {}, expected {}",
                self.config.name, remote, self.config.chain_id
            )));
        }

        info!(
            "Connected to {} (chain ID: {})",
            self.config.name, self.config.chain_id
        );
        Ok(())
    }
}

#[async_trait]
impl RpcClient for ChainProvider {
    fn chain_id(&self) -> u64 {
        self.config.chain_id
    }

    async fn remote_chain_id(&self) -> Result<u64, RpcFailure> {
        let id = self.http.get_chainid().await?;
        Ok(id.as_u64())
    }

    async fn transaction_count(&self, address: Address) -> Result<U256, RpcFailure> {
        let count = self
            .http
            .get_transaction_count(address, Some(BlockId::Number(BlockNumber::Pending)))
            .await?;
        Ok(count)
    }

    async fn gas_price(&self) -> Result<U256, RpcFailure> {
        Ok(self.http.get_gas_price().await?)
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<H256, RpcFailure> {
        let pending = self.http.send_raw_transaction(raw).await?;
        Ok(pending.tx_hash())
    }

    async fn transaction_receipt(
        &self,
        tx_hash: H256,
    ) -> Result<Option<TransactionReceipt>, RpcFailure> {
        Ok(self.http.get_transaction_receipt(tx_hash).await?)
    }

    async fn call(&self, tx: &TypedTransaction) -> Result<Bytes, RpcFailure> {
        Ok(self.http.call(tx, None).await?)
    }
}
