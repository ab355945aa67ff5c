//! Gas price resolution

use crate::chain::RpcClient;
use crate::config::{GasConfig, GasPriceStrategy};
use crate::error::PledgeResult;

use ethers::types::U256;
use tracing::debug;

/// Resolves the gas price for a legacy transaction
#[derive(Debug, Clone)]
pub struct GasOracle {
    strategy: GasPriceStrategy,
    /// Price used by the fixed strategy, in wei
    fixed_price: U256,
    /// Buffer percentage added to node suggestions (e.g., 10 = 10%)
    buffer_percent: u64,
    /// Ceiling for node suggestions, in wei
    max_price: Option<U256>,
}

impl GasOracle {
    /// Create a gas oracle from configuration
    pub fn new(config: &GasConfig) -> Self {
        Self {
            strategy: config.strategy.clone(),
            fixed_price: gwei(config.price_gwei.unwrap_or_default()),
            buffer_percent: config.buffer_percent,
            max_price: config.max_price_gwei.map(gwei),
        }
    }

    /// Get the gas price for the next transaction
    pub async fn gas_price(&self, client: &dyn RpcClient) -> PledgeResult<U256> {
        let price = match self.strategy {
            GasPriceStrategy::Fixed => self.fixed_price,
            GasPriceStrategy::Node => {
                let suggested = client
                    .gas_price()
                    .await
                    .map_err(|e| e.into_connection(client.chain_id()))?;
                let buffered = suggested
                    .saturating_add(suggested.saturating_mul(self.buffer_percent.into()) / 100);
                match self.max_price {
                    Some(max) => std::cmp::min(buffered, max),
                    None => buffered,
                }
            }
        };

        debug!("Gas price for chain {}: {} wei", client.chain_id(), price);
        Ok(price)
    }

    /// Calculate the maximum cost in wei
    pub fn calculate_cost(gas_limit: U256, gas_price: U256) -> U256 {
        gas_limit.saturating_mul(gas_price)
    }
}

/// Convert gwei to wei
pub fn gwei(amount: u64) -> U256 {
    U256::from(amount) * U256::exp10(9)
}
