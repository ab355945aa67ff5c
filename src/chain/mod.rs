//! Chain module - the JSON-RPC surface the client depends on
//!
//! This module provides:
//! - The `RpcClient` trait: the handful of Ethereum JSON-RPC methods a
//!   submission or read-only call needs
//! - `ChainProvider`: the HTTP implementation backed by ethers

pub mod provider;

pub use provider::ChainProvider;

use crate::error::RpcFailure;

use async_trait::async_trait;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, TransactionReceipt, H256, U256};

/// JSON-RPC methods used by the transaction submitter
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RpcClient: Send + Sync {
    /// Chain id the client was configured for
    fn chain_id(&self) -> u64;

    /// `eth_chainId`
    async fn remote_chain_id(&self) -> Result<u64, RpcFailure>;

    /// `eth_getTransactionCount` at the pending block
    async fn transaction_count(&self, address: Address) -> Result<U256, RpcFailure>;

    /// `eth_gasPrice`
    async fn gas_price(&self) -> Result<U256, RpcFailure>;

    /// `eth_sendRawTransaction`
    async fn send_raw_transaction(&self, raw: Bytes) -> Result<H256, RpcFailure>;

    /// `eth_getTransactionReceipt`
    async fn transaction_receipt(
        &self,
        tx_hash: H256,
    ) -> Result<Option<TransactionReceipt>, RpcFailure>;

    /// `eth_call` at the latest block
    async fn call(&self, tx: &TypedTransaction) -> Result<Bytes, RpcFailure>;
}
