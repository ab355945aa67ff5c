//! Transaction lifecycle types: built, then signed, then handed to the node

use crate::error::{PledgeError, PledgeResult};

use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, TransactionRequest, H256, U256};

/// Fields of a legacy contract transaction
#[derive(Debug, Clone)]
pub struct CallParams {
    pub from: Address,
    /// `None` creates a contract
    pub to: Option<Address>,
    pub data: Bytes,
    pub value: U256,
    pub chain_id: u64,
    pub nonce: u64,
    pub gas_limit: U256,
    pub gas_price: U256,
}

/// A fully specified, not yet signed transaction
#[derive(Debug, Clone)]
pub struct UnsignedCall {
    tx: TypedTransaction,
}

impl UnsignedCall {
    pub fn new(params: CallParams) -> Self {
        let mut tx = TransactionRequest::new()
            .from(params.from)
            .data(params.data)
            .value(params.value)
            .nonce(params.nonce)
            .gas(params.gas_limit)
            .gas_price(params.gas_price)
            .chain_id(params.chain_id);

        if let Some(to) = params.to {
            tx = tx.to(to);
        }

        Self {
            tx: TypedTransaction::Legacy(tx),
        }
    }

    /// Sign with the given wallet, which must be the `from` account
    pub async fn sign(self, wallet: &LocalWallet) -> PledgeResult<SignedCall> {
        if self.tx.from() != Some(&wallet.address()) {
            return Err(PledgeError::InvalidKey(
                "signing key does not match transaction sender".to_string(),
            ));
        }

        let signature = wallet
            .sign_transaction(&self.tx)
            .await
            .map_err(|e| PledgeError::InvalidKey(format!("Failed to sign transaction: {}", e)))?;

        Ok(SignedCall {
            raw: self.tx.rlp_signed(&signature),
            hash: self.tx.hash(&signature),
        })
    }
}

/// A signed transaction, consumed by submission
#[derive(Debug)]
pub struct SignedCall {
    raw: Bytes,
    hash: H256,
}

impl SignedCall {
    /// Hash the node will report for this transaction
    pub fn hash(&self) -> H256 {
        self.hash
    }

    /// RLP bytes for `eth_sendRawTransaction`
    pub fn into_raw(self) -> Bytes {
        self.raw
    }
}
