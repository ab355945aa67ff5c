//! Submit-and-confirm for state-changing contract calls, plus read-only calls

use super::gas::GasOracle;
use super::nonce::NonceTracker;
use super::request::{CallParams, UnsignedCall};
use crate::chain::RpcClient;
use crate::config::{ConfirmationConfig, GasConfig};
use crate::contract::{ContractAbi, ContractBinding, EntryKind};
use crate::error::{PledgeError, PledgeResult, RejectReason};

use ethers::abi::Token;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, TransactionReceipt, TransactionRequest, H256, U256};
use std::fmt;
use std::sync::Arc;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Per-call overrides
#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    /// Gas limit; the configured default when `None`
    pub gas_limit: Option<U256>,
    /// Wei sent with the call; payable entry points only
    pub value: Option<U256>,
}

/// Outcome of a confirmed transaction
#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionReceipt {
    pub tx_hash: H256,
    pub nonce: u64,
    pub block_number: Option<u64>,
    pub gas_used: Option<U256>,
    /// Set for contract creations
    pub contract_address: Option<Address>,
}

impl SubmissionReceipt {
    fn from_receipt(receipt: &TransactionReceipt, nonce: u64) -> Self {
        Self {
            tx_hash: receipt.transaction_hash,
            nonce,
            block_number: receipt.block_number.map(|b| b.as_u64()),
            gas_used: receipt.gas_used,
            contract_address: receipt.contract_address,
        }
    }
}

impl fmt::Display for SubmissionReceipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx {:?} (nonce {}", self.tx_hash, self.nonce)?;
        if let Some(block) = self.block_number {
            write!(f, ", block {}", block)?;
        }
        if let Some(gas) = self.gas_used {
            write!(f, ", gas used {}", gas)?;
        }
        if let Some(address) = self.contract_address {
            write!(f, ", contract {:?}", address)?;
        }
        write!(f, ")")
    }
}

/// Parse a hex private key into a wallet bound to `chain_id`
pub fn parse_wallet(private_key: &str, chain_id: u64) -> PledgeResult<LocalWallet> {
    let key = private_key.trim();
    let key = key.strip_prefix("0x").unwrap_or(key);
    let wallet: LocalWallet = key
        .parse()
        .map_err(|_| PledgeError::InvalidKey("private key is not a valid secp256k1 key".to_string()))?;
    Ok(wallet.with_chain_id(chain_id))
}

/// `eth_call` a read-only entry point and decode its outputs
pub async fn query_contract(
    client: &dyn RpcClient,
    binding: &ContractBinding,
    function: &str,
    args: &[Token],
    from: Option<Address>,
) -> PledgeResult<Vec<Token>> {
    let entry = binding.abi().entry(function, args.len())?;
    if entry.kind() != EntryKind::ReadOnly {
        return Err(PledgeError::invalid_arguments(
            function,
            "state-changing function; submit a transaction instead",
        ));
    }

    let data = entry.encode(args)?;
    let mut request = TransactionRequest::new().to(binding.address()).data(data);
    if let Some(from) = from {
        request = request.from(from);
    }
    let tx = TypedTransaction::Legacy(request);

    debug!("Calling {} on {:?}", entry.signature(), binding.address());

    let output = client
        .call(&tx)
        .await
        .map_err(|e| e.into_remote_call(client.chain_id(), function))?;

    entry.decode_output(&output)
}

/// Builds, signs, submits and confirms contract transactions for one account
pub struct TransactionSubmitter {
    /// JSON-RPC client
    client: Arc<dyn RpcClient>,
    /// Signing wallet
    wallet: LocalWallet,
    /// Gas price source
    gas: GasOracle,
    /// Default gas limit for calls
    gas_limit: U256,
    /// Gas limit for deployments
    deploy_gas_limit: U256,
    /// Local nonce bookkeeping
    nonces: NonceTracker,
    /// Receipt polling
    confirmation: ConfirmationConfig,
}

impl TransactionSubmitter {
    /// Create a submitter signing with `private_key`
    pub fn new(
        client: Arc<dyn RpcClient>,
        private_key: &str,
        gas_config: &GasConfig,
        confirmation: ConfirmationConfig,
    ) -> PledgeResult<Self> {
        let wallet = parse_wallet(private_key, client.chain_id())?;

        info!("Transaction submitter initialized with wallet: {:?}", wallet.address());

        Ok(Self {
            client,
            wallet,
            gas: GasOracle::new(gas_config),
            gas_limit: gas_config.limit(),
            deploy_gas_limit: gas_config.deploy_limit(),
            nonces: NonceTracker::new(),
            confirmation,
        })
    }

    /// Address derived from the signing key
    pub fn sender(&self) -> Address {
        self.wallet.address()
    }

    /// Perform one state-changing call end-to-end
    pub async fn submit(
        &self,
        binding: &ContractBinding,
        function: &str,
        args: &[Token],
        options: SubmitOptions,
    ) -> PledgeResult<SubmissionReceipt> {
        let entry = binding.abi().entry(function, args.len())?;
        if entry.kind() != EntryKind::Mutating {
            return Err(PledgeError::invalid_arguments(
                function,
                "read-only function; use a call instead",
            ));
        }

        let value = options.value.unwrap_or_default();
        if !value.is_zero() && !entry.is_payable() {
            return Err(PledgeError::invalid_arguments(
                function,
                "value sent to a non-payable function",
            ));
        }

        let data = entry.encode(args)?;
        let gas_limit = options.gas_limit.unwrap_or(self.gas_limit);

        info!("Submitting {} to {:?}", entry.signature(), binding.address());
        self.execute(Some(binding.address()), data, value, gas_limit)
            .await
    }

    /// Deploy a contract from its artifact bytecode
    pub async fn deploy(
        &self,
        abi: &ContractAbi,
        constructor_args: &[Token],
    ) -> PledgeResult<SubmissionReceipt> {
        let data = abi.encode_deployment(constructor_args)?;

        info!("Deploying contract ({} bytes of init code)", data.len());
        let receipt = self
            .execute(None, data, U256::zero(), self.deploy_gas_limit)
            .await?;

        match receipt.contract_address {
            Some(address) => {
                info!("Contract deployed to {:?}", address);
                Ok(receipt)
            }
            None => Err(PledgeError::TransactionRejected {
                reason: RejectReason::Other("receipt has no contract address".to_string()),
                tx_hash: Some(receipt.tx_hash),
            }),
        }
    }

    /// Nonce, gas, sign, send, confirm
    async fn execute(
        &self,
        to: Option<Address>,
        data: Bytes,
        value: U256,
        gas_limit: U256,
    ) -> PledgeResult<SubmissionReceipt> {
        let chain_id = self.client.chain_id();
        let sender = self.sender();

        let gas_price = self.gas.gas_price(self.client.as_ref()).await?;

        let on_chain = self
            .client
            .transaction_count(sender)
            .await
            .map_err(|e| e.into_connection(chain_id))?;
        let nonce = self.nonces.reserve(sender, on_chain);

        debug!(
            "Max cost for nonce {}: {} wei",
            nonce,
            GasOracle::calculate_cost(gas_limit, gas_price).saturating_add(value)
        );

        let unsigned = UnsignedCall::new(CallParams {
            from: sender,
            to,
            data,
            value,
            chain_id,
            nonce,
            gas_limit,
            gas_price,
        });

        let signed = match unsigned.sign(&self.wallet).await {
            Ok(signed) => signed,
            Err(e) => {
                self.nonces.release(sender, nonce);
                return Err(e);
            }
        };
        let local_hash = signed.hash();

        let tx_hash = match self.client.send_raw_transaction(signed.into_raw()).await {
            Ok(hash) => hash,
            Err(e) => {
                self.nonces.release(sender, nonce);
                let err = e.into_rejection(chain_id);
                error!("Transaction with nonce {} not accepted: {}", nonce, err);
                return Err(err);
            }
        };

        if tx_hash != local_hash {
            warn!(
                "Node reported hash {:?}, expected {:?}",
                tx_hash, local_hash
            );
        }
        info!("Transaction sent: {:?} (nonce {})", tx_hash, nonce);

        let receipt = self.wait_for_receipt(tx_hash).await?;

        if receipt.status != Some(1u64.into()) {
            let reason = if receipt.gas_used == Some(gas_limit) {
                RejectReason::OutOfGas
            } else {
                RejectReason::Reverted
            };
            error!("Transaction {:?} failed: {}", tx_hash, reason);
            return Err(PledgeError::TransactionRejected {
                reason,
                tx_hash: Some(tx_hash),
            });
        }

        let receipt = SubmissionReceipt::from_receipt(&receipt, nonce);
        info!("Transaction confirmed: {}", receipt);
        Ok(receipt)
    }

    /// Poll for the receipt until it is mined or the confirmation window closes
    ///
    /// The transaction is already broadcast, so failed polls are retried
    /// until the window closes and every error carries the hash.
    async fn wait_for_receipt(&self, tx_hash: H256) -> PledgeResult<TransactionReceipt> {
        let poll_interval = self.confirmation.poll_interval();

        let poll = async {
            loop {
                match self.client.transaction_receipt(tx_hash).await {
                    Ok(Some(receipt)) if receipt.block_number.is_some() => return receipt,
                    Ok(_) => debug!("Waiting for receipt of {:?}", tx_hash),
                    Err(e) => warn!("Receipt poll for {:?} failed: {}", tx_hash, e),
                }
                tokio::time::sleep(poll_interval).await;
            }
        };

        match timeout(self.confirmation.timeout(), poll).await {
            Ok(receipt) => Ok(receipt),
            Err(_) => {
                warn!("Timed out waiting for receipt of {:?}", tx_hash);
                Err(PledgeError::TransactionRejected {
                    reason: RejectReason::Timeout {
                        waited_secs: self.confirmation.timeout_secs,
                    },
                    tx_hash: Some(tx_hash),
                })
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::chain::MockRpcClient;
    use crate::config::GasPriceStrategy;
    use crate::contract::entries::{self, DEPOSIT_LEND, GET_POOL_INFO};
    use crate::contract::tests::{pool_artifact, POOL_ABI, TOKEN_ABI};
    use crate::error::RpcFailure;
    use ethers::types::Transaction;
    use ethers::utils::{keccak256, rlp};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    pub(crate) const DEV_KEY: &str =
        "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    pub(crate) const CHAIN_ID: u64 = 11155111;

    pub(crate) fn gas_config() -> GasConfig {
        GasConfig {
            limit: 2_000_000,
            deploy_limit: 5_000_000,
            strategy: GasPriceStrategy::Fixed,
            price_gwei: Some(20),
            buffer_percent: 0,
            max_price_gwei: None,
        }
    }

    pub(crate) fn fast_confirmation() -> ConfirmationConfig {
        ConfirmationConfig {
            poll_interval_ms: 5,
            timeout_secs: 1,
        }
    }

    pub(crate) fn pool_binding() -> ContractBinding {
        let abi = ContractAbi::from_json(POOL_ABI, entries::PLEDGE_POOL).unwrap();
        ContractBinding::new(Address::repeat_byte(0x42), abi)
    }

    pub(crate) fn mined(tx_hash: H256, status: u64, gas_used: u64) -> TransactionReceipt {
        TransactionReceipt {
            transaction_hash: tx_hash,
            block_number: Some(100u64.into()),
            gas_used: Some(U256::from(gas_used)),
            status: Some(status.into()),
            ..Default::default()
        }
    }

    /// Node that accepts every transaction and mines it successfully
    pub(crate) fn happy_node(nonce: u64) -> MockRpcClient {
        let mut client = MockRpcClient::new();
        client.expect_chain_id().return_const(CHAIN_ID);
        client
            .expect_transaction_count()
            .returning(move |_| Ok(U256::from(nonce)));
        client
            .expect_send_raw_transaction()
            .returning(|raw| Ok(H256::from(keccak256(&raw))));
        client
            .expect_transaction_receipt()
            .returning(|hash| Ok(Some(mined(hash, 1, 52_000))));
        client
    }

    fn submitter(client: MockRpcClient) -> TransactionSubmitter {
        TransactionSubmitter::new(Arc::new(client), DEV_KEY, &gas_config(), fast_confirmation())
            .unwrap()
    }

    fn deposit_args(pool_id: u64, amount: U256) -> Vec<Token> {
        vec![Token::Uint(U256::from(pool_id)), Token::Uint(amount)]
    }

    #[test]
    fn test_parse_wallet() {
        let wallet = parse_wallet(DEV_KEY, CHAIN_ID).unwrap();
        assert_eq!(
            wallet.address(),
            "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266"
                .parse::<Address>()
                .unwrap()
        );
        assert_eq!(wallet.chain_id(), CHAIN_ID);

        assert!(matches!(
            parse_wallet("0xnot-a-key", CHAIN_ID),
            Err(PledgeError::InvalidKey(_))
        ));
        assert!(matches!(
            parse_wallet(&"00".repeat(32), CHAIN_ID),
            Err(PledgeError::InvalidKey(_))
        ));
    }

    #[tokio::test]
    async fn test_submit_returns_confirmed_receipt() {
        let submitter = submitter(happy_node(4));
        let receipt = submitter
            .submit(
                &pool_binding(),
                DEPOSIT_LEND,
                &deposit_args(0, U256::exp10(18)),
                SubmitOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(receipt.nonce, 4);
        assert_eq!(receipt.block_number, Some(100));
        assert_eq!(receipt.gas_used, Some(U256::from(52_000u64)));
        assert!(receipt.contract_address.is_none());
    }

    #[tokio::test]
    async fn test_zero_amount_succeeds() {
        let submitter = submitter(happy_node(0));
        let receipt = submitter
            .submit(
                &pool_binding(),
                DEPOSIT_LEND,
                &deposit_args(0, U256::zero()),
                SubmitOptions::default(),
            )
            .await
            .unwrap();
        assert_ne!(receipt.tx_hash, H256::zero());
    }

    #[tokio::test]
    async fn test_sequential_submits_use_increasing_nonces() {
        // The node keeps reporting the same count, as a lagging replica would
        let submitter = submitter(happy_node(12));
        let binding = pool_binding();

        let mut nonces = Vec::new();
        for _ in 0..3 {
            let receipt = submitter
                .submit(
                    &binding,
                    DEPOSIT_LEND,
                    &deposit_args(1, U256::from(5u64)),
                    SubmitOptions::default(),
                )
                .await
                .unwrap();
            nonces.push(receipt.nonce);
        }
        assert_eq!(nonces, vec![12, 13, 14]);
    }

    #[tokio::test]
    async fn test_intrinsic_gas_rejection_produces_no_receipt() {
        let mut client = MockRpcClient::new();
        client.expect_chain_id().return_const(CHAIN_ID);
        client
            .expect_transaction_count()
            .returning(|_| Ok(U256::from(3u64)));
        client.expect_send_raw_transaction().returning(|_| {
            Err(RpcFailure::Node {
                code: -32000,
                message: "intrinsic gas too low".to_string(),
                data: None,
            })
        });
        client.expect_transaction_receipt().never();

        let submitter = submitter(client);
        let err = submitter
            .submit(
                &pool_binding(),
                DEPOSIT_LEND,
                &deposit_args(0, U256::one()),
                SubmitOptions {
                    gas_limit: Some(U256::from(1_000u64)),
                    value: None,
                },
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PledgeError::TransactionRejected {
                reason: RejectReason::IntrinsicGasTooLow,
                tx_hash: None
            }
        ));
        // The refused nonce is handed out again
        assert_eq!(submitter.nonces.peek(submitter.sender()), Some(3));
    }

    #[tokio::test]
    async fn test_out_of_gas_receipt_is_rejection() {
        let mut client = MockRpcClient::new();
        client.expect_chain_id().return_const(CHAIN_ID);
        client
            .expect_transaction_count()
            .returning(|_| Ok(U256::zero()));
        client
            .expect_send_raw_transaction()
            .returning(|raw| Ok(H256::from(keccak256(&raw))));
        client
            .expect_transaction_receipt()
            .returning(|hash| Ok(Some(mined(hash, 0, 30_000))));

        let submitter = submitter(client);
        let err = submitter
            .submit(
                &pool_binding(),
                DEPOSIT_LEND,
                &deposit_args(0, U256::one()),
                SubmitOptions {
                    gas_limit: Some(U256::from(30_000u64)),
                    value: None,
                },
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PledgeError::TransactionRejected {
                reason: RejectReason::OutOfGas,
                tx_hash: Some(_)
            }
        ));
    }

    #[tokio::test]
    async fn test_unfunded_key_is_rejection_not_connection() {
        let mut client = MockRpcClient::new();
        client.expect_chain_id().return_const(CHAIN_ID);
        client
            .expect_transaction_count()
            .returning(|_| Ok(U256::zero()));
        client.expect_send_raw_transaction().returning(|_| {
            Err(RpcFailure::Node {
                code: -32000,
                message: "insufficient funds for gas * price + value: balance 0".to_string(),
                data: None,
            })
        });

        let submitter = submitter(client);
        let err = submitter
            .submit(
                &pool_binding(),
                DEPOSIT_LEND,
                &deposit_args(0, U256::one()),
                SubmitOptions::default(),
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PledgeError::TransactionRejected {
                reason: RejectReason::InsufficientFunds,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_unreachable_node_is_connection_error() {
        let mut client = MockRpcClient::new();
        client.expect_chain_id().return_const(CHAIN_ID);
        client
            .expect_transaction_count()
            .returning(|_| Err(RpcFailure::Transport("connection refused".to_string())));
        client.expect_send_raw_transaction().never();

        let submitter = submitter(client);
        let err = submitter
            .submit(
                &pool_binding(),
                DEPOSIT_LEND,
                &deposit_args(0, U256::one()),
                SubmitOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PledgeError::Connection { chain_id: CHAIN_ID, .. }));
    }

    #[tokio::test]
    async fn test_missing_receipt_times_out_as_rejection() {
        let mut client = MockRpcClient::new();
        client.expect_chain_id().return_const(CHAIN_ID);
        client
            .expect_transaction_count()
            .returning(|_| Ok(U256::zero()));
        client
            .expect_send_raw_transaction()
            .returning(|raw| Ok(H256::from(keccak256(&raw))));
        client
            .expect_transaction_receipt()
            .returning(|_| Ok(None));

        let submitter = submitter(client);
        let err = submitter
            .submit(
                &pool_binding(),
                DEPOSIT_LEND,
                &deposit_args(0, U256::one()),
                SubmitOptions::default(),
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PledgeError::TransactionRejected {
                reason: RejectReason::Timeout { waited_secs: 1 },
                tx_hash: Some(_)
            }
        ));
        assert!(err.tx_hash().is_some());
        // Broadcast already happened; resubmitting would duplicate it
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_receipt_poll_survives_transport_failure() {
        let polls = Arc::new(AtomicUsize::new(0));

        let mut client = MockRpcClient::new();
        client.expect_chain_id().return_const(CHAIN_ID);
        client
            .expect_transaction_count()
            .returning(|_| Ok(U256::from(2u64)));
        client
            .expect_send_raw_transaction()
            .times(1)
            .returning(|raw| Ok(H256::from(keccak256(&raw))));
        let seen = polls.clone();
        client.expect_transaction_receipt().returning(move |hash| {
            if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(RpcFailure::Transport("502 bad gateway".to_string()))
            } else {
                Ok(Some(mined(hash, 1, 52_000)))
            }
        });

        let receipt = submitter(client)
            .submit(
                &pool_binding(),
                DEPOSIT_LEND,
                &deposit_args(0, U256::exp10(18)),
                SubmitOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(receipt.nonce, 2);
        assert_eq!(polls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unreachable_node_after_broadcast_keeps_hash() {
        let mut client = MockRpcClient::new();
        client.expect_chain_id().return_const(CHAIN_ID);
        client
            .expect_transaction_count()
            .returning(|_| Ok(U256::zero()));
        client
            .expect_send_raw_transaction()
            .returning(|raw| Ok(H256::from(keccak256(&raw))));
        client
            .expect_transaction_receipt()
            .returning(|_| Err(RpcFailure::Transport("connection reset".to_string())));

        let err = submitter(client)
            .submit(
                &pool_binding(),
                DEPOSIT_LEND,
                &deposit_args(0, U256::one()),
                SubmitOptions::default(),
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PledgeError::TransactionRejected {
                reason: RejectReason::Timeout { .. },
                tx_hash: Some(_)
            }
        ));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_value_to_non_payable_fails_before_node() {
        let mut client = MockRpcClient::new();
        client.expect_chain_id().return_const(CHAIN_ID);
        client.expect_gas_price().never();
        client.expect_transaction_count().never();
        client.expect_send_raw_transaction().never();

        let abi = ContractAbi::from_json(TOKEN_ABI, entries::ERC20_TOKEN).unwrap();
        let token = ContractBinding::new(Address::repeat_byte(0x55), abi);

        let err = submitter(client)
            .submit(
                &token,
                entries::APPROVE,
                &[Token::Address(Address::repeat_byte(0x42)), Token::Uint(U256::one())],
                SubmitOptions {
                    gas_limit: None,
                    value: Some(U256::from(5u64)),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PledgeError::InvalidArguments { .. }));
    }

    #[tokio::test]
    async fn test_value_reaches_signed_transaction() {
        let sent: Arc<Mutex<Option<Bytes>>> = Arc::new(Mutex::new(None));

        let mut client = MockRpcClient::new();
        client.expect_chain_id().return_const(CHAIN_ID);
        client
            .expect_transaction_count()
            .returning(|_| Ok(U256::from(8u64)));
        let seen = sent.clone();
        client.expect_send_raw_transaction().returning(move |raw| {
            let hash = H256::from(keccak256(&raw));
            *seen.lock().unwrap() = Some(raw);
            Ok(hash)
        });
        client
            .expect_transaction_receipt()
            .returning(|hash| Ok(Some(mined(hash, 1, 60_000))));

        let submitter = submitter(client);
        submitter
            .submit(
                &pool_binding(),
                DEPOSIT_LEND,
                &deposit_args(0, U256::exp10(18)),
                SubmitOptions {
                    gas_limit: Some(U256::from(300_000u64)),
                    value: Some(U256::from(12_345u64)),
                },
            )
            .await
            .unwrap();

        let raw = sent.lock().unwrap().clone().unwrap();
        let tx: Transaction = rlp::decode(&raw).unwrap();
        assert_eq!(tx.value, U256::from(12_345u64));
        assert_eq!(tx.to, Some(Address::repeat_byte(0x42)));
        assert_eq!(tx.gas, U256::from(300_000u64));
        assert_eq!(tx.nonce, U256::from(8u64));
        assert_eq!(tx.recover_from().unwrap(), submitter.sender());
    }

    #[tokio::test]
    async fn test_unpayable_value_is_node_rejection_not_crash() {
        // Max-cost logging must not overflow on an absurd value
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let mut client = MockRpcClient::new();
        client.expect_chain_id().return_const(CHAIN_ID);
        client
            .expect_transaction_count()
            .returning(|_| Ok(U256::zero()));
        client.expect_send_raw_transaction().returning(|_| {
            Err(RpcFailure::Node {
                code: -32000,
                message: "insufficient funds for gas * price + value".to_string(),
                data: None,
            })
        });
        client.expect_transaction_receipt().never();

        let err = submitter(client)
            .submit(
                &pool_binding(),
                DEPOSIT_LEND,
                &deposit_args(0, U256::one()),
                SubmitOptions {
                    gas_limit: None,
                    value: Some(U256::MAX),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PledgeError::TransactionRejected {
                reason: RejectReason::InsufficientFunds,
                tx_hash: None
            }
        ));
    }

    #[tokio::test]
    async fn test_argument_mismatch_fails_before_node() {
        let mut client = MockRpcClient::new();
        client.expect_chain_id().return_const(CHAIN_ID);
        client.expect_transaction_count().never();

        let submitter = submitter(client);
        let binding = pool_binding();

        let err = submitter
            .submit(
                &binding,
                DEPOSIT_LEND,
                &[Token::Bool(true), Token::Uint(U256::one())],
                SubmitOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PledgeError::InvalidArguments { .. }));

        let err = submitter
            .submit(
                &binding,
                GET_POOL_INFO,
                &[Token::Uint(U256::zero())],
                SubmitOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PledgeError::InvalidArguments { .. }));
    }

    #[tokio::test]
    async fn test_query_decodes_outputs_without_nonce() {
        let lend_token = Address::repeat_byte(0x77);
        let captured: Arc<Mutex<Option<TypedTransaction>>> = Arc::new(Mutex::new(None));

        let mut client = MockRpcClient::new();
        client.expect_chain_id().return_const(CHAIN_ID);
        client.expect_transaction_count().never();
        client.expect_send_raw_transaction().never();
        let seen = captured.clone();
        client.expect_call().returning(move |tx| {
            *seen.lock().unwrap() = Some(tx.clone());
            Ok(Bytes::from(ethers::abi::encode(&[
                Token::Uint(U256::from(1_700_000_000u64)),
                Token::Uint(U256::exp10(21)),
                Token::Address(lend_token),
            ])))
        });

        let submitter = submitter(client);
        let tokens = query_contract(
            submitter.client.as_ref(),
            &pool_binding(),
            GET_POOL_INFO,
            &[Token::Uint(U256::zero())],
            Some(submitter.sender()),
        )
        .await
        .unwrap();

        assert_eq!(tokens.len(), 3);
        assert_eq!(tokens[1], Token::Uint(U256::exp10(21)));
        assert_eq!(tokens[2], Token::Address(lend_token));

        let tx = captured.lock().unwrap().clone().unwrap();
        assert_eq!(tx.from(), Some(&submitter.sender()));
        assert!(tx.nonce().is_none());
        assert_eq!(submitter.nonces.peek(submitter.sender()), None);
    }

    #[tokio::test]
    async fn test_query_revert_is_remote_call_error() {
        let mut client = MockRpcClient::new();
        client.expect_chain_id().return_const(CHAIN_ID);
        client.expect_call().returning(|_| {
            Err(RpcFailure::Node {
                code: 3,
                message: "execution reverted".to_string(),
                data: None,
            })
        });

        let err = query_contract(
            &client,
            &pool_binding(),
            GET_POOL_INFO,
            &[Token::Uint(U256::from(999u64))],
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PledgeError::RemoteCall { .. }));
    }

    #[tokio::test]
    async fn test_query_empty_return_is_remote_call_error() {
        // Calling an address without code returns 0x
        let mut client = MockRpcClient::new();
        client.expect_chain_id().return_const(CHAIN_ID);
        client.expect_call().returning(|_| Ok(Bytes::new()));

        let err = query_contract(
            &client,
            &pool_binding(),
            GET_POOL_INFO,
            &[Token::Uint(U256::zero())],
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PledgeError::RemoteCall { .. }));
    }

    #[tokio::test]
    async fn test_deploy_reports_contract_address() {
        let deployed = Address::repeat_byte(0x99);
        let mut client = MockRpcClient::new();
        client.expect_chain_id().return_const(CHAIN_ID);
        client
            .expect_transaction_count()
            .returning(|_| Ok(U256::zero()));
        client
            .expect_send_raw_transaction()
            .returning(|raw| Ok(H256::from(keccak256(&raw))));
        client.expect_transaction_receipt().returning(move |hash| {
            let mut receipt = mined(hash, 1, 1_200_000);
            receipt.contract_address = Some(deployed);
            Ok(Some(receipt))
        });

        let abi = ContractAbi::from_json(&pool_artifact(), entries::PLEDGE_POOL).unwrap();
        let receipt = submitter(client)
            .deploy(&abi, &[Token::Address(Address::repeat_byte(0x11))])
            .await
            .unwrap();
        assert_eq!(receipt.contract_address, Some(deployed));
    }
}
