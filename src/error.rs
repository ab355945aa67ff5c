//! Error types for the PledgePool client

use ethers::abi::{self, ParamType, Token};
use ethers::providers::{ProviderError, RpcError};
use ethers::types::{Bytes, H256};
use std::fmt;
use thiserror::Error;

/// Selector of the standard `Error(string)` revert payload
const ERROR_STRING_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];

/// Main error type for client operations
#[derive(Error, Debug)]
pub enum PledgeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("ABI error: {0}")]
    Abi(String),

    #[error("Connection error for chain {chain_id}: {message}")]
    Connection { chain_id: u64, message: String },

    #[error("Transaction rejected: {reason}")]
    TransactionRejected {
        reason: RejectReason,
        tx_hash: Option<H256>,
    },

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Invalid arguments for {function}: {message}")]
    InvalidArguments { function: String, message: String },

    #[error("Remote call {function} failed: {message}")]
    RemoteCall { function: String, message: String },
}

impl PledgeError {
    /// Check if the caller may reasonably retry (with a fresh nonce)
    ///
    /// Never true once a transaction was broadcast: it may still be mined.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PledgeError::Connection { .. }
                | PledgeError::TransactionRejected {
                    reason: RejectReason::NonceTooLow,
                    tx_hash: None,
                }
        )
    }

    /// Hash of the broadcast transaction, when the failure happened after broadcast
    pub fn tx_hash(&self) -> Option<H256> {
        match self {
            PledgeError::TransactionRejected { tx_hash, .. } => *tx_hash,
            _ => None,
        }
    }

    pub(crate) fn invalid_arguments(function: &str, message: impl Into<String>) -> Self {
        PledgeError::InvalidArguments {
            function: function.to_string(),
            message: message.into(),
        }
    }
}

/// Why the node refused or failed a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    InsufficientFunds,
    NonceTooLow,
    Underpriced,
    IntrinsicGasTooLow,
    /// Mined with status 0
    Reverted,
    /// Mined with status 0 after consuming the whole gas limit
    OutOfGas,
    /// No receipt within the confirmation window
    Timeout { waited_secs: u64 },
    Other(String),
}

impl RejectReason {
    /// Classify a node error message
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("insufficient funds") {
            RejectReason::InsufficientFunds
        } else if lower.contains("nonce too low") || lower.contains("already known") {
            RejectReason::NonceTooLow
        } else if lower.contains("underpriced") || lower.contains("fee cap") {
            RejectReason::Underpriced
        } else if lower.contains("gas too low") {
            RejectReason::IntrinsicGasTooLow
        } else if lower.contains("revert") {
            RejectReason::Reverted
        } else {
            RejectReason::Other(message.to_string())
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::InsufficientFunds => write!(f, "insufficient funds for gas * price + value"),
            RejectReason::NonceTooLow => write!(f, "nonce too low"),
            RejectReason::Underpriced => write!(f, "gas price too low"),
            RejectReason::IntrinsicGasTooLow => write!(f, "gas limit below intrinsic cost"),
            RejectReason::Reverted => write!(f, "execution reverted"),
            RejectReason::OutOfGas => write!(f, "out of gas"),
            RejectReason::Timeout { waited_secs } => {
                write!(f, "no receipt after {}s", waited_secs)
            }
            RejectReason::Other(message) => write!(f, "{}", message),
        }
    }
}

/// Failure of a single JSON-RPC request, before it is given operation context
#[derive(Error, Debug, Clone)]
pub enum RpcFailure {
    /// The endpoint could not be reached or answered garbage
    #[error("transport failure: {0}")]
    Transport(String),

    /// The node answered with a JSON-RPC error object
    #[error("node error {code}: {message}")]
    Node {
        code: i64,
        message: String,
        data: Option<Bytes>,
    },
}

impl RpcFailure {
    /// Map into the error surfaced by a state-changing submission
    pub fn into_rejection(self, chain_id: u64) -> PledgeError {
        match self {
            RpcFailure::Transport(message) => PledgeError::Connection { chain_id, message },
            RpcFailure::Node { message, .. } => PledgeError::TransactionRejected {
                reason: RejectReason::classify(&message),
                tx_hash: None,
            },
        }
    }

    /// Map into the error surfaced by a read-only call
    pub fn into_remote_call(self, chain_id: u64, function: &str) -> PledgeError {
        match self {
            RpcFailure::Transport(message) => PledgeError::Connection { chain_id, message },
            RpcFailure::Node { message, data, .. } => {
                let message = match data.as_ref().and_then(decode_revert_reason) {
                    Some(reason) => format!("{}: {}", message, reason),
                    None => message,
                };
                PledgeError::RemoteCall {
                    function: function.to_string(),
                    message,
                }
            }
        }
    }

    /// Map into a connection error regardless of origin
    pub fn into_connection(self, chain_id: u64) -> PledgeError {
        PledgeError::Connection {
            chain_id,
            message: self.to_string(),
        }
    }
}

impl From<ProviderError> for RpcFailure {
    fn from(e: ProviderError) -> Self {
        match e.as_error_response() {
            Some(resp) => RpcFailure::Node {
                code: resp.code,
                message: resp.message.clone(),
                data: resp.as_revert_data(),
            },
            None => RpcFailure::Transport(e.to_string()),
        }
    }
}

/// Decode the message of an `Error(string)` revert payload
pub fn decode_revert_reason(data: &Bytes) -> Option<String> {
    let payload = data.as_ref();
    if payload.len() < 4 || payload[..4] != ERROR_STRING_SELECTOR {
        return None;
    }
    match abi::decode(&[ParamType::String], &payload[4..]).ok()?.pop()? {
        Token::String(reason) => Some(reason),
        _ => None,
    }
}

/// Result type for client operations
pub type PledgeResult<T> = Result<T, PledgeError>;
