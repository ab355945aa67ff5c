//! Transaction submission module with nonce tracking and gas pricing

mod gas;
mod nonce;
mod request;
mod submitter;

pub use submitter::{query_contract, SubmissionReceipt, SubmitOptions, TransactionSubmitter};

#[cfg(test)]
pub(crate) use submitter::tests as test_support;
