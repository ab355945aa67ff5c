//! Entry points the client requires from each contract ABI

use ethers::abi::StateMutability;

/// Whether a function changes state (needs a signed transaction) or not
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Mutating,
    ReadOnly,
}

impl EntryKind {
    pub fn of(mutability: StateMutability) -> Self {
        match mutability {
            StateMutability::Pure | StateMutability::View => EntryKind::ReadOnly,
            StateMutability::NonPayable | StateMutability::Payable => EntryKind::Mutating,
        }
    }
}

/// Expected shape of a function in an ABI
#[derive(Debug, Clone, Copy)]
pub struct EntrySpec {
    pub name: &'static str,
    /// Solidity input types, canonical form
    pub inputs: &'static [&'static str],
    pub kind: EntryKind,
}

impl EntrySpec {
    pub const fn mutating(name: &'static str, inputs: &'static [&'static str]) -> Self {
        Self {
            name,
            inputs,
            kind: EntryKind::Mutating,
        }
    }

    pub const fn read_only(name: &'static str, inputs: &'static [&'static str]) -> Self {
        Self {
            name,
            inputs,
            kind: EntryKind::ReadOnly,
        }
    }
}

pub const DEPOSIT_LEND: &str = "depositLend";
pub const GET_POOL_INFO: &str = "getPoolInfo";
pub const APPROVE: &str = "approve";
pub const ALLOWANCE: &str = "allowance";
pub const BALANCE_OF: &str = "balanceOf";

/// PledgePool lending contract
pub const PLEDGE_POOL: &[EntrySpec] = &[
    EntrySpec::mutating(DEPOSIT_LEND, &["uint256", "uint256"]),
    EntrySpec::read_only(GET_POOL_INFO, &["uint256"]),
];

/// ERC-20 token lent into the pool
pub const ERC20_TOKEN: &[EntrySpec] = &[
    EntrySpec::mutating(APPROVE, &["address", "uint256"]),
    EntrySpec::read_only(ALLOWANCE, &["address", "address"]),
    EntrySpec::read_only(BALANCE_OF, &["address"]),
];
