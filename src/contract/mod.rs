//! Contract bindings - address plus an ABI-validated entry-point table
//!
//! Entry points are resolved against the ABI once, when the binding is
//! loaded, so a misconfigured ABI file fails before any transaction is
//! built.

pub mod entries;

pub use entries::{EntryKind, EntrySpec};

use crate::error::{PledgeError, PledgeResult};

use ethers::abi::token::{LenientTokenizer, Tokenizer};
use ethers::abi::{Abi, Function, StateMutability, Token};
use ethers::types::{Address, Bytes, U256};
use ethers::utils::to_checksum;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

/// A resolved contract function
#[derive(Debug, Clone)]
pub struct Entry {
    function: Function,
    kind: EntryKind,
}

impl Entry {
    fn new(function: Function) -> Self {
        let kind = EntryKind::of(function.state_mutability);
        Self { function, kind }
    }

    pub fn name(&self) -> &str {
        &self.function.name
    }

    pub fn kind(&self) -> EntryKind {
        self.kind
    }

    pub fn is_payable(&self) -> bool {
        self.function.state_mutability == StateMutability::Payable
    }

    /// Canonical signature, e.g. `depositLend(uint256,uint256)`
    pub fn signature(&self) -> String {
        format!("{}({})", self.function.name, self.input_types().join(","))
    }

    /// Selector plus ABI-encoded arguments
    pub fn encode(&self, args: &[Token]) -> PledgeResult<Bytes> {
        if args.len() != self.function.inputs.len() {
            return Err(PledgeError::invalid_arguments(
                self.name(),
                format!(
                    "expected {} arguments, got {}",
                    self.function.inputs.len(),
                    args.len()
                ),
            ));
        }
        self.function
            .encode_input(args)
            .map(Bytes::from)
            .map_err(|e| PledgeError::invalid_arguments(self.name(), e.to_string()))
    }

    /// Decode return data per the declared outputs
    pub fn decode_output(&self, data: &[u8]) -> PledgeResult<Vec<Token>> {
        self.function
            .decode_output(data)
            .map_err(|e| PledgeError::RemoteCall {
                function: self.name().to_string(),
                message: format!("undecodable return data: {}", e),
            })
    }

    /// Parse textual arguments against the declared input types
    pub fn tokenize(&self, args: &[String]) -> PledgeResult<Vec<Token>> {
        if args.len() != self.function.inputs.len() {
            return Err(PledgeError::invalid_arguments(
                self.name(),
                format!(
                    "expected {} arguments, got {}",
                    self.function.inputs.len(),
                    args.len()
                ),
            ));
        }
        self.function
            .inputs
            .iter()
            .zip(args)
            .map(|(param, raw)| {
                LenientTokenizer::tokenize(&param.kind, raw).map_err(|e| {
                    PledgeError::invalid_arguments(
                        self.name(),
                        format!("{} ({}): {}", param.name, param.kind, e),
                    )
                })
            })
            .collect()
    }

    /// Declared output names, `output{i}` where the ABI leaves them blank
    pub fn output_names(&self) -> Vec<String> {
        self.function
            .outputs
            .iter()
            .enumerate()
            .map(|(i, p)| {
                if p.name.is_empty() {
                    format!("output{}", i)
                } else {
                    p.name.clone()
                }
            })
            .collect()
    }

    fn input_types(&self) -> Vec<String> {
        self.function
            .inputs
            .iter()
            .map(|p| p.kind.to_string())
            .collect()
    }
}

/// Parsed ABI with its entry-point table and optional creation bytecode
#[derive(Debug, Clone)]
pub struct ContractAbi {
    abi: Abi,
    entries: HashMap<String, Vec<Entry>>,
    bytecode: Option<Bytes>,
}

impl ContractAbi {
    /// Load an ABI file and check it against the required entry points
    pub fn load(path: &Path, required: &[EntrySpec]) -> PledgeResult<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| PledgeError::Abi(format!("Failed to read {:?}: {}", path, e)))?;
        let abi = Self::from_json(&raw, required).map_err(|e| match e {
            PledgeError::Abi(message) => PledgeError::Abi(format!("{:?}: {}", path, message)),
            other => other,
        })?;
        debug!("Loaded ABI {:?} ({} functions)", path, abi.entries.len());
        Ok(abi)
    }

    /// Parse either a bare ABI array or a compiler artifact with an `abi` key
    pub fn from_json(raw: &str, required: &[EntrySpec]) -> PledgeResult<Self> {
        let value: Value =
            serde_json::from_str(raw).map_err(|e| PledgeError::Abi(e.to_string()))?;

        let (abi_value, bytecode) = match value {
            Value::Array(entries) => (Value::Array(entries), None),
            Value::Object(mut artifact) => {
                let abi_value = artifact
                    .remove("abi")
                    .ok_or_else(|| PledgeError::Abi("artifact has no `abi` key".to_string()))?;
                let bytecode = artifact
                    .get("bytecode")
                    .map(parse_bytecode)
                    .transpose()?
                    .flatten();
                (abi_value, bytecode)
            }
            _ => {
                return Err(PledgeError::Abi(
                    "expected an ABI array or artifact object".to_string(),
                ))
            }
        };

        let abi: Abi =
            serde_json::from_value(abi_value).map_err(|e| PledgeError::Abi(e.to_string()))?;

        let entries = abi
            .functions
            .iter()
            .map(|(name, overloads)| {
                (
                    name.clone(),
                    overloads.iter().cloned().map(Entry::new).collect(),
                )
            })
            .collect();

        let contract = Self {
            abi,
            entries,
            bytecode,
        };
        contract.check(required)?;
        Ok(contract)
    }

    /// Verify each required entry point exists with the expected shape
    fn check(&self, required: &[EntrySpec]) -> PledgeResult<()> {
        for spec in required {
            let overloads = self.entries.get(spec.name).ok_or_else(|| {
                PledgeError::Abi(format!("missing function {}", spec.name))
            })?;
            let matched = overloads
                .iter()
                .find(|e| e.input_types() == spec.inputs)
                .ok_or_else(|| {
                    PledgeError::Abi(format!(
                        "no overload {}({})",
                        spec.name,
                        spec.inputs.join(",")
                    ))
                })?;
            if matched.kind() != spec.kind {
                return Err(PledgeError::Abi(format!(
                    "{} is {:?}, expected {:?}",
                    matched.signature(),
                    matched.kind(),
                    spec.kind
                )));
            }
        }
        Ok(())
    }

    /// Resolve a function by name, using the argument count to pick among overloads
    pub fn entry(&self, name: &str, arity: usize) -> PledgeResult<&Entry> {
        let overloads = self
            .entries
            .get(name)
            .ok_or_else(|| PledgeError::invalid_arguments(name, "no such function in ABI"))?;

        if let [only] = overloads.as_slice() {
            return Ok(only);
        }

        let mut candidates = overloads
            .iter()
            .filter(|e| e.function.inputs.len() == arity);
        match (candidates.next(), candidates.next()) {
            (Some(entry), None) => Ok(entry),
            (None, _) => Err(PledgeError::invalid_arguments(
                name,
                format!("no overload takes {} arguments", arity),
            )),
            (Some(_), Some(_)) => Err(PledgeError::invalid_arguments(
                name,
                format!("ambiguous overload for {} arguments", arity),
            )),
        }
    }

    /// Creation bytecode followed by the encoded constructor arguments
    pub fn encode_deployment(&self, args: &[Token]) -> PledgeResult<Bytes> {
        let bytecode = self
            .bytecode
            .as_ref()
            .ok_or_else(|| PledgeError::Abi("artifact has no bytecode".to_string()))?;

        match self.abi.constructor() {
            Some(constructor) => constructor
                .encode_input(bytecode.to_vec(), args)
                .map(Bytes::from)
                .map_err(|e| PledgeError::invalid_arguments("constructor", e.to_string())),
            None if args.is_empty() => Ok(bytecode.clone()),
            None => Err(PledgeError::invalid_arguments(
                "constructor",
                "contract takes no constructor arguments",
            )),
        }
    }
}

/// Human-readable rendering: decimal integers, checksummed addresses
pub fn format_token(token: &Token) -> String {
    match token {
        Token::Uint(v) => v.to_string(),
        Token::Int(v) => {
            // Two's complement
            if v.bit(255) {
                format!("-{}", (!*v).overflowing_add(U256::one()).0)
            } else {
                v.to_string()
            }
        }
        Token::Address(a) => to_checksum(a, None),
        Token::Bool(b) => b.to_string(),
        Token::String(s) => s.clone(),
        Token::Bytes(b) | Token::FixedBytes(b) => format!("0x{}", hex::encode(b)),
        Token::Array(items) | Token::FixedArray(items) => format!(
            "[{}]",
            items.iter().map(format_token).collect::<Vec<_>>().join(", ")
        ),
        Token::Tuple(items) => format!(
            "({})",
            items.iter().map(format_token).collect::<Vec<_>>().join(", ")
        ),
    }
}

fn parse_bytecode(value: &Value) -> PledgeResult<Option<Bytes>> {
    // Either "0x..." or { "object": "0x..." }
    let hex_str = match value {
        Value::String(s) => s.as_str(),
        Value::Object(obj) => match obj.get("object") {
            Some(Value::String(s)) => s.as_str(),
            _ => return Ok(None),
        },
        _ => return Ok(None),
    };
    let hex_str = hex_str.strip_prefix("0x").unwrap_or(hex_str);
    if hex_str.is_empty() {
        return Ok(None);
    }
    hex::decode(hex_str)
        .map(|b| Some(Bytes::from(b)))
        .map_err(|e| PledgeError::Abi(format!("invalid bytecode: {}", e)))
}

/// Deployed contract: checksummed address plus ABI
#[derive(Debug, Clone)]
pub struct ContractBinding {
    address: Address,
    abi: ContractAbi,
}

impl ContractBinding {
    pub fn new(address: Address, abi: ContractAbi) -> Self {
        Self { address, abi }
    }

    /// Bind an ABI file to a configured address string
    pub fn load(address: &str, abi_path: &Path, required: &[EntrySpec]) -> PledgeResult<Self> {
        let address = parse_checksum_address(address)?;
        let abi = ContractAbi::load(abi_path, required)?;
        Ok(Self::new(address, abi))
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn abi(&self) -> &ContractAbi {
        &self.abi
    }
}

/// Parse an account identifier, enforcing EIP-55 when the input is mixed-case
pub fn parse_checksum_address(input: &str) -> PledgeResult<Address> {
    let trimmed = input.trim();
    let hex_part = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .ok_or_else(|| PledgeError::Config(format!("address {} lacks 0x prefix", trimmed)))?;

    if hex_part.len() != 40 || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(PledgeError::Config(format!(
            "address {} is not 20 hex bytes",
            trimmed
        )));
    }

    let address: Address = format!("0x{}", hex_part)
        .parse()
        .map_err(|e| PledgeError::Config(format!("invalid address {}: {}", trimmed, e)))?;

    let mixed_case = hex_part.chars().any(|c| c.is_ascii_lowercase())
        && hex_part.chars().any(|c| c.is_ascii_uppercase());
    if mixed_case {
        let expected = to_checksum(&address, None);
        if expected[2..] != *hex_part {
            return Err(PledgeError::Config(format!(
                "address {} fails checksum (expected {})",
                trimmed, expected
            )));
        }
    }

    Ok(address)
}
