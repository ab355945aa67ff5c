//! PledgePool operations: approve the lend token, deposit, read pool info

use crate::chain::RpcClient;
use crate::config::Settings;
use crate::contract::entries::{
    self, ALLOWANCE, APPROVE, BALANCE_OF, DEPOSIT_LEND, GET_POOL_INFO,
};
use crate::contract::{format_token, parse_checksum_address, ContractAbi, ContractBinding};
use crate::error::{PledgeError, PledgeResult};
use crate::tx::{query_contract, SubmissionReceipt, SubmitOptions, TransactionSubmitter};

use ethers::abi::Token;
use ethers::types::{Address, U256};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// Decoded `getPoolInfo` result, labelled with the ABI's output names
#[derive(Debug, Clone, PartialEq)]
pub struct PoolInfo {
    pub pool_id: U256,
    pub fields: Vec<(String, Token)>,
}

impl PoolInfo {
    #[cfg(test)]
    pub fn get(&self, name: &str) -> Option<&Token> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, t)| t)
    }
}

impl fmt::Display for PoolInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "pool {}", self.pool_id)?;
        for (name, token) in &self.fields {
            writeln!(f, "  {}: {}", name, format_token(token))?;
        }
        Ok(())
    }
}

/// Receipts of the approve-then-deposit flow
#[derive(Debug, Clone)]
pub struct LendOutcome {
    /// `None` when the existing allowance already covered the amount
    pub approval: Option<SubmissionReceipt>,
    pub deposit: SubmissionReceipt,
}

/// A PledgePool deployment and, optionally, the token it lends
pub struct PledgePool {
    client: Arc<dyn RpcClient>,
    submitter: Option<TransactionSubmitter>,
    pool: ContractBinding,
    token: Option<ContractBinding>,
}

impl PledgePool {
    pub fn new(
        client: Arc<dyn RpcClient>,
        submitter: Option<TransactionSubmitter>,
        pool: ContractBinding,
        token: Option<ContractBinding>,
    ) -> Self {
        Self {
            client,
            submitter,
            pool,
            token,
        }
    }

    /// Bind the contracts named in the configuration
    pub fn from_settings(
        settings: &Settings,
        client: Arc<dyn RpcClient>,
        submitter: Option<TransactionSubmitter>,
    ) -> PledgeResult<Self> {
        let pool_config = &settings.contracts.pool;
        if pool_config.address.is_empty() {
            return Err(PledgeError::Config(
                "contracts.pool.address is not set".to_string(),
            ));
        }
        let pool = ContractBinding::load(
            &pool_config.address,
            &pool_config.abi_path,
            entries::PLEDGE_POOL,
        )?;

        // An unset `${TOKEN_ADDRESS}` leaves the token out; pool reads still work
        let token = settings
            .contracts
            .token
            .as_ref()
            .filter(|t| !t.address.is_empty())
            .map(|t| ContractBinding::load(&t.address, &t.abi_path, entries::ERC20_TOKEN))
            .transpose()?;
        if token.is_none() {
            warn!("No lend token address configured - approve and lend are unavailable");
        }

        info!(
            "PledgePool at {:?}{}",
            pool.address(),
            token
                .as_ref()
                .map(|t| format!(", lend token at {:?}", t.address()))
                .unwrap_or_default()
        );

        Ok(Self::new(client, submitter, pool, token))
    }

    pub fn pool(&self) -> &ContractBinding {
        &self.pool
    }

    pub fn token(&self) -> PledgeResult<&ContractBinding> {
        self.token
            .as_ref()
            .ok_or_else(|| PledgeError::Config("contracts.token is not configured".to_string()))
    }

    pub fn submitter(&self) -> PledgeResult<&TransactionSubmitter> {
        self.submitter
            .as_ref()
            .ok_or_else(|| PledgeError::InvalidKey("no signing key configured".to_string()))
    }

    fn caller(&self) -> Option<Address> {
        self.submitter.as_ref().map(|s| s.sender())
    }

    /// Read pool state
    pub async fn get_pool_info(&self, pool_id: U256) -> PledgeResult<PoolInfo> {
        let tokens = self
            .query(&self.pool, GET_POOL_INFO, &[Token::Uint(pool_id)])
            .await?;
        let names = self
            .pool
            .abi()
            .entry(GET_POOL_INFO, 1)?
            .output_names();

        Ok(PoolInfo {
            pool_id,
            fields: names.into_iter().zip(tokens).collect(),
        })
    }

    /// Allow the pool to draw `amount` of the lend token
    pub async fn approve_token(&self, amount: U256) -> PledgeResult<SubmissionReceipt> {
        let token = self.token()?;
        let receipt = self
            .submitter()?
            .submit(
                token,
                APPROVE,
                &[Token::Address(self.pool.address()), Token::Uint(amount)],
                SubmitOptions::default(),
            )
            .await?;
        info!("Approval confirmed, tx hash: {:?}", receipt.tx_hash);
        Ok(receipt)
    }

    /// Lend `amount` into pool `pool_id`
    pub async fn deposit_lend(
        &self,
        pool_id: U256,
        amount: U256,
        options: SubmitOptions,
    ) -> PledgeResult<SubmissionReceipt> {
        let receipt = self
            .submitter()?
            .submit(
                &self.pool,
                DEPOSIT_LEND,
                &[Token::Uint(pool_id), Token::Uint(amount)],
                options,
            )
            .await?;
        info!(
            "Lend deposit confirmed, amount: {}, tx hash: {:?}",
            amount, receipt.tx_hash
        );
        Ok(receipt)
    }

    /// Current allowance from the signing account to the pool
    pub async fn allowance(&self) -> PledgeResult<U256> {
        let owner = self.submitter()?.sender();
        let tokens = self
            .query(
                self.token()?,
                ALLOWANCE,
                &[Token::Address(owner), Token::Address(self.pool.address())],
            )
            .await?;
        single_uint(ALLOWANCE, tokens)
    }

    /// Lend token balance of `account`
    pub async fn balance_of(&self, account: Address) -> PledgeResult<U256> {
        let tokens = self
            .query(self.token()?, BALANCE_OF, &[Token::Address(account)])
            .await?;
        single_uint(BALANCE_OF, tokens)
    }

    /// Approve when the allowance falls short, then deposit
    pub async fn lend(&self, pool_id: U256, amount: U256) -> PledgeResult<LendOutcome> {
        let balance = self.balance_of(self.submitter()?.sender()).await?;
        if balance < amount {
            warn!("Token balance {} is below the amount {}", balance, amount);
        }

        let current = self.allowance().await?;
        let approval = if current < amount {
            info!("Allowance {} below {}, approving", current, amount);
            Some(self.approve_token(amount).await?)
        } else {
            None
        };

        let deposit = self
            .deposit_lend(pool_id, amount, SubmitOptions::default())
            .await?;
        Ok(LendOutcome { approval, deposit })
    }

    /// Read-only call on either bound contract, from the signing account when there is one
    pub async fn query(
        &self,
        binding: &ContractBinding,
        function: &str,
        args: &[Token],
    ) -> PledgeResult<Vec<Token>> {
        query_contract(self.client.as_ref(), binding, function, args, self.caller()).await
    }
}

/// Deploy a PledgePool bound to `token`
pub async fn deploy_pool(
    submitter: &TransactionSubmitter,
    artifact: &ContractAbi,
    token: &str,
) -> PledgeResult<SubmissionReceipt> {
    let token = parse_checksum_address(token)?;
    submitter.deploy(artifact, &[Token::Address(token)]).await
}

fn single_uint(function: &str, tokens: Vec<Token>) -> PledgeResult<U256> {
    match tokens.as_slice() {
        [Token::Uint(value)] => Ok(*value),
        _ => Err(PledgeError::RemoteCall {
            function: function.to_string(),
            message: "expected a single uint256".to_string(),
        }),
    }
}
