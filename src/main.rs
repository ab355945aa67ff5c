//! PledgePool client - approve, lend and inspect PledgePool lending pools
//!
//! Talks to a deployed PledgePool contract through a JSON-RPC endpoint:
//! approves the lend token, deposits into a pool and reads pool info.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use ethers::types::U256;
use ethers::utils::parse_units;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

mod chain;
mod config;
mod contract;
mod error;
mod pool;
mod tx;

use chain::{ChainProvider, RpcClient};
use config::Settings;
use contract::{entries, format_token, ContractAbi, ContractBinding};
use error::PledgeError;
use pool::PledgePool;
use tx::{SubmitOptions, TransactionSubmitter};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (defaults to $PLEDGE_CONFIG or config/default.toml)
    #[arg(long = "config", short = 'c', global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the state of a pool
    PoolInfo {
        #[arg(long = "pool", short = 'p', default_value_t = 0)]
        pool_id: u64,
    },
    /// Approve the pool to spend the lend token
    Approve {
        /// Amount in whole tokens, e.g. 1000 or 0.5
        #[arg(long = "amount", short = 'a')]
        amount: String,

        #[arg(long = "decimals", default_value_t = 18)]
        decimals: u32,
    },
    /// Deposit into a pool as a lender
    DepositLend {
        #[arg(long = "pool", short = 'p', default_value_t = 0)]
        pool_id: u64,

        /// Amount in whole tokens
        #[arg(long = "amount", short = 'a')]
        amount: String,

        #[arg(long = "decimals", default_value_t = 18)]
        decimals: u32,

        /// Override the configured gas limit
        #[arg(long = "gas-limit")]
        gas_limit: Option<u64>,

        /// Also send this many wei (pools lending the native coin)
        #[arg(long = "value")]
        value: Option<String>,
    },
    /// Approve if the allowance is short, then deposit
    Lend {
        #[arg(long = "pool", short = 'p', default_value_t = 0)]
        pool_id: u64,

        #[arg(long = "amount", short = 'a')]
        amount: String,

        #[arg(long = "decimals", default_value_t = 18)]
        decimals: u32,
    },
    /// Deploy a PledgePool from the configured artifact
    Deploy {
        /// Lend token address passed to the constructor
        #[arg(long = "token", short = 't')]
        token: String,
    },
    /// Call a read-only function
    Call {
        #[arg(value_enum)]
        contract: ContractName,
        function: String,
        args: Vec<String>,
    },
    /// Send a state-changing function call
    Send {
        #[arg(value_enum)]
        contract: ContractName,
        function: String,
        args: Vec<String>,

        #[arg(long = "gas-limit")]
        gas_limit: Option<u64>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ContractName {
    Pool,
    Token,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    let cli = Cli::parse();

    // Load configuration
    let settings = match &cli.config {
        Some(path) => Settings::load_from(path)?,
        None => Settings::load()?,
    };
    info!(
        "Loaded configuration for {} (chain ID: {})",
        settings.network.name, settings.network.chain_id
    );

    let provider = ChainProvider::connect(settings.network.clone()).await?;
    let client: Arc<dyn RpcClient> = Arc::new(provider);

    // Reads work without a key
    let submitter = match settings.private_key() {
        Ok(key) => Some(TransactionSubmitter::new(
            client.clone(),
            &key,
            &settings.gas,
            settings.confirmation.clone(),
        )?),
        Err(e) => {
            warn!("{} - only read-only commands are available", e);
            None
        }
    };

    let result = match cli.command {
        Commands::Deploy { token } => deploy(&settings, submitter, &token).await,
        command => {
            let pool = PledgePool::from_settings(&settings, client, submitter)?;
            run(command, &pool).await
        }
    };

    if let Err(e) = &result {
        for hint in hints(e) {
            warn!("{}", hint);
        }
    }
    result
}

/// Deploy a new pool from the configured artifact
async fn deploy(
    settings: &Settings,
    submitter: Option<TransactionSubmitter>,
    token: &str,
) -> Result<()> {
    let submitter = submitter.context("Deploying requires a signing key")?;
    let artifact = ContractAbi::load(&settings.contracts.pool.abi_path, entries::PLEDGE_POOL)?;
    let receipt = pool::deploy_pool(&submitter, &artifact, token).await?;
    println!("PledgePool deployed: {}", receipt);
    Ok(())
}

/// Run a command against a configured pool
async fn run(command: Commands, pool: &PledgePool) -> Result<()> {
    match command {
        Commands::PoolInfo { pool_id } => {
            let info = pool.get_pool_info(U256::from(pool_id)).await?;
            print!("{}", info);
        }
        Commands::Approve { amount, decimals } => {
            let amount = parse_amount(&amount, decimals)?;
            let receipt = pool.approve_token(amount).await?;
            println!("Approved {}: {}", amount, receipt);
        }
        Commands::DepositLend {
            pool_id,
            amount,
            decimals,
            gas_limit,
            value,
        } => {
            let amount = parse_amount(&amount, decimals)?;
            let value = value
                .map(|v| U256::from_dec_str(&v).context("--value must be an integer wei amount"))
                .transpose()?;
            let options = SubmitOptions {
                gas_limit: gas_limit.map(U256::from),
                value,
            };
            let receipt = pool
                .deposit_lend(U256::from(pool_id), amount, options)
                .await?;
            println!("Deposited {} into pool {}: {}", amount, pool_id, receipt);
        }
        Commands::Lend {
            pool_id,
            amount,
            decimals,
        } => {
            let amount = parse_amount(&amount, decimals)?;
            let outcome = pool.lend(U256::from(pool_id), amount).await?;
            if let Some(approval) = outcome.approval {
                println!("Approved {}: {}", amount, approval);
            }
            println!("Deposited {} into pool {}: {}", amount, pool_id, outcome.deposit);
        }
        Commands::Call {
            contract,
            function,
            args,
        } => {
            let binding = select(pool, contract)?;
            let entry = binding.abi().entry(&function, args.len())?;
            let tokens = entry.tokenize(&args)?;
            let outputs = pool.query(binding, &function, &tokens).await?;
            for (name, token) in entry.output_names().iter().zip(&outputs) {
                println!("{}: {}", name, format_token(token));
            }
        }
        Commands::Send {
            contract,
            function,
            args,
            gas_limit,
        } => {
            let binding = select(pool, contract)?;
            let tokens = binding.abi().entry(&function, args.len())?.tokenize(&args)?;
            let options = SubmitOptions {
                gas_limit: gas_limit.map(U256::from),
                value: None,
            };
            let receipt = pool
                .submitter()?
                .submit(binding, &function, &tokens, options)
                .await?;
            println!("{}: {}", function, receipt);
        }
        Commands::Deploy { .. } => {
            anyhow::bail!("deploy creates a new pool and does not run against a configured one")
        }
    }

    Ok(())
}

/// What the caller can do about a failed operation
fn hints(err: &anyhow::Error) -> Vec<String> {
    let mut hints = Vec::new();
    if let Some(err) = err.downcast_ref::<PledgeError>() {
        if let Some(tx_hash) = err.tx_hash() {
            hints.push(format!(
                "Transaction {:?} was broadcast; check it before resubmitting",
                tx_hash
            ));
        }
        if err.is_retryable() {
            hints.push("The operation may be retried".to_string());
        }
    }
    hints
}

fn select(pool: &PledgePool, contract: ContractName) -> Result<&ContractBinding> {
    Ok(match contract {
        ContractName::Pool => pool.pool(),
        ContractName::Token => pool.token()?,
    })
}

/// Convert a decimal token amount into base units
fn parse_amount(amount: &str, decimals: u32) -> Result<U256> {
    let units = parse_units(amount, decimals)
        .with_context(|| format!("Invalid amount {} with {} decimals", amount, decimals))?;
    Ok(units.into())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,pledge_client=debug,hyper=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("1", 18).unwrap(), U256::exp10(18));
        assert_eq!(
            parse_amount("1000", 18).unwrap(),
            U256::from(1000u64) * U256::exp10(18)
        );
        assert_eq!(parse_amount("0.5", 6).unwrap(), U256::from(500_000u64));
        assert_eq!(parse_amount("0", 18).unwrap(), U256::zero());
        assert!(parse_amount("abc", 18).is_err());
    }

    #[test]
    fn test_hints_after_broadcast() {
        use crate::error::RejectReason;
        use ethers::types::H256;

        let timed_out = anyhow::Error::from(PledgeError::TransactionRejected {
            reason: RejectReason::Timeout { waited_secs: 120 },
            tx_hash: Some(H256::repeat_byte(0xab)),
        });
        let advice = hints(&timed_out);
        assert_eq!(advice.len(), 1);
        assert!(advice[0].contains("check it before resubmitting"));

        let unreachable = anyhow::Error::from(PledgeError::Connection {
            chain_id: 11155111,
            message: "connection refused".to_string(),
        });
        assert_eq!(hints(&unreachable), vec!["The operation may be retried"]);

        let other = anyhow::anyhow!("Deploying requires a signing key");
        assert!(hints(&other).is_empty());
    }

    #[test]
    fn test_parse_deploy_command() {
        let cli = Cli::try_parse_from([
            "pledge-client",
            "deploy",
            "--token",
            "0x5FbDB2315678afecb367f032d93F642f64180aa3",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::Deploy { .. }));
    }

    #[test]
    fn test_parse_lend_command() {
        let cli = Cli::try_parse_from([
            "pledge-client",
            "--config",
            "config/sepolia.toml",
            "lend",
            "--pool",
            "2",
            "--amount",
            "1.5",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("config/sepolia.toml")));
        assert!(matches!(
            cli.command,
            Commands::Lend { pool_id: 2, ref amount, decimals: 18 } if amount == "1.5"
        ));
    }
}
