//! Command-line client for confidential ERC20 wrappers.
//!
//! Lists token pairs, manages custom tokens, shows pending unwraps and
//! wraps ERC20 into its confidential token over a real RPC endpoint.
//!
//! Run with:
//!   cargo run --bin wrapper -- --config config.toml tokens

use std::path::PathBuf;
use std::sync::Arc;

use alloy::primitives::utils::{format_units, parse_units};
use alloy::primitives::Address;
use clap::{Parser, Subcommand};
use tracing::info;

use confidential_wrapper::adapters::ethereum::EthereumRpc;
use confidential_wrapper::adapters::graphql_indexer::GraphqlIndexer;
use confidential_wrapper::adapters::json_store::JsonFileStore;
use confidential_wrapper::adapters::local_wallet::LocalWallet;
use confidential_wrapper::adapters::offline_fhe::OfflineFheEngine;
use confidential_wrapper::config::{ClientConfig, ConfigError};
use confidential_wrapper::domain::token::TokenPair;
use confidential_wrapper::errors::OperationError;
use confidential_wrapper::events::EventBus;
use confidential_wrapper::orchestrator::wrap::{WrapOrchestrator, WrapOutcome};
use confidential_wrapper::orchestrator::OperationContext;
use confidential_wrapper::ports::contracts::ContractError;
use confidential_wrapper::ports::indexer::IndexerError;
use confidential_wrapper::ports::wallet::{WalletError, WalletPort};
use confidential_wrapper::reconciliation::UnwrapReconciler;
use confidential_wrapper::registry::{RegistryError, TokenPairRegistry};

#[derive(Parser)]
#[command(name = "wrapper", about = "Confidential ERC20 wrapper client")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "./config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List mainstream and custom tokens with their wrappers
    Tokens,

    /// Add a custom ERC20 token
    AddToken {
        #[arg(long)]
        address: String,
    },

    /// Remove a custom token
    RemoveToken {
        #[arg(long)]
        address: Address,
    },

    /// Show decryption readiness and the cached confidential balance
    Balance {
        /// ERC20 address of the token pair
        #[arg(long)]
        token: Address,
    },

    /// Show unfinalized unwrap requests for a token
    Pending {
        /// ERC20 address of the token pair
        #[arg(long)]
        token: Address,
        /// Account to inspect; defaults to the configured wallet
        #[arg(long)]
        account: Option<Address>,
    },

    /// Wrap ERC20 into its confidential token, creating the wrapper if needed
    Wrap {
        #[arg(long)]
        token: Address,
        /// Human-readable amount, e.g. "12.5"
        #[arg(long)]
        amount: String,
    },
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("contract error: {0}")]
    Contract(#[from] ContractError),

    #[error("wallet error: {0}")]
    Wallet(#[from] WalletError),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("indexer error: {0}")]
    Indexer(#[from] IndexerError),

    #[error("{0}")]
    Operation(#[from] OperationError),

    #[error("{0}")]
    Input(String),
}

struct Client {
    config: ClientConfig,
    ctx: OperationContext<EthereumRpc, OfflineFheEngine, LocalWallet>,
    registry: TokenPairRegistry<EthereumRpc, JsonFileStore>,
}

impl Client {
    fn connect(config: ClientConfig) -> Result<Self, CliError> {
        let private_key = config.wallet.as_ref().map(|w| w.private_key.as_str());
        let contracts = Arc::new(EthereumRpc::new(
            &config.network.rpc_url,
            private_key,
            config.network.factory_address,
        )?);
        let wallet = match private_key {
            Some(key) => LocalWallet::from_private_key(key)?,
            None => LocalWallet::disconnected(),
        };

        let ctx = OperationContext::new(
            Arc::clone(&contracts),
            Arc::new(OfflineFheEngine::new(config.network.chain_id)),
            Arc::new(wallet),
            EventBus::new(),
        );
        let registry = TokenPairRegistry::new(
            contracts,
            Arc::new(JsonFileStore::new(config.storage.path.clone())),
            config.tokens.mainstream.clone(),
        );

        Ok(Self {
            config,
            ctx,
            registry,
        })
    }

    async fn pair(&self, token: Address) -> Result<TokenPair, CliError> {
        self.registry.refresh(self.ctx.wallet.address()).await;
        self.registry
            .pair(token)
            .await
            .ok_or_else(|| CliError::Input(format!("{token} is not a listed token")))
    }
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt()
        .without_time()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = ClientConfig::load(&cli.config)?;
    let client = Client::connect(config)?;

    match cli.command {
        Commands::Tokens => tokens(&client).await,
        Commands::AddToken { address } => {
            let metadata = client.registry.add_custom_token(&address).await?;
            println!("Added {} ({})", metadata.name, metadata.symbol);
            Ok(())
        }
        Commands::RemoveToken { address } => {
            client.registry.remove_custom_token(address).await?;
            println!("Removed {address}");
            Ok(())
        }
        Commands::Balance { token } => balance(&client, token).await,
        Commands::Pending { token, account } => pending(&client, token, account).await,
        Commands::Wrap { token, amount } => wrap(&client, token, &amount).await,
    }
}

async fn tokens(client: &Client) -> Result<(), CliError> {
    let owner = client.ctx.wallet.address();
    let pairs = client.registry.refresh(owner).await;
    if pairs.is_empty() {
        println!("No tokens configured");
        return Ok(());
    }

    for pair in pairs {
        let kind = if pair.is_mainstream { "mainstream" } else { "custom" };
        let balance = format_units(pair.erc20_balance, pair.erc20_decimals)
            .unwrap_or_else(|_| pair.erc20_balance.to_string());
        let wrapper = pair
            .wrapped_address
            .map(|w| w.to_string())
            .unwrap_or_else(|| "not deployed".into());
        println!(
            "{:<8} {} [{kind}]\n         balance: {balance}\n         wrapper: {wrapper}",
            pair.erc20_symbol, pair.erc20_address
        );
    }
    Ok(())
}

async fn balance(client: &Client, token: Address) -> Result<(), CliError> {
    let pair = client.pair(token).await?;
    let Some(wrapper) = pair.wrapped_address else {
        println!("{} has no confidential wrapper yet", pair.erc20_symbol);
        return Ok(());
    };

    let requirements = client.ctx.balances.requirements();
    for requirement in &requirements.requirements {
        let mark = if requirement.is_met { "ok" } else { "missing" };
        println!("{:<18} {mark}", requirement.label);
    }

    client.ctx.balances.fetch_and_decrypt(wrapper).await;
    let state = client.ctx.balances.get_state(wrapper).await;
    match (state.authoritative_value(), state.error) {
        (Some(value), _) => println!("Confidential balance: {value}"),
        (None, Some(error)) => println!("Confidential balance: ***** ({error})"),
        (None, None) => println!("Confidential balance: *****"),
    }
    Ok(())
}

async fn pending(client: &Client, token: Address, account: Option<Address>) -> Result<(), CliError> {
    let account = account
        .or_else(|| client.ctx.wallet.address())
        .ok_or_else(|| CliError::Input("no wallet configured; pass --account".into()))?;
    let pair = client.pair(token).await?;
    let Some(wrapper) = pair.wrapped_address else {
        println!("{} has no confidential wrapper yet", pair.erc20_symbol);
        return Ok(());
    };

    let indexer = Arc::new(GraphqlIndexer::new(client.config.indexer.url.clone()));
    let reconciler = UnwrapReconciler::new(
        indexer,
        client.ctx.fhe.clone(),
        Arc::clone(&client.ctx.wallet),
    );
    let requests = reconciler.fetch(account, wrapper).await?;
    if requests.is_empty() {
        println!("No pending unwraps");
        return Ok(());
    }

    for view in reconciler.views(&requests).await {
        let amount = view
            .amount
            .map(|a| a.to_string())
            .unwrap_or_else(|| "encrypted".into());
        println!(
            "{}  block {}  amount {amount}  burnt {}",
            view.request.request_transaction_hash,
            view.request.request_block_number,
            view.request.burnt_amount
        );
    }
    Ok(())
}

async fn wrap(client: &Client, token: Address, amount: &str) -> Result<(), CliError> {
    let pair = client.pair(token).await?;
    let units = parse_units(amount, pair.erc20_decimals)
        .map_err(|e| CliError::Input(format!("invalid amount {amount:?}: {e}")))?
        .get_absolute();

    let orchestrator = WrapOrchestrator::new(client.ctx.clone());
    orchestrator.set_pair(pair).await;

    let mut outcome = orchestrator.start(units).await?;
    if let WrapOutcome::AwaitingWrapper { receipt, .. } = &outcome {
        info!(tx = %receipt.tx_hash, "wrapper created");
        let refreshed = client.pair(token).await?;
        outcome = match orchestrator.on_pair_updated(refreshed).await {
            Some(result) => result?,
            None => {
                return Err(CliError::Input(
                    "wrapper not visible yet, run wrap again shortly".into(),
                ))
            }
        };
    }

    match outcome {
        WrapOutcome::Wrapped {
            receipt,
            completed_steps,
            ..
        } => println!("Wrapped {amount} (tx {}), steps: {completed_steps:?}", receipt.tx_hash),
        WrapOutcome::AwaitingWrapper { .. } | WrapOutcome::Cancelled => {
            println!("Wrap did not complete")
        }
    }
    Ok(())
}
