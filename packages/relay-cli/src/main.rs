use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use relay_core::{
    chain_adapter::{ChainClients, RegistryClient},
    config::ChainConfig,
    signer::TxSigner,
    Config, Message, MessageStatus, RelayEngine,
};
use std::future::Future;
use std::path::PathBuf;
use tabled::{settings::Style, Table, Tabled};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Bidirectional message relayer between two EVM chains", long_about = None)]
struct Cli {
    /// Log filter used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay loop until SIGINT or SIGTERM
    Start {
        /// Config file (TOML or JSON); environment variables when omitted
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
    /// Load and validate the configuration
    ValidateConfig {
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
    /// List registry messages in a given status
    Messages {
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
        #[arg(long, value_enum)]
        chain: ChainSide,
        #[arg(long, default_value = "pending")]
        status: MessageStatus,
    },
    /// Print the relayer's signing address on each chain
    Addresses {
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum ChainSide {
    A,
    B,
}

#[derive(Tabled)]
struct MessageRow {
    #[tabled(rename = "Message ID")]
    message_id: String,
    #[tabled(rename = "Route")]
    route: String,
    #[tabled(rename = "From")]
    from: String,
    #[tabled(rename = "To")]
    to: String,
    #[tabled(rename = "Asset")]
    asset: String,
    #[tabled(rename = "Amount")]
    amount: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Timestamp")]
    timestamp: u64,
}

impl From<&Message> for MessageRow {
    fn from(message: &Message) -> Self {
        Self {
            message_id: message.message_id.to_string(),
            route: format!("{} -> {}", message.source_chain_id, message.destination_chain_id),
            from: message.from_identity.to_string(),
            to: message.to_identity.to_string(),
            asset: message.asset.clone(),
            amount: message.amount.to_string(),
            status: message.status.to_string(),
            timestamp: message.timestamp,
        }
    }
}

fn load_config(path: Option<PathBuf>) -> Result<Config> {
    match path {
        Some(path) => {
            info!("Loading config file {:?}", path);
            Config::load(&path).with_context(|| format!("Invalid config file {:?}", path))
        }
        None => {
            info!("Loading config from environment");
            Config::from_env().context("Invalid environment configuration")
        }
    }
}

fn describe_chain(chain: &ChainConfig) -> String {
    let chain_id = chain
        .chain_id
        .map_or_else(|| "discovered".to_string(), |id| id.to_string());
    format!(
        "chain {} (id {}): rpc={}, registry={}, adapter={}, gas_limit={}",
        chain.name, chain_id, chain.rpc_url, chain.registry_address, chain.bridge_adapter_address, chain.gas_limit
    )
}

#[cfg(unix)]
async fn shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        received = tokio::signal::ctrl_c() => received?,
        _ = terminate.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

async fn run_start(config: Option<PathBuf>) -> Result<()> {
    let config = load_config(config)?;
    let engine = RelayEngine::from_config(&config).await?;
    for direction in engine.directions() {
        info!("Relaying {}", direction.label());
    }
    engine.start().await?;
    stop_on_signal(&engine, shutdown_signal()).await
}

/// Shuts the engine down once `signal` resolves. A signal listener that
/// failed still stops the engine but surfaces as an error exit.
async fn stop_on_signal<F>(engine: &RelayEngine, signal: F) -> Result<()>
where
    F: Future<Output = std::io::Result<()>>,
{
    let received = signal.await;
    match &received {
        Ok(()) => info!("Shutdown signal received, finishing current cycle"),
        Err(e) => error!("Failed to listen for shutdown signals, stopping: {}", e),
    }
    engine.shutdown().await;
    received.context("Failed to install shutdown signal handlers")
}

async fn run_messages(config: Option<PathBuf>, chain: ChainSide, status: MessageStatus) -> Result<()> {
    let config = load_config(config)?;
    let chain_config = match chain {
        ChainSide::A => &config.chain_a,
        ChainSide::B => &config.chain_b,
    };
    let clients = ChainClients::connect(chain_config).await?;

    let ids = clients.registry.list_by_status(status).await?;
    let mut rows = Vec::with_capacity(ids.len());
    for message_id in ids {
        match clients.registry.fetch(message_id).await {
            Ok(message) => rows.push(MessageRow::from(&message)),
            Err(e) => warn!("Failed to fetch {}: {}", message_id, e),
        }
    }

    println!(
        "{} message(s) in status {} on chain {} ({})",
        rows.len(),
        status,
        clients.name,
        clients.endpoint.chain_id()
    );
    if !rows.is_empty() {
        println!("{}", Table::new(rows).with(Style::rounded()));
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)))
        .init();

    match cli.command {
        Commands::Start { config } => run_start(config).await,
        Commands::ValidateConfig { config } => {
            let config = load_config(config)?;
            println!("Configuration is valid");
            println!("- {}", describe_chain(&config.chain_a));
            println!("- {}", describe_chain(&config.chain_b));
            println!(
                "- relayer: poll_interval={}s, max_retries={}, retry_delay={}s, concurrent_directions={}, event_wakeup={}",
                config.relayer.poll_interval,
                config.relayer.max_retries,
                config.relayer.retry_delay,
                config.relayer.concurrent_directions,
                config.relayer.event_wakeup
            );
            match &config.relayer.ledger_path {
                Some(path) => println!("- dedup ledger: {}", path.display()),
                None => println!("- dedup ledger: in memory"),
            }
            Ok(())
        }
        Commands::Messages { config, chain, status } => run_messages(config, chain, status).await,
        Commands::Addresses { config } => {
            let config = load_config(config)?;
            for chain in [&config.chain_a, &config.chain_b] {
                let signer = TxSigner::from_hex(chain.signing_key.expose())?;
                println!("chain {}: {}", chain.name, signer.address());
            }
            Ok(())
        }
    }
}
