// src/main.rs
//! Provider simulator.
//! Injects the provider into a simulated page backed by the loopback relay and
//! runs a scripted dApp session against it.
use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use injected_provider::bridge::mock::{spawn_delivery, EngineState, LoopbackRelay};
use injected_provider::discovery::{AnnounceDetail, DiscoveryBus, GlobalWalletSlot, InjectedWallet};
use injected_provider::monitor::notice::LogNoticeSurface;
use injected_provider::provider::{listener, EventKind, JsonRpcRequest};
use injected_provider::{inject, HostEnvironment, ProviderConfig, RequestArguments};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "provider-sim")]
#[command(about = "Injected wallet provider simulator")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Args {
    /// TOML configuration file; environment overrides apply when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scripted dApp session against the loopback relay
    Session(SessionArgs),
    /// Print the EIP-6963 announcement this configuration produces
    Announce,
    /// Print the effective configuration
    Config,
}

#[derive(ClapArgs)]
struct SessionArgs {
    /// Page origin the provider is injected into
    #[arg(long, default_value = "https://dapp.example")]
    origin: String,
    /// Start with the wallet already unlocked
    #[arg(long)]
    unlocked: bool,
    /// The user closes the unlock surface instead of unlocking
    #[arg(long)]
    cancel_unlock: bool,
    /// Name of a wallet already occupying the page's global slot
    #[arg(long)]
    existing_wallet: Option<String>,
    /// Relay response latency in milliseconds
    #[arg(long, default_value = "0")]
    latency_ms: u64,
}

impl Default for SessionArgs {
    fn default() -> Self {
        Self {
            origin: "https://dapp.example".to_string(),
            unlocked: false,
            cancel_unlock: false,
            existing_wallet: None,
            latency_ms: 0,
        }
    }
}

struct PrintingBus;

impl DiscoveryBus for PrintingBus {
    fn dispatch_announce(&self, detail: Arc<AnnounceDetail>) {
        println!("announce: {}", json!(detail.info));
    }
}

struct ForeignWallet(String);

impl InjectedWallet for ForeignWallet {
    fn wallet_name(&self) -> &str {
        &self.0
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging()?;

    let config = load_config(args.config.as_deref())?;

    match args.command.unwrap_or(Commands::Session(SessionArgs::default())) {
        Commands::Session(session) => run_session(config, session).await,
        Commands::Announce => {
            let info = injected_provider::discovery::ProviderAnnouncement::new(&config.identity);
            println!("{}", serde_json::to_string_pretty(&info)?);
            Ok(())
        }
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn init_logging() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn load_config(path: Option<&std::path::Path>) -> Result<ProviderConfig> {
    let config = match path {
        Some(path) => {
            let content =
                std::fs::read_to_string(path).with_context(|| format!("reading config {}", path.display()))?;
            ProviderConfig::from_toml_str(&content)?
        }
        None => ProviderConfig::from_env()?,
    };
    Ok(config)
}

async fn run_session(config: ProviderConfig, args: SessionArgs) -> Result<()> {
    let engine = EngineState {
        unlocked: args.unlocked,
        unlock_after_polls: if args.cancel_unlock { None } else { Some(2) },
        close_after_polls: if args.cancel_unlock { Some(2) } else { None },
        latency: Duration::from_millis(args.latency_ms),
        ..EngineState::default()
    };
    let (relay, inbox) = LoopbackRelay::new(args.origin.clone(), engine);
    let relay = Arc::new(relay);

    let slot = match args.existing_wallet {
        Some(name) => GlobalWalletSlot::with_existing(Arc::new(ForeignWallet(name))),
        None => GlobalWalletSlot::new(),
    };
    let env = HostEnvironment::new(
        Some(args.origin.clone()),
        relay.clone(),
        Arc::new(PrintingBus),
        Arc::new(LogNoticeSurface),
        Arc::new(slot),
    );

    let injection = Arc::new(inject(&env, &config)?.context("provider was already injected")?);
    info!(registration = ?injection.registration, providers = ?env.wallet_slot.provider_names(), "page ready");

    let page = Arc::clone(&injection);
    let delivery = spawn_delivery(inbox, move |event| page.handle_message(&event));
    let monitor = injection.start_monitor();

    let provider = Arc::clone(&injection.provider);
    for kind in EventKind::ALL {
        provider.on(
            kind,
            listener(move |event| {
                println!("event {}: {}", kind, event.payload());
                Ok(())
            }),
        );
    }

    provider.sync_state().await?;
    step(&provider, "eth_chainId", json!([])).await;
    step(&provider, "eth_requestAccounts", json!([])).await;
    step(&provider, "wallet_switchEthereumChain", json!([{ "chainId": "0x89" }])).await;
    step(&provider, "wallet_switchEthereumChain", json!([{ "chainId": "0x2105" }])).await;
    step(&provider, "personal_sign", json!(["0x68656c6c6f", provider.selected_address()])).await;

    let legacy = provider.send(JsonRpcRequest::new(42, "eth_blockNumber", json!([]))).await;
    println!("send -> {}", serde_json::to_string(&legacy)?);

    relay.lock_wallet();
    relay.switch_chain("0x1");
    relay.unlock_wallet();
    tokio::time::sleep(Duration::from_millis(50)).await;

    injection.handle_request_provider();
    println!(
        "state: connected={} chainId={} networkVersion={} selectedAddress={}",
        provider.is_connected(),
        provider.chain_id(),
        provider.network_version(),
        provider.selected_address().unwrap_or_default()
    );

    monitor.abort();
    delivery.abort();
    Ok(())
}

async fn step(provider: &injected_provider::PageProvider, method: &str, params: Value) {
    match provider.request(RequestArguments::new(method, params)).await {
        Ok(result) => println!("{method} -> {result}"),
        Err(err) => println!("{method} !! {}", json!(err)),
    }
}
