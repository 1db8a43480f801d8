//! lumen-node — the Lumen wallet-connect service binary.
//!
//! Startup sequence:
//!   1. Load (or generate) the service identity key
//!   2. Open the state database and apply layout migrations
//!   3. Create the configured wallet backend
//!   4. Dial the relay and run the subscription loop
//!   5. On disconnect: reconnect with capped backoff; on signal: drain and exit

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{info, warn};

use lumen_core::model::{AppPermission, BudgetRenewal};
use lumen_core::Pubkey;
use lumen_crypto::ServiceKeys;
use lumen_relay::{RelayClient, WsRelay};
use lumen_service::{subscription, EventLogger, Service, SubscriptionOptions};
use lumen_store::Store;
use lumen_wallet::{create_backend, WalletBackend as _, WalletConfig};

#[derive(Parser, Debug)]
#[command(
    name = "lumen-node",
    version,
    about = "Lumen — a relay-to-Lightning wallet-connect service"
)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the service.
    Run(RunArgs),
    /// Generate and print a fresh service identity keypair.
    Keygen,
    /// Register a client app and print its pairing URI.
    Connect(ConnectArgs),
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Directory for the persistent state database and identity key.
    #[arg(long, default_value = "~/.lumen/data")]
    data_dir: PathBuf,

    /// Relay websocket URL.
    #[arg(long, default_value = "wss://relay.damus.io")]
    relay: String,

    /// Path to the wallet backend config JSON.
    #[arg(long)]
    wallet_config: PathBuf,

    /// Maximum number of concurrently processed events.
    #[arg(long, default_value_t = lumen_core::constants::DEFAULT_HANDLER_CONCURRENCY)]
    concurrency: usize,
}

#[derive(Parser, Debug)]
struct ConnectArgs {
    /// Directory for the persistent state database and identity key.
    #[arg(long, default_value = "~/.lumen/data")]
    data_dir: PathBuf,

    /// Relay websocket URL embedded in the pairing URI.
    #[arg(long, default_value = "wss://relay.damus.io")]
    relay: String,

    /// Display name for the app.
    #[arg(long)]
    name: String,

    /// Existing client pubkey (hex). A fresh keypair is generated if omitted.
    #[arg(long)]
    pubkey: Option<String>,

    /// Granted methods (comma-separated).
    #[arg(long, value_delimiter = ',', default_value = "pay_invoice,get_balance,get_info")]
    methods: Vec<String>,

    /// Budget cap in satoshis for payment methods. 0 means unlimited.
    #[arg(long, default_value_t = 0)]
    budget: u64,

    /// Budget renewal cadence: never, daily, weekly, monthly, yearly.
    #[arg(long, default_value = "never")]
    renewal: String,

    /// Permission expiry as a unix timestamp. 0 means never.
    #[arg(long, default_value_t = 0)]
    expires_at: i64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,lumen=debug".parse().unwrap()),
        )
        .init();

    match Args::parse().command {
        Command::Run(args) => run(args).await,
        Command::Keygen => keygen(),
        Command::Connect(args) => connect(args),
    }
}

async fn run(args: RunArgs) -> anyhow::Result<()> {
    info!("Lumen service starting");

    let data_dir = expand_tilde(&args.data_dir);
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("creating data dir {}", data_dir.display()))?;

    // ── Identity ──────────────────────────────────────────────────────────────
    let keys = load_or_generate_keys(&data_dir.join("identity.key"))?;
    info!(pubkey = %keys.pubkey(), "service identity");

    // ── State database ────────────────────────────────────────────────────────
    let store = Arc::new(Store::open(data_dir.join("db")).context("opening state database")?);

    // ── Wallet backend ────────────────────────────────────────────────────────
    let wallet_config: WalletConfig = serde_json::from_str(
        &std::fs::read_to_string(&args.wallet_config)
            .with_context(|| format!("reading {}", args.wallet_config.display()))?,
    )
    .context("parsing wallet config")?;
    let wallet = create_backend(&wallet_config).context("creating wallet backend")?;

    let logger = EventLogger::spawn();
    let options = SubscriptionOptions {
        concurrency: args.concurrency,
    };

    // ── Shutdown signal ───────────────────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    // ── Subscribe-process-reconnect loop ─────────────────────────────────────
    let mut backoff = Duration::from_secs(1);
    while !*shutdown_rx.borrow() {
        match WsRelay::connect(&args.relay).await {
            Ok((socket, handle)) => {
                info!(relay = %args.relay, "relay connected");
                tokio::spawn(socket.run());
                backoff = Duration::from_secs(1);

                let relay: Arc<dyn RelayClient> = Arc::new(handle);
                let service = Service::new(
                    keys.clone(),
                    Arc::clone(&store),
                    wallet.clone(),
                    relay,
                    logger.clone(),
                );
                match subscription::run(service, options.clone(), shutdown_rx.clone()).await {
                    Ok(()) => break,
                    Err(e) => warn!(error = %e, "subscription ended, reconnecting"),
                }
            }
            Err(e) => warn!(relay = %args.relay, error = %e, "relay dial failed"),
        }

        let mut shutdown = shutdown_rx.clone();
        tokio::select! {
            _ = tokio::time::sleep(backoff) => {}
            _ = shutdown.changed() => {}
        }
        backoff = (backoff * 2).min(Duration::from_secs(60));
    }

    // ── Teardown, reverse acquisition order ───────────────────────────────────
    wallet.shutdown().await;
    store.flush().context("flushing state database")?;
    info!("shutdown complete");
    Ok(())
}

fn keygen() -> anyhow::Result<()> {
    let keys = ServiceKeys::generate();
    println!("secret: {}", keys.secret_hex());
    println!("pubkey: {}", keys.pubkey());
    Ok(())
}

fn connect(args: ConnectArgs) -> anyhow::Result<()> {
    let data_dir = expand_tilde(&args.data_dir);
    let keys = load_or_generate_keys(&data_dir.join("identity.key"))?;
    let store = Store::open(data_dir.join("db")).context("opening state database")?;

    // Either register a key the client already holds, or mint one for it.
    let (client_pubkey, client_secret) = match &args.pubkey {
        Some(hex) => (
            Pubkey::from_hex(hex).map_err(|e| anyhow::anyhow!("invalid pubkey: {e}"))?,
            None,
        ),
        None => {
            let client = ServiceKeys::generate();
            (client.pubkey(), Some(client.secret_hex()))
        }
    };

    let renewal: BudgetRenewal = args
        .renewal
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid renewal: {e}"))?;

    let app = store
        .create_app(&client_pubkey, &args.name, Utc::now().timestamp())
        .map_err(|e| anyhow::anyhow!("registering app: {e}"))?;
    for method in &args.methods {
        let method: lumen_core::payload::Method = method
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid method: {e}"))?;
        store
            .put_permission(&AppPermission {
                app_id: app.id,
                request_method: method.as_str().to_string(),
                max_amount: args.budget,
                budget_renewal: renewal,
                expires_at: (args.expires_at != 0).then_some(args.expires_at),
            })
            .map_err(|e| anyhow::anyhow!("storing permission: {e}"))?;
    }
    store.flush().context("flushing state database")?;

    println!("app registered: id={} pubkey={}", app.id, app.nostr_pubkey);
    match client_secret {
        Some(secret) => println!(
            "pairing URI: nostr+walletconnect://{}?relay={}&secret={}",
            keys.pubkey(),
            args.relay,
            secret
        ),
        None => println!(
            "pairing URI: nostr+walletconnect://{}?relay={}",
            keys.pubkey(),
            args.relay
        ),
    }
    Ok(())
}

/// Restore the identity from the key file, or generate and persist one.
fn load_or_generate_keys(path: &Path) -> anyhow::Result<ServiceKeys> {
    if path.exists() {
        let hex = std::fs::read_to_string(path)
            .with_context(|| format!("reading key file {}", path.display()))?;
        return ServiceKeys::from_secret_hex(&hex)
            .map_err(|e| anyhow::anyhow!("parsing key file {}: {e}", path.display()));
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let keys = ServiceKeys::generate();
    std::fs::write(path, keys.secret_hex())
        .with_context(|| format!("writing key file {}", path.display()))?;
    warn!(path = %path.display(), "generated new service identity");
    Ok(keys)
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut terminate =
            signal(SignalKind::terminate()).expect("installing SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// Expand a leading `~` to the user's home directory (`HOME` or `USERPROFILE`).
fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Ok(home) = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE")) {
            return PathBuf::from(home).join(stripped);
        }
    }
    path.to_path_buf()
}
