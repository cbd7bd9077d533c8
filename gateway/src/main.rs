//! # HELIO Custody Gateway
//!
//! Entry point for the `helio-gateway` binary. Parses CLI arguments,
//! initializes logging and metrics, starts the balance-observer loop, and
//! serves the intent HTTP API.
//!
//! The binary supports four subcommands:
//!
//! - `run`      — start the custody service
//! - `init`     — initialize the data directory and generate a mnemonic
//! - `snapshot` — dump the ledger as JSON lines
//! - `version`  — print build version information

mod adapters;
mod api;
mod cli;
mod logging;
mod metrics;

use anyhow::{Context, Result};
use clap::Parser;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;

use helio_engine::config::{QUOTE_REQUEST_TIMEOUT, RPC_REQUEST_TIMEOUT};
use helio_engine::ledger::store::LedgerStore;
use helio_engine::notify::{NotificationDispatcher, NotificationSink};
use helio_engine::observer::{BalanceObserver, BalanceSource, ObserverConfig};
use helio_engine::seed::MasterSeed;
use helio_engine::wallet::WalletDeriver;

use adapters::{ConsoleSink, HttpQuoteSource, SolanaRpc, TelegramSink};
use cli::{Commands, HelioCli};
use logging::LogFormat;
use metrics::GatewayMetrics;

/// Filename of the mnemonic inside the data directory.
const SEED_PHRASE_FILE: &str = "seed.phrase";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = HelioCli::parse();

    match cli.command {
        Commands::Run(args) => run_service(args).await,
        Commands::Init(args) => init_service(args),
        Commands::Snapshot(args) => snapshot_ledger(args),
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Starts the full custody service: observer loop, intent API, and metrics
/// endpoint.
async fn run_service(args: cli::RunArgs) -> Result<()> {
    logging::init_logging(
        "helio_gateway=info,helio_engine=info,tower_http=info",
        LogFormat::from_str_lossy(&args.log_format),
    );

    tracing::info!(
        api_port = args.api_port,
        metrics_port = args.metrics_port,
        poll_interval_secs = args.poll_interval_secs,
        data_dir = %args.data_dir.display(),
        "starting helio-gateway"
    );

    // --- Master seed (fatal if invalid) ---
    let phrase = match args.mnemonic {
        Some(phrase) => phrase,
        None => {
            let path = args.data_dir.join(SEED_PHRASE_FILE);
            std::fs::read_to_string(&path).with_context(|| {
                format!(
                    "no mnemonic provided and {} is unreadable — run `helio-gateway init` first",
                    path.display()
                )
            })?
        }
    };
    let seed = Arc::new(
        MasterSeed::from_phrase(&phrase)
            .context("master mnemonic failed validation — refusing to start")?,
    );

    // --- Persistent storage ---
    let db_path = args.data_dir.join("db");
    std::fs::create_dir_all(&db_path)
        .with_context(|| format!("failed to create database directory: {}", db_path.display()))?;
    let store = Arc::new(
        LedgerStore::open(&db_path)
            .with_context(|| format!("failed to open ledger store at {}", db_path.display()))?,
    );
    tracing::info!(path = %db_path.display(), wallets = store.wallet_count(), "ledger store opened");

    // --- External adapters ---
    let chain: Arc<dyn BalanceSource> = Arc::new(
        SolanaRpc::new(&args.rpc_url, RPC_REQUEST_TIMEOUT)
            .context("failed to build chain RPC client")?,
    );
    let quotes = Arc::new(
        HttpQuoteSource::new(&args.quote_url, QUOTE_REQUEST_TIMEOUT)
            .context("failed to build quote client")?,
    );
    let sink: Arc<dyn NotificationSink> = match (&args.telegram_bot_token, args.admin_chat_id) {
        (Some(token), Some(admin_chat_id)) => {
            tracing::info!(admin_chat_id, "telegram notification sink configured");
            Arc::new(
                TelegramSink::new(token, admin_chat_id, QUOTE_REQUEST_TIMEOUT)
                    .context("failed to build telegram sink")?,
            )
        }
        (Some(_), None) => {
            anyhow::bail!("--telegram-bot-token requires --admin-chat-id");
        }
        _ => {
            tracing::warn!("no telegram credentials — notifications go to the log");
            Arc::new(ConsoleSink)
        }
    };

    // --- Engine assembly ---
    let deriver = WalletDeriver::new(Arc::clone(&seed), Arc::clone(&store));
    let dispatcher = Arc::new(NotificationDispatcher::new(Arc::clone(&store), sink));
    let observer = Arc::new(BalanceObserver::new(
        Arc::clone(&store),
        chain,
        Arc::clone(&dispatcher),
        ObserverConfig {
            poll_interval: std::time::Duration::from_secs(args.poll_interval_secs),
            request_timeout: RPC_REQUEST_TIMEOUT,
        },
    ));

    // --- Metrics ---
    let gateway_metrics = Arc::new(GatewayMetrics::new());
    gateway_metrics.wallets_total.set(store.wallet_count() as i64);

    // --- Shutdown plumbing ---
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // --- Observer loop ---
    // Drives the engine's scan on the configured cadence and folds each
    // report into the metrics. The first sweep runs immediately; persisted
    // baselines make it a no-op for unchanged wallets.
    let scan_loop = tokio::spawn({
        let observer = Arc::clone(&observer);
        let store = Arc::clone(&store);
        let gateway_metrics = Arc::clone(&gateway_metrics);
        let mut shutdown = shutdown_rx.clone();
        let poll_interval = std::time::Duration::from_secs(args.poll_interval_secs);
        async move {
            let mut interval = tokio::time::interval(poll_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let report = observer.scan_cycle(&shutdown).await;
                        gateway_metrics.record_scan(&report);
                        gateway_metrics.wallets_total.set(store.wallet_count() as i64);
                        if report.cancelled {
                            break;
                        }
                    }
                    res = shutdown.changed() => {
                        if res.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::info!("observer loop stopped");
        }
    });

    // --- Application state ---
    let app_state = api::AppState {
        version: env!("CARGO_PKG_VERSION").to_string(),
        store: Arc::clone(&store),
        deriver,
        dispatcher,
        quotes,
        metrics: Arc::clone(&gateway_metrics),
        started_at: chrono::Utc::now(),
    };

    // --- API server ---
    let api_router = api::create_router(app_state);
    let api_addr = format!("0.0.0.0:{}", args.api_port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind API listener on {}", api_addr))?;
    tracing::info!("intent API listening on {}", api_addr);

    // --- Metrics server ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&gateway_metrics));
    let metrics_addr = format!("0.0.0.0:{}", args.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", metrics_addr))?;
    tracing::info!("metrics listening on {}", metrics_addr);

    // --- Serve ---
    tokio::select! {
        res = axum::serve(api_listener, api_router) => {
            if let Err(e) = res {
                tracing::error!("API server error: {}", e);
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!("metrics server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received");
        }
    }

    // Let the scan finish its current wallet, then stop.
    let _ = shutdown_tx.send(true);
    if tokio::time::timeout(std::time::Duration::from_secs(15), scan_loop)
        .await
        .is_err()
    {
        tracing::warn!("observer loop did not stop in time, aborting");
    }
    store.flush().context("final ledger flush failed")?;

    tracing::info!("helio-gateway stopped");
    Ok(())
}

/// Initializes the data directory and generates a fresh master mnemonic.
fn init_service(args: cli::InitArgs) -> Result<()> {
    logging::init_logging("helio_gateway=info", LogFormat::Pretty);

    let data_dir = &args.data_dir;
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;

    let phrase_path = data_dir.join(SEED_PHRASE_FILE);
    if phrase_path.exists() {
        anyhow::bail!(
            "{} already exists — refusing to overwrite an existing master seed",
            phrase_path.display()
        );
    }

    let mnemonic =
        bip39::Mnemonic::generate(12).context("failed to generate mnemonic")?;
    std::fs::write(&phrase_path, format!("{mnemonic}\n"))
        .with_context(|| format!("failed to write {}", phrase_path.display()))?;

    // Restrict permissions on Unix — this file is every wallet's key.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&phrase_path, std::fs::Permissions::from_mode(0o600))?;
    }

    tracing::info!(path = %phrase_path.display(), "master mnemonic generated");

    println!("Data directory initialized.");
    println!("  Data directory : {}", data_dir.display());
    println!("  Seed phrase    : {}", phrase_path.display());
    println!();
    println!("Back up the seed phrase file offline. Every custodial wallet");
    println!("this service ever derives is regenerable from it — and only it.");

    Ok(())
}

/// Dumps every ledger entry (joined with its wallet record) as one JSON
/// object per line on stdout.
fn snapshot_ledger(args: cli::SnapshotArgs) -> Result<()> {
    let db_path = args.data_dir.join("db");
    let store = LedgerStore::open(&db_path)
        .with_context(|| format!("failed to open ledger store at {}", db_path.display()))?;

    let wallets: HashMap<_, _> = store
        .wallets()
        .context("failed to read wallet records")?
        .into_iter()
        .map(|w| (w.user_id, w))
        .collect();

    for entry in store.entries().context("failed to read ledger entries")? {
        let wallet = wallets.get(&entry.user_id);
        let line = serde_json::json!({
            "user_id": entry.user_id,
            "address": wallet.map(|w| w.address.to_string()),
            "derivation_index": wallet.map(|w| w.derivation_index),
            "cumulative_deposits": entry.cumulative_deposits,
            "last_observed_balance": entry.last_observed_balance,
            "wallet_notified": entry.wallet_notified,
            "created_at": entry.created_at,
        });
        println!("{line}");
    }

    Ok(())
}

/// Prints version information to stdout.
fn print_version() {
    println!("helio-gateway {}", env!("CARGO_PKG_VERSION"));
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
