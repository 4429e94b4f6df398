//! Leasehold API Server
//!
//! Serves the rental-contract and escrow API and runs the background
//! workers the engines rely on.
//!
//! # Workers
//!
//! - Notification dispatch: drains the notifier queue
//! - Seal worker: renders and stores documents after activation
//! - Notice sweep: terminates contracts whose notice period has elapsed
//!
//! # Usage
//!
//! ```bash
//! # Start with development defaults
//! leasehold-server --dev-mode
//!
//! # Start with custom config
//! leasehold-server --config /path/to/config.toml
//!
//! # Start with environment overrides
//! LEASEHOLD__SERVER__PORT=8080 leasehold-server
//! ```

mod config;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::signal;
use tokio::task::JoinHandle;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use leasehold_api::{create_router, ApiConfig, AppState};
use leasehold_contracts::{
    spawn_dispatch_worker, spawn_seal_worker, ContractLifecycle, InMemoryDirectory,
    InMemoryDocumentStore, LifecycleParts, LogDispatcher, Notifier, SignatureService, SystemClock,
    TerminationWorkflow, TokioSealScheduler,
};
use leasehold_db::Storage;
use leasehold_escrow::{
    EscrowParts, EscrowPaymentEngine, InMemoryProvider, ProviderRegistry, ReceiptIssuer,
};
use leasehold_fees::CommissionCalculator;
use leasehold_signature::{CertificateSigner, Keypair, OtpService, SigningTokenService};
use leasehold_types::{PaymentMethod, UserId};

use crate::config::ServerConfig;

// =============================================================================
// CLI Arguments
// =============================================================================

/// Leasehold API Server - rental contracts with escrowed payments
#[derive(Parser, Debug)]
#[command(name = "leasehold-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML, JSON, or YAML)
    #[arg(short, long, env = "LEASEHOLD_CONFIG")]
    config: Option<String>,

    /// Host to bind to
    #[arg(long, env = "LEASEHOLD_HOST")]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "LEASEHOLD_PORT")]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LEASEHOLD_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format (json, pretty)
    #[arg(long, env = "LEASEHOLD_LOG_FORMAT")]
    log_format: Option<String>,

    /// Redis connection URL
    #[arg(long, env = "REDIS_URL")]
    redis_url: Option<String>,

    /// Enable development mode (shipped secrets, ephemeral keys)
    #[arg(long, env = "LEASEHOLD_DEV_MODE")]
    dev_mode: bool,
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut server_config = ServerConfig::load(args.config.as_deref())?;

    // Override with CLI arguments
    if let Some(host) = args.host {
        server_config.server.host = host;
    }
    if let Some(port) = args.port {
        server_config.server.port = port;
    }
    if let Some(redis_url) = args.redis_url {
        server_config.storage.redis_url = Some(redis_url);
    }
    if let Some(level) = args.log_level {
        server_config.logging.level = level;
    }
    if let Some(format) = args.log_format {
        server_config.logging.format = format;
    }

    init_logging(&server_config.logging);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        dev_mode = args.dev_mode,
        "Starting Leasehold API Server"
    );

    server_config.validate(args.dev_mode)?;

    let storage = init_storage(&server_config).await?;
    let (notifier, outbox) = Notifier::channel();
    let (seals, seal_rx) = TokioSealScheduler::new();
    let clock = Arc::new(SystemClock);
    let fees = Arc::new(CommissionCalculator::new());

    let lifecycle = Arc::new(ContractLifecycle::new(
        LifecycleParts {
            storage: storage.clone(),
            fees: fees.clone(),
            documents: Arc::new(InMemoryDocumentStore::new()),
            seals: Arc::new(seals),
            notifier: notifier.clone(),
            clock: clock.clone(),
            tokens: SigningTokenService::new(server_config.signature.signing_token.clone()),
        },
        server_config.lifecycle.clone(),
    ));

    let signatures = Arc::new(SignatureService::new(
        lifecycle.clone(),
        OtpService::new(server_config.signature.otp.clone()),
        CertificateSigner::new(load_keypair(
            server_config.keys.certificate_seed.as_deref(),
            "certificate",
        )?),
        Arc::new(init_directory(&server_config)?),
    ));

    let escrow = Arc::new(EscrowPaymentEngine::new(
        EscrowParts {
            storage: storage.clone(),
            providers: init_providers(&server_config),
            receipts: ReceiptIssuer::new(load_keypair(
                server_config.keys.receipt_seed.as_deref(),
                "receipt",
            )?),
            notifier,
            clock,
        },
        server_config.escrow.clone(),
    ));

    let termination = Arc::new(TerminationWorkflow::new(lifecycle.clone()));

    // Background workers
    let dispatch_worker = spawn_dispatch_worker(outbox, Arc::new(LogDispatcher));
    let seal_worker = spawn_seal_worker(seal_rx, lifecycle.clone());
    let sweep_worker = spawn_sweep_worker(termination.clone(), server_config.workers.sweep_interval);

    let state = Arc::new(AppState {
        lifecycle,
        signatures,
        termination,
        escrow,
        fees,
        storage,
    });

    let api_config = ApiConfig {
        enable_cors: server_config.api.enable_cors,
        cors_origins: server_config.api.cors_origins.clone(),
        enable_tracing: server_config.api.enable_tracing,
        max_body_size: server_config.api.max_body_size,
    };

    let app = create_router(state, api_config);

    let addr = server_config.server.socket_addr()?;

    tracing::info!(
        host = %server_config.server.host,
        port = %server_config.server.port,
        "Server listening"
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The router is gone; stopping the workers that hold engines drops the
    // last notifier handles so the dispatch worker can drain and exit
    sweep_worker.abort();
    seal_worker.abort();
    let timeout = server_config.server.shutdown_timeout();
    tracing::info!(
        timeout_secs = timeout.as_secs(),
        "Flushing pending notifications..."
    );
    if tokio::time::timeout(timeout, dispatch_worker).await.is_err() {
        tracing::warn!("Notification queue not drained before timeout");
    }

    tracing::info!("Server shutdown complete");

    Ok(())
}

// =============================================================================
// Initialization Functions
// =============================================================================

/// Initialize tracing/logging
fn init_logging(config: &config::LoggingConfig) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let subscriber = tracing_subscriber::registry().with(env_filter);

    match config.format.as_str() {
        "json" => {
            subscriber
                .with(fmt::layer().json().with_target(true))
                .init();
        }
        _ => {
            subscriber
                .with(fmt::layer().pretty().with_target(true))
                .init();
        }
    }
}

/// Connect storage and verify it answers
async fn init_storage(config: &ServerConfig) -> anyhow::Result<Storage> {
    tracing::info!("Connecting to storage...");

    let storage = Storage::connect(&config.storage).await?;
    if !storage.health_check().await {
        anyhow::bail!("Storage health check failed");
    }

    tracing::info!(backend = storage.backend(), "Storage ready");
    Ok(storage)
}

fn load_keypair(seed_hex: Option<&str>, purpose: &str) -> anyhow::Result<Keypair> {
    match seed_hex {
        Some(seed) => Keypair::from_seed_hex(seed)
            .with_context(|| format!("invalid {} seed", purpose)),
        None => {
            tracing::warn!(purpose, "No seed configured, using an ephemeral signing key");
            Ok(Keypair::generate())
        }
    }
}

fn init_directory(config: &ServerConfig) -> anyhow::Result<InMemoryDirectory> {
    let directory = InMemoryDirectory::new();
    for entry in &config.directory {
        let user = UserId::parse(&entry.user_id)
            .with_context(|| format!("invalid directory user id {}", entry.user_id))?;
        directory.register(user, entry.phone.clone());
    }
    tracing::info!(entries = config.directory.len(), "Party directory loaded");
    Ok(directory)
}

/// Cash and cheque are always available; each provider-backed method with
/// a webhook secret gets a sandbox adapter
fn init_providers(config: &ServerConfig) -> ProviderRegistry {
    let mut providers = ProviderRegistry::with_manual_methods();

    for method in PaymentMethod::ALL.into_iter().filter(|m| m.is_provider_backed()) {
        match config.escrow.webhook_secret(method) {
            Some(secret) => {
                tracing::warn!(method = %method, "Using sandbox provider adapter");
                providers.register(Arc::new(InMemoryProvider::new(method, secret)));
            }
            None => tracing::info!(method = %method, "Payment method disabled, no webhook secret"),
        }
    }

    providers
}

/// Run the notice-period sweep on a fixed interval
fn spawn_sweep_worker(termination: Arc<TerminationWorkflow>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tracing::info!(interval_secs = every.as_secs(), "Notice sweep worker started");

        loop {
            ticker.tick().await;
            match termination.sweep().await {
                Ok(report) => tracing::info!(
                    terminated = report.terminated.len(),
                    awaiting_confirmation = report.awaiting_confirmation.len(),
                    "Notice sweep complete"
                ),
                Err(e) => tracing::error!(error = %e, "Notice sweep failed"),
            }
        }
    })
}

// =============================================================================
// Graceful Shutdown
// =============================================================================

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let args = Args::parse_from(["leasehold-server", "--port", "8080", "--dev-mode"]);
        assert_eq!(args.port, Some(8080));
        assert!(args.dev_mode);
        assert!(args.log_level.is_none());
    }

    #[test]
    fn test_providers_follow_webhook_secrets() {
        let config = ServerConfig::development();
        let methods = init_providers(&config).methods();
        assert!(methods.contains(&PaymentMethod::MobileMoneyA));
        assert!(methods.contains(&PaymentMethod::MobileMoneyB));
        assert!(methods.contains(&PaymentMethod::Cash));

        let mut config = ServerConfig::production();
        config.escrow.webhook_secrets.clear();
        let methods = init_providers(&config).methods();
        assert!(!methods.contains(&PaymentMethod::MobileMoneyA));
        assert!(methods.contains(&PaymentMethod::Check));
    }

    #[test]
    fn test_directory_rejects_bad_ids() {
        let mut config = ServerConfig::development();
        config.directory.push(config::DirectoryEntry {
            user_id: "nobody".to_string(),
            phone: "+221770000000".to_string(),
        });
        assert!(init_directory(&config).is_err());
    }

    #[test]
    fn test_keypair_from_seed_is_stable() {
        let seed = "07".repeat(32);
        let a = load_keypair(Some(&seed), "receipt").unwrap();
        let b = load_keypair(Some(&seed), "receipt").unwrap();
        assert_eq!(a.public_key_hex(), b.public_key_hex());
        assert!(load_keypair(Some("zz"), "receipt").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_worker_runs_until_aborted() {
        let lifecycle = Arc::new(ContractLifecycle::new(
            LifecycleParts {
                storage: Storage::in_memory(),
                fees: Arc::new(CommissionCalculator::new()),
                documents: Arc::new(InMemoryDocumentStore::new()),
                seals: Arc::new(leasehold_contracts::ManualSealScheduler::new()),
                notifier: Notifier::channel().0,
                clock: Arc::new(SystemClock),
                tokens: SigningTokenService::new(Default::default()),
            },
            Default::default(),
        ));
        let worker = spawn_sweep_worker(
            Arc::new(TerminationWorkflow::new(lifecycle)),
            Duration::from_secs(60),
        );

        tokio::time::sleep(Duration::from_secs(150)).await;
        assert!(!worker.is_finished());

        worker.abort();
        assert!(worker.await.unwrap_err().is_cancelled());
    }
}
