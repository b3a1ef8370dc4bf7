//! CPH Bridge Reconciler
//!
//! Runs the retry scheduler and the status API against the configured
//! chains until SIGINT/SIGTERM. Claims enter through the library's
//! [`reconciler::reconciler::Reconciler`].

use std::net::SocketAddr;
use std::sync::Arc;

use reconciler::api;
use reconciler::config::Config;
use reconciler::db::{self, PgRecordStore, RecordStore};
use reconciler::node_check::{check_nodes, log_node_statuses, CHECK_TIMEOUT};
use reconciler::reconciler::Reconciler;
use reconciler::registry::ChainRegistry;
use reconciler::scheduler::RetryScheduler;
use tracing::{error, info};

fn main() -> eyre::Result<()> {
    // Install color-eyre for better error reporting
    color_eyre::install()?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main())
}

async fn async_main() -> eyre::Result<()> {
    init_logging();

    info!("Starting CPH Bridge Reconciler");

    let config = Config::load()?;
    info!(
        chains = config.chains.len(),
        lock_chain = config.lock_chain().map(|c| c.name.as_str()).unwrap_or("?"),
        max_retries = config.retry.max_retries,
        "Configuration loaded"
    );

    let pool = db::create_pool(&config.database.url).await?;
    info!("Database connected");

    db::run_migrations(&pool).await?;
    info!("Database migrations complete");

    let registry = Arc::new(ChainRegistry::from_config(&config)?);
    log_node_statuses(&check_nodes(&registry, CHECK_TIMEOUT).await);

    let store: Arc<dyn RecordStore> = Arc::new(PgRecordStore::new(pool));
    let reconciler = Arc::new(Reconciler::new(
        registry,
        store,
        config.retry.max_retries,
    ));

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = tokio::sync::mpsc::channel::<()>(1);

    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        let _ = shutdown_tx.send(()).await;
    });

    let api_addr = SocketAddr::from(([0, 0, 0, 0], config.api.port));
    let api_reconciler = reconciler.clone();
    tokio::spawn(async move {
        if let Err(e) = api::start_api_server(api_addr, api_reconciler).await {
            error!(error = %e, "API server error");
        }
    });

    let scheduler = RetryScheduler::new(reconciler, config.retry.clone());
    scheduler.run(shutdown_rx).await?;

    info!("CPH Bridge Reconciler stopped");
    Ok(())
}

/// Initialize tracing/logging; LOG_FORMAT=json switches to JSON lines
fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,reconciler=debug,cph_bridge_reconciler=debug"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_target(true))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .with(filter)
            .init();
    }
}

/// Wait for shutdown signals (SIGINT/SIGTERM)
async fn wait_for_shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
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
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown");
        }
    }
}
