use apiwatch::db::store::{HistoryStore, MemoryStore, SeaOrmStore};
use apiwatch::monitoring::{HttpProber, MonitorService, Scheduler};
use apiwatch::notifications::build_notifier;
use apiwatch::server::config::ServerConfig;
use apiwatch::version::VERSION;
use apiwatch::web::create_axum_router;

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<String>,
}

fn init_logging(log_dir: &str) {
    // Log to a file: JSON format, daily rotation
    let file_appender = rolling::daily(log_dir, "server.log");
    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .json();

    // Log to stdout: human-readable format
    let stdout_layer = fmt::layer().with_writer(std::io::stdout);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sea_orm=warn,sqlx::query=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal.");
    }
    info!("Shutdown signal received.");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Manually check for --version before full parsing to keep the simple output.
    if std::env::args().any(|arg| arg == "--version") {
        println!("apiwatch version: {VERSION}");
        return Ok(());
    }

    let args = Args::parse();

    // --- Server Config Setup ---
    let server_config = match ServerConfig::load(args.config.as_deref()) {
        Ok(config) => Arc::new(config),
        Err(e) => {
            eprintln!("Failed to load server configuration: {e}");
            return Err(e.into());
        }
    };

    init_logging(&server_config.log_dir);
    info!("Starting apiwatch, version: {}", VERSION);

    // --- History Store Setup ---
    let store: Arc<dyn HistoryStore> = match server_config.database_url.as_deref() {
        Some(url) => {
            let store = SeaOrmStore::connect(url, server_config.database_max_connections).await?;
            store.ensure_schema().await?;
            info!("Connected to PostgreSQL history store.");
            Arc::new(store)
        }
        None => {
            warn!("No database URL configured; history is kept in memory and lost on restart.");
            Arc::new(MemoryStore::new())
        }
    };

    // --- Monitoring Engine Setup ---
    let prober = Arc::new(HttpProber::new(&server_config.probe)?);
    let notifier = build_notifier(&server_config.notifications)?;
    let scheduler = Arc::new(Scheduler::new(
        store,
        prober,
        notifier,
        server_config.classifier.clone(),
        server_config.scheduler.clone(),
    ));
    let tracked = scheduler.start().await?;
    info!(apis = tracked, "Monitoring engine running.");

    let monitor_service = Arc::new(MonitorService::new(scheduler.clone()));

    // --- HTTP Server Setup ---
    let router = create_axum_router(monitor_service);
    let listener = tokio::net::TcpListener::bind(&server_config.listen_addr).await?;
    info!("HTTP API listening on {}", server_config.listen_addr);

    let served = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    scheduler.shutdown().await;
    if let Err(e) = served {
        error!(error = %e, "HTTP server terminated with an error.");
        return Err(e.into());
    }
    info!("apiwatch stopped.");
    Ok(())
}
