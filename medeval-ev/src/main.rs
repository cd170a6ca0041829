//! medeval-ev - A/B evaluation service
//!
//! Serves the evaluation API by default. The `recover` subcommand rebuilds
//! local progress from a spreadsheet CSV export without starting the server,
//! and `progress` prints the ledger summary.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use medeval_common::config::{ConfigOverrides, EvalConfig};
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use medeval_ev::ledger::OpenOutcome;
use medeval_ev::{build_router, reconcile, startup};

/// Command-line arguments for medeval-ev
///
/// Each option can also be set through the `MEDEVAL_*` variable named in
/// its help text; the flag wins when both are present.
#[derive(Parser, Debug)]
#[command(name = "medeval-ev")]
#[command(about = "Side-by-side evaluation of model answers by medical evaluators")]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true, env = "MEDEVAL_CONFIG")]
    config: Option<PathBuf>,

    /// Base folder for the default data file locations
    #[arg(long, global = true, env = "MEDEVAL_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Case metadata CSV
    #[arg(long, global = true, env = "MEDEVAL_CSV_PATH")]
    csv_path: Option<PathBuf>,

    /// Folder holding the response documents
    #[arg(long, global = true, env = "MEDEVAL_DOCX_FOLDER")]
    docx_folder: Option<PathBuf>,

    /// Assignment ledger JSON file
    #[arg(long, global = true, env = "MEDEVAL_LEDGER_PATH")]
    ledger_path: Option<PathBuf>,

    /// Remote spreadsheet endpoint
    #[arg(long, global = true, env = "MEDEVAL_ENDPOINT_URL")]
    endpoint_url: Option<String>,

    /// Password for the admin routes
    #[arg(long, global = true, env = "MEDEVAL_ADMIN_PASSWORD", hide_env_values = true)]
    admin_password: Option<String>,

    /// Address to bind
    #[arg(long, global = true, env = "MEDEVAL_BIND_ADDRESS")]
    bind_address: Option<String>,

    /// Port to listen on
    #[arg(short, long, global = true, env = "MEDEVAL_PORT")]
    port: Option<u16>,

    /// Log level when RUST_LOG is not set
    #[arg(long, global = true, env = "MEDEVAL_LOG_LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP service (default)
    Serve,
    /// Mark submissions from a spreadsheet CSV export as complete
    Recover {
        /// Export with `Evaluator #`, `Patient ID` and `Query` columns
        #[arg(long)]
        csv: PathBuf,
    },
    /// Print evaluation progress as JSON
    Progress,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            config_path: self.config.clone(),
            data_dir: self.data_dir.clone(),
            csv_path: self.csv_path.clone(),
            docx_folder: self.docx_folder.clone(),
            ledger_path: self.ledger_path.clone(),
            endpoint_url: self.endpoint_url.clone(),
            admin_password: self.admin_password.clone(),
            bind_address: self.bind_address.clone(),
            port: self.port,
            log_level: self.log_level.clone(),
        }
    }
}

fn init_tracing(level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{},tower_http=info", level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = EvalConfig::resolve(&cli.overrides()).context("Invalid configuration")?;

    init_tracing(&config.log_level);
    config.log_source();
    info!("Starting {} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    info!("Case data: {}", config.csv_path.display());
    info!("Responses: {}", config.docx_folder.display());
    info!("Ledger: {}", config.ledger_path.display());

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Recover { csv } => recover_from_csv(&config, csv),
        Command::Progress => print_progress(&config),
    }
}

async fn serve(config: EvalConfig) -> Result<()> {
    let (state, outcome) = startup::build_state(&config)?;

    if outcome == OpenOutcome::Created {
        startup::reconcile_fresh_ledger(&state).await;
    }

    let app = build_router(state);

    let addr = config.listen_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("medeval-ev listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

fn recover_from_csv(config: &EvalConfig, csv: PathBuf) -> Result<()> {
    let (_, mut ledger, _) = startup::open_ledger(config)?;

    let file = std::fs::File::open(&csv)
        .with_context(|| format!("Failed to open {}", csv.display()))?;
    let rows = reconcile::rows_from_csv(file)
        .with_context(|| format!("Failed to read {}", csv.display()))?;

    let report = reconcile::reconcile_rows(&mut ledger, &rows)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn print_progress(config: &EvalConfig) -> Result<()> {
    let (_, ledger, _) = startup::open_ledger(config)?;
    println!("{}", serde_json::to_string_pretty(&ledger.summary())?);
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
