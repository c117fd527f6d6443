use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use nfe_client::{ReqwestFetcher, TableParser};
use nfe_core::clock::SystemClock;
use nfe_core::config::validate_url;
use nfe_core::models::HistoryRecord;
use nfe_core::traits::Fetcher;
use nfe_core::{JsonFileExporter, MonitorConfig, ReferenceData, StatusMonitor, TracingMonitorReporter};
use nfe_db::{Database, DatabaseConfig, HistoryRepository, RetentionPolicy};

#[derive(Parser)]
#[command(
    name = "nfe-status",
    version,
    about = "Track NF-e autorizador availability with SCD2 history"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch the status page, record changes and export the snapshot (default)
    Run {
        /// Status page URL
        #[arg(short, long, env = "NFE_URL")]
        url: Option<String>,

        /// Destination of the JSON export
        #[arg(short, long, env = "NFE_JSON_PATH")]
        json_path: Option<PathBuf>,

        /// Render the page in headless Chromium instead of plain HTTP
        #[cfg(feature = "browser")]
        #[arg(long, default_value_t = false)]
        browser: bool,
    },

    /// Create the history table and indexes
    InitDb,

    /// Delete closed history records past the retention window
    Prune,

    /// Show the version history of one autorizador
    History {
        /// Autorizador code (e.g. SVAN, MG)
        #[arg(short, long)]
        autorizador: String,

        /// Number of versions to show
        #[arg(short, long, default_value_t = 10)]
        limit: usize,

        /// Print JSON instead of text
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Show the current status of every autorizador
    Current {
        /// Print JSON instead of text
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let config = match MonitorConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = init_tracing(&config) {
        eprintln!("Error: {e:#}");
        return ExitCode::FAILURE;
    }

    let result = match cli.command.unwrap_or(Commands::Run {
        url: None,
        json_path: None,
        #[cfg(feature = "browser")]
        browser: false,
    }) {
        #[cfg(not(feature = "browser"))]
        Commands::Run { url, json_path } => cmd_run(config, url, json_path, false).await,
        #[cfg(feature = "browser")]
        Commands::Run {
            url,
            json_path,
            browser,
        } => cmd_run(config, url, json_path, browser).await,
        Commands::InitDb => cmd_init_db().await.map(|()| 0),
        Commands::Prune => cmd_prune(&config).await.map(|()| 0),
        Commands::History {
            autorizador,
            limit,
            json,
        } => cmd_history(&config, &autorizador, limit, json).await.map(|()| 0),
        Commands::Current { json } => cmd_current(&config, json).await.map(|()| 0),
    };

    match result {
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Install a stderr layer and, unless disabled, an ANSI-free file layer.
///
/// `RUST_LOG` takes precedence over `NFE_LOG_LEVEL`.
fn init_tracing(config: &MonitorConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .with_context(|| format!("Invalid NFE_LOG_LEVEL '{}'", config.log_level))?;

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    let file_layer = match &config.log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();
    Ok(())
}

/// Build the database facade from `DATABASE_URL` / `NFE_PG_*`.
fn connect_db() -> Result<Database> {
    let db_config = DatabaseConfig::from_env()?;
    Ok(Database::connect_lazy(&db_config)?)
}

fn retention_policy(config: &MonitorConfig) -> RetentionPolicy {
    RetentionPolicy {
        max_age_days: config.retention_max_days,
        max_size_mb: config.retention_max_mb,
    }
}

fn history_repo(config: &MonitorConfig) -> Result<HistoryRepository> {
    Ok(connect_db()?.history_repo(Arc::new(SystemClock), retention_policy(config)))
}

async fn cmd_run(
    mut config: MonitorConfig,
    url: Option<String>,
    json_path: Option<PathBuf>,
    browser: bool,
) -> Result<i32> {
    if let Some(url) = url {
        validate_url(&url)?;
        config.url = url;
    }
    if let Some(path) = json_path {
        config.json_path = path;
    }

    #[cfg(feature = "browser")]
    if browser {
        let fetcher =
            nfe_client::BrowserFetcher::with_timeout(config.table_id.clone(), config.fetch_timeout);
        return run_pipeline(&config, fetcher).await;
    }
    #[cfg(not(feature = "browser"))]
    let _ = browser;

    let fetcher = ReqwestFetcher::with_timeout(config.fetch_timeout)?;
    run_pipeline(&config, fetcher).await
}

/// Run the pipeline on its own task so a panic maps to exit code 1, and
/// cancel it on Ctrl-C.
async fn run_pipeline<F>(config: &MonitorConfig, fetcher: F) -> Result<i32>
where
    F: Fetcher + 'static,
{
    let parser = TableParser::new(Arc::new(ReferenceData::builtin()), config.table_id.clone());
    let store = history_repo(config)?;
    let exporter = JsonFileExporter::new(config.json_path.clone(), config.timezone);
    let monitor = StatusMonitor::new(fetcher, parser, store, exporter, config.url.clone());

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling");
            on_signal.cancel();
        }
    });

    let task = tokio::spawn(async move { monitor.run(&cancel, &TracingMonitorReporter).await });

    let code = match task.await {
        Ok(outcome) => outcome.exit_code(),
        Err(e) if e.is_panic() => {
            tracing::error!("Pipeline panicked: {e}");
            1
        }
        Err(e) => {
            tracing::error!("Pipeline task failed: {e}");
            1
        }
    };
    Ok(code)
}

async fn cmd_init_db() -> Result<()> {
    let db = connect_db()?;
    db.init_schema().await?;
    println!("Schema ready: table '{}'", db.layout().table());
    Ok(())
}

async fn cmd_prune(config: &MonitorConfig) -> Result<()> {
    let db = connect_db()?;
    let pruner = db.pruner(Arc::new(SystemClock), retention_policy(config));
    let deleted = pruner.apply(None).await;
    println!(
        "Deleted {deleted} closed records older than {}",
        pruner.cutoff().format("%Y-%m-%d %H:%M:%S UTC")
    );
    Ok(())
}

async fn cmd_history(
    config: &MonitorConfig,
    autorizador: &str,
    limit: usize,
    json: bool,
) -> Result<()> {
    let repo = history_repo(config)?;
    let history = repo.history(autorizador, limit).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&history)?);
        return Ok(());
    }

    if history.is_empty() {
        println!("No history found for autorizador={autorizador}");
        return Ok(());
    }

    println!("History for {autorizador} (newest first):\n");
    for record in &history {
        print_record(record);
    }
    println!("\nTotal: {} versions", history.len());
    Ok(())
}

async fn cmd_current(config: &MonitorConfig, json: bool) -> Result<()> {
    let repo = history_repo(config)?;
    let current = repo.current().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&current)?);
        return Ok(());
    }

    if current.is_empty() {
        println!("No current records");
        return Ok(());
    }
    for record in &current {
        print_record(record);
    }
    println!("\nTotal: {} autorizadores", current.len());
    Ok(())
}

fn print_record(record: &HistoryRecord) {
    let until = record
        .valid_to
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "now".to_string());
    println!(
        "  [{}] {:<8} {} .. {}  status={} (id {})",
        if record.is_current { "CURRENT" } else { "closed" },
        record.autorizador,
        record.valid_from.format("%Y-%m-%d %H:%M:%S"),
        until,
        record.status.status().unwrap_or("-"),
        record.id,
    );
}
