use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use thread_archiver::archiver::{RunOutcome, ThreadArchiver};
use thread_archiver::config::{Cli, Config};
use thread_archiver::db::Database;
use thread_archiver::fingerprint::FfmpegFingerprinter;
use thread_archiver::shutdown::{spawn_signal_listener, Shutdown};

#[tokio::main]
async fn main() {
    // Parse before logging is set up so usage errors print plainly.
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        error!("Fatal error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    init_tracing()?;

    let config = Config::from_cli(cli).context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    info!(
        board = %config.board,
        thread = config.thread_no,
        data_dir = %config.data_dir.display(),
        "Configuration loaded"
    );

    tokio::fs::create_dir_all(&config.data_dir)
        .await
        .with_context(|| {
            format!(
                "Failed to create data directory: {}",
                config.data_dir.display()
            )
        })?;

    let fingerprinter = FfmpegFingerprinter::new(config.ffmpeg_path.clone());
    if !fingerprinter.is_available().await {
        anyhow::bail!("Couldn't find command {} in $PATH", config.ffmpeg_path);
    }

    let db = Database::new(&config.database_path())
        .await
        .context("Failed to initialize database")?;

    let shutdown = Shutdown::new();
    let listener = spawn_signal_listener(shutdown.clone())?;

    let archiver = ThreadArchiver::new(config, db, Arc::new(fingerprinter), shutdown)?;
    let outcome = archiver.run().await;
    listener.abort();

    match outcome? {
        RunOutcome::ThreadEnded => info!("Thread archived completely"),
        RunOutcome::Interrupted => info!("Shut down on signal"),
    }

    Ok(())
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,thread_archiver=debug"));

    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| matches!(v.to_lowercase().as_str(), "json" | "structured"))
        .unwrap_or(false);

    if use_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    }

    Ok(())
}
