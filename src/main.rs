use clap::Parser;
use momentum_screener::storage_utils::AsyncStorageManager;
use momentum_screener::{analysis, scheduler};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "momentum-screener", about = "Ranks USDT futures by multi-timeframe momentum")]
struct Args {
    /// Run the analysis once instead of every interval
    #[arg(long)]
    once: bool,

    /// Directory holding config.json and results.json (default: storage/ next to the binary)
    #[arg(long)]
    storage_dir: Option<PathBuf>,

    /// Override fetch.max_concurrent from the config
    #[arg(long)]
    max_concurrent: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let storage = match &args.storage_dir {
        Some(dir) => AsyncStorageManager::new(dir).await?,
        None => AsyncStorageManager::new_relative("storage").await?,
    };
    let mut config = storage.load_config().await?;
    if let Some(max_concurrent) = args.max_concurrent {
        config.fetch.max_concurrent = max_concurrent;
    }
    config.validate()?;

    if args.once {
        analysis::run_analysis_pipeline(&config, &storage).await?;
        return Ok(());
    }

    scheduler::run_scheduled(&config, &storage).await
}
