use std::sync::Arc;

use clap::Parser;
use clink_fake_backend::FakeBackend;
use tracing_subscriber::prelude::*;

#[derive(Debug, Parser)]
struct Args {
    /// Endpoint URL of the hosted store. The built-in demo backend serves
    /// everything locally; the value is recorded for the real backend.
    #[arg(long, env = "CLINK_STORE_URL")]
    store_url: Option<String>,
    /// Public (anonymous) API key for the hosted store.
    #[arg(long, env = "CLINK_STORE_KEY")]
    store_key: Option<String>,
    /// Where to write logs; the terminal itself is taken over by the UI.
    #[arg(long, default_value = "clink.log")]
    log_file: std::path::PathBuf,
    /// Disable the demo traffic generator.
    #[arg(long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    let args = Args::parse();
    let log_file = std::sync::Mutex::new(std::fs::File::create(&args.log_file)?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(log_file))
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Some(url) = &args.store_url {
        tracing::info!(%url, has_key = args.store_key.is_some(), "store endpoint configured");
    }

    let backend = Arc::new(FakeBackend::seeded());
    if !args.quiet {
        tokio::spawn(clink_fake_backend::chatter(backend.clone()));
    }
    clink_tui::run(backend).await?;
    Ok(())
}
