use std::sync::Arc;

use clap::Parser;
use parley_core::{CompletionBackend, GroqClient, ParleyConfig, Stores};
use parley_server::http::{self, HttpState};
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "parley.toml")]
    config: String,

    #[arg(long)]
    health: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (dev convenience: production uses real env vars)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Load config
    let config = match ParleyConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // Init logging; RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log.level));
    fmt().with_env_filter(filter).init();

    // Connect the store backend
    let stores = match Stores::connect(&config.database).await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Failed to connect to store: {}", e);
            std::process::exit(1);
        }
    };

    if args.health {
        match stores.conversations.health().await {
            Ok(v) => println!("✅ Store connected: {}", v),
            Err(e) => {
                println!("❌ Store check failed: {}", e);
                std::process::exit(1);
            }
        }
        println!("✅ Parley health check passed");
        return Ok(());
    }

    let completions = match GroqClient::new(&config.completion) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to create completion client: {}", e);
            std::process::exit(1);
        }
    };

    tracing::info!(backend = completions.name(), "Completion backend ready");

    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();

    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to listen for Ctrl+C");
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    let state = HttpState::new(config, stores, Arc::new(completions));
    http::start_http_server(state, tx.subscribe()).await?;

    Ok(())
}
