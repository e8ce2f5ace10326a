// src/main.rs
// Lantern - engineering context gateway

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

use lantern::api;
use lantern::config::GatewayConfig;
use lantern::state::AppState;
use lantern::tuning::ConfidenceTuner;

#[derive(Parser)]
#[command(name = "lantern", about = "Engineering context gateway", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP gateway (default)
    Serve,
    /// Run one confidence-tuning pass and print the outcomes
    Tune {
        /// Propose deltas without persisting them
        #[arg(long)]
        dry_run: bool,
        /// Restrict tuning to a single project tag
        #[arg(long)]
        project: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let level = std::env::var("LANTERN_LOG")
        .ok()
        .and_then(|l| l.parse::<Level>().ok())
        .unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = GatewayConfig::from_env();

    match cli.command {
        Some(Commands::Tune { dry_run, project }) => run_tune(config, dry_run, project).await,
        Some(Commands::Serve) | None => serve(config).await,
    }
}

async fn serve(config: GatewayConfig) -> Result<()> {
    let bind_address = config.server.bind_address();
    let state = Arc::new(AppState::new(config).await?);
    let background = state.spawn_background();

    let router = api::router(state.clone());
    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    info!(address = %bind_address, "Gateway listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    state.shutdown();
    for handle in background {
        let _ = tokio::time::timeout(std::time::Duration::from_secs(5), handle).await;
    }
    info!("Gateway stopped");
    Ok(())
}

async fn run_tune(config: GatewayConfig, dry_run: bool, project: Option<String>) -> Result<()> {
    use lantern::metrics::RecordStore;
    use lantern::stores::GraphStore;

    let records: Arc<dyn RecordStore> = Arc::new(GraphStore::connect(&config.graph).await?);
    let tuner = ConfidenceTuner::new(records, config.tuner);

    let outcomes = tuner.run(project.as_deref(), dry_run).await?;
    println!("{}", serde_json::to_string_pretty(&outcomes)?);
    Ok(())
}
