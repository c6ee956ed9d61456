use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use voxbridge::{ServerConfig, core::dsp, routes, state::AppState};

/// Voxbridge - voice-AI telephony bridge
#[derive(Parser, Debug)]
#[command(name = "voxbridge")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Subcommand to run
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Mix two capture files into one mono recording
    Mix {
        /// First input WAV (e.g. `<channel>_in.wav`)
        first: PathBuf,
        /// Second input WAV (e.g. `<channel>_out.wav`)
        second: PathBuf,
        /// Output WAV
        destination: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    // Initialize crypto provider for TLS connections
    // This must be done before any TLS connections are attempted
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    if let Some(Commands::Mix {
        first,
        second,
        destination,
    }) = cli.command
    {
        dsp::mix_files(&first, &second, &destination)
            .map_err(|e| anyhow!("Failed to mix recordings: {}", e))?;
        println!("Mixed recording written to {}", destination.display());
        return Ok(());
    }

    // Load configuration from file or environment
    let config = if let Some(config_path) = cli.config {
        println!("Loading configuration from {}", config_path.display());
        ServerConfig::from_file(&config_path).map_err(|e| anyhow!(e.to_string()))?
    } else {
        ServerConfig::from_env().map_err(|e| anyhow!(e.to_string()))?
    };

    if config.pbx_servers.is_empty() {
        anyhow::bail!("No PBX server configured. Set PBX_URL or pbx.servers in the YAML config");
    }

    let address = config.address();
    let socket_addr: SocketAddr = address
        .parse()
        .map_err(|e| anyhow!("Invalid server address '{}': {}", address, e))?;

    let app_state = AppState::new(config)
        .await
        .map_err(|e| anyhow!("Failed to start media plane: {}", e))?;
    app_state.connect_all().await;

    let app = routes::api::create_api_router().with_state(app_state.clone());

    println!("Status API listening on http://{}", socket_addr);
    let listener = TcpListener::bind(&socket_addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutdown requested");
    })
    .await?;

    app_state.shutdown().await;
    Ok(())
}
