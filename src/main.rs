mod console;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use confidant_backend::config::AppConfig;
use confidant_backend::llm_client::{CompletionService, LlmClient};

#[derive(Parser)]
#[command(author, version, about = "Talk with personas that remember and grow", long_about = None)]
struct Cli {
    /// Directory holding one sub-directory per persona
    #[arg(long, global = true, env = "CONFIDANT_PERSONAS_DIR")]
    personas_dir: Option<PathBuf>,

    /// Config file (defaults to confidant_config.toml next to the executable)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with a persona
    Chat {
        /// Persona directory name; a menu is shown when omitted
        #[arg(short, long)]
        persona: Option<String>,
    },
    /// Let two personas talk to each other
    Converse {
        first: String,
        second: String,
        #[arg(short, long, default_value_t = 20)]
        turns: usize,
        /// Pause between turns
        #[arg(long, default_value_t = 2)]
        delay_secs: u64,
        /// Messages between relationship updates
        #[arg(long, default_value_t = 5)]
        segment_size: usize,
    },
    /// Write the effective configuration to the config file
    InitConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,confidant=debug,confidant_backend=debug")),
        )
        .init();

    match dotenvy::dotenv() {
        Ok(path) => tracing::debug!("Loaded environment from {:?}", path),
        Err(e) if e.not_found() => {}
        Err(e) => tracing::warn!("Failed to read .env: {}", e),
    }

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from(path),
        None => AppConfig::load(),
    };
    if let Some(dir) = &cli.personas_dir {
        config.personas_dir = dir.to_string_lossy().into_owned();
    }

    if let Commands::InitConfig = cli.command {
        return match &cli.config {
            Some(path) => config.save_to(path),
            None => config.save(),
        };
    }

    if config.llm_api_key.is_none() && !config.is_local_endpoint() {
        tracing::error!("No API key configured for {}", config.llm_api_url);
        anyhow::bail!("API key not found. Set LLM_API_KEY or OPENAI_API_KEY (a .env file works too).");
    }

    let client = LlmClient::from_config(&config)?;
    tracing::info!("Using model {} at {}", client.model(), config.llm_api_url);
    let completion: Arc<dyn CompletionService> = Arc::new(client);

    match cli.command {
        Commands::Chat { persona } => console::run_chat(&config, completion, persona).await,
        Commands::Converse {
            first,
            second,
            turns,
            delay_secs,
            segment_size,
        } => {
            let pacing = console::Pacing {
                turns,
                delay: Duration::from_secs(delay_secs),
                segment_size,
            };
            console::run_conversation(&config, completion, &first, &second, pacing).await
        }
        Commands::InitConfig => Ok(()),
    }
}
