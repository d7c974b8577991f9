use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use leviatan_bot::application::services::CommandService;
use leviatan_bot::domain::traits::{Bot, SystemClock};
use leviatan_bot::infrastructure::adapters::ConsoleAdapter;
use leviatan_bot::infrastructure::logging;
use leviatan_bot::infrastructure::storage::JsonSnapshotStore;
use leviatan_bot::{Config, Engine};

#[derive(Parser)]
#[command(name = "leviatan-bot")]
#[command(about = "Liquid democracy bot", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Snapshot file (overrides config)
    #[arg(short, long)]
    data_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the console bot
    Run {
        /// Voter id to act as when the session starts
        #[arg(short, long)]
        user: Option<String>,
    },
    /// Show version
    Version,
    /// Generate default config
    InitConfig,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { user } => {
            let config = load_config(&cli.config, cli.data_file);
            if let Err(e) = logging::init(&config.logging) {
                eprintln!("Failed to initialize logging: {}", e);
                std::process::exit(1);
            }
            if let Err(e) = run_bot(config, user).await {
                tracing::error!("{}", e);
                std::process::exit(1);
            }
        }
        Commands::Version => {
            println!("leviatan-bot v{}", env!("CARGO_PKG_VERSION"));
        }
        Commands::InitConfig => {
            init_config(&cli.config);
        }
    }
}

fn load_config(config_path: &str, data_file: Option<PathBuf>) -> Config {
    let mut config = if Path::new(config_path).exists() {
        match Config::load(config_path) {
            Ok(mut config) => {
                config.apply_env();
                config
            }
            Err(e) => {
                eprintln!("Failed to load config: {}, using defaults", e);
                Config::load_env()
            }
        }
    } else {
        Config::load_env()
    };
    if let Some(path) = data_file {
        config.storage.data_file = path;
    }
    config
}

async fn run_bot(config: Config, user: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!("Starting {}", config.bot.name);

    let store = Arc::new(JsonSnapshotStore::new(config.storage.data_file.clone()));
    store.init().await?;
    tracing::info!("Snapshot file: {}", store.path().display());

    let name = config.bot.name.clone();
    let prefix = config.bot.prefix.clone();
    let engine = Arc::new(Engine::new(config, store, Arc::new(SystemClock)));
    engine.load().await?;

    let reaper = engine.spawn_reaper();
    let commands = Arc::new(CommandService::new(prefix, engine.clone()));
    let console = ConsoleAdapter::new(name, commands).with_user(user);

    tokio::select! {
        result = console.start() => {
            if let Err(e) = result {
                tracing::error!("Console stopped: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted");
        }
    }

    reaper.abort();
    engine.flush().await?;
    tracing::info!("State saved, bye");
    Ok(())
}

fn init_config(path: &str) {
    if Path::new(path).exists() {
        eprintln!("{} already exists, not overwriting", path);
        return;
    }
    let yaml = match Config::default().to_yaml() {
        Ok(yaml) => yaml,
        Err(e) => {
            eprintln!("Failed to render config: {}", e);
            return;
        }
    };
    match std::fs::write(path, yaml) {
        Ok(()) => println!("Config written to {}", path),
        Err(e) => eprintln!("Failed to write config: {}", e),
    }
}
