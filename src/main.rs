use clap::{Parser, Subcommand};
use std::path::Path;
use std::sync::Arc;

use whisker::application::messaging::EventBus;
use whisker::application::plugins::PluginLoader;
use whisker::application::rbac::{AccessController, SharedAccessController};
use whisker::domain::entities::event::{SHUTDOWN_EVENT, STARTUP_EVENT};
use whisker::domain::entities::{Event, EventData};
use whisker::infrastructure::adapters::console::{ConsoleAdapter, ConsoleReplier};
use whisker::infrastructure::config::Config;
use whisker::infrastructure::plugins::discover;
use whisker::infrastructure::storage::JsonDataStore;
use whisker::BotError;

/// User the console speaks as when no root user is configured
const CONSOLE_USER: &str = "console";

#[derive(Parser)]
#[command(name = "whisker")]
#[command(about = "Embeddable plugin runtime for chat bots", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Root user id (overrides config)
    #[arg(short, long)]
    root: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Load plugins and read messages from the console
    Run,
    /// Show version
    Version,
    /// Generate default config
    InitConfig,
}

fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run => {
            let config = load_config(&cli.config, cli.root);
            let rt = match tokio::runtime::Runtime::new() {
                Ok(rt) => rt,
                Err(e) => {
                    tracing::error!("Failed to start runtime: {}", e);
                    std::process::exit(1);
                }
            };
            if let Err(e) = rt.block_on(run(config)) {
                tracing::error!("{}", e);
                std::process::exit(1);
            }
        }
        Commands::Version => {
            println!("whisker v{}", env!("CARGO_PKG_VERSION"));
        }
        Commands::InitConfig => init_config(),
    }
}

fn load_config(path: &str, root: Option<String>) -> Config {
    let mut config = if Path::new(path).exists() {
        Config::load(path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config: {}, using defaults", e);
            Config::default()
        })
    } else {
        Config::default()
    };
    config.apply_env();
    if root.is_some() {
        config.access.root = root;
    }
    config
}

async fn run(config: Config) -> Result<(), BotError> {
    tracing::info!("Starting {}", config.bot.name);

    let access = AccessController::open(config.access_settings()).await?;
    let access = SharedAccessController::new(access);
    let bus = EventBus::new(access, Arc::new(ConsoleReplier), config.bus_settings())?;

    let store = JsonDataStore::new(&config.plugins.data_directory);
    store.init().await?;
    let mut loader = PluginLoader::new(Arc::clone(&bus), Arc::new(store), config.loader_settings());

    let factories = discover(&config.plugins.directory)?;
    match loader.load(factories).await {
        Ok(loaded) => tracing::info!("Active plugins: {}", loaded.join(", ")),
        Err(e) => tracing::error!("Plugin batch rejected: {}", e),
    }
    bus.publish_sync(Event::new(STARTUP_EVENT, EventData::Empty)).await;

    let user = config.access.root.clone().unwrap_or_else(|| CONSOLE_USER.to_string());
    let console = ConsoleAdapter::new(user, Arc::clone(&bus));
    tokio::select! {
        result = console.run() => result?,
        _ = tokio::signal::ctrl_c() => tracing::info!("Interrupted"),
    }

    bus.publish_sync(Event::new(SHUTDOWN_EVENT, EventData::Empty)).await;
    loader.unload_all().await?;
    tracing::info!("Bye");
    Ok(())
}

fn init_config() {
    match Config::default().to_yaml() {
        Ok(yaml) => {
            println!("{}", yaml);
            println!("\nSave this to config.yaml and adjust as needed.");
        }
        Err(e) => tracing::error!("{}", e),
    }
}
