use clap::{Parser, Subcommand};
use ircwatch::api::{self, ApiState};
use ircwatch::config::{ConfigBundle, ConfigStore};
use ircwatch::error::{ConfigError, EXIT_CONFIG, EXIT_IO, EXIT_RUNTIME, EXIT_VALIDATION};
use ircwatch::orchestrator::Orchestrator;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ircwatch")]
#[command(
    about = "Configuration-driven log tailing and notification engine for IRC chat logs"
)]
#[command(version)]
struct Cli {
    /// Configuration directory (default: ~/.config/ircwatch)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the watcher pipeline and control plane
    Run,
    /// Load and validate all configuration, then exit
    Validate,
    /// Export the current configuration as a gzipped bundle
    Export {
        /// Output path for the bundle
        #[arg(default_value = "ircwatch-config.json.gz")]
        output: PathBuf,
    },
    /// Print the API auth token, generating it if missing
    Token,
}

fn exit_code_for(error: &ConfigError) -> i32 {
    match error {
        ConfigError::Io { .. } => EXIT_IO,
        ConfigError::Parse { .. } | ConfigError::Environment { .. } => EXIT_CONFIG,
        ConfigError::MissingField { .. }
        | ConfigError::InvalidValue { .. }
        | ConfigError::InvalidRegex { .. }
        | ConfigError::Filter { .. } => EXIT_VALIDATION,
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let config_dir = cli.config.unwrap_or_else(|| {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ircwatch")
    });

    match cli.command {
        Commands::Run => {
            if let Err(error) = run(&config_dir).await {
                error!(%error, "fatal error");
                let code = error
                    .downcast_ref::<ConfigError>()
                    .map(exit_code_for)
                    .unwrap_or(EXIT_RUNTIME);
                std::process::exit(code);
            }
        }
        Commands::Validate => match ConfigStore::load(&config_dir) {
            Ok(store) => {
                println!("Configuration OK: {}", config_dir.display());
                println!("  clients: {}", store.clients.len());
                println!("  servers: {}", store.servers.len());
                println!("  events:  {}", store.events.len());
                println!("  sinks:   {}", store.sinks.len());
            }
            Err(error) => {
                eprintln!("Configuration invalid: {}", error);
                std::process::exit(exit_code_for(&error));
            }
        },
        Commands::Export { output } => {
            let result = ConfigStore::load(&config_dir)
                .map_err(anyhow::Error::from)
                .and_then(|store| ConfigBundle::from_store(&store).to_gzip())
                .and_then(|bytes| std::fs::write(&output, bytes).map_err(Into::into));
            match result {
                Ok(()) => println!("Exported bundle to {}", output.display()),
                Err(error) => {
                    eprintln!("Export failed: {}", error);
                    std::process::exit(EXIT_IO);
                }
            }
        }
        Commands::Token => {
            if let Err(error) = ConfigStore::ensure_layout(&config_dir) {
                eprintln!("Failed to prepare config directory: {}", error);
                std::process::exit(EXIT_IO);
            }
            match api::load_or_create_token(&config_dir, None) {
                Ok(token) => println!("{}", token),
                Err(error) => {
                    eprintln!("Failed to load token: {}", error);
                    std::process::exit(EXIT_IO);
                }
            }
        }
    }
}

async fn run(config_dir: &std::path::Path) -> anyhow::Result<()> {
    let orchestrator = Orchestrator::initialize(config_dir).await?;
    let store = orchestrator.store();
    let api_settings = store.read().await.root.api.clone().unwrap_or_default();

    let orchestrator = Arc::new(Mutex::new(orchestrator));
    let reload = Orchestrator::spawn_reload_worker(orchestrator.clone());
    {
        let mut guard = orchestrator.lock().await;
        guard.start().await?;
        guard.start_config_watcher(reload.clone())?;
    }

    if api_settings.enabled {
        let token = api::load_or_create_token(config_dir, api_settings.auth_token.as_deref())?;
        let state = ApiState {
            store,
            orchestrator: orchestrator.clone(),
            reload,
            auth_token: token,
            enable_file_ops: api_settings.enable_file_ops,
            config_dir: config_dir.to_path_buf(),
        };
        let host = api_settings.host.clone();
        let port = api_settings.port;
        tokio::spawn(async move {
            if let Err(error) = api::serve(state, &host, port).await {
                error!(%error, "control plane stopped");
            }
        });
    }

    tokio::signal::ctrl_c().await?;
    info!("received shutdown signal");
    orchestrator.lock().await.stop().await?;
    Ok(())
}
