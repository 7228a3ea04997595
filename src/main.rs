use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use gitway::auth::hash_password;
use gitway::{AppState, GitError, GitHttpServer, ServerConfig};

#[derive(Parser)]
#[command(name = "gitway")]
#[command(author = "Gitway Team")]
#[command(version)]
#[command(about = "Self-hosted Git server with a browsing and editing API", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server
    Serve {
        /// Configuration file (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Port to listen on, overriding the configuration
        #[arg(short, long)]
        port: Option<u16>,

        /// Root directory for bare repositories, overriding the configuration
        #[arg(long)]
        storage: Option<PathBuf>,
    },

    /// Write a configuration file with default values
    InitConfig {
        /// Destination; the user config directory when omitted
        #[arg(long)]
        path: Option<PathBuf>,
    },

    /// Print the digest to store as a user's `password_sha256`
    HashPassword {
        password: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("gitway=info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, port, storage } => {
            let path = config.unwrap_or_else(ServerConfig::default_location);
            let mut config = ServerConfig::load(Some(&path))?;
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(storage) = storage {
                config.storage.root = storage;
            }

            let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port)
                .parse()
                .map_err(|e| GitError::Config(format!("Invalid bind address: {}", e)))?;
            let state = AppState::from_config(config)?;
            GitHttpServer::new(state).serve(addr).await?;
        }
        Commands::InitConfig { path } => {
            let path = path.unwrap_or_else(ServerConfig::default_location);
            if path.exists() {
                return Err(format!("Refusing to overwrite {}", path.display()).into());
            }
            ServerConfig::default().save_to_file(&path)?;
            info!(path = %path.display(), "wrote default configuration");
            println!("Configuration written to {}", path.display());
        }
        Commands::HashPassword { password } => {
            println!("{}", hash_password(&password));
        }
    }

    Ok(())
}
