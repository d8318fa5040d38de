//! PowerNode CLI — the main entry point.
//!
//! Commands:
//! - `serve`  — Start the HTTP gateway
//! - `config` — Print the effective configuration (secrets redacted)

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use powernode_config::AppConfig;

#[derive(Parser)]
#[command(
    name = "powernode",
    about = "PowerNode — AI chat gateway with MCP tool servers",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(
        short,
        long,
        global = true,
        env = "POWERNODE_CONFIG",
        default_value = "powernode.toml"
    )]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway server
    Serve {
        /// Override the bind host
        #[arg(long)]
        host: Option<String>,

        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Print the effective configuration with secrets redacted
    Config,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose {
        "powernode=debug"
    } else {
        "powernode=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Serve { host, port } => serve(&cli.config, host, port).await?,
        Commands::Config => show_config(&cli.config)?,
    }

    Ok(())
}

async fn serve(
    config_path: &Path,
    host: Option<String>,
    port: Option<u16>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config =
        AppConfig::load_with_env(config_path).map_err(|e| format!("Failed to load config: {e}"))?;

    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    println!("⚡ PowerNode");
    println!("   Listening:    {}:{}", config.server.host, config.server.port);
    println!("   Model:        {}", config.provider.model);
    println!("   Storage:      {}", config.storage.backend);
    println!("   Tool servers: {}", config.enabled_tool_servers().count());

    powernode_gateway::start(config).await?;

    Ok(())
}

fn show_config(config_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let config =
        AppConfig::load_with_env(config_path).map_err(|e| format!("Failed to load config: {e}"))?;

    println!("# Effective configuration ({})", config_path.display());
    println!("{config:#?}");

    Ok(())
}
