//! CLI binary entry point for the Cadre hierarchy server.
//!
//! Usage:
//!   cadre-server [OPTIONS]
//!
//! Options:
//!   -c, --config <FILE>      Path to configuration TOML file
//!   -r, --rpc <ADDR>         RPC bind address (overrides config)
//!   -s, --snapshot <FILE>    Forest snapshot file (overrides config)
//!   --max-level <N>          Deepest allowed level (overrides config)
//!   --json-logs              Emit JSON-formatted logs
//!   -v, --verbose            Increase logging verbosity

use std::path::PathBuf;

use clap::Parser;

use cadre_server::config::ServerConfig;
use cadre_server::rpc_server::RpcServer;

/// Cadre - bounded-depth leader hierarchy service.
#[derive(Parser, Debug)]
#[command(name = "cadre-server")]
#[command(about = "JSON-RPC server managing a forest of leader hierarchies")]
#[command(version)]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// JSON-RPC server bind address (e.g., 127.0.0.1:9470).
    #[arg(short, long, value_name = "ADDR")]
    rpc: Option<String>,

    /// Forest snapshot file, loaded at start-up and rewritten after mutations.
    #[arg(short, long, value_name = "FILE")]
    snapshot: Option<PathBuf>,

    /// Deepest allowed hierarchy level.
    #[arg(long, value_name = "N")]
    max_level: Option<u32>,

    /// Emit JSON-formatted logs.
    #[arg(long)]
    json_logs: bool,

    /// Increase logging verbosity (can be repeated: -v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration.
    let mut config = ServerConfig::load(cli.config.as_deref())?;

    // Apply CLI overrides.
    if let Some(rpc) = cli.rpc {
        config.rpc.bind_addr = rpc;
    }
    if let Some(snapshot) = cli.snapshot {
        config.store.snapshot_path = Some(snapshot);
    }
    if let Some(max_level) = cli.max_level {
        config.hierarchy.max_level = max_level;
    }
    if cli.json_logs {
        config.logging.json_format = true;
    }

    // Adjust log level based on verbosity.
    let log_level = match cli.verbose {
        0 => config.logging.level.as_str(),
        1 => "debug",
        _ => "trace",
    };

    // Initialize logging.
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    if config.logging.json_format {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }

    let addr = config.rpc_socket_addr()?;
    tracing::info!(
        rpc = %addr,
        max_level = config.hierarchy.max_level,
        snapshot = ?config.store.snapshot_path,
        "Starting Cadre hierarchy server"
    );

    let state = cadre_server::build_state(&config)?;
    let rpc_server = RpcServer::new(addr.to_string(), state, config.rpc.max_connections);

    tokio::select! {
        result = rpc_server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    Ok(())
}
