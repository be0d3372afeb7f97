use anyhow::Result;
use clap::Parser;
use tracing::Level;

use hydrad::{serve, DaemonConfig, DaemonState};

#[derive(Parser)]
#[command(name = "hydrad")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Hydra security-audit trigger daemon", long_about = None)]
struct Cli {
    /// Interface to bind
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to bind
    #[arg(long, default_value = "8787")]
    port: u16,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    hydra_core::init_tracing(cli.json, level);

    // Fails fast on insecure or invalid configuration.
    let config = DaemonConfig::from_env()?;
    let state = DaemonState::new(config);
    serve(state, &cli.host, cli.port).await
}
