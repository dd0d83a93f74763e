//! pingsweep - multi-strategy host reachability probing.

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pingsweep::command::{ping_hosts_cmd, TabSeparated};
use pingsweep::config::ServerConfig;
use pingsweep::web::{AppState, Server};

/// Probe hosts for reachability, or serve the probing API over HTTP.
#[derive(Debug, Parser)]
#[command(name = "pingsweep", version, about)]
struct Cli {
    /// Hosts to scan with the system ping utility.
    hosts: Vec<String>,

    /// Run the HTTP API server instead of scanning.
    #[arg(long)]
    serve: bool,

    /// Echo requests per host.
    #[arg(short, long, default_value_t = 3)]
    count: u32,

    /// Per-packet timeout in seconds.
    #[arg(short, long, default_value_t = 3)]
    timeout: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("pingsweep=info".parse()?))
        .init();

    let cli = Cli::parse();

    if cli.serve {
        let cfg = ServerConfig::load();
        tracing::info!("Starting pingsweep API on port {}...", cfg.http_port);
        let server = Server::new(AppState::new(cfg));
        server.start().await?;
        return Ok(());
    }

    if cli.hosts.is_empty() {
        eprintln!("usage: pingsweep <host> [host ...]  (or --serve)");
        std::process::exit(2);
    }

    let mut sink = TabSeparated(std::io::stdout());
    let scan = ping_hosts_cmd(&cli.hosts, cli.count, cli.timeout, Some(&mut sink)).await;

    // Exit 0 when anything answered, 1 when nothing did.
    std::process::exit(if scan.summary.alive_count > 0 { 0 } else { 1 });
}
