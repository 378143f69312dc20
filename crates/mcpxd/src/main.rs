//! mcpxd - MCP gateway daemon
//!
//! Serves every backend in `mcpServers` under `<base path>/<name>/` on one
//! listener, with an unauthenticated health check at `/healthCheck/`.
//!
//! Usage:
//!   mcpxd [--config <path|url>] [--insecure] [--expand-env <bool>]
//!         [--http-headers 'K1:V1;K2:V2'] [--http-timeout <secs>]
//!
//! Stops gracefully on SIGINT or SIGTERM.

mod config;

use std::sync::Arc;

use anyhow::Context;
use clap::{ArgAction, Parser};
use mcpx_gateway::{shutdown_signal, Gateway};
use mcpx_proxy::{HttpAdapter, HttpConnector};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoadOptions;

#[derive(Parser, Debug)]
#[command(name = "mcpxd")]
#[command(version, about = "MCP gateway daemon")]
struct Cli {
    /// Path to the config file, or an http(s) URL
    #[arg(short, long, default_value = "config.json")]
    config: String,

    /// Skip TLS certificate verification when fetching a remote config
    #[arg(long)]
    insecure: bool,

    /// Expand ${VAR} placeholders in the config
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    expand_env: bool,

    /// Headers for fetching a remote config, as 'Key1:Value1;Key2:Value2'
    #[arg(long, default_value = "")]
    http_headers: String,

    /// Timeout in seconds for fetching a remote config
    #[arg(long, default_value_t = 10)]
    http_timeout: u64,

    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    fn load_options(&self) -> LoadOptions {
        LoadOptions {
            source: self.config.clone(),
            insecure: self.insecure,
            expand_env: self.expand_env,
            http_headers: self.http_headers.clone(),
            http_timeout: std::time::Duration::from_secs(self.http_timeout),
        }
    }
}

fn init_telemetry(cli: &Cli) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "{level},mcpxd={level},mcpx_gateway={level},mcpx_api={level}",
            level = cli.log_level
        ))
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(cli.json_logs.then(|| fmt::layer().json()))
        .with((!cli.json_logs).then(fmt::layer))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_telemetry(&cli);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting mcpxd");

    let config = config::load(&cli.load_options())
        .await
        .with_context(|| format!("Failed to load config from {}", cli.config))?;
    tracing::info!(
        backends = config.mcp_servers.len(),
        addr = %config.mcp_proxy.addr,
        "Loaded configuration"
    );

    let connector = Arc::new(HttpConnector::new(config.mcp_proxy.server_info()));
    let adapter = Arc::new(HttpAdapter::new(config.mcp_servers.clone()));
    let gateway = Gateway::new(config, connector, adapter).context("Invalid gateway configuration")?;

    gateway
        .run(shutdown_signal())
        .await
        .context("Gateway stopped with an error")?;

    tracing::info!("mcpxd exited cleanly");
    Ok(())
}
