//! mcp-relay CLI binary.

use anyhow::Result;
use mcp_relay::cli::Cli;
use tracing_subscriber::EnvFilter;

/// Main entry point for the mcp-relay CLI.
///
/// Logs go to stderr; stdout carries the JSON-RPC stream in client mode.
#[tokio::main]
async fn main() -> Result<()> {
    // Example: RUST_LOG=mcp_relay=debug,mcp_relay_jsonl=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("mcp_relay=info,mcp_relay_jsonl=info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse_args();
    cli.execute().await
}
