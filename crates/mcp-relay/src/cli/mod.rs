//! CLI argument parsing and command dispatch.
//!
//! # Commands
//!
//! - `client`: bridge stdin/stdout to the bucket (what an MCP host launches)
//! - `server`: drain the bucket into a local or HTTP MCP server
//!
//! # Example
//!
//! ```bash
//! mcp-relay client --bucket my-relay-bucket
//! mcp-relay server --bucket my-relay-bucket -- npx -y @modelcontextprotocol/server-everything
//! mcp-relay server --backend s3 --bucket relay --mcp-url http://localhost:8080/mcp
//! ```

mod args;
mod execute;

use anyhow::Result;
use clap::{Parser, Subcommand};

pub use args::{ClientArgs, ServerArgs, StorageArgs};

/// mcp-relay - tunnel MCP JSON-RPC traffic through object storage
///
/// Connects an MCP host and an MCP server that cannot reach each other
/// directly, using a shared storage bucket as the only channel.
#[derive(Parser, Debug)]
#[command(name = "mcp-relay")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the client bridge
    ///
    /// Reads JSON-RPC messages from stdin, relays them through the bucket,
    /// and writes responses to stdout. Exits when stdin closes.
    Client(ClientArgs),

    /// Run the server bridge
    ///
    /// Polls the bucket for requests and forwards them to an MCP server,
    /// either a spawned command or an HTTP endpoint.
    Server(ServerArgs),
}

impl Cli {
    /// Parse CLI arguments from command line
    #[must_use]
    pub fn parse_args() -> Self {
        <Self as Parser>::parse()
    }

    /// Parse CLI arguments from an iterator (for testing)
    ///
    /// # Errors
    ///
    /// Returns the clap error for invalid arguments.
    pub fn try_parse_from<I, T>(iter: I) -> std::result::Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(iter)
    }

    /// Execute the CLI command
    ///
    /// # Errors
    ///
    /// Returns configuration, storage, and downstream startup errors, and
    /// for the server, an unexpected downstream exit.
    pub async fn execute(&self) -> Result<()> {
        match &self.command {
            Commands::Client(args) => execute::execute_client(args).await,
            Commands::Server(args) => execute::execute_server(args).await,
        }
    }
}
