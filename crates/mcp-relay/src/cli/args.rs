//! CLI argument structs for both subcommands.
//!
//! Every flag has an `MCP_RELAY_*` environment equivalent. Nothing is marked
//! required at the clap level: missing values are reported by configuration
//! resolution, after the config file has had its say.

use std::path::PathBuf;

use clap::{Args, Parser};

use crate::config::{self, BackendKind, ClientOverrides, ServerOverrides, StorageOverrides};
use crate::error::{Error, Result};

/// Storage flags shared by `client` and `server`.
#[derive(Args, Debug, Clone, Default)]
pub struct StorageArgs {
    /// YAML config file
    ///
    /// Values in the file apply underneath command-line flags and
    /// environment variables.
    #[arg(long, env = "MCP_RELAY_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Storage backend [default: gcs]
    #[arg(long, env = "MCP_RELAY_BACKEND", value_enum)]
    pub backend: Option<BackendKind>,

    /// Bucket name (root directory for the local backend)
    #[arg(long, env = "MCP_RELAY_BUCKET", value_name = "NAME")]
    pub bucket: Option<String>,

    /// Key prefix shared by client and server [default: mcp-relay]
    #[arg(long, env = "MCP_RELAY_PREFIX")]
    pub prefix: Option<String>,

    /// GCS service account key file
    #[arg(long, env = "MCP_RELAY_CREDENTIALS", value_name = "FILE")]
    pub credentials: Option<PathBuf>,

    /// Endpoint URL for S3-compatible stores
    #[arg(long, env = "MCP_RELAY_ENDPOINT", value_name = "URL")]
    pub endpoint: Option<String>,

    /// Extra attempts for a failed upload [default: 3]
    #[arg(long, env = "MCP_RELAY_UPLOAD_RETRIES", value_name = "N")]
    pub upload_retries: Option<u32>,
}

impl StorageArgs {
    /// The flags as a configuration layer.
    #[must_use]
    pub fn overrides(&self) -> StorageOverrides {
        StorageOverrides {
            backend: self.backend,
            bucket: self.bucket.clone(),
            prefix: self.prefix.clone(),
            credentials: self.credentials.clone(),
            endpoint: self.endpoint.clone(),
            upload_retries: self.upload_retries,
        }
    }
}

/// Arguments for the `client` command
#[derive(Parser, Debug, Clone, Default)]
pub struct ClientArgs {
    /// Storage location
    #[command(flatten)]
    pub storage: StorageArgs,

    /// Delay between response checks, in milliseconds [default: 250]
    #[arg(long, env = "MCP_RELAY_POLL_INTERVAL_MS", value_name = "MS")]
    pub poll_interval_ms: Option<u64>,

    /// How long to wait for each response, in milliseconds [default: 30000]
    #[arg(long, env = "MCP_RELAY_TIMEOUT_MS", value_name = "MS")]
    pub timeout_ms: Option<u64>,
}

impl ClientArgs {
    /// The client flags as a configuration layer.
    #[must_use]
    pub fn overrides(&self) -> ClientOverrides {
        ClientOverrides {
            poll_interval_ms: self.poll_interval_ms,
            timeout_ms: self.timeout_ms,
        }
    }
}

/// Arguments for the `server` command
#[derive(Parser, Debug, Clone, Default)]
pub struct ServerArgs {
    /// Storage location
    #[command(flatten)]
    pub storage: StorageArgs,

    /// URL of an MCP server reachable over HTTP
    #[arg(long, env = "MCP_RELAY_MCP_URL", value_name = "URL")]
    pub mcp_url: Option<String>,

    /// Command line of an MCP server to spawn (shell quoting applies)
    #[arg(long, env = "MCP_RELAY_COMMAND", value_name = "CMD")]
    pub command: Option<String>,

    /// Delay between request listings, in milliseconds [default: 500]
    #[arg(long, env = "MCP_RELAY_POLL_INTERVAL_MS", value_name = "MS")]
    pub poll_interval_ms: Option<u64>,

    /// Per-request timeout for a spawned server, in milliseconds [default: 30000]
    #[arg(long, env = "MCP_RELAY_DISPATCH_TIMEOUT_MS", value_name = "MS")]
    pub dispatch_timeout_ms: Option<u64>,

    /// Per-request timeout for an HTTP server, in milliseconds [default: 30000]
    #[arg(long, env = "MCP_RELAY_HTTP_TIMEOUT_MS", value_name = "MS")]
    pub http_timeout_ms: Option<u64>,

    /// MCP server command and arguments, after `--`
    #[arg(last = true, value_name = "CMD")]
    pub program: Vec<String>,
}

impl ServerArgs {
    /// The server flags as a configuration layer.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if both `--command` and a trailing command are
    /// given, or if `--command` has unbalanced quotes.
    pub fn overrides(&self) -> Result<ServerOverrides> {
        let command = match (&self.command, self.program.is_empty()) {
            (Some(_), false) => {
                return Err(Error::Config(
                    "give the downstream command either with --command or after --, not both"
                        .to_string(),
                ));
            }
            (Some(line), true) => Some(config::split_command(line)?),
            (None, false) => Some(self.program.clone()),
            (None, true) => None,
        };
        Ok(ServerOverrides {
            mcp_url: self.mcp_url.clone(),
            command,
            poll_interval_ms: self.poll_interval_ms,
            dispatch_timeout_ms: self.dispatch_timeout_ms,
            http_timeout_ms: self.http_timeout_ms,
        })
    }
}
