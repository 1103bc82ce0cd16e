//! Configuration for both bridges.
//!
//! Values come from three layers, highest precedence first:
//!
//! 1. Command-line flags and their `MCP_RELAY_*` environment equivalents
//! 2. An optional YAML file (`--config`)
//! 3. Built-in defaults
//!
//! Resolution turns the layers into [`ClientSettings`] or [`ServerSettings`],
//! validated before any storage or process I/O happens.
//!
//! ```yaml
//! backend: gcs
//! bucket: my-relay-bucket
//! prefix: mcp-relay
//! upload_retries: 3
//! client:
//!   poll_interval_ms: 250
//!   timeout_ms: 30000
//! server:
//!   poll_interval_ms: 500
//!   command: ["npx", "-y", "some-mcp-server"]
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tokio::fs;

use crate::client::ClientOptions;
use crate::downstream::DownstreamTarget;
use crate::error::{Error, Result};
use crate::protocol::keys::DEFAULT_PREFIX;
use crate::server::ServerOptions;
use crate::storage::StorageBackend;

/// Default number of extra upload attempts.
pub const DEFAULT_UPLOAD_RETRIES: u32 = 3;
/// Default client poll interval.
pub const DEFAULT_CLIENT_POLL_INTERVAL_MS: u64 = 250;
/// Default client response timeout.
pub const DEFAULT_CLIENT_TIMEOUT_MS: u64 = 30_000;
/// Default server poll interval.
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 500;
/// Default subprocess dispatch timeout.
pub const DEFAULT_DISPATCH_TIMEOUT_MS: u64 = 30_000;
/// Default HTTP downstream timeout.
pub const DEFAULT_HTTP_TIMEOUT_MS: u64 = 30_000;

/// Storage backend kind, as named on the command line and in config files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Google Cloud Storage.
    #[default]
    Gcs,
    /// Amazon S3 or S3-compatible.
    S3,
    /// Local directory.
    Local,
}

/// Contents of a YAML config file. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    /// Storage backend.
    pub backend: Option<BackendKind>,
    /// Bucket name (or root directory for `local`).
    pub bucket: Option<String>,
    /// Key prefix.
    pub prefix: Option<String>,
    /// GCS service account key file.
    pub credentials: Option<PathBuf>,
    /// S3-compatible endpoint URL.
    pub endpoint: Option<String>,
    /// Extra upload attempts.
    pub upload_retries: Option<u32>,
    /// Client bridge section.
    pub client: ClientFileConfig,
    /// Server bridge section.
    pub server: ServerFileConfig,
}

/// `client:` section of the config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientFileConfig {
    /// Response poll interval in milliseconds.
    pub poll_interval_ms: Option<u64>,
    /// Response timeout in milliseconds.
    pub timeout_ms: Option<u64>,
}

/// `server:` section of the config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerFileConfig {
    /// Request poll interval in milliseconds.
    pub poll_interval_ms: Option<u64>,
    /// Subprocess dispatch timeout in milliseconds.
    pub dispatch_timeout_ms: Option<u64>,
    /// HTTP downstream timeout in milliseconds.
    pub http_timeout_ms: Option<u64>,
    /// HTTP downstream URL.
    pub mcp_url: Option<String>,
    /// Downstream command and arguments.
    pub command: Option<Vec<String>>,
}

impl FileConfig {
    /// Load a config file.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the file cannot be read, or `Error::Config` if
    /// it is not valid YAML for this schema.
    pub async fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).await?;
        serde_yaml::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }
}

/// Storage flags shared by both subcommands.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageOverrides {
    /// `--backend`
    pub backend: Option<BackendKind>,
    /// `--bucket`
    pub bucket: Option<String>,
    /// `--prefix`
    pub prefix: Option<String>,
    /// `--credentials`
    pub credentials: Option<PathBuf>,
    /// `--endpoint`
    pub endpoint: Option<String>,
    /// `--upload-retries`
    pub upload_retries: Option<u32>,
}

/// Client subcommand flags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientOverrides {
    /// `--poll-interval-ms`
    pub poll_interval_ms: Option<u64>,
    /// `--timeout-ms`
    pub timeout_ms: Option<u64>,
}

/// Server subcommand flags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerOverrides {
    /// `--mcp-url`
    pub mcp_url: Option<String>,
    /// `--command`, already split into words, or the trailing `-- cmd args`.
    pub command: Option<Vec<String>>,
    /// `--poll-interval-ms`
    pub poll_interval_ms: Option<u64>,
    /// `--dispatch-timeout-ms`
    pub dispatch_timeout_ms: Option<u64>,
    /// `--http-timeout-ms`
    pub http_timeout_ms: Option<u64>,
}

/// Resolved storage location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageSettings {
    /// Backend and bucket.
    pub backend: StorageBackend,
    /// Key prefix.
    pub prefix: String,
}

/// Everything the client bridge needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    /// Where to tunnel.
    pub storage: StorageSettings,
    /// Timing and retries.
    pub options: ClientOptions,
}

/// Everything the server bridge needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// Where to tunnel.
    pub storage: StorageSettings,
    /// Downstream MCP server.
    pub target: DownstreamTarget,
    /// Timing and retries.
    pub options: ServerOptions,
    /// Per-call subprocess timeout.
    pub dispatch_timeout: Duration,
    /// Per-exchange HTTP timeout.
    pub http_timeout: Duration,
}

/// Resolve client settings from flags and an optional file.
///
/// # Errors
///
/// Returns `Error::Config` if no bucket is configured or a duration is zero.
pub fn resolve_client(
    file: &FileConfig,
    storage: &StorageOverrides,
    client: &ClientOverrides,
) -> Result<ClientSettings> {
    let options = ClientOptions {
        poll_interval: millis(
            "poll interval",
            client.poll_interval_ms,
            file.client.poll_interval_ms,
            DEFAULT_CLIENT_POLL_INTERVAL_MS,
        )?,
        timeout: millis(
            "timeout",
            client.timeout_ms,
            file.client.timeout_ms,
            DEFAULT_CLIENT_TIMEOUT_MS,
        )?,
        upload_retries: upload_retries(file, storage),
    };
    Ok(ClientSettings {
        storage: resolve_storage(file, storage)?,
        options,
    })
}

/// Resolve server settings from flags and an optional file.
///
/// A downstream given on the command line (or environment) replaces the
/// file's downstream entirely; within one layer, naming both a URL and a
/// command is an error.
///
/// # Errors
///
/// Returns `Error::Config` if no bucket is configured, if no downstream is
/// configured, if both are, if the command is empty, or if a duration is
/// zero.
pub fn resolve_server(
    file: &FileConfig,
    storage: &StorageOverrides,
    server: &ServerOverrides,
) -> Result<ServerSettings> {
    let storage_settings = resolve_storage(file, storage)?;

    let target = if server.mcp_url.is_some() || server.command.is_some() {
        downstream_target(server.mcp_url.clone(), server.command.clone(), "command line")?
    } else {
        downstream_target(
            file.server.mcp_url.clone(),
            file.server.command.clone(),
            "config file",
        )?
    };

    Ok(ServerSettings {
        storage: storage_settings,
        target,
        options: ServerOptions {
            poll_interval: millis(
                "poll interval",
                server.poll_interval_ms,
                file.server.poll_interval_ms,
                DEFAULT_SERVER_POLL_INTERVAL_MS,
            )?,
            upload_retries: upload_retries(file, storage),
        },
        dispatch_timeout: millis(
            "dispatch timeout",
            server.dispatch_timeout_ms,
            file.server.dispatch_timeout_ms,
            DEFAULT_DISPATCH_TIMEOUT_MS,
        )?,
        http_timeout: millis(
            "HTTP timeout",
            server.http_timeout_ms,
            file.server.http_timeout_ms,
            DEFAULT_HTTP_TIMEOUT_MS,
        )?,
    })
}

/// Split a `--command` string into words using shell quoting rules.
///
/// # Errors
///
/// Returns `Error::Config` for unbalanced quotes.
pub fn split_command(line: &str) -> Result<Vec<String>> {
    shlex::split(line)
        .ok_or_else(|| Error::Config(format!("cannot parse command line: {line}")))
}

fn resolve_storage(file: &FileConfig, overrides: &StorageOverrides) -> Result<StorageSettings> {
    let bucket = overrides
        .bucket
        .clone()
        .or_else(|| file.bucket.clone())
        .filter(|b| !b.trim().is_empty())
        .ok_or_else(|| {
            Error::Config("a bucket is required (--bucket or MCP_RELAY_BUCKET)".to_string())
        })?;

    let backend = match overrides.backend.or(file.backend).unwrap_or_default() {
        BackendKind::Gcs => StorageBackend::Gcs {
            bucket,
            credentials: overrides
                .credentials
                .clone()
                .or_else(|| file.credentials.clone()),
        },
        BackendKind::S3 => StorageBackend::S3 {
            bucket,
            endpoint: overrides.endpoint.clone().or_else(|| file.endpoint.clone()),
        },
        BackendKind::Local => StorageBackend::Local {
            root: PathBuf::from(bucket),
        },
    };

    let prefix = overrides
        .prefix
        .clone()
        .or_else(|| file.prefix.clone())
        .unwrap_or_else(|| DEFAULT_PREFIX.to_string());

    Ok(StorageSettings { backend, prefix })
}

fn downstream_target(
    url: Option<String>,
    command: Option<Vec<String>>,
    source: &str,
) -> Result<DownstreamTarget> {
    match (url, command) {
        (Some(_), Some(_)) => Err(Error::Config(format!(
            "both an MCP URL and a command are set in the {source}; choose one"
        ))),
        (Some(url), None) => Ok(DownstreamTarget::Http { url }),
        (None, Some(command)) => {
            let mut words = command.into_iter();
            let program = words
                .next()
                .filter(|p| !p.is_empty())
                .ok_or_else(|| Error::Config("the downstream command is empty".to_string()))?;
            Ok(DownstreamTarget::Command {
                program,
                args: words.collect(),
            })
        }
        (None, None) => Err(Error::Config(
            "a downstream is required (--mcp-url or --command)".to_string(),
        )),
    }
}

fn upload_retries(file: &FileConfig, overrides: &StorageOverrides) -> u32 {
    overrides
        .upload_retries
        .or(file.upload_retries)
        .unwrap_or(DEFAULT_UPLOAD_RETRIES)
}

fn millis(name: &str, flag: Option<u64>, file: Option<u64>, default: u64) -> Result<Duration> {
    match flag.or(file).unwrap_or(default) {
        0 => Err(Error::Config(format!("the {name} must be greater than zero"))),
        ms => Ok(Duration::from_millis(ms)),
    }
}
