// ABOUTME: Configuration for the tailer - PostgreSQL connection and polling settings
// ABOUTME: Connection comes from PG_* environment variables, tailer settings from TOML + CLI

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tokio_postgres::config::{Host, SslMode};

use crate::tail::{FileCheckpointStore, FileSink};
use crate::utils::{validate_connection_string, validate_postgres_identifier};

/// Environment variables that together describe a connection when `PG_URL` is unset.
pub const CONNECTION_ENV_VARS: [&str; 5] = ["PG_HOST", "PG_PORT", "PG_DB", "PG_USER", "PG_PASSWORD"];

const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// How to reach the source database.
///
/// Nothing here has a default value: a connection without explicit
/// configuration is refused rather than guessed.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    config: tokio_postgres::Config,
}

impl ConnectionConfig {
    /// Read the connection from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the connection through `lookup`.
    ///
    /// `PG_URL` takes precedence. Otherwise every variable in
    /// [`CONNECTION_ENV_VARS`] must be set, and the error names all missing ones.
    /// `PG_SSLMODE` and `PG_CONNECT_TIMEOUT_SECS` are optional.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let mut config = if let Some(url) = get("PG_URL") {
            Self::parse_url(&url)?
        } else {
            let missing: Vec<&str> = CONNECTION_ENV_VARS
                .iter()
                .copied()
                .filter(|key| get(key).is_none())
                .collect();
            if !missing.is_empty() {
                bail!(
                    "Missing connection configuration: {}.\n\
                     Set PG_URL, or all of {}",
                    missing.join(", "),
                    CONNECTION_ENV_VARS.join(", ")
                );
            }

            let port = get("PG_PORT")
                .unwrap_or_default()
                .trim()
                .parse::<u16>()
                .context("PG_PORT must be a port number")?;

            let mut config = tokio_postgres::Config::new();
            config
                .host(get("PG_HOST").unwrap_or_default().trim())
                .port(port)
                .dbname(get("PG_DB").unwrap_or_default().trim())
                .user(get("PG_USER").unwrap_or_default().trim())
                .password(get("PG_PASSWORD").unwrap_or_default());
            config
        };

        if let Some(mode) = get("PG_SSLMODE") {
            config.ssl_mode(parse_ssl_mode(&mode)?);
        }

        let connect_timeout = match get("PG_CONNECT_TIMEOUT_SECS") {
            Some(secs) => secs
                .trim()
                .parse::<u64>()
                .context("PG_CONNECT_TIMEOUT_SECS must be a whole number of seconds")?,
            None => DEFAULT_CONNECT_TIMEOUT_SECS,
        };
        config.connect_timeout(Duration::from_secs(connect_timeout));

        Ok(Self { config })
    }

    fn parse_url(url: &str) -> Result<tokio_postgres::Config> {
        validate_connection_string(url).context("Invalid PG_URL")?;
        tokio_postgres::Config::from_str(url).context("Failed to parse PG_URL")
    }

    pub fn pg_config(&self) -> &tokio_postgres::Config {
        &self.config
    }

    pub fn ssl_mode(&self) -> SslMode {
        self.config.get_ssl_mode()
    }

    /// Connection target without the password, for logs: `user@host:port/db`.
    pub fn describe(&self) -> String {
        let host = match self.config.get_hosts().first() {
            Some(Host::Tcp(host)) => host.clone(),
            #[cfg(unix)]
            Some(Host::Unix(path)) => path.display().to_string(),
            None => "localhost".to_string(),
        };
        let port = self.config.get_ports().first().copied().unwrap_or(5432);
        let user = self.config.get_user().unwrap_or("");
        let dbname = self.config.get_dbname().unwrap_or("");
        format!("{}@{}:{}/{}", user, host, port, dbname)
    }
}

/// Parse a libpq-style `sslmode` value.
pub fn parse_ssl_mode(value: &str) -> Result<SslMode> {
    match value.trim().to_ascii_lowercase().as_str() {
        "disable" => Ok(SslMode::Disable),
        "prefer" => Ok(SslMode::Prefer),
        "require" => Ok(SslMode::Require),
        other => bail!(
            "Unsupported sslmode '{}'. Expected disable, prefer or require",
            other
        ),
    }
}

/// Settings read from an optional TOML file.
///
/// ```toml
/// schema = "public"
/// table = "log"
/// sink_path = "logs/app.log"
/// checkpoint_path = "last_timestamp.state"
/// poll_interval_ms = 2000
/// query_timeout_secs = 30
/// ```
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub schema: Option<String>,
    pub table: Option<String>,
    pub sink_path: Option<PathBuf>,
    pub checkpoint_path: Option<PathBuf>,
    pub poll_interval_ms: Option<u64>,
    pub query_timeout_secs: Option<u64>,
}

/// Load tailer settings from a TOML file.
pub fn load_config_file(path: impl AsRef<Path>) -> Result<FileConfig> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {:?}", path))?;
    parse_config(&contents).with_context(|| format!("Failed to parse config file {:?}", path))
}

/// Parse tailer settings from TOML text.
pub fn parse_config(contents: &str) -> Result<FileConfig> {
    toml::from_str(contents).context("Invalid tailer configuration")
}

/// Resolved tailer settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TailConfig {
    pub schema: String,
    pub table: String,
    pub sink_path: PathBuf,
    pub checkpoint_path: PathBuf,
    pub poll_interval: Duration,
    pub query_timeout: Duration,
}

impl Default for TailConfig {
    fn default() -> Self {
        Self {
            schema: "public".to_string(),
            table: "log".to_string(),
            sink_path: FileSink::default_path(),
            checkpoint_path: FileCheckpointStore::default_path(),
            poll_interval: Duration::from_secs(2),
            query_timeout: Duration::from_secs(30),
        }
    }
}

impl TailConfig {
    /// Overlay values present in `file` onto `self`.
    pub fn merge_file(&mut self, file: FileConfig) {
        if let Some(schema) = file.schema {
            self.schema = schema;
        }
        if let Some(table) = file.table {
            self.table = table;
        }
        if let Some(path) = file.sink_path {
            self.sink_path = path;
        }
        if let Some(path) = file.checkpoint_path {
            self.checkpoint_path = path;
        }
        if let Some(ms) = file.poll_interval_ms {
            self.poll_interval = Duration::from_millis(ms);
        }
        if let Some(secs) = file.query_timeout_secs {
            self.query_timeout = Duration::from_secs(secs);
        }
    }

    /// Reject settings that would make the tailer misbehave.
    pub fn validate(&self) -> Result<()> {
        validate_postgres_identifier(&self.schema)
            .with_context(|| format!("Invalid schema {:?}", self.schema))?;
        validate_postgres_identifier(&self.table)
            .with_context(|| format!("Invalid table {:?}", self.table))?;
        if self.poll_interval.is_zero() {
            bail!("Poll interval must be greater than zero");
        }
        if self.query_timeout.is_zero() {
            bail!("Query timeout must be greater than zero");
        }
        if self.sink_path == self.checkpoint_path {
            bail!(
                "Sink and checkpoint must be different files (both are {:?})",
                self.sink_path
            );
        }
        Ok(())
    }
}
