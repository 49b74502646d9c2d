// ABOUTME: CLI entry point for pg-log-tail
// ABOUTME: Parses commands, resolves configuration and routes to command handlers

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use pg_log_tail::commands;
use pg_log_tail::config::{load_config_file, TailConfig};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "pg-log-tail")]
#[command(about = "Tail a PostgreSQL log table into an append-only log file", long_about = None)]
#[command(version)]
struct Cli {
    /// Set the log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log: String,
    /// Path to a TOML file with tailer settings
    #[arg(long = "config", env = "TAIL_CONFIG", global = true)]
    config_path: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone, Default)]
struct TailArgs {
    /// Schema containing the log table [default: public]
    #[arg(long, env = "TAIL_SCHEMA")]
    schema: Option<String>,
    /// Log table to tail [default: log]
    #[arg(long, env = "TAIL_TABLE")]
    table: Option<String>,
    /// File that receives formatted log lines [default: logs/app.log]
    #[arg(long = "sink", env = "TAIL_SINK_PATH")]
    sink_path: Option<PathBuf>,
    /// File holding the last emitted timestamp [default: last_timestamp.state]
    #[arg(long = "checkpoint", env = "TAIL_CHECKPOINT_PATH")]
    checkpoint_path: Option<PathBuf>,
    /// Pause between polls in milliseconds [default: 2000]
    #[arg(long, env = "TAIL_POLL_INTERVAL_MS")]
    poll_interval_ms: Option<u64>,
    /// Per-query timeout in seconds [default: 30]
    #[arg(long, env = "TAIL_QUERY_TIMEOUT_SECS")]
    query_timeout_secs: Option<u64>,
}

impl TailArgs {
    fn apply(self, config: &mut TailConfig) {
        if let Some(schema) = self.schema {
            config.schema = schema;
        }
        if let Some(table) = self.table {
            config.table = table;
        }
        if let Some(path) = self.sink_path {
            config.sink_path = path;
        }
        if let Some(path) = self.checkpoint_path {
            config.checkpoint_path = path;
        }
        if let Some(ms) = self.poll_interval_ms {
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(secs) = self.query_timeout_secs {
            config.query_timeout = Duration::from_secs(secs);
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Poll the log table and append new rows to the sink file
    ///
    /// Connection settings are read from PG_URL, or from PG_HOST, PG_PORT,
    /// PG_DB, PG_USER and PG_PASSWORD. PG_SSLMODE is optional.
    Run {
        #[command(flatten)]
        tail: TailArgs,
        /// Run a single cycle and exit (don't poll continuously)
        #[arg(long)]
        once: bool,
        /// Allow self-signed TLS certificates (insecure - use only for testing)
        #[arg(long = "allow-self-signed-certs", default_value_t = false)]
        allow_self_signed_certs: bool,
    },
    /// Inspect or move the stored checkpoint
    Checkpoint {
        /// File holding the last emitted timestamp [default: last_timestamp.state]
        #[arg(long = "checkpoint", env = "TAIL_CHECKPOINT_PATH")]
        checkpoint_path: Option<PathBuf>,
        #[command(flatten)]
        args: commands::checkpoint::CheckpointArgs,
    },
    /// Decode a sink file into JSON lines, with messages unescaped
    Decode {
        /// Sink file to decode
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    // 1. RUST_LOG environment variable has highest precedence
    // 2. --log flag is used if RUST_LOG is not set
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log.clone()));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let mut config = TailConfig::default();
    if let Some(path) = &cli.config_path {
        config.merge_file(load_config_file(path)?);
    }

    match cli.command {
        Commands::Run {
            tail,
            once,
            allow_self_signed_certs,
        } => {
            tail.apply(&mut config);
            commands::run(commands::RunOptions {
                tail: config,
                once,
                allow_self_signed_certs,
            })
            .await
        }
        Commands::Checkpoint {
            checkpoint_path,
            args,
        } => {
            let path = checkpoint_path.unwrap_or(config.checkpoint_path);
            commands::checkpoint::command(args, &path).await
        }
        Commands::Decode { path } => commands::decode(&path)
            .map(|count| tracing::info!("Decoded {} lines", count))
            .context("Failed to decode sink file"),
    }
}
