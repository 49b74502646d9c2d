// ABOUTME: `run` command - connects to PostgreSQL and tails the log table into the sink
// ABOUTME: Runs a single cycle with --once, otherwise polls until SIGINT/SIGTERM

use anyhow::Result;
use tokio::sync::broadcast;

use crate::config::{ConnectionConfig, TailConfig};
use crate::postgres::{check_log_table, connect, SourceConnection};
use crate::tail::{FileCheckpointStore, FileSink, PgLogReader, Poller, PollerConfig};

pub struct RunOptions {
    pub tail: TailConfig,
    /// Run one cycle and exit
    pub once: bool,
    pub allow_self_signed_certs: bool,
}

/// Tail the configured log table.
///
/// Connection settings come from the environment and are required. The
/// connection is released on every exit path, including errors.
pub async fn run(opts: RunOptions) -> Result<()> {
    opts.tail.validate()?;
    let connection_config = ConnectionConfig::from_env()?;

    let connection = connect(&connection_config, opts.allow_self_signed_certs).await?;
    let result = tail(&connection, &opts).await;
    connection.close().await;
    result
}

async fn tail(connection: &SourceConnection, opts: &RunOptions) -> Result<()> {
    let config = &opts.tail;
    let qualified_table = format!("{}.{}", config.schema, config.table);

    check_log_table(connection.client(), &config.schema, &config.table)
        .await?
        .ensure_usable(&qualified_table)?;

    let reader = PgLogReader::new(
        connection.client(),
        &config.schema,
        &config.table,
        config.query_timeout,
    )?;
    let sink = FileSink::new(&config.sink_path);
    let checkpoint = FileCheckpointStore::new(&config.checkpoint_path);

    tracing::info!("Source table: {}", qualified_table);
    tracing::info!("Sink file: {:?}", config.sink_path);
    tracing::info!("Checkpoint file: {:?}", config.checkpoint_path);

    let mut poller = Poller::start(
        reader,
        sink,
        checkpoint,
        PollerConfig {
            poll_interval: config.poll_interval,
        },
    )
    .await?;

    if opts.once {
        tracing::info!("Running single cycle...");
        let stats = poller.run_cycle().await?;

        println!();
        println!("========================================");
        println!("Tail cycle complete");
        println!("========================================");
        println!("  Records appended: {}", stats.records);
        println!("  Watermark: {} -> {}", stats.from, stats.to);
        println!("  Duration: {}ms", stats.duration_ms);
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);
    spawn_signal_listener(shutdown_tx)?;

    println!();
    println!("========================================");
    println!("Tailing {} into {:?}", qualified_table, config.sink_path);
    println!("========================================");
    println!("  Poll interval: {:?}", config.poll_interval);
    println!("  Press Ctrl+C to stop");
    println!();

    poller.run(shutdown_rx).await?;

    println!("Tailer stopped at watermark {}", poller.watermark());
    Ok(())
}

/// Send on `shutdown_tx` when SIGINT (or SIGTERM on Unix) arrives.
///
/// Handlers are registered before returning. A registration failure is an
/// error for the caller and never turns into a shutdown.
fn spawn_signal_listener(shutdown_tx: broadcast::Sender<()>) -> Result<()> {
    #[cfg(unix)]
    {
        use anyhow::Context;
        use tokio::signal::unix::{signal, SignalKind};

        let mut interrupt =
            signal(SignalKind::interrupt()).context("Failed to listen for SIGINT")?;
        let mut terminate =
            signal(SignalKind::terminate()).context("Failed to listen for SIGTERM")?;

        tokio::spawn(async move {
            tokio::select! {
                _ = interrupt.recv() => tracing::info!("Received SIGINT"),
                _ = terminate.recv() => tracing::info!("Received SIGTERM"),
            }
            let _ = shutdown_tx.send(());
        });
    }

    #[cfg(not(unix))]
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Received Ctrl+C");
                let _ = shutdown_tx.send(());
            }
            Err(e) => tracing::error!("Failed to listen for Ctrl+C: {}", e),
        }
    });

    Ok(())
}
