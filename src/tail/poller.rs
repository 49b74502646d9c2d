// ABOUTME: Poller for the tailer - drives fetch, format, append and checkpoint cycles
// ABOUTME: Runs cycles at a fixed interval until a shutdown signal arrives between cycles

//! The poller owns the in-memory watermark and is the only writer of both the
//! sink and the checkpoint.
//!
//! Every non-empty batch is appended to the sink first and checkpointed
//! second. A crash between the two leaves the sink ahead of the checkpoint,
//! and the next start re-fetches and re-appends that batch. Delivery is
//! therefore at-least-once: duplicates are possible after a crash, gaps are
//! not. Saving the checkpoint before appending would turn this into
//! at-most-once with gaps, so the order must stay as it is.

use anyhow::{Context, Result};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;

use super::checkpoint::CheckpointStore;
use super::formatter::format_record;
use super::reader::LogSource;
use super::record::Watermark;
use super::sink::LogSink;

/// Configuration for the [`Poller`].
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Pause between the end of one cycle and the start of the next
    pub poll_interval: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
        }
    }
}

/// Lifecycle of a [`Poller`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// Outcome of a single cycle.
#[derive(Debug, Clone, Default)]
pub struct CycleStats {
    /// Records appended to the sink
    pub records: usize,
    /// Watermark at the start of the cycle
    pub from: Watermark,
    /// Watermark at the end of the cycle (equal to `from` when idle)
    pub to: Watermark,
    pub duration_ms: u64,
}

impl CycleStats {
    pub fn is_idle(&self) -> bool {
        self.records == 0
    }
}

/// Copies new records from a [`LogSource`] into a [`LogSink`], tracking
/// progress in a [`CheckpointStore`].
pub struct Poller<S, K, C> {
    source: S,
    sink: K,
    checkpoint: C,
    config: PollerConfig,
    watermark: Watermark,
    state: PollerState,
    cycles: u64,
}

impl<S, K, C> Poller<S, K, C>
where
    S: LogSource,
    K: LogSink,
    C: CheckpointStore,
{
    /// Load the watermark from `checkpoint` and return a running poller.
    pub async fn start(source: S, sink: K, checkpoint: C, config: PollerConfig) -> Result<Self> {
        let mut poller = Self {
            source,
            sink,
            checkpoint,
            config,
            watermark: Watermark::EPOCH,
            state: PollerState::Starting,
            cycles: 0,
        };

        poller.watermark = poller
            .checkpoint
            .load()
            .await
            .context("Failed to load checkpoint")?;
        poller.state = PollerState::Running;
        tracing::info!("Poller starting from watermark {}", poller.watermark);
        Ok(poller)
    }

    pub fn state(&self) -> PollerState {
        self.state
    }

    /// In-memory watermark. Matches the stored checkpoint between cycles.
    pub fn watermark(&self) -> Watermark {
        self.watermark
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    pub fn checkpoint(&self) -> &C {
        &self.checkpoint
    }

    /// Release the components, for example to hand the source connection back.
    pub fn into_parts(self) -> (S, K, C) {
        (self.source, self.sink, self.checkpoint)
    }

    /// Run one fetch/append/checkpoint cycle.
    ///
    /// An empty batch touches neither the sink nor the checkpoint. Any error
    /// leaves the stored checkpoint at its previous value.
    pub async fn run_cycle(&mut self) -> Result<CycleStats> {
        let start = Instant::now();
        self.cycles += 1;
        let from = self.watermark;

        let batch = self.source.fetch_since(from).await?;
        if batch.is_empty() {
            tracing::debug!("No new records since {}", from);
            return Ok(CycleStats {
                records: 0,
                from,
                to: from,
                duration_ms: elapsed_ms(start),
            });
        }

        let lines: Vec<String> = batch.iter().map(format_record).collect();
        self.sink
            .append(&lines)
            .await
            .with_context(|| format!("Failed to append {} records", lines.len()))?;

        let mut next = from;
        for record in &batch {
            if record.timestamp < next.as_datetime() {
                tracing::warn!(
                    "Record {} at {} arrived out of order (watermark {})",
                    record.id,
                    record.timestamp,
                    next
                );
            }
            next.advance(record.timestamp);
        }
        self.watermark = next;

        self.checkpoint
            .save(next)
            .await
            .with_context(|| format!("Failed to save checkpoint {}", next))?;

        let stats = CycleStats {
            records: batch.len(),
            from,
            to: next,
            duration_ms: elapsed_ms(start),
        };
        tracing::info!(
            "Appended {} records (watermark {} -> {}) in {}ms",
            stats.records,
            stats.from,
            stats.to,
            stats.duration_ms
        );
        Ok(stats)
    }

    /// Run cycles until `shutdown` fires or a cycle fails.
    ///
    /// The signal is only observed between cycles: a cycle that has started
    /// always finishes, including its checkpoint save. The sleep between
    /// cycles is cut short by the signal.
    pub async fn run(&mut self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        tracing::info!(
            "Polling every {:?} from watermark {}",
            self.config.poll_interval,
            self.watermark
        );

        loop {
            match shutdown.try_recv() {
                Err(TryRecvError::Empty) => {}
                _ => break,
            }

            if let Err(e) = self.run_cycle().await {
                self.state = PollerState::Stopped;
                return Err(e.context(format!("Cycle {} failed", self.cycles)));
            }

            tokio::select! {
                biased;
                _ = shutdown.recv() => break,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        self.state = PollerState::Stopping;
        tracing::info!("Shutdown signal received, stopping poller");
        self.state = PollerState::Stopped;
        tracing::info!(
            "Poller stopped after {} cycles at watermark {}",
            self.cycles,
            self.watermark
        );
        Ok(())
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    millis(start.elapsed())
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
