// ABOUTME: Checkpointed tailing of a PostgreSQL log table into an append-only file
// ABOUTME: Reader -> formatter -> sink, driven by the poller and tracked by a checkpoint

pub mod checkpoint;
pub mod formatter;
pub mod poller;
pub mod reader;
pub mod record;
pub mod sink;

pub use checkpoint::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
pub use formatter::{format_record, parse_line, LineParseError, ParsedLine};
pub use poller::{CycleStats, Poller, PollerConfig, PollerState};
pub use reader::{build_fetch_query, LogSource, PgLogReader};
pub use record::{LogRecord, Watermark};
pub use sink::{FileSink, LogSink};
