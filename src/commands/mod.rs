// ABOUTME: Command implementations for the pg-log-tail CLI
// ABOUTME: Exports run, checkpoint and decode commands

pub mod checkpoint;
pub mod decode;
pub mod run;

pub use decode::decode;
pub use run::{run, RunOptions};
