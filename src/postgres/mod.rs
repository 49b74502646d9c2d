// ABOUTME: PostgreSQL plumbing for the tailer
// ABOUTME: Connection setup with TLS and startup checks on the source log table

pub mod connection;
pub mod preflight;

pub use connection::{connect, SourceConnection};
pub use preflight::{check_log_table, LogTableCheck};
