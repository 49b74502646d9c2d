// ABOUTME: Library root for pg-log-tail
// ABOUTME: Exposes the tailer core, configuration, PostgreSQL plumbing and CLI commands

pub mod commands;
pub mod config;
pub mod postgres;
pub mod tail;
pub mod utils;
