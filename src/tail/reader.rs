// ABOUTME: Source readers for the tailer - fetch log rows newer than a watermark
// ABOUTME: PgLogReader queries a PostgreSQL log table with a strict > timestamp predicate

use anyhow::{Context, Result};
use std::time::Duration;
use tokio_postgres::Client;

use super::record::{LogRecord, Watermark};
use crate::utils::{quote_ident, validate_postgres_identifier};

/// Producer of log records.
#[allow(async_fn_in_trait)]
pub trait LogSource {
    /// Return every record with `timestamp > watermark`, oldest first.
    ///
    /// An empty vector means there is nothing new. Errors are not retried.
    async fn fetch_since(&self, watermark: Watermark) -> Result<Vec<LogRecord>>;
}

/// Reads log rows from a PostgreSQL table.
///
/// The table must expose `id`, `level`, `message` and a `timestamp` column of
/// type `timestamptz`. Rows are ordered by timestamp, then by id so that rows
/// sharing a timestamp always come back in the same order.
///
/// The comparison is strictly greater-than. A row inserted later with a
/// timestamp equal to the current watermark is never picked up.
pub struct PgLogReader<'a> {
    client: &'a Client,
    qualified_table: String,
    query: String,
    query_timeout: Duration,
}

impl<'a> PgLogReader<'a> {
    /// Create a reader for `schema.table`.
    ///
    /// Both names are validated as plain PostgreSQL identifiers.
    pub fn new(
        client: &'a Client,
        schema: &str,
        table: &str,
        query_timeout: Duration,
    ) -> Result<Self> {
        validate_postgres_identifier(schema)
            .with_context(|| format!("Invalid schema name {:?}", schema))?;
        validate_postgres_identifier(table)
            .with_context(|| format!("Invalid table name {:?}", table))?;

        Ok(Self {
            client,
            qualified_table: format!("{}.{}", schema, table),
            query: build_fetch_query(schema, table),
            query_timeout,
        })
    }
}

impl LogSource for PgLogReader<'_> {
    async fn fetch_since(&self, watermark: Watermark) -> Result<Vec<LogRecord>> {
        let since = watermark.as_datetime();
        let rows = tokio::time::timeout(
            self.query_timeout,
            self.client.query(&self.query, &[&since]),
        )
        .await
        .map_err(|_| {
            anyhow::anyhow!(
                "Query on {} timed out after {:?}",
                self.qualified_table,
                self.query_timeout
            )
        })?
        .with_context(|| {
            format!(
                "Failed to read rows from {} since {}",
                self.qualified_table, watermark
            )
        })?;

        rows.iter()
            .map(LogRecord::from_row)
            .collect::<Result<Vec<_>>>()
            .with_context(|| format!("Malformed row in {}", self.qualified_table))
    }
}

/// SQL used to fetch rows newer than `$1`.
///
/// Assumes `schema` and `table` have already been validated.
pub fn build_fetch_query(schema: &str, table: &str) -> String {
    format!(
        "SELECT id, level, message, \"timestamp\" FROM {}.{} \
         WHERE \"timestamp\" > $1 \
         ORDER BY \"timestamp\" ASC, id ASC",
        quote_ident(schema),
        quote_ident(table)
    )
}
