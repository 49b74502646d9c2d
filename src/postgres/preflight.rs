// ABOUTME: Startup checks for the source log table
// ABOUTME: Verifies the expected columns, the timestamptz type, and SELECT privilege

use anyhow::{bail, Context, Result};
use tokio_postgres::Client;

const REQUIRED_COLUMNS: [&str; 4] = ["id", "level", "message", "timestamp"];

/// What the tailer found out about the log table.
#[derive(Debug, Clone)]
pub struct LogTableCheck {
    /// `(column_name, data_type)` for every column, in table order
    pub columns: Vec<(String, String)>,
    /// Current user may SELECT from the table
    pub can_select: bool,
}

impl LogTableCheck {
    /// Required columns that are absent.
    pub fn missing_columns(&self) -> Vec<&'static str> {
        REQUIRED_COLUMNS
            .iter()
            .copied()
            .filter(|required| !self.columns.iter().any(|(name, _)| name == required))
            .collect()
    }

    /// Data type of `column`, if present.
    pub fn column_type(&self, column: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, data_type)| data_type.as_str())
    }

    /// Fail with a descriptive error if the table cannot be tailed.
    pub fn ensure_usable(&self, qualified_table: &str) -> Result<()> {
        if self.columns.is_empty() {
            bail!("Table {} does not exist", qualified_table);
        }

        let missing = self.missing_columns();
        if !missing.is_empty() {
            bail!(
                "Table {} is missing required columns: {}",
                qualified_table,
                missing.join(", ")
            );
        }

        let timestamp_type = self.column_type("timestamp").unwrap_or_default();
        if timestamp_type != "timestamp with time zone" {
            bail!(
                "Column {}.timestamp must be timestamp with time zone, found {}",
                qualified_table,
                timestamp_type
            );
        }

        if !self.can_select {
            bail!("Current user lacks SELECT privilege on {}", qualified_table);
        }

        Ok(())
    }
}

/// Inspect `schema.table` in `information_schema` and the privilege catalog.
///
/// # Examples
///
/// ```no_run
/// # use anyhow::Result;
/// # use pg_log_tail::postgres::check_log_table;
/// # async fn example(client: &tokio_postgres::Client) -> Result<()> {
/// let check = check_log_table(client, "public", "log").await?;
/// check.ensure_usable("public.log")?;
/// # Ok(())
/// # }
/// ```
pub async fn check_log_table(client: &Client, schema: &str, table: &str) -> Result<LogTableCheck> {
    let rows = client
        .query(
            "SELECT column_name, data_type
             FROM information_schema.columns
             WHERE table_schema = $1 AND table_name = $2
             ORDER BY ordinal_position",
            &[&schema, &table],
        )
        .await
        .with_context(|| format!("Failed to get columns for {}.{}", schema, table))?;

    let columns: Vec<(String, String)> = rows.iter().map(|row| (row.get(0), row.get(1))).collect();

    let can_select = if columns.is_empty() {
        false
    } else {
        let qualified = format!(
            "{}.{}",
            crate::utils::quote_ident(schema),
            crate::utils::quote_ident(table)
        );
        let row = client
            .query_one(
                "SELECT has_table_privilege(current_user, $1::text::regclass, 'SELECT')",
                &[&qualified],
            )
            .await
            .with_context(|| format!("Failed to check SELECT privilege on {}.{}", schema, table))?;
        row.get(0)
    };

    Ok(LogTableCheck {
        columns,
        can_select,
    })
}
