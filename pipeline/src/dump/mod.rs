//! The dumper family: a shared per-table template driving three
//! format-specific implementations.

pub mod csv;
pub mod json;
pub mod sql;

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tablewire_common::error::Result;
use tablewire_common::value::Value;
use tablewire_db::Connection;
use tablewire_schema::ColumnInfo;
use tablewire_tokenizer::PipeTextWriter;

use crate::cell::escape_sql_identifier;

#[async_trait]
pub trait Dumper: Send {
    /// Whether a subsequent table may reuse this dumper's writer.
    fn multiplexable(&self) -> bool;

    /// The `--select "<query with {table}>"` override seam: `{table}` is
    /// substituted with the backtick-quoted table name; absent an
    /// override, selects every column.
    fn cursor_query(&self, table: &str, select_template: Option<&str>) -> String {
        match select_template {
            Some(template) => template.replace("{table}", &escape_sql_identifier(table)),
            None => format!("SELECT * FROM {}", escape_sql_identifier(table)),
        }
    }

    async fn begin_table(
        &mut self,
        writer: &mut PipeTextWriter,
        is_first_table: bool,
        table_name: &str,
        create_sql: &str,
        columns: &[ColumnInfo],
        approx_count: Option<u64>,
    ) -> Result<()>;

    async fn write_row(&mut self, writer: &mut PipeTextWriter, row: &[Value]) -> Result<()>;

    async fn end_table(&mut self, writer: &mut PipeTextWriter, table_name: &str, actual_count: u64) -> Result<()>;

    /// Closes out framing opened once for the whole output stream (the
    /// JSON dumper's closing `]}`); a no-op for non-multiplexable dumpers
    /// and for SQL, whose framing is entirely per-table.
    async fn finish(&mut self, writer: &mut PipeTextWriter) -> Result<()>;
}

/// Fetches the server's own DDL for `table`; the SQL dumper re-emits it
/// in canonical form, and the import driver falls back to it for formats
/// that carry no DDL of their own.
pub async fn show_create_table(conn: &mut dyn Connection, table: &str) -> Result<String> {
    let sql = format!("SHOW CREATE TABLE {}", escape_sql_identifier(table));
    let mut cursor = conn.query(&sql).await?;
    let row = cursor
        .next_row()
        .await?
        .ok_or_else(|| tablewire_common::error::TableWireError::schema(table, "SHOW CREATE TABLE returned no rows"))?;
    match row.into_iter().nth(1) {
        Some(Value::String(ddl)) => Ok(ddl),
        _ => Err(tablewire_common::error::TableWireError::schema(table, "SHOW CREATE TABLE returned an unexpected shape")),
    }
}

/// Runs the shared per-table template against one dumper: row-count
/// estimate, cursor + schema, preamble, row stream, postamble. Returns the
/// number of rows actually streamed.
pub async fn dump_table(
    dumper: &mut dyn Dumper,
    conn: &mut dyn Connection,
    writer: &mut PipeTextWriter,
    table_name: &str,
    is_first_table: bool,
    select_template: Option<&str>,
    progress_interval: Duration,
) -> Result<u64> {
    // Step 1: best-effort row-count estimate; never blocks the dump on
    // failure.
    let approx_count = conn.approx_row_count(table_name).await;

    let create_sql = show_create_table(conn, table_name).await?;

    // Step 2: open the select cursor and retrieve the column schema.
    let query = dumper.cursor_query(table_name, select_template);
    let mut cursor = conn.query(&query).await?;
    let columns = cursor.columns().to_vec();

    // Step 3: format preamble.
    dumper.begin_table(writer, is_first_table, table_name, &create_sql, &columns, approx_count).await?;

    // Step 4: stream rows, throttling progress to at most once per second.
    let mut row_count = 0u64;
    let mut last_progress = Instant::now();
    while let Some(row) = cursor.next_row().await? {
        dumper.write_row(writer, &row).await?;
        row_count += 1;
        if last_progress.elapsed() >= progress_interval {
            tracing::info!(table = table_name, rows = row_count, approx = approx_count, "dumping");
            last_progress = Instant::now();
        }
    }

    // Step 5: format postamble.
    dumper.end_table(writer, table_name, row_count).await?;

    Ok(row_count)
}

/// Dumps `tables` to one output stream, enforcing the multiplexable rule:
/// only a multiplexable dumper may write a second table to the same
/// writer. Returns the total row count streamed.
pub async fn run_export(
    dumper: &mut dyn Dumper,
    conn: &mut dyn Connection,
    writer: &mut PipeTextWriter,
    tables: &[String],
    select_template: Option<&str>,
    progress_interval: Duration,
) -> Result<u64> {
    if !dumper.multiplexable() && tables.len() > 1 {
        return Err(tablewire_common::error::TableWireError::unsupported(
            tables[1].clone(),
            "this output format writes one table per stream",
        ));
    }
    let mut total = 0u64;
    for (index, table) in tables.iter().enumerate() {
        total += dump_table(dumper, conn, writer, table, index == 0, select_template, progress_interval).await?;
    }
    dumper.finish(writer).await?;
    writer.flush(false).await;
    Ok(total)
}
