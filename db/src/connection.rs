//! The `Connection`/`RowCursor` contract the pipeline and orchestrator
//! depend on: a small trait the rest of the workspace programs against,
//! with exactly one live implementation and a deterministic stand-in for
//! tests. Connection strings, authentication, and the wire protocol are
//! the driver's business; only the operations the format pipeline needs
//! appear here.

use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tablewire_common::error::Result;
use tablewire_schema::ColumnInfo;
use tablewire_tokenizer::Pipe;

/// One decoded row, cells in the cursor's column order.
pub type Row = Vec<tablewire_common::value::Value>;

/// Settings for the native CSV bulk-load path. The column list fixes the
/// loader's schema; columns whose driver type mentions `BLOB` or `BIT`
/// are routed through user variables and rewritten with
/// `FROM_BASE64(@vN)` / `CAST(@vN AS SIGNED)` expressions.
#[derive(Clone)]
pub struct BulkLoadOptions {
    pub columns: Vec<ColumnInfo>,
    pub insert_ignore: bool,
    /// The producer writes one header line per pipe; the loader skips it.
    pub skip_header: bool,
}

#[async_trait]
pub trait RowCursor: Send {
    fn columns(&self) -> &[ColumnInfo];

    /// Returns `None` once the cursor is exhausted.
    async fn next_row(&mut self) -> Result<Option<Row>>;
}

#[async_trait]
pub trait Connection: Send {
    /// Runs a statement that returns no rows (DDL, `INSERT`, `START
    /// TRANSACTION`, `COMMIT`, session `SET`s); returns affected row count
    /// where the backend reports one.
    async fn execute(&mut self, sql: &str) -> Result<u64>;

    /// Runs a statement that returns rows.
    async fn query(&mut self, sql: &str) -> Result<Box<dyn RowCursor>>;

    /// Best-effort `information_schema.TABLES.TABLE_ROWS` lookup; a
    /// failed or empty estimate must never block a dump or load, so
    /// errors come back as `None` instead of propagating.
    async fn approx_row_count(&mut self, table: &str) -> Option<u64>;

    async fn table_exists(&mut self, table: &str) -> Result<bool>;

    async fn index_exists(&mut self, table: &str, index_name: &str) -> Result<bool>;

    /// `SHOW TABLES` for the connected schema, in the server's order.
    async fn list_tables(&mut self) -> Result<Vec<String>>;

    /// Consumes `pipe` as CSV and bulk-loads it into `table`, returning
    /// the number of rows loaded. Completes only once the pipe is closed
    /// and the loader has drained it.
    async fn bulk_load_csv(&mut self, table: &str, options: &BulkLoadOptions, pipe: Pipe) -> Result<u64>;
}

type ConnectFuture = Pin<Box<dyn Future<Output = Result<Box<dyn Connection>>> + Send>>;

/// A cloneable factory each orchestrator worker calls once to obtain its
/// own connection. One driver handle per worker task, never shared.
#[derive(Clone)]
pub struct ConnectionFactory {
    make: Arc<dyn Fn() -> ConnectFuture + Send + Sync>,
}

impl ConnectionFactory {
    pub fn new<F, Fut>(make: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Box<dyn Connection>>> + Send + 'static,
    {
        Self { make: Arc::new(move || Box::pin(make())) }
    }

    pub async fn connect(&self) -> Result<Box<dyn Connection>> {
        (self.make)().await
    }
}
