//! Error taxonomy for the dump/load pipeline.
//!
//! Every variant keeps enough context (a byte position, a row number, or
//! the offending table) that a failure surfaced to the user says where in
//! the input it happened.

use std::io;

pub type Result<T> = std::result::Result<T, TableWireError>;

#[derive(Debug, thiserror::Error)]
pub enum TableWireError {
    /// Unterminated string/blob or an unrecognized start character. Fatal
    /// for the table currently being tokenized.
    #[error("lex error at byte {position}: {message}")]
    Lex { position: usize, message: String },

    /// The `CreateTableParser` rejected a construct. Fatal for the table.
    #[error("parse error at byte {position}: {message}")]
    Parse { position: usize, message: String },

    /// The underlying byte stream failed. Fatal for the whole invocation.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Destination column missing, column count mismatch, or an
    /// unrepresentable value (e.g. an oversized version-1 JSON blob).
    #[error("schema error on table `{table}`: {message}")]
    Schema { table: String, message: String },

    /// Non-standard dump conventions the core refuses to guess at, e.g. an
    /// SQL importer column-list change mid-batch.
    #[error("unsupported dump format on table `{table}`: {message}")]
    Unsupported { table: String, message: String },

    /// Any exception surfaced from a worker task. Carries the offending SQL
    /// text when one is available so it can be logged alongside the error.
    #[error("worker {worker_id} failed on table `{table}`: {message}")]
    Worker {
        worker_id: usize,
        table: String,
        message: String,
        sql: Option<String>,
    },
}

impl TableWireError {
    pub fn lex(position: usize, message: impl Into<String>) -> Self {
        TableWireError::Lex { position, message: message.into() }
    }

    pub fn parse(position: usize, message: impl Into<String>) -> Self {
        TableWireError::Parse { position, message: message.into() }
    }

    pub fn schema(table: impl Into<String>, message: impl Into<String>) -> Self {
        TableWireError::Schema { table: table.into(), message: message.into() }
    }

    pub fn unsupported(table: impl Into<String>, message: impl Into<String>) -> Self {
        TableWireError::Unsupported { table: table.into(), message: message.into() }
    }

    pub fn worker(worker_id: usize, table: impl Into<String>, message: impl Into<String>, sql: Option<String>) -> Self {
        TableWireError::Worker { worker_id, table: table.into(), message: message.into(), sql }
    }

    /// Whether this error is scoped to one table, so an importer that can
    /// resynchronize its stream (the SQL importer skips ahead to the next
    /// `CREATE TABLE`) may carry on with the next table.
    pub fn is_table_scoped(&self) -> bool {
        !matches!(self, TableWireError::Io(_))
    }
}
