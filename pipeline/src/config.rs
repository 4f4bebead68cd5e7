//! Runtime knobs for the pipeline, built directly from parsed CLI flags.
//! The tool is stateless between invocations, so there is no on-disk
//! config file format.

use std::time::Duration;

use crate::filter::TableFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestMechanism {
    SqlStatements,
    LoadInfile,
}

#[derive(Debug, Clone)]
pub struct TableWireConfig {
    /// Row ceiling per `INSERT ... VALUES` statement.
    pub sql_batch_rows: usize,
    /// Bulk-load pipe high-water mark in bytes.
    pub pipe_high_watermark: usize,
    /// Bulk-load pipe low-water mark in bytes.
    pub pipe_low_watermark: usize,
    pub worker_count: usize,
    pub ingest_mechanism: IngestMechanism,
    pub progress_interval: Duration,
    pub table_filter: TableFilter,
    pub select_template: Option<String>,
    pub no_creation: bool,
    pub truncate: bool,
    pub append: bool,
    pub insert_ignore: bool,
    pub csv_fix_invalid: bool,
    pub csv_header: bool,
    pub defer_indexes: bool,
    pub strip_indexes: bool,
    pub set_innodb: Option<String>,
    pub set_compressed: bool,
    pub quiet: bool,
}

impl Default for TableWireConfig {
    fn default() -> Self {
        Self {
            sql_batch_rows: 8192,
            pipe_high_watermark: 1024 * 1024,
            pipe_low_watermark: 512 * 1024,
            worker_count: 4,
            ingest_mechanism: IngestMechanism::SqlStatements,
            progress_interval: Duration::from_secs(1),
            table_filter: TableFilter::All,
            select_template: None,
            no_creation: false,
            truncate: false,
            append: false,
            insert_ignore: false,
            csv_fix_invalid: false,
            csv_header: true,
            defer_indexes: false,
            strip_indexes: false,
            set_innodb: None,
            set_compressed: false,
            quiet: false,
        }
    }
}
