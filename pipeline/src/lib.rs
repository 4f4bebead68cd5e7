//! The format pipeline: SQL/CSV/JSON dumpers and importers, their shared
//! cell encoders, and the parallel bulk-ingest orchestrator.

pub mod cell;
pub mod config;
pub mod dump;
pub mod filter;
pub mod import;
pub mod orchestrator;

pub use config::{IngestMechanism, TableWireConfig};
pub use dump::{dump_table, run_export, Dumper};
pub use filter::TableFilter;
pub use import::{column_info_from_table, prepare_table, reindex_deferred, Importer, NextTable};
pub use orchestrator::{ingest_table, run_import, ImportSummary};
