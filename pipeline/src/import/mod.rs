//! The importer family: table preparation shared across all three
//! formats, plus the per-format state machines.

pub mod csv;
pub mod json;
pub mod sql;

use async_trait::async_trait;
use tablewire_common::error::Result;
use tablewire_db::Connection;
use tablewire_schema::{ColumnInfo, ForeignKey, Index, IndexKind, Table};
use tablewire_tokenizer::PipeTextWriter;

use crate::cell::escape_sql_identifier;
use crate::config::TableWireConfig;

/// One secondary index or foreign key pulled out of a `CREATE TABLE` for
/// post-load replay.
#[derive(Debug, Clone)]
pub enum DeferredConstraint {
    Index(Index),
    ForeignKey(ForeignKey),
}

pub struct TablePrep {
    /// Whether data should be loaded for this table at all: false when
    /// the table filter excludes it, or `--no-creation` is set and the
    /// destination table doesn't already exist.
    pub should_insert: bool,
    pub table: Table,
    pub deferred: Vec<DeferredConstraint>,
}

/// Table preparation, run once per table before any data is loaded:
/// filter check, option rewrites, index deferral/stripping, and
/// create-or-skip against the destination.
pub async fn prepare_table(conn: &mut dyn Connection, mut table: Table, config: &TableWireConfig) -> Result<TablePrep> {
    if !config.table_filter.matches(&table.name) {
        return Ok(TablePrep { should_insert: false, table, deferred: Vec::new() });
    }

    if let Some(engine) = &config.set_innodb {
        table.options.insert("ENGINE", engine.clone());
        table.options.insert("ROW_FORMAT", "DYNAMIC");
    }
    if config.set_compressed {
        table.options.insert("ROW_FORMAT", "COMPRESSED");
        table.options.remove("COMPRESSION");
    }

    let mut deferred = Vec::new();
    if config.strip_indexes {
        table.indexes.retain(|index| index.kind == IndexKind::Primary);
        table.foreign_keys.clear();
    } else if config.defer_indexes {
        let mut kept_indexes = Vec::new();
        for index in table.indexes.drain(..) {
            if index.kind == IndexKind::Primary {
                kept_indexes.push(index);
            } else {
                deferred.push(DeferredConstraint::Index(index));
            }
        }
        table.indexes = kept_indexes;
        for fk in table.foreign_keys.drain(..) {
            deferred.push(DeferredConstraint::ForeignKey(fk));
        }
    }

    let exists = conn.table_exists(&table.name).await?;
    if !exists {
        if config.no_creation {
            return Ok(TablePrep { should_insert: false, table, deferred });
        }
        conn.execute(&tablewire_schema::to_create_table_sql(&table)).await?;
    }

    if config.truncate && !config.append {
        conn.execute(&format!("TRUNCATE TABLE {};", escape_sql_identifier(&table.name))).await?;
    }

    Ok(TablePrep { should_insert: true, table, deferred })
}

/// Replays deferred indexes/foreign keys after data load, skipping any
/// that already exist so a replay is idempotent.
pub async fn reindex_deferred(conn: &mut dyn Connection, table_name: &str, deferred: &[DeferredConstraint]) -> Result<()> {
    for item in deferred {
        match item {
            DeferredConstraint::Index(index) => {
                let Some(name) = &index.name else { continue };
                if conn.index_exists(table_name, name).await? {
                    continue;
                }
                conn.execute(&tablewire_schema::to_alter_table_add_index_sql(table_name, index)).await?;
            }
            DeferredConstraint::ForeignKey(fk) => {
                let exists = match &fk.name {
                    Some(name) => conn.index_exists(table_name, name).await?,
                    None => false,
                };
                if exists {
                    continue;
                }
                conn.execute(&tablewire_schema::to_alter_table_add_foreign_key_sql(table_name, fk)).await?;
            }
        }
    }
    Ok(())
}

/// Derives the runtime metadata importers dispatch on from a parsed
/// destination schema; the type-name source is the destination, not the
/// input.
pub fn column_info_from_table(table: &Table) -> Vec<ColumnInfo> {
    table
        .columns
        .iter()
        .map(|c| ColumnInfo {
            name: c.name.clone(),
            category: tablewire_common::value::ColumnCategory::from_driver_type_name(&c.type_expr),
            driver_type_name: c.type_expr.clone(),
        })
        .collect()
}

/// The next table an importer found in its input stream. `approx_rows`
/// comes from the dump's own metadata (the JSON envelope's `approx_count`)
/// where the format carries one; SQL and CSV dumps carry none.
#[derive(Debug)]
pub struct NextTable {
    pub table: Table,
    pub approx_rows: Option<u64>,
}

#[async_trait]
pub trait Importer: Send {
    /// Advances past any preceding noise (skipped procedures, whitespace)
    /// and returns the next table definition, or `None` once the input is
    /// exhausted.
    async fn read_next_table(&mut self) -> Result<Option<NextTable>>;

    /// Produces the next batch of `INSERT` SQL text for `table`, or `None`
    /// once this table's data is exhausted.
    async fn read_data_sql(&mut self, table: &Table, columns: &[ColumnInfo]) -> Result<Option<String>>;

    /// Writes the next batch of CSV bytes for `table` into `writer`, for
    /// the bulk-load ingest path; returns `false` once this table's data
    /// is exhausted.
    async fn read_data_csv(&mut self, writer: &mut PipeTextWriter, table: &Table, columns: &[ColumnInfo]) -> Result<bool>;

    /// Rows handed to the caller so far, for progress reporting.
    fn rows_read(&self) -> u64;

    /// Whether the input stream can be re-synchronized after a
    /// table-scoped error; the SQL importer skips ahead to the next
    /// `CREATE TABLE`, JSON and CSV streams cannot recover.
    fn can_resynchronize(&self) -> bool {
        false
    }
}
