//! The parallel bulk-ingest orchestrator and the whole-stream import
//! driver built on top of it.
//!
//! One producer drives the importer's reader; N workers own one connection
//! each for the duration of one table. Transaction setup and the final
//! COMMIT are serialized across workers through a shared one-permit lock,
//! everything in between runs fully in parallel. Flow control is the SQL
//! channel's capacity (2) or the CSV pipes' watermarks; there is no other
//! cross-worker state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use tablewire_common::cancel::CancelToken;
use tablewire_common::error::{Result, TableWireError};
use tablewire_db::{BulkLoadOptions, Connection, ConnectionFactory};
use tablewire_schema::{ColumnInfo, CreateTableParser, Table};
use tablewire_tokenizer::{Pipe, PipeTextWriter, SqlTokenizer};

use crate::config::{IngestMechanism, TableWireConfig};
use crate::dump::show_create_table;
use crate::import::{column_info_from_table, prepare_table, reindex_deferred, Importer};

/// Session preamble every worker runs before its transaction; the time
/// zone is forced to UTC so datetime text means the same thing on both
/// sides of a round trip.
const SESSION_SETUP_SQL: &str =
    "SET time_zone='+00:00', AUTOCOMMIT=0, UNIQUE_CHECKS=0, FOREIGN_KEY_CHECKS=0";

/// How long the LoadInfile producer sleeps when every pipe still has a
/// soft flush in flight.
const PIPE_SPIN_WAIT: Duration = Duration::from_millis(2);

fn worker_err(worker_id: usize, table: &str, err: &TableWireError, sql: Option<String>) -> TableWireError {
    TableWireError::worker(worker_id, table, err.to_string(), sql)
}

/// Once-per-second row counter on stderr, shut down through its own token
/// so a cancelled run stops reporting immediately.
struct ProgressReporter {
    done: CancelToken,
    task: JoinHandle<()>,
}

impl ProgressReporter {
    fn spawn(table: String, rows: Arc<AtomicU64>, interval: Duration, cancel: CancelToken, quiet: bool) -> Self {
        let done = CancelToken::new();
        let reporter_done = done.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if reporter_done.is_cancelled() || cancel.is_cancelled() {
                    break;
                }
                if !quiet {
                    tracing::info!(table = %table, rows = rows.load(Ordering::Relaxed), "loading");
                }
            }
        });
        Self { done, task }
    }

    async fn stop(self) {
        self.done.cancel();
        self.task.abort();
        let _ = self.task.await;
    }
}

/// Ingests one table's data through the configured mechanism, returning
/// the number of rows loaded.
pub async fn ingest_table(
    importer: &mut dyn Importer,
    factory: &ConnectionFactory,
    table: &Table,
    columns: &[ColumnInfo],
    config: &TableWireConfig,
    cancel: &CancelToken,
) -> Result<u64> {
    let rows = Arc::new(AtomicU64::new(0));
    let progress = ProgressReporter::spawn(
        table.name.clone(),
        rows.clone(),
        config.progress_interval,
        cancel.clone(),
        config.quiet,
    );
    let result = match config.ingest_mechanism {
        IngestMechanism::SqlStatements => {
            ingest_sql_statements(importer, factory, table, columns, config, cancel, &rows).await
        }
        IngestMechanism::LoadInfile => {
            ingest_load_infile(importer, factory, table, columns, config, cancel, &rows).await
        }
    };
    progress.stop().await;
    result
}

async fn ingest_sql_statements(
    importer: &mut dyn Importer,
    factory: &ConnectionFactory,
    table: &Table,
    columns: &[ColumnInfo],
    config: &TableWireConfig,
    cancel: &CancelToken,
    rows: &Arc<AtomicU64>,
) -> Result<u64> {
    let (tx, rx) = mpsc::channel::<String>(2);
    let rx = Arc::new(Mutex::new(rx));
    let setup_lock = Arc::new(Mutex::new(()));

    let mut workers = Vec::with_capacity(config.worker_count.max(1));
    for worker_id in 0..config.worker_count.max(1) {
        let factory = factory.clone();
        let rx = rx.clone();
        let setup_lock = setup_lock.clone();
        let cancel = cancel.clone();
        let table_name = table.name.clone();
        workers.push(tokio::spawn(async move {
            let mut conn = factory
                .connect()
                .await
                .map_err(|e| worker_err(worker_id, &table_name, &e, None))?;
            {
                let _guard = setup_lock.lock().await;
                conn.execute(SESSION_SETUP_SQL)
                    .await
                    .map_err(|e| worker_err(worker_id, &table_name, &e, Some(SESSION_SETUP_SQL.to_string())))?;
                conn.execute("START TRANSACTION")
                    .await
                    .map_err(|e| worker_err(worker_id, &table_name, &e, None))?;
            }
            let mut executed = 0u64;
            loop {
                if cancel.is_cancelled() {
                    break;
                }
                let batch = { rx.lock().await.recv().await };
                let Some(sql) = batch else { break };
                match conn.execute(&sql).await {
                    Ok(affected) => executed += affected,
                    Err(e) => {
                        tracing::error!(worker = worker_id, error = %e, sql = %sql, "statement failed");
                        return Err(worker_err(worker_id, &table_name, &e, Some(sql)));
                    }
                }
            }
            {
                let _guard = setup_lock.lock().await;
                conn.execute("COMMIT")
                    .await
                    .map_err(|e| worker_err(worker_id, &table_name, &e, None))?;
            }
            Ok(executed)
        }));
    }

    let mut producer_result: Result<()> = Ok(());
    loop {
        if cancel.is_cancelled() {
            break;
        }
        match importer.read_data_sql(table, columns).await {
            Ok(Some(sql)) => {
                rows.store(importer.rows_read(), Ordering::Relaxed);
                if tx.send(sql).await.is_err() {
                    // Every worker is gone; their join results carry why.
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                producer_result = Err(e);
                break;
            }
        }
    }
    drop(tx);

    let mut loaded = 0u64;
    let mut first_worker_error = None;
    for worker in workers {
        match worker.await {
            Ok(Ok(executed)) => loaded += executed,
            Ok(Err(e)) => first_worker_error = first_worker_error.or(Some(e)),
            Err(join_err) => {
                first_worker_error = first_worker_error
                    .or_else(|| Some(TableWireError::worker(0, &table.name, join_err.to_string(), None)));
            }
        }
    }
    producer_result?;
    if let Some(err) = first_worker_error {
        return Err(err);
    }
    Ok(loaded)
}

async fn ingest_load_infile(
    importer: &mut dyn Importer,
    factory: &ConnectionFactory,
    table: &Table,
    columns: &[ColumnInfo],
    config: &TableWireConfig,
    cancel: &CancelToken,
    rows: &Arc<AtomicU64>,
) -> Result<u64> {
    let worker_count = config.worker_count.max(1);
    let setup_lock = Arc::new(Mutex::new(()));
    let options = BulkLoadOptions {
        columns: columns.to_vec(),
        insert_ignore: config.insert_ignore,
        skip_header: true,
    };

    let mut pipes = Vec::with_capacity(worker_count);
    let mut writers = Vec::with_capacity(worker_count);
    let mut workers = Vec::with_capacity(worker_count);
    for worker_id in 0..worker_count {
        let pipe = Pipe::new(config.pipe_high_watermark, config.pipe_low_watermark);
        pipes.push(pipe.clone());
        writers.push(PipeTextWriter::new(pipe.clone()));

        let factory = factory.clone();
        let setup_lock = setup_lock.clone();
        let options = options.clone();
        let table_name = table.name.clone();
        workers.push(tokio::spawn(async move {
            let run = async {
                let mut conn = factory
                    .connect()
                    .await
                    .map_err(|e| worker_err(worker_id, &table_name, &e, None))?;
                {
                    let _guard = setup_lock.lock().await;
                    conn.execute(SESSION_SETUP_SQL)
                        .await
                        .map_err(|e| worker_err(worker_id, &table_name, &e, Some(SESSION_SETUP_SQL.to_string())))?;
                    conn.execute("START TRANSACTION")
                        .await
                        .map_err(|e| worker_err(worker_id, &table_name, &e, None))?;
                }
                let loaded = conn
                    .bulk_load_csv(&table_name, &options, pipe.clone())
                    .await
                    .map_err(|e| worker_err(worker_id, &table_name, &e, None))?;
                {
                    let _guard = setup_lock.lock().await;
                    conn.execute("COMMIT")
                        .await
                        .map_err(|e| worker_err(worker_id, &table_name, &e, None))?;
                }
                Ok(loaded)
            };
            match run.await {
                Ok(loaded) => Ok(loaded),
                Err(e) => {
                    // Completing the pipe with the failure is what unwinds
                    // a producer parked on this pipe's backpressure.
                    pipe.abort().await;
                    Err(e)
                }
            }
        }));
    }

    // One header line per pipe; every loader is told to skip it.
    let header = columns.iter().map(|c| c.name.as_str()).collect::<Vec<_>>().join(",");
    for writer in writers.iter_mut() {
        writer.write(&header).await;
        writer.write("\n").await;
    }

    let mut producer_result: Result<()> = Ok(());
    let mut alive = vec![true; worker_count];
    'produce: loop {
        if cancel.is_cancelled() {
            break;
        }
        // Round-robin for the first pipe whose prior flush completed,
        // spin-waiting briefly when all are busy.
        let target = loop {
            let mut found = None;
            let mut any_alive = false;
            for index in 0..worker_count {
                if !alive[index] {
                    continue;
                }
                if pipes[index].is_aborted().await {
                    alive[index] = false;
                    continue;
                }
                any_alive = true;
                if writers[index].flush_completed() {
                    found = Some(index);
                    break;
                }
            }
            if !any_alive {
                break 'produce;
            }
            match found {
                Some(index) => break index,
                None => tokio::time::sleep(PIPE_SPIN_WAIT).await,
            }
        };
        match importer.read_data_csv(&mut writers[target], table, columns).await {
            Ok(true) => {
                rows.store(importer.rows_read(), Ordering::Relaxed);
                writers[target].flush(true).await;
            }
            Ok(false) => break,
            Err(e) => {
                producer_result = Err(e);
                break;
            }
        }
    }
    for writer in writers {
        writer.close().await;
    }

    let mut loaded = 0u64;
    let mut first_worker_error = None;
    for worker in workers {
        match worker.await {
            Ok(Ok(count)) => loaded += count,
            Ok(Err(e)) => first_worker_error = first_worker_error.or(Some(e)),
            Err(join_err) => {
                first_worker_error = first_worker_error
                    .or_else(|| Some(TableWireError::worker(0, &table.name, join_err.to_string(), None)));
            }
        }
    }
    producer_result?;
    if let Some(err) = first_worker_error {
        return Err(err);
    }
    Ok(loaded)
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ImportSummary {
    pub tables: u64,
    pub rows: u64,
}

/// Drives one importer across every table in its input stream: table
/// preparation, parallel ingest, deferred index replay. Table-scoped
/// errors skip to the next table when the importer can resynchronize its
/// stream; everything else aborts the run.
pub async fn run_import(
    importer: &mut dyn Importer,
    factory: &ConnectionFactory,
    config: &TableWireConfig,
    cancel: &CancelToken,
) -> Result<ImportSummary> {
    let mut control = factory.connect().await?;
    let mut summary = ImportSummary::default();

    loop {
        if cancel.is_cancelled() {
            break;
        }
        let next = match importer.read_next_table().await {
            Ok(Some(next)) => next,
            Ok(None) => break,
            Err(e) if e.is_table_scoped() && importer.can_resynchronize() => {
                tracing::error!(error = %e, "skipping table after parse failure");
                continue;
            }
            Err(e) => return Err(e),
        };

        let mut table = next.table;
        if table.columns.is_empty() {
            // The input carries no DDL (CSV): the destination defines the
            // schema.
            if !control.table_exists(&table.name).await? {
                return Err(TableWireError::schema(
                    &table.name,
                    "destination table does not exist and the input carries no CREATE TABLE",
                ));
            }
            let ddl = show_create_table(control.as_mut(), &table.name).await?;
            table = CreateTableParser::new(SqlTokenizer::new(std::io::Cursor::new(ddl.into_bytes()))).parse()?;
        }

        let prep = prepare_table(control.as_mut(), table, config).await?;
        if !prep.should_insert {
            tracing::info!(table = %prep.table.name, "skipping table data");
            continue;
        }

        let columns = column_info_from_table(&prep.table);
        match ingest_table(importer, factory, &prep.table, &columns, config, cancel).await {
            Ok(rows) => {
                summary.tables += 1;
                summary.rows += rows;
                tracing::info!(table = %prep.table.name, rows, "table loaded");
            }
            Err(e) if e.is_table_scoped() && importer.can_resynchronize() => {
                tracing::error!(table = %prep.table.name, error = %e, "table aborted, resynchronizing");
                continue;
            }
            Err(e) => return Err(e),
        }

        reindex_deferred(control.as_mut(), &prep.table.name, &prep.deferred).await?;
    }

    Ok(summary)
}
