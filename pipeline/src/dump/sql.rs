//! The SQL dumper. Multiplexable: the session setup preamble is written
//! once, ahead of the first table.

use async_trait::async_trait;
use tablewire_common::error::Result;
use tablewire_common::value::Value;
use tablewire_schema::{CreateTableParser, ColumnInfo};
use tablewire_tokenizer::PipeTextWriter;

use crate::cell::{escape_sql_identifier, write_sql_cell};
use crate::dump::Dumper;

pub struct SqlDumper {
    emit_create: bool,
    emit_truncate: bool,
    emit_insert_ignore: bool,
    batch_rows: usize,
    session_setup_written: bool,
    table_name: String,
    columns: Vec<ColumnInfo>,
    rows_in_batch: usize,
}

impl SqlDumper {
    pub fn new(emit_create: bool, emit_truncate: bool, emit_insert_ignore: bool, batch_rows: usize) -> Self {
        Self {
            emit_create,
            emit_truncate,
            emit_insert_ignore,
            batch_rows: batch_rows.max(1),
            session_setup_written: false,
            table_name: String::new(),
            columns: Vec::new(),
            rows_in_batch: 0,
        }
    }

    /// Parses the driver's own `SHOW CREATE TABLE` text and re-emits it
    /// in canonical form, so the dump carries DDL this tool's own parser
    /// is guaranteed to read back.
    fn canonical_create_if_not_exists(&self, create_sql: &str) -> Result<String> {
        let tok = tablewire_tokenizer::SqlTokenizer::new(std::io::Cursor::new(create_sql.as_bytes().to_vec()));
        let table = CreateTableParser::new(tok).parse()?;
        let canonical = tablewire_schema::to_create_table_sql(&table);
        Ok(canonical.replacen("CREATE TABLE ", "CREATE TABLE IF NOT EXISTS ", 1))
    }

    fn start_insert_statement(&mut self) {
        self.rows_in_batch = 0;
    }
}

#[async_trait]
impl Dumper for SqlDumper {
    fn multiplexable(&self) -> bool {
        true
    }

    async fn begin_table(
        &mut self,
        writer: &mut PipeTextWriter,
        is_first_table: bool,
        table_name: &str,
        create_sql: &str,
        columns: &[ColumnInfo],
        _approx_count: Option<u64>,
    ) -> Result<()> {
        if is_first_table && !self.session_setup_written {
            writer
                .write("SET time_zone='+00:00', FOREIGN_KEY_CHECKS=0, UNIQUE_CHECKS=0, AUTOCOMMIT=0;\n")
                .await;
            self.session_setup_written = true;
        }

        self.table_name = table_name.to_string();
        self.columns = columns.to_vec();

        if self.emit_create {
            let create = self.canonical_create_if_not_exists(create_sql)?;
            writer.write(&create).await;
            writer.write("\n").await;
        }
        if self.emit_truncate {
            writer.write(&format!("TRUNCATE TABLE {};\n", escape_sql_identifier(table_name))).await;
        }
        writer.write("START TRANSACTION;\n").await;
        self.start_insert_statement();
        Ok(())
    }

    async fn write_row(&mut self, writer: &mut PipeTextWriter, row: &[Value]) -> Result<()> {
        if self.rows_in_batch == 0 {
            let verb = if self.emit_insert_ignore { "INSERT IGNORE INTO" } else { "INSERT INTO" };
            let cols = self.columns.iter().map(|c| escape_sql_identifier(&c.name)).collect::<Vec<_>>().join(", ");
            writer.write(&format!("{verb} {} ({cols}) VALUES (", escape_sql_identifier(&self.table_name))).await;
        } else {
            writer.write(",(").await;
        }
        for (index, value) in row.iter().enumerate() {
            if index > 0 {
                writer.write(",").await;
            }
            write_sql_cell(writer, value).await;
        }
        writer.write(")").await;
        self.rows_in_batch += 1;
        if self.rows_in_batch >= self.batch_rows {
            writer.write(";\n").await;
            self.rows_in_batch = 0;
        }
        Ok(())
    }

    async fn end_table(&mut self, writer: &mut PipeTextWriter, _table_name: &str, _actual_count: u64) -> Result<()> {
        if self.rows_in_batch > 0 {
            writer.write(";\n").await;
            self.rows_in_batch = 0;
        }
        writer.write("COMMIT;\n").await;
        Ok(())
    }

    async fn finish(&mut self, _writer: &mut PipeTextWriter) -> Result<()> {
        Ok(())
    }
}
