//! The CSV dumper. Not multiplexable: one call writes exactly one table.

use async_trait::async_trait;
use tablewire_common::error::Result;
use tablewire_common::value::Value;
use tablewire_schema::ColumnInfo;
use tablewire_tokenizer::PipeTextWriter;

use crate::cell::write_csv_cell;
use crate::dump::Dumper;

pub struct CsvDumper {
    header: bool,
    mysql_mode: bool,
    columns: Vec<ColumnInfo>,
    wrote_any_row: bool,
}

impl CsvDumper {
    pub fn new(header: bool, mysql_mode: bool) -> Self {
        Self { header, mysql_mode, columns: Vec::new(), wrote_any_row: false }
    }
}

#[async_trait]
impl Dumper for CsvDumper {
    fn multiplexable(&self) -> bool {
        false
    }

    async fn begin_table(
        &mut self,
        writer: &mut PipeTextWriter,
        _is_first_table: bool,
        _table_name: &str,
        _create_sql: &str,
        columns: &[ColumnInfo],
        _approx_count: Option<u64>,
    ) -> Result<()> {
        self.columns = columns.to_vec();
        self.wrote_any_row = false;
        if self.header {
            for (index, column) in self.columns.iter().enumerate() {
                if index > 0 {
                    writer.write(",").await;
                }
                writer.write_csv_cell(&column.name, self.mysql_mode).await;
            }
            self.wrote_any_row = true;
        }
        Ok(())
    }

    async fn write_row(&mut self, writer: &mut PipeTextWriter, row: &[Value]) -> Result<()> {
        if self.wrote_any_row {
            writer.write("\n").await;
        }
        for (index, value) in row.iter().enumerate() {
            if index > 0 {
                writer.write(",").await;
            }
            write_csv_cell(writer, value, self.mysql_mode).await;
        }
        self.wrote_any_row = true;
        Ok(())
    }

    async fn end_table(&mut self, _writer: &mut PipeTextWriter, _table_name: &str, _actual_count: u64) -> Result<()> {
        Ok(())
    }

    async fn finish(&mut self, _writer: &mut PipeTextWriter) -> Result<()> {
        Ok(())
    }
}
