//! The JSON dumper. Multiplexable: writes one
//! `{"version":2,"tables":[...]}` envelope across every table handed to it.
//!
//! Hand-assembles the envelope token by token rather than building a
//! `serde_json::Value` tree for the whole table, since a table's row count
//! is unbounded and the format pipeline's whole premise is bounded memory.

use async_trait::async_trait;
use tablewire_common::error::Result;
use tablewire_common::value::Value;
use tablewire_schema::ColumnInfo;
use tablewire_tokenizer::PipeTextWriter;

use crate::cell::{json_cell_text, json_string};
use crate::dump::Dumper;

pub struct JsonDumper {
    wrote_any_table: bool,
    wrote_any_row: bool,
}

impl JsonDumper {
    pub fn new() -> Self {
        Self { wrote_any_table: false, wrote_any_row: false }
    }
}

impl Default for JsonDumper {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Dumper for JsonDumper {
    fn multiplexable(&self) -> bool {
        true
    }

    async fn begin_table(
        &mut self,
        writer: &mut PipeTextWriter,
        _is_first_table: bool,
        table_name: &str,
        create_sql: &str,
        columns: &[ColumnInfo],
        approx_count: Option<u64>,
    ) -> Result<()> {
        if !self.wrote_any_table {
            writer.write(r#"{"version":2,"tables":["#).await;
        } else {
            writer.write(",").await;
        }
        self.wrote_any_table = true;

        writer.write(&format!(r#"{{"name":{},"create_statement":{},"columns":{{"#, json_string(table_name), json_string(create_sql))).await;
        for (index, column) in columns.iter().enumerate() {
            if index > 0 {
                writer.write(",").await;
            }
            writer.write(&format!("{}:{}", json_string(&column.name), json_string(&column.driver_type_name))).await;
        }
        let approx = approx_count.map(|n| n.to_string()).unwrap_or_else(|| "null".to_string());
        writer.write(&format!(r#"}},"approx_count":{approx},"rows":["#)).await;
        self.wrote_any_row = false;
        Ok(())
    }

    async fn write_row(&mut self, writer: &mut PipeTextWriter, row: &[Value]) -> Result<()> {
        if self.wrote_any_row {
            writer.write(",").await;
        }
        writer.write("[").await;
        for (index, value) in row.iter().enumerate() {
            if index > 0 {
                writer.write(",").await;
            }
            writer.write(&json_cell_text(value)).await;
        }
        writer.write("]").await;
        self.wrote_any_row = true;
        Ok(())
    }

    async fn end_table(&mut self, writer: &mut PipeTextWriter, _table_name: &str, actual_count: u64) -> Result<()> {
        writer.write(&format!(r#"],"actual_count":{actual_count}}}"#)).await;
        Ok(())
    }

    async fn finish(&mut self, writer: &mut PipeTextWriter) -> Result<()> {
        if self.wrote_any_table {
            writer.write("]}").await;
        }
        Ok(())
    }
}
