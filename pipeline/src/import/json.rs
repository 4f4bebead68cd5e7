//! The JSON importer. Walks the `{"version":2,"tables":[…]}` envelope
//! token by token; per-cell conversion is driven by the driver type names
//! recorded in each table's `columns` object, not by the destination
//! schema. Envelope versions other than 2 are rejected outright (the
//! legacy object-per-row variant is not supported).

use std::io::Read;

use async_trait::async_trait;
use base64::Engine;
use chrono::NaiveDateTime;

use tablewire_common::error::{Result, TableWireError};
use tablewire_schema::{ColumnInfo, CreateTableParser, Table};
use tablewire_tokenizer::json::{JsonTokenizer, TokenKind};
use tablewire_tokenizer::{PipeTextWriter, SqlTokenizer};

use crate::cell::{escape_sql_identifier, escape_sql_string, SQL_DATETIME_FORMAT};
use crate::import::{Importer, NextTable};

const ENVELOPE_VERSION: i64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Envelope header not yet consumed.
    Start,
    /// Inside the `tables` array, between table objects.
    BetweenTables,
    /// Inside the current table's `rows` array.
    InRows,
    Finished,
}

pub struct JsonImporter<R> {
    tok: JsonTokenizer<R>,
    state: State,
    batch_rows: usize,
    insert_ignore: bool,
    /// (column name, driver type name) pairs from the current table's
    /// `columns` object, in declaration order.
    columns_meta: Vec<(String, String)>,
    rows_read: u64,
    rows_in_table: u64,
}

impl<R: Read> JsonImporter<R> {
    pub fn new(tok: JsonTokenizer<R>, batch_rows: usize, insert_ignore: bool) -> Self {
        Self {
            tok,
            state: State::Start,
            batch_rows: batch_rows.max(1),
            insert_ignore,
            columns_meta: Vec::new(),
            rows_read: 0,
            rows_in_table: 0,
        }
    }

    fn err(&self, message: impl Into<String>) -> TableWireError {
        TableWireError::parse(0, message.into())
    }

    fn expect(&mut self, kind: TokenKind) -> Result<()> {
        let got = self.tok.read()?;
        if got != kind {
            return Err(self.err(format!("expected {kind:?}, found {got:?}")));
        }
        Ok(())
    }

    fn expect_property(&mut self, name: &str) -> Result<()> {
        self.expect(TokenKind::PropertyName)?;
        if self.tok.str_value() != name {
            return Err(self.err(format!("expected property `{name}`, found `{}`", self.tok.str_value())));
        }
        Ok(())
    }

    /// Consumes the envelope header up to the opening of `tables`.
    fn read_envelope_header(&mut self) -> Result<()> {
        self.expect(TokenKind::StartObject)?;
        self.expect_property("version")?;
        if self.tok.read()? != TokenKind::NumberLong || self.tok.int_value() != ENVELOPE_VERSION {
            return Err(TableWireError::unsupported(
                "<envelope>",
                format!("unsupported dump version (only version {ENVELOPE_VERSION} is readable)"),
            ));
        }
        self.expect_property("tables")?;
        self.expect(TokenKind::StartArray)?;
        self.state = State::BetweenTables;
        Ok(())
    }

    /// Consumes one table object's metadata up to and including the opening
    /// `[` of its `rows` array.
    fn read_table_header(&mut self) -> Result<NextTable> {
        self.expect_property("name")?;
        self.expect(TokenKind::String)?;

        self.expect_property("create_statement")?;
        self.expect(TokenKind::String)?;
        let create_sql = self.tok.str_value().to_string();
        let table = CreateTableParser::new(SqlTokenizer::new(std::io::Cursor::new(create_sql.into_bytes()))).parse()?;

        self.expect_property("columns")?;
        self.expect(TokenKind::StartObject)?;
        self.columns_meta.clear();
        loop {
            match self.tok.read()? {
                TokenKind::EndObject => break,
                TokenKind::PropertyName => {
                    let name = self.tok.str_value().to_string();
                    self.expect(TokenKind::String)?;
                    self.columns_meta.push((name, self.tok.str_value().to_string()));
                }
                other => return Err(self.err(format!("unexpected token {other:?} in columns object"))),
            }
        }

        self.expect_property("approx_count")?;
        let approx_rows = match self.tok.read()? {
            TokenKind::NumberLong => Some(self.tok.int_value().max(0) as u64),
            TokenKind::Null => None,
            other => return Err(self.err(format!("unexpected approx_count token {other:?}"))),
        };

        self.expect_property("rows")?;
        self.expect(TokenKind::StartArray)?;
        self.state = State::InRows;
        self.rows_in_table = 0;
        Ok(NextTable { table, approx_rows })
    }

    /// Consumes the trailer after the rows array: `"actual_count": N }`.
    fn read_table_trailer(&mut self) -> Result<()> {
        self.expect_property("actual_count")?;
        if self.tok.read()? != TokenKind::NumberLong {
            return Err(self.err("expected a number for actual_count"));
        }
        let actual = self.tok.int_value();
        if actual >= 0 && actual as u64 != self.rows_in_table {
            tracing::warn!(expected = actual, read = self.rows_in_table, "actual_count disagrees with rows read");
        }
        self.expect(TokenKind::EndObject)?;
        self.state = State::BetweenTables;
        Ok(())
    }

    /// Positioned just inside a row array (after its `[`); reads the cells
    /// and the closing `]`, rendering each cell with `render`.
    fn read_row_cells<F>(&mut self, mut render: F) -> Result<()>
    where
        F: FnMut(&mut Self, usize, CellToken) -> Result<()>,
    {
        let mut index = 0usize;
        loop {
            let kind = self.tok.read()?;
            let cell = match kind {
                TokenKind::EndArray => break,
                TokenKind::Null => CellToken::Null,
                TokenKind::String => CellToken::Text,
                TokenKind::NumberLong | TokenKind::NumberDouble => CellToken::Number,
                TokenKind::Boolean => CellToken::Boolean(self.tok.bool_value()),
                other => return Err(self.err(format!("unexpected token {other:?} in row array"))),
            };
            if index >= self.columns_meta.len() {
                return Err(TableWireError::schema(
                    "<row>",
                    format!("row has more cells than the {} declared columns", self.columns_meta.len()),
                ));
            }
            render(self, index, cell)?;
            index += 1;
        }
        if index != self.columns_meta.len() {
            return Err(TableWireError::schema(
                "<row>",
                format!("row has {index} cells, expected {}", self.columns_meta.len()),
            ));
        }
        self.rows_in_table += 1;
        self.rows_read += 1;
        Ok(())
    }
}

/// What kind of cell token the row reader is currently positioned on; the
/// value itself still sits in the tokenizer's accessors.
#[derive(Clone, Copy)]
enum CellToken {
    Null,
    Text,
    Number,
    Boolean(bool),
}

fn is_binary_type(driver_type: &str) -> bool {
    let upper = driver_type.to_ascii_uppercase();
    upper.contains("BLOB") || upper.contains("BINARY")
}

fn is_date_type(driver_type: &str) -> bool {
    let upper = driver_type.to_ascii_uppercase();
    upper.contains("DATE") || upper.contains("TIME")
}

/// `YYYY-MM-DDTHH:MM:SS.fffZ` as the JSON dumper writes it; sub-second
/// precision is dropped on re-import, matching the SQL datetime rendering.
fn parse_json_datetime(text: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.fZ").ok()
}

#[async_trait]
impl<R: Read + Send> Importer for JsonImporter<R> {
    async fn read_next_table(&mut self) -> Result<Option<NextTable>> {
        match self.state {
            State::Start => self.read_envelope_header()?,
            State::BetweenTables => {}
            State::InRows => {
                // Caller abandoned this table's rows; drain them so the
                // stream lands on the next table object.
                loop {
                    match self.tok.read()? {
                        TokenKind::StartArray => loop {
                            if self.tok.read()? == TokenKind::EndArray {
                                break;
                            }
                        },
                        TokenKind::EndArray => break,
                        other => return Err(self.err(format!("unexpected token {other:?} in rows array"))),
                    }
                }
                self.read_table_trailer()?;
            }
            State::Finished => return Ok(None),
        }

        match self.tok.read()? {
            TokenKind::StartObject => Ok(Some(self.read_table_header()?)),
            TokenKind::EndArray => {
                self.expect(TokenKind::EndObject)?;
                self.state = State::Finished;
                Ok(None)
            }
            other => Err(self.err(format!("expected a table object or end of tables, found {other:?}"))),
        }
    }

    async fn read_data_sql(&mut self, table: &Table, _columns: &[ColumnInfo]) -> Result<Option<String>> {
        if self.state != State::InRows {
            return Ok(None);
        }
        let mut out = String::new();
        let mut rows_in_batch = 0usize;
        while rows_in_batch < self.batch_rows {
            match self.tok.read()? {
                TokenKind::EndArray => {
                    self.read_table_trailer()?;
                    break;
                }
                TokenKind::StartArray => {}
                other => return Err(self.err(format!("unexpected token {other:?} in rows array"))),
            }

            if rows_in_batch == 0 {
                let verb = if self.insert_ignore { "INSERT IGNORE INTO" } else { "INSERT INTO" };
                let cols = self
                    .columns_meta
                    .iter()
                    .map(|(name, _)| escape_sql_identifier(name))
                    .collect::<Vec<_>>()
                    .join(", ");
                out.push_str(&format!("{verb} {} ({cols}) VALUES ", escape_sql_identifier(&table.name)));
            } else {
                out.push(',');
            }
            out.push('(');
            let table_name = table.name.clone();
            self.read_row_cells(|this, index, cell| {
                if index > 0 {
                    out.push(',');
                }
                let driver_type = &this.columns_meta[index].1;
                match cell {
                    CellToken::Null => out.push_str("NULL"),
                    CellToken::Boolean(true) => out.push_str("TRUE"),
                    CellToken::Boolean(false) => out.push_str("FALSE"),
                    CellToken::Number => out.push_str(this.tok.str_value()),
                    CellToken::Text if is_binary_type(driver_type) => {
                        let text = this.tok.str_value();
                        if text.is_empty() {
                            out.push_str("''");
                        } else {
                            let bytes = base64::engine::general_purpose::STANDARD
                                .decode(text)
                                .map_err(|e| TableWireError::schema(&table_name, format!("invalid base64 cell: {e}")))?;
                            out.push_str("_binary 0x");
                            out.push_str(&hex::encode(bytes));
                        }
                    }
                    CellToken::Text if is_date_type(driver_type) => {
                        match parse_json_datetime(this.tok.str_value()) {
                            Some(dt) => {
                                out.push('\'');
                                out.push_str(&dt.format(SQL_DATETIME_FORMAT).to_string());
                                out.push('\'');
                            }
                            None => out.push_str(&escape_sql_string(this.tok.str_value())),
                        }
                    }
                    CellToken::Text => out.push_str(&escape_sql_string(this.tok.str_value())),
                }
                Ok(())
            })?;
            out.push(')');
            rows_in_batch += 1;
        }
        if rows_in_batch == 0 {
            return Ok(None);
        }
        out.push(';');
        Ok(Some(out))
    }

    async fn read_data_csv(&mut self, writer: &mut PipeTextWriter, _table: &Table, _columns: &[ColumnInfo]) -> Result<bool> {
        if self.state != State::InRows {
            return Ok(false);
        }
        let mut rows_in_batch = 0usize;
        while rows_in_batch < self.batch_rows {
            match self.tok.read()? {
                TokenKind::EndArray => {
                    self.read_table_trailer()?;
                    break;
                }
                TokenKind::StartArray => {}
                other => return Err(self.err(format!("unexpected token {other:?} in rows array"))),
            }

            // Cells have to be materialized before writing: the writer's
            // awaits can't interleave with the tokenizer borrow.
            let mut cells: Vec<Option<String>> = Vec::with_capacity(self.columns_meta.len());
            self.read_row_cells(|this, index, cell| {
                let driver_type = &this.columns_meta[index].1;
                let rendered = match cell {
                    CellToken::Null => None,
                    CellToken::Boolean(true) => Some("1".to_string()),
                    CellToken::Boolean(false) => Some("0".to_string()),
                    CellToken::Number => Some(this.tok.str_value().to_string()),
                    CellToken::Text if is_date_type(driver_type) => Some(
                        match parse_json_datetime(this.tok.str_value()) {
                            Some(dt) => dt.format(SQL_DATETIME_FORMAT).to_string(),
                            None => this.tok.str_value().to_string(),
                        },
                    ),
                    // Binary cells stay base64 for the loader's FROM_BASE64
                    // rewrite; write_csv_cell never needs to escape base64.
                    CellToken::Text => Some(this.tok.str_value().to_string()),
                };
                cells.push(rendered);
                Ok(())
            })?;
            for (index, cell) in cells.iter().enumerate() {
                if index > 0 {
                    writer.write(",").await;
                }
                match cell {
                    None => writer.write("\\N").await,
                    Some(text) => writer.write_csv_cell(text, true).await,
                }
            }
            writer.write("\n").await;
            rows_in_batch += 1;
        }
        Ok(rows_in_batch > 0)
    }

    fn rows_read(&self) -> u64 {
        self.rows_read
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn importer(input: &str, batch_rows: usize) -> JsonImporter<Cursor<Vec<u8>>> {
        JsonImporter::new(JsonTokenizer::new(Cursor::new(input.as_bytes().to_vec())), batch_rows, false)
    }

    const ENVELOPE: &str = concat!(
        r#"{"version":2,"tables":[{"name":"t","#,
        r#""create_statement":"CREATE TABLE `t` (`id` INT NOT NULL, `payload` BLOB NULL, `seen` DATETIME NULL);","#,
        r#""columns":{"id":"INT","payload":"BLOB","seen":"DATETIME"},"#,
        r#""approx_count":2,"#,
        r#""rows":[[1,"aGk=","2024-01-02T03:04:05.000Z"],[2,null,null]],"#,
        r#""actual_count":2}]}"#,
    );

    #[tokio::test]
    async fn reads_envelope_and_renders_insert_batches() {
        let mut imp = importer(ENVELOPE, 10);
        let next = imp.read_next_table().await.unwrap().unwrap();
        assert_eq!(next.table.name, "t");
        assert_eq!(next.approx_rows, Some(2));

        let sql = imp.read_data_sql(&next.table, &[]).await.unwrap().unwrap();
        assert_eq!(
            sql,
            "INSERT INTO `t` (`id`, `payload`, `seen`) VALUES \
             (1,_binary 0x6869,'2024-01-02 03:04:05'),(2,NULL,NULL);"
        );
        assert!(imp.read_data_sql(&next.table, &[]).await.unwrap().is_none());
        assert!(imp.read_next_table().await.unwrap().is_none());
        assert_eq!(imp.rows_read(), 2);
    }

    #[tokio::test]
    async fn batch_ceiling_splits_rows_across_statements() {
        let mut imp = importer(ENVELOPE, 1);
        let next = imp.read_next_table().await.unwrap().unwrap();
        let first = imp.read_data_sql(&next.table, &[]).await.unwrap().unwrap();
        let second = imp.read_data_sql(&next.table, &[]).await.unwrap().unwrap();
        assert!(first.contains("(1,"));
        assert!(second.contains("(2,"));
        assert!(imp.read_data_sql(&next.table, &[]).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rejects_other_envelope_versions() {
        let mut imp = importer(r#"{"version":1,"tables":[]}"#, 10);
        let err = imp.read_next_table().await.unwrap_err();
        assert!(matches!(err, TableWireError::Unsupported { .. }));
    }

    #[tokio::test]
    async fn row_with_wrong_cell_count_is_a_schema_error() {
        let input = ENVELOPE.replace(r#"[2,null,null]"#, r#"[2,null]"#);
        let mut imp = importer(&input, 10);
        let next = imp.read_next_table().await.unwrap().unwrap();
        let err = imp.read_data_sql(&next.table, &[]).await.unwrap_err();
        assert!(matches!(err, TableWireError::Schema { .. }));
    }
}
