//! The CSV importer. Reads exactly one table; the column set comes from
//! the header row or an explicit list, and per-cell rendering is driven by
//! the *destination* table's driver types rather than any metadata in the
//! input (CSV carries none).

use std::collections::VecDeque;
use std::io::{self, Read};

use async_trait::async_trait;
use base64::Engine;

use tablewire_common::error::{Result, TableWireError};
use tablewire_schema::{ColumnInfo, Table};
use tablewire_tokenizer::PipeTextWriter;

use crate::cell::{escape_sql_identifier, escape_sql_string};
use crate::import::{Importer, NextTable};

/// Rewrites the MySQL CSV dialect to RFC 4180 on the fly: inside a quoted
/// field, `\"` becomes `""` and `\\` collapses to a single backslash.
/// Bytes outside quotes, including the bare `\N` null marker, pass
/// through untouched.
pub struct MysqlDialectReader<R> {
    inner: R,
    out: VecDeque<u8>,
    in_quotes: bool,
    held_backslash: bool,
}

impl<R: Read> MysqlDialectReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, out: VecDeque::new(), in_quotes: false, held_backslash: false }
    }

    fn transform(&mut self, byte: u8) {
        if self.held_backslash {
            self.held_backslash = false;
            match byte {
                b'"' => {
                    self.out.push_back(b'"');
                    self.out.push_back(b'"');
                }
                b'\\' => self.out.push_back(b'\\'),
                other => {
                    self.out.push_back(b'\\');
                    self.transform(other);
                }
            }
            return;
        }
        match byte {
            b'\\' if self.in_quotes => self.held_backslash = true,
            b'"' => {
                self.in_quotes = !self.in_quotes;
                self.out.push_back(b'"');
            }
            other => self.out.push_back(other),
        }
    }
}

impl<R: Read> Read for MysqlDialectReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut chunk = [0u8; 4096];
        while self.out.is_empty() {
            let n = self.inner.read(&mut chunk)?;
            if n == 0 {
                if self.held_backslash {
                    self.held_backslash = false;
                    self.out.push_back(b'\\');
                }
                break;
            }
            for &b in &chunk[..n] {
                self.transform(b);
            }
        }
        let take = buf.len().min(self.out.len());
        for slot in buf.iter_mut().take(take) {
            *slot = self.out.pop_front().expect("queue holds at least `take` bytes");
        }
        Ok(take)
    }
}

/// Incremental RFC 4180 record reader with two deviations: a bare
/// unquoted `\N` is a null cell, and byte columns arrive base64-encoded
/// (decoding is the caller's business).
struct CsvRecordReader<R> {
    reader: R,
    buf: Vec<u8>,
    pos: usize,
    len: usize,
    eof: bool,
    line: u64,
}

impl<R: Read> CsvRecordReader<R> {
    fn new(reader: R) -> Self {
        Self { reader, buf: vec![0u8; 8192], pos: 0, len: 0, eof: false, line: 1 }
    }

    fn peek(&mut self) -> io::Result<Option<u8>> {
        if self.pos >= self.len && !self.eof {
            self.len = self.reader.read(&mut self.buf)?;
            self.pos = 0;
            self.eof = self.len == 0;
        }
        Ok(if self.pos < self.len { Some(self.buf[self.pos]) } else { None })
    }

    fn bump(&mut self) -> io::Result<Option<u8>> {
        let b = self.peek()?;
        if b.is_some() {
            self.pos += 1;
        }
        Ok(b)
    }

    fn err(&self, message: impl Into<String>) -> TableWireError {
        TableWireError::parse(self.line as usize, message.into())
    }

    /// `None` cell = null (`\N`). Returns `Ok(None)` at end of input.
    fn read_record(&mut self) -> Result<Option<Vec<Option<String>>>> {
        if self.peek().map_err(TableWireError::Io)?.is_none() {
            return Ok(None);
        }
        let mut record = Vec::new();
        loop {
            let cell = self.read_cell()?;
            record.push(cell);
            match self.bump().map_err(TableWireError::Io)? {
                Some(b',') => continue,
                Some(b'\r') => {
                    if self.bump().map_err(TableWireError::Io)? != Some(b'\n') {
                        return Err(self.err("bare carriage return between records"));
                    }
                    self.line += 1;
                    break;
                }
                Some(b'\n') => {
                    self.line += 1;
                    break;
                }
                None => break,
                Some(other) => {
                    return Err(self.err(format!("unexpected character {:?} after field", other as char)))
                }
            }
        }
        Ok(Some(record))
    }

    /// Leaves the separator/terminator for `read_record` to consume.
    fn read_cell(&mut self) -> Result<Option<String>> {
        if self.peek().map_err(TableWireError::Io)? == Some(b'"') {
            self.bump().map_err(TableWireError::Io)?;
            let mut text = Vec::new();
            loop {
                match self.bump().map_err(TableWireError::Io)? {
                    None => return Err(self.err("unterminated quoted field")),
                    Some(b'"') => {
                        if self.peek().map_err(TableWireError::Io)? == Some(b'"') {
                            self.bump().map_err(TableWireError::Io)?;
                            text.push(b'"');
                            continue;
                        }
                        break;
                    }
                    Some(b'\n') => {
                        self.line += 1;
                        text.push(b'\n');
                    }
                    Some(byte) => text.push(byte),
                }
            }
            // Strictness is the point here: anything between the closing
            // quote and the next separator means a non-conforming dialect
            // (see the `csv_fix_invalid` adaptor).
            match self.peek().map_err(TableWireError::Io)? {
                None | Some(b',') | Some(b'\n') | Some(b'\r') => {}
                Some(other) => {
                    return Err(self.err(format!("unexpected character {:?} after closing quote", other as char)))
                }
            }
            let text = String::from_utf8(text).map_err(|_| self.err("invalid utf-8 in quoted field"))?;
            Ok(Some(text))
        } else {
            let mut text = Vec::new();
            loop {
                match self.peek().map_err(TableWireError::Io)? {
                    None | Some(b',') | Some(b'\n') | Some(b'\r') => break,
                    Some(byte) => {
                        self.bump().map_err(TableWireError::Io)?;
                        text.push(byte);
                    }
                }
            }
            if text == b"\\N" {
                return Ok(None);
            }
            let text = String::from_utf8(text).map_err(|_| self.err("invalid utf-8 in field"))?;
            Ok(Some(text))
        }
    }
}

fn is_numeric_type(driver_type: &str) -> bool {
    let upper = driver_type.to_ascii_uppercase();
    ["INT", "DECIMAL", "NUMERIC", "FLOAT", "DOUBLE", "REAL", "BIT"]
        .iter()
        .any(|t| upper.contains(t))
}

fn is_binary_type(driver_type: &str) -> bool {
    let upper = driver_type.to_ascii_uppercase();
    upper.contains("BLOB") || upper.contains("BINARY")
}

pub struct CsvImporter<R> {
    reader: CsvRecordReader<R>,
    table_name: String,
    use_header: bool,
    explicit_columns: Vec<String>,
    /// Source column names, resolved from the header or the explicit list
    /// on first use; destination order when neither is given.
    source_columns: Option<Vec<String>>,
    /// Destination ColumnInfo per source column, same order.
    cell_types: Option<Vec<ColumnInfo>>,
    batch_rows: usize,
    insert_ignore: bool,
    rows_read: u64,
    table_returned: bool,
    done: bool,
}

impl<R: Read> CsvImporter<R> {
    pub fn new(
        reader: R,
        table_name: impl Into<String>,
        use_header: bool,
        explicit_columns: Vec<String>,
        batch_rows: usize,
        insert_ignore: bool,
    ) -> Self {
        Self {
            reader: CsvRecordReader::new(reader),
            table_name: table_name.into(),
            use_header,
            explicit_columns,
            source_columns: None,
            cell_types: None,
            batch_rows: batch_rows.max(1),
            insert_ignore,
            rows_read: 0,
            table_returned: false,
            done: false,
        }
    }

    /// Maps the source column list onto the destination schema; a source
    /// column the destination lacks is a schema error raised before any
    /// INSERT has been produced.
    fn resolve_columns(&mut self, destination: &[ColumnInfo]) -> Result<()> {
        if self.cell_types.is_some() {
            return Ok(());
        }
        let source: Vec<String> = match &self.source_columns {
            Some(cols) => cols.clone(),
            None => {
                if self.explicit_columns.is_empty() {
                    destination.iter().map(|c| c.name.clone()).collect()
                } else {
                    self.explicit_columns.clone()
                }
            }
        };
        let mut cell_types = Vec::with_capacity(source.len());
        for name in &source {
            let info = destination
                .iter()
                .find(|c| c.name.eq_ignore_ascii_case(name))
                .ok_or_else(|| {
                    TableWireError::schema(&self.table_name, format!("destination has no column `{name}`"))
                })?;
            cell_types.push(info.clone());
        }
        self.source_columns = Some(source);
        self.cell_types = Some(cell_types);
        Ok(())
    }

    fn next_record(&mut self) -> Result<Option<Vec<Option<String>>>> {
        let Some(record) = self.reader.read_record()? else {
            self.done = true;
            return Ok(None);
        };
        let expected = self.cell_types.as_ref().map(Vec::len).unwrap_or(0);
        if record.len() != expected {
            return Err(TableWireError::schema(
                &self.table_name,
                format!("row {} has {} cells, expected {expected}", self.rows_read + 1, record.len()),
            ));
        }
        Ok(Some(record))
    }

    fn render_sql_cell(cell: &Option<String>, info: &ColumnInfo, table: &str, out: &mut String) -> Result<()> {
        let Some(text) = cell else {
            out.push_str("NULL");
            return Ok(());
        };
        if is_binary_type(&info.driver_type_name) {
            if text.is_empty() {
                out.push_str("''");
                return Ok(());
            }
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(text)
                .map_err(|e| TableWireError::schema(table, format!("invalid base64 in column `{}`: {e}", info.name)))?;
            out.push_str("_binary 0x");
            out.push_str(&hex::encode(bytes));
        } else if is_numeric_type(&info.driver_type_name) {
            out.push_str(text);
        } else {
            out.push_str(&escape_sql_string(text));
        }
        Ok(())
    }
}

#[async_trait]
impl<R: Read + Send> Importer for CsvImporter<R> {
    async fn read_next_table(&mut self) -> Result<Option<NextTable>> {
        if self.table_returned {
            return Ok(None);
        }
        self.table_returned = true;
        if self.use_header {
            let Some(header) = self.reader.read_record()? else {
                self.done = true;
                return Ok(None);
            };
            let names = header
                .into_iter()
                .map(|cell| cell.ok_or_else(|| TableWireError::schema(&self.table_name, "null cell in header row")))
                .collect::<Result<Vec<_>>>()?;
            self.source_columns = Some(names);
        }
        // CSV carries no DDL; the caller resolves the destination schema
        // and hands it back through the `columns` parameter.
        Ok(Some(NextTable { table: Table::new(self.table_name.clone()), approx_rows: None }))
    }

    async fn read_data_sql(&mut self, table: &Table, columns: &[ColumnInfo]) -> Result<Option<String>> {
        if self.done {
            return Ok(None);
        }
        self.resolve_columns(columns)?;
        let source = self.source_columns.as_ref().expect("resolved above").clone();
        let cell_types = self.cell_types.as_ref().expect("resolved above").clone();

        let mut out = String::new();
        let mut rows_in_batch = 0usize;
        while rows_in_batch < self.batch_rows {
            let Some(record) = self.next_record()? else { break };
            if rows_in_batch == 0 {
                let verb = if self.insert_ignore { "INSERT IGNORE INTO" } else { "INSERT INTO" };
                let cols = source.iter().map(|c| escape_sql_identifier(c)).collect::<Vec<_>>().join(", ");
                out.push_str(&format!("{verb} {} ({cols}) VALUES ", escape_sql_identifier(&table.name)));
            } else {
                out.push(',');
            }
            out.push('(');
            for (index, (cell, info)) in record.iter().zip(cell_types.iter()).enumerate() {
                if index > 0 {
                    out.push(',');
                }
                Self::render_sql_cell(cell, info, &table.name, &mut out)?;
            }
            out.push(')');
            rows_in_batch += 1;
            self.rows_read += 1;
        }
        if rows_in_batch == 0 {
            return Ok(None);
        }
        out.push(';');
        Ok(Some(out))
    }

    async fn read_data_csv(&mut self, writer: &mut PipeTextWriter, _table: &Table, columns: &[ColumnInfo]) -> Result<bool> {
        if self.done {
            return Ok(false);
        }
        self.resolve_columns(columns)?;
        let cell_types = self.cell_types.as_ref().expect("resolved above").clone();

        let mut rows_in_batch = 0usize;
        while rows_in_batch < self.batch_rows {
            let Some(record) = self.next_record()? else { break };
            for (index, (cell, info)) in record.iter().zip(cell_types.iter()).enumerate() {
                if index > 0 {
                    writer.write(",").await;
                }
                match cell {
                    None => writer.write("\\N").await,
                    // Base64 passes through untouched; the bulk-loader's
                    // FROM_BASE64 rewrite decodes it server-side.
                    Some(text) if is_binary_type(&info.driver_type_name) => writer.write(text).await,
                    Some(text) => writer.write_csv_cell(text, true).await,
                }
            }
            writer.write("\n").await;
            rows_in_batch += 1;
            self.rows_read += 1;
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

    fn read_all<R: Read>(reader: &mut CsvRecordReader<R>) -> Vec<Vec<Option<String>>> {
        let mut records = Vec::new();
        while let Some(record) = reader.read_record().unwrap() {
            records.push(record);
        }
        records
    }

    #[test]
    fn plain_records_and_null_markers() {
        let mut r = CsvRecordReader::new(Cursor::new(b"a,b,c\n1,\\N,3\n".to_vec()));
        let records = read_all(&mut r);
        assert_eq!(records.len(), 2);
        assert_eq!(records[1], vec![Some("1".into()), None, Some("3".into())]);
    }

    #[test]
    fn quoted_fields_with_doubled_quotes_and_embedded_newline() {
        let mut r = CsvRecordReader::new(Cursor::new(b"\"a,\"\"b\"\"\",\"x\ny\"\n".to_vec()));
        let records = read_all(&mut r);
        assert_eq!(records[0], vec![Some("a,\"b\"".into()), Some("x\ny".into())]);
    }

    #[test]
    fn garbage_after_closing_quote_is_a_parse_error() {
        let mut r = CsvRecordReader::new(Cursor::new(br#""a\"b""#.to_vec()));
        assert!(r.read_record().is_err());
    }

    #[test]
    fn mysql_dialect_adaptor_rewrites_escaped_quotes() {
        let mut adapted = MysqlDialectReader::new(Cursor::new(br#""a\"b",\N"#.to_vec()));
        let mut out = String::new();
        adapted.read_to_string(&mut out).unwrap();
        assert_eq!(out, "\"a\"\"b\",\\N");

        let mut r = CsvRecordReader::new(MysqlDialectReader::new(Cursor::new(br#""a\"b",\N"#.to_vec())));
        let records = read_all(&mut r);
        assert_eq!(records[0], vec![Some("a\"b".into()), None]);
    }

    #[test]
    fn mysql_dialect_adaptor_respects_doubled_backslashes() {
        // `\\` is a literal backslash, so the quote that follows closes the
        // field instead of being rewritten.
        let mut adapted = MysqlDialectReader::new(Cursor::new(br#""a\\""#.to_vec()));
        let mut out = String::new();
        adapted.read_to_string(&mut out).unwrap();
        assert_eq!(out, "\"a\\\"");
    }

    #[tokio::test]
    async fn mismatched_explicit_columns_raise_schema_error_before_any_insert() {
        use tablewire_common::value::ColumnCategory;
        let destination = vec![ColumnInfo {
            name: "id".to_string(),
            category: ColumnCategory::Default,
            driver_type_name: "INT".to_string(),
        }];
        let mut importer = CsvImporter::new(
            Cursor::new(b"1,x\n".to_vec()),
            "t",
            false,
            vec!["id".to_string(), "missing".to_string()],
            100,
            false,
        );
        let next = importer.read_next_table().await.unwrap().unwrap();
        let err = importer.read_data_sql(&next.table, &destination).await.unwrap_err();
        assert!(matches!(err, TableWireError::Schema { .. }));
    }

    #[tokio::test]
    async fn header_names_drive_the_insert_column_list() {
        use tablewire_common::value::ColumnCategory;
        let destination = vec![
            ColumnInfo { name: "id".into(), category: ColumnCategory::Default, driver_type_name: "INT".into() },
            ColumnInfo { name: "name".into(), category: ColumnCategory::Default, driver_type_name: "VARCHAR(32)".into() },
        ];
        let mut importer = CsvImporter::new(
            Cursor::new(b"name,id\nalice,1\n".to_vec()),
            "users",
            true,
            Vec::new(),
            100,
            false,
        );
        let next = importer.read_next_table().await.unwrap().unwrap();
        let sql = importer.read_data_sql(&next.table, &destination).await.unwrap().unwrap();
        assert_eq!(sql, "INSERT INTO `users` (`name`, `id`) VALUES ('alice',1);");
        assert!(importer.read_data_sql(&next.table, &destination).await.unwrap().is_none());
    }
}
