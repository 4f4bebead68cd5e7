//! The SQL importer. Drives one `SqlTokenizer` across repeated calls:
//! `read_next_table` scans up to and through a `CREATE TABLE` statement
//! (skipping `DELIMITER`-bracketed routine bodies),
//! `read_data_sql`/`read_data_csv` stream the `INSERT` statements that
//! follow it.

use std::io::Read;

use async_trait::async_trait;
use tablewire_common::error::{Result, TableWireError};
use tablewire_schema::{ColumnInfo, CreateTableParser, Table};
use tablewire_tokenizer::sql::{SqlTokenizer, TokenKind};
use tablewire_tokenizer::PipeTextWriter;

use crate::cell::escape_sql_identifier;
use crate::import::{Importer, NextTable};

pub struct SqlImporter<R> {
    tok: Option<SqlTokenizer<R>>,
    pending: Option<TokenKind>,
    /// Column order of the `INSERT` currently being read for the active
    /// table; `None` until the first `INSERT` is seen.
    current_columns: Option<Vec<String>>,
    rows_emitted_for_columns: bool,
    rows_read: u64,
    batch_rows: usize,
    at_eof: bool,
    /// Set once `read_next_table` sees the `CREATE TABLE` that starts
    /// another table while this one is still draining; `read_data_sql`
    /// returns `None` immediately so the orchestrator moves on, and the
    /// parsed table is handed back on the next `read_next_table` call.
    pending_next_table: Option<NextTable>,
}

impl<R: Read> SqlImporter<R> {
    pub fn new(tok: SqlTokenizer<R>, batch_rows: usize) -> Self {
        Self {
            tok: Some(tok),
            pending: None,
            current_columns: None,
            rows_emitted_for_columns: false,
            rows_read: 0,
            batch_rows: batch_rows.max(1),
            at_eof: false,
            pending_next_table: None,
        }
    }

    fn tok(&self) -> &SqlTokenizer<R> {
        self.tok.as_ref().expect("tokenizer temporarily taken")
    }

    fn tok_mut(&mut self) -> &mut SqlTokenizer<R> {
        self.tok.as_mut().expect("tokenizer temporarily taken")
    }

    fn next(&mut self) -> Result<TokenKind> {
        if let Some(k) = self.pending.take() {
            return Ok(k);
        }
        self.tok_mut().read()
    }

    fn is_kw(&self, word: &str) -> bool {
        self.tok().kind() == TokenKind::Identifier && self.tok().str_value().eq_ignore_ascii_case(word)
    }

    /// Consumes tokens until the matching closing `DELIMITER <marker>`
    /// clause that re-establishes `;`; stored procedures and triggers are
    /// skipped wholesale.
    fn skip_delimiter_block(&mut self) -> Result<()> {
        loop {
            let k = self.next()?;
            if k == TokenKind::Eof {
                return Err(TableWireError::unsupported("<procedure>", "unterminated DELIMITER block"));
            }
            if k == TokenKind::Identifier && self.tok().str_value().eq_ignore_ascii_case("DELIMITER") {
                self.next()?; // the marker token resetting back to `;`
                return Ok(());
            }
        }
    }

    /// Scans forward for the next `CREATE TABLE`, skipping `DELIMITER`
    /// blocks along the way, and parses it.
    fn scan_to_next_create_table(tok: SqlTokenizer<R>) -> Result<Option<(Table, SqlTokenizer<R>)>> {
        let mut importer = SqlImporter::new(tok, 1);
        loop {
            let k = importer.next()?;
            if k == TokenKind::Eof {
                return Ok(None);
            }
            if k == TokenKind::Identifier && importer.tok().str_value().eq_ignore_ascii_case("DELIMITER") {
                importer.skip_delimiter_block()?;
                continue;
            }
            if k == TokenKind::Identifier && importer.tok().str_value().eq_ignore_ascii_case("CREATE") {
                let next = importer.next()?;
                if next == TokenKind::Identifier && importer.tok().str_value().eq_ignore_ascii_case("TABLE") {
                    let parser = CreateTableParser::new(importer.tok.take().expect("tokenizer temporarily taken"));
                    let (table, tok) = parser.parse_retaining_tokenizer()?;
                    return Ok(Some((table, tok)));
                }
                // CREATE VIEW / CREATE PROCEDURE / etc. without a
                // DELIMITER guard: nothing else to do but keep scanning.
                importer.pending = Some(next);
            }
        }
    }

    /// Consumes one `INSERT [IGNORE] INTO <table> [(cols)] VALUES (...),
    /// ...;` statement, re-escaping its cells for the target dialect.
    fn read_insert_statement(&mut self, table: &Table) -> Result<Option<String>> {
        loop {
            let k = self.next()?;
            if k == TokenKind::Eof {
                self.at_eof = true;
                return Ok(None);
            }
            if k == TokenKind::Identifier && self.tok().str_value().eq_ignore_ascii_case("DELIMITER") {
                self.skip_delimiter_block()?;
                continue;
            }
            if k == TokenKind::Identifier && self.is_kw("CREATE") {
                let next = self.next()?;
                if next == TokenKind::Identifier && self.tok().str_value().eq_ignore_ascii_case("TABLE") {
                    let placeholder = self.tok.take().expect("tokenizer temporarily taken");
                    let parser = CreateTableParser::new(placeholder);
                    let (next_table, tok) = parser.parse_retaining_tokenizer()?;
                    self.tok = Some(tok);
                    self.pending_next_table = Some(NextTable { table: next_table, approx_rows: None });
                    return Ok(None);
                }
                self.pending = Some(next);
                continue;
            }
            if !(k == TokenKind::Identifier && self.is_kw("INSERT")) {
                continue;
            }

            let mut next = self.next()?;
            let insert_ignore = next == TokenKind::Identifier && self.tok().str_value().eq_ignore_ascii_case("IGNORE");
            if insert_ignore {
                next = self.next()?;
            }
            let _ = next; // INTO
            self.next()?;
            if self.tok().kind() != TokenKind::Identifier {
                return Err(TableWireError::parse(0, "expected table name after INSERT INTO"));
            }

            let mut columns = Vec::new();
            let mut after = self.next()?;
            if after == TokenKind::LeftParen {
                loop {
                    self.next()?;
                    if self.tok().kind() != TokenKind::Identifier {
                        return Err(TableWireError::parse(0, "expected column name in INSERT column list"));
                    }
                    columns.push(self.tok().str_value().to_string());
                    match self.next()? {
                        TokenKind::Comma => continue,
                        TokenKind::RightParen => break,
                        other => return Err(TableWireError::parse(0, format!("expected `,` or `)`, found {other:?}"))),
                    }
                }
                after = self.next()?;
            }
            if !(after == TokenKind::Identifier && self.tok().str_value().eq_ignore_ascii_case("VALUES")) {
                return Err(TableWireError::parse(0, "expected VALUES in INSERT statement"));
            }

            let effective_columns = if columns.is_empty() {
                table.columns.iter().map(|c| c.name.clone()).collect::<Vec<_>>()
            } else {
                columns
            };

            if let Some(current) = &self.current_columns {
                if current != &effective_columns {
                    if self.rows_emitted_for_columns {
                        return Err(TableWireError::unsupported(
                            &table.name,
                            "INSERT column order changed mid-table after rows were already emitted",
                        ));
                    }
                    self.current_columns = Some(effective_columns.clone());
                }
            } else {
                self.current_columns = Some(effective_columns.clone());
            }

            let cols_sql = effective_columns.iter().map(|c| escape_sql_identifier(c)).collect::<Vec<_>>().join(", ");
            let mut out = format!(
                "{} {} ({cols_sql}) VALUES ",
                if insert_ignore { "INSERT IGNORE INTO" } else { "INSERT INTO" },
                escape_sql_identifier(&table.name),
            );

            let mut tuple_count = 0u64;
            loop {
                if self.next()? != TokenKind::LeftParen {
                    return Err(TableWireError::parse(0, "expected `(` to start a VALUES tuple"));
                }
                out.push('(');
                self.stream_value_tuple_sql(&mut out)?;
                out.push(')');
                tuple_count += 1;
                match self.next()? {
                    TokenKind::Comma => {
                        out.push(',');
                        continue;
                    }
                    TokenKind::Semicolon | TokenKind::Eof => break,
                    other => return Err(TableWireError::parse(0, format!("unexpected token after VALUES tuple: {other:?}"))),
                }
            }
            out.push(';');
            self.rows_read += tuple_count;
            self.rows_emitted_for_columns = true;
            return Ok(Some(out));
        }
    }

    /// Streams one parenthesized value list through to `out`, re-escaping
    /// for the target. Number tokens pass through in their textual form,
    /// never through a float round-trip that would clip a wide decimal.
    fn stream_value_tuple_sql(&mut self, out: &mut String) -> Result<()> {
        loop {
            match self.next()? {
                TokenKind::RightParen => return Ok(()),
                TokenKind::Comma => out.push(','),
                TokenKind::Str => out.push_str(&crate::cell::escape_sql_string(self.tok().str_value())),
                TokenKind::Integer | TokenKind::Double => out.push_str(self.tok().str_value()),
                TokenKind::Null => out.push_str("NULL"),
                TokenKind::BinaryBlob => {
                    if self.tok().str_value().is_empty() {
                        out.push_str("''");
                    } else {
                        out.push_str("_binary 0x");
                        out.push_str(self.tok().str_value());
                    }
                }
                other => return Err(TableWireError::parse(0, format!("unexpected token in VALUES tuple: {other:?}"))),
            }
        }
    }

    /// Collects one value tuple as CSV cells; `None` is a SQL `NULL` and
    /// comes out as a bare `\N` rather than an escaped string.
    fn stream_value_tuple_csv(&mut self, cells: &mut Vec<Option<String>>) -> Result<()> {
        let mut current = String::new();
        let mut is_null = false;
        loop {
            match self.next()? {
                TokenKind::RightParen => {
                    cells.push(if is_null { None } else { Some(current) });
                    return Ok(());
                }
                TokenKind::Comma => {
                    cells.push(if is_null { None } else { Some(std::mem::take(&mut current)) });
                    is_null = false;
                }
                TokenKind::Str => current.push_str(self.tok().str_value()),
                TokenKind::Integer | TokenKind::Double => current.push_str(self.tok().str_value()),
                TokenKind::Null => is_null = true,
                TokenKind::BinaryBlob => {
                    if !self.tok().str_value().is_empty() {
                        use base64::Engine;
                        let bytes = tablewire_tokenizer::sql::decode_hex_blob(self.tok().str_value())
                            .map_err(|e| TableWireError::parse(0, e.to_string()))?;
                        current.push_str(&base64::engine::general_purpose::STANDARD.encode(bytes));
                    }
                }
                other => return Err(TableWireError::parse(0, format!("unexpected token in VALUES tuple: {other:?}"))),
            }
        }
    }
}

#[async_trait]
impl<R: Read + Send> Importer for SqlImporter<R> {
    async fn read_next_table(&mut self) -> Result<Option<NextTable>> {
        if let Some(next) = self.pending_next_table.take() {
            self.current_columns = None;
            self.rows_emitted_for_columns = false;
            return Ok(Some(next));
        }
        if self.at_eof {
            return Ok(None);
        }
        let placeholder = self.tok.take().expect("tokenizer temporarily taken");
        match Self::scan_to_next_create_table(placeholder)? {
            Some((table, tok)) => {
                self.tok = Some(tok);
                self.current_columns = None;
                self.rows_emitted_for_columns = false;
                Ok(Some(NextTable { table, approx_rows: None }))
            }
            None => {
                self.at_eof = true;
                Ok(None)
            }
        }
    }

    async fn read_data_sql(&mut self, table: &Table, _columns: &[ColumnInfo]) -> Result<Option<String>> {
        if self.pending_next_table.is_some() {
            return Ok(None);
        }
        self.read_insert_statement(table)
    }

    async fn read_data_csv(&mut self, writer: &mut PipeTextWriter, table: &Table, _columns: &[ColumnInfo]) -> Result<bool> {
        if self.pending_next_table.is_some() {
            return Ok(false);
        }
        loop {
            let k = self.next()?;
            if k == TokenKind::Eof {
                self.at_eof = true;
                return Ok(false);
            }
            if k == TokenKind::Identifier && self.tok().str_value().eq_ignore_ascii_case("DELIMITER") {
                self.skip_delimiter_block()?;
                continue;
            }
            if k == TokenKind::Identifier && self.is_kw("CREATE") {
                let next = self.next()?;
                if next == TokenKind::Identifier && self.tok().str_value().eq_ignore_ascii_case("TABLE") {
                    let placeholder = self.tok.take().expect("tokenizer temporarily taken");
                    let parser = CreateTableParser::new(placeholder);
                    let (next_table, tok) = parser.parse_retaining_tokenizer()?;
                    self.tok = Some(tok);
                    self.pending_next_table = Some(NextTable { table: next_table, approx_rows: None });
                    return Ok(false);
                }
                self.pending = Some(next);
                continue;
            }
            if !(k == TokenKind::Identifier && self.tok().str_value().eq_ignore_ascii_case("INSERT")) {
                continue;
            }
            self.next()?; // INTO (or IGNORE then INTO)
            if self.tok().kind() == TokenKind::Identifier && self.tok().str_value().eq_ignore_ascii_case("IGNORE") {
                self.next()?;
            }
            self.next()?; // table name
            let mut after = self.next()?;
            let mut columns = Vec::new();
            if after == TokenKind::LeftParen {
                loop {
                    self.next()?;
                    columns.push(self.tok().str_value().to_string());
                    match self.next()? {
                        TokenKind::Comma => continue,
                        TokenKind::RightParen => break,
                        other => return Err(TableWireError::parse(0, format!("expected `,` or `)`, found {other:?}"))),
                    }
                }
                after = self.next()?;
            }
            let _ = after; // VALUES
            let effective_columns = if columns.is_empty() {
                table.columns.iter().map(|c| c.name.clone()).collect::<Vec<_>>()
            } else {
                columns
            };
            // Column-list changes are fatal here, even before the first row:
            // the bulk-loader's schema is fixed at LOAD DATA time.
            if let Some(current) = &self.current_columns {
                if current != &effective_columns {
                    return Err(TableWireError::unsupported(&table.name, "CSV bulk-load path cannot tolerate a column-list change mid-table"));
                }
            } else {
                self.current_columns = Some(effective_columns);
            }

            loop {
                if self.next()? != TokenKind::LeftParen {
                    return Err(TableWireError::parse(0, "expected `(` to start a VALUES tuple"));
                }
                let mut cells = Vec::new();
                self.stream_value_tuple_csv(&mut cells)?;
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
                self.rows_read += 1;
                match self.next()? {
                    TokenKind::Comma => continue,
                    TokenKind::Semicolon | TokenKind::Eof => return Ok(true),
                    other => return Err(TableWireError::parse(0, format!("unexpected token after VALUES tuple: {other:?}"))),
                }
            }
        }
    }

    fn rows_read(&self) -> u64 {
        self.rows_read
    }

    fn can_resynchronize(&self) -> bool {
        true
    }
}
