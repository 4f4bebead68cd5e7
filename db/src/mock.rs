//! A deterministic, in-process stand-in for `MysqlConnection`. No real
//! MySQL server is reachable from this workspace's own test suite, so this
//! interprets the small slice of SQL the pipeline actually emits
//! (`CREATE TABLE`, `INSERT INTO ... VALUES`, `TRUNCATE`, `SELECT`,
//! `SELECT COUNT(*)`) directly against an in-memory table map, reusing
//! `tablewire_schema::CreateTableParser` for DDL and
//! `tablewire_tokenizer::SqlTokenizer` for the statement bodies rather
//! than hand-rolling a second lexer.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::NaiveDateTime;

use tablewire_common::error::{Result, TableWireError};
use tablewire_common::value::{ColumnCategory, Value};
use tablewire_schema::{Column, ColumnInfo, CreateTableParser, Table};
use tablewire_tokenizer::sql::{decode_hex_blob, SqlTokenizer, TokenKind};
use tablewire_tokenizer::Pipe;

use crate::connection::{BulkLoadOptions, Connection, ConnectionFactory, Row, RowCursor};

struct MockTable {
    schema: Table,
    rows: Vec<Row>,
}

#[derive(Default)]
struct MockState {
    tables: HashMap<String, MockTable>,
    /// Creation order, so `list_tables` mirrors `SHOW TABLES`' stable order.
    names: Vec<String>,
    /// Every statement routed through `execute`, for test assertions.
    log: Vec<String>,
}

/// Shared backing store; clone a `MockConnection` per simulated worker the
/// way `MysqlConnection::factory` hands each worker its own driver handle,
/// while still observing the same tables.
#[derive(Clone, Default)]
pub struct MockDatabase {
    state: Arc<Mutex<MockState>>,
}

impl MockDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn factory(&self) -> ConnectionFactory {
        let db = self.clone();
        ConnectionFactory::new(move || {
            let conn = MockConnection { db: db.clone() };
            async move { Ok(Box::new(conn) as Box<dyn Connection>) }
        })
    }

    /// Test-only inspection hook: the rows currently stored for `table`.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        let state = self.state.lock().unwrap();
        state.tables.get(&table.to_ascii_lowercase()).map(|t| t.rows.clone()).unwrap_or_default()
    }

    /// Test-only seeding hook: appends pre-decoded rows without routing
    /// them through the SQL front door.
    pub fn insert_rows(&self, table: &str, rows: impl IntoIterator<Item = Row>) {
        let mut state = self.state.lock().unwrap();
        if let Some(t) = state.tables.get_mut(&table.to_ascii_lowercase()) {
            t.rows.extend(rows);
        }
    }

    /// Test-only inspection hook: every statement `execute` has seen.
    pub fn executed_statements(&self) -> Vec<String> {
        self.state.lock().unwrap().log.clone()
    }
}

pub struct MockConnection {
    db: MockDatabase,
}

impl MockConnection {
    pub fn new(db: MockDatabase) -> Self {
        Self { db }
    }
}

fn tokenize(sql: &str) -> SqlTokenizer<Cursor<Vec<u8>>> {
    SqlTokenizer::new(Cursor::new(sql.as_bytes().to_vec()))
}

fn expect_identifier(tok: &mut SqlTokenizer<Cursor<Vec<u8>>>) -> Result<String> {
    if tok.kind() != TokenKind::Identifier {
        return Err(TableWireError::parse(tok.str_value().len(), "expected an identifier"));
    }
    Ok(tok.str_value().to_string())
}

/// Parses one `(v1, v2, ...)` value tuple for an `INSERT ... VALUES` body.
/// Plain `d.d` literals decode as `Decimal` so wide `DECIMAL(M,D)` cells
/// survive the round trip at full precision; exponent forms stay floats.
fn parse_value_tuple(tok: &mut SqlTokenizer<Cursor<Vec<u8>>>) -> Result<Vec<Value>> {
    let mut values = Vec::new();
    loop {
        let kind = tok.read()?;
        let value = match kind {
            TokenKind::Str => Value::String(tok.str_value().to_string()),
            TokenKind::Integer => Value::Integer(tok.int_value()),
            TokenKind::Double => {
                let text = tok.str_value();
                if text.contains(['e', 'E']) {
                    Value::Float(tok.double_value())
                } else {
                    text.parse::<BigDecimal>()
                        .map(Value::Decimal)
                        .unwrap_or(Value::Float(tok.double_value()))
                }
            }
            TokenKind::Null => Value::Null,
            TokenKind::BinaryBlob => Value::Bytes(decode_hex_blob(tok.str_value())?),
            TokenKind::Identifier if tok.str_value().eq_ignore_ascii_case("TRUE") => Value::Boolean(true),
            TokenKind::Identifier if tok.str_value().eq_ignore_ascii_case("FALSE") => Value::Boolean(false),
            other => return Err(TableWireError::parse(0, format!("unexpected token {other:?} in VALUES tuple"))),
        };
        values.push(value);
        match tok.read()? {
            TokenKind::Comma => continue,
            TokenKind::RightParen => break,
            other => return Err(TableWireError::parse(0, format!("expected `,` or `)`, found {other:?}"))),
        }
    }
    Ok(values)
}

/// Mirrors the implicit conversions a real server applies on INSERT: text
/// headed for a binary column becomes bytes, text headed for a datetime
/// column is parsed.
fn coerce_for_column(value: Value, column: &Column) -> Value {
    let category = ColumnCategory::from_driver_type_name(&column.type_expr);
    match (value, category) {
        (Value::String(s), ColumnCategory::Binary) => Value::Bytes(s.into_bytes()),
        (Value::String(s), ColumnCategory::Date) => {
            match NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S") {
                Ok(dt) => Value::DateTime(dt),
                Err(_) => Value::String(s),
            }
        }
        (value, _) => value,
    }
}

/// Splits one mysql-dialect CSV stream (backslash escapes, `\N` nulls, no
/// quoting, exactly what the importers feed the worker pipes) into
/// records.
fn parse_mysql_csv(text: &str) -> Vec<Vec<Option<String>>> {
    let mut records = Vec::new();
    let mut record: Vec<Option<String>> = Vec::new();
    let mut field = String::new();
    let mut is_null = false;
    let mut chars = text.chars().peekable();
    let mut line_has_content = false;

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                line_has_content = true;
                match chars.next() {
                    Some('N') => is_null = true,
                    Some('n') => field.push('\n'),
                    Some('r') => field.push('\r'),
                    Some('t') => field.push('\t'),
                    Some('0') => field.push('\0'),
                    Some(',') => field.push(','),
                    Some('"') => field.push('"'),
                    Some('\\') => field.push('\\'),
                    Some(other) => field.push(other),
                    None => {}
                }
            }
            ',' => {
                record.push(if is_null { None } else { Some(std::mem::take(&mut field)) });
                is_null = false;
                line_has_content = true;
            }
            '\n' => {
                if line_has_content {
                    record.push(if is_null { None } else { Some(std::mem::take(&mut field)) });
                    records.push(std::mem::take(&mut record));
                }
                field.clear();
                is_null = false;
                line_has_content = false;
            }
            other => {
                field.push(other);
                line_has_content = true;
            }
        }
    }
    if line_has_content {
        record.push(if is_null { None } else { Some(field) });
        records.push(record);
    }
    records
}

/// Applies the same per-column treatment the live loader's `SET` clause
/// does: `FROM_BASE64` for BLOBs, `CAST(... AS SIGNED)` for BITs, plus the
/// type-directed decoding MySQL itself performs for everything else.
fn decode_csv_cell(text: &str, driver_type: &str) -> Result<Value> {
    use base64::Engine;
    let upper = driver_type.to_ascii_uppercase();
    if upper.contains("BLOB") {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(text)
            .map_err(|e| TableWireError::parse(0, format!("invalid base64 in CSV cell: {e}")))?;
        return Ok(Value::Bytes(bytes));
    }
    if upper.contains("BIT") || upper.contains("INT") {
        return text
            .parse::<i64>()
            .map(Value::Integer)
            .map_err(|_| TableWireError::parse(0, format!("invalid integer in CSV cell: `{text}`")));
    }
    if upper.contains("DECIMAL") || upper.contains("NUMERIC") {
        return text
            .parse::<BigDecimal>()
            .map(Value::Decimal)
            .map_err(|_| TableWireError::parse(0, format!("invalid decimal in CSV cell: `{text}`")));
    }
    if upper.contains("FLOAT") || upper.contains("DOUBLE") || upper.contains("REAL") {
        return text
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| TableWireError::parse(0, format!("invalid float in CSV cell: `{text}`")));
    }
    if upper.contains("DATE") || upper.contains("TIME") {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S") {
            return Ok(Value::DateTime(dt));
        }
    }
    if upper.contains("BINARY") {
        return Ok(Value::Bytes(text.as_bytes().to_vec()));
    }
    Ok(Value::String(text.to_string()))
}

fn column_info(table: &Table) -> Vec<ColumnInfo> {
    table
        .columns
        .iter()
        .map(|c| ColumnInfo {
            name: c.name.clone(),
            category: ColumnCategory::from_driver_type_name(&c.type_expr),
            driver_type_name: c.type_expr.clone(),
        })
        .collect()
}

struct VecRowCursor {
    columns: Vec<ColumnInfo>,
    rows: std::vec::IntoIter<Row>,
}

#[async_trait]
impl RowCursor for VecRowCursor {
    fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }

    async fn next_row(&mut self) -> Result<Option<Row>> {
        Ok(self.rows.next())
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn execute(&mut self, sql: &str) -> Result<u64> {
        let trimmed = sql.trim();
        let upper = trimmed.to_ascii_uppercase();
        self.db.state.lock().unwrap().log.push(trimmed.to_string());

        if upper.starts_with("CREATE TABLE") {
            let schema = CreateTableParser::new(tokenize(trimmed)).parse()?;
            let key = schema.name.to_ascii_lowercase();
            let mut state = self.db.state.lock().unwrap();
            if !state.tables.contains_key(&key) {
                state.names.push(key.clone());
            }
            state.tables.entry(key).or_insert_with(|| MockTable { schema: schema.clone(), rows: Vec::new() }).schema = schema.clone();
            return Ok(0);
        }

        if upper.starts_with("DROP TABLE") {
            let mut tok = tokenize(trimmed);
            tok.read()?; // DROP
            tok.read()?; // TABLE
            tok.read()?; // IF, or the table name
            if tok.str_value().eq_ignore_ascii_case("IF") {
                tok.read()?; // EXISTS
                tok.read()?; // table name
            }
            let name = expect_identifier(&mut tok)?;
            let key = name.to_ascii_lowercase();
            let mut state = self.db.state.lock().unwrap();
            state.tables.remove(&key);
            state.names.retain(|n| n != &key);
            return Ok(0);
        }

        if upper.starts_with("TRUNCATE") {
            let mut tok = tokenize(trimmed);
            tok.read()?; // TRUNCATE
            let mut next = tok.read()?;
            if next == TokenKind::Identifier && tok.str_value().eq_ignore_ascii_case("TABLE") {
                next = tok.read()?;
            }
            let _ = next;
            let name = expect_identifier(&mut tok)?;
            if let Some(table) = self.db.state.lock().unwrap().tables.get_mut(&name.to_ascii_lowercase()) {
                table.rows.clear();
            }
            return Ok(0);
        }

        if upper.starts_with("INSERT") {
            let mut tok = tokenize(trimmed);
            tok.read()?; // INSERT
            let mut next = tok.read()?;
            if next == TokenKind::Identifier && tok.str_value().eq_ignore_ascii_case("IGNORE") {
                next = tok.read()?;
            }
            debug_assert_eq!(next, TokenKind::Identifier); // INTO
            tok.read()?;
            let table_name = expect_identifier(&mut tok)?;

            let mut columns = Vec::new();
            if tok.read()? == TokenKind::LeftParen {
                loop {
                    tok.read()?;
                    columns.push(expect_identifier(&mut tok)?);
                    match tok.read()? {
                        TokenKind::Comma => continue,
                        TokenKind::RightParen => break,
                        other => return Err(TableWireError::parse(0, format!("expected `,` or `)` in column list, found {other:?}"))),
                    }
                }
                tok.read()?; // VALUES
            }
            if !tok.str_value().eq_ignore_ascii_case("VALUES") {
                return Err(TableWireError::unsupported(&table_name, "expected VALUES in INSERT"));
            }

            let mut state = self.db.state.lock().unwrap();
            let table = state
                .tables
                .get_mut(&table_name.to_ascii_lowercase())
                .ok_or_else(|| TableWireError::schema(&table_name, "no such table"))?;
            let order: Vec<usize> = if columns.is_empty() {
                (0..table.schema.columns.len()).collect()
            } else {
                columns
                    .iter()
                    .map(|c| {
                        table
                            .schema
                            .columns
                            .iter()
                            .position(|col| col.name.eq_ignore_ascii_case(c))
                            .ok_or_else(|| TableWireError::schema(&table_name, format!("unknown column `{c}`")))
                    })
                    .collect::<Result<_>>()?
            };

            let mut inserted = 0u64;
            loop {
                if tok.read()? != TokenKind::LeftParen {
                    return Err(TableWireError::parse(0, "expected `(` to start a VALUES tuple"));
                }
                let tuple = parse_value_tuple(&mut tok)?;
                if tuple.len() != order.len() {
                    return Err(TableWireError::schema(&table_name, "column count mismatch in INSERT"));
                }
                let mut row = vec![Value::Null; table.schema.columns.len()];
                for (slot, value) in order.iter().zip(tuple.into_iter()) {
                    row[*slot] = coerce_for_column(value, &table.schema.columns[*slot]);
                }
                table.rows.push(row);
                inserted += 1;
                match tok.read()? {
                    TokenKind::Comma => continue,
                    TokenKind::Semicolon | TokenKind::Eof => break,
                    other => return Err(TableWireError::parse(0, format!("unexpected token {other:?} after VALUES tuple"))),
                }
            }
            return Ok(inserted);
        }

        // Session/transaction bookkeeping the pipeline issues around batches
        // of real work; nothing for the mock to simulate.
        if upper.starts_with("SET")
            || upper.starts_with("START TRANSACTION")
            || upper.starts_with("COMMIT")
            || upper.starts_with("ROLLBACK")
            || upper.starts_with("LOCK TABLES")
            || upper.starts_with("UNLOCK TABLES")
            || upper.starts_with("ALTER TABLE")
        {
            return Ok(0);
        }

        Err(TableWireError::unsupported("<statement>", format!("mock database cannot execute: {trimmed}")))
    }

    async fn query(&mut self, sql: &str) -> Result<Box<dyn RowCursor>> {
        let trimmed = sql.trim();
        let upper = trimmed.to_ascii_uppercase();

        if upper.starts_with("SHOW CREATE TABLE") {
            let mut tok = tokenize(trimmed);
            tok.read()?; // SHOW
            tok.read()?; // CREATE
            tok.read()?; // TABLE
            tok.read()?;
            let name = expect_identifier(&mut tok)?;
            let state = self.db.state.lock().unwrap();
            let table = state
                .tables
                .get(&name.to_ascii_lowercase())
                .ok_or_else(|| TableWireError::schema(&name, "no such table"))?;
            let create_sql = tablewire_schema::to_create_table_sql(&table.schema);
            let columns = vec![
                ColumnInfo { name: "Table".to_string(), category: ColumnCategory::Default, driver_type_name: "VARCHAR".to_string() },
                ColumnInfo { name: "Create Table".to_string(), category: ColumnCategory::Default, driver_type_name: "TEXT".to_string() },
            ];
            let row = vec![Value::String(table.schema.name.clone()), Value::String(create_sql)];
            return Ok(Box::new(VecRowCursor { columns, rows: vec![row].into_iter() }));
        }

        if upper.starts_with("SELECT COUNT(*)") {
            let idx = upper.find("FROM").ok_or_else(|| TableWireError::parse(0, "expected FROM"))?;
            let rest = trimmed[idx + 4..].trim();
            let name = rest.split_whitespace().next().unwrap_or("").trim_matches('`').to_string();
            let state = self.db.state.lock().unwrap();
            let count = state.tables.get(&name.to_ascii_lowercase()).map(|t| t.rows.len()).unwrap_or(0) as i64;
            let columns = vec![ColumnInfo {
                name: "COUNT(*)".to_string(),
                category: ColumnCategory::Default,
                driver_type_name: "BIGINT".to_string(),
            }];
            return Ok(Box::new(VecRowCursor { columns, rows: vec![vec![Value::Integer(count)]].into_iter() }));
        }

        if upper.starts_with("SELECT") {
            let idx = upper.find("FROM").ok_or_else(|| TableWireError::parse(0, "expected FROM"))?;
            let rest = trimmed[idx + 4..].trim();
            let name = rest.split_whitespace().next().unwrap_or("").trim_matches('`').to_string();
            let state = self.db.state.lock().unwrap();
            let table = state
                .tables
                .get(&name.to_ascii_lowercase())
                .ok_or_else(|| TableWireError::schema(&name, "no such table"))?;
            let columns = column_info(&table.schema);
            let rows = table.rows.clone();
            return Ok(Box::new(VecRowCursor { columns, rows: rows.into_iter() }));
        }

        Err(TableWireError::unsupported("<statement>", format!("mock database cannot query: {trimmed}")))
    }

    async fn approx_row_count(&mut self, table: &str) -> Option<u64> {
        let state = self.db.state.lock().unwrap();
        state.tables.get(&table.to_ascii_lowercase()).map(|t| t.rows.len() as u64)
    }

    async fn table_exists(&mut self, table: &str) -> Result<bool> {
        let state = self.db.state.lock().unwrap();
        Ok(state.tables.contains_key(&table.to_ascii_lowercase()))
    }

    async fn index_exists(&mut self, table: &str, index_name: &str) -> Result<bool> {
        let state = self.db.state.lock().unwrap();
        Ok(state
            .tables
            .get(&table.to_ascii_lowercase())
            .map(|t| t.schema.indexes.iter().any(|i| i.name.as_deref() == Some(index_name)))
            .unwrap_or(false))
    }

    async fn list_tables(&mut self) -> Result<Vec<String>> {
        let state = self.db.state.lock().unwrap();
        Ok(state.names.clone())
    }

    async fn bulk_load_csv(&mut self, table: &str, options: &BulkLoadOptions, pipe: Pipe) -> Result<u64> {
        let mut data = Vec::new();
        loop {
            let chunk = pipe.read(64 * 1024).await;
            if chunk.is_empty() {
                break;
            }
            data.extend_from_slice(&chunk);
        }
        let text = String::from_utf8(data)
            .map_err(|_| TableWireError::schema(table, "bulk-load stream is not valid utf-8"))?;
        let mut records = parse_mysql_csv(&text);
        if options.skip_header && !records.is_empty() {
            records.remove(0);
        }

        let mut state = self.db.state.lock().unwrap();
        let dest = state
            .tables
            .get_mut(&table.to_ascii_lowercase())
            .ok_or_else(|| TableWireError::schema(table, "no such table"))?;
        let order: Vec<usize> = options
            .columns
            .iter()
            .map(|info| {
                dest.schema
                    .columns
                    .iter()
                    .position(|col| col.name.eq_ignore_ascii_case(&info.name))
                    .ok_or_else(|| TableWireError::schema(table, format!("unknown column `{}`", info.name)))
            })
            .collect::<Result<_>>()?;

        let mut loaded = 0u64;
        for record in records {
            if record.len() != options.columns.len() {
                return Err(TableWireError::schema(table, "column count mismatch in bulk load"));
            }
            let mut row = vec![Value::Null; dest.schema.columns.len()];
            for ((cell, info), slot) in record.into_iter().zip(options.columns.iter()).zip(order.iter()) {
                row[*slot] = match cell {
                    None => Value::Null,
                    Some(text) => decode_csv_cell(&text, &info.driver_type_name)?,
                };
            }
            dest.rows.push(row);
            loaded += 1;
        }
        Ok(loaded)
    }
}
