//! The live `Connection`/`RowCursor` implementation, backed by
//! `mysql_async`.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use bytes::Bytes;
use chrono::NaiveDateTime;
use futures_util::StreamExt;
use mysql_async::consts::ColumnType;
use mysql_async::prelude::Queryable;
use mysql_async::{Conn, Opts, Pool, Row as DriverRow, Value as DriverValue};

use tablewire_common::error::{Result, TableWireError};
use tablewire_common::value::{ColumnCategory, Value};
use tablewire_schema::ColumnInfo;
use tablewire_tokenizer::Pipe;

use crate::connection::{BulkLoadOptions, Connection, ConnectionFactory, Row, RowCursor};

fn map_err(err: mysql_async::Error, table: &str) -> TableWireError {
    TableWireError::schema(table, err.to_string())
}

fn column_type_name(column: &mysql_async::Column) -> String {
    let base = match column.column_type() {
        ColumnType::MYSQL_TYPE_TINY_BLOB
        | ColumnType::MYSQL_TYPE_MEDIUM_BLOB
        | ColumnType::MYSQL_TYPE_LONG_BLOB
        | ColumnType::MYSQL_TYPE_BLOB => "BLOB",
        ColumnType::MYSQL_TYPE_VARCHAR | ColumnType::MYSQL_TYPE_VAR_STRING | ColumnType::MYSQL_TYPE_STRING => {
            if column.flags().contains(mysql_async::consts::ColumnFlags::BINARY_FLAG) {
                "BINARY"
            } else {
                "VARCHAR"
            }
        }
        ColumnType::MYSQL_TYPE_BIT => "BIT",
        ColumnType::MYSQL_TYPE_TINY => "TINYINT",
        ColumnType::MYSQL_TYPE_SHORT => "SMALLINT",
        ColumnType::MYSQL_TYPE_INT24 => "MEDIUMINT",
        ColumnType::MYSQL_TYPE_LONG => "INT",
        ColumnType::MYSQL_TYPE_LONGLONG => "BIGINT",
        ColumnType::MYSQL_TYPE_FLOAT => "FLOAT",
        ColumnType::MYSQL_TYPE_DOUBLE => "DOUBLE",
        ColumnType::MYSQL_TYPE_DECIMAL | ColumnType::MYSQL_TYPE_NEWDECIMAL => "DECIMAL",
        ColumnType::MYSQL_TYPE_YEAR => "YEAR",
        ColumnType::MYSQL_TYPE_DATE | ColumnType::MYSQL_TYPE_NEWDATE => "DATE",
        ColumnType::MYSQL_TYPE_DATETIME | ColumnType::MYSQL_TYPE_DATETIME2 => "DATETIME",
        ColumnType::MYSQL_TYPE_TIMESTAMP | ColumnType::MYSQL_TYPE_TIMESTAMP2 => "TIMESTAMP",
        ColumnType::MYSQL_TYPE_TIME | ColumnType::MYSQL_TYPE_TIME2 => "TIME",
        _ => "OTHER",
    };
    base.to_string()
}

fn decode_cell(value: DriverValue, column: &ColumnInfo) -> Result<Value> {
    Ok(match value {
        DriverValue::NULL => Value::Null,
        DriverValue::Int(i) => Value::Integer(i),
        DriverValue::UInt(u) => Value::Integer(u as i64),
        DriverValue::Float(f) => Value::Float(f as f64),
        DriverValue::Double(d) => Value::Float(d),
        DriverValue::Bytes(bytes) => match column.category {
            ColumnCategory::Binary => Value::Bytes(bytes),
            _ => match String::from_utf8(bytes) {
                Ok(s) => {
                    // DECIMAL cells arrive over the wire as text; only the
                    // declared type decides, never the cell's shape.
                    if column.driver_type_name.contains("DECIMAL") {
                        if let Ok(dec) = s.parse::<BigDecimal>() {
                            return Ok(Value::Decimal(dec));
                        }
                    }
                    Value::String(s)
                }
                Err(e) => Value::Bytes(e.into_bytes()),
            },
        },
        DriverValue::Date(year, month, day, hour, minute, second, micros) => {
            let date = chrono::NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)
                .unwrap_or_else(|| chrono::NaiveDate::from_ymd_opt(1970, 1, 1).unwrap());
            let time = chrono::NaiveTime::from_hms_micro_opt(
                hour as u32,
                minute as u32,
                second as u32,
                micros,
            )
            .unwrap_or_default();
            Value::DateTime(NaiveDateTime::new(date, time))
        }
        DriverValue::Time(..) => Value::String(value.as_sql(true)),
    })
}

pub struct MysqlRowCursor {
    columns: Vec<ColumnInfo>,
    rows: std::vec::IntoIter<DriverRow>,
}

#[async_trait]
impl RowCursor for MysqlRowCursor {
    fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }

    async fn next_row(&mut self) -> Result<Option<Row>> {
        let Some(mut driver_row) = self.rows.next() else {
            return Ok(None);
        };
        let mut row = Vec::with_capacity(self.columns.len());
        for (index, column) in self.columns.iter().enumerate() {
            let value: DriverValue = driver_row.take(index).unwrap_or(DriverValue::NULL);
            row.push(decode_cell(value, column)?);
        }
        Ok(Some(row))
    }
}

pub struct MysqlConnection {
    conn: Conn,
}

impl MysqlConnection {
    /// A `ConnectionFactory` that opens a fresh `mysql_async::Conn` per
    /// call (the orchestrator calls this once per worker, never sharing a
    /// handle across tasks).
    pub fn factory(url: String) -> ConnectionFactory {
        ConnectionFactory::new(move || {
            let url = url.clone();
            async move {
                let opts = Opts::from_url(&url)
                    .map_err(|e| TableWireError::schema("<connect>", e.to_string()))?;
                let pool = Pool::new(opts);
                let conn = pool
                    .get_conn()
                    .await
                    .map_err(|e| map_err(e, "<connect>"))?;
                Ok(Box::new(MysqlConnection { conn }) as Box<dyn Connection>)
            }
        })
    }
}

/// Assembles the `LOAD DATA LOCAL INFILE` statement for one worker pipe.
/// BLOB columns arrive base64-encoded and BIT columns as plain integers,
/// so both are bound to user variables and rewritten in the `SET` clause.
fn load_data_sql(table: &str, options: &BulkLoadOptions) -> String {
    let mut fields = Vec::with_capacity(options.columns.len());
    let mut rewrites = Vec::new();
    for (index, column) in options.columns.iter().enumerate() {
        let type_upper = column.driver_type_name.to_ascii_uppercase();
        if type_upper.contains("BLOB") {
            fields.push(format!("@v{index}"));
            rewrites.push(format!("`{}` = FROM_BASE64(@v{index})", column.name));
        } else if type_upper.contains("BIT") {
            fields.push(format!("@v{index}"));
            rewrites.push(format!("`{}` = CAST(@v{index} AS SIGNED)", column.name));
        } else {
            fields.push(format!("`{}`", column.name));
        }
    }

    let mut sql = format!(
        "LOAD DATA LOCAL INFILE 'pipe'{} INTO TABLE `{}` \
         CHARACTER SET utf8mb4 \
         FIELDS TERMINATED BY ',' OPTIONALLY ENCLOSED BY '\"' ESCAPED BY '\\\\' \
         LINES TERMINATED BY '\\n'",
        if options.insert_ignore { " IGNORE" } else { "" },
        table,
    );
    if options.skip_header {
        sql.push_str(" IGNORE 1 LINES");
    }
    sql.push_str(&format!(" ({})", fields.join(", ")));
    if !rewrites.is_empty() {
        sql.push_str(&format!(" SET {}", rewrites.join(", ")));
    }
    sql
}

#[async_trait]
impl Connection for MysqlConnection {
    async fn execute(&mut self, sql: &str) -> Result<u64> {
        tracing::debug!(sql = %sql.chars().take(120).collect::<String>(), "execute");
        self.conn.query_drop(sql).await.map_err(|e| map_err(e, "<statement>"))?;
        Ok(self.conn.affected_rows())
    }

    async fn query(&mut self, sql: &str) -> Result<Box<dyn RowCursor>> {
        tracing::debug!(sql = %sql, "query");
        let mut result = self
            .conn
            .query_iter(sql)
            .await
            .map_err(|e| map_err(e, "<query>"))?;
        let columns: Vec<ColumnInfo> = result
            .columns()
            .map(|cols| {
                cols.as_ref()
                    .iter()
                    .map(|c| {
                        let type_name = column_type_name(c);
                        ColumnInfo {
                            name: c.name_str().to_string(),
                            category: ColumnCategory::from_driver_type_name(&type_name),
                            driver_type_name: type_name,
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();
        let rows: Vec<DriverRow> = result
            .collect()
            .await
            .map_err(|e| map_err(e, "<query>"))?;
        Ok(Box::new(MysqlRowCursor { columns, rows: rows.into_iter() }))
    }

    async fn approx_row_count(&mut self, table: &str) -> Option<u64> {
        let sql = "SELECT TABLE_ROWS FROM information_schema.TABLES WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ?";
        self.conn
            .exec_first::<Option<u64>, _, _>(sql, (table,))
            .await
            .ok()
            .flatten()
            .flatten()
    }

    async fn table_exists(&mut self, table: &str) -> Result<bool> {
        let sql = "SELECT COUNT(*) FROM information_schema.TABLES WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ?";
        let count: u64 = self
            .conn
            .exec_first(sql, (table,))
            .await
            .map_err(|e| map_err(e, table))?
            .unwrap_or(0);
        Ok(count > 0)
    }

    async fn index_exists(&mut self, table: &str, index_name: &str) -> Result<bool> {
        let sql = "SELECT COUNT(*) FROM information_schema.STATISTICS WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? AND INDEX_NAME = ?";
        let count: u64 = self
            .conn
            .exec_first(sql, (table, index_name))
            .await
            .map_err(|e| map_err(e, table))?
            .unwrap_or(0);
        Ok(count > 0)
    }

    async fn list_tables(&mut self) -> Result<Vec<String>> {
        self.conn
            .query("SHOW TABLES")
            .await
            .map_err(|e| map_err(e, "<list>"))
    }

    async fn bulk_load_csv(&mut self, table: &str, options: &BulkLoadOptions, pipe: Pipe) -> Result<u64> {
        self.conn.set_infile_handler(async move {
            let stream = futures_util::stream::unfold(pipe, |pipe| async move {
                let chunk = pipe.read(64 * 1024).await;
                if chunk.is_empty() {
                    None
                } else {
                    Some((Ok::<Bytes, std::io::Error>(Bytes::from(chunk)), pipe))
                }
            });
            Ok(stream.boxed())
        });
        let sql = load_data_sql(table, options);
        self.conn.query_drop(&sql).await.map_err(|e| map_err(e, table))?;
        Ok(self.conn.affected_rows())
    }
}
