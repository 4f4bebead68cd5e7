//! Per-format cell encoders. Every encoder dispatches on `Value`'s
//! discriminant, a closed enumeration, never on a destination driver's
//! own type system.

use tablewire_common::value::Value;
use tablewire_tokenizer::PipeTextWriter;

/// Single-quoted with `\ ' " \b \n \r \t \0` backslash-escaped.
pub fn escape_sql_string(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('\'');
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '"' => out.push_str("\\\""),
            '\u{8}' => out.push_str("\\b"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\0' => out.push_str("\\0"),
            other => out.push(other),
        }
    }
    out.push('\'');
    out
}

pub fn escape_sql_identifier(text: &str) -> String {
    format!("`{}`", text.replace('`', "``"))
}

pub const SQL_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
pub const CSV_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
pub const JSON_DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// JSON string escaping: `"`, `\`, and ASCII control characters;
/// `serde_json` implements exactly that set.
pub fn json_string(text: &str) -> String {
    serde_json::to_string(text).expect("string serialization is infallible")
}

/// Writes one cell in the SQL dumper's textual dialect.
pub async fn write_sql_cell(writer: &mut PipeTextWriter, value: &Value) {
    match value {
        Value::Null => writer.write("NULL").await,
        Value::Integer(i) => writer.write_integer(*i).await,
        Value::Float(f) => writer.write_float(*f).await,
        Value::Decimal(d) => writer.write(&d.to_string()).await,
        Value::Boolean(b) => writer.write(if *b { "1" } else { "0" }).await,
        Value::String(s) => writer.write(&escape_sql_string(s)).await,
        Value::Bytes(bytes) => {
            writer.write("_binary 0x").await;
            writer.write_hex(bytes).await;
        }
        Value::DateTime(dt) => {
            writer.write("'").await;
            writer.write_datetime(dt, SQL_DATETIME_FORMAT).await;
            writer.write("'").await;
        }
    }
}

/// Writes one cell in the CSV dumper's dialect: `\N` for null, base64 for
/// bytes (never quoted), everything else through
/// `PipeTextWriter::write_csv_cell`.
pub async fn write_csv_cell(writer: &mut PipeTextWriter, value: &Value, mysql_mode: bool) {
    match value {
        Value::Null => writer.write("\\N").await,
        Value::Integer(i) => writer.write_integer(*i).await,
        Value::Float(f) => writer.write_float(*f).await,
        Value::Decimal(d) => writer.write(&d.to_string()).await,
        Value::Boolean(b) => writer.write(if *b { "1" } else { "0" }).await,
        Value::String(s) => writer.write_csv_cell(s, mysql_mode).await,
        Value::Bytes(bytes) => writer.write_base64(bytes).await,
        Value::DateTime(dt) => {
            let text = dt.format(CSV_DATETIME_FORMAT).to_string();
            if mysql_mode {
                writer.write_csv_cell(&text, true).await;
            } else {
                // Always quoted in the RFC dialect, even though the text
                // itself never contains a delimiter.
                writer.write("\"").await;
                writer.write(&text).await;
                writer.write("\"").await;
            }
        }
    }
}

/// Serializes one cell as JSON text. Hand-assembled rather than routed
/// through a `serde_json::Value`: decimals must come out as unquoted
/// numbers in their full-precision textual form, which `serde_json`
/// cannot carry without its arbitrary-precision feature.
pub fn json_cell_text(value: &Value) -> String {
    use base64::Engine;
    match value {
        Value::Null => "null".to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Float(f) if f.is_finite() => f.to_string(),
        Value::Float(_) => "null".to_string(),
        Value::Decimal(d) => d.to_string(),
        Value::Boolean(true) => "true".to_string(),
        Value::Boolean(false) => "false".to_string(),
        Value::String(s) => json_string(s),
        Value::Bytes(bytes) => json_string(&base64::engine::general_purpose::STANDARD.encode(bytes)),
        Value::DateTime(dt) => format!("\"{}\"", dt.format(JSON_DATETIME_FORMAT)),
    }
}
