//! Canonical SQL re-emission for parsed table definitions.

use crate::model::{Column, DefaultValue, ForeignKey, Index, IndexColumn, IndexKind, Table};

fn quote_string(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

fn render_default(default: &DefaultValue) -> String {
    match default {
        DefaultValue::Null => "NULL".to_string(),
        DefaultValue::String(s) => quote_string(s),
        DefaultValue::Number(n) => n.clone(),
        DefaultValue::Expression(e) => e.clone(),
    }
}

fn render_column(column: &Column) -> String {
    let mut out = format!("`{}` {}", column.name, column.type_expr);
    if column.unsigned {
        out.push_str(" UNSIGNED");
    }
    if column.auto_increment {
        out.push_str(" AUTO_INCREMENT");
    }
    if let Some(cs) = &column.character_set {
        out.push_str(&format!(" CHARACTER SET '{cs}'"));
    }
    if let Some(coll) = &column.collation {
        out.push_str(&format!(" COLLATE '{coll}'"));
    }
    out.push_str(if column.nullable { " NULL" } else { " NOT NULL" });
    if let Some(default) = &column.default {
        out.push_str(" DEFAULT ");
        out.push_str(&render_default(default));
    }
    if let Some(extra) = &column.extra {
        out.push(' ');
        out.push_str(extra);
    }
    out
}

fn render_index_column(col: &IndexColumn) -> String {
    match col.prefix_length {
        Some(len) => format!("`{}`({})", col.name, len),
        None => format!("`{}`", col.name),
    }
}

fn render_column_list(columns: &[IndexColumn]) -> String {
    columns.iter().map(render_index_column).collect::<Vec<_>>().join(", ")
}

fn render_index(index: &Index) -> String {
    let cols = render_column_list(&index.columns);
    match index.kind {
        IndexKind::Primary => format!("PRIMARY KEY ({cols})"),
        IndexKind::Unique => match &index.name {
            Some(name) => format!("UNIQUE KEY `{name}` ({cols})"),
            None => format!("UNIQUE KEY ({cols})"),
        },
        IndexKind::Fulltext => match &index.name {
            Some(name) => format!("FULLTEXT KEY `{name}` ({cols})"),
            None => format!("FULLTEXT KEY ({cols})"),
        },
        IndexKind::Regular => match &index.name {
            Some(name) => format!("KEY `{name}` ({cols})"),
            None => format!("KEY ({cols})"),
        },
    }
}

fn render_foreign_key(fk: &ForeignKey) -> String {
    let owning = fk.columns.iter().map(|c| format!("`{c}`")).collect::<Vec<_>>().join(", ");
    let referenced = fk.reference_columns.iter().map(|c| format!("`{c}`")).collect::<Vec<_>>().join(", ");
    let mut out = match &fk.name {
        Some(name) => format!("CONSTRAINT `{name}` FOREIGN KEY ({owning})"),
        None => format!("FOREIGN KEY ({owning})"),
    };
    out.push_str(&format!(" REFERENCES `{}` ({referenced})", fk.reference_table));
    if let Some(action) = &fk.on_delete {
        out.push_str(&format!(" ON DELETE {}", action.as_sql()));
    }
    if let Some(action) = &fk.on_update {
        out.push_str(&format!(" ON UPDATE {}", action.as_sql()));
    }
    out
}

/// Renders the `ALTER TABLE ... ADD <index>` statement used to replay a
/// deferred index after data load.
pub fn to_alter_table_add_index_sql(table_name: &str, index: &Index) -> String {
    format!("ALTER TABLE `{table_name}` ADD {};", render_index(index))
}

/// Renders the `ALTER TABLE ... ADD <foreign key>` statement used to replay
/// a deferred foreign key after data load.
pub fn to_alter_table_add_foreign_key_sql(table_name: &str, fk: &ForeignKey) -> String {
    format!("ALTER TABLE `{table_name}` ADD {};", render_foreign_key(fk))
}

/// Produces one canonical form: guaranteed to be accepted by the target
/// database for everything the parser understands, not guaranteed to be
/// byte-equal to whatever source DDL it came from.
pub fn to_create_table_sql(table: &Table) -> String {
    let mut parts: Vec<String> = Vec::with_capacity(table.columns.len() + table.indexes.len() + table.foreign_keys.len());
    parts.extend(table.columns.iter().map(render_column));
    parts.extend(table.indexes.iter().map(render_index));
    parts.extend(table.foreign_keys.iter().map(render_foreign_key));

    let mut sql = format!("CREATE TABLE `{}` (\n  {}\n)", table.name, parts.join(",\n  "));
    for (key, value) in table.options.iter() {
        sql.push('\n');
        sql.push_str(key);
        sql.push('=');
        sql.push_str(value);
    }
    sql.push(';');
    sql
}
