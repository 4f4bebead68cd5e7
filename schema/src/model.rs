//! The `CREATE TABLE` data model: plain data structs with public fields,
//! no builder ceremony. This workspace parses one dialect of DDL for one
//! purpose (round-trip through dump/import), so a thin field-holding
//! struct is the right shape, not a type-state builder.

use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferentialAction {
    Cascade,
    SetNull,
    Restrict,
    NoAction,
}

impl ReferentialAction {
    pub fn parse(ident: &str) -> Option<Self> {
        match ident.to_ascii_uppercase().as_str() {
            "CASCADE" => Some(Self::Cascade),
            "SETNULL" => Some(Self::SetNull),
            "RESTRICT" => Some(Self::Restrict),
            "NOACTION" => Some(Self::NoAction),
            _ => None,
        }
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Cascade => "CASCADE",
            Self::SetNull => "SET NULL",
            Self::Restrict => "RESTRICT",
            Self::NoAction => "NO ACTION",
        }
    }
}

/// A default-value expression as the parser saw it.
#[derive(Debug, Clone, PartialEq)]
pub enum DefaultValue {
    Null,
    String(String),
    Number(String),
    Expression(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub type_expr: String,
    pub nullable: bool,
    pub primary_key: bool,
    pub default: Option<DefaultValue>,
    pub auto_increment: bool,
    pub unsigned: bool,
    pub character_set: Option<String>,
    pub collation: Option<String>,
    pub extra: Option<String>,
}

impl Column {
    pub fn new(name: impl Into<String>, type_expr: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_expr: type_expr.into(),
            nullable: true,
            primary_key: false,
            default: None,
            auto_increment: false,
            unsigned: false,
            character_set: None,
            collation: None,
            extra: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    Primary,
    Unique,
    Regular,
    Fulltext,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexColumn {
    pub name: String,
    pub prefix_length: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Index {
    pub name: Option<String>,
    pub kind: IndexKind,
    pub columns: Vec<IndexColumn>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForeignKey {
    pub name: Option<String>,
    pub columns: Vec<String>,
    pub reference_table: String,
    pub reference_columns: Vec<String>,
    pub on_delete: Option<ReferentialAction>,
    pub on_update: Option<ReferentialAction>,
}

/// Case-insensitive `OPTION = VALUE` bag, preserving first-seen order so
/// re-emission lists options the way the source declared them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableOptions {
    order: Vec<String>,
    values: BTreeMap<String, String>,
}

impl TableOptions {
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into().to_ascii_uppercase();
        if !self.values.contains_key(&key) {
            self.order.push(key.clone());
        }
        self.values.insert(key, value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(&key.to_ascii_uppercase()).map(String::as_str)
    }

    pub fn remove(&mut self, key: &str) {
        let key = key.to_ascii_uppercase();
        if self.values.remove(&key).is_some() {
            self.order.retain(|k| k != &key);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.order.iter().map(move |k| (k.as_str(), self.values[k].as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub name: String,
    pub columns: Vec<Column>,
    pub indexes: Vec<Index>,
    pub foreign_keys: Vec<ForeignKey>,
    pub options: TableOptions,
}

impl Table {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            indexes: Vec::new(),
            foreign_keys: Vec::new(),
            options: TableOptions::default(),
        }
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }
}

/// Runtime column metadata an importer needs to pick a per-cell encoder.
#[derive(Debug, Clone)]
pub struct ColumnInfo {
    pub name: String,
    pub category: tablewire_common::value::ColumnCategory,
    pub driver_type_name: String,
}
