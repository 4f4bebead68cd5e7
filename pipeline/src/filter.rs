//! The `--table` / `--tables` / `*` source-table filter.

use std::collections::HashSet;

#[derive(Debug, Clone)]
pub enum TableFilter {
    All,
    Named(HashSet<String>),
}

impl TableFilter {
    pub fn named(tables: impl IntoIterator<Item = String>) -> Self {
        TableFilter::Named(tables.into_iter().collect())
    }

    pub fn matches(&self, table: &str) -> bool {
        match self {
            TableFilter::All => true,
            TableFilter::Named(names) => names.iter().any(|n| n.eq_ignore_ascii_case(table)),
        }
    }
}
