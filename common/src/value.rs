//! The closed set of runtime cell values and categories the format
//! pipeline dispatches on. Every encoder switches on these discriminants,
//! never on a driver's own type system, so adding a representable kind is
//! a change here and nowhere else. A JSON column round-trips as a string;
//! there is no first-class document cell.

use bigdecimal::BigDecimal;
use chrono::NaiveDateTime;

/// Semantic category an importer assigns to a destination column before
/// rendering cells for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnCategory {
    Default,
    Date,
    Binary,
}

impl ColumnCategory {
    /// Classify a driver-reported type name: binary columns are anything
    /// mentioning `BLOB`, `BINARY`, or `BIT`; date columns mention `DATE`
    /// or `TIME`; everything else is `Default`.
    pub fn from_driver_type_name(type_name: &str) -> Self {
        let upper = type_name.to_ascii_uppercase();
        if upper.contains("BLOB") || upper.contains("BINARY") || upper.contains("BIT") {
            ColumnCategory::Binary
        } else if upper.contains("DATE") || upper.contains("TIME") {
            ColumnCategory::Date
        } else {
            ColumnCategory::Default
        }
    }
}

/// A decoded cell value. The per-format cell encoders dispatch on this
/// enum's discriminant, never on the destination driver's own type system.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Float(f64),
    Decimal(BigDecimal),
    Boolean(bool),
    String(String),
    Bytes(Vec<u8>),
    DateTime(NaiveDateTime),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_blob_and_binary_as_binary() {
        assert_eq!(ColumnCategory::from_driver_type_name("LONGBLOB"), ColumnCategory::Binary);
        assert_eq!(ColumnCategory::from_driver_type_name("VARBINARY(255)"), ColumnCategory::Binary);
        assert_eq!(ColumnCategory::from_driver_type_name("BIT(8)"), ColumnCategory::Binary);
    }

    #[test]
    fn classifies_date_and_time_types() {
        assert_eq!(ColumnCategory::from_driver_type_name("DATETIME"), ColumnCategory::Date);
        assert_eq!(ColumnCategory::from_driver_type_name("TIMESTAMP"), ColumnCategory::Date);
    }

    #[test]
    fn falls_back_to_default() {
        assert_eq!(ColumnCategory::from_driver_type_name("VARCHAR(255)"), ColumnCategory::Default);
        assert_eq!(ColumnCategory::from_driver_type_name("DECIMAL(20,6)"), ColumnCategory::Default);
    }
}
