//! The table data model, `CREATE TABLE` parser, and canonical re-emitter.

pub mod model;
pub mod parser;
pub mod render;

pub use model::{
    Column, ColumnInfo, DefaultValue, ForeignKey, Index, IndexColumn, IndexKind,
    ReferentialAction, Table, TableOptions,
};
pub use parser::CreateTableParser;
pub use render::{to_alter_table_add_foreign_key_sql, to_alter_table_add_index_sql, to_create_table_sql};

#[cfg(test)]
mod tests {
    use super::*;
    use tablewire_tokenizer::sql::SqlTokenizer;

    fn parse(sql: &str) -> Table {
        let tok = SqlTokenizer::new(std::io::Cursor::new(sql.as_bytes().to_vec()));
        CreateTableParser::new(tok).parse().unwrap()
    }

    #[test]
    fn parses_a_minimal_table() {
        let table = parse("CREATE TABLE `orders` (`id` INT NOT NULL AUTO_INCREMENT PRIMARY KEY, `name` VARCHAR(255) DEFAULT NULL);");
        assert_eq!(table.name, "orders");
        assert_eq!(table.columns.len(), 2);
        let id = table.column("id").unwrap();
        assert_eq!(id.type_expr, "INT");
        assert!(!id.nullable);
        assert!(id.auto_increment);
        assert!(id.primary_key);
        let name = table.column("name").unwrap();
        assert_eq!(name.default, Some(DefaultValue::Null));
    }

    #[test]
    fn parses_indexes_and_foreign_keys() {
        let table = parse(
            "CREATE TABLE `line_items` (\
                `id` BIGINT NOT NULL,\
                `order_id` BIGINT NOT NULL,\
                PRIMARY KEY (`id`),\
                UNIQUE KEY `uniq_order` (`order_id`),\
                CONSTRAINT `fk_order` FOREIGN KEY (`order_id`) REFERENCES `orders` (`id`) ON DELETE CASCADE\
            );",
        );
        assert_eq!(table.indexes.len(), 2);
        assert_eq!(table.indexes[0].kind, IndexKind::Primary);
        assert_eq!(table.indexes[1].kind, IndexKind::Unique);
        assert_eq!(table.indexes[1].name.as_deref(), Some("uniq_order"));
        assert_eq!(table.foreign_keys.len(), 1);
        let fk = &table.foreign_keys[0];
        assert_eq!(fk.reference_table, "orders");
        assert_eq!(fk.on_delete, Some(ReferentialAction::Cascade));
    }

    #[test]
    fn parses_table_options_in_order() {
        let table = parse("CREATE TABLE `t` (`a` INT) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4;");
        let opts: Vec<_> = table.options.iter().collect();
        assert_eq!(opts, vec![("ENGINE", "InnoDB"), ("DEFAULT CHARSET", "utf8mb4")]);
    }

    #[test]
    fn round_trips_through_canonical_emission() {
        let table = parse(
            "CREATE TABLE `widgets` (`id` INT NOT NULL AUTO_INCREMENT, `sku` VARCHAR(32) NOT NULL, PRIMARY KEY (`id`)) ENGINE=InnoDB;",
        );
        let sql = to_create_table_sql(&table);
        let reparsed = parse(&sql);
        assert_eq!(table, reparsed);
    }

    #[test]
    fn tolerates_create_table_already_consumed_upstream() {
        let tok = SqlTokenizer::new(std::io::Cursor::new(b"`bare` (`a` INT);".to_vec()));
        let table = CreateTableParser::new(tok).parse().unwrap();
        assert_eq!(table.name, "bare");
    }

    #[test]
    fn if_not_exists_is_skipped() {
        let table = parse("CREATE TABLE IF NOT EXISTS `t` (`a` INT);");
        assert_eq!(table.name, "t");
    }

    #[test]
    fn bare_null_and_not_null_set_nullability() {
        let table = parse("CREATE TABLE `t` (`a` INT NULL, `b` INT NOT NULL);");
        assert!(table.column("a").unwrap().nullable);
        assert!(!table.column("b").unwrap().nullable);
    }

    #[test]
    fn parenthesized_default_expression_is_kept_verbatim() {
        let table = parse("CREATE TABLE `t` (`a` VARCHAR(36) NOT NULL DEFAULT (uuid()));");
        assert_eq!(
            table.column("a").unwrap().default,
            Some(DefaultValue::Expression("(uuid())".to_string())),
        );
    }

    #[test]
    fn set_null_referential_action_parses() {
        let table = parse(
            "CREATE TABLE `t` (`a` INT NOT NULL, \
             CONSTRAINT `fk` FOREIGN KEY (`a`) REFERENCES `p` (`id`) ON DELETE SET NULL ON UPDATE NO ACTION);",
        );
        let fk = &table.foreign_keys[0];
        assert_eq!(fk.on_delete, Some(ReferentialAction::SetNull));
        assert_eq!(fk.on_update, Some(ReferentialAction::NoAction));
    }

    #[test]
    fn unknown_column_keywords_are_ignored() {
        let table = parse("CREATE TABLE `t` (`a` TIMESTAMP NOT NULL ON UPDATE CURRENT_TIMESTAMP COMMENT 'when');");
        let a = table.column("a").unwrap();
        assert!(!a.nullable);
        assert!(a.default.is_none());
    }
}
