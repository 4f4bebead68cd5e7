//! Structural round-trip of a realistic DDL corpus entry: composite
//! primary key, two foreign keys (one cascading), per-column attributes,
//! and table options must all survive parse → emit → parse unchanged.

use std::io::Cursor;

use tablewire_schema::{
    to_create_table_sql, CreateTableParser, DefaultValue, IndexKind, ReferentialAction, Table,
};
use tablewire_tokenizer::sql::SqlTokenizer;

fn parse(sql: &str) -> Table {
    CreateTableParser::new(SqlTokenizer::new(Cursor::new(sql.as_bytes().to_vec())))
        .parse()
        .unwrap()
}

const TABLE5: &str = "CREATE TABLE `table5` (\n\
    `order_id` BIGINT UNSIGNED NOT NULL,\n\
    `product_id` BIGINT UNSIGNED NOT NULL,\n\
    `quantity` INT NOT NULL DEFAULT 1,\n\
    `unit_price` DECIMAL(20,6) NOT NULL,\n\
    `note` VARCHAR(255) CHARACTER SET 'utf8mb4' COLLATE 'utf8mb4_general_ci' DEFAULT NULL,\n\
    `created_at` DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,\n\
    PRIMARY KEY (`order_id`, `product_id`),\n\
    KEY `idx_product` (`product_id`),\n\
    CONSTRAINT `fk_order` FOREIGN KEY (`order_id`) REFERENCES `orders` (`id`) ON DELETE CASCADE,\n\
    CONSTRAINT `fk_product` FOREIGN KEY (`product_id`) REFERENCES `products` (`id`) ON UPDATE RESTRICT\n\
    ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4;";

#[test]
fn table5_parses_into_the_documented_tree() {
    let table = parse(TABLE5);

    assert_eq!(table.name, "table5");
    assert_eq!(table.columns.len(), 6);

    let order_id = table.column("order_id").unwrap();
    assert!(order_id.unsigned);
    assert!(!order_id.nullable);

    let quantity = table.column("quantity").unwrap();
    assert_eq!(quantity.default, Some(DefaultValue::Number("1".to_string())));

    let note = table.column("note").unwrap();
    assert_eq!(note.character_set.as_deref(), Some("utf8mb4"));
    assert_eq!(note.collation.as_deref(), Some("utf8mb4_general_ci"));
    assert_eq!(note.default, Some(DefaultValue::Null));

    let created = table.column("created_at").unwrap();
    assert_eq!(created.default, Some(DefaultValue::Expression("CURRENT_TIMESTAMP".to_string())));

    assert_eq!(table.indexes.len(), 2);
    assert_eq!(table.indexes[0].kind, IndexKind::Primary);
    assert_eq!(
        table.indexes[0].columns.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
        vec!["order_id", "product_id"],
    );
    assert_eq!(table.indexes[1].kind, IndexKind::Regular);

    assert_eq!(table.foreign_keys.len(), 2);
    let fk_order = &table.foreign_keys[0];
    assert_eq!(fk_order.name.as_deref(), Some("fk_order"));
    assert_eq!(fk_order.reference_table, "orders");
    assert_eq!(fk_order.on_delete, Some(ReferentialAction::Cascade));
    assert_eq!(fk_order.on_update, None);
    let fk_product = &table.foreign_keys[1];
    assert_eq!(fk_product.on_update, Some(ReferentialAction::Restrict));

    assert_eq!(table.options.get("ENGINE"), Some("InnoDB"));
    assert_eq!(table.options.get("DEFAULT CHARSET"), Some("utf8mb4"));
}

#[test]
fn emitting_and_reparsing_is_structurally_identical() {
    let first = parse(TABLE5);
    let emitted = to_create_table_sql(&first);
    let second = parse(&emitted);
    assert_eq!(first, second);

    // Idempotence under the canonical form: a second emit/parse cycle
    // produces the same text, not merely the same tree.
    assert_eq!(emitted, to_create_table_sql(&second));
}

#[test]
fn index_prefix_lengths_survive_the_round_trip() {
    let table = parse("CREATE TABLE `t` (`body` TEXT NOT NULL, KEY `idx_body` (`body`(191)));");
    assert_eq!(table.indexes[0].columns[0].prefix_length, Some(191));
    let reparsed = parse(&to_create_table_sql(&table));
    assert_eq!(table, reparsed);
}
