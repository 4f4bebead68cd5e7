//! Importer edge cases: stored-procedure skipping, mid-stream column
//! reordering, and deferred-index replay idempotence.

use std::io::Cursor;

use tablewire_common::TableWireError;
use tablewire_db::{Connection, MockDatabase};
use tablewire_pipeline::import::sql::SqlImporter;
use tablewire_pipeline::import::{prepare_table, reindex_deferred, DeferredConstraint, Importer};
use tablewire_pipeline::TableWireConfig;
use tablewire_schema::{CreateTableParser, Index, IndexColumn, IndexKind};
use tablewire_tokenizer::sql::SqlTokenizer;

fn sql_importer(input: &str) -> SqlImporter<Cursor<Vec<u8>>> {
    SqlImporter::new(SqlTokenizer::new(Cursor::new(input.as_bytes().to_vec())), 100)
}

#[tokio::test]
async fn delimiter_bracketed_procedures_are_skipped_wholesale() {
    let input = "DELIMITER $$\n\
        CREATE PROCEDURE `totals`() BEGIN SELECT 1; END$$\n\
        DELIMITER ;\n\
        CREATE TABLE `x` (`a` INT NOT NULL);\n\
        INSERT INTO `x` (`a`) VALUES (1),(2);";
    let mut importer = sql_importer(input);

    let next = importer.read_next_table().await.unwrap().unwrap();
    assert_eq!(next.table.name, "x");

    let sql = importer.read_data_sql(&next.table, &[]).await.unwrap().unwrap();
    assert_eq!(sql, "INSERT INTO `x` (`a`) VALUES (1),(2);");
    assert!(importer.read_data_sql(&next.table, &[]).await.unwrap().is_none());
}

#[tokio::test]
async fn column_reorder_before_first_row_switches_the_batch() {
    let input = "CREATE TABLE `t` (`a` INT NOT NULL, `b` INT NOT NULL);\n\
        INSERT INTO `t` (`b`, `a`) VALUES (1, 2);";
    let mut importer = sql_importer(input);
    let next = importer.read_next_table().await.unwrap().unwrap();

    let sql = importer.read_data_sql(&next.table, &[]).await.unwrap().unwrap();
    assert_eq!(sql, "INSERT INTO `t` (`b`, `a`) VALUES (1,2);");
}

#[tokio::test]
async fn column_reorder_after_rows_were_emitted_is_unsupported() {
    let input = "CREATE TABLE `t` (`a` INT NOT NULL, `b` INT NOT NULL);\n\
        INSERT INTO `t` (`a`, `b`) VALUES (1, 2);\n\
        INSERT INTO `t` (`b`, `a`) VALUES (3, 4);";
    let mut importer = sql_importer(input);
    let next = importer.read_next_table().await.unwrap().unwrap();

    importer.read_data_sql(&next.table, &[]).await.unwrap().unwrap();
    let err = importer.read_data_sql(&next.table, &[]).await.unwrap_err();
    assert!(matches!(err, TableWireError::Unsupported { .. }));
}

#[tokio::test]
async fn defer_indexes_strips_then_replays_secondary_indexes() {
    let db = MockDatabase::new();
    let mut conn = db.factory().connect().await.unwrap();

    let ddl = "CREATE TABLE `orders` (\
        `id` INT NOT NULL, `customer` INT NOT NULL, \
        PRIMARY KEY (`id`), KEY `idx_customer` (`customer`));";
    let table = CreateTableParser::new(SqlTokenizer::new(Cursor::new(ddl.as_bytes().to_vec())))
        .parse()
        .unwrap();

    let config = TableWireConfig { defer_indexes: true, quiet: true, ..TableWireConfig::default() };
    let prep = prepare_table(conn.as_mut(), table, &config).await.unwrap();

    assert!(prep.should_insert);
    assert_eq!(prep.table.indexes.len(), 1, "only the primary key stays in the create");
    assert_eq!(prep.deferred.len(), 1);

    // The created destination carries no `idx_customer`, so the replay
    // issues exactly one ALTER.
    reindex_deferred(conn.as_mut(), &prep.table.name, &prep.deferred).await.unwrap();
    let alters = db
        .executed_statements()
        .into_iter()
        .filter(|sql| sql.starts_with("ALTER TABLE"))
        .count();
    assert_eq!(alters, 1);
}

#[tokio::test]
async fn replaying_an_existing_index_is_a_no_op() {
    let db = MockDatabase::new();
    let mut conn = db.factory().connect().await.unwrap();
    conn.execute(
        "CREATE TABLE `orders` (`id` INT NOT NULL, `customer` INT NOT NULL, \
         PRIMARY KEY (`id`), KEY `idx_customer` (`customer`));",
    )
    .await
    .unwrap();

    let deferred = vec![DeferredConstraint::Index(Index {
        name: Some("idx_customer".to_string()),
        kind: IndexKind::Regular,
        columns: vec![IndexColumn { name: "customer".to_string(), prefix_length: None }],
    })];
    reindex_deferred(conn.as_mut(), "orders", &deferred).await.unwrap();

    let alters = db
        .executed_statements()
        .into_iter()
        .filter(|sql| sql.starts_with("ALTER TABLE"))
        .count();
    assert_eq!(alters, 0, "an index that already exists is skipped via the information-schema check");
}
