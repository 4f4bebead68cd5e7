//! End-to-end round trips over the in-process mock database: a seeded
//! 10 000-row table with nullable text, binary, datetime, and decimal
//! columns is exported to each format and re-imported, and the destination
//! must match the source cell for cell.

use std::io::Cursor;
use std::time::Duration;

use bigdecimal::BigDecimal;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use tablewire_common::cancel::CancelToken;
use tablewire_common::value::Value;
use tablewire_db::{Connection, MockDatabase, Row};
use tablewire_pipeline::dump::csv::CsvDumper;
use tablewire_pipeline::dump::json::JsonDumper;
use tablewire_pipeline::dump::sql::SqlDumper;
use tablewire_pipeline::import::csv::CsvImporter;
use tablewire_pipeline::import::json::JsonImporter;
use tablewire_pipeline::import::sql::SqlImporter;
use tablewire_pipeline::{
    run_export, run_import, Dumper, Importer, IngestMechanism, ImportSummary, TableWireConfig,
};
use tablewire_tokenizer::json::JsonTokenizer;
use tablewire_tokenizer::sql::SqlTokenizer;
use tablewire_tokenizer::{Pipe, PipeTextWriter};

const ROW_COUNT: usize = 10_000;

const CREATE_DATA: &str = "CREATE TABLE `data` (\
    `id` INT NOT NULL, \
    `textdata` VARCHAR(1024) NULL, \
    `binarydata` VARBINARY(1024) NULL, \
    `date` DATETIME NULL, \
    `decimaldata` DECIMAL(20,6) NULL, \
    PRIMARY KEY (`id`));";

const TEXT_PALETTE: &[char] = &[
    'a', 'b', 'c', 'x', 'y', 'z', '0', '7', ' ', ',', '\'', '"', '\\', '\n', '\t', 'é', '中', '%',
];

fn random_text(rng: &mut StdRng) -> String {
    let len = rng.gen_range(0..32);
    let mut text: String = (0..len).map(|_| TEXT_PALETTE[rng.gen_range(0..TEXT_PALETTE.len())]).collect();
    if text == "\\N" {
        // The bare null marker is indistinguishable from data in CSV.
        text.push('x');
    }
    text
}

fn random_rows(rng: &mut StdRng, count: usize) -> Vec<Row> {
    (0..count)
        .map(|id| {
            let textdata = if rng.gen_bool(0.1) { Value::Null } else { Value::String(random_text(rng)) };
            let binarydata = if rng.gen_bool(0.1) {
                Value::Null
            } else {
                let len = rng.gen_range(0..48);
                Value::Bytes((0..len).map(|_| rng.gen::<u8>()).collect())
            };
            let date = if rng.gen_bool(0.1) {
                Value::Null
            } else {
                let secs = rng.gen_range(0..=2_000_000_000i64);
                Value::DateTime(chrono::DateTime::from_timestamp(secs, 0).unwrap().naive_utc())
            };
            let decimaldata = if rng.gen_bool(0.1) {
                Value::Null
            } else {
                let text = format!("{}.{:06}", rng.gen_range(-99_999_999i64..=99_999_999), rng.gen_range(0..1_000_000));
                Value::Decimal(text.parse::<BigDecimal>().unwrap())
            };
            vec![Value::Integer(id as i64), textdata, binarydata, date, decimaldata]
        })
        .collect()
}

async fn seed_source(create_sql: &str, table: &str, rows: Vec<Row>) -> MockDatabase {
    let db = MockDatabase::new();
    let mut conn = db.factory().connect().await.unwrap();
    conn.execute(create_sql).await.unwrap();
    db.insert_rows(table, rows);
    db
}

async fn export_bytes(db: &MockDatabase, dumper: &mut dyn Dumper, tables: &[String]) -> Vec<u8> {
    let mut conn = db.factory().connect().await.unwrap();
    let pipe = Pipe::with_default_watermarks();
    let collector = {
        let pipe = pipe.clone();
        tokio::spawn(async move {
            let mut out = Vec::new();
            loop {
                let chunk = pipe.read(64 * 1024).await;
                if chunk.is_empty() {
                    break;
                }
                out.extend_from_slice(&chunk);
            }
            out
        })
    };
    let mut writer = PipeTextWriter::new(pipe.clone());
    run_export(dumper, conn.as_mut(), &mut writer, tables, None, Duration::from_secs(3600))
        .await
        .unwrap();
    writer.close().await;
    collector.await.unwrap()
}

fn quiet_config() -> TableWireConfig {
    TableWireConfig { sql_batch_rows: 500, worker_count: 4, quiet: true, ..TableWireConfig::default() }
}

async fn import_into(db: &MockDatabase, importer: &mut dyn Importer, config: &TableWireConfig) -> ImportSummary {
    let factory = db.factory();
    let cancel = CancelToken::new();
    run_import(importer, &factory, config, &cancel).await.unwrap()
}

fn sorted_by_id(mut rows: Vec<Row>) -> Vec<Row> {
    rows.sort_by_key(|row| match row[0] {
        Value::Integer(id) => id,
        _ => i64::MAX,
    });
    rows
}

#[tokio::test]
async fn sql_round_trip_preserves_all_rows() {
    let mut rng = StdRng::seed_from_u64(42);
    let source = seed_source(CREATE_DATA, "data", random_rows(&mut rng, ROW_COUNT)).await;

    let mut dumper = SqlDumper::new(true, false, false, 500);
    let bytes = export_bytes(&source, &mut dumper, &["data".to_string()]).await;

    let destination = MockDatabase::new();
    let mut importer = SqlImporter::new(SqlTokenizer::new(Cursor::new(bytes)), 500);
    let summary = import_into(&destination, &mut importer, &quiet_config()).await;

    assert_eq!(summary.tables, 1);
    assert_eq!(summary.rows, ROW_COUNT as u64);
    assert_eq!(sorted_by_id(destination.rows("data")), sorted_by_id(source.rows("data")));
}

#[tokio::test]
async fn csv_round_trip_preserves_all_rows() {
    let mut rng = StdRng::seed_from_u64(43);
    let source = seed_source(CREATE_DATA, "data", random_rows(&mut rng, ROW_COUNT)).await;

    let mut dumper = CsvDumper::new(true, false);
    let bytes = export_bytes(&source, &mut dumper, &["data".to_string()]).await;

    // CSV carries no DDL, so the destination table has to exist.
    let destination = MockDatabase::new();
    destination.factory().connect().await.unwrap().execute(CREATE_DATA).await.unwrap();

    let mut importer = CsvImporter::new(Cursor::new(bytes), "data", true, Vec::new(), 500, false);
    let summary = import_into(&destination, &mut importer, &quiet_config()).await;

    assert_eq!(summary.rows, ROW_COUNT as u64);
    assert_eq!(sorted_by_id(destination.rows("data")), sorted_by_id(source.rows("data")));
}

#[tokio::test]
async fn json_round_trip_preserves_all_rows() {
    let mut rng = StdRng::seed_from_u64(44);
    let source = seed_source(CREATE_DATA, "data", random_rows(&mut rng, ROW_COUNT)).await;

    let mut dumper = JsonDumper::new();
    let bytes = export_bytes(&source, &mut dumper, &["data".to_string()]).await;

    let destination = MockDatabase::new();
    let mut importer = JsonImporter::new(JsonTokenizer::new(Cursor::new(bytes)), 500, false);
    let summary = import_into(&destination, &mut importer, &quiet_config()).await;

    assert_eq!(summary.tables, 1);
    assert_eq!(summary.rows, ROW_COUNT as u64);
    assert_eq!(sorted_by_id(destination.rows("data")), sorted_by_id(source.rows("data")));
}

#[tokio::test]
async fn load_infile_round_trip_through_worker_pipes() {
    const CREATE_BLOBBY: &str = "CREATE TABLE `blobby` (\
        `id` INT NOT NULL, \
        `payload` BLOB NULL, \
        `note` VARCHAR(64) NULL, \
        `stamp` DATETIME NULL, \
        `amount` DECIMAL(20,6) NULL, \
        PRIMARY KEY (`id`));";

    let mut rng = StdRng::seed_from_u64(45);
    let rows: Vec<Row> = (0..2_000)
        .map(|id| {
            let payload = if rng.gen_bool(0.2) {
                Value::Null
            } else {
                Value::Bytes((0..rng.gen_range(0..32)).map(|_| rng.gen::<u8>()).collect())
            };
            let note = if rng.gen_bool(0.2) {
                Value::Null
            } else {
                let len = rng.gen_range(0..16);
                Value::String((0..len).map(|_| char::from(rng.gen_range(b'a'..=b'z'))).collect())
            };
            let stamp = Value::DateTime(
                chrono::DateTime::from_timestamp(rng.gen_range(0..=2_000_000_000i64), 0).unwrap().naive_utc(),
            );
            let amount = Value::Decimal(format!("{}.{:06}", id, id % 1_000_000).parse::<BigDecimal>().unwrap());
            vec![Value::Integer(id as i64), payload, note, stamp, amount]
        })
        .collect();
    let source = seed_source(CREATE_BLOBBY, "blobby", rows).await;

    let mut dumper = SqlDumper::new(true, false, false, 200);
    let bytes = export_bytes(&source, &mut dumper, &["blobby".to_string()]).await;

    let destination = MockDatabase::new();
    let mut importer = SqlImporter::new(SqlTokenizer::new(Cursor::new(bytes)), 200);
    let config = TableWireConfig {
        ingest_mechanism: IngestMechanism::LoadInfile,
        ..quiet_config()
    };
    let summary = import_into(&destination, &mut importer, &config).await;

    assert_eq!(summary.rows, 2_000);
    assert_eq!(sorted_by_id(destination.rows("blobby")), sorted_by_id(source.rows("blobby")));
}

#[tokio::test]
async fn multiplexed_sql_stream_carries_several_tables() {
    let db = MockDatabase::new();
    let mut conn = db.factory().connect().await.unwrap();
    conn.execute("CREATE TABLE `t1` (`a` INT NOT NULL);").await.unwrap();
    conn.execute("CREATE TABLE `t2` (`b` VARCHAR(8) NULL);").await.unwrap();
    db.insert_rows("t1", (0..10).map(|i| vec![Value::Integer(i)]).collect::<Vec<_>>());
    db.insert_rows("t2", vec![vec![Value::String("hello".into())], vec![Value::Null]]);

    let mut dumper = SqlDumper::new(true, false, false, 100);
    let bytes = export_bytes(&db, &mut dumper, &["t1".to_string(), "t2".to_string()]).await;

    let destination = MockDatabase::new();
    let mut importer = SqlImporter::new(SqlTokenizer::new(Cursor::new(bytes)), 100);
    let summary = import_into(&destination, &mut importer, &quiet_config()).await;

    assert_eq!(summary.tables, 2);
    assert_eq!(destination.rows("t1").len(), 10);
    assert_eq!(sorted_by_id(destination.rows("t2")).len(), 2);
}

#[tokio::test]
async fn csv_dumper_refuses_a_second_table() {
    let db = MockDatabase::new();
    let mut conn = db.factory().connect().await.unwrap();
    conn.execute("CREATE TABLE `t1` (`a` INT NOT NULL);").await.unwrap();
    conn.execute("CREATE TABLE `t2` (`a` INT NOT NULL);").await.unwrap();

    let pipe = Pipe::with_default_watermarks();
    let mut writer = PipeTextWriter::new(pipe.clone());
    let mut dumper = CsvDumper::new(true, false);
    let result = run_export(
        &mut dumper,
        conn.as_mut(),
        &mut writer,
        &["t1".to_string(), "t2".to_string()],
        None,
        Duration::from_secs(3600),
    )
    .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn table_filter_skips_unmatched_tables() {
    let mut rng = StdRng::seed_from_u64(46);
    let source = seed_source(CREATE_DATA, "data", random_rows(&mut rng, 50)).await;

    let mut dumper = SqlDumper::new(true, false, false, 100);
    let bytes = export_bytes(&source, &mut dumper, &["data".to_string()]).await;

    let destination = MockDatabase::new();
    let mut importer = SqlImporter::new(SqlTokenizer::new(Cursor::new(bytes)), 100);
    let config = TableWireConfig {
        table_filter: tablewire_pipeline::TableFilter::named(["somewhere_else".to_string()]),
        ..quiet_config()
    };
    let summary = import_into(&destination, &mut importer, &config).await;

    assert_eq!(summary.tables, 0);
    assert!(destination.rows("data").is_empty());
}

#[tokio::test]
async fn csv_import_without_destination_table_is_a_schema_error() {
    let destination = MockDatabase::new();
    let mut importer = CsvImporter::new(Cursor::new(b"a,b\n1,2\n".to_vec()), "ghost", true, Vec::new(), 100, false);
    let factory = destination.factory();
    let cancel = CancelToken::new();
    let err = run_import(&mut importer, &factory, &quiet_config(), &cancel).await.unwrap_err();
    assert!(matches!(err, tablewire_common::TableWireError::Schema { .. }));
}

#[test]
fn json_escapes_parse_back_to_the_same_characters() {
    use tablewire_pipeline::cell::json_string;
    use tablewire_tokenizer::json::TokenKind;

    let mut tricky: Vec<char> = (0u8..0x20).map(char::from).collect();
    tricky.extend(['"', '\\', '/', 'é', '中']);
    for c in tricky {
        let original: String = [c].iter().collect();
        let escaped = json_string(&original);
        let mut tok = JsonTokenizer::new(Cursor::new(escaped.into_bytes()));
        assert_eq!(tok.read().unwrap(), TokenKind::String);
        assert_eq!(tok.str_value(), original, "codepoint {:#x}", c as u32);
    }
}
