//! The `Connection` contract the pipeline programs against, a
//! `mysql_async`-backed implementation, and an in-process mock for tests.

pub mod connection;
pub mod mock;
pub mod mysql;

pub use connection::{BulkLoadOptions, Connection, ConnectionFactory, Row, RowCursor};
pub use mock::MockDatabase;
pub use mysql::MysqlConnection;
