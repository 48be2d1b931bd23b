//! PostgreSQL collaborators: catalog discovery, row fetching and literal
//! rendering.

use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use datasubset_core::{Error, Result};

mod decode;
pub mod dialect;
pub mod discoverer;
mod queries;
pub mod source;
pub mod sql;

pub use dialect::PostgresDialect;
pub use discoverer::PostgresDiscoverer;
pub use source::PostgresRowSource;
pub use sql::ColumnInfo;

/// Open a connection pool for `conn`.
pub async fn connect(conn: &str) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(10))
        .connect(conn)
        .await
        .map_err(db_error)
}

pub(crate) fn db_error(err: sqlx::Error) -> Error {
    Error::Db(err.to_string())
}
