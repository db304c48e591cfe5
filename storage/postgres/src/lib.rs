use std::collections::BTreeMap;
use std::error::Error;
use std::time::Duration;

use bb8_postgres::{tokio_postgres::NoTls, PostgresConnectionManager};
use bookingbench_core::{ConnectionConfig, StoreError};
use tokio::sync::Mutex;
use tokio_postgres::error::SqlState;
use tracing::{debug, info};

mod bulk;
pub mod query;
pub mod sql_builder;
mod timescale;

pub use query::{PostgresSession, PostgresTarget};

pub type Pool = bb8::Pool<PostgresConnectionManager<NoTls>>;

/// A pooled PostgreSQL (optionally TimescaleDB) store.
pub struct Postgres {
    pool: Pool,
    label: String,
    /// Declared type of every column, per table, loaded on first insert.
    column_types: Mutex<BTreeMap<String, BTreeMap<String, String>>>,
}

impl Postgres {
    pub const DEFAULT_POOL_SIZE: u32 = 8;

    pub fn new(pool: Pool, label: impl Into<String>) -> Self { Self { pool, label: label.into(), column_types: Mutex::new(BTreeMap::new()) } }

    /// Builds a pool for `config`. The first connection is established eagerly so that
    /// an unreachable store is reported before any work starts.
    pub async fn connect(config: &ConnectionConfig, pool_size: u32) -> Result<Self, StoreError> {
        let manager = PostgresConnectionManager::new_from_stringlike(config.connection_string(), NoTls).map_err(classify)?;
        let pool = bb8::Pool::builder()
            .max_size(pool_size.max(1))
            .min_idle(Some(1))
            .connection_timeout(Duration::from_secs(30))
            .build(manager)
            .await
            .map_err(classify)?;
        info!("Connected to {}", config.redacted());
        Ok(Self::new(pool, config.redacted()))
    }

    pub fn pool(&self) -> &Pool { &self.pool }

    // Identifiers are spliced into SQL, so only plain names are accepted.
    pub fn sane_name(name: &str) -> bool {
        for char in name.chars() {
            match char {
                char if char.is_ascii_alphanumeric() => {}
                '_' => {}
                _ => return false,
            }
        }

        !name.is_empty()
    }

    async fn client(&self) -> Result<bb8::PooledConnection<'_, PostgresConnectionManager<NoTls>>, StoreError> { self.pool.get().await.map_err(pool_error) }

    /// Column name to declared type (as `udt_name`) for `table`, cached.
    async fn column_types(&self, table: &str) -> Result<BTreeMap<String, String>, StoreError> {
        let mut cache = self.column_types.lock().await;
        if let Some(types) = cache.get(table) {
            return Ok(types.clone());
        }

        let client = self.client().await?;
        let rows = client
            .query(
                "SELECT column_name::text, udt_name::text FROM information_schema.columns WHERE table_schema = current_schema() AND table_name = $1",
                &[&table],
            )
            .await
            .map_err(classify)?;
        let types: BTreeMap<String, String> = rows.iter().map(|row| (row.get(0), row.get(1))).collect();
        if types.is_empty() {
            return Err(StoreError::integrity(format!("table {table} does not exist")));
        }
        debug!("Postgres({}).column_types({table}): {types:?}", self.label);
        cache.insert(table.to_string(), types.clone());
        Ok(types)
    }
}

/// Coarse class of a PostgreSQL failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorKind {
    Connectivity,
    Integrity,
    Timeout,
    Unknown,
}

/// Classifies a SQLSTATE code by its class.
pub fn sqlstate_kind(code: &str) -> ErrorKind {
    if code == SqlState::QUERY_CANCELED.code() {
        return ErrorKind::Timeout;
    }
    match &code[..code.len().min(2)] {
        // connection exception, invalid authorization, operator intervention (shutdown)
        "08" | "28" => ErrorKind::Connectivity,
        "57" if code.starts_with("57P") => ErrorKind::Connectivity,
        "3D" => ErrorKind::Connectivity,
        // data exception, integrity constraint violation, syntax error or access rule violation
        "22" | "23" | "42" => ErrorKind::Integrity,
        _ => ErrorKind::Unknown,
    }
}

pub fn error_kind(err: &tokio_postgres::Error) -> ErrorKind {
    if err.is_closed() {
        return ErrorKind::Connectivity;
    }
    match err.code() {
        Some(code) => sqlstate_kind(code.code()),
        None => err.source().map_or(ErrorKind::Unknown, source_kind),
    }
}

/// Classifies a client-side failure by its cause: socket errors are connectivity, anything
/// else (a value that failed to encode or decode) means the schema does not match.
pub fn source_kind(source: &(dyn Error + 'static)) -> ErrorKind {
    let mut current = Some(source);
    while let Some(err) = current {
        if err.is::<std::io::Error>() {
            return ErrorKind::Connectivity;
        }
        current = err.source();
    }
    ErrorKind::Integrity
}

pub fn classify(err: tokio_postgres::Error) -> StoreError {
    match error_kind(&err) {
        ErrorKind::Connectivity => StoreError::connectivity(err),
        ErrorKind::Integrity => StoreError::integrity(err),
        ErrorKind::Timeout => StoreError::Timeout(Box::new(err)),
        ErrorKind::Unknown => StoreError::other(err),
    }
}

pub fn pool_error(err: bb8::RunError<tokio_postgres::Error>) -> StoreError {
    match err {
        bb8::RunError::User(err) => classify(err),
        bb8::RunError::TimedOut => StoreError::connectivity("timed out waiting for a pooled connection"),
    }
}

/// Double-quotes an identifier that already passed [`Postgres::sane_name`].
pub(crate) fn quoted(name: &str) -> String { format!(r#""{}""#, name.replace('"', "\"\"")) }

pub(crate) fn check_name(name: &str) -> Result<(), StoreError> {
    if Postgres::sane_name(name) {
        Ok(())
    } else {
        Err(StoreError::integrity(format!("refusing unsafe identifier {name:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sane_names() {
        assert!(Postgres::sane_name("booking"));
        assert!(Postgres::sane_name("dateCreated"));
        assert!(Postgres::sane_name("_hyper_1_2_chunk"));
        assert!(!Postgres::sane_name("user\"; DROP TABLE booking; --"));
        assert!(!Postgres::sane_name("a.b"));
        assert!(!Postgres::sane_name(""));
    }

    #[test]
    fn sqlstate_classes() {
        assert_eq!(sqlstate_kind("08006"), ErrorKind::Connectivity);
        assert_eq!(sqlstate_kind("28P01"), ErrorKind::Connectivity);
        assert_eq!(sqlstate_kind("57P01"), ErrorKind::Connectivity);
        assert_eq!(sqlstate_kind("3D000"), ErrorKind::Connectivity);
        assert_eq!(sqlstate_kind("57014"), ErrorKind::Timeout);
        assert_eq!(sqlstate_kind("23503"), ErrorKind::Integrity);
        assert_eq!(sqlstate_kind("23505"), ErrorKind::Integrity);
        assert_eq!(sqlstate_kind("42P01"), ErrorKind::Integrity);
        assert_eq!(sqlstate_kind("22P02"), ErrorKind::Integrity);
        assert_eq!(sqlstate_kind("53100"), ErrorKind::Unknown);
    }

    #[test]
    fn client_side_causes() {
        let refused = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "connection refused");
        assert_eq!(source_kind(&refused), ErrorKind::Connectivity);

        let decode: Box<dyn Error + Send + Sync> = "invalid buffer size".into();
        assert_eq!(source_kind(&*decode), ErrorKind::Integrity);

        let wrong_type = tokio_postgres::types::WrongType::new::<i64>(tokio_postgres::types::Type::INT4);
        assert_eq!(source_kind(&wrong_type), ErrorKind::Integrity);
    }

    #[test]
    fn quoting() {
        assert_eq!(quoted("offererId"), "\"offererId\"");
        assert_eq!(quoted("user"), "\"user\"");
    }
}
