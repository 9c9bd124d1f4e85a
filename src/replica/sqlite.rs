//! Reference replica backed by a local SQLite database file. Each endpoint's `location` is the path
//! of the database file. This is what the CLI uses, and it is handy for tests, but any storage
//! engine that can run the paxos table statements can be plugged in via `ReplicaConnector`.

use crate::paxos::PAXOS_TABLE_DDL;
use crate::replica::{QueryOutput, ReplicaConnection, ReplicaConnector, ReplicaEndpoint, ReplicaError, SqlValue};
use rusqlite::types::{ToSqlOutput, Value, ValueRef};
use rusqlite::{Connection, ToSql};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct SqliteConnector {
    busy_timeout: Duration,
}

impl SqliteConnector {
    pub fn new() -> Self {
        SqliteConnector {
            busy_timeout: Duration::from_secs(1),
        }
    }

    /// How long SQLite waits on a locked database file before failing a statement.
    pub fn with_busy_timeout(busy_timeout: Duration) -> Self {
        SqliteConnector { busy_timeout }
    }
}

impl Default for SqliteConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ReplicaConnector for SqliteConnector {
    async fn connect(&self, endpoint: &ReplicaEndpoint) -> Result<Box<dyn ReplicaConnection>, ReplicaError> {
        let location = endpoint.location.clone();
        let busy_timeout = self.busy_timeout;

        // Opening runs the DDL, which can wait on another writer's lock for up to `busy_timeout`.
        let connection = tokio::task::spawn_blocking(move || -> Result<Connection, ReplicaError> {
            let connection =
                Connection::open(&location).map_err(|e| ReplicaError::Connect(format!("{}: {}", location, e)))?;
            connection.busy_timeout(busy_timeout).map_err(sql_error)?;
            connection.execute_batch(PAXOS_TABLE_DDL).map_err(sql_error)?;
            Ok(connection)
        })
        .await
        .map_err(join_error)??;

        Ok(Box::new(SqliteReplica {
            connection: Arc::new(Mutex::new(Some(connection))),
        }))
    }
}

/// Every rusqlite call runs on tokio's blocking pool, so a caller's timeout can fire while SQLite
/// waits on a locked file. An abandoned call keeps the connection locked until it finishes.
pub(crate) struct SqliteReplica {
    // None once closed.
    connection: Arc<Mutex<Option<Connection>>>,
}

impl SqliteReplica {
    async fn blocking<T, F>(&self, work: F) -> Result<T, ReplicaError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, ReplicaError> + Send + 'static,
    {
        let connection = Arc::clone(&self.connection);
        tokio::task::spawn_blocking(move || -> Result<T, ReplicaError> {
            let guard = connection.lock().map_err(|_| ReplicaError::Closed)?;
            match guard.as_ref() {
                Some(connection) => work(connection),
                None => Err(ReplicaError::Closed),
            }
        })
        .await
        .map_err(join_error)?
    }
}

#[async_trait::async_trait]
impl ReplicaConnection for SqliteReplica {
    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<QueryOutput, ReplicaError> {
        let sql = sql.to_string();
        let params = params.to_vec();
        self.blocking(move |connection| run(connection, &sql, &params)).await
    }

    async fn begin(&mut self) -> Result<(), ReplicaError> {
        // Take the write lock up front so the read-check-write inside a transaction is atomic.
        self.blocking(|connection| connection.execute_batch("BEGIN IMMEDIATE").map_err(sql_error))
            .await
    }

    async fn commit(&mut self) -> Result<(), ReplicaError> {
        self.blocking(|connection| connection.execute_batch("COMMIT").map_err(sql_error))
            .await
    }

    async fn rollback(&mut self) -> Result<(), ReplicaError> {
        self.blocking(|connection| connection.execute_batch("ROLLBACK").map_err(sql_error))
            .await
    }

    async fn close(&mut self) -> Result<(), ReplicaError> {
        let connection = Arc::clone(&self.connection);
        tokio::task::spawn_blocking(move || -> Result<(), ReplicaError> {
            let taken = connection.lock().map_err(|_| ReplicaError::Closed)?.take();
            match taken {
                None => Ok(()),
                Some(connection) => connection.close().map_err(|(_, e)| sql_error(e)),
            }
        })
        .await
        .map_err(join_error)?
    }
}

fn run(connection: &Connection, sql: &str, params: &[SqlValue]) -> Result<QueryOutput, ReplicaError> {
    let mut statement = connection.prepare(sql).map_err(sql_error)?;
    let column_count = statement.column_count();

    if column_count == 0 {
        let rows_affected = statement
            .execute(rusqlite::params_from_iter(params.iter()))
            .map_err(sql_error)?;
        return Ok(QueryOutput {
            rows: Vec::new(),
            rows_affected,
        });
    }

    let mut rows = statement
        .query(rusqlite::params_from_iter(params.iter()))
        .map_err(sql_error)?;
    let mut output = QueryOutput::default();
    while let Some(row) = rows.next().map_err(sql_error)? {
        let mut values = Vec::with_capacity(column_count);
        for idx in 0..column_count {
            values.push(convert_column(row.get_ref(idx).map_err(sql_error)?)?);
        }
        output.rows.push(values);
    }

    Ok(output)
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Owned(Value::Null),
            SqlValue::Integer(i) => ToSqlOutput::Owned(Value::Integer(*i)),
            SqlValue::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            SqlValue::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b.as_slice())),
        })
    }
}

fn convert_column(value: ValueRef<'_>) -> Result<SqlValue, ReplicaError> {
    match value {
        ValueRef::Null => Ok(SqlValue::Null),
        ValueRef::Integer(i) => Ok(SqlValue::Integer(i)),
        ValueRef::Text(t) => Ok(SqlValue::Text(String::from_utf8_lossy(t).into_owned())),
        ValueRef::Blob(b) => Ok(SqlValue::Blob(b.to_vec())),
        ValueRef::Real(r) => Err(ReplicaError::MalformedRow(format!("Unexpected REAL column {}", r))),
    }
}

fn sql_error(e: rusqlite::Error) -> ReplicaError {
    ReplicaError::Sql(e.to_string())
}

fn join_error(e: tokio::task::JoinError) -> ReplicaError {
    ReplicaError::Sql(format!("Blocking SQLite call failed: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open_temp() -> (tempfile::TempDir, Box<dyn ReplicaConnection>) {
        let dir = tempfile::tempdir().unwrap();
        let location = dir.path().join("replica.sqlite");
        let endpoint = ReplicaEndpoint::new("r1", location.to_string_lossy());
        let connection = SqliteConnector::new().connect(&endpoint).await.unwrap();
        (dir, connection)
    }

    #[tokio::test]
    async fn schema_is_created_and_queryable() {
        let (_dir, mut conn) = open_temp().await;

        let inserted = conn
            .execute(
                "INSERT INTO paxostable (keyhash, version, keyblob) VALUES (?1, ?2, ?3)",
                &[SqlValue::from("abc"), SqlValue::from(1), SqlValue::Blob(b"k".to_vec())],
            )
            .await
            .unwrap();
        assert_eq!(inserted.rows_affected, 1);
        assert!(inserted.rows.is_empty());

        let selected = conn
            .execute(
                "SELECT version, promised_seq, keyblob FROM paxostable WHERE keyhash = ?1",
                &[SqlValue::from("abc")],
            )
            .await
            .unwrap();
        assert_eq!(
            selected.rows,
            vec![vec![SqlValue::Integer(1), SqlValue::Null, SqlValue::Blob(b"k".to_vec())]]
        );

        // Primary key violation surfaces as a SQL error, not a panic.
        let duplicate = conn
            .execute(
                "INSERT INTO paxostable (keyhash, version) VALUES (?1, ?2)",
                &[SqlValue::from("abc"), SqlValue::from(1)],
            )
            .await;
        assert!(matches!(duplicate, Err(ReplicaError::Sql(_))));
    }

    #[tokio::test]
    async fn rollback_discards_changes() {
        let (_dir, mut conn) = open_temp().await;

        conn.begin().await.unwrap();
        conn.execute(
            "INSERT INTO paxostable (keyhash, version) VALUES (?1, ?2)",
            &[SqlValue::from("abc"), SqlValue::from(1)],
        )
        .await
        .unwrap();
        conn.rollback().await.unwrap();

        let count = conn
            .execute("SELECT COUNT(*) FROM paxostable", &[])
            .await
            .unwrap();
        assert_eq!(count.rows, vec![vec![SqlValue::Integer(0)]]);

        conn.close().await.unwrap();
        assert!(matches!(conn.execute("SELECT 1", &[]).await, Err(ReplicaError::Closed)));
        // Closing twice is fine.
        conn.close().await.unwrap();
    }

    #[tokio::test]
    async fn locked_database_does_not_block_the_caller() {
        let dir = tempfile::tempdir().unwrap();
        let location = dir.path().join("replica.sqlite");
        let endpoint = ReplicaEndpoint::new("r1", location.to_string_lossy());
        let connector = SqliteConnector::with_busy_timeout(Duration::from_secs(2));
        let mut conn = connector.connect(&endpoint).await.unwrap();

        let locker = Connection::open(&location).unwrap();
        locker.execute_batch("BEGIN EXCLUSIVE").unwrap();

        let started = std::time::Instant::now();
        let count = conn.execute("SELECT COUNT(*) FROM paxostable", &[]);
        let result = tokio::time::timeout(Duration::from_millis(100), count).await;
        assert!(result.is_err(), "{:?}", result);
        let result = tokio::time::timeout(Duration::from_millis(100), connector.connect(&endpoint)).await;
        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_secs(1), "{:?}", started.elapsed());

        locker.execute_batch("COMMIT").unwrap();
        // The abandoned call finishes once the lock is gone and the connection is usable again.
        let count = conn.execute("SELECT COUNT(*) FROM paxostable", &[]).await.unwrap();
        assert_eq!(count.rows, vec![vec![SqlValue::Integer(0)]]);
    }

    #[tokio::test]
    async fn unreachable_location_fails_to_connect() {
        let endpoint = ReplicaEndpoint::new("r1", "/definitely/not/a/dir/replica.sqlite");
        let result = SqliteConnector::new().connect(&endpoint).await;
        assert!(matches!(result, Err(ReplicaError::Connect(_))));
    }
}
