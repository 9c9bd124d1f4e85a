use bytes::Bytes;

/// SqlValue is a single bound parameter or a single column of a result row.
#[derive(Clone, Debug, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Text(String),
    Blob(Vec<u8>),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Read a nullable integer column. Any non-integer, non-null value is malformed.
    pub fn as_opt_i64(&self) -> Result<Option<i64>, ReplicaError> {
        match self {
            SqlValue::Null => Ok(None),
            SqlValue::Integer(i) => Ok(Some(*i)),
            other => Err(ReplicaError::MalformedRow(format!("Expected integer, found {:?}", other))),
        }
    }

    /// Read a nullable byte column. Text is accepted since some engines hand back blobs as text.
    pub fn as_opt_bytes(&self) -> Result<Option<Bytes>, ReplicaError> {
        match self {
            SqlValue::Null => Ok(None),
            SqlValue::Blob(b) => Ok(Some(Bytes::copy_from_slice(b))),
            SqlValue::Text(s) => Ok(Some(Bytes::copy_from_slice(s.as_bytes()))),
            other => Err(ReplicaError::MalformedRow(format!("Expected blob, found {:?}", other))),
        }
    }

    pub fn as_opt_text(&self) -> Result<Option<&str>, ReplicaError> {
        match self {
            SqlValue::Null => Ok(None),
            SqlValue::Text(s) => Ok(Some(s.as_str())),
            other => Err(ReplicaError::MalformedRow(format!("Expected text, found {:?}", other))),
        }
    }
}

impl From<i64> for SqlValue {
    fn from(i: i64) -> Self {
        SqlValue::Integer(i)
    }
}

impl From<Option<i64>> for SqlValue {
    fn from(opt: Option<i64>) -> Self {
        match opt {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Null,
        }
    }
}

impl From<&str> for SqlValue {
    fn from(s: &str) -> Self {
        SqlValue::Text(s.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(s: String) -> Self {
        SqlValue::Text(s)
    }
}

impl From<&[u8]> for SqlValue {
    fn from(b: &[u8]) -> Self {
        SqlValue::Blob(b.to_vec())
    }
}

impl From<&Bytes> for SqlValue {
    fn from(b: &Bytes) -> Self {
        SqlValue::Blob(b.to_vec())
    }
}

pub type SqlRow = Vec<SqlValue>;

/// QueryOutput holds whatever a statement produced. Statements with result columns fill
/// `rows`, everything else only reports `rows_affected`.
#[derive(Debug, Default, PartialEq)]
pub struct QueryOutput {
    pub rows: Vec<SqlRow>,
    pub rows_affected: usize,
}

impl QueryOutput {
    pub fn first_row(&self) -> Option<&SqlRow> {
        self.rows.first()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReplicaError {
    #[error("Failed to connect to replica: {0}")]
    Connect(String),
    #[error("SQL failure: {0}")]
    Sql(String),
    #[error("Replica call timed out")]
    Timeout,
    #[error("Connection already closed")]
    Closed,
    #[error("Malformed row: {0}")]
    MalformedRow(String),
}

/// ReplicaConnection is an open connection to one storage node. A connection is owned by exactly
/// one in-flight operation, hence `&mut self` everywhere.
///
/// Transactions are connection scoped: `begin()` starts one, and the next `commit()` or
/// `rollback()` ends it. Statements executed outside a transaction auto-commit.
#[async_trait::async_trait]
pub trait ReplicaConnection: Send {
    /// Execute a parameterized statement. Parameters bind positionally to `?1`, `?2`, ...
    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<QueryOutput, ReplicaError>;

    async fn begin(&mut self) -> Result<(), ReplicaError>;

    async fn commit(&mut self) -> Result<(), ReplicaError>;

    async fn rollback(&mut self) -> Result<(), ReplicaError>;

    /// Close the connection. Dropping a connection must also release it; this only lets an impl
    /// surface close failures.
    async fn close(&mut self) -> Result<(), ReplicaError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_decoding() {
        assert_eq!(SqlValue::Null.as_opt_i64().unwrap(), None);
        assert_eq!(SqlValue::Integer(7).as_opt_i64().unwrap(), Some(7));
        assert!(SqlValue::Text("7".into()).as_opt_i64().is_err());

        assert_eq!(
            SqlValue::Blob(b"abc".to_vec()).as_opt_bytes().unwrap(),
            Some(Bytes::from_static(b"abc"))
        );
        assert_eq!(
            SqlValue::Text("abc".into()).as_opt_bytes().unwrap(),
            Some(Bytes::from_static(b"abc"))
        );
        assert!(SqlValue::Integer(1).as_opt_bytes().is_err());

        assert_eq!(SqlValue::from(None::<i64>), SqlValue::Null);
        assert!(SqlValue::from(None::<i64>).is_null());
    }
}
