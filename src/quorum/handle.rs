use crate::replica::{QueryOutput, ReplicaConnection, ReplicaError, SqlValue};
use std::future::Future;
use tokio::time::Duration;

/// ReplicaHandle is one live replica connection acquired for a single operation. Every call is
/// bounded by `call_timeout`, so a hung replica turns into an error instead of stalling a phase.
pub(crate) struct ReplicaHandle {
    logger: slog::Logger,
    id: String,
    connection: Box<dyn ReplicaConnection>,
    call_timeout: Duration,
}

impl ReplicaHandle {
    pub(crate) fn new(
        logger: &slog::Logger,
        id: String,
        connection: Box<dyn ReplicaConnection>,
        call_timeout: Duration,
    ) -> Self {
        ReplicaHandle {
            logger: logger.new(slog::o!("Replica" => id.clone())),
            id,
            connection,
            call_timeout,
        }
    }

    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn logger(&self) -> &slog::Logger {
        &self.logger
    }

    pub(crate) async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<QueryOutput, ReplicaError> {
        slog::debug!(self.logger, "SQL - {} {:?}", sql, params);
        let result = Self::timed(self.call_timeout, self.connection.execute(sql, params)).await;
        slog::debug!(self.logger, "SQL - {:?}", result);
        result
    }

    pub(crate) async fn begin(&mut self) -> Result<(), ReplicaError> {
        Self::timed(self.call_timeout, self.connection.begin()).await
    }

    pub(crate) async fn commit(&mut self) -> Result<(), ReplicaError> {
        Self::timed(self.call_timeout, self.connection.commit()).await
    }

    pub(crate) async fn rollback(&mut self) -> Result<(), ReplicaError> {
        Self::timed(self.call_timeout, self.connection.rollback()).await
    }

    /// Roll back after a failure inside a transaction. The original failure is what matters, so
    /// a rollback error is only logged.
    pub(crate) async fn rollback_quietly(&mut self) {
        if let Err(e) = self.rollback().await {
            slog::warn!(self.logger, "Rollback failed: {}", e);
        }
    }

    pub(crate) async fn close(mut self) {
        if let Err(e) = Self::timed(self.call_timeout, self.connection.close()).await {
            slog::warn!(self.logger, "Failed to close connection cleanly: {}", e);
        }
    }

    async fn timed<T, F>(call_timeout: Duration, call: F) -> Result<T, ReplicaError>
    where
        F: Future<Output = Result<T, ReplicaError>>,
    {
        match tokio::time::timeout(call_timeout, call).await {
            Ok(result) => result,
            Err(_elapsed) => Err(ReplicaError::Timeout),
        }
    }
}
