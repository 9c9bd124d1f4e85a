use crate::quorum::ReplicaHandle;
use futures::future;

/// ReplicaSession holds the live replicas acquired for exactly one logical operation. Call
/// `release()` when the operation ends. A session that is dropped without being released still
/// drops (and therefore disconnects) every connection, just without a clean close.
pub(crate) struct ReplicaSession {
    logger: slog::Logger,
    replicas: Vec<ReplicaHandle>,
}

impl ReplicaSession {
    pub(super) fn new(logger: slog::Logger, replicas: Vec<ReplicaHandle>) -> Self {
        ReplicaSession { logger, replicas }
    }

    pub(crate) fn replicas_mut(&mut self) -> &mut [ReplicaHandle] {
        &mut self.replicas
    }

    pub(crate) fn replica_ids(&self) -> Vec<&str> {
        self.replicas.iter().map(|r| r.id()).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.replicas.len()
    }

    /// Close every open connection. Idempotent.
    pub(crate) async fn release(&mut self) {
        if self.replicas.is_empty() {
            return;
        }

        slog::debug!(self.logger, "Releasing {} replica connections", self.replicas.len());
        let closing: Vec<_> = self.replicas.drain(..).map(ReplicaHandle::close).collect();
        future::join_all(closing).await;
    }
}

impl Drop for ReplicaSession {
    fn drop(&mut self) {
        if !self.replicas.is_empty() {
            slog::debug!(
                self.logger,
                "Session dropped without release. Dropping {} connections.",
                self.replicas.len()
            );
        }
    }
}
