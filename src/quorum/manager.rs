use crate::quorum::{ReplicaHandle, ReplicaSession};
use crate::replica::{ReplicaConnector, ReplicaEndpoint};
use futures::future;
use rand::seq::SliceRandom;
use std::sync::Arc;
use tokio::time::Duration;

/// QuorumManager owns the configured replica endpoints and hands out one `ReplicaSession` per
/// operation. Connections are never reused across operations.
pub(crate) struct QuorumManager {
    logger: slog::Logger,
    endpoints: Vec<ReplicaEndpoint>,
    connector: Arc<dyn ReplicaConnector>,
    call_timeout: Duration,
}

impl QuorumManager {
    pub(crate) fn new(
        logger: slog::Logger,
        endpoints: Vec<ReplicaEndpoint>,
        connector: Arc<dyn ReplicaConnector>,
        call_timeout: Duration,
    ) -> Self {
        QuorumManager {
            logger,
            endpoints,
            connector,
            call_timeout,
        }
    }

    pub(crate) fn num_replicas(&self) -> usize {
        self.endpoints.len()
    }

    /// Quorum is derived from the configured replica count, not from however many replicas happen
    /// to be reachable right now.
    pub(crate) fn quorum_size(&self) -> usize {
        majority(self.num_replicas())
    }

    /// Connect to every configured replica. Replicas that can't be reached are left out of the
    /// session. The session's replicas are shuffled so no replica is always contacted first.
    pub(crate) async fn acquire(&self) -> ReplicaSession {
        let connects = self.endpoints.iter().map(|endpoint| async move {
            let result = tokio::time::timeout(self.call_timeout, self.connector.connect(endpoint)).await;
            (endpoint, result)
        });

        let mut replicas = Vec::with_capacity(self.endpoints.len());
        for (endpoint, result) in future::join_all(connects).await {
            match result {
                Ok(Ok(connection)) => replicas.push(ReplicaHandle::new(
                    &self.logger,
                    endpoint.id.clone(),
                    connection,
                    self.call_timeout,
                )),
                Ok(Err(e)) => slog::warn!(self.logger, "Replica {} unreachable: {}", endpoint, e),
                Err(_elapsed) => slog::warn!(self.logger, "Replica {} timed out while connecting", endpoint),
            }
        }

        replicas.shuffle(&mut rand::thread_rng());

        let session = ReplicaSession::new(self.logger.clone(), replicas);
        slog::debug!(
            self.logger,
            "Acquired {}/{} replicas: {:?}",
            session.len(),
            self.endpoints.len(),
            session.replica_ids()
        );
        session
    }
}

pub(crate) fn majority(num_replicas: usize) -> usize {
    (num_replicas / 2) + 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replica::{QueryOutput, ReplicaConnection, ReplicaError, SqlValue};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubConnector {
        down: HashSet<String>,
        closed: Arc<AtomicUsize>,
    }

    struct StubConnection {
        closed: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl ReplicaConnector for StubConnector {
        async fn connect(&self, endpoint: &ReplicaEndpoint) -> Result<Box<dyn ReplicaConnection>, ReplicaError> {
            if self.down.contains(&endpoint.id) {
                return Err(ReplicaError::Connect(format!("{} is down", endpoint.id)));
            }
            Ok(Box::new(StubConnection {
                closed: self.closed.clone(),
            }))
        }
    }

    #[async_trait::async_trait]
    impl ReplicaConnection for StubConnection {
        async fn execute(&mut self, _: &str, _: &[SqlValue]) -> Result<QueryOutput, ReplicaError> {
            Ok(QueryOutput::default())
        }

        async fn begin(&mut self) -> Result<(), ReplicaError> {
            Ok(())
        }

        async fn commit(&mut self) -> Result<(), ReplicaError> {
            Ok(())
        }

        async fn rollback(&mut self) -> Result<(), ReplicaError> {
            Ok(())
        }

        async fn close(&mut self) -> Result<(), ReplicaError> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn manager(num_replicas: usize, down: &[&str]) -> (QuorumManager, Arc<AtomicUsize>) {
        let closed = Arc::new(AtomicUsize::new(0));
        let connector = StubConnector {
            down: down.iter().map(|s| s.to_string()).collect(),
            closed: closed.clone(),
        };
        let endpoints = (1..=num_replicas)
            .map(|i| ReplicaEndpoint::new(format!("replica-{}", i), format!("stub://{}", i)))
            .collect();
        let logger = slog::Logger::root(slog::Discard, slog::o!());

        let manager = QuorumManager::new(logger, endpoints, Arc::new(connector), Duration::from_secs(1));
        (manager, closed)
    }

    #[test]
    fn test_majority() {
        fn run(expected: usize, num_replicas: usize) {
            assert_eq!(expected, majority(num_replicas), "cluster of {}", num_replicas);
        }

        run(1, 1);
        run(2, 2);
        run(2, 3);
        run(3, 4);
        run(3, 5);
        run(4, 6);
        run(4, 7);
    }

    #[tokio::test]
    async fn acquire_skips_unreachable_replicas() {
        let (manager, closed) = manager(5, &["replica-2", "replica-4"]);
        assert_eq!(manager.quorum_size(), 3);

        let mut session = manager.acquire().await;
        assert_eq!(session.len(), 3);
        let ids: HashSet<&str> = session.replica_ids().into_iter().collect();
        assert_eq!(ids, vec!["replica-1", "replica-3", "replica-5"].into_iter().collect());

        session.release().await;
        assert_eq!(session.len(), 0);
        assert_eq!(closed.load(Ordering::SeqCst), 3);

        // Releasing again is a no-op.
        session.release().await;
        assert_eq!(closed.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn quorum_is_based_on_configured_replicas() {
        let (manager, _) = manager(5, &["replica-1", "replica-2", "replica-3"]);

        let mut session = manager.acquire().await;
        assert_eq!(session.len(), 2);
        assert_eq!(manager.quorum_size(), 3);
        session.release().await;
    }

    #[tokio::test]
    async fn acquire_order_is_shuffled() {
        let (manager, _) = manager(7, &[]);

        let mut orders = HashSet::new();
        for _ in 0..50 {
            let mut session = manager.acquire().await;
            let order: Vec<String> = session.replica_ids().into_iter().map(String::from).collect();
            orders.insert(order);
            session.release().await;
        }

        // 50 draws out of 7! orders colliding into one is practically impossible.
        assert!(orders.len() > 1);
    }
}
