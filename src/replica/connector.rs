use crate::replica::{ReplicaConnection, ReplicaEndpoint, ReplicaError};

/// ReplicaConnector opens connections to replicas. Connection establishment is entirely up to the
/// application; the engine only asks for a fresh connection at the start of every operation and
/// closes it at the end.
#[async_trait::async_trait]
pub trait ReplicaConnector: Send + Sync {
    async fn connect(&self, endpoint: &ReplicaEndpoint) -> Result<Box<dyn ReplicaConnection>, ReplicaError>;
}
