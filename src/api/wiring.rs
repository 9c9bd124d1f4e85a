use crate::api::options::PaxosOptionsValidated;
use crate::api::store::PaxosStore;
use crate::paxos::SequenceGenerator;
use crate::quorum::QuorumManager;
use crate::replica::{ReplicaConnector, ReplicaEndpoint};
use crate::PaxosOptions;
use std::collections::HashSet;
use std::convert::TryFrom;
use std::sync::Arc;

pub struct PaxosStoreConfig {
    // Quorum size is derived from the length of this list.
    pub replicas: Vec<ReplicaEndpoint>,
    pub connector: Arc<dyn ReplicaConnector>,
    pub info_logger: slog::Logger,
    pub options: PaxosOptions,
}

#[derive(Debug, thiserror::Error)]
pub enum PaxosStoreCreationError {
    #[error("Illegal options for configuring store: {0}")]
    IllegalOptions(String),
    #[error("At least one replica is required")]
    NoReplicas,
    #[error("Replica id '{0}' is configured more than once")]
    DuplicateReplicaId(String),
}

pub fn try_create_paxos_store(config: PaxosStoreConfig) -> Result<PaxosStore, PaxosStoreCreationError> {
    let root_logger = config.info_logger;

    if config.replicas.is_empty() {
        return Err(PaxosStoreCreationError::NoReplicas);
    }
    let mut seen_ids = HashSet::new();
    for endpoint in config.replicas.iter() {
        if !seen_ids.insert(endpoint.id.as_str()) {
            return Err(PaxosStoreCreationError::DuplicateReplicaId(endpoint.id.clone()));
        }
    }

    let options = PaxosOptionsValidated::try_from(config.options)
        .map_err(|e| PaxosStoreCreationError::IllegalOptions(e.to_string()))?;

    let logger = root_logger.new(slog::o!("Proposer" => options.proposer_id));
    slog::info!(
        logger,
        "Creating store over {} replicas: {}",
        config.replicas.len(),
        config
            .replicas
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    );

    let quorum = QuorumManager::new(
        logger.clone(),
        config.replicas,
        config.connector,
        options.replica_call_timeout,
    );
    let sequence = SequenceGenerator::new(options.proposer_id);

    Ok(PaxosStore::new(logger, quorum, sequence, options.retry))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replica::SqliteConnector;
    use tokio::time::Duration;

    fn config(replicas: Vec<ReplicaEndpoint>, options: PaxosOptions) -> PaxosStoreConfig {
        PaxosStoreConfig {
            replicas,
            connector: Arc::new(SqliteConnector::new()),
            info_logger: slog::Logger::root(slog::Discard, slog::o!()),
            options,
        }
    }

    fn endpoints(n: usize) -> Vec<ReplicaEndpoint> {
        (1..=n)
            .map(|i| ReplicaEndpoint::new(format!("r{}", i), format!("/nonexistent/r{}.sqlite", i)))
            .collect()
    }

    #[test]
    fn quorum_follows_configured_replicas() {
        let store = try_create_paxos_store(config(endpoints(5), PaxosOptions::default())).unwrap();
        assert_eq!(store.num_replicas(), 5);
        assert_eq!(store.quorum_size(), 3);

        let store = try_create_paxos_store(config(endpoints(1), PaxosOptions::default())).unwrap();
        assert_eq!(store.quorum_size(), 1);
    }

    #[test]
    fn rejects_bad_config() {
        assert!(matches!(
            try_create_paxos_store(config(vec![], PaxosOptions::default())),
            Err(PaxosStoreCreationError::NoReplicas)
        ));

        let mut duplicated = endpoints(2);
        duplicated.push(ReplicaEndpoint::new("r1", "/elsewhere.sqlite"));
        assert!(matches!(
            try_create_paxos_store(config(duplicated, PaxosOptions::default())),
            Err(PaxosStoreCreationError::DuplicateReplicaId(id)) if id == "r1"
        ));

        let options = PaxosOptions {
            replica_call_timeout: Some(Duration::from_secs(0)),
            ..PaxosOptions::default()
        };
        assert!(matches!(
            try_create_paxos_store(config(endpoints(3), options)),
            Err(PaxosStoreCreationError::IllegalOptions(_))
        ));
    }
}
