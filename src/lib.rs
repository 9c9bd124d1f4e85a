mod api;
mod paxos;
mod quorum;
mod replica;

pub use api::try_create_paxos_store;
pub use api::PaxosOptions;
pub use api::PaxosStore;
pub use api::PaxosStoreConfig;
pub use api::PaxosStoreCreationError;
pub use api::ReadError;
pub use api::ReadInput;
pub use api::ReadOutput;
pub use api::RetryPolicy;
pub use api::WriteError;
pub use api::WriteInput;
pub use api::WriteOutput;
pub use paxos::content_digest;
pub use paxos::PAXOS_TABLE_DDL;
pub use replica::EndpointListError;
pub use replica::QueryOutput;
pub use replica::ReplicaConnection;
pub use replica::ReplicaConnector;
pub use replica::ReplicaEndpoint;
pub use replica::ReplicaError;
pub use replica::SqlRow;
pub use replica::SqlValue;
pub use replica::SqliteConnector;
