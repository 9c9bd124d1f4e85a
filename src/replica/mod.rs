//! This mod is the boundary to the storage replicas. The engine never talks to storage except
//! through `ReplicaConnection`.

mod connection;
mod connector;
mod endpoint;
mod sqlite;

pub use connection::QueryOutput;
pub use connection::ReplicaConnection;
pub use connection::ReplicaError;
pub use connection::SqlRow;
pub use connection::SqlValue;
pub use connector::ReplicaConnector;
pub use endpoint::EndpointListError;
pub use endpoint::ReplicaEndpoint;
pub use sqlite::SqliteConnector;
