//! This mod is the quorum manager. It turns the configured replica list into a set of live
//! connections for each operation, and knows how many replicas make a quorum.

mod handle;
mod manager;
mod session;

pub(crate) use handle::ReplicaHandle;
pub(crate) use manager::QuorumManager;
pub(crate) use session::ReplicaSession;
