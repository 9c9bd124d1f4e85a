//! This mod is meant to hold most of the code for the library's client-facing API.
mod options;
mod store;
mod wiring;

pub use options::PaxosOptions;
pub use options::RetryPolicy;
pub use store::PaxosStore;
pub use store::ReadError;
pub use store::ReadInput;
pub use store::ReadOutput;
pub use store::WriteError;
pub use store::WriteInput;
pub use store::WriteOutput;
pub use wiring::try_create_paxos_store;
pub use wiring::PaxosStoreConfig;
pub use wiring::PaxosStoreCreationError;
