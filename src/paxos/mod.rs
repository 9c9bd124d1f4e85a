//! This mod is the Basic Paxos engine: the row model over `paxostable`, the proposer that drives a
//! version of a key through Promise, Accept and Learn, and the reader that serves (and repairs)
//! the latest learned version.

mod digest;
mod outcomes;
mod proposer;
mod reader;
mod row;
mod sequence;

pub use digest::content_digest;
pub use row::PAXOS_TABLE_DDL;

pub(crate) use outcomes::{LookupError, LookupOutput, ProposeError, ProposeInput, ProposeOutput};
pub(crate) use proposer::Proposer;
pub(crate) use reader::Reader;
pub(crate) use sequence::SequenceGenerator;
