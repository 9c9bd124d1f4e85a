use bytes::Bytes;

#[derive(Debug)]
pub(crate) struct ProposeInput {
    pub(crate) key: Bytes,
    pub(crate) version: i64,
    pub(crate) value: Bytes,
}

#[derive(Debug, PartialEq)]
pub(crate) enum ProposeOutput {
    /// Our own value was learned.
    Chosen { version: i64, nodes: usize },
    /// A value from an earlier, unfinished round was learned instead of ours.
    Adopted { version: i64, value: Bytes, nodes: usize },
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum ProposeError {
    #[error("Version is not the successor of the latest learned version {existing_max}")]
    VersionConflict { existing_max: i64 },

    #[error("Version {version} is already learned")]
    AlreadyLearned { version: i64, value: Bytes },

    #[error("Only {obtained}/{required} replicas promised")]
    NoPromiseQuorum { obtained: usize, required: usize },

    #[error("Only {obtained}/{required} replicas accepted")]
    NoAcceptQuorum { obtained: usize, required: usize },

    #[error("Only {obtained}/{required} replicas learned")]
    NoLearnQuorum { obtained: usize, required: usize },
}

#[derive(Debug, PartialEq)]
pub(crate) struct LookupOutput {
    pub(crate) version: i64,
    pub(crate) value: Bytes,
    pub(crate) replicas: usize,
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum LookupError {
    #[error("No learned version")]
    NotFound,

    #[error("Only {obtained}/{required} replicas in sync")]
    NoQuorum { obtained: usize, required: usize },
}
