use crate::api::options::RetryPolicy;
use crate::paxos;
use crate::paxos::{Proposer, Reader, SequenceGenerator};
use crate::quorum::QuorumManager;
use bytes::Bytes;
use rand::Rng;

/// PaxosStore is the versioned key-value store for external application to write to and read
/// from. Every call is one logical operation over a fresh set of replica connections.
pub struct PaxosStore {
    logger: slog::Logger,
    quorum: QuorumManager,
    sequence: SequenceGenerator,
    retry: RetryPolicy,
}

impl PaxosStore {
    pub(crate) fn new(
        logger: slog::Logger,
        quorum: QuorumManager,
        sequence: SequenceGenerator,
        retry: RetryPolicy,
    ) -> Self {
        PaxosStore {
            logger,
            quorum,
            sequence,
            retry,
        }
    }

    pub fn num_replicas(&self) -> usize {
        self.quorum.num_replicas()
    }

    pub fn quorum_size(&self) -> usize {
        self.quorum.quorum_size()
    }

    /// Agree on `value` for `version` of `key`. `version` must be exactly one more than the
    /// latest learned version of the key (a key's first version is 1).
    pub async fn write(&self, input: WriteInput) -> Result<WriteOutput, WriteError> {
        input.validate()?;

        let logger = self.logger.new(slog::o!(
            "Op" => "write",
            "KeyHash" => paxos::content_digest(&input.key),
            "Version" => input.version,
        ));

        let mut attempt = 1;
        loop {
            let result = self.write_once(&logger, &input).await;
            match &result {
                Err(e) if e.is_quorum_failure() && attempt < self.retry.max_attempts => {
                    let backoff = rand::thread_rng().gen_range(self.retry.backoff_min..=self.retry.backoff_max);
                    slog::info!(logger, "Attempt {} failed: {}. Retrying in {:?}", attempt, e, backoff);
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                _ => return result,
            }
        }
    }

    async fn write_once(&self, logger: &slog::Logger, input: &WriteInput) -> Result<WriteOutput, WriteError> {
        let mut session = self.quorum.acquire().await;

        let proposer = Proposer::new(logger, &mut session, self.quorum.quorum_size(), self.sequence.next());
        let result = proposer
            .propose(paxos::ProposeInput {
                key: input.key.clone(),
                version: input.version,
                value: input.value.clone(),
            })
            .await;

        session.release().await;

        result.map(WriteOutput::from).map_err(WriteError::from)
    }

    /// Read the latest learned version of `key`. Replicas that lag behind are repaired on the way.
    pub async fn read(&self, input: ReadInput) -> Result<ReadOutput, ReadError> {
        if input.key.is_empty() {
            return Err(ReadError::InvalidInput("Key must not be empty"));
        }

        let logger = self.logger.new(slog::o!(
            "Op" => "read",
            "KeyHash" => paxos::content_digest(&input.key),
        ));

        let mut session = self.quorum.acquire().await;
        let result = Reader::new(&logger, &mut session, self.quorum.quorum_size())
            .lookup(&input.key)
            .await;
        session.release().await;

        result.map(ReadOutput::from).map_err(ReadError::from)
    }
}

#[derive(Debug)]
pub struct WriteInput {
    pub key: Bytes,
    pub version: i64,
    pub value: Bytes,
}

impl WriteInput {
    fn validate(&self) -> Result<(), WriteError> {
        if self.key.is_empty() {
            return Err(WriteError::InvalidInput("Key must not be empty"));
        }
        if self.value.is_empty() {
            return Err(WriteError::InvalidInput("Value must not be empty"));
        }
        if self.version < 1 {
            return Err(WriteError::InvalidInput("Version must be at least 1"));
        }

        Ok(())
    }
}

#[derive(Debug, PartialEq)]
pub enum WriteOutput {
    /// Our value was learned for the version.
    Ok { version: i64, nodes: usize },
    /// The round completed, but it finished an earlier round's value instead of ours. `value` is
    /// what was learned.
    Resolved { version: i64, value: Bytes, nodes: usize },
}

impl WriteOutput {
    pub fn status(&self) -> &'static str {
        match self {
            WriteOutput::Ok { .. } => "ok",
            WriteOutput::Resolved { .. } => "resolved",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("Invalid input: {0}")]
    InvalidInput(&'static str),

    // Caller should read the key and retry with `existing_max + 1`.
    #[error("Version must follow the latest learned version {existing_max}")]
    InvalidVersion { existing_max: i64 },

    #[error("Version {version} is already learned")]
    AlreadyLearned { version: i64, value: Bytes },

    // The three quorum failures below are transient. Retrying starts a new round.
    #[error("Only {obtained}/{required} replicas promised")]
    NoPromiseQuorum { obtained: usize, required: usize },

    #[error("Only {obtained}/{required} replicas accepted")]
    NoAcceptQuorum { obtained: usize, required: usize },

    #[error("Only {obtained}/{required} replicas learned")]
    NoLearnQuorum { obtained: usize, required: usize },
}

impl WriteError {
    pub fn status(&self) -> &'static str {
        match self {
            WriteError::InvalidInput(_) => "invalid-input",
            WriteError::InvalidVersion { .. } => "invalid-version",
            WriteError::AlreadyLearned { .. } => "already-learned",
            WriteError::NoPromiseQuorum { .. } => "no-promise-quorum",
            WriteError::NoAcceptQuorum { .. } => "no-accept-quorum",
            WriteError::NoLearnQuorum { .. } => "no-learn-quorum",
        }
    }

    fn is_quorum_failure(&self) -> bool {
        matches!(
            self,
            WriteError::NoPromiseQuorum { .. } | WriteError::NoAcceptQuorum { .. } | WriteError::NoLearnQuorum { .. }
        )
    }
}

#[derive(Debug)]
pub struct ReadInput {
    pub key: Bytes,
}

#[derive(Debug, PartialEq)]
pub struct ReadOutput {
    pub version: i64,
    pub value: Bytes,
    /// Replicas holding `version` once the read finished, repaired ones included.
    pub replicas: usize,
}

impl ReadOutput {
    pub fn status(&self) -> &'static str {
        "ok"
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error("Invalid input: {0}")]
    InvalidInput(&'static str),

    #[error("Key has no learned version")]
    NotFound,

    #[error("Only {obtained}/{required} replicas in sync")]
    NoQuorum { obtained: usize, required: usize },
}

impl ReadError {
    pub fn status(&self) -> &'static str {
        match self {
            ReadError::InvalidInput(_) => "invalid-input",
            ReadError::NotFound => "not-found",
            ReadError::NoQuorum { .. } => "no-quorum",
        }
    }
}

// ------- Conversions --------

impl From<paxos::ProposeOutput> for WriteOutput {
    fn from(internal_output: paxos::ProposeOutput) -> Self {
        match internal_output {
            paxos::ProposeOutput::Chosen { version, nodes } => WriteOutput::Ok { version, nodes },
            paxos::ProposeOutput::Adopted { version, value, nodes } => WriteOutput::Resolved { version, value, nodes },
        }
    }
}

impl From<paxos::ProposeError> for WriteError {
    fn from(internal_error: paxos::ProposeError) -> Self {
        match internal_error {
            paxos::ProposeError::VersionConflict { existing_max } => WriteError::InvalidVersion { existing_max },
            paxos::ProposeError::AlreadyLearned { version, value } => WriteError::AlreadyLearned { version, value },
            paxos::ProposeError::NoPromiseQuorum { obtained, required } => {
                WriteError::NoPromiseQuorum { obtained, required }
            }
            paxos::ProposeError::NoAcceptQuorum { obtained, required } => {
                WriteError::NoAcceptQuorum { obtained, required }
            }
            paxos::ProposeError::NoLearnQuorum { obtained, required } => {
                WriteError::NoLearnQuorum { obtained, required }
            }
        }
    }
}

impl From<paxos::LookupOutput> for ReadOutput {
    fn from(internal_output: paxos::LookupOutput) -> Self {
        ReadOutput {
            version: internal_output.version,
            value: internal_output.value,
            replicas: internal_output.replicas,
        }
    }
}

impl From<paxos::LookupError> for ReadError {
    fn from(internal_error: paxos::LookupError) -> Self {
        match internal_error {
            paxos::LookupError::NotFound => ReadError::NotFound,
            paxos::LookupError::NoQuorum { obtained, required } => ReadError::NoQuorum { obtained, required },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_input_validation() {
        fn run(expected_ok: bool, key: &'static [u8], version: i64, value: &'static [u8]) {
            let input = WriteInput {
                key: Bytes::from_static(key),
                version,
                value: Bytes::from_static(value),
            };
            assert_eq!(expected_ok, input.validate().is_ok(), "{:?}", input);
        }

        run(true, b"k", 1, b"v");
        run(true, b"k", 42, b"v");
        run(false, b"", 1, b"v");
        run(false, b"k", 1, b"");
        run(false, b"k", 0, b"v");
        run(false, b"k", -3, b"v");
    }

    #[test]
    fn status_strings() {
        fn run(expected: &str, actual: &str) {
            assert_eq!(expected, actual);
        }

        run("ok", WriteOutput::Ok { version: 1, nodes: 3 }.status());
        run(
            "resolved",
            WriteOutput::Resolved {
                version: 1,
                value: Bytes::from_static(b"v"),
                nodes: 3,
            }
            .status(),
        );
        run("invalid-input", WriteError::InvalidInput("").status());
        run("invalid-version", WriteError::InvalidVersion { existing_max: 1 }.status());
        run(
            "already-learned",
            WriteError::AlreadyLearned {
                version: 1,
                value: Bytes::new(),
            }
            .status(),
        );
        run(
            "no-promise-quorum",
            WriteError::NoPromiseQuorum {
                obtained: 2,
                required: 3,
            }
            .status(),
        );
        run(
            "no-accept-quorum",
            WriteError::NoAcceptQuorum {
                obtained: 2,
                required: 3,
            }
            .status(),
        );
        run(
            "no-learn-quorum",
            WriteError::NoLearnQuorum {
                obtained: 2,
                required: 3,
            }
            .status(),
        );
        run("not-found", ReadError::NotFound.status());
        run(
            "no-quorum",
            ReadError::NoQuorum {
                obtained: 1,
                required: 2,
            }
            .status(),
        );
    }

    #[test]
    fn only_quorum_failures_are_retried() {
        assert!(WriteError::NoPromiseQuorum {
            obtained: 0,
            required: 1
        }
        .is_quorum_failure());
        assert!(WriteError::NoLearnQuorum {
            obtained: 0,
            required: 1
        }
        .is_quorum_failure());
        assert!(!WriteError::InvalidVersion { existing_max: 3 }.is_quorum_failure());
        assert!(!WriteError::InvalidInput("").is_quorum_failure());
    }
}
