use std::convert::TryFrom;
use tokio::time::Duration;

#[derive(Clone, Default)]
pub struct PaxosOptions {
    /// Upper bound for every single call to a replica (connect, statement, commit, ...). A replica
    /// that doesn't answer in time is left out of the current phase.
    pub replica_call_timeout: Option<Duration>,
    /// Tie-breaker between proposers that start a round in the same millisecond. Should be unique
    /// per store instance. Random if not set.
    pub proposer_id: Option<u16>,
    pub retry: Option<RetryPolicy>,
}

/// RetryPolicy lets `PaxosStore::write()` retry rounds that failed for lack of a quorum, each
/// time with a fresh sequence number after a random backoff. The default policy doesn't retry.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Total number of rounds, including the first one.
    pub max_attempts: u32,
    pub backoff_min: Duration,
    pub backoff_max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 1,
            backoff_min: Duration::from_millis(50),
            backoff_max: Duration::from_millis(250),
        }
    }
}

pub(super) struct PaxosOptionsValidated {
    pub replica_call_timeout: Duration,
    pub proposer_id: u16,
    pub retry: RetryPolicy,
}

impl PaxosOptionsValidated {
    fn validate(&self) -> Result<(), &'static str> {
        if self.replica_call_timeout == Duration::from_millis(0) {
            return Err("Replica call timeout must be greater than zero");
        }
        if self.retry.max_attempts < 1 {
            return Err("Retry policy must allow at least one attempt");
        }
        if self.retry.backoff_min > self.retry.backoff_max {
            return Err("Retry minimum backoff must not exceed maximum backoff");
        }

        Ok(())
    }
}

impl TryFrom<PaxosOptions> for PaxosOptionsValidated {
    type Error = &'static str;

    fn try_from(options: PaxosOptions) -> Result<Self, Self::Error> {
        let values = PaxosOptionsValidated {
            replica_call_timeout: options.replica_call_timeout.unwrap_or(Duration::from_secs(2)),
            proposer_id: options.proposer_id.unwrap_or_else(rand::random),
            retry: options.retry.unwrap_or_default(),
        };

        values.validate()?;
        Ok(values)
    }
}
