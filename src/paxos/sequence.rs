use chrono::Utc;
use std::cmp;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

const PROPOSER_ID_BITS: u32 = 16;

/// SequenceNumber identifies a single Paxos round. Higher always wins.
///
/// Layout: `(milliseconds since epoch << 16) | proposer_id`. Time dominates the ordering, and the
/// proposer id breaks ties between proposers that start a round in the same millisecond.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct SequenceNumber(i64);

impl SequenceNumber {
    #[cfg(test)]
    pub(crate) fn new(seq: i64) -> Self {
        SequenceNumber(seq)
    }

    fn compose(millis: i64, proposer_id: u16) -> Self {
        SequenceNumber((millis << PROPOSER_ID_BITS) | proposer_id as i64)
    }

    pub(crate) fn as_i64(&self) -> i64 {
        self.0
    }
}

impl fmt::Debug for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// SequenceGenerator hands out strictly increasing sequence numbers for one proposer, even if the
/// wall clock stalls or goes backwards.
pub(crate) struct SequenceGenerator {
    proposer_id: u16,
    last_millis: AtomicI64,
}

impl SequenceGenerator {
    pub(crate) fn new(proposer_id: u16) -> Self {
        SequenceGenerator {
            proposer_id,
            last_millis: AtomicI64::new(0),
        }
    }

    pub(crate) fn next(&self) -> SequenceNumber {
        self.next_at(Utc::now().timestamp_millis())
    }

    fn next_at(&self, now_millis: i64) -> SequenceNumber {
        let bump = |last: i64| cmp::max(now_millis, last + 1);
        // The closure never returns None, so both arms carry the previous value.
        let previous = match self
            .last_millis
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| Some(bump(last)))
        {
            Ok(previous) => previous,
            Err(previous) => previous,
        };

        SequenceNumber::compose(bump(previous), self.proposer_id)
    }
}
