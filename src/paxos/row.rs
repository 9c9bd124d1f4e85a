//! Row model for the paxos table. One row per slot, i.e. per `(keyhash, version)`.
//!
//! A row is in one of three states (not modeled directly in code):
//! 1. Empty - created by a proposer, `promised_seq = accepted_seq = 0`, no value yet
//! 2. In flight - `promised_seq` and/or `accepted_seq` hold the latest round this replica has seen
//! 3. Learned - `promised_seq` and `accepted_seq` are both NULL, `valueblob` holds the agreed value
//!
//! Learned is terminal. Learning (or repairing) version `v` deletes every row of the key with a
//! version below `v`.

use crate::paxos::content_digest;
use crate::paxos::sequence::SequenceNumber;
use crate::quorum::ReplicaHandle;
use crate::replica::{ReplicaError, SqlRow, SqlValue};
use bytes::Bytes;

/// Schema of the paxos table. Replicas are expected to have it; the SQLite connector creates it.
pub const PAXOS_TABLE_DDL: &str = "CREATE TABLE IF NOT EXISTS paxostable (
    keyhash      CHAR(64) NOT NULL,
    version      INTEGER  NOT NULL,
    promised_seq INTEGER  NULL,
    accepted_seq INTEGER  NULL,
    valuehash    CHAR(64) NULL,
    keyblob      BLOB     NULL,
    valueblob    BLOB     NULL,
    PRIMARY KEY (keyhash, version)
)";

const SELECT_MAX_LEARNED_VERSION: &str = "SELECT MAX(version) FROM paxostable \
     WHERE keyhash = ?1 AND promised_seq IS NULL AND accepted_seq IS NULL";

const INSERT_EMPTY_SLOT: &str = "INSERT INTO paxostable (keyhash, version, promised_seq, accepted_seq, keyblob) \
     VALUES (?1, ?2, 0, 0, ?3)";

const SELECT_SLOT_ROUND: &str = "SELECT promised_seq, accepted_seq, valueblob FROM paxostable \
     WHERE keyhash = ?1 AND version = ?2";

const UPDATE_PROMISE: &str = "UPDATE paxostable SET promised_seq = ?3 WHERE keyhash = ?1 AND version = ?2";

const UPDATE_ACCEPT: &str = "UPDATE paxostable SET accepted_seq = ?3, valuehash = ?4, valueblob = ?5 \
     WHERE keyhash = ?1 AND version = ?2 AND promised_seq = ?3";

const DELETE_SUPERSEDED: &str = "DELETE FROM paxostable WHERE keyhash = ?1 AND version < ?2";

const UPDATE_LEARN: &str = "UPDATE paxostable SET promised_seq = NULL, accepted_seq = NULL \
     WHERE keyhash = ?1 AND version = ?2 \
     AND keyblob IS NOT NULL AND valuehash IS NOT NULL AND valueblob IS NOT NULL \
     AND promised_seq = ?3 AND accepted_seq = ?3";

const SELECT_LEARNED_VALUE: &str = "SELECT valueblob, valuehash FROM paxostable \
     WHERE keyhash = ?1 AND version = ?2 AND promised_seq IS NULL AND accepted_seq IS NULL";

const DELETE_SLOT: &str = "DELETE FROM paxostable WHERE keyhash = ?1 AND version = ?2";

const INSERT_LEARNED: &str = "INSERT INTO paxostable \
     (keyhash, version, promised_seq, accepted_seq, valuehash, keyblob, valueblob) \
     VALUES (?1, ?2, NULL, NULL, ?3, ?4, ?5)";

/// Slot is the `(keyhash, version)` pair being agreed upon.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Slot {
    pub(crate) keyhash: String,
    pub(crate) version: i64,
}

impl Slot {
    pub(crate) fn new(keyhash: String, version: i64) -> Self {
        Slot { keyhash, version }
    }

    fn params(&self) -> [SqlValue; 2] {
        [SqlValue::from(self.keyhash.as_str()), SqlValue::from(self.version)]
    }

    fn params_with(&self, extra: Vec<SqlValue>) -> Vec<SqlValue> {
        let mut params = self.params().to_vec();
        params.extend(extra);
        params
    }
}

/// Vote is what a replica reports back when it promises: the last proposal it accepted for the
/// slot, if any. `accepted_seq` is 0 when nothing was accepted yet.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Vote {
    pub(crate) accepted_seq: i64,
    pub(crate) value: Option<Bytes>,
}

#[derive(Debug, PartialEq)]
pub(crate) enum PromiseReply {
    Promised(Vote),
    /// Replica already promised a round at least as new as ours.
    Outbid { promised_seq: i64 },
    /// The slot is already learned on this replica.
    AlreadyLearned(Bytes),
    /// Slot row doesn't exist, i.e. creating it failed.
    MissingSlot,
}

/// Proposal is the value a proposer asks replicas to accept in its round.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Proposal {
    /// Round that originally accepted `value`, 0 if the value is the proposer's own.
    pub(crate) accepted_seq: i64,
    pub(crate) value: Bytes,
    pub(crate) valuehash: String,
}

impl Proposal {
    pub(crate) fn new(accepted_seq: i64, value: Bytes) -> Self {
        let valuehash = content_digest(&value);
        Proposal {
            accepted_seq,
            value,
            valuehash,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct LearnedValue {
    pub(crate) value: Bytes,
    pub(crate) valuehash: String,
}

/// Highest learned version of a key on this replica, 0 if the key has no learned version.
pub(crate) async fn max_learned_version(replica: &mut ReplicaHandle, keyhash: &str) -> Result<i64, ReplicaError> {
    let output = replica
        .execute(SELECT_MAX_LEARNED_VERSION, &[SqlValue::from(keyhash)])
        .await?;
    let row = output
        .first_row()
        .ok_or_else(|| ReplicaError::MalformedRow("MAX(version) returned no row".into()))?;

    Ok(column(row, 0)?.as_opt_i64()?.unwrap_or(0))
}

/// Insert an empty row for the slot. Fails (harmlessly) if the row already exists.
pub(crate) async fn create_slot(replica: &mut ReplicaHandle, slot: &Slot, key: &Bytes) -> Result<(), ReplicaError> {
    replica
        .execute(INSERT_EMPTY_SLOT, &slot.params_with(vec![SqlValue::from(key)]))
        .await
        .map(|_| ())
}

/// Promise phase for one replica, run in its own transaction.
pub(crate) async fn promise(
    replica: &mut ReplicaHandle,
    slot: &Slot,
    seq: SequenceNumber,
) -> Result<PromiseReply, ReplicaError> {
    replica.begin().await?;
    let outcome = promise_in_transaction(replica, slot, seq).await;
    end_transaction(replica, outcome, |reply| matches!(reply, PromiseReply::Promised(_))).await
}

async fn promise_in_transaction(
    replica: &mut ReplicaHandle,
    slot: &Slot,
    seq: SequenceNumber,
) -> Result<PromiseReply, ReplicaError> {
    let output = replica.execute(SELECT_SLOT_ROUND, &slot.params()).await?;
    let row = match output.first_row() {
        Some(row) => row,
        None => return Ok(PromiseReply::MissingSlot),
    };
    let promised_seq = column(row, 0)?.as_opt_i64()?;
    let accepted_seq = column(row, 1)?.as_opt_i64()?;
    let value = column(row, 2)?.as_opt_bytes()?;

    if promised_seq.is_none() && accepted_seq.is_none() {
        let learned = value.ok_or_else(|| ReplicaError::MalformedRow("Learned row has no value".into()))?;
        return Ok(PromiseReply::AlreadyLearned(learned));
    }

    let promised_seq = promised_seq.unwrap_or(0);
    if promised_seq >= seq.as_i64() {
        return Ok(PromiseReply::Outbid { promised_seq });
    }

    let updated = replica
        .execute(UPDATE_PROMISE, &slot.params_with(vec![SqlValue::from(seq.as_i64())]))
        .await?;
    if updated.rows_affected != 1 {
        return Err(ReplicaError::MalformedRow(format!(
            "Promise updated {} rows",
            updated.rows_affected
        )));
    }

    Ok(PromiseReply::Promised(Vote {
        accepted_seq: accepted_seq.unwrap_or(0),
        value,
    }))
}

/// Accept phase for one replica. Only succeeds if the replica still holds our promise.
pub(crate) async fn accept(
    replica: &mut ReplicaHandle,
    slot: &Slot,
    seq: SequenceNumber,
    proposal: &Proposal,
) -> Result<bool, ReplicaError> {
    let output = replica
        .execute(
            UPDATE_ACCEPT,
            &slot.params_with(vec![
                SqlValue::from(seq.as_i64()),
                SqlValue::from(proposal.valuehash.as_str()),
                SqlValue::from(&proposal.value),
            ]),
        )
        .await?;

    Ok(output.rows_affected == 1)
}

/// Learn phase for one replica. Drops superseded versions and clears the round fields, but only if
/// this replica both promised and accepted our round. Nothing changes otherwise.
pub(crate) async fn learn(replica: &mut ReplicaHandle, slot: &Slot, seq: SequenceNumber) -> Result<bool, ReplicaError> {
    replica.begin().await?;
    let outcome = learn_in_transaction(replica, slot, seq).await;
    end_transaction(replica, outcome, |learned| *learned).await
}

async fn learn_in_transaction(
    replica: &mut ReplicaHandle,
    slot: &Slot,
    seq: SequenceNumber,
) -> Result<bool, ReplicaError> {
    replica.execute(DELETE_SUPERSEDED, &slot.params()).await?;
    let updated = replica
        .execute(UPDATE_LEARN, &slot.params_with(vec![SqlValue::from(seq.as_i64())]))
        .await?;

    Ok(updated.rows_affected == 1)
}

/// Fetch the learned value of a slot, verifying it against its stored digest.
pub(crate) async fn fetch_learned(
    replica: &mut ReplicaHandle,
    slot: &Slot,
) -> Result<Option<LearnedValue>, ReplicaError> {
    let output = replica.execute(SELECT_LEARNED_VALUE, &slot.params()).await?;
    let row = match output.first_row() {
        Some(row) => row,
        None => return Ok(None),
    };

    let value = column(row, 0)?
        .as_opt_bytes()?
        .ok_or_else(|| ReplicaError::MalformedRow("Learned row has no value".into()))?;
    let stored_hash = column(row, 1)?.as_opt_text()?.map(str::to_string);
    let valuehash = content_digest(&value);
    if stored_hash.as_deref() != Some(valuehash.as_str()) {
        return Err(ReplicaError::MalformedRow(format!(
            "Value digest mismatch. Stored: {:?}, computed: {}",
            stored_hash, valuehash
        )));
    }

    Ok(Some(LearnedValue { value, valuehash }))
}

/// Overwrite the slot on a lagging replica with the learned value, then drop superseded versions.
pub(crate) async fn repair(
    replica: &mut ReplicaHandle,
    slot: &Slot,
    key: &Bytes,
    learned: &LearnedValue,
) -> Result<(), ReplicaError> {
    replica.begin().await?;
    let outcome = repair_in_transaction(replica, slot, key, learned).await;
    end_transaction(replica, outcome, |_| true).await
}

async fn repair_in_transaction(
    replica: &mut ReplicaHandle,
    slot: &Slot,
    key: &Bytes,
    learned: &LearnedValue,
) -> Result<(), ReplicaError> {
    replica.execute(DELETE_SLOT, &slot.params()).await?;
    replica
        .execute(
            INSERT_LEARNED,
            &slot.params_with(vec![
                SqlValue::from(learned.valuehash.as_str()),
                SqlValue::from(key),
                SqlValue::from(&learned.value),
            ]),
        )
        .await?;
    replica.execute(DELETE_SUPERSEDED, &slot.params()).await?;

    Ok(())
}

/// Commit if `should_commit` approves of the outcome, roll back otherwise.
async fn end_transaction<T, F>(
    replica: &mut ReplicaHandle,
    outcome: Result<T, ReplicaError>,
    should_commit: F,
) -> Result<T, ReplicaError>
where
    F: FnOnce(&T) -> bool,
{
    match outcome {
        Ok(value) => {
            if should_commit(&value) {
                if let Err(e) = replica.commit().await {
                    replica.rollback_quietly().await;
                    return Err(e);
                }
            } else {
                replica.rollback_quietly().await;
            }
            Ok(value)
        }
        Err(e) => {
            replica.rollback_quietly().await;
            Err(e)
        }
    }
}

fn column(row: &SqlRow, idx: usize) -> Result<&SqlValue, ReplicaError> {
    row.get(idx)
        .ok_or_else(|| ReplicaError::MalformedRow(format!("Missing column {}", idx)))
}
