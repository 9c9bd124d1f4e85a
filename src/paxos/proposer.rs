use crate::paxos::content_digest;
use crate::paxos::outcomes::{ProposeError, ProposeInput, ProposeOutput};
use crate::paxos::row::{self, PromiseReply, Proposal, Slot, Vote};
use crate::paxos::sequence::SequenceNumber;
use crate::quorum::ReplicaSession;
use bytes::Bytes;
use futures::future;
use std::collections::HashSet;

/// Proposer drives one Basic Paxos round (Promise, Accept, Learn) for a single slot over the
/// replicas of one session.
///
/// Per-replica failures never fail the round by themselves. A replica that errors simply doesn't
/// count towards the quorum of that phase, and only the quorum checks decide the outcome.
pub(crate) struct Proposer<'s> {
    logger: slog::Logger,
    session: &'s mut ReplicaSession,
    quorum: usize,
    seq: SequenceNumber,
}

impl<'s> Proposer<'s> {
    pub(crate) fn new(
        logger: &slog::Logger,
        session: &'s mut ReplicaSession,
        quorum: usize,
        seq: SequenceNumber,
    ) -> Self {
        Proposer {
            logger: logger.new(slog::o!("Seq" => seq.as_i64())),
            session,
            quorum,
            seq,
        }
    }

    pub(crate) async fn propose(mut self, input: ProposeInput) -> Result<ProposeOutput, ProposeError> {
        let slot = Slot::new(content_digest(&input.key), input.version);

        self.check_version(&slot).await?;

        let votes = self.promise_phase(&slot, &input.key).await?;

        // > If the proposer receives a response to its prepare requests (numbered n) from a
        // > majority of acceptors, then it sends an accept request to each of those acceptors for a
        // > proposal numbered n with a value v, where v is the value of the highest-numbered
        // > proposal among the responses, or is any value if the responses reported no proposals.
        let proposal = select_proposal(votes.iter().map(|(_, vote)| vote), input.value);
        if proposal.accepted_seq != 0 {
            slog::info!(
                self.logger,
                "Adopting value accepted in earlier round {}",
                proposal.accepted_seq
            );
        }

        let promised: HashSet<usize> = votes.into_iter().map(|(idx, _)| idx).collect();
        self.accept_phase(&slot, &promised, &proposal).await?;

        let nodes = self.learn_phase(&slot).await?;

        if proposal.accepted_seq == 0 {
            Ok(ProposeOutput::Chosen {
                version: slot.version,
                nodes,
            })
        } else {
            Ok(ProposeOutput::Adopted {
                version: slot.version,
                value: proposal.value,
                nodes,
            })
        }
    }

    /// The requested version must directly follow the latest learned version. Replicas that fail
    /// to answer are skipped.
    async fn check_version(&mut self, slot: &Slot) -> Result<(), ProposeError> {
        let keyhash = slot.keyhash.as_str();
        let reported = future::join_all(self.session.replicas_mut().iter_mut().map(|replica| async move {
            let result = row::max_learned_version(replica, keyhash).await;
            if let Err(e) = &result {
                slog::warn!(replica.logger(), "Skipping replica for version check: {}", e);
            }
            result
        }))
        .await;

        let existing_max = reported.into_iter().filter_map(Result::ok).max().unwrap_or(0);
        if slot.version != existing_max + 1 {
            slog::info!(
                self.logger,
                "Rejecting version {}, latest learned version is {}",
                slot.version,
                existing_max
            );
            return Err(ProposeError::VersionConflict { existing_max });
        }

        Ok(())
    }

    /// Returns the votes of every replica that promised, keyed by position in the session.
    async fn promise_phase(&mut self, slot: &Slot, key: &Bytes) -> Result<Vec<(usize, Vote)>, ProposeError> {
        let seq = self.seq;
        let replies = future::join_all(self.session.replicas_mut().iter_mut().enumerate().map(
            |(idx, replica)| async move {
                if let Err(e) = row::create_slot(replica, slot, key).await {
                    // Usually the row already exists.
                    slog::debug!(replica.logger(), "Slot not created: {}", e);
                }

                let reply = row::promise(replica, slot, seq).await;
                match &reply {
                    Ok(PromiseReply::Promised(vote)) => {
                        slog::debug!(replica.logger(), "Promised. Prior accepted round: {}", vote.accepted_seq)
                    }
                    Ok(PromiseReply::Outbid { promised_seq }) => {
                        slog::info!(replica.logger(), "Already promised newer round {}", promised_seq)
                    }
                    Ok(PromiseReply::AlreadyLearned(_)) => slog::info!(replica.logger(), "Slot already learned"),
                    Ok(PromiseReply::MissingSlot) => slog::warn!(replica.logger(), "Slot row is missing"),
                    Err(e) => slog::warn!(replica.logger(), "Promise failed: {}", e),
                }
                (idx, reply)
            },
        ))
        .await;

        let mut votes = Vec::with_capacity(replies.len());
        for (idx, reply) in replies {
            match reply {
                Ok(PromiseReply::Promised(vote)) => votes.push((idx, vote)),
                Ok(PromiseReply::AlreadyLearned(value)) => {
                    return Err(ProposeError::AlreadyLearned {
                        version: slot.version,
                        value,
                    });
                }
                Ok(PromiseReply::Outbid { .. }) | Ok(PromiseReply::MissingSlot) | Err(_) => { /* no vote */ }
            }
        }

        slog::info!(self.logger, "Received {}/{} promises", votes.len(), self.quorum);
        if votes.len() < self.quorum {
            return Err(ProposeError::NoPromiseQuorum {
                obtained: votes.len(),
                required: self.quorum,
            });
        }

        Ok(votes)
    }

    async fn accept_phase(
        &mut self,
        slot: &Slot,
        promised: &HashSet<usize>,
        proposal: &Proposal,
    ) -> Result<usize, ProposeError> {
        let seq = self.seq;
        let acks = future::join_all(
            self.session
                .replicas_mut()
                .iter_mut()
                .enumerate()
                .filter(|(idx, _)| promised.contains(idx))
                .map(|(_, replica)| async move {
                    match row::accept(replica, slot, seq, proposal).await {
                        Ok(true) => true,
                        Ok(false) => {
                            slog::info!(replica.logger(), "Not accepted. Promised a newer round since.");
                            false
                        }
                        Err(e) => {
                            slog::warn!(replica.logger(), "Accept failed: {}", e);
                            false
                        }
                    }
                }),
        )
        .await;

        let accepted = acks.into_iter().filter(|accepted| *accepted).count();
        slog::info!(self.logger, "Received {}/{} accepts", accepted, self.quorum);
        if accepted < self.quorum {
            return Err(ProposeError::NoAcceptQuorum {
                obtained: accepted,
                required: self.quorum,
            });
        }

        Ok(accepted)
    }

    /// Every replica is asked to learn. Only the ones that promised and accepted this very round
    /// will.
    async fn learn_phase(&mut self, slot: &Slot) -> Result<usize, ProposeError> {
        let seq = self.seq;
        let acks = future::join_all(self.session.replicas_mut().iter_mut().map(|replica| async move {
            match row::learn(replica, slot, seq).await {
                Ok(learned) => learned,
                Err(e) => {
                    slog::warn!(replica.logger(), "Learn failed: {}", e);
                    false
                }
            }
        }))
        .await;

        let learned = acks.into_iter().filter(|learned| *learned).count();
        slog::info!(self.logger, "Learned on {}/{} replicas", learned, self.quorum);
        if learned < self.quorum {
            return Err(ProposeError::NoLearnQuorum {
                obtained: learned,
                required: self.quorum,
            });
        }

        Ok(learned)
    }
}

/// Pick the value of the highest-numbered accepted proposal among the votes, or our own value if
/// no replica accepted anything yet.
fn select_proposal<'v, I>(votes: I, own_value: Bytes) -> Proposal
where
    I: IntoIterator<Item = &'v Vote>,
{
    let mut highest: Option<(i64, &Bytes)> = None;
    for vote in votes {
        if let Some(value) = &vote.value {
            let is_higher = match highest {
                None => vote.accepted_seq > 0,
                Some((highest_seq, _)) => vote.accepted_seq > highest_seq,
            };
            if is_higher {
                highest = Some((vote.accepted_seq, value));
            }
        }
    }

    match highest {
        Some((accepted_seq, value)) => Proposal::new(accepted_seq, value.clone()),
        None => Proposal::new(0, own_value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vote(accepted_seq: i64, value: Option<&'static [u8]>) -> Vote {
        Vote {
            accepted_seq,
            value: value.map(Bytes::from_static),
        }
    }

    #[test]
    fn own_value_when_nothing_accepted() {
        let votes = vec![vote(0, None), vote(0, None), vote(0, None)];
        let proposal = select_proposal(&votes, Bytes::from_static(b"mine"));
        assert_eq!(proposal, Proposal::new(0, Bytes::from_static(b"mine")));
        assert_eq!(proposal.valuehash, content_digest(b"mine"));

        let proposal = select_proposal(&Vec::new(), Bytes::from_static(b"mine"));
        assert_eq!(proposal.accepted_seq, 0);
    }

    #[test]
    fn highest_accepted_round_wins() {
        let votes = vec![
            vote(0, None),
            vote(10, Some(b"older")),
            vote(30, Some(b"newest")),
            vote(20, Some(b"newer")),
        ];
        let proposal = select_proposal(&votes, Bytes::from_static(b"mine"));
        assert_eq!(proposal, Proposal::new(30, Bytes::from_static(b"newest")));
    }

    #[test]
    fn votes_without_value_are_ignored() {
        // A round number without a value can't be adopted.
        let votes = vec![vote(50, None), vote(10, Some(b"older"))];
        let proposal = select_proposal(&votes, Bytes::from_static(b"mine"));
        assert_eq!(proposal, Proposal::new(10, Bytes::from_static(b"older")));
    }
}
