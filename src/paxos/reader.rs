use crate::paxos::content_digest;
use crate::paxos::outcomes::{LookupError, LookupOutput};
use crate::paxos::row::{self, LearnedValue, Slot};
use crate::quorum::{ReplicaHandle, ReplicaSession};
use bytes::Bytes;
use futures::future;

/// Reader finds the latest learned version of a key, and brings lagging replicas up to date
/// with it (read repair) before deciding whether a quorum agrees.
pub(crate) struct Reader<'s> {
    logger: slog::Logger,
    session: &'s mut ReplicaSession,
    quorum: usize,
}

impl<'s> Reader<'s> {
    pub(crate) fn new(logger: &slog::Logger, session: &'s mut ReplicaSession, quorum: usize) -> Self {
        Reader {
            logger: logger.clone(),
            session,
            quorum,
        }
    }

    pub(crate) async fn lookup(self, key: &Bytes) -> Result<LookupOutput, LookupError> {
        let keyhash = content_digest(key);
        let quorum = self.quorum;
        let logger = self.logger;
        let replicas = self.session.replicas_mut();

        // Versions reported by each replica, by position in the session. None if the replica
        // didn't answer.
        let reported: Vec<Option<i64>> = future::join_all(replicas.iter_mut().map(|replica| {
            let keyhash = keyhash.as_str();
            async move {
                match row::max_learned_version(replica, keyhash).await {
                    Ok(version) => Some(version),
                    Err(e) => {
                        slog::warn!(replica.logger(), "Skipping replica for version lookup: {}", e);
                        None
                    }
                }
            }
        }))
        .await;

        let responded = reported.iter().filter(|v| v.is_some()).count();
        let target = reported.iter().filter_map(|v| *v).max().unwrap_or(0);
        if target == 0 {
            // Not finding a version on less than a quorum doesn't prove there is none.
            if responded < quorum {
                slog::info!(logger, "Only {}/{} replicas answered", responded, quorum);
                return Err(LookupError::NoQuorum {
                    obtained: responded,
                    required: quorum,
                });
            }
            return Err(LookupError::NotFound);
        }

        let slot = Slot::new(keyhash, target);
        let mut in_sync: Vec<bool> = reported.iter().map(|version| *version == Some(target)).collect();

        let learned = fetch_from_in_sync(&logger, replicas, &mut in_sync, &slot).await;
        let learned = match learned {
            Some(learned) => learned,
            None => {
                // Every replica that reported the target failed to produce it.
                slog::warn!(logger, "No replica could serve version {}", target);
                return Err(LookupError::NoQuorum {
                    obtained: 0,
                    required: quorum,
                });
            }
        };

        let lagging = in_sync.iter().filter(|synced| !**synced).count();
        slog::debug!(logger, "Repairing {} lagging replicas", lagging);
        future::join_all(
            replicas
                .iter_mut()
                .zip(in_sync.iter_mut())
                .filter(|(_, synced)| !**synced)
                .map(|(replica, synced)| {
                    let (slot, learned) = (&slot, &learned);
                    async move {
                        match row::repair(replica, slot, key, learned).await {
                            Ok(()) => {
                                slog::info!(replica.logger(), "Repaired to version {}", slot.version);
                                *synced = true;
                            }
                            Err(e) => slog::warn!(replica.logger(), "Read repair failed: {}", e),
                        }
                    }
                }),
        )
        .await;

        let num_in_sync = in_sync.iter().filter(|synced| **synced).count();
        slog::info!(logger, "{}/{} replicas in sync at version {}", num_in_sync, quorum, target);
        if num_in_sync < quorum {
            return Err(LookupError::NoQuorum {
                obtained: num_in_sync,
                required: quorum,
            });
        }

        Ok(LookupOutput {
            version: target,
            value: learned.value,
            replicas: num_in_sync,
        })
    }
}

/// Try in-sync replicas one at a time until one serves a value whose digest checks out. Replicas
/// that fail are moved out of sync so read repair overwrites them.
async fn fetch_from_in_sync(
    logger: &slog::Logger,
    replicas: &mut [ReplicaHandle],
    in_sync: &mut [bool],
    slot: &Slot,
) -> Option<LearnedValue> {
    for (replica, synced) in replicas.iter_mut().zip(in_sync.iter_mut()) {
        if !*synced {
            continue;
        }
        match row::fetch_learned(replica, slot).await {
            Ok(Some(learned)) => return Some(learned),
            Ok(None) => {
                slog::warn!(replica.logger(), "Learned row vanished since version lookup");
                *synced = false;
            }
            Err(e) => {
                slog::warn!(replica.logger(), "Can't serve learned value: {}", e);
                *synced = false;
            }
        }
    }

    slog::debug!(logger, "Exhausted in-sync replicas for version {}", slot.version);
    None
}
