//! Inbound Processor
//!
//! Fetches an account's inbox in one request and applies the messages strictly in arrival
//! order, persisting after each one. A message that fails is logged and skipped; the rest of
//! the batch continues and `drain` itself never fails.
//!
//! JOIN handling: an existing group instance with a smaller origin wins and the JOIN is
//! ignored. Otherwise the local state is replaced by the invited instance, except for a
//! re-invite into the same instance at an older epoch.
//!
//! COMMIT handling: applied on top of the latest epoch. A COMMIT built on the epoch before
//! the latest one competes with the commit that produced the latest epoch; the commit with
//! the smaller digest wins everywhere, and a winner is applied onto the retained base epoch.
//!
//! Follow-ups: when a winning commit discards one of this account's own commits, the
//! membership change it carried is committed again on the winning branch once the batch is
//! applied. A group joined through the previous credential gets a leaf update the same way.

use crate::core_sync::errors::{SyncError, SyncResult};
use crate::core_sync::messages::{Envelope, MessageKind};
use crate::core_sync::reconciler::{Reconciler, RosterDelta};
use crate::core_sync::session::{SessionState, SyncContext};
use crate::core_sync::traits::{CommitPayload, InvitePayload};
use crate::core_sync::types::{AccountId, CommitRef, CredentialRecord, GroupId, GroupState};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

/// Outcome of one drain
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub fetched: usize,
    pub applied: usize,
    pub skipped: usize,
    /// Groups where a commit of this account lost a concurrent-commit race
    pub superseded: Vec<GroupId>,
    /// Groups that got a follow-up commit from this account after the batch
    pub recommitted: Vec<GroupId>,
    pub fetch_failed: bool,
}

/// Work left for this account once a batch is applied
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct FollowUp {
    /// Own membership change discarded by a concurrent commit
    pub lost: RosterDelta,
    pub refresh_leaf: bool,
}

impl FollowUp {
    fn merge(&mut self, other: FollowUp) {
        self.lost.added.extend(other.lost.added);
        self.lost.removed.extend(other.lost.removed);
        self.refresh_leaf |= other.refresh_leaf;
    }
}

enum Applied {
    Applied,
    /// Applied, with something to commit afterwards
    FollowUp { group_id: GroupId, follow_up: FollowUp, superseded: bool },
    Ignored(&'static str),
}

/// What our discarded commit changed on `base`, minus what the winner already did
fn lost_delta(
    base: &BTreeSet<AccountId>,
    ours: &BTreeSet<AccountId>,
    winner: &BTreeSet<AccountId>,
) -> RosterDelta {
    RosterDelta {
        added: ours.difference(base).filter(|m| !winner.contains(*m)).cloned().collect(),
        removed: base.difference(ours).filter(|m| winner.contains(*m)).cloned().collect(),
    }
}

/// Hex SHA-256 of a commit payload; orders competing commits
pub fn commit_digest(commit: &CommitPayload) -> String {
    hex::encode(Sha256::digest(&commit.0))
}

pub(crate) struct InboundProcessor<'a> {
    ctx: &'a SyncContext,
    session: &'a mut SessionState,
}

impl<'a> InboundProcessor<'a> {
    pub(crate) fn new(ctx: &'a SyncContext, session: &'a mut SessionState) -> Self {
        Self { ctx, session }
    }

    pub(crate) async fn drain(mut self) -> DrainReport {
        let mut report = DrainReport::default();

        // Fetching deletes; without keys nothing could be applied
        let Some(credential) = self.session.credential.clone() else {
            debug!(account = %self.ctx.account, "No credential yet, inbox left on the relay");
            return report;
        };

        let inbox = match self.ctx.relay.fetch_pending(&self.ctx.platform, &self.ctx.account).await {
            Ok(inbox) => inbox,
            Err(e) => {
                warn!(account = %self.ctx.account, error = %e, "Inbox fetch failed");
                report.fetch_failed = true;
                return report;
            }
        };
        report.fetched = inbox.len();
        if inbox.is_empty() {
            return report;
        }

        debug!(account = %self.ctx.account, count = inbox.len(), "Draining inbox");

        let mut follow_ups: BTreeMap<GroupId, FollowUp> = BTreeMap::new();

        for (index, raw) in inbox.iter().enumerate() {
            match self.apply(raw, &credential).await {
                Ok(Applied::Applied) => report.applied += 1,
                Ok(Applied::FollowUp { group_id, follow_up, superseded }) => {
                    report.applied += 1;
                    if superseded {
                        report.superseded.push(group_id.clone());
                    }
                    follow_ups.entry(group_id).or_default().merge(follow_up);
                }
                Ok(Applied::Ignored(reason)) => {
                    debug!(index, reason, "Ignoring inbound message");
                    report.skipped += 1;
                }
                Err(e) => {
                    warn!(index, error = %e, "Skipping inbound message");
                    report.skipped += 1;
                }
            }
        }

        for (group_id, follow_up) in follow_ups {
            match Reconciler::new(self.ctx, self.session).recommit(&group_id, &follow_up).await {
                Ok(true) => report.recommitted.push(group_id),
                Ok(false) => {}
                Err(e) => warn!(%group_id, error = %e, "Follow-up commit failed"),
            }
        }

        info!(
            account = %self.ctx.account,
            fetched = report.fetched,
            applied = report.applied,
            skipped = report.skipped,
            recommitted = report.recommitted.len(),
            "Inbox drained"
        );
        report
    }

    async fn apply(&mut self, raw: &str, credential: &CredentialRecord) -> SyncResult<Applied> {
        let envelope = Envelope::from_wire(raw)?;
        match envelope.kind {
            MessageKind::Join => self.apply_join(envelope, credential).await,
            MessageKind::Commit => self.apply_commit(envelope).await,
        }
    }

    async fn apply_join(
        &mut self,
        envelope: Envelope,
        credential: &CredentialRecord,
    ) -> SyncResult<Applied> {
        let ctx = self.ctx;
        let existing = ctx.store.get(&ctx.platform, &ctx.account, &envelope.group_id).await?;

        if let Some(existing) = &existing {
            if existing.origin() < envelope.origin() {
                return Ok(Applied::Ignored("existing group instance is older"));
            }
        }

        let invite = InvitePayload(envelope.protocol_message.clone());
        let (blob, refresh_leaf) = match ctx.protocol.join_from_invite(&invite, credential) {
            Ok(blob) => (blob, false),
            // issued before our last rotation reached the inviter
            Err(e) => match &self.session.previous_credential {
                Some(previous) => (ctx.protocol.join_from_invite(&invite, previous).map_err(|_| e)?, true),
                None => return Err(e.into()),
            },
        };
        let epoch = ctx.protocol.state_epoch(&blob)?;

        if let Some(existing) = &existing {
            if existing.origin() == envelope.origin() && epoch < existing.latest_epoch {
                return Ok(Applied::Ignored("stale re-invite"));
            }
        }

        let members = ctx.protocol.members(&blob)?;
        let mut state = GroupState::new(envelope.group_id.clone(), envelope.origin(), members, epoch, blob);
        if let Some(existing) = &existing {
            state.update_counter = existing.update_counter;
            if existing.origin() == envelope.origin() {
                state.keep_history_of(existing);
            }
        }

        ctx.store.put(&ctx.platform, &ctx.account, &mut state).await?;
        self.session.known_groups.insert(state.group_id.clone());

        info!(
            group_id = %state.group_id,
            epoch,
            from = %envelope.sender,
            replaced = existing.is_some(),
            refresh_leaf,
            "Joined group"
        );
        if refresh_leaf {
            let follow_up = FollowUp { refresh_leaf, ..FollowUp::default() };
            return Ok(Applied::FollowUp { group_id: state.group_id, follow_up, superseded: false });
        }
        Ok(Applied::Applied)
    }

    async fn apply_commit(&mut self, envelope: Envelope) -> SyncResult<Applied> {
        let ctx = self.ctx;
        let Some(mut state) = ctx.store.get(&ctx.platform, &ctx.account, &envelope.group_id).await? else {
            return Ok(Applied::Ignored("commit for unknown group"));
        };
        self.session.known_groups.insert(state.group_id.clone());

        if state.origin() != envelope.origin() {
            return Ok(Applied::Ignored("commit for another group instance"));
        }

        let commit = CommitPayload(envelope.protocol_message.clone());
        let base = ctx.protocol.commit_epoch(&commit)?;
        let digest = commit_digest(&commit);
        let mut superseded = false;

        if base != state.latest_epoch {
            if base + 1 != state.latest_epoch {
                return Ok(Applied::Ignored(if base < state.latest_epoch {
                    "stale commit"
                } else {
                    "commit from a future epoch"
                }));
            }
            let Some(head) = &state.head else {
                return Ok(Applied::Ignored("no commit to arbitrate against"));
            };
            if head.digest == digest {
                return Ok(Applied::Ignored("duplicate commit"));
            }
            if digest > head.digest {
                return Ok(Applied::Ignored("losing concurrent commit"));
            }
            superseded = head.author == ctx.account;
            info!(
                group_id = %state.group_id,
                epoch = state.latest_epoch,
                winner = %envelope.sender,
                "Concurrent commit wins, rolling back one epoch"
            );
        }

        let base_blob = state.blob_for(base).ok_or_else(|| SyncError::StateInconsistency {
            group_id: state.group_id.to_string(),
            reason: format!("base epoch {} is no longer retained", base),
        })?;
        let next = ctx.protocol.apply_commit(base_blob, &commit)?;
        let epoch = ctx.protocol.state_epoch(&next)?;
        if epoch != base + 1 {
            return Err(SyncError::StateInconsistency {
                group_id: state.group_id.to_string(),
                reason: format!("commit on epoch {} produced epoch {}", base, epoch),
            });
        }

        let winner_members = ctx.protocol.members(&next)?;
        let follow_up = if superseded {
            let base_members = ctx.protocol.members(base_blob)?;
            let lost = lost_delta(&base_members, &state.members, &winner_members);
            // an own commit without membership changes was a leaf update
            let refresh_leaf = base_members == state.members;
            Some(FollowUp { lost, refresh_leaf })
        } else {
            None
        };

        state.members = winner_members;
        state.advance(epoch, next, Some(CommitRef { epoch, digest, author: envelope.sender.clone() }));
        ctx.store.put(&ctx.platform, &ctx.account, &mut state).await?;

        debug!(group_id = %state.group_id, epoch, from = %envelope.sender, "Applied commit");

        Ok(match follow_up {
            Some(follow_up) => Applied::FollowUp { group_id: state.group_id, follow_up, superseded: true },
            None => Applied::Applied,
        })
    }
}
