//! Membership Reconciler
//!
//! Diffs the platform roster against the protocol's membership and drives the resulting
//! create or commit through one shared round:
//!
//! 1. protocol operation on the latest epoch
//! 2. queue COMMIT to the pre-update members and JOIN to the added ones
//! 3. persist; on failure drop only this round's queued messages
//! 4. flush
//!
//! A roster member without a usable key-package is left out and picked up by a later pass.

use crate::core_sync::errors::{SyncError, SyncResult};
use crate::core_sync::inbound::{commit_digest, FollowUp, InboundProcessor};
use crate::core_sync::messages::{Envelope, OutboundMessage};
use crate::core_sync::session::{SessionState, SyncContext};
use crate::core_sync::traits::Proposal;
use crate::core_sync::types::{
    AccountId, CommitRef, CredentialRecord, GroupId, GroupOrigin, GroupState, PublicKeyPackage,
};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Membership changes needed to move `members` to a roster
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RosterDelta {
    pub added: BTreeSet<AccountId>,
    pub removed: BTreeSet<AccountId>,
}

impl RosterDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// `roster - members` and `members - roster`; `own` is never part of either side
pub fn diff_roster(
    roster: &BTreeSet<AccountId>,
    members: &BTreeSet<AccountId>,
    own: &AccountId,
) -> RosterDelta {
    RosterDelta {
        added: roster.difference(members).filter(|m| *m != own).cloned().collect(),
        removed: members.difference(roster).filter(|m| *m != own).cloned().collect(),
    }
}

pub(crate) struct Reconciler<'a> {
    ctx: &'a SyncContext,
    session: &'a mut SessionState,
}

impl<'a> Reconciler<'a> {
    pub(crate) fn new(ctx: &'a SyncContext, session: &'a mut SessionState) -> Self {
        Self { ctx, session }
    }

    pub(crate) async fn reconcile(&mut self, group_id: &GroupId, roster: &[AccountId]) -> SyncResult<bool> {
        InboundProcessor::new(self.ctx, self.session).drain().await;

        let ctx = self.ctx;
        let own = &ctx.account;
        let roster: BTreeSet<AccountId> = roster.iter().cloned().collect();

        match self.load(group_id).await? {
            Some(state) => {
                let delta = diff_roster(&roster, &state.members, own);
                if delta.is_empty() {
                    return Ok(true);
                }
                self.apply_delta(state, delta).await?;
                Ok(true)
            }
            None => {
                let invitees: BTreeSet<AccountId> = roster.iter().filter(|m| *m != own).cloned().collect();
                let eligible = self.eligible_key_packages(&invitees).await?;

                if !invitees.is_empty() && eligible.len() == invitees.len() {
                    self.create_group(group_id, eligible).await?;
                    return Ok(true);
                }

                // Someone else may be creating it right now
                let known = self.session.known_groups.contains(group_id);
                debug!(
                    %group_id,
                    eligible = eligible.len(),
                    roster = invitees.len(),
                    known,
                    "Group not formable yet"
                );
                Ok(known)
            }
        }
    }

    pub(crate) async fn create(&mut self, group_id: &GroupId, roster: &[AccountId]) -> SyncResult<()> {
        if self.load(group_id).await?.is_some() {
            return Err(SyncError::GroupExists(group_id.clone()));
        }

        let ctx = self.ctx;
        let own = &ctx.account;
        let invitees: BTreeSet<AccountId> = roster.iter().filter(|m| *m != own).cloned().collect();
        let eligible = self.eligible_key_packages(&invitees).await?;

        if let Some(missing) = invitees.iter().find(|m| !eligible.iter().any(|(id, _)| id == *m)) {
            return Err(SyncError::IneligibleMember(missing.to_string()));
        }

        self.create_group(group_id, eligible).await
    }

    pub(crate) async fn add_members(&mut self, group_id: &GroupId, accounts: &[AccountId]) -> SyncResult<()> {
        let state = self.require(group_id).await?;
        let delta = RosterDelta {
            added: accounts
                .iter()
                .filter(|m| !state.members.contains(*m) && **m != self.ctx.account)
                .cloned()
                .collect(),
            removed: BTreeSet::new(),
        };
        self.apply_delta(state, delta).await
    }

    pub(crate) async fn remove_members(&mut self, group_id: &GroupId, accounts: &[AccountId]) -> SyncResult<()> {
        let state = self.require(group_id).await?;
        let delta = RosterDelta {
            added: BTreeSet::new(),
            removed: accounts
                .iter()
                .filter(|m| state.members.contains(*m) && **m != self.ctx.account)
                .cloned()
                .collect(),
        };
        self.apply_delta(state, delta).await
    }

    async fn load(&mut self, group_id: &GroupId) -> SyncResult<Option<GroupState>> {
        let state = self.ctx.store.get(&self.ctx.platform, &self.ctx.account, group_id).await?;
        if state.is_some() {
            self.session.known_groups.insert(group_id.clone());
        }
        Ok(state)
    }

    async fn require(&mut self, group_id: &GroupId) -> SyncResult<GroupState> {
        self.load(group_id).await?.ok_or_else(|| SyncError::GroupNotFound(group_id.clone()))
    }

    /// Key-packages of the accounts that can be added right now
    async fn eligible_key_packages(
        &self,
        accounts: &BTreeSet<AccountId>,
    ) -> SyncResult<Vec<(AccountId, PublicKeyPackage)>> {
        let ctx = self.ctx;
        let now = ctx.clock.now_ms();
        let mut eligible = Vec::with_capacity(accounts.len());

        for account in accounts {
            let Some(key_package) = ctx.keys.get_public_keypackage(&ctx.platform, account).await? else {
                continue;
            };

            let owned_by_account = ctx
                .protocol
                .credential_identity(&key_package)
                .map(|identity| identity == *account)
                .unwrap_or(false);
            if owned_by_account && ctx.protocol.is_credential_valid(&key_package, now, Duration::ZERO) {
                eligible.push((account.clone(), key_package));
            } else {
                debug!(%account, "Key-package not usable, member deferred");
            }
        }
        Ok(eligible)
    }

    /// Add proposals for the eligible part of `delta.added`, then removals
    async fn proposals_for(&self, delta: &RosterDelta) -> SyncResult<Vec<Proposal>> {
        let eligible = self.eligible_key_packages(&delta.added).await?;

        let mut proposals: Vec<Proposal> =
            eligible.into_iter().map(|(_, key_package)| Proposal::Add(key_package)).collect();
        proposals.extend(delta.removed.iter().cloned().map(Proposal::Remove));
        Ok(proposals)
    }

    async fn apply_delta(&mut self, state: GroupState, delta: RosterDelta) -> SyncResult<()> {
        let proposals = self.proposals_for(&delta).await?;
        if proposals.is_empty() {
            debug!(group_id = %state.group_id, "Nothing to commit");
            return Ok(());
        }

        let credential = self.session.credential(&self.ctx.account)?.clone();
        commit_round(self.ctx, self.session, state, &proposals, &credential).await?;
        Ok(())
    }

    /// Commit again what a drain left for this account: a membership change that lost a
    /// concurrent-commit race and/or a leaf update. Does not drain.
    ///
    /// Returns `false` when the group's current state already covers it.
    pub(crate) async fn recommit(&mut self, group_id: &GroupId, follow_up: &FollowUp) -> SyncResult<bool> {
        let ctx = self.ctx;
        let state = self.require(group_id).await?;
        if !state.members.contains(&ctx.account) {
            debug!(%group_id, "No longer a member, nothing to recommit");
            return Ok(false);
        }

        let pending = RosterDelta {
            added: follow_up.lost.added.iter().filter(|m| !state.members.contains(*m)).cloned().collect(),
            removed: follow_up.lost.removed.iter().filter(|m| state.members.contains(*m)).cloned().collect(),
        };
        let mut proposals = self.proposals_for(&pending).await?;
        if follow_up.refresh_leaf {
            proposals.push(Proposal::Update);
        }
        if proposals.is_empty() {
            return Ok(false);
        }

        info!(
            %group_id,
            added = pending.added.len(),
            removed = pending.removed.len(),
            refresh_leaf = follow_up.refresh_leaf,
            "Recommitting"
        );
        let credential = self.session.credential(&ctx.account)?.clone();
        commit_round(ctx, self.session, state, &proposals, &credential).await?;
        Ok(true)
    }

    async fn create_group(
        &mut self,
        group_id: &GroupId,
        invitees: Vec<(AccountId, PublicKeyPackage)>,
    ) -> SyncResult<()> {
        let ctx = self.ctx;
        let credential = self.session.credential(&ctx.account)?.clone();

        let key_packages: Vec<PublicKeyPackage> = invitees.iter().map(|(_, kp)| kp.clone()).collect();
        let created = ctx.protocol.create_group(group_id, &key_packages, &credential)?;
        let epoch = ctx.protocol.state_epoch(&created.state)?;
        let members = ctx.protocol.members(&created.state)?;

        let origin = GroupOrigin { creation_time: ctx.clock.now_ms(), creator: ctx.account.clone() };
        let mut state = GroupState::new(group_id.clone(), origin, members, epoch, created.state);

        let mark = self.session.queue.mark();
        for (invitee, _) in &invitees {
            let envelope = Envelope::join(&ctx.account, &state, &created.invite);
            self.session.queue.enqueue(OutboundMessage::new(&ctx.platform, invitee, &envelope)?);
        }

        if let Err(e) = ctx.store.put(&ctx.platform, &ctx.account, &mut state).await {
            self.session.queue.rollback(mark);
            return Err(e);
        }
        self.session.known_groups.insert(group_id.clone());

        info!(%group_id, epoch, members = state.members.len(), "Created group");
        self.session.queue.flush_all(ctx.relay.as_ref()).await
    }
}

/// One commit round on `state`'s latest epoch: commit, queue, persist, flush
///
/// Returns the persisted state.
pub(crate) async fn commit_round(
    ctx: &SyncContext,
    session: &mut SessionState,
    mut state: GroupState,
    proposals: &[Proposal],
    credential: &CredentialRecord,
) -> SyncResult<GroupState> {
    let base_epoch = state.latest_epoch;
    let base_blob = state.latest_blob().ok_or_else(|| SyncError::StateInconsistency {
        group_id: state.group_id.to_string(),
        reason: format!("latest epoch {} has no state", base_epoch),
    })?;

    let output = ctx.protocol.commit(base_blob, proposals, credential)?;
    let epoch = ctx.protocol.state_epoch(&output.state)?;
    if epoch != base_epoch + 1 {
        return Err(SyncError::StateInconsistency {
            group_id: state.group_id.to_string(),
            reason: format!("commit on epoch {} produced epoch {}", base_epoch, epoch),
        });
    }

    let recipients: Vec<AccountId> = state.others(&ctx.account).cloned().collect();
    let previous_members = state.members.clone();
    state.members = ctx.protocol.members(&output.state)?;
    let head = CommitRef { epoch, digest: commit_digest(&output.commit), author: ctx.account.clone() };
    state.advance(epoch, output.state, Some(head));

    let mark = session.queue.mark();
    let commit_envelope = Envelope::commit(&ctx.account, &state, &output.commit);
    for member in &recipients {
        session.queue.enqueue(OutboundMessage::new(&ctx.platform, member, &commit_envelope)?);
    }
    if let Some(invite) = &output.invite {
        let join_envelope = Envelope::join(&ctx.account, &state, invite);
        for member in state.members.difference(&previous_members) {
            session.queue.enqueue(OutboundMessage::new(&ctx.platform, member, &join_envelope)?);
        }
    }

    if let Err(e) = ctx.store.put(&ctx.platform, &ctx.account, &mut state).await {
        let dropped = session.queue.rollback(mark);
        warn!(group_id = %state.group_id, epoch, dropped, error = %e, "Commit not persisted");
        return Err(e);
    }

    info!(
        group_id = %state.group_id,
        epoch,
        members = state.members.len(),
        proposals = proposals.len(),
        "Committed"
    );

    session.queue.flush_all(ctx.relay.as_ref()).await?;
    Ok(state)
}
