//! Credential Lifecycle Manager
//!
//! The inbox is drained first with the cached credential, so invites sealed to the current
//! key-package are applied before it is replaced.
//!
//! Rotation is a no-op while the cached key-package stays valid beyond the configured
//! lookahead. Otherwise a fresh credential is generated, every group of the account gets an
//! update commit (one full commit round per group, in order), and only then is the new
//! credential registered and cached. A group that fails stops the cascade and is named in
//! [`SyncError::RotationFailed`]; groups before it keep their update.

use crate::core_sync::errors::{SyncError, SyncResult};
use crate::core_sync::inbound::InboundProcessor;
use crate::core_sync::reconciler::commit_round;
use crate::core_sync::session::{SessionState, SyncContext};
use crate::core_sync::traits::Proposal;
use crate::core_sync::types::{CredentialRecord, GroupId};
use tracing::{debug, info};

pub(crate) struct CredentialManager<'a> {
    ctx: &'a SyncContext,
    session: &'a mut SessionState,
}

impl<'a> CredentialManager<'a> {
    pub(crate) fn new(ctx: &'a SyncContext, session: &'a mut SessionState) -> Self {
        Self { ctx, session }
    }

    /// Returns `true` if a new credential was registered
    pub(crate) async fn rotate(&mut self, force: bool) -> SyncResult<bool> {
        InboundProcessor::new(self.ctx, self.session).drain().await;

        let ctx = self.ctx;
        let now = ctx.clock.now_ms();
        let lookahead = ctx.config.credentials.rotation_lookahead;
        let current = self.session.credential.clone();

        if !force {
            if let Some(current) = &current {
                if ctx.protocol.is_credential_valid(&current.public, now, lookahead) {
                    debug!(account = %ctx.account, "Credential still valid, no rotation");
                    return Ok(false);
                }
            }
        }

        let fresh = ctx
            .protocol
            .generate_credential(&ctx.account, now, ctx.config.credentials.lifetime)?;

        if current.is_some() {
            for group_id in ctx.store.list_groups(&ctx.platform, &ctx.account).await? {
                self.update_group(&group_id, &fresh)
                    .await
                    .map_err(|e| SyncError::RotationFailed { group_id, source: Box::new(e) })?;
            }
        }

        ctx.keys
            .put(&ctx.platform, &ctx.account, &fresh, current.as_ref().map(|c| &c.public))
            .await?;
        self.session.previous_credential = self.session.credential.replace(fresh);

        info!(account = %ctx.account, forced = force, first = current.is_none(), "Credential rotated");
        Ok(true)
    }

    async fn update_group(&mut self, group_id: &GroupId, fresh: &CredentialRecord) -> SyncResult<()> {
        let ctx = self.ctx;
        let Some(state) = ctx.store.get(&ctx.platform, &ctx.account, group_id).await? else {
            return Ok(());
        };
        if !state.members.contains(&ctx.account) {
            debug!(%group_id, "No longer a member, skipping update");
            return Ok(());
        }

        let state = commit_round(ctx, self.session, state, &[Proposal::Update], fresh).await?;
        info!(%group_id, epoch = state.latest_epoch, "Leaf updated");
        Ok(())
    }
}
