//! Invite creation and redemption
//!
//! Both require connectivity: the code must exist remotely before it can
//! be shared, and redemption has to read the remote use counter.

use chrono::Utc;

use super::{SyncManager, PRIMARY};
use crate::error::{Error, InviteError, Result};
use crate::models::{normalize_code, Invite, Membership, OutboxOperation, Record, Role};
use crate::store::Collection;

impl SyncManager {
    /// Create a share invite for a record the subject has locally.
    pub async fn create_invite(&self, record_id: &str) -> Result<Invite> {
        let subject_id = self.current_subject().ok_or(Error::NotStarted)?;
        self.require_online()?;

        let record: Option<Record> = self.store().get(PRIMARY, record_id).await?;
        if record.is_none() {
            return Err(Error::NotFound(format!("record {record_id}")));
        }

        let options = &self.inner.options;
        let invite = Invite::generate(
            record_id,
            subject_id,
            options.invite_ttl,
            options.invite_max_uses,
        );
        self.inner.remote.create_invite(&invite).await?;

        tracing::info!(
            record_id,
            expires_at = %invite.expires_at,
            max_uses = invite.max_uses,
            "Created invite"
        );
        Ok(invite)
    }

    /// Redeem `code` for the current subject and return the shared record id.
    ///
    /// Membership is granted before the use counter is bumped. If the bump
    /// fails it is queued instead of failing the redemption.
    pub async fn redeem_invite(&self, code: &str) -> Result<String> {
        let code = normalize_code(code)?;
        let subject_id = self.current_subject().ok_or(Error::NotStarted)?;
        self.require_online()?;

        let invite = self
            .inner
            .remote
            .find_invite(&code)
            .await?
            .ok_or(InviteError::NotFound)?;
        invite.check_redeemable(Utc::now())?;

        let membership = Membership::new(&invite.record_id, &subject_id, Role::Editor);
        self.inner.remote.add_membership(&membership).await?;
        self.store()
            .put(Collection::Memberships, &membership, Some(&membership.key()))
            .await?;

        if let Err(error) = self.inner.remote.increment_invite_uses(&code).await {
            tracing::warn!("Failed to record invite use, queueing retry: {error}");
            self.records()
                .enqueue_op(&invite.record_id, OutboxOperation::InviteRedeem { code })
                .await?;
        }

        tracing::info!(record_id = %invite.record_id, "Redeemed invite");
        self.pull_remote().await;
        Ok(invite.record_id)
    }
}
