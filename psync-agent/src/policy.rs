//! Policy adapter - binds a [`TrackedPolicy`] and an [`IdentityClient`] to the
//! generic lifecycle driver.

use async_trait::async_trait;
use psync_core::drift::{self, Drift};
use psync_core::{AppliedMarker, Lifecycle, RemoteError};
use tracing::{debug, info};

use crate::clients::{CreatePolicyDetails, IdentityClient, Policy, UpdatePolicyDetails};
use crate::reconciler::Checkpoint;
use crate::record::{ObservedPolicy, TrackedPolicy};

pub const STATE_CREATING: &str = "CREATING";
pub const STATE_ACTIVE: &str = "ACTIVE";
pub const STATE_DELETING: &str = "DELETING";
pub const STATE_DELETED: &str = "DELETED";

/// Changes an update would submit for `record`, given its last refresh.
///
/// Statements are included only when the drift resolver calls the
/// difference real; the description is compared with the remote copy.
pub fn pending_changes(record: &TrackedPolicy) -> (UpdatePolicyDetails, Drift) {
    let desired = record.desired();
    let drift = drift::resolve(
        record.applied(),
        &desired.statements,
        record.observed_etag(),
    );

    let description_changed = record
        .observed()
        .is_none_or(|o| o.description != desired.description);

    let details = UpdatePolicyDetails {
        description: description_changed.then(|| desired.description.clone()),
        statements: drift.is_real().then(|| desired.statements.clone()),
    };
    (details, drift)
}

/// [`Lifecycle`] implementation for identity policies.
pub struct PolicyAdapter<'a, C: ?Sized> {
    client: &'a C,
    record: &'a mut TrackedPolicy,
    res: Option<Policy>,
    checkpoint: Option<Checkpoint<'a, TrackedPolicy>>,
}

impl<'a, C: IdentityClient + ?Sized> PolicyAdapter<'a, C> {
    pub fn new(client: &'a C, record: &'a mut TrackedPolicy) -> Self {
        Self {
            client,
            record,
            res: None,
            checkpoint: None,
        }
    }

    /// Hand the record to `checkpoint` after each create or update.
    pub fn with_checkpoint(mut self, checkpoint: Option<Checkpoint<'a, TrackedPolicy>>) -> Self {
        self.checkpoint = checkpoint;
        self
    }

    /// Remote copy from the last successful call.
    pub fn remote(&self) -> Option<&Policy> {
        self.res.as_ref()
    }

    fn require_id(&self) -> Result<String, RemoteError> {
        self.record
            .id()
            .map(str::to_string)
            .ok_or_else(|| RemoteError::NotFound("<unassigned policy>".to_string()))
    }

    fn save_checkpoint(&self) {
        if let Some(checkpoint) = self.checkpoint {
            checkpoint(&*self.record);
        }
    }
}

#[async_trait]
impl<C: IdentityClient + ?Sized> Lifecycle for PolicyAdapter<'_, C> {
    fn id(&self) -> Option<&str> {
        self.record.id()
    }

    fn state(&self) -> Option<&str> {
        self.res.as_ref().map(|p| p.state.as_str())
    }

    fn created_pending(&self) -> &[&str] {
        &[STATE_CREATING]
    }

    fn created_target(&self) -> &[&str] {
        &[STATE_ACTIVE]
    }

    fn deleted_pending(&self) -> &[&str] {
        &[STATE_DELETING]
    }

    fn deleted_target(&self) -> &[&str] {
        &[STATE_DELETED]
    }

    async fn create(&mut self) -> Result<(), RemoteError> {
        let details = CreatePolicyDetails::from(self.record.desired());
        let policy = self.client.create_policy(details).await?;

        info!(id = %policy.id, name = %policy.name, etag = %policy.etag, "Policy created");
        self.record.bind_id(&policy.id);
        let marker = AppliedMarker::for_write(&self.record.desired().statements, policy.etag.clone());
        self.record.record_write(marker);
        self.save_checkpoint();
        self.res = Some(policy);
        Ok(())
    }

    async fn get(&mut self) -> Result<(), RemoteError> {
        let id = self.require_id()?;
        let policy = self.client.get_policy(&id).await?;
        self.res = Some(policy);
        Ok(())
    }

    async fn update(&mut self) -> Result<(), RemoteError> {
        let id = self.require_id()?;
        let (details, drift) = pending_changes(&*self.record);
        if details.is_empty() {
            debug!(id = %id, "Nothing to update");
            return Ok(());
        }

        if let Drift::Real(reason) = &drift {
            info!(id = %id, reason = %reason, "Submitting statements");
        }
        let policy = self.client.update_policy(&id, details).await?;

        info!(id = %id, etag = %policy.etag, "Policy updated");
        let marker = AppliedMarker::for_write(&self.record.desired().statements, policy.etag.clone());
        self.record.record_write(marker);
        self.save_checkpoint();
        self.res = Some(policy);
        Ok(())
    }

    async fn delete(&mut self) -> Result<(), RemoteError> {
        let id = self.require_id()?;
        self.client.delete_policy(&id).await
    }

    fn materialize(&mut self) {
        if let Some(policy) = &self.res {
            self.record.observe(ObservedPolicy::from(policy));
        }
    }
}
