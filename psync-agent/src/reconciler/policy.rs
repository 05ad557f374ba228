//! Policy reconciler - converges identity policies with the remote control plane.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use psync_core::{Drift, Driver, LifecycleError};
use tracing::{info, warn};

use super::{Checkpoint, Outcome, ReconcileError, Reconciled, Reconciler};
use crate::clients::IdentityClient;
use crate::policy::{PolicyAdapter, pending_changes};
use crate::record::{PolicySpec, TrackedPolicy};

/// What a reconciliation would do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Create,
    Update { description: bool, drift: Drift },
    Replace,
    Delete,
    Noop,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Create => f.write_str("create"),
            Action::Update { description, drift } => {
                let mut parts = Vec::new();
                if *description {
                    parts.push("description changed".to_string());
                }
                if let Drift::Real(reason) = drift {
                    parts.push(reason.to_string());
                }
                write!(f, "update ({})", parts.join(", "))
            }
            Action::Replace => f.write_str("replace"),
            Action::Delete => f.write_str("delete"),
            Action::Noop => f.write_str("no changes"),
        }
    }
}

/// Policy reconciler that drives an [`IdentityClient`] through the lifecycle
/// driver.
pub struct PolicyReconciler<C: ?Sized> {
    client: Arc<C>,
    driver: Driver,
}

impl<C: IdentityClient + ?Sized> PolicyReconciler<C> {
    pub fn new(client: Arc<C>, driver: Driver) -> Self {
        Self { client, driver }
    }

    /// Action for a freshly refreshed `record` and the desired `spec`.
    pub fn plan_for(record: &TrackedPolicy, spec: &PolicySpec) -> Action {
        if record.desired().requires_replacement(spec) {
            return Action::Replace;
        }

        let mut candidate = record.clone();
        candidate.set_desired(spec.clone());
        let (details, drift) = pending_changes(&candidate);
        if details.is_empty() {
            Action::Noop
        } else {
            Action::Update {
                description: details.description.is_some(),
                drift,
            }
        }
    }

    /// Work out the action for one resource without writing anything.
    ///
    /// Refreshes a copy of `record`; the caller's record is left untouched.
    pub async fn plan(
        &self,
        spec: Option<&PolicySpec>,
        record: Option<&TrackedPolicy>,
    ) -> Result<Action, LifecycleError> {
        let Some(record) = record.filter(|r| r.id().is_some()) else {
            return Ok(if spec.is_some() { Action::Create } else { Action::Noop });
        };
        let Some(spec) = spec else {
            return Ok(Action::Delete);
        };

        let mut refreshed = record.clone();
        match self.refresh(&mut refreshed).await {
            Ok(()) => Ok(Self::plan_for(&refreshed, spec)),
            Err(e) if e.is_not_found() => Ok(Action::Create),
            Err(e) => Err(e),
        }
    }

    /// Adopt an existing remote policy. The desired spec is seeded from the
    /// remote copy.
    pub async fn import(&self, id: &str) -> Result<TrackedPolicy, LifecycleError> {
        let mut record = TrackedPolicy::imported(id);
        let spec = {
            let mut adapter = PolicyAdapter::new(&*self.client, &mut record);
            self.driver.read(&mut adapter).await?;
            adapter.remote().map(PolicySpec::from)
        };
        if let Some(spec) = spec {
            record.set_desired(spec);
        }
        info!(id = %id, name = %record.desired().name, "Imported policy");
        Ok(record)
    }

    async fn refresh(&self, record: &mut TrackedPolicy) -> Result<(), LifecycleError> {
        self.driver
            .read(&mut PolicyAdapter::new(&*self.client, record))
            .await
    }

    async fn create(
        &self,
        spec: &PolicySpec,
        checkpoint: Option<Checkpoint<'_, TrackedPolicy>>,
    ) -> Result<TrackedPolicy, ReconcileError<TrackedPolicy>> {
        info!(name = %spec.name, "Creating policy");
        let mut record = TrackedPolicy::new(spec.clone());
        let mut adapter = PolicyAdapter::new(&*self.client, &mut record).with_checkpoint(checkpoint);
        let result = self.driver.create(&mut adapter).await;
        match result {
            Ok(()) => Ok(record),
            Err(e) => Err(ReconcileError::new(Some(record), e)),
        }
    }

    async fn update(
        &self,
        spec: &PolicySpec,
        mut record: TrackedPolicy,
        checkpoint: Option<Checkpoint<'_, TrackedPolicy>>,
    ) -> Result<TrackedPolicy, ReconcileError<TrackedPolicy>> {
        record.set_desired(spec.clone());
        let mut adapter = PolicyAdapter::new(&*self.client, &mut record).with_checkpoint(checkpoint);
        let result = self.driver.update(&mut adapter).await;
        match result {
            Ok(()) => Ok(record),
            Err(e) => Err(ReconcileError::new(Some(record), e)),
        }
    }

    /// [`Reconciler::reconcile`], handing every written record to
    /// `checkpoint` as soon as the remote accepted the write.
    pub async fn reconcile_with(
        &self,
        spec: &PolicySpec,
        record: Option<TrackedPolicy>,
        checkpoint: Option<Checkpoint<'_, TrackedPolicy>>,
    ) -> Result<Reconciled<TrackedPolicy>, ReconcileError<TrackedPolicy>> {
        let Some(mut record) = record.filter(|r| r.id().is_some()) else {
            let record = self.create(spec, checkpoint).await?;
            return Ok(Reconciled {
                record,
                outcome: Outcome::Created,
            });
        };

        if let Err(e) = self.refresh(&mut record).await {
            if !e.is_not_found() {
                return Err(ReconcileError::new(Some(record), e));
            }
            warn!(
                id = record.id().unwrap_or_default(),
                name = %spec.name,
                "Policy no longer exists remotely, recreating"
            );
            let record = self.create(spec, checkpoint).await?;
            return Ok(Reconciled {
                record,
                outcome: Outcome::Recreated,
            });
        }

        let action = Self::plan_for(&record, spec);
        match action {
            Action::Replace => {
                info!(
                    id = record.id().unwrap_or_default(),
                    name = %spec.name,
                    "Create-time field changed, replacing policy"
                );
                self.finalize(record).await?;
                let record = self.create(spec, checkpoint).await?;
                Ok(Reconciled {
                    record,
                    outcome: Outcome::Replaced,
                })
            }
            Action::Update { .. } => {
                info!(id = record.id().unwrap_or_default(), "Policy needs {}", action);
                let record = self.update(spec, record, checkpoint).await?;
                Ok(Reconciled {
                    record,
                    outcome: Outcome::Updated,
                })
            }
            Action::Create | Action::Delete | Action::Noop => {
                record.set_desired(spec.clone());
                Ok(Reconciled {
                    record,
                    outcome: Outcome::Unchanged,
                })
            }
        }
    }
}

#[async_trait]
impl<C: IdentityClient + ?Sized> Reconciler for PolicyReconciler<C> {
    type Spec = PolicySpec;
    type Record = TrackedPolicy;

    async fn reconcile(
        &self,
        spec: &Self::Spec,
        record: Option<Self::Record>,
    ) -> Result<Reconciled<Self::Record>, ReconcileError<Self::Record>> {
        self.reconcile_with(spec, record, None).await
    }

    async fn finalize(&self, mut record: Self::Record) -> Result<(), ReconcileError<Self::Record>> {
        let Some(id) = record.id().map(str::to_string) else {
            return Ok(());
        };
        info!(id = %id, "Finalizing (deleting) policy");

        let result = self
            .driver
            .delete(&mut PolicyAdapter::new(&*self.client, &mut record))
            .await;
        result.map_err(|e| ReconcileError::new(Some(record), e))
    }
}
