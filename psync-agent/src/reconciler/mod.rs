//! Reconcilers for managed resource types.
//!
//! A reconciler compares desired state (from the manifest) with the tracked
//! record and the remote resource, and drives the lifecycle to converge.

pub mod policy;

use std::error::Error;
use std::fmt;

use async_trait::async_trait;
use psync_core::LifecycleError;

pub use policy::{Action, PolicyReconciler};

/// Result of one reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// No record existed; the resource was created.
    Created,
    /// The resource was updated in place.
    Updated,
    /// A create-time field changed; the resource was deleted and recreated.
    Replaced,
    /// The resource had disappeared remotely and was created again.
    Recreated,
    /// Nothing was written.
    Unchanged,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Outcome::Created => "created",
            Outcome::Updated => "updated",
            Outcome::Replaced => "replaced",
            Outcome::Recreated => "recreated",
            Outcome::Unchanged => "unchanged",
        };
        f.write_str(s)
    }
}

/// Receives the record after every successful remote write, while the
/// reconciliation is still running. A caller that persists it can resume
/// from the bound id if the rest of the pass never completes.
pub type Checkpoint<'a, R> = &'a (dyn Fn(&R) + Send + Sync);

/// Converged record plus what it took to get there.
#[derive(Debug)]
pub struct Reconciled<R> {
    pub record: R,
    pub outcome: Outcome,
}

/// Failed reconciliation.
///
/// Carries the record as far as it got (e.g. with its id bound after a create
/// that then timed out) so the next pass can resume from it. `None` means the
/// record should be dropped.
#[derive(Debug)]
pub struct ReconcileError<R> {
    pub record: Option<R>,
    pub source: LifecycleError,
}

impl<R> ReconcileError<R> {
    pub fn new(record: Option<R>, source: LifecycleError) -> Self {
        Self { record, source }
    }
}

impl<R> fmt::Display for ReconcileError<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

impl<R: fmt::Debug> Error for ReconcileError<R> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.source)
    }
}

/// Trait for resource reconcilers.
#[async_trait]
pub trait Reconciler: Send + Sync {
    /// Desired state from the manifest.
    type Spec: Sync;
    /// Local record of the managed resource.
    type Record: Send;

    /// Reconcile the resource - compare desired vs actual state and take action.
    async fn reconcile(
        &self,
        spec: &Self::Spec,
        record: Option<Self::Record>,
    ) -> Result<Reconciled<Self::Record>, ReconcileError<Self::Record>>;

    /// Handle resource deletion (finalization).
    async fn finalize(&self, record: Self::Record) -> Result<(), ReconcileError<Self::Record>>;
}
