//! Sync pass - prunes policies that were removed from the manifest and
//! reconciles every declared one.

use std::collections::{BTreeMap, BTreeSet};
use std::pin::pin;

use futures::stream::{self, StreamExt};
use psync_core::LifecycleError;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::clients::IdentityClient;
use crate::manifest::Manifest;
use crate::reconciler::{
    Action, Checkpoint, Outcome, PolicyReconciler, ReconcileError, Reconciled, Reconciler,
};
use crate::record::TrackedPolicy;
use crate::store::{StateStore, SyncState};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Key '{0}' is already tracked")]
    KeyExists(String),

    #[error("Policy {id} is already tracked as '{key}'")]
    AlreadyTracked { id: String, key: String },

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

/// Result of [`Syncer::apply`].
#[derive(Debug, Default)]
pub struct SyncReport {
    pub outcomes: BTreeMap<String, Outcome>,
    pub deleted: Vec<String>,
    /// New key -> old key, for policies whose manifest key changed.
    pub moved: BTreeMap<String, String>,
    pub failures: BTreeMap<String, String>,
}

impl SyncReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Number of policies that saw a remote write.
    pub fn changed(&self) -> usize {
        self.outcomes
            .values()
            .filter(|o| **o != Outcome::Unchanged)
            .count()
            + self.deleted.len()
    }
}

/// Result of [`Syncer::plan`].
#[derive(Debug, Default)]
pub struct SyncPlan {
    pub actions: BTreeMap<String, Action>,
    /// New key -> old key, for policies whose manifest key changed.
    pub moved: BTreeMap<String, String>,
    pub failures: BTreeMap<String, String>,
}

impl SyncPlan {
    pub fn has_changes(&self) -> bool {
        !self.moved.is_empty() || self.actions.values().any(|a| *a != Action::Noop)
    }
}

/// Runs reconciliation passes over a manifest and the tracked state.
///
/// Independent policies are reconciled concurrently, at most `concurrency`
/// at a time. A single policy is only ever handled by one task per pass.
pub struct Syncer<C: ?Sized> {
    reconciler: PolicyReconciler<C>,
    concurrency: usize,
    store: Option<StateStore>,
}

impl<C: IdentityClient + ?Sized> Syncer<C> {
    pub fn new(reconciler: PolicyReconciler<C>, concurrency: usize) -> Self {
        Self {
            reconciler,
            concurrency: concurrency.max(1),
            store: None,
        }
    }

    /// Save the state to `store` every time a pass changes it.
    pub fn with_store(mut self, store: StateStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn reconciler(&self) -> &PolicyReconciler<C> {
        &self.reconciler
    }

    /// Apply a manifest: prune absent policies, then reconcile declared ones.
    ///
    /// `state` is updated in place as the pass goes: records stay in it until
    /// their policy is deleted, and a record is replaced as soon as a remote
    /// write changed it. Dropping the returned future at any point leaves a
    /// state the next pass can resume from. A failed policy keeps whatever
    /// record the reconciler handed back.
    pub async fn apply(&self, manifest: &Manifest, state: &mut SyncState) -> SyncReport {
        info!(
            "Applying manifest ({} declared, {} tracked)",
            manifest.policies.len(),
            state.policies.len()
        );
        let mut report = SyncReport::default();

        // 1. Policies that only changed their manifest key
        let moved = adopt_moved(manifest, state);
        if !moved.is_empty() {
            self.persist(state).await;
        }
        report.moved = moved;

        // 2. Prune policies that are no longer declared
        let undeclared: Vec<_> = state
            .policies
            .iter()
            .filter(|(key, _)| !manifest.policies.contains_key(*key))
            .map(|(key, record)| (key.clone(), record.clone()))
            .collect();

        let mut pruned = pin!(
            stream::iter(undeclared)
                .map(|(key, record)| async move {
                    info!("Pruning policy {}", key);
                    let result = self.reconciler.finalize(record).await;
                    (key, result)
                })
                .buffer_unordered(self.concurrency)
        );

        while let Some((key, result)) = pruned.next().await {
            match result {
                Ok(()) => {
                    state.policies.remove(&key);
                    report.deleted.push(key);
                }
                Err(e) => {
                    error!("Failed to prune policy {}: {}", key, e);
                    record_failure(state, &mut report, key, e);
                }
            }
            self.persist(state).await;
        }
        report.deleted.sort();

        // 3. Declared policies
        let work: Vec<_> = manifest
            .policies
            .iter()
            .map(|(key, spec)| (key.clone(), spec, state.policies.get(key).cloned()))
            .collect();

        let (tx, mut written) = mpsc::unbounded_channel::<(String, TrackedPolicy)>();
        let mut reconciled = pin!(
            stream::iter(work)
                .map(move |(key, spec, record)| {
                    let tx = tx.clone();
                    async move {
                        let written_key = key.clone();
                        let checkpoint: Checkpoint<'_, TrackedPolicy> =
                            &move |record: &TrackedPolicy| {
                                let _ = tx.send((written_key.clone(), record.clone()));
                            };
                        let result = self
                            .reconciler
                            .reconcile_with(spec, record, Some(checkpoint))
                            .await;
                        (key, result)
                    }
                })
                .buffer_unordered(self.concurrency)
        );

        loop {
            tokio::select! {
                biased;

                Some((key, record)) = written.recv() => {
                    debug!(key = %key, id = record.id().unwrap_or_default(), "Recording written policy");
                    state.policies.insert(key, record);
                }
                next = reconciled.next() => {
                    let Some((key, result)) = next else {
                        break;
                    };
                    // Writes reported before the result must not overwrite it
                    while let Ok((key, record)) = written.try_recv() {
                        state.policies.insert(key, record);
                    }
                    match result {
                        Ok(Reconciled { record, outcome }) => {
                            info!(
                                key = %key,
                                id = record.id().unwrap_or_default(),
                                outcome = %outcome,
                                "Policy reconciled"
                            );
                            state.policies.insert(key.clone(), record);
                            report.outcomes.insert(key, outcome);
                        }
                        Err(e) => {
                            error!("Policy reconciliation failed for {}: {}", key, e);
                            record_failure(state, &mut report, key, e);
                        }
                    }
                }
            }
            self.persist(state).await;
        }

        info!(
            "Manifest applied ({} changed, {} failed)",
            report.changed(),
            report.failures.len()
        );
        report
    }

    /// Compute the action for every declared or tracked policy. Only reads.
    pub async fn plan(&self, manifest: &Manifest, state: &SyncState) -> SyncPlan {
        let mut state = state.clone();
        let moved = adopt_moved(manifest, &mut state);
        let state = &state;

        let keys: BTreeSet<&String> = manifest
            .policies
            .keys()
            .chain(state.policies.keys())
            .collect();

        let results: Vec<_> = stream::iter(keys)
            .map(|key| async move {
                let action = self
                    .reconciler
                    .plan(manifest.policies.get(key), state.policies.get(key))
                    .await;
                (key.clone(), action)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut plan = SyncPlan {
            moved,
            ..Default::default()
        };
        for (key, result) in results {
            match result {
                Ok(action) => {
                    plan.actions.insert(key, action);
                }
                Err(e) => {
                    error!("Failed to plan policy {}: {}", key, e);
                    plan.failures.insert(key, e.to_string());
                }
            }
        }
        plan
    }

    /// Start tracking an existing remote policy under `key`.
    pub async fn import(&self, key: &str, id: &str, state: &mut SyncState) -> Result<(), SyncError> {
        if state.policies.contains_key(key) {
            return Err(SyncError::KeyExists(key.to_string()));
        }
        if let Some((other, _)) = state.policies.iter().find(|(_, r)| r.id() == Some(id)) {
            return Err(SyncError::AlreadyTracked {
                id: id.to_string(),
                key: other.clone(),
            });
        }

        let record = self.reconciler.import(id).await?;
        state.policies.insert(key.to_string(), record);
        Ok(())
    }

    async fn persist(&self, state: &SyncState) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save(state).await {
                warn!("Failed to save state to {}: {}", store.path().display(), e);
            }
        }
    }
}

/// Move records whose policy is now declared under a different key (same
/// name and compartment) to that key. Returns new key -> old key.
fn adopt_moved(manifest: &Manifest, state: &mut SyncState) -> BTreeMap<String, String> {
    let candidates: Vec<(String, String)> = state
        .policies
        .iter()
        .filter(|(key, record)| !manifest.policies.contains_key(*key) && record.id().is_some())
        .filter_map(|(old, record)| {
            let desired = record.desired();
            manifest
                .policies
                .iter()
                .find(|(new, spec)| {
                    !state.policies.contains_key(*new)
                        && spec.name == desired.name
                        && spec.compartment_id == desired.compartment_id
                })
                .map(|(new, _)| (new.clone(), old.clone()))
        })
        .collect();

    let mut moved = BTreeMap::new();
    for (new, old) in candidates {
        if state.policies.contains_key(&new) {
            continue;
        }
        if let Some(record) = state.policies.remove(&old) {
            info!(from = %old, to = %new, "Policy moved to a new key");
            state.policies.insert(new.clone(), record);
            moved.insert(new, old);
        }
    }
    moved
}

/// Keep the record a failed reconciliation handed back; drop the key when
/// there is none.
fn record_failure(
    state: &mut SyncState,
    report: &mut SyncReport,
    key: String,
    e: ReconcileError<TrackedPolicy>,
) {
    let message = e.to_string();
    match e.record {
        Some(record) => {
            state.policies.insert(key.clone(), record);
        }
        None => {
            state.policies.remove(&key);
        }
    }
    report.failures.insert(key, message);
}
