//! psync agent library.
//!
//! Reconciles declared identity policies with the remote control plane:
//! - [`manifest`]: the declared policies
//! - [`store`]: tracked records persisted between runs
//! - [`policy`]: the policy adapter for the lifecycle driver in `psync-core`
//! - [`reconciler`]: per-policy create/update/replace/delete decisions
//! - [`sync`]: a full pass over the manifest, including pruning
//! - [`clients`]: the identity API boundary and its HTTP client

pub mod clients;
pub mod manifest;
pub mod policy;
pub mod reconciler;
pub mod record;
pub mod store;
pub mod sync;

pub use clients::{HttpIdentityClient, IdentityClient};
pub use manifest::Manifest;
pub use reconciler::{Action, Outcome, PolicyReconciler, Reconciler};
pub use record::{PolicySpec, TrackedPolicy};
pub use store::{StateStore, SyncState};
pub use sync::{SyncPlan, SyncReport, Syncer};
