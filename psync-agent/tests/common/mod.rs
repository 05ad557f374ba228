//! In-memory identity service for integration tests.
//!
//! Behaves like the remote control plane as far as the reconciler can tell:
//! - new policies sit in CREATING for a configurable number of refreshes
//! - deleted policies sit in DELETING, then disappear
//! - every write bumps the etag (E0, E1, ...)
//! - statements are stored with whitespace collapsed, like a remote that
//!   reformats what it was sent
//! - policy names are unique across the tenancy

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use psync_agent::clients::{CreatePolicyDetails, IdentityClient, Policy, UpdatePolicyDetails};
use psync_agent::{PolicyReconciler, PolicySpec};
use psync_core::{Driver, DriverConfig, RemoteError};

/// Remote call counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Calls {
    pub create: usize,
    pub get: usize,
    pub update: usize,
    pub delete: usize,
}

impl Calls {
    pub fn writes(&self) -> usize {
        self.create + self.update + self.delete
    }
}

struct Stored {
    policy: Policy,
    pending_polls: usize,
}

#[derive(Default)]
struct Inner {
    policies: HashMap<String, Stored>,
    next_id: u64,
    next_etag: u64,
    calls: Calls,
    updates: Vec<(String, UpdatePolicyDetails)>,
    creating_polls: usize,
    deleting_polls: usize,
    stuck_names: HashSet<String>,
}

impl Inner {
    fn etag(&mut self) -> String {
        let etag = format!("E{}", self.next_etag);
        self.next_etag += 1;
        etag
    }
}

#[derive(Default)]
pub struct FakeIdentity {
    inner: Mutex<Inner>,
}

fn normalize(statements: &[String]) -> Vec<String> {
    statements
        .iter()
        .map(|s| s.split_whitespace().collect::<Vec<_>>().join(" "))
        .collect()
}

impl FakeIdentity {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap()
    }

    /// Refreshes that report CREATING before a new policy turns ACTIVE.
    pub fn set_creating_polls(&self, polls: usize) {
        self.lock().creating_polls = polls;
    }

    /// Refreshes that report DELETING before a deleted policy disappears.
    pub fn set_deleting_polls(&self, polls: usize) {
        self.lock().deleting_polls = polls;
    }

    /// Policies created with this name never leave CREATING.
    pub fn stick(&self, name: &str) {
        self.lock().stuck_names.insert(name.to_string());
    }

    /// Let every pending policy converge on its next refresh.
    pub fn unstick_all(&self) {
        let mut inner = self.lock();
        inner.stuck_names.clear();
        for stored in inner.policies.values_mut() {
            stored.pending_polls = 0;
        }
    }

    pub fn calls(&self) -> Calls {
        self.lock().calls
    }

    pub fn updates(&self) -> Vec<(String, UpdatePolicyDetails)> {
        self.lock().updates.clone()
    }

    pub fn policy(&self, id: &str) -> Option<Policy> {
        self.lock().policies.get(id).map(|s| s.policy.clone())
    }

    pub fn len(&self) -> usize {
        self.lock().policies.len()
    }

    /// Out-of-band modification that leaves the content untouched.
    pub fn touch(&self, id: &str) -> String {
        let mut inner = self.lock();
        let etag = inner.etag();
        let stored = inner.policies.get_mut(id).expect("unknown policy");
        stored.policy.etag = etag.clone();
        etag
    }

    /// Out-of-band edit of the statements.
    pub fn edit_statements(&self, id: &str, statements: Vec<String>) {
        let mut inner = self.lock();
        let etag = inner.etag();
        let stored = inner.policies.get_mut(id).expect("unknown policy");
        stored.policy.statements = statements;
        stored.policy.etag = etag;
    }

    /// Out-of-band deletion.
    pub fn remove(&self, id: &str) {
        self.lock().policies.remove(id);
    }

    /// Create an ACTIVE policy directly, bypassing the API.
    pub fn seed(&self, spec: &PolicySpec) -> String {
        let mut inner = self.lock();
        inner.next_id += 1;
        let id = format!("ocid1.policy.oc1..seed{}", inner.next_id);
        let etag = inner.etag();
        let policy = Policy {
            id: id.clone(),
            compartment_id: spec.compartment_id.clone(),
            name: spec.name.clone(),
            description: spec.description.clone(),
            statements: normalize(&spec.statements),
            state: "ACTIVE".to_string(),
            time_created: Utc::now(),
            time_modified: None,
            inactive_status: None,
            version_date: None,
            etag,
        };
        inner.policies.insert(
            id.clone(),
            Stored {
                policy,
                pending_polls: 0,
            },
        );
        id
    }
}

#[async_trait]
impl IdentityClient for FakeIdentity {
    async fn create_policy(&self, details: CreatePolicyDetails) -> Result<Policy, RemoteError> {
        let mut inner = self.lock();
        inner.calls.create += 1;

        let duplicate = inner
            .policies
            .values()
            .any(|s| s.policy.name == details.name);
        if duplicate {
            return Err(RemoteError::Api {
                status: 409,
                code: "PolicyAlreadyExists".to_string(),
                message: format!("policy {} already exists", details.name),
            });
        }

        inner.next_id += 1;
        let id = format!("ocid1.policy.oc1..fake{}", inner.next_id);
        let etag = inner.etag();
        let pending_polls = if inner.stuck_names.contains(&details.name) {
            usize::MAX
        } else {
            inner.creating_polls
        };
        let policy = Policy {
            id: id.clone(),
            compartment_id: details.compartment_id,
            name: details.name,
            description: details.description,
            statements: normalize(&details.statements),
            state: "CREATING".to_string(),
            time_created: Utc::now(),
            time_modified: None,
            inactive_status: None,
            version_date: None,
            etag,
        };
        inner.policies.insert(
            id,
            Stored {
                policy: policy.clone(),
                pending_polls,
            },
        );
        Ok(policy)
    }

    async fn get_policy(&self, id: &str) -> Result<Policy, RemoteError> {
        let mut inner = self.lock();
        inner.calls.get += 1;

        let Some(stored) = inner.policies.get_mut(id) else {
            return Err(RemoteError::NotFound(id.to_string()));
        };
        if stored.pending_polls > 0 {
            stored.pending_polls -= 1;
            return Ok(stored.policy.clone());
        }

        match stored.policy.state.as_str() {
            "CREATING" => {
                stored.policy.state = "ACTIVE".to_string();
                Ok(stored.policy.clone())
            }
            "DELETING" => {
                inner.policies.remove(id);
                Err(RemoteError::NotFound(id.to_string()))
            }
            _ => Ok(stored.policy.clone()),
        }
    }

    async fn update_policy(
        &self,
        id: &str,
        details: UpdatePolicyDetails,
    ) -> Result<Policy, RemoteError> {
        let mut inner = self.lock();
        inner.calls.update += 1;
        inner.updates.push((id.to_string(), details.clone()));

        if !inner.policies.contains_key(id) {
            return Err(RemoteError::NotFound(id.to_string()));
        }
        let etag = inner.etag();
        let stored = inner.policies.get_mut(id).expect("checked above");
        if let Some(description) = details.description {
            stored.policy.description = description;
        }
        if let Some(statements) = details.statements {
            stored.policy.statements = normalize(&statements);
        }
        stored.policy.time_modified = Some(Utc::now());
        stored.policy.etag = etag;
        Ok(stored.policy.clone())
    }

    async fn delete_policy(&self, id: &str) -> Result<(), RemoteError> {
        let mut inner = self.lock();
        inner.calls.delete += 1;

        let deleting_polls = inner.deleting_polls;
        let Some(stored) = inner.policies.get_mut(id) else {
            return Err(RemoteError::NotFound(id.to_string()));
        };
        stored.policy.state = "DELETING".to_string();
        stored.pending_polls = deleting_polls;
        Ok(())
    }
}

pub fn test_config() -> DriverConfig {
    DriverConfig::default()
        .with_timeout(Duration::from_secs(60))
        .with_poll_interval(Duration::from_secs(1), Duration::from_secs(5))
        .with_not_found_checks(3)
}

pub fn reconciler(fake: &Arc<FakeIdentity>) -> PolicyReconciler<FakeIdentity> {
    PolicyReconciler::new(Arc::clone(fake), Driver::new(test_config()))
}

pub fn spec(name: &str) -> PolicySpec {
    PolicySpec {
        name: name.to_string(),
        description: format!("{} policy", name),
        compartment_id: "ocid1.compartment.oc1..test".to_string(),
        statements: vec![
            "Allow group A to read buckets in compartment X".to_string(),
            "Allow group A to write objects in compartment X".to_string(),
        ],
    }
}
