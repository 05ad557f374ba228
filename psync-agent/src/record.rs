//! Local record of a managed policy.

use chrono::{DateTime, NaiveDate, Utc};
use psync_core::{AppliedMarker, Fingerprint};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::clients::{CreatePolicyDetails, Policy};

/// Desired policy as declared by the user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicySpec {
    pub name: String,
    pub description: String,
    pub compartment_id: String,
    pub statements: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpecError {
    #[error("Policy name is required")]
    MissingName,

    #[error("Policy description is required")]
    MissingDescription,

    #[error("Compartment ID is required")]
    MissingCompartment,

    #[error("At least one statement is required")]
    NoStatements,

    #[error("Statement {0} is blank")]
    BlankStatement(usize),
}

impl PolicySpec {
    pub fn validate(&self) -> Result<(), SpecError> {
        if self.name.trim().is_empty() {
            return Err(SpecError::MissingName);
        }
        if self.description.trim().is_empty() {
            return Err(SpecError::MissingDescription);
        }
        if self.compartment_id.trim().is_empty() {
            return Err(SpecError::MissingCompartment);
        }
        if self.statements.is_empty() {
            return Err(SpecError::NoStatements);
        }
        if let Some(i) = self.statements.iter().position(|s| s.trim().is_empty()) {
            return Err(SpecError::BlankStatement(i));
        }
        Ok(())
    }

    /// True when moving from `self` to `other` cannot be done in place.
    pub fn requires_replacement(&self, other: &PolicySpec) -> bool {
        self.name != other.name || self.compartment_id != other.compartment_id
    }
}

impl From<&PolicySpec> for CreatePolicyDetails {
    fn from(spec: &PolicySpec) -> Self {
        CreatePolicyDetails {
            compartment_id: spec.compartment_id.clone(),
            name: spec.name.clone(),
            description: spec.description.clone(),
            statements: spec.statements.clone(),
        }
    }
}

impl From<&Policy> for PolicySpec {
    fn from(policy: &Policy) -> Self {
        PolicySpec {
            name: policy.name.clone(),
            description: policy.description.clone(),
            compartment_id: policy.compartment_id.clone(),
            statements: policy.statements.clone(),
        }
    }
}

/// Remote-authoritative fields, as of the last refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedPolicy {
    pub state: String,
    pub etag: String,
    pub time_created: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_modified: Option<DateTime<Utc>>,
    pub description: String,
    /// Statements as the remote stores them, possibly reformatted.
    pub statements: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inactive_status: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_date: Option<NaiveDate>,
}

impl From<&Policy> for ObservedPolicy {
    fn from(policy: &Policy) -> Self {
        ObservedPolicy {
            state: policy.state.clone(),
            etag: policy.etag.clone(),
            time_created: policy.time_created,
            time_modified: policy.time_modified,
            description: policy.description.clone(),
            statements: policy.statements.clone(),
            inactive_status: policy.inactive_status,
            version_date: policy.version_date,
        }
    }
}

/// A policy under management.
///
/// `id`, `observed` and `applied` are owned by the driver; only `desired` is
/// set from user input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    desired: PolicySpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    observed: Option<ObservedPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    applied: Option<AppliedMarker>,
}

impl TrackedPolicy {
    /// Record for a policy that does not exist remotely yet.
    pub fn new(desired: PolicySpec) -> Self {
        Self {
            id: None,
            desired,
            observed: None,
            applied: None,
        }
    }

    /// Record adopting an existing remote policy. The desired spec is filled
    /// in after the first refresh.
    pub fn imported(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            desired: PolicySpec::default(),
            observed: None,
            applied: None,
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn desired(&self) -> &PolicySpec {
        &self.desired
    }

    pub fn observed(&self) -> Option<&ObservedPolicy> {
        self.observed.as_ref()
    }

    pub fn applied(&self) -> Option<&AppliedMarker> {
        self.applied.as_ref()
    }

    pub fn fingerprint(&self) -> Option<&Fingerprint> {
        self.applied.as_ref().map(AppliedMarker::fingerprint)
    }

    pub fn last_applied_etag(&self) -> Option<&str> {
        self.applied.as_ref().map(AppliedMarker::etag)
    }

    pub fn observed_etag(&self) -> Option<&str> {
        self.observed.as_ref().map(|o| o.etag.as_str())
    }

    pub(crate) fn set_desired(&mut self, desired: PolicySpec) {
        self.desired = desired;
    }

    /// Bind the remote id. The first id wins; a later, different id is ignored.
    pub(crate) fn bind_id(&mut self, id: &str) {
        match &self.id {
            None => self.id = Some(id.to_string()),
            Some(existing) if existing != id => {
                warn!(existing = %existing, ignored = %id, "Refusing to reassign policy id");
            }
            Some(_) => {}
        }
    }

    pub(crate) fn record_write(&mut self, marker: AppliedMarker) {
        self.applied = Some(marker);
    }

    pub(crate) fn observe(&mut self, observed: ObservedPolicy) {
        self.observed = Some(observed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> PolicySpec {
        PolicySpec {
            name: "storage-admins".to_string(),
            description: "Storage admins".to_string(),
            compartment_id: "ocid1.compartment.oc1..x".to_string(),
            statements: vec!["Allow group A to read buckets in compartment X".to_string()],
        }
    }

    #[test]
    fn test_validate_accepts_complete_spec() {
        assert_eq!(spec().validate(), Ok(()));
    }

    #[test]
    fn test_validate_rejects_missing_fields() {
        let mut s = spec();
        s.name = " ".to_string();
        assert_eq!(s.validate(), Err(SpecError::MissingName));

        let mut s = spec();
        s.description.clear();
        assert_eq!(s.validate(), Err(SpecError::MissingDescription));

        let mut s = spec();
        s.compartment_id.clear();
        assert_eq!(s.validate(), Err(SpecError::MissingCompartment));

        let mut s = spec();
        s.statements.clear();
        assert_eq!(s.validate(), Err(SpecError::NoStatements));

        let mut s = spec();
        s.statements.push("   ".to_string());
        assert_eq!(s.validate(), Err(SpecError::BlankStatement(1)));
    }

    #[test]
    fn test_replacement_only_for_create_time_fields() {
        let base = spec();

        let mut renamed = spec();
        renamed.name = "other".to_string();
        assert!(base.requires_replacement(&renamed));

        let mut moved = spec();
        moved.compartment_id = "ocid1.compartment.oc1..y".to_string();
        assert!(base.requires_replacement(&moved));

        let mut edited = spec();
        edited.description = "changed".to_string();
        edited.statements.push("Allow group B to inspect users in tenancy".to_string());
        assert!(!base.requires_replacement(&edited));
    }

    #[test]
    fn test_id_is_bound_once() {
        let mut record = TrackedPolicy::new(spec());
        record.bind_id("ocid1.policy.oc1..first");
        record.bind_id("ocid1.policy.oc1..second");
        assert_eq!(record.id(), Some("ocid1.policy.oc1..first"));
    }

    #[test]
    fn test_record_write_replaces_fingerprint_and_etag_together() {
        let mut record = TrackedPolicy::new(spec());
        record.record_write(AppliedMarker::for_write(&spec().statements, "E0"));
        let first = record.fingerprint().cloned();

        record.record_write(AppliedMarker::for_write(&["other"], "E1"));

        assert_ne!(record.fingerprint().cloned(), first);
        assert_eq!(record.last_applied_etag(), Some("E1"));
    }

    #[test]
    fn test_record_roundtrips_through_json() {
        let mut record = TrackedPolicy::new(spec());
        record.bind_id("ocid1.policy.oc1..p");
        record.record_write(AppliedMarker::for_write(&spec().statements, "E0"));

        let json = serde_json::to_string(&record).unwrap();
        let back: TrackedPolicy = serde_json::from_str(&json).unwrap();

        assert_eq!(back, record);
    }
}
