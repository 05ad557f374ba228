//! Clients for the remote identity control plane.
//!
//! [`IdentityClient`] is the boundary the policy adapter consumes:
//! - create, get, update and delete of a single policy
//! - errors mapped into [`RemoteError`], with not-found kept distinct
//!
//! [`HttpIdentityClient`] talks to the identity REST API.

pub mod identity;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use psync_core::RemoteError;
use serde::{Deserialize, Serialize};

pub use identity::HttpIdentityClient;

/// Policy as returned by the identity API.
///
/// The etag is not part of the body; clients fill it from the `ETag`
/// response header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    pub id: String,
    pub compartment_id: String,
    pub name: String,
    pub description: String,
    pub statements: Vec<String>,
    #[serde(rename = "lifecycleState")]
    pub state: String,
    pub time_created: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_modified: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inactive_status: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_date: Option<NaiveDate>,
    #[serde(skip)]
    pub etag: String,
}

/// Body of a create call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePolicyDetails {
    pub compartment_id: String,
    pub name: String,
    pub description: String,
    pub statements: Vec<String>,
}

/// Body of an update call. Absent fields are left unchanged remotely.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePolicyDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statements: Option<Vec<String>>,
}

impl UpdatePolicyDetails {
    pub fn is_empty(&self) -> bool {
        self.description.is_none() && self.statements.is_none()
    }
}

/// Remote operations on identity policies.
#[async_trait]
pub trait IdentityClient: Send + Sync {
    async fn create_policy(&self, details: CreatePolicyDetails) -> Result<Policy, RemoteError>;

    async fn get_policy(&self, id: &str) -> Result<Policy, RemoteError>;

    async fn update_policy(
        &self,
        id: &str,
        details: UpdatePolicyDetails,
    ) -> Result<Policy, RemoteError>;

    async fn delete_policy(&self, id: &str) -> Result<(), RemoteError>;
}
