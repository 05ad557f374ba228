//! HTTP client for the identity REST API.

use std::time::Duration;

use async_trait::async_trait;
use psync_core::RemoteError;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tracing::debug;

use super::{CreatePolicyDetails, IdentityClient, Policy, UpdatePolicyDetails};

/// API version prefix of the identity service.
const API_VERSION: &str = "20160918";

/// Error body returned by the identity API.
#[derive(Debug, Default, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

/// Client for the identity REST API.
///
/// Requests are authenticated with an optional bearer token; request signing
/// is left to a fronting proxy.
#[derive(Debug, Clone)]
pub struct HttpIdentityClient {
    endpoint: String,
    token: Option<String>,
    http: reqwest::Client,
}

impl HttpIdentityClient {
    pub fn new(
        endpoint: &str,
        token: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self, RemoteError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| RemoteError::Transport(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token,
            http,
        })
    }

    fn policies_url(&self) -> String {
        format!("{}/{}/policies", self.endpoint, API_VERSION)
    }

    fn policy_url(&self, id: &str) -> String {
        format!("{}/{}", self.policies_url(), id)
    }

    fn request(&self, method: Method, url: String) -> RequestBuilder {
        let builder = self
            .http
            .request(method, url)
            .header("opc-request-id", uuid::Uuid::new_v4().to_string());
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder, id: &str) -> Result<Response, RemoteError> {
        let response = builder
            .send()
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(RemoteError::NotFound(id.to_string()));
        }

        let body: ApiErrorBody = response.json().await.unwrap_or_default();
        Err(RemoteError::Api {
            status: status.as_u16(),
            code: body.code,
            message: body.message,
        })
    }

    async fn read_policy(response: Response) -> Result<Policy, RemoteError> {
        let etag = response
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .unwrap_or_default();

        let mut policy: Policy = response
            .json()
            .await
            .map_err(|e| RemoteError::Transport(format!("Invalid policy body: {}", e)))?;
        policy.etag = etag;
        Ok(policy)
    }
}

#[async_trait]
impl IdentityClient for HttpIdentityClient {
    async fn create_policy(&self, details: CreatePolicyDetails) -> Result<Policy, RemoteError> {
        debug!("Creating policy {} in {}", details.name, details.compartment_id);
        let builder = self
            .request(Method::POST, self.policies_url())
            .header("opc-retry-token", uuid::Uuid::new_v4().to_string())
            .json(&details);
        let response = self.send(builder, &details.name).await?;
        Self::read_policy(response).await
    }

    async fn get_policy(&self, id: &str) -> Result<Policy, RemoteError> {
        debug!("Getting policy {}", id);
        let response = self
            .send(self.request(Method::GET, self.policy_url(id)), id)
            .await?;
        Self::read_policy(response).await
    }

    async fn update_policy(
        &self,
        id: &str,
        details: UpdatePolicyDetails,
    ) -> Result<Policy, RemoteError> {
        debug!("Updating policy {}", id);
        let builder = self.request(Method::PUT, self.policy_url(id)).json(&details);
        let response = self.send(builder, id).await?;
        Self::read_policy(response).await
    }

    async fn delete_policy(&self, id: &str) -> Result<(), RemoteError> {
        debug!("Deleting policy {}", id);
        self.send(self.request(Method::DELETE, self.policy_url(id)), id)
            .await?;
        Ok(())
    }
}
