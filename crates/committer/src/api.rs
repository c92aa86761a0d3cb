//! The external policy service's REST API: wire types and client.
//!
//! The service speaks JSON with camelCase fields, integer ids and numeric
//! state enums. Three route families matter here: `fileInstance` (per-host
//! file state), `fileRule` (fleet-wide file state) and `certificate`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quorum_telemetry::sinks::committer_metrics;
use quorum_types::config::HostHealthConfig;
use quorum_types::error::ApiError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Numeric approval states of the policy vocabulary.
pub const STATE_UNAPPROVED: i32 = 1;
pub const STATE_APPROVED: i32 = 2;
pub const STATE_BANNED: i32 = 3;

/// One observed copy of a file on one endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInstance {
    pub id: i64,
    pub file_catalog_id: i64,
    pub computer_id: i64,
    pub local_state: i32,
}

/// Body of a fileInstance POST changing one endpoint's local state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInstanceUpdate {
    pub id: i64,
    pub local_state: i32,
    pub file_catalog_id: i64,
    pub computer_id: i64,
}

/// A fleet-wide file rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRule {
    pub file_catalog_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_state: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub force_installer: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub force_not_installer: Option<bool>,
}

/// An endpoint as the policy service sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Computer {
    pub id: i64,
    #[serde(default)]
    pub last_poll_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sync_percent: Option<f64>,
}

impl Computer {
    /// Whether the endpoint polls recently enough and is synced enough that
    /// "the file is not there" can be believed.
    pub fn is_healthy(&self, health: &HostHealthConfig) -> bool {
        let polled_recently = self.last_poll_date.is_some_and(|polled| {
            let age = Utc::now().signed_duration_since(polled);
            age.num_seconds() >= 0 && (age.num_seconds() as u64) <= health.max_poll_age_secs
        });
        let synced = self
            .sync_percent
            .is_some_and(|p| p >= f64::from(health.min_sync_percent));
        polled_recently && synced
    }
}

/// A certificate record on the policy service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiCertificate {
    pub id: i64,
    pub thumbprint: String,
    pub certificate_state: i32,
}

/// Body of a certificate POST changing the fleet-wide certificate state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateUpdate {
    pub id: i64,
    pub thumbprint: String,
    pub certificate_state: i32,
}

/// The committer's view of the external policy service.
#[async_trait]
pub trait PolicyApi: Send + Sync {
    /// File instances of a catalog entry on one endpoint.
    async fn find_file_instances(
        &self,
        computer_id: i64,
        file_catalog_id: i64,
    ) -> Result<Vec<FileInstance>, ApiError>;

    /// Changes one endpoint's local state for a file.
    async fn set_file_instance_state(
        &self,
        update: FileInstanceUpdate,
    ) -> Result<FileInstance, ApiError>;

    /// Looks up an endpoint; `None` when the service does not know it.
    async fn get_computer(&self, computer_id: i64) -> Result<Option<Computer>, ApiError>;

    /// Creates or updates the fleet-wide rule for a catalog entry.
    async fn create_file_rule(&self, rule: FileRule) -> Result<FileRule, ApiError>;

    /// Resolves a certificate by thumbprint.
    async fn find_certificate(&self, thumbprint: &str)
        -> Result<Option<ApiCertificate>, ApiError>;

    /// Changes the fleet-wide certificate state.
    async fn set_certificate_state(
        &self,
        update: CertificateUpdate,
    ) -> Result<ApiCertificate, ApiError>;
}

/// `reqwest`-backed client for the real service.
pub struct RestPolicyApi {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl RestPolicyApi {
    /// `endpoint` is the API base, e.g. `https://host/api/bit9platform/v1`.
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        }
    }

    fn url(&self, route: &str) -> String {
        format!("{}/{}", self.endpoint.trim_end_matches('/'), route)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        route: &str,
        query: &[(&str, String)],
    ) -> Result<Option<T>, ApiError> {
        committer_metrics().inc_api_requests(route);
        let response = self
            .client
            .get(self.url(route))
            .header("X-Auth-Token", &self.api_key)
            .query(query)
            .send()
            .await
            .map_err(transport_error)?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = check_status(response)?;
        response
            .json::<T>()
            .await
            .map(Some)
            .map_err(|e| ApiError::Decode(e.to_string()))
    }

    async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        route: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        committer_metrics().inc_api_requests(route);
        let response = self
            .client
            .post(self.url(route))
            .header("X-Auth-Token", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;
        let response = check_status(response)?;
        response
            .json::<T>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }
}

fn transport_error(e: reqwest::Error) -> ApiError {
    ApiError::Transient {
        status: None,
        message: e.to_string(),
    }
}

fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let code = status.as_u16();
    if status.is_server_error() || code == 429 {
        Err(ApiError::Transient {
            status: Some(code),
            message: format!("policy API returned {status}"),
        })
    } else {
        Err(ApiError::Permanent {
            status: Some(code),
            message: format!("policy API returned {status}"),
        })
    }
}

#[async_trait]
impl PolicyApi for RestPolicyApi {
    async fn find_file_instances(
        &self,
        computer_id: i64,
        file_catalog_id: i64,
    ) -> Result<Vec<FileInstance>, ApiError> {
        let query = [
            ("q", format!("computerId:{computer_id}")),
            ("q", format!("fileCatalogId:{file_catalog_id}")),
        ];
        Ok(self
            .get_json::<Vec<FileInstance>>("fileInstance", &query)
            .await?
            .unwrap_or_default())
    }

    async fn set_file_instance_state(
        &self,
        update: FileInstanceUpdate,
    ) -> Result<FileInstance, ApiError> {
        self.post_json("fileInstance", &update).await
    }

    async fn get_computer(&self, computer_id: i64) -> Result<Option<Computer>, ApiError> {
        self.get_json(&format!("computer/{computer_id}"), &[]).await
    }

    async fn create_file_rule(&self, rule: FileRule) -> Result<FileRule, ApiError> {
        self.post_json("fileRule", &rule).await
    }

    async fn find_certificate(
        &self,
        thumbprint: &str,
    ) -> Result<Option<ApiCertificate>, ApiError> {
        let query = [("q", format!("thumbprint:{thumbprint}"))];
        let found: Option<Vec<ApiCertificate>> =
            self.get_json("certificate", &query).await?;
        Ok(found.and_then(|certs| certs.into_iter().next()))
    }

    async fn set_certificate_state(
        &self,
        update: CertificateUpdate,
    ) -> Result<ApiCertificate, ApiError> {
        self.post_json("certificate", &update).await
    }
}
