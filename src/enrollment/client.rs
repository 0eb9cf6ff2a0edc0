//! Provisioning service management client.
//!
//! Individual enrollments live at `/enrollments/{registrationId}`. `PUT`
//! creates or replaces a record, so enrolling the same identity twice
//! updates the existing enrollment rather than adding a second one.

use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, IF_MATCH};
use url::Url;

use super::sas;
use super::types::IndividualEnrollment;
use crate::config::ServiceConnectionString;
use crate::error::{ProvisionError, Result};
use crate::tls::build_http_client;

/// Management API version.
pub const API_VERSION: &str = "2021-10-01";

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for the provisioning service management API.
///
/// # Example
///
/// ```no_run
/// use device_provisioner::enrollment::{IndividualEnrollment, ProvisioningServiceClient};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let credential = "HostName=my-dps.azure-devices-provisioning.net;SharedAccessKeyName=provisioningserviceowner;SharedAccessKey=a2V5".parse()?;
/// let client = ProvisioningServiceClient::from_connection_string(&credential)?;
///
/// let enrollment = IndividualEnrollment::x509("device-1", "-----BEGIN CERTIFICATE-----...");
/// let stored = client.create_or_update_individual_enrollment(&enrollment).await?;
/// println!("etag: {:?}", stored.etag);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ProvisioningServiceClient {
    credential: ServiceConnectionString,
    base_url: Url,
    http: reqwest::Client,
    token_ttl: Duration,
}

impl ProvisioningServiceClient {
    /// Create a client for the service named in the connection string.
    pub fn from_connection_string(credential: &ServiceConnectionString) -> Result<Self> {
        let base_url = Url::parse(&format!("https://{}", credential.host_name)).map_err(|e| {
            ProvisionError::invalid_connection_string(format!("Invalid HostName: {}", e))
        })?;

        Ok(Self {
            credential: credential.clone(),
            base_url,
            http: build_http_client(DEFAULT_TIMEOUT)?,
            token_ttl: sas::DEFAULT_TOKEN_TTL,
        })
    }

    /// Send requests to `url` instead of the connection string's host.
    ///
    /// Tokens are still scoped to the connection string's host.
    pub fn with_base_url(mut self, url: impl AsRef<str>) -> Result<Self> {
        self.base_url = Url::parse(url.as_ref())
            .map_err(|e| ProvisionError::invalid_config(format!("Invalid base URL: {}", e)))?;
        Ok(self)
    }

    /// Set the lifetime of generated access tokens.
    pub fn with_token_ttl(mut self, ttl: Duration) -> Self {
        self.token_ttl = ttl;
        self
    }

    /// Create an enrollment or replace the one with the same registration id.
    ///
    /// When the enrollment carries an etag it is sent as `If-Match`, making
    /// the replacement conditional.
    pub async fn create_or_update_individual_enrollment(
        &self,
        enrollment: &IndividualEnrollment,
    ) -> Result<IndividualEnrollment> {
        let url = self.enrollment_url(&enrollment.registration_id);
        tracing::debug!("PUT {}", url);

        let mut request = self
            .http
            .put(url)
            .header(AUTHORIZATION, self.authorization()?)
            .header(CONTENT_TYPE, "application/json")
            .body(serde_json::to_vec(enrollment)?);

        if let Some(ref etag) = enrollment.etag {
            request = request.header(IF_MATCH, etag);
        }

        let response = request.send().await?;
        let response = self.handle_error_response(response).await?;

        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Fetch an enrollment, or `None` if it does not exist.
    pub async fn get_individual_enrollment(
        &self,
        registration_id: &str,
    ) -> Result<Option<IndividualEnrollment>> {
        let url = self.enrollment_url(registration_id);
        tracing::debug!("GET {}", url);

        let response = self
            .http
            .get(url)
            .header(AUTHORIZATION, self.authorization()?)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let response = self.handle_error_response(response).await?;
        let body = response.bytes().await?;
        Ok(Some(serde_json::from_slice(&body)?))
    }

    /// Delete an enrollment, optionally only if it still has `etag`.
    pub async fn delete_individual_enrollment(
        &self,
        registration_id: &str,
        etag: Option<&str>,
    ) -> Result<()> {
        let url = self.enrollment_url(registration_id);
        tracing::debug!("DELETE {}", url);

        let mut request = self
            .http
            .delete(url)
            .header(AUTHORIZATION, self.authorization()?);
        if let Some(etag) = etag {
            request = request.header(IF_MATCH, etag);
        }

        let response = request.send().await?;
        self.handle_error_response(response).await?;
        Ok(())
    }

    /// URL of an enrollment resource.
    pub fn enrollment_url(&self, registration_id: &str) -> Url {
        let mut url = self.base_url.clone();
        url.set_path(&format!("/enrollments/{}", registration_id));
        url.query_pairs_mut().clear().append_pair("api-version", API_VERSION);
        url
    }

    fn authorization(&self) -> Result<String> {
        sas::token_for(&self.credential, self.token_ttl)
    }

    /// Turn a non-success response into [`ProvisionError::Authority`].
    async fn handle_error_response(&self, response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();

        if status.is_success() {
            return Ok(response);
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());

        // Error bodies are JSON with a "message" field; fall back to the raw text.
        let message = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(String::from))
            .unwrap_or(body);

        Err(ProvisionError::authority(status.as_u16(), message))
    }
}
