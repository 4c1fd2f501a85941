//! Registration handshake against the backend HTTP API.

use std::time::Duration;

use reqwest::{StatusCode, Url};
use uav_core::{RegistrationAccepted, RegistrationRequest};

use crate::error::RegistrationError;
use crate::poller::StatusPoller;

/// Client for the drone registration endpoints.
#[derive(Debug, Clone)]
pub struct RegistrationClient {
    base_url: String,
    client: reqwest::Client,
}

/// Locator for an accepted registration, consumed by [`StatusPoller`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationHandle {
    pub request_id: String,
    pub status_url: String,
}

impl RegistrationClient {
    /// Create a client for an API base such as `http://localhost:8080/api/v1`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, reqwest::Client::new())
    }

    pub fn with_client(base_url: impl Into<String>, client: reqwest::Client) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { base_url, client }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Poller sharing this client's connection pool.
    pub fn poller(&self, interval: Duration) -> StatusPoller {
        StatusPoller::new(self.client.clone(), interval)
    }

    /// Submit `request` once. Only `202 Accepted` counts as success; nothing
    /// is retried here.
    pub async fn register(
        &self,
        request: &RegistrationRequest,
    ) -> Result<RegistrationHandle, RegistrationError> {
        let url = format!("{}/drones/register", self.base_url);
        tracing::info!(
            serial = request.serial_number(),
            model = request.model(),
            "Submitting registration to {}",
            url
        );

        let response = self.client.post(&url).json(request).send().await?;
        let status = response.status();
        if status != StatusCode::ACCEPTED {
            let body = response.text().await.unwrap_or_default();
            return Err(RegistrationError::UnexpectedStatus {
                status: status.as_u16(),
                body,
            });
        }

        let accepted: RegistrationAccepted = response.json().await?;
        let request_id = accepted
            .request_id
            .filter(|id| !id.trim().is_empty())
            .ok_or(RegistrationError::MissingRequestId)?;

        let status_url = match accepted
            .status_check_url
            .filter(|locator| !locator.trim().is_empty())
        {
            Some(locator) => self.resolve(&locator)?,
            None => format!(
                "{}/drones/registration/{}/status",
                self.base_url, request_id
            ),
        };

        if let Some(message) = accepted.message.as_deref() {
            tracing::info!("Registration accepted: {}", message);
        }
        tracing::info!(request_id = %request_id, status_url = %status_url, "Registration submitted");

        Ok(RegistrationHandle {
            request_id,
            status_url,
        })
    }

    /// Absolute locators are used as-is; relative ones are joined onto the
    /// API base.
    fn resolve(&self, locator: &str) -> Result<String, RegistrationError> {
        if let Ok(url) = Url::parse(locator) {
            return Ok(url.to_string());
        }
        // Trailing slash so the last base segment survives the join.
        let base = Url::parse(&format!("{}/", self.base_url)).map_err(|e| {
            RegistrationError::InvalidUrl {
                url: self.base_url.clone(),
                reason: e.to_string(),
            }
        })?;
        base.join(locator)
            .map(|url| url.to_string())
            .map_err(|e| RegistrationError::InvalidUrl {
                url: locator.to_string(),
                reason: e.to_string(),
            })
    }
}
