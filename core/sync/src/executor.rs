//! Webservice request execution.
//!
//! The sync core only needs "post this JSON to that service and give me the
//! JSON back". [`RequestExecutor`] is that seam; [`HttpRequestExecutor`] is
//! the production implementation on top of `reqwest`.

use async_trait::async_trait;
use chrono::{Local, Utc};
use reqwest::{header, Client, StatusCode};
use serde_json::Value;
use tracing::debug;
use url::Url;

use attrsync_common::{Error, Result};

use crate::config::EndpointConfig;

/// Webservice paths, relative to `{base_url}/{api_version}/{api_key}/`.
pub mod services {
    pub const ATTRIBUTES_SEND: &str = "attributes/send";
    pub const ATTRIBUTES_CHECK: &str = "attributes/check";
    pub const EVENTS_TRACK: &str = "events/track";
}

/// Request header names.
pub mod headers {
    pub const INSTALLATION_ID: &str = "x-installation-id";
    pub const LANGUAGE: &str = "x-lang";
    pub const REGION: &str = "x-region";
    pub const API_LEVEL: &str = "x-api-level";
    pub const TIMEZONE: &str = "x-timezone";
    pub const DEVICE_DATE: &str = "x-device-date";
    pub const DATA_COLLECTION: &str = "x-data-collection";
    pub const PROFILE_PROBATION: &str = "x-profile-probation";
}

/// One webservice call.
#[derive(Debug, Clone, PartialEq)]
pub struct WebserviceRequest {
    /// Service path, one of [`services`].
    pub service: &'static str,
    /// JSON body, already wrapped in `{ "payload": ... }`.
    pub body: Value,
    /// Whether the installation is still in profile probation.
    pub profile_probation: bool,
}

/// Posts webservice requests.
#[async_trait]
pub trait RequestExecutor: Send + Sync {
    /// Post a request and return the decoded JSON response.
    ///
    /// # Errors
    /// - `Error::Network` if the request could not be delivered
    /// - `Error::Http` on a non-success status
    /// - `Error::Protocol` if the response is not JSON
    async fn post(&self, request: WebserviceRequest) -> Result<Value>;
}

/// [`RequestExecutor`] over HTTPS.
pub struct HttpRequestExecutor {
    http: Client,
    config: EndpointConfig,
}

impl HttpRequestExecutor {
    pub fn new(config: EndpointConfig) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("attrsync/", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout())
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { http, config })
    }

    /// Full URL of a service.
    pub fn service_url(&self, service: &str) -> Result<Url> {
        service_url(&self.config, service)
    }

    /// Headers sent with every request.
    fn request_headers(&self, profile_probation: bool) -> Vec<(&'static str, String)> {
        let mut out = Vec::new();
        if let Some(id) = &self.config.installation_id {
            out.push((headers::INSTALLATION_ID, id.clone()));
        }
        if let Some(language) = &self.config.language {
            out.push((headers::LANGUAGE, language.clone()));
        }
        if let Some(region) = &self.config.region {
            out.push((headers::REGION, region.clone()));
        }
        out.push((headers::API_LEVEL, self.config.api_level.to_string()));
        out.push((headers::TIMEZONE, Local::now().offset().to_string()));
        out.push((headers::DEVICE_DATE, Utc::now().to_rfc3339()));
        out.push((
            headers::DATA_COLLECTION,
            self.config.data_collection.to_string(),
        ));
        out.push((headers::PROFILE_PROBATION, profile_probation.to_string()));
        out
    }

    async fn handle_response(&self, response: reqwest::Response) -> Result<Value> {
        let status = response.status();

        if status.is_success() {
            if status == StatusCode::NO_CONTENT {
                return Ok(Value::Null);
            }
            response
                .json()
                .await
                .map_err(|e| Error::Protocol(format!("Failed to parse response: {}", e)))
        } else {
            let message = response.text().await.unwrap_or_default();
            Err(Error::Http {
                status: status.as_u16(),
                message,
            })
        }
    }
}

#[async_trait]
impl RequestExecutor for HttpRequestExecutor {
    async fn post(&self, request: WebserviceRequest) -> Result<Value> {
        let url = self.service_url(request.service)?;
        debug!("POST {}", request.service);

        let mut builder = self
            .http
            .post(url)
            .header(header::CONTENT_TYPE, "application/json");
        for (name, value) in self.request_headers(request.profile_probation) {
            builder = builder.header(name, value);
        }

        let response = builder
            .json(&request.body)
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to call {}: {}", request.service, e)))?;

        self.handle_response(response).await
    }
}

/// Compose `{base_url}/{api_version}/{api_key}/{service}`.
pub fn service_url(config: &EndpointConfig, service: &str) -> Result<Url> {
    if config.api_key.is_empty() {
        return Err(Error::InvalidInput("API key is not configured".to_string()));
    }

    let base = config.base_url.trim_end_matches('/');
    let raw = format!("{}/{}/{}/{}", base, config.api_version, config.api_key, service);
    Url::parse(&raw).map_err(|e| Error::InvalidInput(format!("Invalid endpoint '{}': {}", raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint() -> EndpointConfig {
        EndpointConfig {
            base_url: "https://ws.example.com/".to_string(),
            api_key: "PROJECT".to_string(),
            installation_id: Some("install-1".to_string()),
            language: Some("fr".to_string()),
            ..EndpointConfig::default()
        }
    }

    #[test]
    fn test_service_url() {
        let url = service_url(&endpoint(), services::ATTRIBUTES_SEND).unwrap();
        assert_eq!(url.as_str(), "https://ws.example.com/v1/PROJECT/attributes/send");
    }

    #[test]
    fn test_service_url_requires_api_key() {
        let config = EndpointConfig::default();
        assert!(matches!(
            service_url(&config, services::EVENTS_TRACK),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_request_headers() {
        let executor = HttpRequestExecutor::new(endpoint()).unwrap();
        let sent = executor.request_headers(true);
        let get = |name: &str| {
            sent.iter()
                .find(|(n, _)| *n == name)
                .map(|(_, v)| v.clone())
        };

        assert_eq!(get(headers::INSTALLATION_ID).as_deref(), Some("install-1"));
        assert_eq!(get(headers::LANGUAGE).as_deref(), Some("fr"));
        assert_eq!(get(headers::REGION), None);
        assert_eq!(get(headers::API_LEVEL).as_deref(), Some("1"));
        assert_eq!(get(headers::DATA_COLLECTION).as_deref(), Some("true"));
        assert_eq!(get(headers::PROFILE_PROBATION).as_deref(), Some("true"));
        assert!(get(headers::TIMEZONE).is_some());
        assert!(get(headers::DEVICE_DATE).is_some());
    }
}
