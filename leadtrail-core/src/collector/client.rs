//! HTTP client for the leadtrail collection API
//!
//! Two calls: pushing event batches to `POST /v1/track/events` and fetching the
//! boot configuration from `GET /v1/config/:apiKey`. Failed deliveries are not
//! retried; the caller logs and drops the batch.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::Deserialize;

use crate::client_config::TrackerConfig;
use crate::config::TransportConfig;
use crate::error::{Error, Result};

use super::events::EventBatch;

/// Response from POST /v1/track/events
#[derive(Debug, Default, Deserialize)]
pub struct TrackResponse {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// HTTP client for the collection API
#[derive(Debug, Clone)]
pub struct ApiClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    /// Create a client for `api_url`
    pub fn new(api_url: &str, transport: &TransportConfig) -> Result<Self> {
        transport.validate()?;

        let base_url = api_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(Error::Config("apiUrl is required".to_string()));
        }
        url::Url::parse(&base_url)?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(transport.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Delivery endpoint
    pub fn events_url(&self) -> String {
        format!("{}/v1/track/events", self.base_url)
    }

    /// Boot configuration endpoint for `api_key`
    pub fn config_url(&self, api_key: &str) -> String {
        format!(
            "{}/v1/config/{}",
            self.base_url,
            urlencoding::encode(api_key)
        )
    }

    /// Send a batch of events
    ///
    /// Any 2xx is success; the response body is informational.
    pub async fn send_events(&self, batch: &EventBatch) -> Result<TrackResponse> {
        self.send_body(batch.to_body()?).await
    }

    /// Send an already serialized `{"events": [...]}` body
    pub async fn send_body(&self, body: Vec<u8>) -> Result<TrackResponse> {
        let response = self
            .http_client
            .post(self.events_url())
            .body(body)
            .send()
            .await
            .map_err(|e| Error::Delivery(format!("HTTP request failed: {}", e)))?;

        let status = response.status();

        if status.is_success() {
            // tolerate empty or non-JSON bodies
            let body = response.text().await.unwrap_or_default();
            Ok(serde_json::from_str(&body).unwrap_or_default())
        } else {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            Err(Error::Delivery(format!(
                "API error ({}): {}",
                status, error_text
            )))
        }
    }

    /// Fetch and validate the boot configuration for `api_key`
    pub async fn fetch_config(&self, api_key: &str) -> Result<TrackerConfig> {
        let response = self.http_client.get(self.config_url(api_key)).send().await?;

        let status = response.status();

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::Config(format!("no configuration for api key {}", api_key)));
        }
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            return Err(Error::Config(format!(
                "config API error ({}): {}",
                status, error_text
            )));
        }

        let body = response.text().await?;
        let mut config: TrackerConfig = serde_json::from_str(&body)?;
        if config.api_key.is_empty() {
            config.api_key = api_key.to_string();
        }
        config.validate()?;
        Ok(config)
    }

    /// Check if the API answers at all
    pub async fn health_check(&self) -> Result<bool> {
        match self.http_client.get(&self.base_url).send().await {
            Ok(response) => Ok(!response.status().is_server_error()),
            Err(_) => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_requires_api_url() {
        assert!(ApiClient::new("", &TransportConfig::default()).is_err());
        assert!(ApiClient::new("not a url", &TransportConfig::default()).is_err());
    }

    #[test]
    fn test_client_rejects_invalid_transport() {
        let transport = TransportConfig {
            timeout_secs: 0,
            ..Default::default()
        };
        assert!(ApiClient::new("https://api.example.com", &transport).is_err());
    }

    #[test]
    fn test_endpoint_urls() {
        let client = ApiClient::new("https://api.example.com/", &TransportConfig::default()).unwrap();

        assert_eq!(client.events_url(), "https://api.example.com/v1/track/events");
        assert_eq!(
            client.config_url("sk live/1"),
            "https://api.example.com/v1/config/sk%20live%2F1"
        );
    }

    #[tokio::test]
    async fn test_send_to_unreachable_host_is_delivery_error() {
        let transport = TransportConfig {
            timeout_secs: 1,
            ..Default::default()
        };
        let client = ApiClient::new("http://127.0.0.1:9", &transport).unwrap();
        let result = client.send_events(&EventBatch::default()).await;
        assert!(matches!(result, Err(Error::Delivery(_))));
    }
}
