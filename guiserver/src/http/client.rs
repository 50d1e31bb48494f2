//! HTTP client implementation

use reqwest::{Client, StatusCode};
use tracing::{debug, error};
use url::Url;

use crate::errors::GuiServerError;

/// HTTP client for the charm store API
pub struct HttpClient {
    client: Client,
    base_url: Url,
}

impl HttpClient {
    /// Create a new HTTP client
    pub fn new(base_url: &str) -> Result<Self, GuiServerError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        // A trailing slash makes relative paths extend the base instead of
        // replacing its last segment.
        let base_url = format!("{}/", base_url.trim_end_matches('/'));
        let base_url = Url::parse(&base_url)
            .map_err(|e| GuiServerError::ConfigError(format!("invalid URL {}: {}", base_url, e)))?;

        Ok(Self { client, base_url })
    }

    /// Resolve a path relative to the base URL
    pub fn url(&self, path: &str) -> Result<Url, GuiServerError> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| GuiServerError::ConfigError(format!("invalid path {}: {}", path, e)))
    }

    /// Make a GET request, returning the response status
    pub async fn get_status(&self, path: &str) -> Result<StatusCode, GuiServerError> {
        let url = self.url(path)?;
        debug!("GET {}", url);

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("HTTP GET failed: {} - {}", status, body);
        }
        Ok(status)
    }
}
