//! Charmworld API client

use reqwest::StatusCode;

use crate::errors::GuiServerError;
use crate::http::client::HttpClient;

impl HttpClient {
    /// Increase the deployment counter of a bundle.
    ///
    /// Returns whether the counter was updated.
    pub async fn increment_deployment_counter(
        &self,
        bundle_id: &str,
    ) -> Result<bool, GuiServerError> {
        let path = format!("api/3/bundle/{}/metric/deployments/increment", bundle_id);
        let status = self.get_status(&path).await?;
        Ok(status == StatusCode::OK)
    }
}
