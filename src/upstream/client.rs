//! reqwest-backed item source for a booru-style posts API.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::error::UpstreamError;
use super::parser::{FetchedBatch, parse_items};
use super::{FetchRequest, ItemSource};

/// Credentials appended to every request as `login` / `api_key`.
#[derive(Clone)]
pub struct UpstreamCredentials {
    pub login: String,
    pub api_key: String,
}

impl std::fmt::Debug for UpstreamCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamCredentials")
            .field("login", &self.login)
            .finish_non_exhaustive()
    }
}

/// Fetches posts from `<base_url>/posts.json`.
#[derive(Debug, Clone)]
pub struct HttpItemSource {
    client: reqwest::Client,
    base_url: String,
    credentials: Option<UpstreamCredentials>,
}

impl HttpItemSource {
    /// Creates a source with its own HTTP client.
    pub fn new(
        base_url: impl Into<String>,
        credentials: Option<UpstreamCredentials>,
        timeout: Duration,
    ) -> Result<Self, UpstreamError> {
        let client = reqwest::Client::builder()
            .user_agent(format!("tagrelay/{}", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(UpstreamError::Network)?;
        Ok(Self::with_client(client, base_url, credentials))
    }

    /// Creates a source from a pre-configured client.
    pub fn with_client(
        client: reqwest::Client,
        base_url: impl Into<String>,
        credentials: Option<UpstreamCredentials>,
    ) -> Self {
        HttpItemSource {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
        }
    }

    /// Returns the site root used for requests and canonical URLs.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn query(&self, request: &FetchRequest) -> Vec<(&'static str, String)> {
        let mut query = vec![
            ("tags", request.tag_expression()),
            ("limit", request.limit.to_string()),
        ];
        if let Some(creds) = &self.credentials {
            query.push(("login", creds.login.clone()));
            query.push(("api_key", creds.api_key.clone()));
        }
        query
    }
}

#[async_trait]
impl ItemSource for HttpItemSource {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchedBatch, UpstreamError> {
        let url = format!("{}/posts.json", self.base_url);
        debug!(tag_key = %request.tag_key, after = request.after, limit = request.limit, "Fetching posts");

        let response = self
            .client
            .get(&url)
            .query(&self.query(request))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                message: message.chars().take(200).collect(),
            });
        }

        let body = response.bytes().await?;
        let batch =
            parse_items(&body, &self.base_url).map_err(|e| UpstreamError::Body(e.to_string()))?;

        for rejected in &batch.rejected {
            warn!(tag_key = %request.tag_key, error = %rejected, "Skipping malformed upstream record");
        }
        Ok(batch)
    }
}
