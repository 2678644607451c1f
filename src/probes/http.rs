use super::{Probe, ProbeResponse};
use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::{Client, RequestBuilder, Url};
use std::time::Duration;

/// HTTP client for one service under test.
///
/// Built once at startup and shared; `reqwest::Client` pools connections
/// internally. Used both as the health [`Probe`] for the service and by
/// test fixtures to issue their requests.
#[derive(Debug, Clone)]
pub struct ServiceClient {
    name: String,
    base_url: String,
    client: Client,
}

impl ServiceClient {
    pub fn new(name: &str, base_url: &str, timeout: Duration) -> Result<Self> {
        Url::parse(base_url)
            .with_context(|| format!("invalid base URL for service '{}': {}", name, base_url))?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            name: name.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Absolute URL for a service-relative path. The base URL's own path is kept.
    pub fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    pub fn get(&self, path: &str) -> RequestBuilder {
        self.client.get(self.url(path))
    }

    pub fn post(&self, path: &str) -> RequestBuilder {
        self.client.post(self.url(path))
    }

    pub fn put(&self, path: &str) -> RequestBuilder {
        self.client.put(self.url(path))
    }

    pub fn delete(&self, path: &str) -> RequestBuilder {
        self.client.delete(self.url(path))
    }
}

#[async_trait::async_trait]
impl Probe for ServiceClient {
    async fn get(&self, path: &str) -> Result<ProbeResponse> {
        let resp = self
            .client
            .get(self.url(path))
            .send()
            .await
            .with_context(|| format!("GET {} failed", self.url(path)))?;
        Ok(ProbeResponse {
            status: resp.status().as_u16(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        self.url(path)
    }
}
