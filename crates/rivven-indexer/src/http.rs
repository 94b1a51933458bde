//! Elasticsearch-compatible bulk client over HTTP.
//!
//! The endpoint is parsed once at construction; a malformed URL is a
//! configuration error. Requests report the status and raw body of whatever
//! the server answered; only a failure to complete the exchange is an `Err`.

use crate::common::{BulkIndexClient, BulkPayload, BulkResponse, IndexConfig, IndexerError, Result};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Url};
use tracing::debug;

const NDJSON: &str = "application/x-ndjson";

/// [`BulkIndexClient`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ElasticBulkClient {
    client: Client,
    base_url: Url,
}

impl ElasticBulkClient {
    pub fn new(config: &IndexConfig) -> Result<Self> {
        let base_url = Url::parse(&config.url)
            .map_err(|e| IndexerError::config(format!("invalid index url '{}': {}", config.url, e)))?;
        if base_url.cannot_be_a_base() || !matches!(base_url.scheme(), "http" | "https") {
            return Err(IndexerError::config(format!(
                "index url '{}' is not an http(s) endpoint",
                config.url
            )));
        }

        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| IndexerError::config(format!("failed to build http client: {}", e)))?;

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// `path` appended to the base URL, keeping any base path prefix.
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    async fn read_response(response: reqwest::Response) -> Result<BulkResponse> {
        let http_status = response.status().as_u16();
        let raw_response = response.text().await?;
        Ok(BulkResponse {
            success: true,
            http_status,
            raw_response,
        })
    }
}

#[async_trait]
impl BulkIndexClient for ElasticBulkClient {
    async fn submit(&self, payload: &BulkPayload) -> Result<BulkResponse> {
        let url = self.endpoint("_bulk");
        debug!("POST {} ({} items)", url, payload.len());

        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, NDJSON)
            .body(payload.to_ndjson())
            .send()
            .await?;
        Self::read_response(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(url: &str) -> IndexConfig {
        IndexConfig {
            url: url.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_malformed_url_is_config_error() {
        let err = ElasticBulkClient::new(&config("not a url")).unwrap_err();
        assert!(matches!(err, IndexerError::Config(_)));

        let err = ElasticBulkClient::new(&config("ftp://search:21")).unwrap_err();
        assert!(matches!(err, IndexerError::Config(_)));
    }

    #[test]
    fn test_endpoints() {
        let client = ElasticBulkClient::new(&config("http://localhost:9200")).unwrap();
        assert_eq!(client.endpoint("_bulk"), "http://localhost:9200/_bulk");
        assert_eq!(
            client.endpoint("projects/_refresh"),
            "http://localhost:9200/projects/_refresh"
        );

        let client = ElasticBulkClient::new(&config("https://search.internal/es/")).unwrap();
        assert_eq!(client.endpoint("/_bulk"), "https://search.internal/es/_bulk");
    }
}
