//! Endpoint client for the sdsc2 commercial district API
//!
//! A [`PageSource`] fetches exactly one page and never retries; retries are
//! the job of [`RetryExecutor`](crate::retry::RetryExecutor). [`ApiClient`]
//! is the HTTP implementation, tests substitute their own sources.

mod endpoints;
mod envelope;
mod resolver;

pub use endpoints::{CategoryScope, EndpointSpec};
pub use envelope::{classify_status, classify_transport, decode_page, next_cursor};
pub use resolver::{Region, RegionResolver};

use async_trait::async_trait;
use tracing::debug;

use sdsc_common::types::{PageRequest, PageResult};

use crate::config::ApiConfig;
use crate::error::{FetchError, IngestError, IngestResult};

/// Anything able to return one page of a category listing
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch(&self, request: &PageRequest) -> Result<PageResult, FetchError>;
}

/// HTTP client for the sdsc2 endpoints
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    service_key: String,
}

impl ApiClient {
    pub fn new(config: &ApiConfig, service_key: impl Into<String>) -> IngestResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .user_agent(concat!("sdsc-ingest/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| IngestError::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            service_key: service_key.into(),
        })
    }
}

#[async_trait]
impl PageSource for ApiClient {
    async fn fetch(&self, request: &PageRequest) -> Result<PageResult, FetchError> {
        let spec = EndpointSpec::for_category(request.category);
        let url = format!("{}{}", self.base_url, spec.path);
        let page_size = spec.page_size(request.page_size);

        debug!(
            category = %request.category,
            page = request.cursor.page(),
            page_size,
            "Fetching page"
        );

        let response = self
            .http
            .get(&url)
            .query(&spec.query(request, &self.service_key))
            .send()
            .await
            .map_err(|e| classify_transport(request, &e))?;

        if let Some(error) = classify_status(request, response.status()) {
            return Err(error);
        }

        let body = response
            .text()
            .await
            .map_err(|e| classify_transport(request, &e))?;

        decode_page(request, page_size, &body)
    }
}
