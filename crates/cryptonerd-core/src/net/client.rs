//! `reqwest`-backed fetcher used outside of tests.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client};
use tracing::debug;
use url::Url;

use super::Fetcher;
use crate::error::WorkerError;
use crate::http::{Request, Response, ResponseType};

/// HTTP request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Network fetcher for a single worker origin.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
    origin: Url,
}

impl HttpFetcher {
    pub fn new(origin: Url) -> Result<Self, WorkerError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self { client, origin })
    }

    /// Same-origin responses are `Basic`; everything else was served by
    /// another origin and is treated as `Cors`.
    fn classify(&self, final_url: &Url) -> ResponseType {
        if final_url.origin() == self.origin.origin() {
            ResponseType::Basic
        } else {
            ResponseType::Cors
        }
    }

    fn request_headers(request: &Request) -> header::HeaderMap {
        let mut headers = header::HeaderMap::new();
        for (name, value) in request.headers() {
            match (
                header::HeaderName::from_bytes(name.as_bytes()),
                header::HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => debug!(header = name, "Dropping header that is not valid HTTP"),
            }
        }
        headers
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, WorkerError> {
        let response = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(Self::request_headers(request))
            .send()
            .await?;

        let status = response.status();
        let final_url = response.url().clone();
        let mut headers = std::collections::BTreeMap::new();
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                headers.insert(name.as_str().to_string(), value.to_string());
            }
        }

        let body = response.bytes().await?;

        debug!(
            url = %request.url,
            status = status.as_u16(),
            bytes = body.len(),
            "Network fetch complete"
        );

        Ok(Response {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or("").to_string(),
            headers,
            body: body.to_vec(),
            response_type: self.classify(&final_url),
            url: Some(final_url),
            from_cache: false,
        })
    }
}
