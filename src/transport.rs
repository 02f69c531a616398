//! HTTP transport abstraction.
//!
//! The driver never owns a global client: every [`Connection`] is handed a
//! [`Transport`], either its own `reqwest::Client` or one shared by the
//! caller across connections.
//!
//! [`Connection`]: crate::connection::Connection

use std::io::Write;

use async_trait::async_trait;
use bytes::Bytes;
use flate2::Compression;
use flate2::write::GzEncoder;
use http::{HeaderMap, Method, StatusCode};
use url::Url;

use crate::error::ChResult;

/// An outgoing request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl HttpRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }
}

/// A fully received response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Sends requests to the server.
///
/// Implementations must be safe to share between connections; failures are
/// reported as [`ChError::Transport`](crate::error::ChError::Transport).
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> ChResult<HttpResponse>;
}

#[async_trait]
impl Transport for reqwest::Client {
    async fn send(&self, request: HttpRequest) -> ChResult<HttpResponse> {
        let response = self
            .request(request.method, request.url)
            .headers(request.headers)
            .body(request.body)
            .send()
            .await?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

/// Gzip-compress a request body.
pub fn gzip(data: &[u8]) -> ChResult<Bytes> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    encoder.write_all(data)?;
    Ok(Bytes::from(encoder.finish()?))
}

/// True when `body` starts with the gzip magic bytes.
pub fn is_gzip(body: &[u8]) -> bool {
    body.starts_with(&[0x1f, 0x8b])
}
