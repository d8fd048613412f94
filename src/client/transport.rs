//! The single-request seam under [`Client`](super::Client)
//!
//! A [`Transport`] issues exactly one HTTP request and hands back the status
//! and a body stream. Retries, status checks and JSON handling live above it,
//! so tests can swap in a scripted transport.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt, TryStreamExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};

use super::ClientConfig;
use crate::error::{Error, Result};

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse>;
}

#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    /// Fully resolved URL
    pub url: String,
    /// Serialized body for POST/PUT
    pub body: Option<Bytes>,
}

pub struct TransportResponse {
    status: StatusCode,
    body: BoxStream<'static, Result<Bytes>>,
}

impl TransportResponse {
    pub fn new(status: StatusCode, body: impl Stream<Item = Result<Bytes>> + Send + 'static) -> Self {
        Self {
            status,
            body: body.boxed(),
        }
    }

    /// A response whose whole body is already in memory
    pub fn from_bytes(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self::new(status, stream::iter([Ok(body.into())]))
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// The raw body, chunk by chunk
    pub fn into_stream(self) -> BoxStream<'static, Result<Bytes>> {
        self.body
    }

    /// Buffer the whole body
    pub async fn bytes(self) -> Result<Bytes> {
        let buf = self
            .body
            .try_fold(BytesMut::new(), |mut buf, chunk| async move {
                buf.extend_from_slice(&chunk);
                Ok(buf)
            })
            .await?;
        Ok(buf.freeze())
    }
}

impl std::fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

/// [`Transport`] backed by a `reqwest::Client` carrying the configured
/// timeout and default headers
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        for (key, value) in &config.headers {
            let name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| Error::Config(format!("invalid header name {:?}: {}", key, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| Error::Config(format!("invalid value for header {}: {}", key, e)))?;
            headers.insert(name, value);
        }

        let mut builder = reqwest::Client::builder().default_headers(headers);
        // zero means no timeout
        if !config.timeout.is_zero() {
            builder = builder.timeout(config.timeout);
        }

        Ok(Self {
            client: builder.build()?,
        })
    }

    /// Use an already configured reqwest client
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse> {
        let mut builder = self.client.request(request.method, &request.url);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        Ok(TransportResponse::new(
            status,
            response.bytes_stream().map_err(Error::from),
        ))
    }
}
