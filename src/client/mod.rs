//! REST client wrapper
//!
//! [`Client`] resolves paths against a base URL, sends JSON bodies, checks
//! status codes and decodes JSON responses. Timeout and default headers are
//! configured into the transport once; retries follow the configured
//! [`RetryPolicy`] for every call.
//!
//! ```no_run
//! use servekit::client::{Client, ClientConfig};
//! use servekit::Context;
//!
//! # async fn run() -> servekit::Result<()> {
//! let client = Client::new(ClientConfig::from_env()?)?;
//! let user: serde_json::Value = client.get(&Context::background(), "/users/1").await?;
//! println!("{}", user);
//! # Ok(())
//! # }
//! ```

mod config;
pub mod retry;
pub mod transport;

pub use config::ClientConfig;
pub use retry::RetryPolicy;
pub use transport::{ReqwestTransport, Transport, TransportRequest, TransportResponse};

use bytes::Bytes;
use futures::TryStreamExt;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::context::Context;
use crate::error::{Error, Result};

pub struct Client<T = ReqwestTransport> {
    transport: T,
    config: ClientConfig,
    retry: RetryPolicy,
}

impl Client<ReqwestTransport> {
    /// Build a client on top of reqwest
    pub fn new(config: ClientConfig) -> Result<Self> {
        let transport = ReqwestTransport::new(&config)?;
        Ok(Self::with_transport(config, transport))
    }
}

impl<T: Transport> Client<T> {
    pub fn with_transport(config: ClientConfig, transport: T) -> Self {
        let retry = RetryPolicy::from_config(&config);
        Self {
            transport,
            config,
            retry,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Resolve `path` against the base URL; absolute URLs pass through.
    pub fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        let base = self.config.base_url.trim_end_matches('/');
        if path.is_empty() {
            return base.to_string();
        }
        format!("{}/{}", base, path.trim_start_matches('/'))
    }

    /// GET `path`; only 200 counts as success.
    pub async fn get<R>(&self, ctx: &Context, path: &str) -> Result<R>
    where
        R: DeserializeOwned,
    {
        let response = self.execute(ctx, Method::GET, path, None).await?;
        read_json(ctx, response, &[StatusCode::OK]).await
    }

    /// POST `body` as JSON; 200 and 201 count as success.
    pub async fn post<B, R>(&self, ctx: &Context, path: &str, body: &B) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let body = Bytes::from(serde_json::to_vec(body)?);
        let response = self.execute(ctx, Method::POST, path, Some(body)).await?;
        read_json(ctx, response, &[StatusCode::OK, StatusCode::CREATED]).await
    }

    /// PUT `body` as JSON; only 200 counts as success.
    pub async fn put<B, R>(&self, ctx: &Context, path: &str, body: &B) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let body = Bytes::from(serde_json::to_vec(body)?);
        let response = self.execute(ctx, Method::PUT, path, Some(body)).await?;
        read_json(ctx, response, &[StatusCode::OK]).await
    }

    /// DELETE `path`; 200 and 204 count as success and the body is ignored.
    pub async fn delete(&self, ctx: &Context, path: &str) -> Result<()> {
        let response = self.execute(ctx, Method::DELETE, path, None).await?;
        check_status(response, &[StatusCode::OK, StatusCode::NO_CONTENT]).map(drop)
    }

    /// Stream the body of `GET path` into `sink` and return the byte count.
    ///
    /// Bytes already written stay in the sink if the transfer fails midway.
    pub async fn download<W>(&self, ctx: &Context, path: &str, sink: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        let response = self.execute(ctx, Method::GET, path, None).await?;
        let response = check_status(response, &[StatusCode::OK])?;

        ctx.run(async {
            let mut body = response.into_stream();
            let mut written = 0u64;
            while let Some(chunk) = body.try_next().await? {
                sink.write_all(&chunk).await?;
                written += chunk.len() as u64;
            }
            sink.flush().await?;
            tracing::debug!("Downloaded {} bytes from {}", written, path);
            Ok::<_, Error>(written)
        })
        .await?
    }

    /// Send one logical request, retrying per policy, under `ctx`.
    async fn execute(
        &self,
        ctx: &Context,
        method: Method,
        path: &str,
        body: Option<Bytes>,
    ) -> Result<TransportResponse> {
        let url = self.url(path);

        let attempts = retry::retry(&self.retry, Error::is_retryable, |attempt| {
            let request = TransportRequest {
                method: method.clone(),
                url: url.clone(),
                body: body.clone(),
            };
            async move {
                tracing::debug!("{} {} (attempt {})", request.method, request.url, attempt + 1);
                let response = self.transport.send(request).await?;
                let status = Error::Status(response.status());
                if status.is_retryable() {
                    return Err(status);
                }
                Ok(response)
            }
        });

        ctx.run(attempts).await?
    }
}

impl<T> std::fmt::Debug for Client<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.config)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

fn check_status(response: TransportResponse, accepted: &[StatusCode]) -> Result<TransportResponse> {
    if accepted.contains(&response.status()) {
        Ok(response)
    } else {
        Err(Error::Status(response.status()))
    }
}

async fn read_json<R>(ctx: &Context, response: TransportResponse, accepted: &[StatusCode]) -> Result<R>
where
    R: DeserializeOwned,
{
    let response = check_status(response, accepted)?;
    let body = ctx.run(response.bytes()).await??;
    Ok(serde_json::from_slice(&body)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde::Deserialize;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Replays canned responses in order and records what was sent
    struct ScriptedTransport {
        responses: Mutex<VecDeque<(StatusCode, &'static str)>>,
        requests: Mutex<Vec<TransportRequest>>,
    }

    impl ScriptedTransport {
        fn new(responses: &[(StatusCode, &'static str)]) -> Self {
            Self {
                responses: Mutex::new(responses.iter().copied().collect()),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn sent(&self) -> Vec<TransportRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&self, request: TransportRequest) -> Result<TransportResponse> {
            self.requests.lock().unwrap().push(request);
            let (status, body) = self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .expect("no scripted response left");
            Ok(TransportResponse::from_bytes(status, body))
        }
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Item {
        id: u32,
        name: String,
    }

    fn client(responses: &[(StatusCode, &'static str)]) -> Client<ScriptedTransport> {
        let config = ClientConfig::new("http://api.test/v1/").with_retry(2, Duration::from_millis(1));
        Client::with_transport(config, ScriptedTransport::new(responses))
    }

    #[test]
    fn test_url_resolution() {
        let client = client(&[]);
        assert_eq!(client.url("/items/1"), "http://api.test/v1/items/1");
        assert_eq!(client.url("items"), "http://api.test/v1/items");
        assert_eq!(client.url("https://other.test/x"), "https://other.test/x");
    }

    #[tokio::test]
    async fn test_get_decodes_json() {
        let client = client(&[(StatusCode::OK, r#"{"id":1,"name":"widget"}"#)]);
        let item: Item = client.get(&Context::background(), "/items/1").await.unwrap();
        assert_eq!(item, Item { id: 1, name: "widget".into() });

        let sent = client.transport().sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].method, Method::GET);
        assert!(sent[0].body.is_none());
    }

    #[tokio::test]
    async fn test_get_rejects_created() {
        let client = client(&[(StatusCode::CREATED, "{}")]);
        let result: Result<serde_json::Value> = client.get(&Context::background(), "/x").await;
        assert!(matches!(result, Err(Error::Status(StatusCode::CREATED))));
    }

    #[tokio::test]
    async fn test_post_sends_json_body() {
        let client = client(&[(StatusCode::CREATED, r#"{"id":7,"name":"new"}"#)]);
        let body = serde_json::json!({"name": "new"});
        let item: Item = client.post(&Context::background(), "/items", &body).await.unwrap();
        assert_eq!(item.id, 7);

        let sent = client.transport().sent();
        assert_eq!(sent[0].method, Method::POST);
        assert_eq!(sent[0].body.as_deref(), Some(br#"{"name":"new"}"#.as_slice()));
    }

    #[tokio::test]
    async fn test_put_requires_ok() {
        let client = client(&[(StatusCode::ACCEPTED, "{}")]);
        let result: Result<serde_json::Value> =
            client.put(&Context::background(), "/items/1", &serde_json::json!({})).await;
        assert!(matches!(result, Err(Error::Status(StatusCode::ACCEPTED))));
    }

    #[tokio::test]
    async fn test_delete_accepts_no_content() {
        let client = client(&[(StatusCode::NO_CONTENT, ""), (StatusCode::NOT_FOUND, "")]);
        client.delete(&Context::background(), "/items/1").await.unwrap();
        let err = client.delete(&Context::background(), "/items/1").await.unwrap_err();
        assert_eq!(err.to_string(), "request failed with status: 404 Not Found");
    }

    #[tokio::test]
    async fn test_invalid_json_is_parse_error() {
        let client = client(&[(StatusCode::OK, "not json")]);
        let result: Result<Item> = client.get(&Context::background(), "/items/1").await;
        assert!(matches!(result, Err(Error::Json(_))));
    }

    #[tokio::test]
    async fn test_shape_mismatch_is_parse_error() {
        let client = client(&[(StatusCode::OK, r#"{"id":"one"}"#)]);
        let result: Result<Item> = client.get(&Context::background(), "/items/1").await;
        assert!(matches!(result, Err(Error::Json(_))));
    }

    #[tokio::test]
    async fn test_retries_server_errors_then_succeeds() {
        let client = client(&[
            (StatusCode::INTERNAL_SERVER_ERROR, ""),
            (StatusCode::BAD_GATEWAY, ""),
            (StatusCode::OK, r#"{"id":1,"name":"late"}"#),
        ]);
        let item: Item = client.get(&Context::background(), "/items/1").await.unwrap();
        assert_eq!(item.name, "late");
        assert_eq!(client.transport().sent().len(), 3);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let client = client(&[
            (StatusCode::SERVICE_UNAVAILABLE, ""),
            (StatusCode::SERVICE_UNAVAILABLE, ""),
            (StatusCode::SERVICE_UNAVAILABLE, ""),
        ]);
        let result: Result<Item> = client.get(&Context::background(), "/items/1").await;
        assert!(matches!(result, Err(Error::Status(StatusCode::SERVICE_UNAVAILABLE))));
        assert_eq!(client.transport().sent().len(), 3);
    }

    #[tokio::test]
    async fn test_client_errors_not_retried() {
        let client = client(&[(StatusCode::BAD_REQUEST, "")]);
        let result: Result<Item> = client.get(&Context::background(), "/items/1").await;
        assert!(matches!(result, Err(Error::Status(StatusCode::BAD_REQUEST))));
        assert_eq!(client.transport().sent().len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_context_sends_nothing() {
        let client = client(&[(StatusCode::OK, "{}")]);
        let ctx = Context::background();
        ctx.cancel();
        let result: Result<serde_json::Value> = client.get(&ctx, "/items").await;
        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(client.transport().sent().is_empty());
    }

    #[tokio::test]
    async fn test_download_into_buffer() {
        let client = client(&[(StatusCode::OK, "raw bytes, not json")]);
        let mut sink: Vec<u8> = Vec::new();
        let written = client
            .download(&Context::background(), "/files/a.bin", &mut sink)
            .await
            .unwrap();
        assert_eq!(written, 19);
        assert_eq!(sink, b"raw bytes, not json");
    }

    #[tokio::test]
    async fn test_download_requires_ok() {
        let client = client(&[(StatusCode::NO_CONTENT, "")]);
        let mut sink: Vec<u8> = Vec::new();
        let result = client.download(&Context::background(), "/files/a.bin", &mut sink).await;
        assert!(matches!(result, Err(Error::Status(StatusCode::NO_CONTENT))));
        assert!(sink.is_empty());
    }

    /// Answers 200 with a body that breaks after its first chunk
    struct BrokenBodyTransport;

    #[async_trait]
    impl Transport for BrokenBodyTransport {
        async fn send(&self, _request: TransportRequest) -> Result<TransportResponse> {
            let body = futures::stream::iter(vec![
                Ok(bytes::Bytes::from_static(b"part")),
                Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "reset",
                ))),
            ]);
            Ok(TransportResponse::new(StatusCode::OK, body))
        }
    }

    #[tokio::test]
    async fn test_download_keeps_partial_write_on_stream_error() {
        let client = Client::with_transport(ClientConfig::new("http://api.test"), BrokenBodyTransport);
        let mut sink = Vec::new();
        let result = client.download(&Context::background(), "/files/a.bin", &mut sink).await;

        assert!(matches!(&result, Err(Error::Io(err)) if err.kind() == std::io::ErrorKind::ConnectionReset));
        assert_eq!(sink, b"part");
    }
}
