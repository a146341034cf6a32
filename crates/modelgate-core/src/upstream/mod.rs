//! Upstream HTTP execution.
//!
//! The pipeline talks to providers through the `HttpExecutor` trait; the
//! reqwest implementation routes each call through the account's permanent
//! proxy client and reports raw status/body for classification. Tests swap in
//! scripted executors.

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use futures::StreamExt;
use modelgate_types::{ExecuteRequest, GatewayError, GatewayResult, Provider, UpstreamResponse};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::proxy_pool::ProxyPool;

/// A live upstream SSE response: status first, then the raw byte stream.
pub struct SseStream {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Pin<Box<dyn Stream<Item = Result<Bytes, String>> + Send>>,
}

#[async_trait]
pub trait HttpExecutor: Send + Sync {
    /// One non-streaming call. Applies `Authorization: Bearer <token>`,
    /// honors `proxy_url`, returns raw status/headers/body.
    async fn execute(
        &self,
        provider: &Provider,
        req: &ExecuteRequest,
    ) -> GatewayResult<UpstreamResponse>;

    /// Open a streaming call and hand back the SSE reader.
    async fn execute_stream(
        &self,
        provider: &Provider,
        req: &ExecuteRequest,
    ) -> GatewayResult<SseStream>;
}

/// Pause between transport-level retries against the same endpoint.
const TRANSPORT_RETRY_DELAY: Duration = Duration::from_millis(500);

pub struct ReqwestExecutor {
    pool: Arc<ProxyPool>,
    timeout: Duration,
    /// Extra attempts after a transport failure (`proxy.max_retries`).
    /// HTTP error statuses are never retried here; that is the executor's
    /// classification loop.
    max_retries: u32,
}

impl ReqwestExecutor {
    pub fn new(pool: Arc<ProxyPool>, timeout: Duration, max_retries: u32) -> Self {
        Self {
            pool,
            timeout,
            max_retries,
        }
    }

    async fn send(
        &self,
        provider: &Provider,
        req: &ExecuteRequest,
    ) -> GatewayResult<reqwest::Response> {
        let client = self.pool.client_for(req.proxy_url.as_deref()).await?;
        let mut attempt: u32 = 0;

        loop {
            let result = client
                .post(&provider.base_url)
                .timeout(self.timeout)
                .bearer_auth(&req.token)
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(req.payload.clone())
                .send()
                .await;

            match result {
                Ok(response) => return Ok(response),
                Err(e) if attempt < self.max_retries => {
                    attempt += 1;
                    tracing::warn!(
                        "transport error at {}, retry {}/{} after {:?}: {}",
                        provider.id,
                        attempt,
                        self.max_retries,
                        TRANSPORT_RETRY_DELAY,
                        e
                    );
                    tokio::time::sleep(TRANSPORT_RETRY_DELAY).await;
                }
                Err(e) => {
                    return Err(GatewayError::Network(format!(
                        "upstream {}: {}",
                        provider.id, e
                    )))
                }
            }
        }
    }
}

fn collect_headers(response: &reqwest::Response) -> HashMap<String, String> {
    response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
        })
        .collect()
}

#[async_trait]
impl HttpExecutor for ReqwestExecutor {
    async fn execute(
        &self,
        provider: &Provider,
        req: &ExecuteRequest,
    ) -> GatewayResult<UpstreamResponse> {
        let started = Instant::now();
        let response = self.send(provider, req).await?;
        let status = response.status().as_u16();
        let headers = collect_headers(&response);
        let body = response
            .bytes()
            .await
            .map_err(|e| GatewayError::Network(format!("upstream body: {}", e)))?;

        Ok(UpstreamResponse {
            status,
            headers,
            body,
            latency_ms: started.elapsed().as_millis() as u64,
        })
    }

    async fn execute_stream(
        &self,
        provider: &Provider,
        req: &ExecuteRequest,
    ) -> GatewayResult<SseStream> {
        let response = self.send(provider, req).await?;
        let status = response.status().as_u16();
        let headers = collect_headers(&response);
        let body = response.bytes_stream().map(|chunk| chunk.map_err(|e| e.to_string()));

        Ok(SseStream {
            status,
            headers,
            body: Box::pin(body),
        })
    }
}
