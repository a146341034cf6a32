//! SSE forwarding.
//!
//! A dedicated task reads the upstream line stream, strips `data:` prefixes,
//! skips keepalives, translates each chunk through the provider adapter, and
//! pushes canonical SSE frames into a bounded channel. Usage is recorded
//! exactly once, when the stream finishes, from the final chunk's token count
//! or the payload-size fallback.

use bytes::Bytes;
use chrono::Utc;
use futures::StreamExt;
use modelgate_types::{GatewayError, ParsedError, RequestLogEntry, UpstreamResponse};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

use crate::fleet::AccountStateStore;
use crate::providers::ProviderAdapter;
use crate::proxy_pool::ProxyPool;
use crate::quota::QuotaTracker;
use crate::stats::StatsWriter;
use crate::upstream::SseStream;

/// Canonical frames buffered between the upstream reader and the client
/// writer.
const CHANNEL_CAPACITY: usize = 10;

/// Stream terminator some providers send as a literal data payload.
const DONE_SENTINEL: &str = "[DONE]";

/// What the consumer holds while the forwarder drives the body.
///
/// Contract: read `data` until it closes, flush after each frame, and drop
/// the handle on client cancellation; the forwarder notices the closed
/// channel and shuts the upstream side down.
pub struct StreamHandle {
    pub status: u16,
    pub data: mpsc::Receiver<Result<Bytes, GatewayError>>,
    pub done: oneshot::Receiver<StreamOutcome>,
}

/// Terminal accounting for one stream.
#[derive(Debug, Clone)]
pub struct StreamOutcome {
    pub status: u16,
    pub tokens: i64,
    pub chunks: u64,
    /// False when the stream aborted before its terminator.
    pub completed: bool,
}

pub(crate) struct ForwardContext {
    pub account_id: String,
    pub proxy_id: Option<String>,
    pub provider_id: String,
    pub client_model: String,
    pub upstream_model: String,
    pub adapter: Arc<dyn ProviderAdapter>,
    pub fleet: Arc<AccountStateStore>,
    pub quota: Arc<QuotaTracker>,
    pub proxies: Arc<ProxyPool>,
    pub stats: StatsWriter,
    pub retry_count: u32,
    pub switched_from: Option<String>,
}

/// Spawn the forwarder task over a live 2xx SSE body and hand back the
/// consumer handle.
pub(crate) fn spawn_forwarder(ctx: ForwardContext, sse: SseStream) -> StreamHandle {
    let (data_tx, data_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (done_tx, done_rx) = oneshot::channel();
    let status = sse.status;

    tokio::spawn(async move {
        let outcome = forward(&ctx, sse, &data_tx).await;
        settle(&ctx, &outcome).await;
        // Data channel closes when data_tx drops; done fires afterwards.
        drop(data_tx);
        let _ = done_tx.send(outcome);
    });

    StreamHandle {
        status,
        data: data_rx,
        done: done_rx,
    }
}

async fn forward(
    ctx: &ForwardContext,
    mut sse: SseStream,
    data_tx: &mpsc::Sender<Result<Bytes, GatewayError>>,
) -> StreamOutcome {
    let status = sse.status;
    let mut buffer: Vec<u8> = Vec::new();
    let mut last_payload: Vec<u8> = Vec::new();
    let mut total_bytes: usize = 0;
    let mut chunks: u64 = 0;

    while let Some(next) = sse.body.next().await {
        let chunk = match next {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::warn!(
                    account = %ctx.account_id,
                    model = %ctx.upstream_model,
                    "stream aborted: {}",
                    e
                );
                let _ = data_tx
                    .send(Err(GatewayError::Network(format!("stream aborted: {}", e))))
                    .await;
                return StreamOutcome {
                    status,
                    tokens: 0,
                    chunks,
                    completed: false,
                };
            }
        };

        buffer.extend_from_slice(&chunk);
        while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);

            // Blank lines delimit events; comment lines are keepalives
            if line.is_empty() || line.starts_with(':') {
                continue;
            }
            let Some(payload) = line.strip_prefix("data:") else {
                continue;
            };
            let payload = payload.trim_start();
            if payload == DONE_SENTINEL {
                return StreamOutcome {
                    status,
                    tokens: final_tokens(ctx, &last_payload, total_bytes),
                    chunks,
                    completed: true,
                };
            }

            let translated = match ctx.adapter.translate_chunk(payload.as_bytes()) {
                Ok(translated) => translated,
                Err(e) => {
                    tracing::warn!("chunk translation failed, passing through: {}", e);
                    payload.as_bytes().to_vec()
                }
            };

            total_bytes += translated.len();
            last_payload = payload.as_bytes().to_vec();
            chunks += 1;

            let frame = Bytes::from(format!(
                "data: {}\n\n",
                String::from_utf8_lossy(&translated)
            ));
            if data_tx.send(Ok(frame)).await.is_err() {
                // Consumer hung up (client cancel): close upstream and drain.
                tracing::debug!(account = %ctx.account_id, "stream consumer gone, stopping");
                return StreamOutcome {
                    status,
                    tokens: 0,
                    chunks,
                    completed: false,
                };
            }
        }
    }

    // Upstream closed without a sentinel; still a clean end-of-stream.
    StreamOutcome {
        status,
        tokens: final_tokens(ctx, &last_payload, total_bytes),
        chunks,
        completed: true,
    }
}

fn final_tokens(ctx: &ForwardContext, last_payload: &[u8], total_bytes: usize) -> i64 {
    let extracted = ctx.adapter.extract_tokens(last_payload);
    if extracted > 0 {
        extracted
    } else {
        (total_bytes / 4) as i64
    }
}

/// At-end accounting: one usage record per stream, success state only for
/// streams that reached their terminator.
async fn settle(ctx: &ForwardContext, outcome: &StreamOutcome) {
    if outcome.completed {
        ctx.fleet
            .mark_result(&ctx.account_id, &ctx.upstream_model, &ParsedError::success());
        if let Some(proxy_id) = &ctx.proxy_id {
            ctx.proxies.mark_healthy(proxy_id).await;
        }
    }
    ctx.quota
        .record_usage(&ctx.account_id, &ctx.upstream_model, outcome.tokens)
        .await;

    ctx.stats.record(RequestLogEntry {
        account_id: Some(ctx.account_id.clone()),
        proxy_id: ctx.proxy_id.clone(),
        provider_id: Some(ctx.provider_id.clone()),
        model: ctx.client_model.clone(),
        status_code: i32::from(outcome.status),
        latency_ms: 0,
        retry_count: ctx.retry_count as i32,
        switched_from_account_id: ctx
            .switched_from
            .clone()
            .filter(|from| from != &ctx.account_id),
        error: (!outcome.completed).then(|| "stream aborted".to_string()),
        created_at: Utc::now(),
    });
}

/// Collect a non-2xx streaming response's body so it can be classified like
/// a regular error response.
pub(crate) async fn drain_error_body(mut sse: SseStream) -> UpstreamResponse {
    const MAX_ERROR_BODY: usize = 64 * 1024;
    let mut body: Vec<u8> = Vec::new();
    while let Some(Ok(chunk)) = sse.body.next().await {
        body.extend_from_slice(&chunk);
        if body.len() >= MAX_ERROR_BODY {
            break;
        }
    }
    UpstreamResponse {
        status: sse.status,
        headers: sse.headers,
        body: Bytes::from(body),
        latency_ms: 0,
    }
}
