//! Request orchestration: route → select → token → execute → classify →
//! record, with account-switching retries under a wall-clock budget.

mod stream;

pub use stream::{StreamHandle, StreamOutcome};


use bytes::Bytes;
use chrono::Utc;
use modelgate_types::{
    ErrorKind, ExecuteRequest, GatewayError, GatewayRequest, GatewayResponse, GatewayResult,
    ParsedError, Provider, RequestLogEntry, UpstreamResponse,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::classify::Classifier;
use crate::config::RetryConfig;
use crate::fleet::{AccountState, AccountStateStore, SelectError, Selector};
use crate::providers::{size_fallback_tokens, ProviderAdapter, ProviderRegistry};
use crate::proxy_pool::ProxyPool;
use crate::quota::QuotaTracker;
use crate::repo::Repository;
use crate::router::ModelRouter;
use crate::stats::StatsWriter;
use crate::token::TokenCache;
use crate::upstream::HttpExecutor;

pub struct Executor {
    router: Arc<ModelRouter>,
    selector: Arc<Selector>,
    fleet: Arc<AccountStateStore>,
    quota: Arc<QuotaTracker>,
    tokens: Arc<TokenCache>,
    proxies: Arc<ProxyPool>,
    registry: Arc<ProviderRegistry>,
    classifier: Arc<Classifier>,
    http: Arc<dyn HttpExecutor>,
    repo: Arc<dyn Repository>,
    stats: StatsWriter,
    retry: RetryConfig,
}

/// How `pick_account` resolved this attempt.
enum Pick {
    /// No pin; fall through to the selector.
    Selector,
    Pinned(AccountState),
    /// The pinned account was already attempted; retrying it is pointless.
    PinnedExhausted,
}

/// Why the retry loop stopped without a success.
enum LoopExit {
    AllBlocked { retry_at: chrono::DateTime<Utc> },
    BudgetExhausted,
    PinnedFailed,
}

/// Book-keeping shared by the streaming and non-streaming retry loops.
struct RetryState {
    attempted: HashSet<String>,
    switched_from: Option<String>,
    last_failure: Option<UpstreamResponse>,
    last_error: Option<GatewayError>,
    attempts: u32,
    deadline: Instant,
}

impl RetryState {
    fn new(deadline: Instant) -> Self {
        Self {
            attempted: HashSet::new(),
            switched_from: None,
            last_failure: None,
            last_error: None,
            attempts: 0,
            deadline,
        }
    }

    fn note_failure(&mut self, account_id: &str) {
        self.attempted.insert(account_id.to_string());
        self.switched_from = Some(account_id.to_string());
    }

    fn budget_spent(&self, max_attempts: u32) -> bool {
        self.attempts >= max_attempts || Instant::now() >= self.deadline
    }
}

impl Executor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        router: Arc<ModelRouter>,
        selector: Arc<Selector>,
        fleet: Arc<AccountStateStore>,
        quota: Arc<QuotaTracker>,
        tokens: Arc<TokenCache>,
        proxies: Arc<ProxyPool>,
        registry: Arc<ProviderRegistry>,
        classifier: Arc<Classifier>,
        http: Arc<dyn HttpExecutor>,
        repo: Arc<dyn Repository>,
        stats: StatsWriter,
        retry: RetryConfig,
    ) -> Self {
        Self {
            router,
            selector,
            fleet,
            quota,
            tokens,
            proxies,
            registry,
            classifier,
            http,
            repo,
            stats,
            retry,
        }
    }

    /// Non-streaming path. On success the upstream body goes back translated;
    /// on exhausted retries the last upstream status and body are preserved
    /// verbatim so the client sees the provider's own error.
    pub async fn execute(&self, req: GatewayRequest) -> GatewayResult<GatewayResponse> {
        let target = self.router.route(&req.model).await?;
        let provider = self.repo.get_provider(&target.provider_id).await?;
        let adapter = self.registry.require(&provider.id)?;

        let mut state = RetryState::new(Instant::now() + self.retry.max_wait());

        let exit = loop {
            let account = match self.resolve_account(&req, &provider, &target.upstream_model, &mut state).await {
                Ok(account) => account,
                Err(ResolveStop::Exit(exit)) => break exit,
                Err(ResolveStop::Fatal(err)) => return Err(err),
            };

            state.attempts += 1;
            tracing::debug!(
                model = %target.upstream_model,
                account = %account.account.id,
                attempt = state.attempts,
                "dispatching upstream request"
            );

            let exec_req = match self
                .prepare_request(&req, adapter.as_ref(), &target.upstream_model, &account, &mut state)
                .await
            {
                Ok(Some(exec_req)) => exec_req,
                Ok(None) => {
                    if state.budget_spent(self.retry.max_attempts) {
                        break LoopExit::BudgetExhausted;
                    }
                    continue;
                }
                Err(err) => return Err(err),
            };

            let response = match self.http.execute(&provider, &exec_req).await {
                Ok(response) => response,
                Err(e) => {
                    self.note_transport_failure(&account, &target.upstream_model, &e).await;
                    state.note_failure(&account.account.id);
                    state.last_error = Some(e);
                    if state.budget_spent(self.retry.max_attempts) {
                        break LoopExit::BudgetExhausted;
                    }
                    continue;
                }
            };

            let parsed = self.classifier.classify(
                Some(adapter.as_ref()),
                response.status,
                response.header("retry-after"),
                &response.body,
            );
            self.fleet
                .mark_result(&account.account.id, &target.upstream_model, &parsed);

            match parsed.kind {
                ErrorKind::Success => {
                    return self
                        .finish_success(&req, &provider, adapter.as_ref(), &target.upstream_model, &account, response, &state)
                        .await;
                }
                ErrorKind::QuotaExceeded => {
                    self.quota
                        .mark_exhausted(&account.account.id, &target.upstream_model)
                        .await;
                    if let Some(proxy_id) = &account.account.proxy_id {
                        self.proxies.mark_degraded(proxy_id).await;
                    }
                }
                ErrorKind::RateLimit | ErrorKind::AuthFailed | ErrorKind::Transient => {
                    if let Some(proxy_id) = &account.account.proxy_id {
                        self.proxies.mark_degraded(proxy_id).await;
                    }
                }
                ErrorKind::InvalidRequest | ErrorKind::UpstreamError => {
                    // Not retryable: hand the upstream answer back verbatim.
                    self.record_log(
                        &req,
                        &provider,
                        Some(&account),
                        response.status,
                        response.latency_ms,
                        &state,
                        Some(parsed.message.clone()),
                    );
                    return Err(GatewayError::Upstream {
                        status: response.status,
                        body: response.body,
                    });
                }
            }

            state.note_failure(&account.account.id);
            state.last_failure = Some(response);
            if state.budget_spent(self.retry.max_attempts) {
                break LoopExit::BudgetExhausted;
            }
        };

        self.finish_failure(&req, &provider, exit, state)
    }

    /// Streaming path: identical selection/token/retry discipline, but a 2xx
    /// upstream hands the SSE body to a forwarder task and returns a handle.
    pub async fn execute_stream(&self, req: GatewayRequest) -> GatewayResult<StreamHandle> {
        let target = self.router.route(&req.model).await?;
        let provider = self.repo.get_provider(&target.provider_id).await?;
        let adapter = self.registry.require(&provider.id)?;

        if !adapter.supports_streaming() {
            return Err(GatewayError::InvalidRequest(format!(
                "provider '{}' does not support streaming",
                provider.id
            )));
        }

        let mut state = RetryState::new(Instant::now() + self.retry.max_wait());

        let exit = loop {
            let account = match self.resolve_account(&req, &provider, &target.upstream_model, &mut state).await {
                Ok(account) => account,
                Err(ResolveStop::Exit(exit)) => break exit,
                Err(ResolveStop::Fatal(err)) => return Err(err),
            };

            state.attempts += 1;
            let exec_req = match self
                .prepare_request(&req, adapter.as_ref(), &target.upstream_model, &account, &mut state)
                .await
            {
                Ok(Some(exec_req)) => exec_req,
                Ok(None) => {
                    if state.budget_spent(self.retry.max_attempts) {
                        break LoopExit::BudgetExhausted;
                    }
                    continue;
                }
                Err(err) => return Err(err),
            };

            let sse = match self.http.execute_stream(&provider, &exec_req).await {
                Ok(sse) => sse,
                Err(e) => {
                    self.note_transport_failure(&account, &target.upstream_model, &e).await;
                    state.note_failure(&account.account.id);
                    state.last_error = Some(e);
                    if state.budget_spent(self.retry.max_attempts) {
                        break LoopExit::BudgetExhausted;
                    }
                    continue;
                }
            };

            if (200..300).contains(&sse.status) {
                return Ok(stream::spawn_forwarder(
                    stream::ForwardContext {
                        account_id: account.account.id.clone(),
                        proxy_id: account.account.proxy_id.clone(),
                        provider_id: provider.id.clone(),
                        client_model: req.model.clone(),
                        upstream_model: target.upstream_model.clone(),
                        adapter: Arc::clone(&adapter),
                        fleet: Arc::clone(&self.fleet),
                        quota: Arc::clone(&self.quota),
                        proxies: Arc::clone(&self.proxies),
                        stats: self.stats.clone(),
                        retry_count: state.attempts - 1,
                        switched_from: state.switched_from.clone(),
                    },
                    sse,
                ));
            }

            // Upstream refused before any SSE data: collect the error body
            // and treat it exactly like the non-streaming path.
            let response = stream::drain_error_body(sse).await;
            let parsed = self.classifier.classify(
                Some(adapter.as_ref()),
                response.status,
                response.header("retry-after"),
                &response.body,
            );
            self.fleet
                .mark_result(&account.account.id, &target.upstream_model, &parsed);

            match parsed.kind {
                ErrorKind::QuotaExceeded => {
                    self.quota
                        .mark_exhausted(&account.account.id, &target.upstream_model)
                        .await;
                    if let Some(proxy_id) = &account.account.proxy_id {
                        self.proxies.mark_degraded(proxy_id).await;
                    }
                }
                ErrorKind::RateLimit | ErrorKind::AuthFailed | ErrorKind::Transient => {
                    if let Some(proxy_id) = &account.account.proxy_id {
                        self.proxies.mark_degraded(proxy_id).await;
                    }
                }
                ErrorKind::InvalidRequest | ErrorKind::UpstreamError => {
                    self.record_log(
                        &req,
                        &provider,
                        Some(&account),
                        response.status,
                        response.latency_ms,
                        &state,
                        Some(parsed.message.clone()),
                    );
                    return Err(GatewayError::Upstream {
                        status: response.status,
                        body: response.body,
                    });
                }
                _ => {}
            }

            state.note_failure(&account.account.id);
            state.last_failure = Some(response);
            if state.budget_spent(self.retry.max_attempts) {
                break LoopExit::BudgetExhausted;
            }
        };

        match self.finish_failure::<GatewayResponse>(&req, &provider, exit, state) {
            Err(err) => Err(err),
            Ok(_) => Err(GatewayError::Internal(
                "stream failure path produced a response".to_string(),
            )),
        }
    }

    /// Resolve the account for one attempt: the pin when present, otherwise
    /// the selector with the attempted set excluded.
    async fn resolve_account(
        &self,
        req: &GatewayRequest,
        provider: &Provider,
        model: &str,
        state: &mut RetryState,
    ) -> Result<AccountState, ResolveStop> {
        match self.pick_pinned(req, &state.attempted) {
            Ok(Pick::Pinned(account)) => Ok(account),
            Ok(Pick::PinnedExhausted) => Err(ResolveStop::Exit(LoopExit::PinnedFailed)),
            Ok(Pick::Selector) => match self
                .selector
                .select_excluding(&provider.id, model, &state.attempted)
                .await
            {
                Ok(account) => Ok(account),
                Err(SelectError::AllBlocked { retry_at }) => {
                    Err(ResolveStop::Exit(LoopExit::AllBlocked { retry_at }))
                }
            },
            Err(err) => Err(ResolveStop::Fatal(err)),
        }
    }

    fn pick_pinned(&self, req: &GatewayRequest, attempted: &HashSet<String>) -> GatewayResult<Pick> {
        let Some(pinned) = &req.pinned_account_id else {
            return Ok(Pick::Selector);
        };
        if attempted.contains(pinned) {
            return Ok(Pick::PinnedExhausted);
        }
        match self.fleet.get(pinned) {
            Some(account) => Ok(Pick::Pinned(account)),
            None => Err(GatewayError::InvalidRequest(format!(
                "unknown pinned account '{}'",
                pinned
            ))),
        }
    }

    /// Acquire the token and build the canonical upstream request.
    /// `Ok(None)` means the token failed and the account was marked; the
    /// caller decides whether the budget allows another spin.
    async fn prepare_request(
        &self,
        req: &GatewayRequest,
        adapter: &dyn ProviderAdapter,
        model: &str,
        account: &AccountState,
        state: &mut RetryState,
    ) -> GatewayResult<Option<ExecuteRequest>> {
        let token = match self.tokens.get(&account.account).await {
            Ok(token) => token,
            Err(e) => {
                // Token acquisition failures classify as auth_failed
                let parsed = ParsedError::new(
                    ErrorKind::AuthFailed,
                    None,
                    format!("token acquisition: {}", e),
                );
                self.fleet.mark_result(&account.account.id, model, &parsed);
                state.note_failure(&account.account.id);
                state.last_error = Some(e);
                return Ok(None);
            }
        };

        let payload = adapter.translate_request(&req.payload, model)?;
        Ok(Some(ExecuteRequest {
            upstream_model: model.to_string(),
            payload: Bytes::from(payload),
            proxy_url: account.account.proxy_url.clone(),
            token,
        }))
    }

    async fn note_transport_failure(
        &self,
        account: &AccountState,
        model: &str,
        error: &GatewayError,
    ) {
        if let Some(proxy_id) = &account.account.proxy_id {
            self.proxies.mark_down(proxy_id, &error.to_string()).await;
        }
        let parsed = ParsedError::new(
            ErrorKind::Transient,
            Some(Duration::from_secs(60)),
            error.to_string(),
        );
        self.fleet.mark_result(&account.account.id, model, &parsed);
    }

    async fn finish_success(
        &self,
        req: &GatewayRequest,
        provider: &Provider,
        adapter: &dyn ProviderAdapter,
        model: &str,
        account: &AccountState,
        response: UpstreamResponse,
        state: &RetryState,
    ) -> GatewayResult<GatewayResponse> {
        let mut tokens_used = adapter.extract_tokens(&response.body);
        if tokens_used == 0 {
            tokens_used = size_fallback_tokens(&response.body);
        }
        self.quota
            .record_usage(&account.account.id, model, tokens_used)
            .await;

        if let Some(proxy_id) = &account.account.proxy_id {
            self.proxies.mark_healthy(proxy_id).await;
        }

        self.record_log(
            req,
            provider,
            Some(account),
            response.status,
            response.latency_ms,
            state,
            None,
        );

        let payload = adapter.translate_response(&response.body)?;
        Ok(GatewayResponse {
            status_code: response.status,
            payload: Bytes::from(payload),
        })
    }

    fn finish_failure<T>(
        &self,
        req: &GatewayRequest,
        provider: &Provider,
        exit: LoopExit,
        state: RetryState,
    ) -> GatewayResult<T> {
        let status = state.last_failure.as_ref().map_or(0, |r| r.status);
        let latency = state.last_failure.as_ref().map_or(0, |r| r.latency_ms);
        let error_msg = match &state.last_failure {
            Some(_) => None,
            None => state.last_error.as_ref().map(ToString::to_string),
        };
        self.record_log(req, provider, None, status, latency, &state, error_msg);

        match (exit, state.last_failure) {
            // The fleet never took the request at all
            (LoopExit::AllBlocked { retry_at }, None) => {
                Err(GatewayError::NoEligibleAccount { retry_at })
            }
            // Retries exhausted: the upstream answer goes back as-is
            (_, Some(response)) => Err(GatewayError::Upstream {
                status: response.status,
                body: response.body,
            }),
            (_, None) => Err(state
                .last_error
                .unwrap_or_else(|| GatewayError::Internal("retry loop made no attempt".to_string()))),
        }
    }

    fn record_log(
        &self,
        req: &GatewayRequest,
        provider: &Provider,
        account: Option<&AccountState>,
        status: u16,
        latency_ms: u64,
        state: &RetryState,
        error: Option<String>,
    ) {
        // The prior account only counts as a switch if it differs from the
        // one that answered.
        let account_id = account.map(|a| a.account.id.clone());
        let switched = state
            .switched_from
            .clone()
            .filter(|from| Some(from) != account_id.as_ref());
        self.stats.record(RequestLogEntry {
            account_id,
            proxy_id: account.and_then(|a| a.account.proxy_id.clone()),
            provider_id: Some(provider.id.clone()),
            model: req.model.clone(),
            status_code: i32::from(status),
            latency_ms: latency_ms as i64,
            retry_count: state.attempts.saturating_sub(1) as i32,
            switched_from_account_id: switched,
            error,
            created_at: Utc::now(),
        });
    }
}

enum ResolveStop {
    Exit(LoopExit),
    Fatal(GatewayError),
}
