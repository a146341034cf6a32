//! Application state: wires every core component together once at startup.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;

use modelgate_core::classify::Classifier;
use modelgate_core::executor::Executor;
use modelgate_core::fleet::{AccountStateStore, Selector};
use modelgate_core::providers::ProviderRegistry;
use modelgate_core::proxy_pool::ProxyPool;
use modelgate_core::quota::QuotaTracker;
use modelgate_core::repo::{PgRepository, Repository};
use modelgate_core::router::ModelRouter;
use modelgate_core::stats::StatsWriter;
use modelgate_core::status::StatusService;
use modelgate_core::store::{FastStore, RedisStore};
use modelgate_core::token::{RefresherHandle, TokenCache, TokenRefresher};
use modelgate_core::upstream::ReqwestExecutor;
use modelgate_core::GatewayConfig;

const FLEET_SYNC_INTERVAL: Duration = Duration::from_secs(60);

/// Load config from MODELGATE_CONFIG (JSON file) or fall back to defaults.
pub fn load_config() -> Result<GatewayConfig> {
    match std::env::var("MODELGATE_CONFIG") {
        Ok(path) => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("reading config file {}", path))?;
            serde_json::from_str(&raw).with_context(|| format!("parsing config file {}", path))
        }
        Err(_) => Ok(GatewayConfig::default()),
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

pub struct AppStateInner {
    pub executor: Executor,
    pub status: StatusService,
    pub fleet: Arc<AccountStateStore>,
    pub proxies: Arc<ProxyPool>,
    refresher: tokio::sync::Mutex<Option<RefresherHandle>>,
    stats_task: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
    sync_task: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl AppState {
    pub async fn new(config: GatewayConfig) -> Result<Self> {
        let store: Arc<dyn FastStore> = Arc::new(
            RedisStore::connect(&config.redis_url)
                .await
                .context("connecting to redis")?,
        );
        let repo: Arc<dyn Repository> = Arc::new(
            PgRepository::connect(&config.database_url)
                .await
                .context("connecting to postgres")?,
        );

        let fleet = Arc::new(AccountStateStore::new(
            config.quota.backoff_base_secs,
            config.quota.backoff_max_secs,
        ));
        fleet
            .sync_from_repo(&*repo)
            .await
            .context("loading accounts")?;
        let sync_task = fleet.start_auto_sync(Arc::clone(&repo), FLEET_SYNC_INTERVAL);

        let proxies = Arc::new(ProxyPool::new(Arc::clone(&repo), config.proxy.clone()));
        proxies.load().await.context("loading proxies")?;

        let quota = Arc::new(QuotaTracker::new(
            Arc::clone(&store),
            Arc::clone(&repo),
            config.quota.window_ttl(),
        ));
        let selector = Arc::new(Selector::new(
            Arc::clone(&fleet),
            Arc::clone(&quota),
            Arc::clone(&store),
        ));
        let registry = Arc::new(ProviderRegistry::with_builtin());
        let router = Arc::new(ModelRouter::new(
            Arc::clone(&store),
            Arc::clone(&repo),
            &registry,
        ));
        let tokens = Arc::new(TokenCache::new(
            Arc::clone(&store),
            Arc::clone(&repo),
            config.oauth.skew(),
        ));
        let classifier = Arc::new(Classifier::new(config.cooldown.clone()));
        let http = Arc::new(ReqwestExecutor::new(
            Arc::clone(&proxies),
            Duration::from_secs(config.server.request_timeout_secs),
            config.proxy.max_retries,
        ));
        let (stats, stats_task) = StatsWriter::spawn(Arc::clone(&repo), Arc::clone(&store));

        let refresher = Arc::new(TokenRefresher::new(
            Arc::clone(&tokens),
            Arc::clone(&repo),
            config.oauth.clone(),
        ))
        .start();

        let executor = Executor::new(
            Arc::clone(&router),
            Arc::clone(&selector),
            Arc::clone(&fleet),
            Arc::clone(&quota),
            Arc::clone(&tokens),
            Arc::clone(&proxies),
            Arc::clone(&registry),
            Arc::clone(&classifier),
            http,
            Arc::clone(&repo),
            stats.clone(),
            config.retry.clone(),
        );

        let status = StatusService::new(
            Arc::clone(&fleet),
            Arc::clone(&quota),
            Arc::clone(&proxies),
            Arc::clone(&repo),
            Arc::clone(&store),
        );

        Ok(Self {
            inner: Arc::new(AppStateInner {
                executor,
                status,
                fleet,
                proxies,
                refresher: tokio::sync::Mutex::new(Some(refresher)),
                stats_task: tokio::sync::Mutex::new(Some(stats_task)),
                sync_task: tokio::sync::Mutex::new(Some(sync_task)),
            }),
        })
    }

    pub fn executor(&self) -> &Executor {
        &self.inner.executor
    }

    pub fn status(&self) -> &StatusService {
        &self.inner.status
    }

    pub fn proxies(&self) -> &Arc<ProxyPool> {
        &self.inner.proxies
    }

    pub fn fleet_size(&self) -> usize {
        self.inner.fleet.len()
    }

    /// Stop the background tasks (sweeper, fleet sync, stats writer).
    pub async fn shutdown(&self) {
        if let Some(handle) = self.inner.refresher.lock().await.take() {
            handle.stop().await;
        }
        if let Some(task) = self.inner.sync_task.lock().await.take() {
            task.abort();
        }
        if let Some(task) = self.inner.stats_task.lock().await.take() {
            // The writer drains once every sender clone is gone; aborting is
            // fine for process exit.
            task.abort();
        }
    }
}
