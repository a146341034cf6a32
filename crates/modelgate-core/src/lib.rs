//! # Modelgate Core
//!
//! The request execution pipeline and credential fleet manager:
//!
//! - **`router`** - model alias → (provider, upstream model)
//! - **`fleet`** - in-memory account state, block transitions, selection
//! - **`token`** - OAuth cache, reactive refresh, background sweeper
//! - **`quota`** - usage windows, exhausted flags, learned limits
//! - **`proxy_pool`** - permanent egress bindings and per-proxy HTTP clients
//! - **`classify`** - upstream status/body → closed error kinds
//! - **`executor`** - the orchestrator, retries, stream forwarding
//! - **`stats`** - async audit log and per-proxy counters
//! - **`status`** - read-only health snapshots
//!
//! External collaborators (wire-format translators, HTTP ingress, RBAC) sit
//! behind the `ProviderAdapter` and `HttpExecutor` traits and the ingress
//! layer respectively; their internals never appear here.

pub mod classify;
pub mod config;
pub mod executor;
pub mod fleet;
pub mod oauth_session;
pub mod providers;
pub mod proxy_pool;
pub mod quota;
pub mod repo;
pub mod router;
pub mod stats;
pub mod status;
pub mod store;
pub mod token;
pub mod upstream;

pub use classify::Classifier;
pub use config::GatewayConfig;
pub use executor::{Executor, StreamHandle, StreamOutcome};
pub use fleet::{AccountState, AccountStateStore, BlockReason, Selector};
pub use oauth_session::OAuthSessionStore;
pub use providers::{ProviderAdapter, ProviderRegistry};
pub use proxy_pool::ProxyPool;
pub use quota::QuotaTracker;
pub use repo::{MemoryRepository, PgRepository, Repository};
pub use router::ModelRouter;
pub use stats::StatsWriter;
pub use status::StatusService;
pub use store::{FastStore, MemoryStore, RedisStore};
pub use token::{TokenCache, TokenRefresher};
pub use upstream::{HttpExecutor, ReqwestExecutor};
