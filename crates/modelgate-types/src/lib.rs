//! # Modelgate Types
//!
//! Core types, models, and error definitions for Modelgate.
//!
//! This crate provides the foundational type system for the gateway:
//!
//! - **`error`** - Typed error hierarchy (caller-facing taxonomy, store, repository)
//! - **`models`** - Domain models (Account, Provider, Proxy, Quota, Mapping)
//!
//! `modelgate-types` sits at the bottom of the dependency graph; everything
//! else depends on it. All types are:
//! - **Serializable** via serde for API/persistence
//! - **Clone** for cheap sharing across async boundaries
//! - **PartialEq** where practical, for testing and comparison

pub mod error;
pub mod models;

// Re-export error types for convenience
pub use error::{GatewayError, GatewayResult, RepositoryError, StoreError};

// Re-export core model types
pub use models::{
    Account, AuthData, AuthType, ErrorKind, ExecuteRequest, GatewayRequest, GatewayResponse,
    ModelMapping, OAuthSession, ParsedError, Provider, ProxyHealth, ProxyServer, QuotaPattern,
    QuotaUsage, RequestLogEntry, UpstreamResponse,
};
