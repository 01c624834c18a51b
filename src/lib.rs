//! CloudOps - One SQL Surface Over Multi-Cloud Resources
//!
//! CloudOps sits between a SQL front end and per-provider resource fetchers for
//! Azure, GCP, and AWS. It resolves layered connection configuration, renders the
//! model the external engine consumes, and caches query results so repeated
//! multi-provider scans stay fast without serving stale or cross-tenant data.
//!
//! # Core Principles
//! - Deterministic configuration (same sources → same snapshot, same model bytes)
//! - Eager validation (partial provider credentials fail the connection)
//! - Cache faults never fail a query
//! - No credential values in logs, errors, or debug output
//!
//! # Module Organization
//! - [`error`] - Error types and handling
//! - [`config`] - Descriptor parsing and configuration resolution
//! - [`schema`] - Engine model builder
//! - [`engine`] - Query request/result types and the executor capability
//! - [`cache`] - Scoped, bounded query-result cache
//! - [`driver`] - Driver, registry, and connections
//! - [`output`] - JSON output envelope types

pub mod cache;
pub mod config;
pub mod driver;
pub mod engine;
pub mod error;
pub mod output;
pub mod schema;

pub use cache::{CacheKey, CacheScope, CacheSource, CacheStats, QueryCache, ScopedCache};
pub use config::{
    accepts, resolve, CachePolicy, Configuration, EnvSource, MapEnv, ParseWarning, ProcessEnv,
    Provider, RawParams, ResolveOptions,
};
pub use driver::{Connection, Driver, DriverRegistry, QueryOutcome};
pub use engine::{
    ColumnInfo, CompareOp, ExecutorFactory, Predicate, QueryExecutor, QueryRequest, QueryResult,
    SortKey,
};
pub use error::{CloudOpsError, Result};
pub use output::{ErrorEnvelope, ErrorInfo, Metadata, SuccessEnvelope};
pub use schema::{EngineOptions, SchemaModel};
