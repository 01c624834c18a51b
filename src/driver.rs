//! Driver, Registry, and Connections
//!
//! A [`Driver`] owns the pieces that outlive a single connection: the shared
//! result store, the environment source, and the executor factory. Connecting
//! resolves a fresh [`Configuration`], builds its [`SchemaModel`], opens an
//! executor, and hands back a [`Connection`] whose queries go through the cache.
//!
//! There is no global registration. Callers build a [`DriverRegistry`]
//! explicitly and pass it where descriptors are dispatched.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::cache::{
    CacheKey, CacheScope, CacheSource, Clock, QueryCache, ScopedCache, SystemClock, DEFAULT_CAPACITY,
};
use crate::config::{self, Configuration, EnvSource, ProcessEnv, RawParams, ResolveOptions};
use crate::engine::{ExecutorFactory, QueryExecutor, QueryRequest, QueryResult};
use crate::error::{CloudOpsError, Result};
use crate::schema::{EngineOptions, SchemaModel};

/// Builder for [`Driver`]
pub struct DriverBuilder {
    factory: Arc<dyn ExecutorFactory>,
    env: Arc<dyn EnvSource>,
    clock: Arc<dyn Clock>,
    capacity: usize,
    store: Option<Arc<QueryCache>>,
    options: ResolveOptions,
    engine: EngineOptions,
}

impl DriverBuilder {
    /// Read environment fallbacks from `env` instead of the process environment
    #[must_use]
    pub fn env(mut self, env: impl EnvSource + 'static) -> Self {
        self.env = Arc::new(env);
        self
    }

    /// Time source for entry expiry
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Maximum number of cached results across all connections
    #[must_use]
    pub const fn cache_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Share an existing store instead of creating one
    ///
    /// Overrides `clock` and `cache_capacity`.
    #[must_use]
    pub fn shared_cache(mut self, store: Arc<QueryCache>) -> Self {
        self.store = Some(store);
        self
    }

    /// Fail connections that end up with no enabled provider
    #[must_use]
    pub const fn require_provider(mut self, require: bool) -> Self {
        self.options.require_provider = require;
        self
    }

    #[must_use]
    pub fn engine_options(mut self, engine: EngineOptions) -> Self {
        self.engine = engine;
        self
    }

    #[must_use]
    pub fn build(self) -> Driver {
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(QueryCache::with_clock(self.capacity, self.clock)));
        Driver {
            factory: self.factory,
            env: self.env,
            store,
            options: self.options,
            engine: self.engine,
        }
    }
}

/// Entry point for `jdbc:cloudops:` descriptors
pub struct Driver {
    factory: Arc<dyn ExecutorFactory>,
    env: Arc<dyn EnvSource>,
    store: Arc<QueryCache>,
    options: ResolveOptions,
    engine: EngineOptions,
}

impl Driver {
    /// Start building a driver that opens executors through `factory`
    pub fn builder(factory: impl ExecutorFactory + 'static) -> DriverBuilder {
        DriverBuilder {
            factory: Arc::new(factory),
            env: Arc::new(ProcessEnv),
            clock: Arc::new(SystemClock),
            capacity: DEFAULT_CAPACITY,
            store: None,
            options: ResolveOptions::default(),
            engine: EngineOptions::default(),
        }
    }

    /// Driver with default settings
    pub fn new(factory: impl ExecutorFactory + 'static) -> Self {
        Self::builder(factory).build()
    }

    /// Returns true when this driver handles `descriptor`
    #[must_use]
    pub fn accepts(&self, descriptor: Option<&str>) -> bool {
        config::accepts(descriptor)
    }

    /// Resolve and validate the configuration for `descriptor`
    ///
    /// Returns `Ok(None)` for descriptors this driver does not accept.
    pub fn resolve(&self, descriptor: Option<&str>, properties: &RawParams) -> Result<Option<Configuration>> {
        let Some(params) = descriptor.and_then(config::descriptor::parameters) else {
            return Ok(None);
        };
        let raw = config::parse(params);
        config::resolve(&raw, properties, self.env.as_ref(), self.options).map(Some)
    }

    /// Engine connection string for `descriptor`, without opening anything
    pub fn engine_url(&self, descriptor: Option<&str>, properties: &RawParams) -> Result<Option<String>> {
        Ok(self
            .resolve(descriptor, properties)?
            .map(|config| SchemaModel::build(&config).engine_url(&self.engine)))
    }

    /// Open a connection
    ///
    /// Returns `Ok(None)` when the descriptor is not accepted. Configuration
    /// problems fail here, before any executor is opened.
    pub fn connect(&self, descriptor: Option<&str>, properties: &RawParams) -> Result<Option<Connection>> {
        let Some(config) = self.resolve(descriptor, properties)? else {
            return Ok(None);
        };

        let model = SchemaModel::build(&config);
        let executor = self.factory.open(&model)?;
        let cache = ScopedCache::new(
            Arc::clone(&self.store),
            CacheScope::for_config(&config),
            *config.cache_policy(),
        );

        tracing::info!(
            engine = executor.engine(),
            providers = config.enabled_providers().len(),
            cache_enabled = config.cache_policy().enabled,
            scope = cache.scope().as_str().get(..12).unwrap_or_default(),
            "Opened connection"
        );

        Ok(Some(Connection { config: Arc::new(config), model, executor, cache }))
    }

    /// The store shared by this driver's connections
    #[must_use]
    pub const fn cache(&self) -> &Arc<QueryCache> {
        &self.store
    }

    #[must_use]
    pub const fn engine_options(&self) -> &EngineOptions {
        &self.engine
    }
}

impl std::fmt::Debug for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver")
            .field("store", &self.store)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Explicitly constructed set of drivers
#[derive(Debug, Default)]
pub struct DriverRegistry {
    drivers: Vec<Arc<Driver>>,
}

impl DriverRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, driver: Arc<Driver>) {
        self.drivers.push(driver);
    }

    #[must_use]
    pub fn with(mut self, driver: Arc<Driver>) -> Self {
        self.register(driver);
        self
    }

    /// First registered driver that accepts `descriptor`
    #[must_use]
    pub fn driver_for(&self, descriptor: &str) -> Option<&Arc<Driver>> {
        self.drivers.iter().find(|d| d.accepts(Some(descriptor)))
    }

    /// Connect through whichever driver accepts `descriptor`
    pub fn connect(&self, descriptor: &str, properties: &RawParams) -> Result<Connection> {
        let driver = self.driver_for(descriptor).ok_or_else(|| {
            CloudOpsError::invalid_input("No registered driver accepts this descriptor")
        })?;
        driver
            .connect(Some(descriptor), properties)?
            .ok_or_else(|| CloudOpsError::invalid_input("Descriptor rejected by driver"))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }
}

/// Result of one query on a connection
#[derive(Debug, Clone)]
pub struct QueryOutcome {
    pub result: Arc<QueryResult>,
    pub source: CacheSource,
    pub elapsed: Duration,
}

/// An open connection
///
/// Safe to share across threads. Queries from any thread go through the same
/// scoped cache.
#[derive(Clone)]
pub struct Connection {
    config: Arc<Configuration>,
    model: SchemaModel,
    executor: Arc<dyn QueryExecutor>,
    cache: ScopedCache,
}

impl Connection {
    #[must_use]
    pub fn config(&self) -> &Configuration {
        &self.config
    }

    #[must_use]
    pub const fn model(&self) -> &SchemaModel {
        &self.model
    }

    #[must_use]
    pub const fn cache(&self) -> &ScopedCache {
        &self.cache
    }

    /// Run `request`, serving it from the cache when a fresh entry exists
    pub fn execute(&self, request: &QueryRequest) -> Result<QueryOutcome> {
        if self.is_closed() {
            return Err(CloudOpsError::ConnectionClosed);
        }
        if request.table.trim().is_empty() {
            return Err(CloudOpsError::invalid_input("Query has no table"));
        }

        let start = Instant::now();
        let key = CacheKey::new(request, self.config.enabled_providers().iter().copied());
        let fetched = self.cache.get_or_load(&key, || self.executor.execute(request))?;
        let elapsed = start.elapsed();

        tracing::debug!(
            table = %request.table,
            source = fetched.source.as_str(),
            rows = fetched.result.row_count(),
            elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            "Query complete"
        );

        Ok(QueryOutcome { result: fetched.result, source: fetched.source, elapsed })
    }

    /// Close the connection; later calls fail with `ConnectionClosed`
    pub fn close(&self) {
        if !self.cache.is_closed() {
            self.cache.close();
            tracing::debug!("Closed connection");
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.cache.is_closed()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("engine", &self.executor.engine())
            .field("model", &self.model)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
