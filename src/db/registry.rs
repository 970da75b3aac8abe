//! Connection registry.
//!
//! Maps unique connection names to a pooled engine and the session factory bound
//! to it. Registration validates the configuration, checks that the dialect's
//! driver packages are available, and opens a lazily-connecting pool. Teardown
//! closes every factory and engine and empties the registry.

use crate::config::RegistryOptions;
use crate::db::drivers::{CompiledDrivers, DriverLocator, DriverRequirements};
use crate::db::engine::Engine;
use crate::db::session::{Session, SessionFactory};
use crate::db::url::ConnectionUrl;
use crate::error::{DbError, DbResult, FieldViolation};
use crate::models::{ConnectionConfig, ConnectionSummary};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Engine and session factory registered under one name.
#[derive(Debug)]
struct ConnectionEntry {
    config: ConnectionConfig,
    url: ConnectionUrl,
    engine: Engine,
    factory: SessionFactory,
    registered_at: DateTime<Utc>,
}

impl ConnectionEntry {
    fn summary(&self) -> ConnectionSummary {
        ConnectionSummary {
            name: self.config.name().to_string(),
            dialect: self.config.dialect().to_string(),
            family: self.config.family(),
            database_type: Some(self.engine.database_type()),
            url: self.url.masked(),
            pool_size: self.config.pool_size(),
            max_overflow: self.config.max_overflow(),
            active_sessions: self.factory.active_sessions(),
            registered_at: self.registered_at,
        }
    }
}

/// Registry of named database connections.
pub struct ConnectionRegistry {
    entries: HashMap<String, ConnectionEntry>,
    /// Names in registration order
    order: Vec<String>,
    requirements: DriverRequirements,
    locator: Arc<dyn DriverLocator>,
    options: RegistryOptions,
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("connections", &self.order)
            .field("requirements", &self.requirements)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    /// Create an empty registry with the default driver table, locator and options.
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            order: Vec::new(),
            requirements: DriverRequirements::default(),
            locator: Arc::new(CompiledDrivers),
            options: RegistryOptions::default(),
        }
    }

    /// Start building a registry with a custom driver table, locator or options.
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Build a registry from raw configuration records.
    ///
    /// See [`ConnectionRegistry::extend_from_records`] for the batch semantics.
    pub async fn from_records(records: &[Value]) -> DbResult<Self> {
        let mut registry = Self::new();
        registry.extend_from_records(records).await?;
        Ok(registry)
    }

    /// Validate and register a batch of raw records, in order.
    ///
    /// The batch is all-or-nothing: every record is validated before any pool is
    /// opened, and if a registration fails the connections added earlier in the
    /// same batch are closed and removed before the error is returned.
    pub async fn extend_from_records(
        &mut self,
        records: &[Value],
    ) -> DbResult<Vec<ConnectionSummary>> {
        let configs = records
            .iter()
            .map(ConnectionConfig::from_record)
            .collect::<DbResult<Vec<_>>>()?;

        let mut seen = HashSet::new();
        for config in &configs {
            if !seen.insert(config.name()) {
                return Err(DbError::duplicate_connection_name(config.name()));
            }
        }

        let mut added: Vec<String> = Vec::with_capacity(configs.len());
        let mut summaries = Vec::with_capacity(configs.len());
        for config in configs {
            let name = config.name().to_string();
            match self.register(config).await {
                Ok(summary) => {
                    added.push(name);
                    summaries.push(summary);
                }
                Err(e) => {
                    if !added.is_empty() {
                        warn!(
                            failed = %name,
                            rolled_back = ?added,
                            error = %e,
                            "Registration failed, rolling back batch"
                        );
                        self.remove_entries(&added).await;
                    }
                    return Err(e);
                }
            }
        }

        Ok(summaries)
    }

    /// Register one validated configuration.
    ///
    /// Fails with `DuplicateConnectionName` if the name is taken and with
    /// `MissingDriver` if the dialect's driver packages are unavailable. The pool is
    /// opened lazily unless `verify_on_register` is set.
    pub async fn register(&mut self, config: ConnectionConfig) -> DbResult<ConnectionSummary> {
        let name = config.name().to_string();
        if self.entries.contains_key(&name) {
            return Err(DbError::duplicate_connection_name(name));
        }

        self.requirements
            .check(config.dialect(), self.locator.as_ref())?;

        let url = ConnectionUrl::from_config(&config)?;
        let engine = Engine::open(&config, &self.options)?;

        if self.options.verify_on_register {
            match engine.verify().await {
                Ok(version) => {
                    info!(connection = %name, server_version = %version, "Verified connection");
                }
                Err(e) => {
                    engine.close().await;
                    return Err(e);
                }
            }
        }

        let factory = SessionFactory::new(name.clone(), engine.clone());

        info!(
            connection = %name,
            dialect = %config.dialect(),
            url = %url,
            pool_size = config.pool_size(),
            max_overflow = config.max_overflow(),
            "Registered connection"
        );

        let entry = ConnectionEntry {
            config,
            url,
            engine,
            factory,
            registered_at: Utc::now(),
        };
        let summary = entry.summary();
        self.entries.insert(name.clone(), entry);
        self.order.push(name);
        Ok(summary)
    }

    fn entry(&self, name: &str) -> DbResult<&ConnectionEntry> {
        self.entries
            .get(name)
            .ok_or_else(|| DbError::connection_not_found(name))
    }

    /// Create a new session for the named connection.
    ///
    /// The caller owns the session and decides transaction boundaries.
    pub fn session(&self, name: &str) -> DbResult<Session> {
        self.entry(name)?.factory.session()
    }

    /// Get the session factory of the named connection.
    pub fn session_factory(&self, name: &str) -> DbResult<SessionFactory> {
        Ok(self.entry(name)?.factory.clone())
    }

    /// Get the pooled engine of the named connection.
    pub fn engine(&self, name: &str) -> DbResult<Engine> {
        Ok(self.entry(name)?.engine.clone())
    }

    /// Get the configuration registered under a name.
    pub fn config(&self, name: &str) -> DbResult<&ConnectionConfig> {
        Ok(&self.entry(name)?.config)
    }

    /// Close every session factory and engine and empty the registry.
    ///
    /// Idempotent. Each engine gets `close_timeout` to drain checked-out
    /// connections; sessions still holding one after that are abandoned.
    pub async fn close_all(&mut self) {
        if self.entries.is_empty() {
            debug!("No connections to close");
            return;
        }

        let names = std::mem::take(&mut self.order);
        info!(connections = names.len(), "Closing all connections");
        for name in &names {
            if let Some(entry) = self.entries.remove(name) {
                self.dispose(name, entry).await;
            }
        }
        self.entries.clear();
        info!("All connections closed");
    }

    async fn remove_entries(&mut self, names: &[String]) {
        for name in names {
            if let Some(entry) = self.entries.remove(name) {
                self.dispose(name, entry).await;
            }
        }
        self.order.retain(|name| !names.contains(name));
    }

    async fn dispose(&self, name: &str, entry: ConnectionEntry) {
        entry.factory.close();
        let timeout = self.options.close_timeout();
        match tokio::time::timeout(timeout, entry.engine.close()).await {
            Ok(()) => debug!(connection = %name, "Closed connection pool"),
            Err(_) => warn!(
                connection = %name,
                timeout_secs = timeout.as_secs(),
                "Timed out waiting for checked-out connections, pool left closing"
            ),
        }
    }

    /// Close every factory and mark every pool closed without waiting.
    fn mark_closed(&self) {
        for entry in self.entries.values() {
            entry.factory.close();
            entry.engine.mark_closed();
        }
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Registered names in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.order.iter().map(String::as_str).collect()
    }

    /// Registered configurations in registration order.
    pub fn configs(&self) -> Vec<&ConnectionConfig> {
        self.order
            .iter()
            .filter_map(|name| self.entries.get(name))
            .map(|entry| &entry.config)
            .collect()
    }

    /// Secret-free summaries of every connection, in registration order.
    pub fn summaries(&self) -> Vec<ConnectionSummary> {
        self.order
            .iter()
            .filter_map(|name| self.entries.get(name))
            .map(ConnectionEntry::summary)
            .collect()
    }

    pub fn options(&self) -> &RegistryOptions {
        &self.options
    }

    pub fn requirements(&self) -> &DriverRequirements {
        &self.requirements
    }

    /// Wrap the registry in a guard that closes it when dropped.
    pub fn into_guard(self) -> RegistryGuard {
        RegistryGuard {
            registry: self,
            closed: false,
        }
    }

    /// Run `f` with the registry, then close every connection.
    ///
    /// If `f` panics the guard's drop path still schedules the close.
    pub async fn scope<F, T>(self, f: F) -> T
    where
        F: AsyncFnOnce(&ConnectionRegistry) -> T,
    {
        let guard = self.into_guard();
        let output = f(&guard.registry).await;
        guard.close().await;
        output
    }
}

/// Builder for a registry with injected driver table, locator and options.
pub struct RegistryBuilder {
    requirements: DriverRequirements,
    locator: Arc<dyn DriverLocator>,
    options: RegistryOptions,
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self {
            requirements: DriverRequirements::default(),
            locator: Arc::new(CompiledDrivers),
            options: RegistryOptions::default(),
        }
    }
}

impl std::fmt::Debug for RegistryBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryBuilder")
            .field("requirements", &self.requirements)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl RegistryBuilder {
    pub fn requirements(mut self, requirements: DriverRequirements) -> Self {
        self.requirements = requirements;
        self
    }

    /// Replace the package availability check. Closures `Fn(&str) -> bool` work.
    pub fn locator(mut self, locator: impl DriverLocator + 'static) -> Self {
        self.locator = Arc::new(locator);
        self
    }

    pub fn options(mut self, options: RegistryOptions) -> Self {
        self.options = options;
        self
    }

    /// Build an empty registry. Fails if the options are invalid.
    pub fn build(self) -> DbResult<ConnectionRegistry> {
        self.options.validate().map_err(|message| {
            DbError::invalid_configuration(
                "<options>",
                vec![FieldViolation::new("options", message)],
            )
        })?;

        Ok(ConnectionRegistry {
            entries: HashMap::new(),
            order: Vec::new(),
            requirements: self.requirements,
            locator: self.locator,
            options: self.options,
        })
    }

    /// Build a registry and register a batch of raw records.
    pub async fn from_records(self, records: &[Value]) -> DbResult<ConnectionRegistry> {
        let mut registry = self.build()?;
        registry.extend_from_records(records).await?;
        Ok(registry)
    }
}

/// RAII guard that closes the registry when it goes out of scope.
///
/// Prefer `close().await`; the drop path has to spawn a task on the current
/// Tokio runtime.
pub struct RegistryGuard {
    registry: ConnectionRegistry,
    closed: bool,
}

impl std::fmt::Debug for RegistryGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryGuard")
            .field("registry", &self.registry)
            .field("closed", &self.closed)
            .finish()
    }
}

impl RegistryGuard {
    /// Explicitly close every connection (preferred over relying on Drop).
    pub async fn close(mut self) {
        self.closed = true;
        self.registry.close_all().await;
    }
}

impl Deref for RegistryGuard {
    type Target = ConnectionRegistry;

    fn deref(&self) -> &Self::Target {
        &self.registry
    }
}

impl DerefMut for RegistryGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.registry
    }
}

impl Drop for RegistryGuard {
    fn drop(&mut self) {
        if self.closed || self.registry.is_empty() {
            return;
        }

        // Invalidate every handle now; only draining is left to a task
        self.registry.mark_closed();

        let mut registry = std::mem::take(&mut self.registry);
        let names: Vec<String> = registry.names().into_iter().map(String::from).collect();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(
                    connections = ?names,
                    "Registry closed via Drop, draining pools in a background task - consider using explicit close()"
                );
                handle.spawn(async move {
                    registry.close_all().await;
                });
            }
            Err(_) => {
                warn!(
                    connections = ?names,
                    "Registry dropped outside a Tokio runtime, factories and pools closed without draining"
                );
            }
        }
    }
}
