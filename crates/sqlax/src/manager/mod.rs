//! Multi-URL Connection Manager
//!
//! [`DatabaseManager`] owns an ordered list of candidate URLs and hands out a
//! working engine, a session factory bound to it, and fresh sessions. Engines
//! are created lazily, at most one per URL, and cached until the manager is
//! closed or the selection is invalidated.
//!
//! Selection runs the round-based algorithm in [`retry`]: every round visits
//! each URL once (resuming at the current cursor by default), a cached engine
//! counts as an immediate success, and a round with no success is followed by
//! the configured backoff. When the budget is spent the caller gets
//! [`DatabaseError::ConnectionUnavailable`].
//!
//! All selection state sits behind one async mutex, so concurrent callers never
//! create duplicate engines and never observe a half-rebound session factory.
//! Sessions are created outside the lock, and a dropped engine is disposed
//! outside it too: disposal waits for the sessions still using the engine.

mod health;
mod retry;
mod statistics;


pub use health::{EngineHealthReport, HealthStatus};
pub use statistics::ManagerStats;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::backends::{DatabaseBackend, DatabaseEngine, DatabaseSession, SessionFactory, SqlxBackend};
use crate::config::{database_urls_from_env, ManagerConfig};
use crate::error::{DatabaseError, DbResult};
use crate::schema::TableMetadata;
use crate::security::redact_url;
use statistics::ManagerCounters;

/// Observable selection state of a manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// No engine is selected: never acquired, invalidated, or closed
    Uninitialized,
    /// The engine for this URL is selected
    Connected(String),
    /// The last acquisition exhausted every candidate; the next one starts over
    Failed,
}

#[derive(Default)]
struct ManagerState {
    /// Engine cache keyed by URL; absent means never attempted or last attempt failed
    engines: HashMap<String, Arc<dyn DatabaseEngine>>,
    current: Option<usize>,
    /// Most recent selection, kept across invalidation to detect failovers
    last_selected: Option<usize>,
    /// Where the next acquisition round starts
    cursor: usize,
    /// Factory and the index of the URL it was bound to
    session_factory: Option<(usize, Arc<dyn SessionFactory>)>,
    failed: bool,
}

/// Connection manager with retry and failover across candidate URLs
pub struct DatabaseManager {
    urls: Vec<String>,
    config: ManagerConfig,
    backend: Arc<dyn DatabaseBackend>,
    state: Mutex<ManagerState>,
    tables: DashMap<String, Arc<TableMetadata>>,
    /// Serializes reflection refreshes of `tables`
    reflecting: Mutex<()>,
    counters: ManagerCounters,
}

impl std::fmt::Debug for DatabaseManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let urls: Vec<String> = self.urls.iter().map(|u| redact_url(u)).collect();
        f.debug_struct("DatabaseManager")
            .field("urls", &urls)
            .field("backend", &self.backend.name())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl DatabaseManager {
    /// Create a manager with the default configuration
    pub fn new<I, S>(urls: I, backend: Arc<dyn DatabaseBackend>) -> DbResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_config(urls, backend, ManagerConfig::default())
    }

    /// Create a manager; fails if `urls` is empty or the configuration is invalid
    pub fn with_config<I, S>(urls: I, backend: Arc<dyn DatabaseBackend>, config: ManagerConfig) -> DbResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let urls: Vec<String> = urls.into_iter().map(Into::into).collect();
        if urls.is_empty() {
            return Err(DatabaseError::Configuration(
                "At least one database URL is required".to_string(),
            ));
        }
        config.validate()?;

        tracing::debug!(
            "Database manager created with {} candidate url(s) on the {} backend",
            urls.len(),
            backend.name()
        );

        Ok(Self {
            urls,
            config,
            backend,
            state: Mutex::new(ManagerState::default()),
            tables: DashMap::new(),
            reflecting: Mutex::new(()),
            counters: ManagerCounters::new(),
        })
    }

    /// Create a manager on the sqlx backend with the default configuration
    pub fn sqlx<I, S>(urls: I) -> DbResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(urls, Arc::new(SqlxBackend::new()))
    }

    /// Create a sqlx-backed manager from `DATABASE_URLS` and `SQLAX_*` variables
    pub fn from_env() -> DbResult<Self> {
        let urls = database_urls_from_env()?;
        let config = ManagerConfig::from_env()?;
        Self::with_config(urls, Arc::new(SqlxBackend::new()), config)
    }

    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Run the acquisition algorithm and return the selected engine
    pub async fn acquire_engine(&self) -> DbResult<Arc<dyn DatabaseEngine>> {
        let mut state = self.state.lock().await;
        let (_, engine) = self.acquire_locked(&mut state).await?;
        Ok(engine)
    }

    /// Return the selected engine without probing, acquiring one if none is selected
    pub async fn current_engine(&self) -> DbResult<Arc<dyn DatabaseEngine>> {
        let mut state = self.state.lock().await;
        let (_, engine) = self.current_locked(&mut state).await?;
        Ok(engine)
    }

    /// Session factory bound to the selected engine, rebuilt only when the selection changed
    pub async fn session_factory(&self) -> DbResult<Arc<dyn SessionFactory>> {
        let mut state = self.state.lock().await;
        let (index, engine) = self.current_locked(&mut state).await?;

        if let Some((bound, factory)) = &state.session_factory {
            if *bound == index {
                return Ok(Arc::clone(factory));
            }
        }

        let factory = engine.session_factory()?;
        tracing::debug!("Session factory bound to {}", redact_url(&self.urls[index]));
        state.session_factory = Some((index, Arc::clone(&factory)));

        Ok(factory)
    }

    /// A brand-new session; the caller owns its commit, rollback and close
    pub async fn new_session(&self) -> DbResult<Box<dyn DatabaseSession>> {
        let factory = self.session_factory().await?;
        factory.new_session()
    }

    /// URL of the selected engine, if any
    pub async fn current_url(&self) -> Option<String> {
        let state = self.state.lock().await;
        state.current.map(|index| self.urls[index].clone())
    }

    pub async fn state(&self) -> ConnectionState {
        let state = self.state.lock().await;
        match state.current {
            Some(index) => ConnectionState::Connected(self.urls[index].clone()),
            None if state.failed => ConnectionState::Failed,
            None => ConnectionState::Uninitialized,
        }
    }

    /// Drop the selected engine so the next acquisition fails over to the next URL
    pub async fn invalidate_current(&self) {
        let retired = {
            let mut state = self.state.lock().await;
            self.invalidate_locked(&mut state)
        };
        retire(retired);
    }

    /// Probe the selected engine; a failed probe invalidates the selection
    ///
    /// An engine whose pool stays exhausted past the acquire timeout is busy,
    /// not down: the error is returned and the selection is kept.
    pub async fn health_check(&self) -> DbResult<EngineHealthReport> {
        let engine = self.current_engine().await?;

        match engine.health_check().await {
            Ok(check_duration) => {
                tracing::debug!("Database health check passed in {:?}", check_duration);
                Ok(EngineHealthReport {
                    url: redact_url(engine.url()),
                    check_duration,
                    pool: engine.stats(),
                    manager: self.counters.snapshot(),
                })
            }
            Err(e) if e.is_pool_timeout() => {
                tracing::warn!("Database {} is saturated: {}", redact_url(engine.url()), e);
                Err(e)
            }
            Err(e) => {
                tracing::error!("Database health check failed for {}: {}", redact_url(engine.url()), e);
                let retired = {
                    let mut state = self.state.lock().await;
                    let still_selected = state
                        .current
                        .and_then(|index| state.engines.get(&self.urls[index]))
                        .is_some_and(|selected| same_engine(selected, &engine));
                    if still_selected {
                        self.invalidate_locked(&mut state)
                    } else {
                        None
                    }
                };
                retire(retired);
                Err(e)
            }
        }
    }

    pub fn stats(&self) -> ManagerStats {
        self.counters.snapshot()
    }

    /// Reflect every table of the selected engine, replacing the table cache
    ///
    /// Tables still present stay visible to [`lookup_table`](Self::lookup_table)
    /// throughout the refresh; only tables that disappeared are dropped.
    pub async fn reflect_schema(&self) -> DbResult<()> {
        let _refresh = self.reflecting.lock().await;
        let engine = self.current_engine().await?;

        let tables = engine.reflect().await.map_err(|e| match e {
            DatabaseError::SchemaUnavailable(_) => e,
            other => DatabaseError::SchemaUnavailable(other.to_string()),
        })?;

        let names: HashSet<String> = tables.iter().map(|table| table.name.clone()).collect();
        for table in tables {
            self.tables.insert(table.name.clone(), Arc::new(table));
        }
        self.tables.retain(|name, _| names.contains(name));

        tracing::info!(
            "Reflected {} table(s) from {}",
            self.tables.len(),
            redact_url(engine.url())
        );
        Ok(())
    }

    /// Cached metadata of a reflected table; `None` when it was not reflected
    pub fn lookup_table(&self, name: &str) -> Option<Arc<TableMetadata>> {
        self.tables.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Names of every reflected table, sorted
    pub fn reflected_tables(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }

    /// Dispose every cached engine and forget the selection
    pub async fn close(&self) {
        let engines: Vec<(String, Arc<dyn DatabaseEngine>)> = {
            let mut state = self.state.lock().await;
            state.session_factory = None;
            state.current = None;
            state.last_selected = None;
            state.failed = false;
            state.engines.drain().collect()
        };
        self.tables.clear();

        for (url, engine) in engines {
            tracing::debug!("Disposing engine for {}", redact_url(&url));
            engine.dispose().await;
        }

        tracing::info!("Database manager closed");
    }

    async fn current_locked(&self, state: &mut ManagerState) -> DbResult<(usize, Arc<dyn DatabaseEngine>)> {
        if let Some(index) = state.current {
            if let Some(engine) = state.engines.get(&self.urls[index]) {
                return Ok((index, Arc::clone(engine)));
            }
        }
        self.acquire_locked(state).await
    }

    async fn acquire_locked(&self, state: &mut ManagerState) -> DbResult<(usize, Arc<dyn DatabaseEngine>)> {
        self.counters.record_acquisition();

        let cached: Vec<Option<Arc<dyn DatabaseEngine>>> =
            self.urls.iter().map(|url| state.engines.get(url).cloned()).collect();
        let counters = &self.counters;

        let outcome = retry::failover(&self.config.retry, self.urls.len(), state.cursor, |index| {
            let cached = cached[index].clone();
            let backend = Arc::clone(&self.backend);
            let url = self.urls[index].clone();
            let engine_config = self.config.engine.clone();

            async move {
                if let Some(engine) = cached {
                    return Ok(engine);
                }

                counters.record_probe();
                match backend.create_engine(&url, &engine_config).await {
                    Ok(engine) => Ok(engine),
                    Err(e) => {
                        counters.record_probe_failure();
                        tracing::warn!("Database {} is unavailable: {}", redact_url(&url), e);
                        Err(e)
                    }
                }
            }
        })
        .await;

        match outcome {
            Ok(success) => {
                let index = success.index;
                let url = &self.urls[index];
                let engine = Arc::clone(
                    state
                        .engines
                        .entry(url.clone())
                        .or_insert_with(|| Arc::clone(&success.value)),
                );

                let previous = state.current.replace(index);
                let last_selected = state.last_selected.replace(index);
                state.cursor = index;
                state.failed = false;

                if last_selected.is_some_and(|last| last != index) {
                    self.counters.record_failover();
                }
                if previous != Some(index) {
                    state.session_factory = None;
                    tracing::info!(
                        "Selected database {} after {} attempt(s)",
                        redact_url(url),
                        success.attempts
                    );
                }

                Ok((index, engine))
            }
            Err(exhausted) => {
                state.current = None;
                state.session_factory = None;
                state.failed = true;

                let err = DatabaseError::from(exhausted);
                tracing::error!("{}", err);
                Err(err)
            }
        }
    }

    /// Forget the selection and hand back its engine for disposal
    fn invalidate_locked(&self, state: &mut ManagerState) -> Option<Arc<dyn DatabaseEngine>> {
        state.session_factory = None;

        let index = state.current.take()?;
        let url = &self.urls[index];
        state.cursor = (index + 1) % self.urls.len();
        tracing::warn!("Database {} invalidated", redact_url(url));

        state.engines.remove(url)
    }
}

/// Dispose an invalidated engine in the background. Sessions may still hold its
/// connections, and disposal only completes once they are returned.
fn retire(engine: Option<Arc<dyn DatabaseEngine>>) {
    if let Some(engine) = engine {
        tokio::spawn(async move {
            engine.dispose().await;
            tracing::debug!("Disposed invalidated engine for {}", redact_url(engine.url()));
        });
    }
}

fn same_engine(a: &Arc<dyn DatabaseEngine>, b: &Arc<dyn DatabaseEngine>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}
