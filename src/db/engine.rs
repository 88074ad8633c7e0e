//! Engine cache and primary/replica selection.
//!
//! An [`Engine`] is one configured pool for one role. [`EngineCache`] creates
//! engines lazily and keeps them for the life of the process, keyed by
//! connection URL, role and flags.
//!
//! ## Concurrency
//! - `RwLock<HashMap<EngineKey, Arc<OnceCell<..>>>>`: readers share the map,
//!   the write lock is only taken to insert a missing cell
//! - `OnceCell` per key gives single-flight engine creation; a failed
//!   creation leaves the cell empty so the next caller tries again

use crate::config::DatabaseOptions;
use crate::db::backend::{BackendRegistry, DEFAULT_REGISTRY};
use crate::db::detector::DisconnectDetector;
use crate::db::native::{NativeError, NativeErrorClass};
use crate::db::pool::{DbPool, PoolSettings, create_pool};
use crate::db::retry::RetryPolicy;
use crate::db::session::Session;
use crate::error::{DbError, DbResult, ErrorKind};
use crate::models::{ConnectionUrl, DatabaseType};
use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, info, warn};

/// Which configured connection an engine serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineRole {
    Primary,
    /// Read-only traffic; falls back to the primary when no replica is set.
    Replica,
}

impl std::fmt::Display for EngineRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::Replica => write!(f, "replica"),
        }
    }
}

/// Per-engine overrides of connect-time options.
///
/// `None` keeps the value from [`DatabaseOptions`]. Engines with different
/// flags are cached separately.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct EngineFlags {
    pub mysql_traditional_mode: Option<bool>,
    pub sqlite_fk: Option<bool>,
    pub sqlite_synchronous: Option<bool>,
}

impl EngineFlags {
    /// Options with these overrides applied.
    pub fn apply(&self, options: &DatabaseOptions) -> DatabaseOptions {
        let mut options = options.clone();
        if let Some(v) = self.mysql_traditional_mode {
            options.mysql_traditional_mode = v;
        }
        if let Some(v) = self.sqlite_fk {
            options.sqlite_fk = v;
        }
        if let Some(v) = self.sqlite_synchronous {
            options.sqlite_synchronous = v;
        }
        options
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct EngineKey {
    url: String,
    role: EngineRole,
    flags: EngineFlags,
}

// =============================================================================
// Engine
// =============================================================================

/// A configured pool for one role.
#[derive(Debug)]
pub struct Engine {
    role: EngineRole,
    url: ConnectionUrl,
    flags: EngineFlags,
    options: DatabaseOptions,
    pool: DbPool,
    detector: Arc<DisconnectDetector>,
    registry: Arc<BackendRegistry>,
}

impl Engine {
    /// Create the pool, retrying the first connection while the backend is
    /// unreachable.
    pub async fn connect(
        url: ConnectionUrl,
        role: EngineRole,
        flags: EngineFlags,
        options: &DatabaseOptions,
        registry: Arc<BackendRegistry>,
    ) -> DbResult<Self> {
        let options = flags.apply(options);
        let descriptor = registry.get(url.backend()).ok_or_else(|| {
            DbError::config(
                "connection",
                format!("unsupported database backend '{}'", url.backend()),
            )
        })?;
        let detector = Arc::new(DisconnectDetector::new(descriptor));
        let settings = PoolSettings::from_options(&options, &url);

        info!(
            role = %role,
            backend = %url.backend(),
            url = %url.masked(),
            "Creating database engine"
        );

        let mut attempts: u32 = 0;
        let result = {
            let (url, settings, detector, registry, options) =
                (&url, &settings, &detector, &registry, &options);
            RetryPolicy::from_options(options)
                .run(|| {
                    attempts += 1;
                    let detector = Arc::clone(detector);
                    async move {
                        create_pool(url, settings, detector)
                            .await
                            .map_err(|e| translate_error(registry, url.backend(), options, &e))
                    }
                })
                .await
        };

        let pool = match result {
            Ok(pool) => pool,
            Err(e) if e.kind() == ErrorKind::Config => return Err(e),
            Err(e) => {
                warn!(
                    role = %role,
                    url = %url.masked(),
                    attempts,
                    error = %e,
                    "Could not connect to database"
                );
                return Err(DbError::connection_failed(
                    url.masked(),
                    attempts,
                    e.to_string(),
                ));
            }
        };

        info!(role = %role, backend = %url.backend(), "Database engine ready");

        Ok(Self {
            role,
            url,
            flags,
            options,
            pool,
            detector,
            registry,
        })
    }

    pub fn role(&self) -> EngineRole {
        self.role
    }

    /// Normalized backend name.
    pub fn backend(&self) -> &str {
        self.url.backend()
    }

    pub fn db_type(&self) -> DatabaseType {
        self.pool.db_type()
    }

    pub fn masked_url(&self) -> String {
        self.url.masked()
    }

    pub fn flags(&self) -> EngineFlags {
        self.flags
    }

    /// Effective options, flags applied.
    pub fn options(&self) -> &DatabaseOptions {
        &self.options
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub fn detector(&self) -> &Arc<DisconnectDetector> {
        &self.detector
    }

    /// Translate a driver error for this engine's backend.
    pub fn translate(&self, err: &sqlx::Error) -> DbError {
        translate_error(&self.registry, self.backend(), &self.options, err)
    }

    /// Start a new session on this engine.
    pub fn session(self: &Arc<Self>) -> Session {
        Session::new(Arc::clone(self))
    }

    /// Run one liveness probe through the pool.
    pub async fn ping(&self) -> DbResult<()> {
        self.pool.ping().await.map_err(|native| {
            if native.class == NativeErrorClass::PoolTimedOut {
                DbError::pool_timeout(self.options.pool_timeout)
            } else {
                self.registry.classify(self.backend(), native)
            }
        })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn translate_error(
    registry: &BackendRegistry,
    backend: &str,
    options: &DatabaseOptions,
    err: &sqlx::Error,
) -> DbError {
    let native = NativeError::from(err);
    match native.class {
        NativeErrorClass::PoolTimedOut => DbError::pool_timeout(options.pool_timeout),
        NativeErrorClass::Configuration => DbError::config("connection", native.message),
        _ => registry.classify(backend, native),
    }
}

// =============================================================================
// Engine cache
// =============================================================================

/// Process-wide engine cache for one set of [`DatabaseOptions`].
pub struct EngineCache {
    options: DatabaseOptions,
    primary: ConnectionUrl,
    replica: Option<ConnectionUrl>,
    registry: Arc<BackendRegistry>,
    /// Per-key lazy engines. OnceCell ensures single-flight creation.
    engines: RwLock<HashMap<EngineKey, Arc<OnceCell<Arc<Engine>>>>>,
}

impl std::fmt::Debug for EngineCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineCache")
            .field("primary", &self.primary.masked())
            .field("replica", &self.replica.as_ref().map(|r| r.masked()))
            .finish_non_exhaustive()
    }
}

impl EngineCache {
    /// Validate options and create an empty cache with the built-in backends.
    ///
    /// No connection is attempted. Fails with `Config` when `connection` is
    /// missing or names a backend without a pool driver, and with
    /// `EngineMismatch` when the replica uses a different backend.
    pub fn new(options: DatabaseOptions) -> DbResult<Self> {
        Self::with_registry(options, Arc::clone(&DEFAULT_REGISTRY))
    }

    pub fn with_registry(
        options: DatabaseOptions,
        registry: Arc<BackendRegistry>,
    ) -> DbResult<Self> {
        options.validate()?;

        let connection = options
            .connection
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| DbError::config("connection", "no database connection configured"))?;
        let primary = ConnectionUrl::parse(connection)?;
        Self::check_backend(&registry, &primary)?;

        let replica = match options
            .slave_connection
            .as_deref()
            .filter(|c| !c.trim().is_empty())
        {
            Some(raw) => {
                let replica = ConnectionUrl::parse(raw)
                    .map_err(|_| DbError::config("slave_connection", "not a database URL"))?;
                if replica.backend() != primary.backend() {
                    return Err(DbError::engine_mismatch(primary.backend(), replica.backend()));
                }
                Some(replica)
            }
            None => None,
        };

        Ok(Self {
            options,
            primary,
            replica,
            registry,
            engines: RwLock::new(HashMap::new()),
        })
    }

    fn check_backend(registry: &BackendRegistry, url: &ConnectionUrl) -> DbResult<()> {
        if !registry.contains(url.backend()) {
            return Err(DbError::config(
                "connection",
                format!("unsupported database backend '{}'", url.backend()),
            ));
        }
        if url.database_type().is_none() {
            return Err(DbError::config(
                "connection",
                format!("no pool driver available for backend '{}'", url.backend()),
            ));
        }
        Ok(())
    }

    pub fn options(&self) -> &DatabaseOptions {
        &self.options
    }

    /// Backend shared by primary and replica.
    pub fn backend(&self) -> &str {
        self.primary.backend()
    }

    pub fn has_replica(&self) -> bool {
        self.replica.is_some()
    }

    pub fn registry(&self) -> &Arc<BackendRegistry> {
        &self.registry
    }

    pub async fn get_engine(&self, role: EngineRole) -> DbResult<Arc<Engine>> {
        self.get_engine_with(role, EngineFlags::default()).await
    }

    /// Get the engine for a role, creating it on first use.
    pub async fn get_engine_with(
        &self,
        role: EngineRole,
        flags: EngineFlags,
    ) -> DbResult<Arc<Engine>> {
        let (url, role) = match (role, &self.replica) {
            (EngineRole::Replica, Some(replica)) => (replica, EngineRole::Replica),
            _ => (&self.primary, EngineRole::Primary),
        };
        let key = EngineKey {
            url: url.as_str().to_string(),
            role,
            flags,
        };

        let cell = {
            let engines = self.engines.read().await;
            if let Some(cell) = engines.get(&key) {
                Arc::clone(cell)
            } else {
                drop(engines);
                let mut engines = self.engines.write().await;
                // Double-check after acquiring write lock
                if let Some(cell) = engines.get(&key) {
                    Arc::clone(cell)
                } else {
                    let cell = Arc::new(OnceCell::new());
                    engines.insert(key, Arc::clone(&cell));
                    cell
                }
            }
        };

        let engine = cell
            .get_or_try_init(|| async {
                let engine = Engine::connect(
                    url.clone(),
                    role,
                    flags,
                    &self.options,
                    Arc::clone(&self.registry),
                )
                .await?;
                Ok::<_, DbError>(Arc::new(engine))
            })
            .await?;

        Ok(Arc::clone(engine))
    }

    /// New session on the engine for `role`.
    pub async fn session(&self, role: EngineRole) -> DbResult<Session> {
        Ok(self.get_engine(role).await?.session())
    }

    /// Number of engines created so far.
    pub async fn engine_count(&self) -> usize {
        let engines = self.engines.read().await;
        engines.values().filter(|cell| cell.get().is_some()).count()
    }

    /// Close every pool and forget all engines.
    pub async fn cleanup(&self) {
        let drained: Vec<_> = {
            let mut engines = self.engines.write().await;
            engines.drain().collect()
        }; // Lock released here

        for (key, cell) in drained {
            if let Some(engine) = cell.get() {
                debug!(role = %key.role, url = %engine.masked_url(), "Closing engine");
                engine.close().await;
            }
        }
        info!("All database engines closed");
    }
}

// =============================================================================
// Process-wide instance
// =============================================================================

static GLOBAL: Lazy<Mutex<Option<Arc<EngineCache>>>> = Lazy::new(|| Mutex::new(None));

/// Initialize the process-wide cache, or return the existing one.
///
/// Options passed after the first successful call are ignored until
/// [`cleanup_global`] runs.
pub fn init_global(options: DatabaseOptions) -> DbResult<Arc<EngineCache>> {
    let mut global = GLOBAL.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(cache) = global.as_ref() {
        return Ok(Arc::clone(cache));
    }
    let cache = Arc::new(EngineCache::new(options)?);
    *global = Some(Arc::clone(&cache));
    Ok(cache)
}

/// The process-wide cache, if initialized.
pub fn global() -> Option<Arc<EngineCache>> {
    GLOBAL
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .as_ref()
        .map(Arc::clone)
}

/// Close all engines of the process-wide cache and reset it.
pub async fn cleanup_global() {
    let cache = GLOBAL.lock().unwrap_or_else(|e| e.into_inner()).take();
    if let Some(cache) = cache {
        cache.cleanup().await;
    }
}
