//! Connection pool construction.
//!
//! This module builds database-specific pools (MySqlPool, PgPool, SqlitePool)
//! with the checkout hook and per-backend connect options attached. Pooling
//! itself is left entirely to `sqlx`.

use crate::config::DatabaseOptions;
use crate::db::detector::DisconnectDetector;
use crate::db::native::NativeError;
use crate::models::{ConnectionUrl, DatabaseType};
use sqlx::mysql::{MySqlConnectOptions, MySqlPool};
use sqlx::pool::PoolOptions;
use sqlx::postgres::{PgConnectOptions, PgPool};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqliteSynchronous};
use sqlx::{ConnectOptions, Database, MySql, Postgres, Sqlite};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Database-specific connection pool (avoids AnyPool limitations).
#[derive(Debug, Clone)]
pub enum DbPool {
    MySql(MySqlPool),
    Postgres(PgPool),
    SQLite(SqlitePool),
}

impl DbPool {
    pub async fn close(&self) {
        impl_db_dispatch!(self, {
            MySql(pool) => pool.close().await,
            Postgres(pool) => pool.close().await,
            SQLite(pool) => pool.close().await,
        })
    }

    pub fn is_closed(&self) -> bool {
        impl_db_dispatch!(self, {
            MySql(pool) => pool.is_closed(),
            Postgres(pool) => pool.is_closed(),
            SQLite(pool) => pool.is_closed(),
        })
    }

    pub fn db_type(&self) -> DatabaseType {
        match self {
            DbPool::MySql(_) => DatabaseType::MySQL,
            DbPool::Postgres(_) => DatabaseType::PostgreSQL,
            DbPool::SQLite(_) => DatabaseType::SQLite,
        }
    }

    /// Open connections, idle or in use.
    pub fn size(&self) -> u32 {
        impl_db_dispatch!(self, {
            MySql(pool) => pool.size(),
            Postgres(pool) => pool.size(),
            SQLite(pool) => pool.size(),
        })
    }

    /// Run `SELECT 1` on a pooled connection.
    pub async fn ping(&self) -> Result<(), NativeError> {
        let result = impl_db_dispatch!(self, {
            MySql(pool) => sqlx::query("SELECT 1").execute(pool).await.map(|_| ()),
            Postgres(pool) => sqlx::query("SELECT 1").execute(pool).await.map(|_| ()),
            SQLite(pool) => sqlx::query("SELECT 1").execute(pool).await.map(|_| ()),
        });
        result.map_err(NativeError::from)
    }
}

/// Pool and connect settings derived from [`DatabaseOptions`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    /// Connections older than this are closed instead of reused.
    pub max_lifetime: Option<Duration>,
    /// `None` keeps idle connections forever.
    pub idle_timeout: Option<Duration>,
    pub statement_logging: bool,
    pub mysql_traditional_mode: bool,
    pub sqlite_synchronous: bool,
    pub sqlite_fk: bool,
}

impl PoolSettings {
    pub fn from_options(options: &DatabaseOptions, url: &ConnectionUrl) -> Self {
        let mut settings = Self {
            max_connections: options.max_connections(),
            min_connections: options.min_pool_size,
            acquire_timeout: options.pool_timeout_duration(),
            max_lifetime: Some(options.idle_timeout_duration()),
            idle_timeout: Some(options.idle_timeout_duration()),
            statement_logging: options.connection_debug > 0,
            mysql_traditional_mode: options.mysql_traditional_mode,
            sqlite_synchronous: options.sqlite_synchronous,
            sqlite_fk: options.sqlite_fk,
        };

        // Every connection to `:memory:` sees its own database; keep exactly one
        // and never recycle it.
        if url.is_sqlite_memory() {
            settings.max_connections = 1;
            settings.min_connections = 1;
            settings.max_lifetime = None;
            settings.idle_timeout = None;
        }

        settings
    }

    fn pool_options<DB: Database>(&self) -> PoolOptions<DB> {
        PoolOptions::<DB>::new()
            .max_connections(self.max_connections)
            .min_connections(self.min_connections.min(self.max_connections))
            .acquire_timeout(self.acquire_timeout)
            .max_lifetime(self.max_lifetime)
            .idle_timeout(self.idle_timeout)
            // The checkout hook replaces the driver's own ping.
            .test_before_acquire(false)
    }
}

/// Create a pool and open its first connection.
pub async fn create_pool(
    url: &ConnectionUrl,
    settings: &PoolSettings,
    detector: Arc<DisconnectDetector>,
) -> Result<DbPool, sqlx::Error> {
    let db_type = url.database_type().ok_or_else(|| {
        sqlx::Error::Configuration(
            format!("no pool driver available for backend '{}'", url.backend()).into(),
        )
    })?;
    let driver_url = url
        .driver_url()
        .map_err(|e| sqlx::Error::Configuration(e.to_string().into()))?;

    debug!(
        backend = %url.backend(),
        url = %url.masked(),
        max_connections = settings.max_connections,
        "Creating connection pool"
    );

    match db_type {
        DatabaseType::MySQL => {
            let mut options = MySqlConnectOptions::from_str(&driver_url)?.charset("utf8mb4");
            if !settings.statement_logging {
                options = options.disable_statement_logging();
            }

            let mut pool_options = settings
                .pool_options::<MySql>()
                .before_acquire(move |conn, _meta| detector.on_checkout(conn));
            if settings.mysql_traditional_mode {
                pool_options = pool_options.after_connect(|conn, _meta| {
                    Box::pin(async move {
                        sqlx::query("SET SESSION sql_mode = 'TRADITIONAL'")
                            .execute(&mut *conn)
                            .await?;
                        Ok(())
                    })
                });
            }

            Ok(DbPool::MySql(pool_options.connect_with(options).await?))
        }
        DatabaseType::PostgreSQL => {
            let mut options = PgConnectOptions::from_str(&driver_url)?;
            if !settings.statement_logging {
                options = options.disable_statement_logging();
            }

            let pool = settings
                .pool_options::<Postgres>()
                .before_acquire(move |conn, _meta| detector.on_checkout(conn))
                .connect_with(options)
                .await?;
            Ok(DbPool::Postgres(pool))
        }
        DatabaseType::SQLite => {
            let mut options = SqliteConnectOptions::from_str(&driver_url)?
                .create_if_missing(true)
                .foreign_keys(settings.sqlite_fk)
                .synchronous(if settings.sqlite_synchronous {
                    SqliteSynchronous::Full
                } else {
                    SqliteSynchronous::Off
                })
                .with_regexp();
            if !settings.statement_logging {
                options = options.disable_statement_logging();
            }

            let pool = settings
                .pool_options::<Sqlite>()
                .before_acquire(move |conn, _meta| detector.on_checkout(conn))
                .connect_with(options)
                .await?;
            Ok(DbPool::SQLite(pool))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_from_options() {
        let options = DatabaseOptions {
            max_pool_size: 20,
            max_overflow: 50,
            min_pool_size: 10,
            pool_timeout: 7,
            connection_debug: 60,
            ..DatabaseOptions::new("mysql://localhost/db")
        };
        let url = ConnectionUrl::parse("mysql://localhost/db").unwrap();
        let settings = PoolSettings::from_options(&options, &url);

        assert_eq!(settings.max_connections, 70);
        assert_eq!(settings.min_connections, 10);
        assert_eq!(settings.acquire_timeout, Duration::from_secs(7));
        assert_eq!(settings.max_lifetime, Some(Duration::from_secs(3600)));
        assert!(settings.statement_logging);
    }

    #[test]
    fn test_min_connections_clamped_to_max() {
        let options = DatabaseOptions {
            min_pool_size: 10,
            ..DatabaseOptions::new("mysql://localhost/db")
        };
        let url = ConnectionUrl::parse("mysql://localhost/db").unwrap();
        let settings = PoolSettings::from_options(&options, &url);
        let pool_options = settings.pool_options::<MySql>();

        assert_eq!(pool_options.get_max_connections(), 5);
        assert_eq!(pool_options.get_min_connections(), 5);
    }

    #[test]
    fn test_sqlite_memory_pinned_to_one_connection() {
        let options = DatabaseOptions::new("sqlite://");
        let url = ConnectionUrl::parse("sqlite://").unwrap();
        let settings = PoolSettings::from_options(&options, &url);

        assert_eq!(settings.max_connections, 1);
        assert_eq!(settings.max_lifetime, None);
        assert!(!settings.statement_logging);
    }

    #[tokio::test]
    async fn test_create_sqlite_memory_pool() {
        let url = ConnectionUrl::parse("sqlite://").unwrap();
        let settings = PoolSettings::from_options(&DatabaseOptions::new("sqlite://"), &url);
        let detector = Arc::new(DisconnectDetector::new(Arc::new(
            crate::db::backend::SqliteDescriptor,
        )));

        let pool = create_pool(&url, &settings, detector).await.unwrap();
        assert_eq!(pool.db_type(), DatabaseType::SQLite);
        pool.ping().await.unwrap();
        pool.close().await;
        assert!(pool.is_closed());
    }
}
