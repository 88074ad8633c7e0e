//! Dispatch macros over the per-backend enums.
//!
//! `DbPool` and `DbTransaction` hold one variant per driver. These macros
//! write the repetitive match so each arm stays a single readable line.

/// Match over the variants of [`DbPool`](crate::db::pool::DbPool).
///
/// # Example
///
/// ```ignore
/// impl_db_dispatch!(pool, {
///     MySql(p) => p.size(),
///     Postgres(p) => p.size(),
///     SQLite(p) => p.size(),
/// });
/// ```
#[macro_export]
macro_rules! impl_db_dispatch {
    ($pool:expr, { $($variant:ident($p:ident) => $body:expr),+ $(,)? }) => {
        match $pool {
            $(
                $crate::db::pool::DbPool::$variant($p) => $body,
            )+
        }
    };
}

/// Match over the variants of
/// [`DbTransaction`](crate::db::session::DbTransaction).
#[macro_export]
macro_rules! impl_tx_dispatch {
    ($tx:expr, { $($variant:ident($t:ident) => $body:expr),+ $(,)? }) => {
        match $tx {
            $(
                $crate::db::session::DbTransaction::$variant($t) => $body,
            )+
        }
    };
}

pub use impl_db_dispatch;
pub use impl_tx_dispatch;

#[cfg(test)]
mod tests {
    use crate::db::pool::DbPool;
    use crate::models::DatabaseType;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_pool() -> DbPool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        DbPool::SQLite(pool)
    }

    #[tokio::test]
    async fn test_db_dispatch_selects_variant() {
        let pool = memory_pool().await;
        let name = impl_db_dispatch!(&pool, {
            MySql(_p) => DatabaseType::MySQL,
            Postgres(_p) => DatabaseType::PostgreSQL,
            SQLite(_p) => DatabaseType::SQLite,
        });
        assert_eq!(name, DatabaseType::SQLite);
    }

    #[tokio::test]
    async fn test_tx_dispatch_selects_variant() {
        let pool = memory_pool().await;
        let tx = crate::db::session::DbTransaction::begin(&pool).await.unwrap();
        let is_sqlite = impl_tx_dispatch!(&tx, {
            MySql(_t) => false,
            Postgres(_t) => false,
            SQLite(_t) => true,
        });
        assert!(is_sqlite);
        tx.rollback().await.unwrap();
    }
}
