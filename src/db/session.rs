//! Sessions with scoped, nestable transactions.
//!
//! A [`Session`] is a unit of work on one engine. Only the outermost scope
//! opens and finishes the driver transaction; inner scopes join it. A failed
//! inner scope marks the whole transaction rollback-only, so the outer
//! commit rolls back and reports it.

use crate::db::engine::Engine;
use crate::db::params::build_query;
use crate::db::pool::DbPool;
use crate::db::types::{JsonRow, RowToJson};
use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, QueryParam};
use futures_util::future::BoxFuture;
use sqlx::{MySql, Postgres, Sqlite, Transaction};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Database-specific transaction wrapper.
pub enum DbTransaction {
    MySql(Transaction<'static, MySql>),
    Postgres(Transaction<'static, Postgres>),
    SQLite(Transaction<'static, Sqlite>),
}

impl DbTransaction {
    /// Begin a transaction on a pooled connection.
    pub async fn begin(pool: &DbPool) -> Result<Self, sqlx::Error> {
        Ok(match pool {
            DbPool::MySql(p) => DbTransaction::MySql(p.begin().await?),
            DbPool::Postgres(p) => DbTransaction::Postgres(p.begin().await?),
            DbPool::SQLite(p) => DbTransaction::SQLite(p.begin().await?),
        })
    }

    pub fn db_type(&self) -> DatabaseType {
        impl_tx_dispatch!(self, {
            MySql(_tx) => DatabaseType::MySQL,
            Postgres(_tx) => DatabaseType::PostgreSQL,
            SQLite(_tx) => DatabaseType::SQLite,
        })
    }

    pub async fn commit(self) -> Result<(), sqlx::Error> {
        impl_tx_dispatch!(self, {
            MySql(tx) => tx.commit().await,
            Postgres(tx) => tx.commit().await,
            SQLite(tx) => tx.commit().await,
        })
    }

    pub async fn rollback(self) -> Result<(), sqlx::Error> {
        impl_tx_dispatch!(self, {
            MySql(tx) => tx.rollback().await,
            Postgres(tx) => tx.rollback().await,
            SQLite(tx) => tx.rollback().await,
        })
    }
}

/// Outcome of a write statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecResult {
    pub rows_affected: u64,
    /// Generated key of the last inserted row (MySQL and SQLite only).
    pub last_insert_id: Option<i64>,
}

/// How much of each statement gets logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum SqlLogLevel {
    Off,
    Statements,
    Full,
}

impl SqlLogLevel {
    fn from_debug(connection_debug: u32) -> Self {
        match connection_debug {
            100.. => Self::Full,
            50..=99 => Self::Statements,
            _ => Self::Off,
        }
    }
}

/// A unit of work bound to one engine.
pub struct Session {
    id: String,
    engine: Arc<Engine>,
    transaction: Option<DbTransaction>,
    depth: u32,
    rollback_only: bool,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("role", &self.engine.role())
            .field("depth", &self.depth)
            .field("rollback_only", &self.rollback_only)
            .finish_non_exhaustive()
    }
}

impl Session {
    pub(crate) fn new(engine: Arc<Engine>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            engine,
            transaction: None,
            depth: 0,
            rollback_only: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn db_type(&self) -> DatabaseType {
        self.engine.db_type()
    }

    pub fn in_transaction(&self) -> bool {
        self.depth > 0
    }

    /// Nesting depth of open transaction scopes.
    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn is_rollback_only(&self) -> bool {
        self.rollback_only
    }

    /// Open a transaction scope.
    pub async fn begin(&mut self) -> DbResult<()> {
        if self.depth == 0 {
            let tx = DbTransaction::begin(self.engine.pool())
                .await
                .map_err(|e| self.engine.translate(&e))?;
            self.transaction = Some(tx);
            self.rollback_only = false;
            debug!(session_id = %self.id, "Transaction started");
        }
        self.depth += 1;
        Ok(())
    }

    /// Close the innermost scope successfully.
    ///
    /// Only the outermost commit reaches the driver. If an inner scope rolled
    /// back, the outermost commit rolls back instead and returns an error.
    pub async fn commit(&mut self) -> DbResult<()> {
        if self.depth == 0 {
            return Err(DbError::transaction("no transaction in progress", &self.id));
        }
        self.depth -= 1;
        if self.depth > 0 {
            return Ok(());
        }

        let tx = self.take_transaction()?;
        if std::mem::take(&mut self.rollback_only) {
            tx.rollback().await.map_err(|e| self.engine.translate(&e))?;
            warn!(session_id = %self.id, "Rolled back transaction marked rollback-only");
            return Err(DbError::transaction(
                "transaction rolled back: an inner scope failed",
                &self.id,
            ));
        }

        tx.commit().await.map_err(|e| self.engine.translate(&e))?;
        debug!(session_id = %self.id, "Transaction committed");
        Ok(())
    }

    /// Close the innermost scope unsuccessfully.
    ///
    /// An inner rollback only marks the transaction rollback-only.
    pub async fn rollback(&mut self) -> DbResult<()> {
        if self.depth == 0 {
            return Err(DbError::transaction("no transaction in progress", &self.id));
        }
        self.depth -= 1;
        if self.depth > 0 {
            self.rollback_only = true;
            return Ok(());
        }

        self.rollback_only = false;
        let tx = self.take_transaction()?;
        tx.rollback().await.map_err(|e| self.engine.translate(&e))?;
        debug!(session_id = %self.id, "Transaction rolled back");
        Ok(())
    }

    fn take_transaction(&mut self) -> DbResult<DbTransaction> {
        self.transaction
            .take()
            .ok_or_else(|| DbError::internal("transaction scope open without a driver transaction"))
    }

    /// Run `f` inside a transaction scope.
    ///
    /// Commits when `f` succeeds. Rolls back and returns the original error
    /// when it fails.
    pub async fn transaction<T, F>(&mut self, f: F) -> DbResult<T>
    where
        F: for<'s> FnOnce(&'s mut Session) -> BoxFuture<'s, DbResult<T>>,
    {
        self.begin().await?;
        match f(self).await {
            Ok(value) => {
                self.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = self.rollback().await {
                    warn!(
                        session_id = %self.id,
                        error = %rollback_err,
                        "Rollback after failed transaction scope also failed"
                    );
                }
                Err(err)
            }
        }
    }

    /// Execute a statement and return the affected row count.
    pub async fn execute(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<ExecResult> {
        self.log_statement(sql, params.len());
        let started = Instant::now();

        let result = match (&mut self.transaction, self.engine.pool()) {
            (Some(DbTransaction::MySql(tx)), _) => build_query::<MySql>(sql, params)
                .execute(&mut **tx)
                .await
                .map(|r| exec_result(r.rows_affected(), i64::try_from(r.last_insert_id()).ok())),
            (Some(DbTransaction::Postgres(tx)), _) => build_query::<Postgres>(sql, params)
                .execute(&mut **tx)
                .await
                .map(|r| exec_result(r.rows_affected(), None)),
            (Some(DbTransaction::SQLite(tx)), _) => build_query::<Sqlite>(sql, params)
                .execute(&mut **tx)
                .await
                .map(|r| exec_result(r.rows_affected(), Some(r.last_insert_rowid()))),
            (None, DbPool::MySql(pool)) => build_query::<MySql>(sql, params)
                .execute(pool)
                .await
                .map(|r| exec_result(r.rows_affected(), i64::try_from(r.last_insert_id()).ok())),
            (None, DbPool::Postgres(pool)) => build_query::<Postgres>(sql, params)
                .execute(pool)
                .await
                .map(|r| exec_result(r.rows_affected(), None)),
            (None, DbPool::SQLite(pool)) => build_query::<Sqlite>(sql, params)
                .execute(pool)
                .await
                .map(|r| exec_result(r.rows_affected(), Some(r.last_insert_rowid()))),
        };

        let result = result.map_err(|e| self.fail_statement(&e))?;
        if self.log_level() == SqlLogLevel::Full {
            debug!(
                session_id = %self.id,
                rows_affected = result.rows_affected,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Statement finished"
            );
        }
        Ok(result)
    }

    /// Run a query and decode every row.
    pub async fn fetch_all(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<Vec<JsonRow>> {
        self.log_statement(sql, params.len());
        let started = Instant::now();

        let rows = match (&mut self.transaction, self.engine.pool()) {
            (Some(DbTransaction::MySql(tx)), _) => build_query::<MySql>(sql, params)
                .fetch_all(&mut **tx)
                .await
                .map(rows_to_json),
            (Some(DbTransaction::Postgres(tx)), _) => build_query::<Postgres>(sql, params)
                .fetch_all(&mut **tx)
                .await
                .map(rows_to_json),
            (Some(DbTransaction::SQLite(tx)), _) => build_query::<Sqlite>(sql, params)
                .fetch_all(&mut **tx)
                .await
                .map(rows_to_json),
            (None, DbPool::MySql(pool)) => build_query::<MySql>(sql, params)
                .fetch_all(pool)
                .await
                .map(rows_to_json),
            (None, DbPool::Postgres(pool)) => build_query::<Postgres>(sql, params)
                .fetch_all(pool)
                .await
                .map(rows_to_json),
            (None, DbPool::SQLite(pool)) => build_query::<Sqlite>(sql, params)
                .fetch_all(pool)
                .await
                .map(rows_to_json),
        };

        let rows = rows.map_err(|e| self.fail_statement(&e))?;
        if self.log_level() == SqlLogLevel::Full {
            debug!(
                session_id = %self.id,
                rows = rows.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Query finished"
            );
        }
        Ok(rows)
    }

    /// First row of a query, if any.
    pub async fn fetch_optional(
        &mut self,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<Option<JsonRow>> {
        Ok(self.fetch_all(sql, params).await?.into_iter().next())
    }

    /// Roll back any open transaction and end the session.
    pub async fn close(mut self) -> DbResult<()> {
        self.depth = 0;
        self.rollback_only = false;
        match self.transaction.take() {
            Some(tx) => tx.rollback().await.map_err(|e| self.engine.translate(&e)),
            None => Ok(()),
        }
    }

    fn log_level(&self) -> SqlLogLevel {
        SqlLogLevel::from_debug(self.engine.options().connection_debug)
    }

    fn log_statement(&self, sql: &str, param_count: usize) {
        let trace = self.engine.options().connection_trace;
        let role = self.engine.role();

        match self.log_level() {
            SqlLogLevel::Off if trace => {
                debug!(session_id = %self.id, role = %role, sql = %sql, "Executing statement")
            }
            SqlLogLevel::Off => {}
            SqlLogLevel::Statements if trace => {
                info!(session_id = %self.id, role = %role, sql = %sql, "Executing statement")
            }
            SqlLogLevel::Statements => info!(sql = %sql, "Executing statement"),
            SqlLogLevel::Full if trace => info!(
                session_id = %self.id,
                role = %role,
                params = param_count,
                sql = %sql,
                "Executing statement"
            ),
            SqlLogLevel::Full => info!(params = param_count, sql = %sql, "Executing statement"),
        }
    }

    fn fail_statement(&self, err: &sqlx::Error) -> DbError {
        let err = self.engine.translate(err);
        debug!(
            session_id = %self.id,
            kind = ?err.kind(),
            error = %err,
            "Statement failed"
        );
        err
    }
}

fn rows_to_json<R: RowToJson>(rows: Vec<R>) -> Vec<JsonRow> {
    rows.iter().map(RowToJson::to_json_map).collect()
}

fn exec_result(rows_affected: u64, last_insert_id: Option<i64>) -> ExecResult {
    ExecResult {
        rows_affected,
        last_insert_id,
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // sqlx rolls back a dropped transaction when its connection returns
        // to the pool.
        if self.transaction.is_some() {
            warn!(
                session_id = %self.id,
                depth = self.depth,
                "Session dropped with an open transaction, rolling back"
            );
        }
    }
}
