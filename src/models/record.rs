//! Declared tables and records with constrained updates.
//!
//! A [`TableDef`] lists the columns a table exposes; a [`Record`] is one row
//! of it. Only declared columns can be written, so statement text is always
//! built from the declaration and values always travel as bind parameters.

use crate::db::session::Session;
use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, QueryParam};
use std::collections::BTreeMap;
use tracing::debug;

pub const CREATED_AT: &str = "created_at";
pub const UPDATED_AT: &str = "updated_at";
pub const DELETED: &str = "deleted";
pub const DELETED_AT: &str = "deleted_at";

/// Timestamps are taken from the database clock.
const NOW: &str = "CURRENT_TIMESTAMP";

/// Right-hand side of a generated assignment.
#[derive(Debug, Clone, PartialEq)]
enum SetValue {
    Param(QueryParam),
    /// SQL text built from the declaration, never from caller input.
    Expr(String),
}

/// Declaration of a table: name, columns and the primary key column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDef {
    name: String,
    columns: Vec<String>,
    primary_key: String,
    timestamps: bool,
    soft_delete: bool,
}

impl TableDef {
    /// Declare a table. The primary key is added to `columns` if missing.
    pub fn new<I, S>(name: impl Into<String>, primary_key: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let primary_key = primary_key.into();
        let mut cols: Vec<String> = vec![primary_key.clone()];
        for column in columns {
            let column = column.into();
            if !cols.contains(&column) {
                cols.push(column);
            }
        }
        Self {
            name: name.into(),
            columns: cols,
            primary_key,
            timestamps: false,
            soft_delete: false,
        }
    }

    /// Declare `created_at` and `updated_at`, set on insert and on every
    /// update unless written explicitly.
    pub fn with_timestamps(mut self) -> Self {
        self.add_column(CREATED_AT);
        self.add_column(UPDATED_AT);
        self.timestamps = true;
        self
    }

    /// Declare `deleted` and `deleted_at`. Live rows have `deleted = 0`; a
    /// soft-deleted row stores its own primary key there.
    pub fn with_soft_delete(mut self) -> Self {
        self.add_column(DELETED);
        self.add_column(DELETED_AT);
        self.soft_delete = true;
        self
    }

    fn add_column(&mut self, column: &str) {
        if !self.has_column(column) {
            self.columns.push(column.to_string());
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    pub fn has_timestamps(&self) -> bool {
        self.timestamps
    }

    pub fn has_soft_delete(&self) -> bool {
        self.soft_delete
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    fn check_column(&self, column: &str) -> DbResult<()> {
        if self.has_column(column) {
            Ok(())
        } else {
            Err(DbError::invalid_input(format!(
                "table '{}' has no column '{}'",
                self.name, column
            )))
        }
    }

    /// A new, unsaved record of this table.
    pub fn record(&self) -> Record<'_> {
        Record::new(self)
    }

    /// Bulk UPDATE of the rows matching `filter`.
    ///
    /// Filters are ANDed equality tests (`IS NULL` for null values); an empty
    /// filter updates every row. Returns the number of rows affected.
    pub async fn update_where(
        &self,
        session: &mut Session,
        filter: &[(&str, QueryParam)],
        values: &[(&str, QueryParam)],
    ) -> DbResult<u64> {
        if values.is_empty() {
            return Err(DbError::invalid_input("update_where requires at least one value"));
        }
        for (column, _) in filter.iter().chain(values) {
            self.check_column(column)?;
        }

        let mut sets: Vec<(&str, SetValue)> = values
            .iter()
            .map(|(column, value)| (*column, SetValue::Param(value.clone())))
            .collect();
        if self.timestamps && !values.iter().any(|(c, _)| *c == UPDATED_AT) {
            sets.push((UPDATED_AT, SetValue::Expr(NOW.to_string())));
        }

        let (sql, params) = self.update_statement(session.db_type(), filter, &sets);
        let result = session.execute(&sql, &params).await?;
        debug!(
            table = %self.name,
            rows_affected = result.rows_affected,
            "Bulk update finished"
        );
        Ok(result.rows_affected)
    }

    /// Mark the rows matching `filter` deleted without removing them.
    ///
    /// `updated_at` is left untouched. Returns the number of rows affected.
    pub async fn soft_delete_where(
        &self,
        session: &mut Session,
        filter: &[(&str, QueryParam)],
    ) -> DbResult<u64> {
        if !self.soft_delete {
            return Err(DbError::invalid_input(format!(
                "table '{}' has no soft-delete columns",
                self.name
            )));
        }
        for (column, _) in filter {
            self.check_column(column)?;
        }

        let db_type = session.db_type();
        let sets = [
            (
                DELETED,
                SetValue::Expr(db_type.quote_identifier(&self.primary_key)),
            ),
            (DELETED_AT, SetValue::Expr(NOW.to_string())),
        ];
        let (sql, params) = self.update_statement(db_type, filter, &sets);
        let result = session.execute(&sql, &params).await?;
        debug!(
            table = %self.name,
            rows_affected = result.rows_affected,
            "Soft delete finished"
        );
        Ok(result.rows_affected)
    }

    fn update_statement(
        &self,
        db_type: DatabaseType,
        filter: &[(&str, QueryParam)],
        sets: &[(&str, SetValue)],
    ) -> (String, Vec<QueryParam>) {
        let mut params: Vec<QueryParam> = Vec::with_capacity(filter.len() + sets.len());
        let assignments: Vec<String> = sets
            .iter()
            .map(|(column, value)| {
                let rhs = match value {
                    SetValue::Param(param) => {
                        params.push(param.clone());
                        db_type.placeholder(params.len())
                    }
                    SetValue::Expr(expr) => expr.clone(),
                };
                format!("{} = {}", db_type.quote_identifier(column), rhs)
            })
            .collect();

        let mut sql = format!(
            "UPDATE {} SET {}",
            db_type.quote_identifier(&self.name),
            assignments.join(", ")
        );
        if !filter.is_empty() {
            let conditions: Vec<String> = filter
                .iter()
                .map(|(column, value)| {
                    let column = db_type.quote_identifier(column);
                    if value.is_null() {
                        format!("{} IS NULL", column)
                    } else {
                        params.push(value.clone());
                        format!("{} = {}", column, db_type.placeholder(params.len()))
                    }
                })
                .collect();
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }

        (sql, params)
    }
}

/// One row of a declared table.
#[derive(Debug, Clone, PartialEq)]
pub struct Record<'t> {
    table: &'t TableDef,
    values: BTreeMap<String, QueryParam>,
    /// Primary key once the row exists in the database.
    key: Option<QueryParam>,
    /// Columns changed since the last save.
    dirty: Vec<String>,
}

impl<'t> Record<'t> {
    pub fn new(table: &'t TableDef) -> Self {
        Self {
            table,
            values: BTreeMap::new(),
            key: None,
            dirty: Vec::new(),
        }
    }

    pub fn table(&self) -> &TableDef {
        self.table
    }

    pub fn is_persisted(&self) -> bool {
        self.key.is_some()
    }

    /// Primary key of a saved record.
    pub fn key(&self) -> Option<&QueryParam> {
        self.key.as_ref()
    }

    pub fn get(&self, column: &str) -> Option<&QueryParam> {
        self.values.get(column)
    }

    /// Set column values. Nothing is changed if any column is undeclared.
    pub fn update<I, K, V>(&mut self, pairs: I) -> DbResult<&mut Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<QueryParam>,
    {
        let pairs: Vec<(String, QueryParam)> = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        for (column, _) in &pairs {
            self.table.check_column(column)?;
        }
        if self.is_persisted() {
            if let Some((column, _)) = pairs.iter().find(|(c, _)| c == self.table.primary_key()) {
                return Err(DbError::invalid_input(format!(
                    "primary key '{}' of a saved record cannot change",
                    column
                )));
            }
        }

        for (column, value) in pairs {
            if !self.dirty.contains(&column) {
                self.dirty.push(column.clone());
            }
            self.values.insert(column, value);
        }
        Ok(self)
    }

    /// INSERT the record, or UPDATE it by primary key once saved.
    pub async fn save(&mut self, session: &mut Session) -> DbResult<()> {
        if self.is_persisted() {
            self.update_existing(session).await
        } else {
            self.insert(session).await
        }
    }

    async fn insert(&mut self, session: &mut Session) -> DbResult<()> {
        let db_type = session.db_type();
        let pk = self.table.primary_key().to_string();

        if self.table.has_soft_delete() && !self.values.contains_key(DELETED) {
            self.values.insert(DELETED.to_string(), QueryParam::Int(0));
        }
        let (mut sql, params) = self.insert_statement(db_type);

        let key = match db_type {
            DatabaseType::PostgreSQL => {
                sql.push_str(&format!(" RETURNING {}", db_type.quote_identifier(&pk)));
                session
                    .fetch_optional(&sql, &params)
                    .await?
                    .and_then(|row| row.get(&pk).map(QueryParam::from))
            }
            DatabaseType::MySQL | DatabaseType::SQLite => {
                let result = session.execute(&sql, &params).await?;
                match self.values.get(&pk) {
                    Some(value) => Some(value.clone()),
                    None => result.last_insert_id.map(QueryParam::Int),
                }
            }
        };

        let key = key.ok_or_else(|| {
            DbError::internal(format!(
                "insert into '{}' returned no primary key",
                self.table.name()
            ))
        })?;
        self.values.insert(pk, key.clone());
        self.key = Some(key);
        self.dirty.clear();
        Ok(())
    }

    fn insert_statement(&self, db_type: DatabaseType) -> (String, Vec<QueryParam>) {
        let table = db_type.quote_identifier(self.table.name());
        let mut names = Vec::with_capacity(self.values.len() + 1);
        let mut exprs = Vec::with_capacity(self.values.len() + 1);
        let mut params = Vec::with_capacity(self.values.len());

        for (column, value) in &self.values {
            params.push(value.clone());
            names.push(db_type.quote_identifier(column));
            exprs.push(db_type.placeholder(params.len()));
        }
        if self.table.has_timestamps() && !self.values.contains_key(CREATED_AT) {
            names.push(db_type.quote_identifier(CREATED_AT));
            exprs.push(NOW.to_string());
        }

        let sql = if names.is_empty() {
            match db_type {
                DatabaseType::MySQL => format!("INSERT INTO {} () VALUES ()", table),
                DatabaseType::PostgreSQL | DatabaseType::SQLite => {
                    format!("INSERT INTO {} DEFAULT VALUES", table)
                }
            }
        } else {
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                table,
                names.join(", "),
                exprs.join(", ")
            )
        };
        (sql, params)
    }

    /// Soft-delete a saved record.
    pub async fn soft_delete(&mut self, session: &mut Session) -> DbResult<()> {
        let Some(key) = self.key.clone() else {
            return Err(DbError::invalid_input("cannot soft-delete an unsaved record"));
        };
        let filter = [(self.table.primary_key(), key.clone())];
        self.table.soft_delete_where(session, &filter).await?;
        self.values.insert(DELETED.to_string(), key);
        Ok(())
    }

    pub fn is_soft_deleted(&self) -> bool {
        self.key.is_some() && self.key.as_ref() == self.values.get(DELETED)
    }

    async fn update_existing(&mut self, session: &mut Session) -> DbResult<()> {
        if self.dirty.is_empty() {
            return Ok(());
        }
        let Some(key) = self.key.clone() else {
            return Err(DbError::internal("record has no primary key"));
        };

        let values: Vec<(&str, QueryParam)> = self
            .dirty
            .iter()
            .filter_map(|c| self.values.get(c).map(|v| (c.as_str(), v.clone())))
            .collect();
        let filter = [(self.table.primary_key(), key)];
        self.table.update_where(session, &filter, &values).await?;
        self.dirty.clear();
        Ok(())
    }
}
