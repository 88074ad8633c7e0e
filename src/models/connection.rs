//! Connection URL handling.
//!
//! URLs follow the `backend[+driver]://user:pass@host/db` convention. The
//! backend part selects the descriptor and the pool driver; the optional
//! driver suffix is accepted and ignored.

use crate::db::backend::{DB2, MYSQL, POSTGRESQL, SQLITE};
use crate::error::{DbError, DbResult};
use serde::{Deserialize, Serialize};
use url::Url;

/// Backends with a pool driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    PostgreSQL,
    /// Includes MariaDB
    MySQL,
    SQLite,
}

impl DatabaseType {
    /// Pool driver for a normalized backend name, if one exists.
    pub fn from_backend(backend: &str) -> Option<Self> {
        match backend {
            POSTGRESQL => Some(Self::PostgreSQL),
            MYSQL => Some(Self::MySQL),
            SQLITE => Some(Self::SQLite),
            _ => None,
        }
    }

    /// Registry name of this backend.
    pub fn backend_name(&self) -> &'static str {
        match self {
            Self::PostgreSQL => POSTGRESQL,
            Self::MySQL => MYSQL,
            Self::SQLite => SQLITE,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::PostgreSQL => "PostgreSQL",
            Self::MySQL => "MySQL",
            Self::SQLite => "SQLite",
        }
    }

    /// Bind placeholder for the 1-based parameter `index`.
    pub fn placeholder(&self, index: usize) -> String {
        match self {
            Self::PostgreSQL => format!("${}", index),
            Self::MySQL | Self::SQLite => "?".to_string(),
        }
    }

    /// Quote an identifier for this backend.
    pub fn quote_identifier(&self, ident: &str) -> String {
        match self {
            Self::MySQL => format!("`{}`", ident.replace('`', "``")),
            Self::PostgreSQL | Self::SQLite => format!("\"{}\"", ident.replace('"', "\"\"")),
        }
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Normalize a URL scheme (`mysql+pymysql`, `postgres`, ...) to a backend name.
pub fn backend_name_from_scheme(scheme: &str) -> String {
    let base = scheme.split('+').next().unwrap_or(scheme).to_lowercase();
    match base.as_str() {
        "postgres" | "postgresql" => POSTGRESQL.to_string(),
        "mysql" | "mariadb" => MYSQL.to_string(),
        "sqlite" => SQLITE.to_string(),
        "db2" | "ibm_db_sa" => DB2.to_string(),
        _ => base,
    }
}

/// Mask the password in a connection URL for display.
pub fn mask_url(raw: &str) -> String {
    if let Ok(mut url) = Url::parse(raw) {
        if url.password().is_some() && url.set_password(Some("****")).is_ok() {
            return url.to_string();
        }
        return raw.to_string();
    }

    // Simple masking for strings the URL parser rejects.
    if let Some(at_pos) = raw.rfind('@') {
        if let Some(colon_pos) = raw[..at_pos].rfind(':') {
            if raw[..colon_pos].contains("://") || raw[..colon_pos].contains('@') {
                return format!("{}****{}", &raw[..colon_pos + 1], &raw[at_pos..]);
            }
        }
    }
    raw.to_string()
}

/// A parsed connection URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionUrl {
    raw: String,
    backend: String,
    driver: Option<String>,
}

impl ConnectionUrl {
    pub fn parse(raw: &str) -> DbResult<Self> {
        let raw = raw.trim();
        let scheme = match raw.find(':') {
            Some(pos) if pos > 0 => &raw[..pos],
            _ => {
                return Err(DbError::config(
                    "connection",
                    format!("'{}' is not a database URL", mask_url(raw)),
                ));
            }
        };

        Ok(Self {
            raw: raw.to_string(),
            backend: backend_name_from_scheme(scheme),
            driver: scheme.split_once('+').map(|(_, d)| d.to_string()),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Normalized backend name, e.g. `mysql` for `mysql+pymysql://...`.
    pub fn backend(&self) -> &str {
        &self.backend
    }

    pub fn driver(&self) -> Option<&str> {
        self.driver.as_deref()
    }

    pub fn database_type(&self) -> Option<DatabaseType> {
        DatabaseType::from_backend(&self.backend)
    }

    pub fn masked(&self) -> String {
        mask_url(&self.raw)
    }

    /// Everything after `scheme:`.
    fn rest(&self) -> &str {
        self.raw
            .split_once(':')
            .map(|(_, rest)| rest)
            .unwrap_or_default()
    }

    /// Database part of a SQLite URL: `sqlite:///rel.db` names `rel.db`,
    /// `sqlite:////abs.db` names `/abs.db`.
    fn sqlite_path(&self) -> &str {
        let rest = self.rest();
        match rest.strip_prefix("//") {
            Some(path) => path.strip_prefix('/').unwrap_or(path),
            None => rest,
        }
    }

    fn sqlite_database(&self) -> &str {
        self.sqlite_path().split('?').next().unwrap_or_default()
    }

    /// True for SQLite URLs that name no file (`sqlite://`, `sqlite::memory:`).
    pub fn is_sqlite_memory(&self) -> bool {
        if self.backend != SQLITE {
            return false;
        }
        let database = self.sqlite_database();
        database.is_empty() || database == ":memory:" || self.raw.contains("mode=memory")
    }

    /// URL in the form the pool driver accepts.
    pub fn driver_url(&self) -> DbResult<String> {
        match self.database_type() {
            Some(DatabaseType::MySQL) => Ok(format!("mysql:{}", self.rest())),
            Some(DatabaseType::PostgreSQL) => Ok(format!("postgres:{}", self.rest())),
            Some(DatabaseType::SQLite) if self.is_sqlite_memory() => {
                Ok("sqlite::memory:".to_string())
            }
            Some(DatabaseType::SQLite) => Ok(format!("sqlite://{}", self.sqlite_path())),
            None => Err(DbError::config(
                "connection",
                format!("no pool driver available for backend '{}'", self.backend),
            )),
        }
    }
}

impl std::fmt::Display for ConnectionUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.masked())
    }
}
