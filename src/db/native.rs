//! Driver-independent snapshot of a native database error.
//!
//! `sqlx::Error` is neither `Clone` nor constructible for arbitrary backend
//! codes, so descriptors and the classifier work on [`NativeError`] instead.
//! It keeps exactly what backends expose in structured form: vendor code,
//! SQLSTATE, constraint name, detail line and message.

use sqlx::mysql::MySqlDatabaseError;
use sqlx::postgres::PgDatabaseError;
use std::fmt;

/// Coarse origin of a native error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NativeErrorClass {
    /// Error reported by the server while executing a statement.
    Operational,
    /// Constraint violation reported by the server.
    Integrity,
    /// Socket or file I/O failure.
    Io,
    /// Protocol or TLS failure on the wire.
    Protocol,
    /// No pooled connection became available in time.
    PoolTimedOut,
    /// The pool was closed while in use.
    PoolClosed,
    /// Invalid connection options.
    Configuration,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeError {
    pub class: NativeErrorClass,
    /// Vendor error code (MySQL error number, SQLite extended result code, ...).
    pub code: Option<String>,
    pub sql_state: Option<String>,
    pub message: String,
    pub constraint: Option<String>,
    /// PostgreSQL `DETAIL` line, e.g. `Key (foo)=(10) already exists.`
    pub detail: Option<String>,
}

impl NativeError {
    pub fn new(class: NativeErrorClass, message: impl Into<String>) -> Self {
        Self {
            class,
            code: None,
            sql_state: None,
            message: message.into(),
            constraint: None,
            detail: None,
        }
    }

    pub fn with_code(mut self, code: impl ToString) -> Self {
        self.code = Some(code.to_string());
        self
    }

    pub fn with_sql_state(mut self, sql_state: impl Into<String>) -> Self {
        self.sql_state = Some(sql_state.into());
        self
    }

    pub fn with_constraint(mut self, constraint: impl Into<String>) -> Self {
        self.constraint = Some(constraint.into());
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Vendor code parsed as an integer.
    pub fn numeric_code(&self) -> Option<i64> {
        self.code.as_deref().and_then(|c| c.trim().parse().ok())
    }

    /// True for failures of the connection itself rather than of a statement.
    pub fn is_transport(&self) -> bool {
        matches!(
            self.class,
            NativeErrorClass::Io | NativeErrorClass::Protocol | NativeErrorClass::PoolClosed
        )
    }

    /// SQLSTATE class (first two characters), e.g. `23` for integrity violations.
    pub fn sql_state_class(&self) -> Option<&str> {
        self.sql_state.as_deref().and_then(|s| s.get(..2))
    }
}

impl fmt::Display for NativeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.code, &self.sql_state) {
            (Some(code), _) => write!(f, "({}) {}", code, self.message),
            (None, Some(state)) => write!(f, "[{}] {}", state, self.message),
            (None, None) => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for NativeError {}

impl From<&sqlx::Error> for NativeError {
    fn from(err: &sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) => {
                let class = match db_err.kind() {
                    sqlx::error::ErrorKind::UniqueViolation
                    | sqlx::error::ErrorKind::ForeignKeyViolation
                    | sqlx::error::ErrorKind::NotNullViolation
                    | sqlx::error::ErrorKind::CheckViolation => NativeErrorClass::Integrity,
                    _ => NativeErrorClass::Operational,
                };
                let mut native = NativeError::new(class, db_err.message());

                if let Some(mysql) = db_err.try_downcast_ref::<MySqlDatabaseError>() {
                    native.code = Some(mysql.number().to_string());
                    native.sql_state = mysql.code().map(String::from);
                } else if let Some(pg) = db_err.try_downcast_ref::<PgDatabaseError>() {
                    native.sql_state = Some(pg.code().to_string());
                    native.detail = pg.detail().map(String::from);
                } else {
                    native.code = db_err.code().map(|c| c.into_owned());
                }

                native.constraint = db_err.constraint().map(String::from);
                native
            }
            sqlx::Error::Io(io_err) => NativeError::new(NativeErrorClass::Io, io_err.to_string()),
            sqlx::Error::Tls(tls_err) => {
                NativeError::new(NativeErrorClass::Protocol, tls_err.to_string())
            }
            sqlx::Error::Protocol(msg) => NativeError::new(NativeErrorClass::Protocol, msg.clone()),
            sqlx::Error::PoolTimedOut => {
                NativeError::new(NativeErrorClass::PoolTimedOut, "pool timed out")
            }
            sqlx::Error::PoolClosed => NativeError::new(NativeErrorClass::PoolClosed, "pool closed"),
            sqlx::Error::WorkerCrashed => {
                NativeError::new(NativeErrorClass::Io, "database worker crashed")
            }
            sqlx::Error::Configuration(msg) => {
                NativeError::new(NativeErrorClass::Configuration, msg.to_string())
            }
            other => NativeError::new(NativeErrorClass::Other, other.to_string()),
        }
    }
}

impl From<sqlx::Error> for NativeError {
    fn from(err: sqlx::Error) -> Self {
        NativeError::from(&err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_prefers_vendor_code() {
        let err = NativeError::new(NativeErrorClass::Operational, "MySQL server has gone away")
            .with_code(2006)
            .with_sql_state("HY000");
        assert_eq!(err.to_string(), "(2006) MySQL server has gone away");

        let err = NativeError::new(NativeErrorClass::Integrity, "duplicate key").with_sql_state("23505");
        assert_eq!(err.to_string(), "[23505] duplicate key");
    }

    #[test]
    fn test_numeric_code() {
        let err = NativeError::new(NativeErrorClass::Operational, "x").with_code("-30081");
        assert_eq!(err.numeric_code(), Some(-30081));
        assert_eq!(NativeError::new(NativeErrorClass::Other, "x").numeric_code(), None);
    }

    #[test]
    fn test_sql_state_class() {
        let err = NativeError::new(NativeErrorClass::Operational, "x").with_sql_state("08006");
        assert_eq!(err.sql_state_class(), Some("08"));
    }

    #[test]
    fn test_from_sqlx_transport_errors() {
        let io = sqlx::Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "connection reset by peer",
        ));
        let native = NativeError::from(&io);
        assert_eq!(native.class, NativeErrorClass::Io);
        assert!(native.is_transport());

        assert_eq!(
            NativeError::from(sqlx::Error::PoolTimedOut).class,
            NativeErrorClass::PoolTimedOut
        );
        assert!(NativeError::from(sqlx::Error::PoolClosed).is_transport());
        assert!(!NativeError::from(sqlx::Error::RowNotFound).is_transport());
    }
}
