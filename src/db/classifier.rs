//! Translation of native driver errors into canonical [`DbError`]s.

use crate::db::backend::{BackendRegistry, DEFAULT_REGISTRY};
use crate::db::native::{NativeError, NativeErrorClass};
use crate::error::DbError;

/// Classify a native error using the built-in descriptors.
pub fn classify(backend: &str, native: NativeError) -> DbError {
    DEFAULT_REGISTRY.classify(backend, native)
}

/// Classify an `sqlx` error using the built-in descriptors.
pub fn translate(backend: &str, err: &sqlx::Error) -> DbError {
    classify(backend, NativeError::from(err))
}

impl BackendRegistry {
    /// Map a native error to its canonical variant.
    ///
    /// Checks run in a fixed order so that a duplicate-key violation, which is
    /// also an integrity violation, always surfaces as `DuplicateEntry`.
    pub fn classify(&self, backend: &str, native: NativeError) -> DbError {
        if native.class == NativeErrorClass::PoolTimedOut {
            return DbError::PoolTimeout { elapsed_secs: None };
        }

        let Some(descriptor) = self.get(backend) else {
            return DbError::Unknown {
                backend: backend.to_string(),
                original: native,
            };
        };

        if let Some(dup) = descriptor.duplicate_key(&native) {
            return DbError::DuplicateEntry {
                columns: dup.columns,
                value: dup.value,
                native,
            };
        }
        if descriptor.is_deadlock(&native) {
            return DbError::Deadlock { native };
        }
        if descriptor.is_disconnect(&native) {
            return DbError::Disconnected { native };
        }
        if descriptor.is_data_error(&native) {
            return DbError::Data { native };
        }
        if descriptor.is_integrity(&native) {
            return DbError::Integrity { native };
        }

        DbError::Unknown {
            backend: backend.to_string(),
            original: native,
        }
    }

    /// Classify an `sqlx` error.
    pub fn translate(&self, backend: &str, err: &sqlx::Error) -> DbError {
        self.classify(backend, NativeError::from(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::backend::{DB2, MYSQL, POSTGRESQL, SQLITE};
    use crate::error::ErrorKind;

    fn op(message: &str) -> NativeError {
        NativeError::new(NativeErrorClass::Operational, message)
    }

    #[test]
    fn test_mysql_duplicate_entry() {
        let err = classify(
            MYSQL,
            op("Duplicate entry 'a' for key 'uniq_foo0foo'").with_code(1062),
        );
        match err {
            DbError::DuplicateEntry { columns, value, .. } => {
                assert_eq!(columns, vec!["foo"]);
                assert_eq!(value.as_deref(), Some("a"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_wins_over_integrity() {
        let native = NativeError::new(NativeErrorClass::Integrity, "UNIQUE constraint failed: foo.foo")
            .with_code(2067);
        assert_eq!(classify(SQLITE, native).kind(), ErrorKind::DuplicateEntry);
    }

    #[test]
    fn test_deadlock_per_backend() {
        assert_eq!(
            classify(MYSQL, op("Deadlock found").with_code(1213)).kind(),
            ErrorKind::Deadlock
        );
        assert_eq!(
            classify(POSTGRESQL, op("deadlock detected").with_sql_state("40P01")).kind(),
            ErrorKind::Deadlock
        );
        assert_eq!(
            classify(SQLITE, op("database is locked").with_code(5)).kind(),
            ErrorKind::Deadlock
        );
    }

    #[test]
    fn test_disconnect_per_backend() {
        assert_eq!(
            classify(MYSQL, op("Lost connection").with_code(2013)).kind(),
            ErrorKind::Disconnected
        );
        assert_eq!(
            classify(POSTGRESQL, op("terminating").with_sql_state("57P01")).kind(),
            ErrorKind::Disconnected
        );
        assert_eq!(
            classify(
                DB2,
                op("SQL30081N: DB2 Server connection is no longer active")
            )
            .kind(),
            ErrorKind::Disconnected
        );
        let io = NativeError::new(NativeErrorClass::Io, "broken pipe");
        assert_eq!(classify(SQLITE, io).kind(), ErrorKind::Disconnected);
    }

    #[test]
    fn test_data_error() {
        let err = classify(
            MYSQL,
            op("Data too long for column 'bar' at row 1").with_code(1406),
        );
        assert_eq!(err.kind(), ErrorKind::Data);
        assert_eq!(
            classify(POSTGRESQL, op("value too long").with_sql_state("22001")).kind(),
            ErrorKind::Data
        );
    }

    #[test]
    fn test_integrity_fallback() {
        let native = NativeError::new(NativeErrorClass::Integrity, "FOREIGN KEY constraint failed")
            .with_code(787);
        assert_eq!(classify(SQLITE, native).kind(), ErrorKind::Integrity);
        assert_eq!(
            classify(POSTGRESQL, op("violates foreign key").with_sql_state("23503")).kind(),
            ErrorKind::Integrity
        );
    }

    #[test]
    fn test_unknown_keeps_original() {
        let err = classify(MYSQL, op("You have an error in your SQL syntax").with_code(1064));
        match err {
            DbError::Unknown { backend, original } => {
                assert_eq!(backend, MYSQL);
                assert_eq!(original.numeric_code(), Some(1064));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unregistered_backend_is_unknown() {
        let err = classify("oracle", op("ORA-00001: unique constraint violated"));
        assert_eq!(err.kind(), ErrorKind::Unknown);
    }

    #[test]
    fn test_pool_timeout_not_retryable() {
        let err = translate(SQLITE, &sqlx::Error::PoolTimedOut);
        assert_eq!(err.kind(), ErrorKind::PoolTimeout);
        assert!(!err.is_retryable());
        assert!(matches!(err, DbError::PoolTimeout { elapsed_secs: None }));
        assert!(!err.to_string().contains("0s"));
    }

    #[test]
    fn test_custom_registry() {
        let registry = BackendRegistry::empty();
        assert_eq!(
            registry.classify(MYSQL, op("x").with_code(1213)).kind(),
            ErrorKind::Unknown
        );
    }
}
