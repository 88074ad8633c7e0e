//! Per-backend capability descriptors.
//!
//! Each supported backend registers one [`BackendDescriptor`] that knows how
//! that backend signals disconnects, deadlocks, duplicate keys and data
//! errors. The classifier and the disconnect detector only ever talk to the
//! descriptor; adding a backend means registering a new descriptor.

use crate::db::native::{NativeError, NativeErrorClass};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub const MYSQL: &str = "mysql";
pub const POSTGRESQL: &str = "postgresql";
pub const SQLITE: &str = "sqlite";
pub const DB2: &str = "ibm_db_sa";

/// Duplicate-key details extracted from a native error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateKey {
    pub columns: Vec<String>,
    pub value: Option<String>,
}

/// Capability set of one database backend.
pub trait BackendDescriptor: Send + Sync + fmt::Debug {
    /// Backend name as used in connection URLs (`mysql`, `postgresql`, ...).
    fn name(&self) -> &str;

    /// Whether the error means the connection itself is unusable.
    fn is_disconnect(&self, err: &NativeError) -> bool;

    fn is_deadlock(&self, err: &NativeError) -> bool;

    /// `Some` when the error is a unique-constraint violation.
    fn duplicate_key(&self, err: &NativeError) -> Option<DuplicateKey>;

    fn is_data_error(&self, _err: &NativeError) -> bool {
        false
    }

    fn is_integrity(&self, err: &NativeError) -> bool {
        err.class == NativeErrorClass::Integrity || err.sql_state_class() == Some("23")
    }
}

/// Derive column names from a unique constraint name.
///
/// Constraints named `uniq_<table>0<col1>0<col2>` list their columns after the
/// table; a `uniq_` name without columns yields none. PostgreSQL's generated `<table>_<col>_key` names yield the middle
/// part. Anything else is returned as-is.
pub fn columns_from_constraint_name(name: &str, backend: &str) -> Vec<String> {
    // MySQL 8 reports keys as `table.key`.
    let name = name.rsplit('.').next().unwrap_or(name);

    if let Some(rest) = name.strip_prefix("uniq_") {
        return rest.split('0').skip(1).map(String::from).collect();
    }

    if backend == POSTGRESQL {
        if let (Some(first), Some(last)) = (name.find('_'), name.rfind('_')) {
            if first < last {
                return vec![name[first + 1..last].to_string()];
            }
        }
    }

    vec![name.to_string()]
}

fn split_column_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(|c| c.trim())
        .filter(|c| !c.is_empty())
        .map(|c| {
            let c = c.trim_matches('"').trim_matches('`');
            // SQLite reports `table.column`.
            c.rsplit('.').next().unwrap_or(c).to_string()
        })
        .collect()
}

// =============================================================================
// MySQL
// =============================================================================

static MYSQL_DUPLICATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)Duplicate entry '(?P<value>.*)' for key '(?P<key>[^']+)'")
        .expect("valid regex")
});

/// Client-side codes raised when the server drops the transport.
pub const MYSQL_DISCONNECT_CODES: &[i64] = &[2006, 2013, 2014, 2045, 2055];
const MYSQL_DUP_ENTRY: i64 = 1062;
const MYSQL_LOCK_DEADLOCK: i64 = 1213;
const MYSQL_DATA_CODES: &[i64] = &[1264, 1265, 1366, 1406];

#[derive(Debug, Default)]
pub struct MySqlDescriptor;

impl BackendDescriptor for MySqlDescriptor {
    fn name(&self) -> &str {
        MYSQL
    }

    fn is_disconnect(&self, err: &NativeError) -> bool {
        err.is_transport()
            || err
                .numeric_code()
                .is_some_and(|c| MYSQL_DISCONNECT_CODES.contains(&c))
    }

    fn is_deadlock(&self, err: &NativeError) -> bool {
        err.numeric_code() == Some(MYSQL_LOCK_DEADLOCK)
    }

    fn duplicate_key(&self, err: &NativeError) -> Option<DuplicateKey> {
        if err.numeric_code() != Some(MYSQL_DUP_ENTRY) {
            return None;
        }
        match MYSQL_DUPLICATE.captures(&err.message) {
            Some(caps) => Some(DuplicateKey {
                columns: columns_from_constraint_name(&caps["key"], MYSQL),
                value: Some(caps["value"].to_string()),
            }),
            None => Some(DuplicateKey {
                columns: err
                    .constraint
                    .as_deref()
                    .map(|c| columns_from_constraint_name(c, MYSQL))
                    .unwrap_or_default(),
                value: None,
            }),
        }
    }

    fn is_data_error(&self, err: &NativeError) -> bool {
        err.numeric_code()
            .is_some_and(|c| MYSQL_DATA_CODES.contains(&c))
            || err.sql_state_class() == Some("22")
    }
}

// =============================================================================
// PostgreSQL
// =============================================================================

static PG_DUPLICATE_DETAIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)Key \((?P<columns>.*)\)=\((?P<value>.*)\) already exists")
        .expect("valid regex")
});

const PG_UNIQUE_VIOLATION: &str = "23505";
const PG_DEADLOCK_STATES: &[&str] = &["40P01", "40001"];
const PG_SHUTDOWN_STATES: &[&str] = &["57P01", "57P02", "57P03"];

#[derive(Debug, Default)]
pub struct PostgresDescriptor;

impl BackendDescriptor for PostgresDescriptor {
    fn name(&self) -> &str {
        POSTGRESQL
    }

    fn is_disconnect(&self, err: &NativeError) -> bool {
        err.is_transport()
            || err.sql_state_class() == Some("08")
            || err
                .sql_state
                .as_deref()
                .is_some_and(|s| PG_SHUTDOWN_STATES.contains(&s))
    }

    fn is_deadlock(&self, err: &NativeError) -> bool {
        err.sql_state
            .as_deref()
            .is_some_and(|s| PG_DEADLOCK_STATES.contains(&s))
    }

    fn duplicate_key(&self, err: &NativeError) -> Option<DuplicateKey> {
        if err.sql_state.as_deref() != Some(PG_UNIQUE_VIOLATION) {
            return None;
        }
        if let Some(caps) = err
            .detail
            .as_deref()
            .and_then(|d| PG_DUPLICATE_DETAIL.captures(d))
        {
            return Some(DuplicateKey {
                columns: split_column_list(&caps["columns"]),
                value: Some(caps["value"].to_string()),
            });
        }
        Some(DuplicateKey {
            columns: err
                .constraint
                .as_deref()
                .map(|c| columns_from_constraint_name(c, POSTGRESQL))
                .unwrap_or_default(),
            value: None,
        })
    }

    fn is_data_error(&self, err: &NativeError) -> bool {
        err.sql_state_class() == Some("22")
    }
}

// =============================================================================
// SQLite
// =============================================================================

static SQLITE_UNIQUE_FAILED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"UNIQUE constraint failed: (?P<columns>.+)$").expect("valid regex"));
static SQLITE_LEGACY_NOT_UNIQUE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"columns? (?P<columns>.+) (?:is|are) not unique").expect("valid regex")
});

const SQLITE_BUSY: i64 = 5;
const SQLITE_LOCKED: i64 = 6;
const SQLITE_TOOBIG: i64 = 18;
const SQLITE_CONSTRAINT: i64 = 19;
const SQLITE_MISMATCH: i64 = 20;
const SQLITE_CONSTRAINT_PRIMARYKEY: i64 = 1555;
const SQLITE_CONSTRAINT_UNIQUE: i64 = 2067;

/// Primary result code of a (possibly extended) SQLite code.
fn sqlite_primary_code(err: &NativeError) -> Option<i64> {
    err.numeric_code().map(|c| c & 0xff)
}

#[derive(Debug, Default)]
pub struct SqliteDescriptor;

impl BackendDescriptor for SqliteDescriptor {
    fn name(&self) -> &str {
        SQLITE
    }

    fn is_disconnect(&self, err: &NativeError) -> bool {
        err.is_transport()
    }

    fn is_deadlock(&self, err: &NativeError) -> bool {
        matches!(sqlite_primary_code(err), Some(SQLITE_BUSY | SQLITE_LOCKED))
    }

    fn duplicate_key(&self, err: &NativeError) -> Option<DuplicateKey> {
        let unique_code = matches!(
            err.numeric_code(),
            Some(SQLITE_CONSTRAINT_UNIQUE | SQLITE_CONSTRAINT_PRIMARYKEY)
        );
        let caps = SQLITE_UNIQUE_FAILED
            .captures(&err.message)
            .or_else(|| SQLITE_LEGACY_NOT_UNIQUE.captures(&err.message));

        match caps {
            Some(caps) => Some(DuplicateKey {
                columns: split_column_list(&caps["columns"]),
                value: None,
            }),
            None if unique_code => Some(DuplicateKey {
                columns: Vec::new(),
                value: None,
            }),
            None => None,
        }
    }

    fn is_data_error(&self, err: &NativeError) -> bool {
        matches!(
            sqlite_primary_code(err),
            Some(SQLITE_TOOBIG | SQLITE_MISMATCH)
        )
    }

    fn is_integrity(&self, err: &NativeError) -> bool {
        err.class == NativeErrorClass::Integrity
            || sqlite_primary_code(err) == Some(SQLITE_CONSTRAINT)
    }
}

// =============================================================================
// DB2
// =============================================================================

/// DB2 exposes only message text and SQLCODE; no pool driver exists for it,
/// so it participates in classification only.
#[derive(Debug, Default)]
pub struct Db2Descriptor;

impl BackendDescriptor for Db2Descriptor {
    fn name(&self) -> &str {
        DB2
    }

    fn is_disconnect(&self, err: &NativeError) -> bool {
        err.is_transport()
            || err.numeric_code() == Some(-30081)
            || err.message.contains("SQL30081N")
    }

    fn is_deadlock(&self, err: &NativeError) -> bool {
        err.numeric_code() == Some(-911) || err.message.contains("SQL0911N")
    }

    fn duplicate_key(&self, err: &NativeError) -> Option<DuplicateKey> {
        (err.numeric_code() == Some(-803) || err.message.contains("SQL0803N")).then(|| {
            DuplicateKey {
                columns: Vec::new(),
                value: None,
            }
        })
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Descriptors keyed by backend name.
#[derive(Debug, Clone, Default)]
pub struct BackendRegistry {
    descriptors: HashMap<String, Arc<dyn BackendDescriptor>>,
}

/// Registry holding the built-in descriptors.
pub static DEFAULT_REGISTRY: Lazy<Arc<BackendRegistry>> =
    Lazy::new(|| Arc::new(BackendRegistry::with_defaults()));

impl BackendRegistry {
    /// Create a registry with no descriptors.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Create a registry with the MySQL, PostgreSQL, SQLite and DB2 descriptors.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(MySqlDescriptor));
        registry.register(Arc::new(PostgresDescriptor));
        registry.register(Arc::new(SqliteDescriptor));
        registry.register(Arc::new(Db2Descriptor));
        registry
    }

    /// Register a descriptor, replacing any previous one with the same name.
    pub fn register(&mut self, descriptor: Arc<dyn BackendDescriptor>) {
        self.descriptors
            .insert(descriptor.name().to_string(), descriptor);
    }

    pub fn get(&self, backend: &str) -> Option<Arc<dyn BackendDescriptor>> {
        self.descriptors.get(backend).cloned()
    }

    pub fn contains(&self, backend: &str) -> bool {
        self.descriptors.contains_key(backend)
    }

    /// Registered backend names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.descriptors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
