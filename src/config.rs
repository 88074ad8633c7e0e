//! Configuration handling.
//!
//! Raw configuration arrives as `(section, key, value)` triples, usually read
//! from ini-style files. [`DatabaseOptions::from_raw`] resolves the canonical
//! `[database]` options, falling back to the deprecated names older
//! deployments still use.

use crate::error::{DbError, DbResult};
use crate::models::connection::mask_url;
use clap::Parser;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Section holding the canonical options.
pub const DATABASE_SECTION: &str = "database";

pub const DEFAULT_MIN_POOL_SIZE: u32 = 1;
pub const DEFAULT_MAX_POOL_SIZE: u32 = 5;
pub const DEFAULT_MAX_OVERFLOW: u32 = 0;
pub const DEFAULT_MAX_RETRIES: i64 = 10;
pub const DEFAULT_RETRY_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_POOL_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 3600;
pub const MAX_CONNECTION_DEBUG: u32 = 100;

// =============================================================================
// Raw configuration
// =============================================================================

/// Ordered `(section, key, value)` triples.
///
/// Later entries override earlier ones for the same section and key, so
/// files loaded later take precedence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawConfig {
    entries: Vec<(String, String, String)>,
}

impl RawConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry.
    pub fn set(
        &mut self,
        section: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> &mut Self {
        self.entries
            .push((section.into(), key.into(), value.into()));
        self
    }

    /// Builder form of [`RawConfig::set`].
    pub fn with(
        mut self,
        section: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.set(section, key, value);
        self
    }

    /// Append all entries of `other` after ours.
    pub fn extend(&mut self, other: RawConfig) {
        self.entries.extend(other.entries);
    }

    /// Effective value for a section and key.
    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|(s, k, _)| s == section && k == key)
            .map(|(_, _, v)| v.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parse ini-style text.
    ///
    /// Supports `[section]` headers, `key = value` and `key: value` lines,
    /// and full-line `#` or `;` comments. Section and key names are
    /// case-sensitive.
    pub fn parse_ini(text: &str) -> DbResult<Self> {
        let mut raw = Self::new();
        let mut section: Option<String> = None;

        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            if let Some(name) = line.strip_prefix('[') {
                let name = name.strip_suffix(']').ok_or_else(|| {
                    DbError::config(
                        format!("line {}", lineno + 1),
                        format!("malformed section header '{}'", line),
                    )
                })?;
                section = Some(name.trim().to_string());
                continue;
            }

            let split_at = match (line.find('='), line.find(':')) {
                (Some(eq), Some(colon)) => Some(eq.min(colon)),
                (eq, colon) => eq.or(colon),
            };
            let Some(pos) = split_at else {
                return Err(DbError::config(
                    format!("line {}", lineno + 1),
                    format!("expected 'key = value', found '{}'", line),
                ));
            };
            let Some(current) = &section else {
                return Err(DbError::config(
                    format!("line {}", lineno + 1),
                    "option found before any section header",
                ));
            };

            raw.set(
                current.clone(),
                line[..pos].trim(),
                line[pos + 1..].trim(),
            );
        }

        Ok(raw)
    }

    /// Read and parse an ini-style file.
    pub fn from_file(path: &Path) -> DbResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            DbError::config(
                "config_file",
                format!("cannot read {}: {}", path.display(), e),
            )
        })?;
        Self::parse_ini(&text)
    }

    /// Read several files in order; later files override earlier ones.
    pub fn from_files<P: AsRef<Path>>(paths: &[P]) -> DbResult<Self> {
        let mut raw = Self::new();
        for path in paths {
            raw.extend(Self::from_file(path.as_ref())?);
        }
        Ok(raw)
    }
}

impl<S, K, V> FromIterator<(S, K, V)> for RawConfig
where
    S: Into<String>,
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (S, K, V)>>(iter: I) -> Self {
        let mut raw = Self::new();
        for (section, key, value) in iter {
            raw.set(section, key, value);
        }
        raw
    }
}

// =============================================================================
// Alias table
// =============================================================================

/// Canonical option names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptionName {
    Connection,
    SlaveConnection,
    MinPoolSize,
    MaxPoolSize,
    MaxOverflow,
    MaxRetries,
    RetryInterval,
    PoolTimeout,
    IdleTimeout,
    ConnectionDebug,
    ConnectionTrace,
    MysqlTraditionalMode,
    SqliteSynchronous,
    SqliteFk,
}

impl OptionName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connection => "connection",
            Self::SlaveConnection => "slave_connection",
            Self::MinPoolSize => "min_pool_size",
            Self::MaxPoolSize => "max_pool_size",
            Self::MaxOverflow => "max_overflow",
            Self::MaxRetries => "max_retries",
            Self::RetryInterval => "retry_interval",
            Self::PoolTimeout => "pool_timeout",
            Self::IdleTimeout => "idle_timeout",
            Self::ConnectionDebug => "connection_debug",
            Self::ConnectionTrace => "connection_trace",
            Self::MysqlTraditionalMode => "mysql_traditional_mode",
            Self::SqliteSynchronous => "sqlite_synchronous",
            Self::SqliteFk => "sqlite_fk",
        }
    }
}

impl std::fmt::Display for OptionName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A deprecated location of a canonical option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Alias {
    pub section: &'static str,
    pub key: &'static str,
}

/// A canonical option and its deprecated aliases, in precedence order.
#[derive(Debug, Clone, Copy)]
pub struct OptionSpec {
    pub option: OptionName,
    pub deprecated: &'static [Alias],
}

/// Every canonical option with its deprecated aliases.
pub const OPTION_SPECS: &[OptionSpec] = &[
    OptionSpec {
        option: OptionName::Connection,
        deprecated: &[
            Alias {
                section: "DEFAULT",
                key: "sql_connection",
            },
            Alias {
                section: "DATABASE",
                key: "sql_connection",
            },
            Alias {
                section: "sql",
                key: "connection",
            },
        ],
    },
    OptionSpec {
        option: OptionName::SlaveConnection,
        deprecated: &[],
    },
    OptionSpec {
        option: OptionName::MinPoolSize,
        deprecated: &[
            Alias {
                section: "DEFAULT",
                key: "sql_min_pool_size",
            },
            Alias {
                section: "DATABASE",
                key: "sql_min_pool_size",
            },
        ],
    },
    OptionSpec {
        option: OptionName::MaxPoolSize,
        deprecated: &[
            Alias {
                section: "DEFAULT",
                key: "sql_max_pool_size",
            },
            Alias {
                section: "DATABASE",
                key: "sql_max_pool_size",
            },
        ],
    },
    OptionSpec {
        option: OptionName::MaxOverflow,
        deprecated: &[
            Alias {
                section: "DEFAULT",
                key: "sql_max_overflow",
            },
            Alias {
                section: "DATABASE",
                key: "sqlalchemy_max_overflow",
            },
        ],
    },
    OptionSpec {
        option: OptionName::MaxRetries,
        deprecated: &[
            Alias {
                section: "DEFAULT",
                key: "sql_max_retries",
            },
            Alias {
                section: "DATABASE",
                key: "sql_max_retries",
            },
        ],
    },
    OptionSpec {
        option: OptionName::RetryInterval,
        deprecated: &[
            Alias {
                section: "DEFAULT",
                key: "sql_retry_interval",
            },
            Alias {
                section: "DATABASE",
                key: "reconnect_interval",
            },
        ],
    },
    OptionSpec {
        option: OptionName::PoolTimeout,
        deprecated: &[Alias {
            section: "DATABASE",
            key: "sqlalchemy_pool_timeout",
        }],
    },
    OptionSpec {
        option: OptionName::IdleTimeout,
        deprecated: &[
            Alias {
                section: "DEFAULT",
                key: "sql_idle_timeout",
            },
            Alias {
                section: "DATABASE",
                key: "sql_idle_timeout",
            },
            Alias {
                section: "sql",
                key: "idle_timeout",
            },
        ],
    },
    OptionSpec {
        option: OptionName::ConnectionDebug,
        deprecated: &[Alias {
            section: "DEFAULT",
            key: "sql_connection_debug",
        }],
    },
    OptionSpec {
        option: OptionName::ConnectionTrace,
        deprecated: &[Alias {
            section: "DEFAULT",
            key: "sql_connection_trace",
        }],
    },
    OptionSpec {
        option: OptionName::MysqlTraditionalMode,
        deprecated: &[],
    },
    OptionSpec {
        option: OptionName::SqliteSynchronous,
        deprecated: &[],
    },
    OptionSpec {
        option: OptionName::SqliteFk,
        deprecated: &[],
    },
];

/// Where a resolved value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedValue<'a> {
    pub section: &'a str,
    pub key: &'a str,
    pub value: &'a str,
}

impl OptionSpec {
    /// Canonical value if set, else the first deprecated alias that is set.
    pub fn resolve<'a>(&self, raw: &'a RawConfig) -> Option<ResolvedValue<'a>> {
        let canonical = Alias {
            section: DATABASE_SECTION,
            key: self.option.as_str(),
        };
        std::iter::once(&canonical)
            .chain(self.deprecated.iter())
            .find_map(|a| {
                raw.get(a.section, a.key).map(|value| ResolvedValue {
                    section: a.section,
                    key: a.key,
                    value,
                })
            })
    }
}

fn parse_int<T: std::str::FromStr>(
    option: OptionName,
    src: &ResolvedValue<'_>,
) -> DbResult<T>
where
    T::Err: std::fmt::Display,
{
    src.value.trim().parse::<T>().map_err(|e| {
        DbError::config(
            option.as_str(),
            format!(
                "invalid integer '{}' in [{}] {}: {}",
                src.value, src.section, src.key, e
            ),
        )
    })
}

fn parse_bool(option: OptionName, src: &ResolvedValue<'_>) -> DbResult<bool> {
    match src.value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(DbError::config(
            option.as_str(),
            format!(
                "invalid boolean '{}' in [{}] {}",
                src.value, src.section, src.key
            ),
        )),
    }
}

// =============================================================================
// Canonical options
// =============================================================================

/// Canonical database options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatabaseOptions {
    pub connection: Option<String>,
    pub slave_connection: Option<String>,
    pub min_pool_size: u32,
    pub max_pool_size: u32,
    pub max_overflow: u32,
    /// Retries after the first attempt; `-1` retries forever.
    pub max_retries: i64,
    pub retry_interval: u64,
    pub pool_timeout: u64,
    pub idle_timeout: u64,
    /// Statement logging verbosity, 0-100.
    pub connection_debug: u32,
    pub connection_trace: bool,
    pub mysql_traditional_mode: bool,
    pub sqlite_synchronous: bool,
    pub sqlite_fk: bool,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            connection: None,
            slave_connection: None,
            min_pool_size: DEFAULT_MIN_POOL_SIZE,
            max_pool_size: DEFAULT_MAX_POOL_SIZE,
            max_overflow: DEFAULT_MAX_OVERFLOW,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_interval: DEFAULT_RETRY_INTERVAL_SECS,
            pool_timeout: DEFAULT_POOL_TIMEOUT_SECS,
            idle_timeout: DEFAULT_IDLE_TIMEOUT_SECS,
            connection_debug: 0,
            connection_trace: false,
            mysql_traditional_mode: false,
            sqlite_synchronous: true,
            sqlite_fk: true,
        }
    }
}

impl DatabaseOptions {
    /// Default options for a primary connection URL.
    pub fn new(connection: impl Into<String>) -> Self {
        Self {
            connection: Some(connection.into()),
            ..Self::default()
        }
    }

    pub fn with_slave_connection(mut self, slave_connection: impl Into<String>) -> Self {
        self.slave_connection = Some(slave_connection.into());
        self
    }

    /// Resolve canonical options from raw configuration and validate them.
    pub fn from_raw(raw: &RawConfig) -> DbResult<Self> {
        let mut options = Self::default();
        for spec in OPTION_SPECS {
            if let Some(src) = spec.resolve(raw) {
                options.apply(spec.option, &src)?;
            }
        }
        options.validate()?;
        Ok(options)
    }

    fn apply(&mut self, option: OptionName, src: &ResolvedValue<'_>) -> DbResult<()> {
        match option {
            OptionName::Connection => self.connection = Some(src.value.to_string()),
            OptionName::SlaveConnection => self.slave_connection = Some(src.value.to_string()),
            OptionName::MinPoolSize => self.min_pool_size = parse_int(option, src)?,
            OptionName::MaxPoolSize => self.max_pool_size = parse_int(option, src)?,
            OptionName::MaxOverflow => self.max_overflow = parse_int(option, src)?,
            OptionName::MaxRetries => self.max_retries = parse_int(option, src)?,
            OptionName::RetryInterval => self.retry_interval = parse_int(option, src)?,
            OptionName::PoolTimeout => self.pool_timeout = parse_int(option, src)?,
            OptionName::IdleTimeout => self.idle_timeout = parse_int(option, src)?,
            OptionName::ConnectionDebug => self.connection_debug = parse_int(option, src)?,
            OptionName::ConnectionTrace => self.connection_trace = parse_bool(option, src)?,
            OptionName::MysqlTraditionalMode => {
                self.mysql_traditional_mode = parse_bool(option, src)?
            }
            OptionName::SqliteSynchronous => self.sqlite_synchronous = parse_bool(option, src)?,
            OptionName::SqliteFk => self.sqlite_fk = parse_bool(option, src)?,
        }
        Ok(())
    }

    /// Check value ranges.
    ///
    /// `min_pool_size` is not checked against `max_pool_size`; the pool
    /// clamps it when it is built.
    pub fn validate(&self) -> DbResult<()> {
        if self.max_pool_size == 0 {
            return Err(DbError::config(
                OptionName::MaxPoolSize.as_str(),
                "must be greater than 0",
            ));
        }
        if self.max_retries < -1 {
            return Err(DbError::config(
                OptionName::MaxRetries.as_str(),
                "must be -1 (retry forever) or greater",
            ));
        }
        if self.connection_debug > MAX_CONNECTION_DEBUG {
            return Err(DbError::config(
                OptionName::ConnectionDebug.as_str(),
                format!("must be between 0 and {}", MAX_CONNECTION_DEBUG),
            ));
        }
        Ok(())
    }

    /// Upper bound on open connections per engine.
    pub fn max_connections(&self) -> u32 {
        self.max_pool_size.saturating_add(self.max_overflow)
    }

    pub fn retry_interval_duration(&self) -> Duration {
        Duration::from_secs(self.retry_interval)
    }

    pub fn pool_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.pool_timeout)
    }

    pub fn idle_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.idle_timeout)
    }

    /// Copy with credentials in connection URLs masked.
    pub fn masked(&self) -> Self {
        Self {
            connection: self.connection.as_deref().map(mask_url),
            slave_connection: self.slave_connection.as_deref().map(mask_url),
            ..self.clone()
        }
    }
}

// =============================================================================
// Command line
// =============================================================================

/// Command line for the `db-resilience` binary.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "db-resilience",
    about = "Normalize database options and check primary/replica engines",
    version
)]
pub struct Cli {
    /// Ini-style config file. Can be specified multiple times; later files win.
    #[arg(
        short = 'c',
        long = "config-file",
        value_name = "PATH",
        env = "DB_CONFIG_FILE",
        value_delimiter = ','
    )]
    pub config_files: Vec<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "DB_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "DB_JSON_LOGS")]
    pub json_logs: bool,

    /// Create the primary and replica engines and probe each once
    #[arg(long)]
    pub check: bool,
}

impl Cli {
    /// Load and normalize the configured files.
    pub fn load_options(&self) -> DbResult<DatabaseOptions> {
        let raw = RawConfig::from_files(&self.config_files)?;
        DatabaseOptions::from_raw(&raw)
    }
}
