//! Dead-connection detection on pool checkout.
//!
//! The pool calls [`DisconnectDetector::on_checkout`] before handing out an
//! idle connection. A probe failure that the backend descriptor recognizes as
//! a disconnect makes the hook return `Ok(false)`, which tells the pool to
//! close that connection and hand out another one.

use crate::db::backend::BackendDescriptor;
use crate::db::native::NativeError;
use futures_util::future::BoxFuture;
use sqlx::mysql::MySqlConnection;
use sqlx::postgres::PgConnection;
use sqlx::sqlite::SqliteConnection;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

/// Outcome of a checkout probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckoutVerdict {
    Proceed,
    /// The connection is dead and must be discarded.
    Invalidate { cause: NativeError },
}

impl CheckoutVerdict {
    pub fn is_proceed(&self) -> bool {
        matches!(self, Self::Proceed)
    }
}

/// A connection that can be probed with a trivial statement.
pub trait LivenessProbe: Send {
    fn ping(&mut self) -> impl Future<Output = Result<(), NativeError>> + Send;
}

macro_rules! impl_liveness_probe {
    ($($conn:ty),+ $(,)?) => {
        $(
            impl LivenessProbe for $conn {
                async fn ping(&mut self) -> Result<(), NativeError> {
                    sqlx::query("SELECT 1")
                        .execute(&mut *self)
                        .await
                        .map(|_| ())
                        .map_err(NativeError::from)
                }
            }
        )+
    };
}

impl_liveness_probe!(MySqlConnection, PgConnection, SqliteConnection);

#[derive(Debug)]
pub struct DisconnectDetector {
    descriptor: Arc<dyn BackendDescriptor>,
    invalidated: AtomicU64,
}

impl DisconnectDetector {
    pub fn new(descriptor: Arc<dyn BackendDescriptor>) -> Self {
        Self {
            descriptor,
            invalidated: AtomicU64::new(0),
        }
    }

    pub fn backend(&self) -> &str {
        self.descriptor.name()
    }

    /// Number of connections invalidated so far.
    pub fn invalidated(&self) -> u64 {
        self.invalidated.load(Ordering::Relaxed)
    }

    /// Decide what to do with a connection given its probe result.
    pub fn inspect(&self, probe: Result<(), NativeError>) -> CheckoutVerdict {
        match probe {
            Ok(()) => CheckoutVerdict::Proceed,
            Err(cause) if self.descriptor.is_disconnect(&cause) => {
                self.invalidated.fetch_add(1, Ordering::Relaxed);
                warn!(
                    backend = %self.backend(),
                    error = %cause,
                    "Database connection lost on checkout, invalidating"
                );
                CheckoutVerdict::Invalidate { cause }
            }
            Err(cause) => {
                debug!(
                    backend = %self.backend(),
                    error = %cause,
                    "Checkout probe failed with a non-disconnect error"
                );
                CheckoutVerdict::Proceed
            }
        }
    }

    /// Probe a connection and inspect the result.
    pub async fn check<P: LivenessProbe>(&self, conn: &mut P) -> CheckoutVerdict {
        let probe = conn.ping().await;
        self.inspect(probe)
    }

    /// Pool `before_acquire` hook. `Ok(false)` discards the connection.
    pub fn on_checkout<'c, C: LivenessProbe>(
        self: &Arc<Self>,
        conn: &'c mut C,
    ) -> BoxFuture<'c, Result<bool, sqlx::Error>> {
        let detector = Arc::clone(self);
        Box::pin(async move { Ok(detector.check(conn).await.is_proceed()) })
    }
}
