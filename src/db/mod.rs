//! Database resilience layer.
//!
//! - Backend descriptors and error classification
//! - Checkout-time disconnect detection
//! - Connection pools and the primary/replica engine cache
//! - Retries for deadlocks and lost connections
//! - Sessions with scoped transactions

#[macro_use]
pub mod macros;
pub mod backend;
pub mod classifier;
pub mod detector;
pub mod engine;
pub mod native;
pub mod params;
pub mod pool;
pub mod retry;
pub mod session;
pub mod types;

pub use backend::{BackendDescriptor, BackendRegistry, DEFAULT_REGISTRY, DuplicateKey};
pub use classifier::{classify, translate};
pub use detector::{CheckoutVerdict, DisconnectDetector, LivenessProbe};
pub use engine::{
    Engine, EngineCache, EngineFlags, EngineRole, cleanup_global, global, init_global,
};
pub use native::{NativeError, NativeErrorClass};
pub use pool::{DbPool, PoolSettings};
pub use retry::{RetryLimit, RetryPolicy, with_retries};
pub use session::{DbTransaction, ExecResult, Session};
pub use types::JsonRow;
