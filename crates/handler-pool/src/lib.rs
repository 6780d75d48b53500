//! Generational transport-handler pool and client-proxy factory
//!
//! Client proxies are cheap and short-lived (one per incoming request in a
//! host service); transport handlers own connection pools, TLS state and a
//! cookie store, so they are pooled and time-boxed instead.
//!
//! Handler lifecycle:
//! 1. First borrow on an empty pool → exactly one caller runs the handler
//!    factory, concurrent callers wait for it → generation N is `Active`
//! 2. Each client operation borrows the current handler for one call and
//!    releases it on completion, error or cancellation
//! 3. Age reaches `lifetime` → the next borrow or sweep detaches it
//!    (`ExpiredPendingDrain`) and the next borrow creates generation N+1
//! 4. The background sweep disposes drained generations; a generation still
//!    in use is disposed when its last borrow is released

pub mod cleanup;
pub mod client;
pub mod config;
pub mod entry;
pub mod error;
pub mod factory;
pub mod http;
pub mod pool;
pub mod services;
pub mod settings;
mod telemetry;

pub use cleanup::CleanupScheduler;
pub use client::{ApiClient, ApiRequest, ApiResponse, ClientConfig};
pub use config::{FactoryBuilder, FactoryConfig, HandlerContext};
pub use entry::{EntryState, Handler, HandlerEntry};
pub use error::{BoxError, Error, Result};
pub use factory::ClientProxyFactory;
pub use http::default_handler;
pub use pool::{
    GenerationInfo, GenerationPool, HandlerLease, HandlerRef, PoolSnapshot, SweepReport,
};
pub use services::Services;
pub use settings::PoolSettings;
