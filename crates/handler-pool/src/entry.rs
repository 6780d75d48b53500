//! One generation of a pooled transport handler
//!
//! An entry is immutable after creation except for its borrow count and its
//! retirement state. The state only moves forward:
//!
//! - Active → ExpiredPendingDrain (detached from the pool after `lifetime`)
//! - ExpiredPendingDrain → Disposed (no borrows left; sweep or last release)

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::time::Duration;

use reqwest::cookie::Jar;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::DisposalHook;
use crate::error::{BoxError, Error};
use crate::telemetry;

/// Transport resource owned by one pool generation.
///
/// `dispose` is called exactly once, after the generation has been detached
/// from the pool and its last borrow released. Failures are reported through
/// logs, metrics and the disposal hook; they never reach client callers.
pub trait Handler: Send + Sync + 'static {
    fn dispose(&self) -> Result<(), BoxError> {
        Ok(())
    }
}

/// Lifecycle state of a handler generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Active,
    ExpiredPendingDrain,
    Disposed,
}

impl EntryState {
    /// Status label for health/logging.
    pub fn label(&self) -> &'static str {
        match self {
            EntryState::Active => "active",
            EntryState::ExpiredPendingDrain => "expired_pending_drain",
            EntryState::Disposed => "disposed",
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => EntryState::Active,
            1 => EntryState::ExpiredPendingDrain,
            _ => EntryState::Disposed,
        }
    }
}

/// A handler plus its generation metadata and borrow accounting.
pub struct HandlerEntry<H> {
    handler: H,
    generation: u64,
    created_at: Instant,
    cookie_store: Arc<Jar>,
    in_flight: AtomicUsize,
    state: AtomicU8,
}

impl<H> HandlerEntry<H> {
    pub(crate) fn new(
        handler: H,
        generation: u64,
        created_at: Instant,
        cookie_store: Arc<Jar>,
    ) -> Self {
        Self {
            handler,
            generation,
            created_at,
            cookie_store,
            in_flight: AtomicUsize::new(0),
            state: AtomicU8::new(EntryState::Active as u8),
        }
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn cookie_store(&self) -> &Arc<Jar> {
        &self.cookie_store
    }

    /// Number of borrows currently held against this generation.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> EntryState {
        EntryState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Whether `lifetime` has fully elapsed at `now`.
    pub fn is_expired(&self, now: Instant, lifetime: Duration) -> bool {
        now.saturating_duration_since(self.created_at) >= lifetime
    }

    pub(crate) fn acquire(&self) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
    }

    /// Returns the remaining borrow count.
    pub(crate) fn release(&self) -> usize {
        self.in_flight.fetch_sub(1, Ordering::SeqCst) - 1
    }

    pub(crate) fn mark_draining(&self) {
        let _ = self.state.compare_exchange(
            EntryState::Active as u8,
            EntryState::ExpiredPendingDrain as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    /// Claim the right to dispose. Only one caller ever wins.
    pub(crate) fn begin_disposal(&self) -> bool {
        self.state
            .compare_exchange(
                EntryState::ExpiredPendingDrain as u8,
                EntryState::Disposed as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }
}

impl<H: Handler> HandlerEntry<H> {
    /// Dispose the handler. Caller must have won `begin_disposal`.
    pub(crate) fn dispose(&self, hook: Option<&DisposalHook>) {
        match self.handler.dispose() {
            Ok(()) => {
                telemetry::record_disposed();
                info!(generation = self.generation, "handler generation disposed");
            }
            Err(source) => {
                telemetry::record_disposal_error();
                warn!(
                    generation = self.generation,
                    error = %source,
                    "handler disposal failed, generation dropped anyway"
                );
                if let Some(hook) = hook {
                    hook(&Error::Disposal {
                        generation: self.generation,
                        source,
                    });
                }
            }
        }
    }
}

impl<H> std::fmt::Debug for HandlerEntry<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerEntry")
            .field("generation", &self.generation)
            .field("created_at", &self.created_at)
            .field("in_flight", &self.in_flight())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
