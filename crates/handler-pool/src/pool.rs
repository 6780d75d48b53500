//! Generation pool: lazy creation, rotation and retirement of handlers
//!
//! The pool serves the current handler generation to borrowers. When there is
//! none, or the current one is older than `lifetime`, exactly one borrower
//! runs the handler factory while the others wait on its completion signal.
//! The factory call itself runs outside the state lock so unrelated borrows
//! are never serialized behind handler construction.
//!
//! Expired generations are detached into a draining list. They are disposed
//! by the next sweep once no borrow is held, or by the release of their last
//! borrow, whichever comes first.

use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use reqwest::cookie::Jar;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{DisposalHook, FactoryConfig, HandlerContext, HandlerFactory};
use crate::entry::{EntryState, Handler, HandlerEntry};
use crate::error::{Error, Result};
use crate::services::Services;
use crate::telemetry;

struct PoolState<H> {
    current: Option<Arc<HandlerEntry<H>>>,
    /// Present while one borrower is building the next generation.
    creating: Option<watch::Receiver<()>>,
    /// Last generation number installed.
    generation: u64,
    retained_cookies: Option<Arc<Jar>>,
    draining: Vec<Arc<HandlerEntry<H>>>,
    closed: bool,
}

enum Step<H> {
    Wait(watch::Receiver<()>),
    Create {
        done: watch::Sender<()>,
        generation: u64,
        cookie_store: Arc<Jar>,
    },
    Ready(Arc<HandlerEntry<H>>),
}

/// Owner of the current handler generation and the ones still draining.
///
/// State transitions happen under one `std::sync::Mutex` that is never held
/// across an `.await`, the handler factory, or handler disposal.
pub struct GenerationPool<H: Handler> {
    state: Mutex<PoolState<H>>,
    lifetime: Duration,
    keep_cookie_store: bool,
    handler_factory: HandlerFactory<H>,
    services: Option<Arc<Services>>,
    disposal_hook: Option<DisposalHook>,
}

impl<H: Handler> GenerationPool<H> {
    pub fn new(config: &FactoryConfig<H>) -> Self {
        Self {
            state: Mutex::new(PoolState {
                current: None,
                creating: None,
                generation: 0,
                retained_cookies: None,
                draining: Vec::new(),
                closed: false,
            }),
            lifetime: config.lifetime,
            keep_cookie_store: config.keep_cookie_store,
            handler_factory: Arc::clone(&config.handler_factory),
            services: config.services.clone(),
            disposal_hook: config.on_disposal_error.clone(),
        }
    }

    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    /// Borrow the current handler, creating a new generation if there is no
    /// live one.
    ///
    /// Concurrent callers that find a creation in progress wait for it and
    /// then re-check, so one generation is built at most once. If the handler
    /// factory fails, this caller gets `HandlerCreation` and the pool is left
    /// empty; the next borrower (including anyone who was waiting) retries.
    pub async fn get_or_create_handler(&self) -> Result<HandlerLease<H>> {
        loop {
            let step = {
                let mut state = self.lock();
                self.next_step(&mut state, Instant::now())?
            };

            match step {
                Step::Ready(entry) => return Ok(self.lease(entry)),
                Step::Wait(mut creating) => {
                    debug!("handler creation in progress, waiting");
                    // Err means the creator dropped its sender, which is the signal.
                    let _ = creating.changed().await;
                }
                Step::Create {
                    done,
                    generation,
                    cookie_store,
                } => return self.create(done, generation, cookie_store),
            }
        }
    }

    fn next_step(&self, state: &mut PoolState<H>, now: Instant) -> Result<Step<H>> {
        if state.closed {
            return Err(Error::ShutDown);
        }

        if let Some(current) = &state.current {
            if !current.is_expired(now, self.lifetime) {
                current.acquire();
                return Ok(Step::Ready(Arc::clone(current)));
            }
        }

        if let Some(expired) = state.current.take() {
            debug!(
                generation = expired.generation(),
                in_flight = expired.in_flight(),
                "current generation expired, rotating"
            );
            expired.mark_draining();
            state.draining.push(expired);
        }

        if let Some(creating) = &state.creating {
            return Ok(Step::Wait(creating.clone()));
        }

        let (done, creating) = watch::channel(());
        state.creating = Some(creating);
        let cookie_store = if self.keep_cookie_store {
            Arc::clone(
                state
                    .retained_cookies
                    .get_or_insert_with(|| Arc::new(Jar::default())),
            )
        } else {
            Arc::new(Jar::default())
        };

        Ok(Step::Create {
            done,
            generation: state.generation + 1,
            cookie_store,
        })
    }

    fn create(
        &self,
        done: watch::Sender<()>,
        generation: u64,
        cookie_store: Arc<Jar>,
    ) -> Result<HandlerLease<H>> {
        let mut creation = Creation {
            pool: self,
            installed: false,
            _done: done,
        };

        let context = HandlerContext {
            generation,
            cookie_store: &cookie_store,
            services: self.services.as_deref(),
        };
        let handler = match (self.handler_factory)(&context) {
            Ok(handler) => handler,
            Err(e) => {
                telemetry::record_creation_failure();
                warn!(generation, error = %e, "handler factory failed, pool left empty for retry");
                return Err(Error::HandlerCreation(e));
            }
        };

        let entry = Arc::new(HandlerEntry::new(
            handler,
            generation,
            Instant::now(),
            cookie_store,
        ));
        entry.acquire();

        {
            let mut state = self.lock();
            state.creating = None;
            state.generation = generation;
            if state.closed {
                // Closed while the factory ran: never install, retire right away.
                entry.mark_draining();
                state.draining.push(Arc::clone(&entry));
            } else {
                state.current = Some(Arc::clone(&entry));
            }
        }
        creation.installed = true;

        telemetry::record_generation_created();
        info!(generation, "handler generation created");
        Ok(self.lease(entry))
    }

    /// Retire the current generation if it has outlived `lifetime`, and
    /// dispose every detached generation that has no borrows left.
    ///
    /// Generations still borrowed stay in `ExpiredPendingDrain` until a later
    /// sweep or until their last borrow is released. Disposal failures are
    /// absorbed here.
    pub fn sweep(&self, now: Instant) -> SweepReport {
        let idle = {
            let mut state = self.lock();
            if state
                .current
                .as_ref()
                .is_some_and(|current| current.is_expired(now, self.lifetime))
            {
                if let Some(expired) = state.current.take() {
                    debug!(
                        generation = expired.generation(),
                        in_flight = expired.in_flight(),
                        "sweep detached expired generation"
                    );
                    expired.mark_draining();
                    state.draining.push(expired);
                }
            }
            state
                .draining
                .retain(|entry| entry.state() != EntryState::Disposed);
            state
                .draining
                .iter()
                .filter(|entry| entry.in_flight() == 0)
                .cloned()
                .collect::<Vec<_>>()
        };

        let mut report = SweepReport::default();
        for entry in idle {
            if entry.begin_disposal() {
                entry.dispose(self.disposal_hook.as_ref());
                report.retired.push(entry.generation());
            }
        }

        let mut state = self.lock();
        state
            .draining
            .retain(|entry| entry.state() != EntryState::Disposed);
        report.pending_drain = state.draining.len();
        report
    }

    /// Stop serving borrows and retire every generation. Generations still
    /// borrowed are disposed when their last borrow is released.
    pub fn close(&self) -> SweepReport {
        {
            let mut state = self.lock();
            state.closed = true;
            if let Some(current) = state.current.take() {
                current.mark_draining();
                state.draining.push(current);
            }
        }
        info!("handler pool closed");
        self.sweep(Instant::now())
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        let state = self.lock();
        let now = Instant::now();
        // Entries disposed by their last lease stay listed until the next sweep.
        let live_draining = state
            .draining
            .iter()
            .filter(|entry| entry.state() != EntryState::Disposed);
        PoolSnapshot {
            generation: state.generation,
            current: state.current.as_ref().map(|entry| GenerationInfo {
                generation: entry.generation(),
                state: entry.state(),
                age: now.saturating_duration_since(entry.created_at()),
                in_flight: entry.in_flight(),
            }),
            creating: state.creating.is_some(),
            draining: live_draining.clone().count(),
            draining_in_flight: live_draining.map(|entry| entry.in_flight()).sum(),
            closed: state.closed,
        }
    }

    fn lease(&self, entry: Arc<HandlerEntry<H>>) -> HandlerLease<H> {
        telemetry::borrow_started();
        HandlerLease {
            entry,
            disposal_hook: self.disposal_hook.clone(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolState<H>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<H: Handler> Drop for GenerationPool<H> {
    /// Retire whatever is left. Generations still borrowed are disposed by
    /// their last lease.
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        let mut remaining = std::mem::take(&mut state.draining);
        if let Some(current) = state.current.take() {
            current.mark_draining();
            remaining.push(current);
        }
        for entry in remaining {
            if entry.in_flight() == 0 && entry.begin_disposal() {
                entry.dispose(self.disposal_hook.as_ref());
            }
        }
    }
}

/// Clears the `Creating` marker if the handler factory fails or panics.
/// Dropping `_done` wakes every waiter.
struct Creation<'a, H: Handler> {
    pool: &'a GenerationPool<H>,
    installed: bool,
    _done: watch::Sender<()>,
}

impl<H: Handler> Drop for Creation<'_, H> {
    fn drop(&mut self) {
        if !self.installed {
            self.pool.lock().creating = None;
        }
    }
}

/// A borrow of one handler generation for the duration of one operation.
///
/// Dropping the lease releases the borrow, whether the operation succeeded,
/// failed, or its future was cancelled. If the generation was already
/// detached and this was its last borrow, it is disposed here.
pub struct HandlerLease<H: Handler> {
    entry: Arc<HandlerEntry<H>>,
    disposal_hook: Option<DisposalHook>,
}

impl<H: Handler> HandlerLease<H> {
    pub fn generation(&self) -> u64 {
        self.entry.generation()
    }

    pub fn cookie_store(&self) -> &Arc<Jar> {
        self.entry.cookie_store()
    }

    pub fn entry(&self) -> &HandlerEntry<H> {
        &self.entry
    }

    /// Non-owning view of the leased handler. It does not count as a borrow;
    /// the lease must outlive every use of it.
    pub fn handle(&self) -> HandlerRef<H> {
        HandlerRef {
            entry: Arc::clone(&self.entry),
        }
    }
}

impl<H: Handler> Deref for HandlerLease<H> {
    type Target = H;

    fn deref(&self) -> &H {
        self.entry.handler()
    }
}

impl<H: Handler> Drop for HandlerLease<H> {
    fn drop(&mut self) {
        telemetry::borrow_finished();
        if self.entry.release() == 0 && self.entry.begin_disposal() {
            debug!(
                generation = self.entry.generation(),
                "last borrow released on drained generation"
            );
            self.entry.dispose(self.disposal_hook.as_ref());
        }
    }
}

/// Handler view passed to client operations while the client holds the lease.
pub struct HandlerRef<H> {
    entry: Arc<HandlerEntry<H>>,
}

impl<H> HandlerRef<H> {
    pub fn generation(&self) -> u64 {
        self.entry.generation()
    }

    pub fn cookie_store(&self) -> &Arc<Jar> {
        self.entry.cookie_store()
    }
}

impl<H> Clone for HandlerRef<H> {
    fn clone(&self) -> Self {
        Self {
            entry: Arc::clone(&self.entry),
        }
    }
}

impl<H> Deref for HandlerRef<H> {
    type Target = H;

    fn deref(&self) -> &H {
        self.entry.handler()
    }
}

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Generations disposed by this sweep.
    pub retired: Vec<u64>,
    /// Detached generations still waiting for borrows to finish.
    pub pending_drain: usize,
}

/// Point-in-time view of the current generation.
#[derive(Debug, Clone)]
pub struct GenerationInfo {
    pub generation: u64,
    pub state: EntryState,
    pub age: Duration,
    pub in_flight: usize,
}

/// Point-in-time view of the pool for health reporting.
#[derive(Debug, Clone)]
pub struct PoolSnapshot {
    /// Last generation number installed (0 before the first handler).
    pub generation: u64,
    pub current: Option<GenerationInfo>,
    pub creating: bool,
    pub draining: usize,
    pub draining_in_flight: usize,
    pub closed: bool,
}

impl PoolSnapshot {
    /// Health JSON for a status endpoint.
    ///
    /// Status mapping: closed → "closed", live generation → "active",
    /// otherwise "idle" (next borrow creates one).
    pub fn health(&self) -> serde_json::Value {
        let status = if self.closed {
            "closed"
        } else if self.current.is_some() {
            "active"
        } else {
            "idle"
        };

        let current = self.current.as_ref().map(|info| {
            serde_json::json!({
                "generation": info.generation,
                "state": info.state.label(),
                "age_secs": info.age.as_secs(),
                "in_flight": info.in_flight,
            })
        });

        serde_json::json!({
            "status": status,
            "generation": self.generation,
            "current": current,
            "creating": self.creating,
            "draining": self.draining,
            "draining_in_flight": self.draining_in_flight,
        })
    }
}
