//! Factory configuration and its validating builder
//!
//! Setters validate immediately, so a bad lifetime or interval fails at
//! setup instead of on the first client call:
//!
//! ```ignore
//! let config = FactoryBuilder::http()
//!     .set_lifetime(Duration::from_secs(120))?
//!     .set_cleanup_interval(Duration::from_secs(10))?
//!     .set_keep_cookie_store(true)
//!     .configure_client_config(|c| c.insert_header("x-api-version", "2"))
//!     .build()?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use reqwest::cookie::Jar;

use crate::client::ClientConfig;
use crate::entry::Handler;
use crate::error::{BoxError, Error, Result};
use crate::services::Services;

/// Default maximum age of a handler generation.
pub const DEFAULT_LIFETIME: Duration = Duration::from_secs(120);

/// Default cadence of the cleanup sweep.
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(10);

/// Builds the transport handler for a new generation.
pub type HandlerFactory<H> =
    Arc<dyn Fn(&HandlerContext<'_>) -> std::result::Result<H, BoxError> + Send + Sync>;

/// Per-client configuration callback.
pub type ConfigureClient = Arc<dyn Fn(&mut ClientConfig) + Send + Sync>;

/// Receives disposal failures the pool swallowed.
pub type DisposalHook = Arc<dyn Fn(&Error) + Send + Sync>;

/// What the handler factory gets to work with.
pub struct HandlerContext<'a> {
    pub(crate) generation: u64,
    pub(crate) cookie_store: &'a Arc<Jar>,
    pub(crate) services: Option<&'a Services>,
}

impl<'a> HandlerContext<'a> {
    /// Generation number the new handler will serve.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Cookie store to wire into the handler. Shared with earlier generations
    /// when the factory keeps its cookie store.
    pub fn cookie_store(&self) -> &'a Arc<Jar> {
        self.cookie_store
    }

    pub fn services(&self) -> Option<&'a Services> {
        self.services
    }
}

/// Validated factory configuration. Immutable once built.
pub struct FactoryConfig<H> {
    pub(crate) lifetime: Duration,
    pub(crate) cleanup_interval: Duration,
    pub(crate) keep_cookie_store: bool,
    pub(crate) handler_factory: HandlerFactory<H>,
    pub(crate) configure_client: Option<ConfigureClient>,
    pub(crate) services: Option<Arc<Services>>,
    pub(crate) on_disposal_error: Option<DisposalHook>,
}

impl<H: Handler> FactoryConfig<H> {
    pub fn builder() -> FactoryBuilder<H> {
        FactoryBuilder::new()
    }
}

impl<H> FactoryConfig<H> {
    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    pub fn cleanup_interval(&self) -> Duration {
        self.cleanup_interval
    }

    pub fn keep_cookie_store(&self) -> bool {
        self.keep_cookie_store
    }
}

impl<H> Clone for FactoryConfig<H> {
    fn clone(&self) -> Self {
        Self {
            lifetime: self.lifetime,
            cleanup_interval: self.cleanup_interval,
            keep_cookie_store: self.keep_cookie_store,
            handler_factory: Arc::clone(&self.handler_factory),
            configure_client: self.configure_client.clone(),
            services: self.services.clone(),
            on_disposal_error: self.on_disposal_error.clone(),
        }
    }
}

impl<H> std::fmt::Debug for FactoryConfig<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FactoryConfig")
            .field("lifetime", &self.lifetime)
            .field("cleanup_interval", &self.cleanup_interval)
            .field("keep_cookie_store", &self.keep_cookie_store)
            .field("configure_client", &self.configure_client.is_some())
            .field("services", &self.services.is_some())
            .finish_non_exhaustive()
    }
}

/// Builder for [`FactoryConfig`].
///
/// Defaults: lifetime 2 minutes, cleanup every 10 seconds, cookie store kept
/// across generations. A handler factory is required.
pub struct FactoryBuilder<H> {
    lifetime: Duration,
    cleanup_interval: Duration,
    keep_cookie_store: bool,
    handler_factory: Option<HandlerFactory<H>>,
    configure_client: Option<ConfigureClient>,
    services: Option<Arc<Services>>,
    on_disposal_error: Option<DisposalHook>,
}

impl<H: Handler> FactoryBuilder<H> {
    pub fn new() -> Self {
        Self {
            lifetime: DEFAULT_LIFETIME,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
            keep_cookie_store: true,
            handler_factory: None,
            configure_client: None,
            services: None,
            on_disposal_error: None,
        }
    }

    /// Maximum age of a handler generation. Must be non-zero.
    pub fn set_lifetime(mut self, lifetime: Duration) -> Result<Self> {
        if lifetime.is_zero() {
            return Err(Error::Configuration(
                "lifetime must be greater than 0".into(),
            ));
        }
        self.lifetime = lifetime;
        Ok(self)
    }

    /// Cadence of the background sweep. Must be non-zero.
    pub fn set_cleanup_interval(mut self, interval: Duration) -> Result<Self> {
        if interval.is_zero() {
            return Err(Error::Configuration(
                "cleanup_interval must be greater than 0".into(),
            ));
        }
        self.cleanup_interval = interval;
        Ok(self)
    }

    /// Carry the first generation's cookie store into every later generation.
    pub fn set_keep_cookie_store(mut self, keep: bool) -> Self {
        self.keep_cookie_store = keep;
        self
    }

    /// Producer of new transport handlers, called at most once per generation.
    pub fn configure_handler_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(&HandlerContext<'_>) -> std::result::Result<H, BoxError> + Send + Sync + 'static,
    {
        self.handler_factory = Some(Arc::new(factory));
        self
    }

    /// Called once for every client the factory produces.
    pub fn configure_client_config<F>(mut self, configure: F) -> Self
    where
        F: Fn(&mut ClientConfig) + Send + Sync + 'static,
    {
        self.configure_client = Some(Arc::new(configure));
        self
    }

    /// Services handed to both callbacks.
    pub fn set_services(mut self, services: Services) -> Self {
        self.services = Some(Arc::new(services));
        self
    }

    /// Observe disposal failures. They are logged either way.
    pub fn on_disposal_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        self.on_disposal_error = Some(Arc::new(hook));
        self
    }

    pub fn build(self) -> Result<FactoryConfig<H>> {
        let handler_factory = self.handler_factory.ok_or_else(|| {
            Error::Configuration("handler factory must be configured".into())
        })?;
        Ok(FactoryConfig {
            lifetime: self.lifetime,
            cleanup_interval: self.cleanup_interval,
            keep_cookie_store: self.keep_cookie_store,
            handler_factory,
            configure_client: self.configure_client,
            services: self.services,
            on_disposal_error: self.on_disposal_error,
        })
    }
}

impl<H: Handler> Default for FactoryBuilder<H> {
    fn default() -> Self {
        Self::new()
    }
}
