//! Default transport handler: a pooled `reqwest::Client`
//!
//! Each generation gets its own `reqwest::Client` (own connection pool and TLS
//! sessions) wired to the generation's cookie store. Dropping the client
//! closes its idle connections, so disposal needs no extra work.

use std::sync::Arc;
use std::time::Duration;

use crate::config::{FactoryBuilder, HandlerContext};
use crate::entry::Handler;
use crate::error::BoxError;

const POOL_MAX_IDLE_PER_HOST: usize = 32;
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const TCP_KEEPALIVE: Duration = Duration::from_secs(60);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

impl Handler for reqwest::Client {}

/// Build the standard pooled-connection handler for one generation.
pub fn default_handler(context: &HandlerContext<'_>) -> Result<reqwest::Client, BoxError> {
    let client = reqwest::Client::builder()
        .cookie_provider(Arc::clone(context.cookie_store()))
        .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
        .pool_idle_timeout(POOL_IDLE_TIMEOUT)
        .tcp_keepalive(TCP_KEEPALIVE)
        .connect_timeout(CONNECT_TIMEOUT)
        .build()?;
    Ok(client)
}

impl FactoryBuilder<reqwest::Client> {
    /// Builder preconfigured with [`default_handler`].
    pub fn http() -> Self {
        Self::new().configure_handler_factory(default_handler)
    }
}
