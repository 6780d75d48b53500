//! Client proxy factory
//!
//! Owns the generation pool and its cleanup task. `create_client` is meant to
//! be called per request; it never touches the handler factory itself.

use std::sync::Arc;

use tracing::info;

use crate::cleanup::CleanupScheduler;
use crate::client::{ApiClient, ClientConfig};
use crate::config::{ConfigureClient, FactoryConfig};
use crate::entry::Handler;
use crate::pool::{GenerationPool, PoolSnapshot, SweepReport};
use crate::services::Services;

/// Dropping the factory stops the sweep. The pool, and with it every
/// remaining generation, is retired once the last client is dropped too.
pub struct ClientProxyFactory<H: Handler> {
    pool: Arc<GenerationPool<H>>,
    configure_client: Option<ConfigureClient>,
    services: Option<Arc<Services>>,
    scheduler: CleanupScheduler,
}

impl<H: Handler> ClientProxyFactory<H> {
    /// Create the pool and start its cleanup sweep. Must be called from
    /// within a tokio runtime; the sweep stops when the factory is dropped.
    pub fn new(config: FactoryConfig<H>) -> Self {
        let pool = Arc::new(GenerationPool::new(&config));
        let scheduler = CleanupScheduler::start(Arc::downgrade(&pool), config.cleanup_interval);
        info!(
            lifetime_ms = config.lifetime.as_millis() as u64,
            cleanup_interval_ms = config.cleanup_interval.as_millis() as u64,
            keep_cookie_store = config.keep_cookie_store,
            "client proxy factory started"
        );
        Self {
            pool,
            configure_client: config.configure_client,
            services: config.services,
            scheduler,
        }
    }

    /// Produce a new client with a freshly configured `ClientConfig`.
    pub fn create_client(&self) -> ApiClient<H> {
        let mut config = ClientConfig::new(self.services.clone());
        if let Some(configure) = &self.configure_client {
            configure(&mut config);
        }
        ApiClient::new(Arc::clone(&self.pool), config)
    }

    pub fn pool(&self) -> &Arc<GenerationPool<H>> {
        &self.pool
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        self.pool.snapshot()
    }

    /// Stop the sweep and retire every generation. Later operations on any
    /// client from this factory fail with `Error::ShutDown`.
    pub fn shutdown(&self) -> SweepReport {
        self.scheduler.stop();
        let report = self.pool.close();
        info!(
            retired = ?report.retired,
            pending_drain = report.pending_drain,
            "client proxy factory shut down"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FactoryBuilder;
    use crate::error::{BoxError, Error};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct TestHandler {
        generation: u64,
        disposed: Arc<Mutex<Vec<u64>>>,
    }

    impl Handler for TestHandler {
        fn dispose(&self) -> Result<(), BoxError> {
            self.disposed.lock().unwrap().push(self.generation);
            Ok(())
        }
    }

    fn test_builder(disposed: &Arc<Mutex<Vec<u64>>>) -> FactoryBuilder<TestHandler> {
        let disposed = Arc::clone(disposed);
        FactoryBuilder::new().configure_handler_factory(move |ctx| {
            Ok(TestHandler {
                generation: ctx.generation(),
                disposed: Arc::clone(&disposed),
            })
        })
    }

    async fn generation_of(client: &ApiClient<TestHandler>) -> u64 {
        client
            .call(|handler| async move { Ok(handler.generation) })
            .await
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn configure_callback_runs_once_per_client() {
        let configured = Arc::new(AtomicUsize::new(0));
        let callback_configured = Arc::clone(&configured);
        let disposed = Arc::new(Mutex::new(Vec::new()));
        let factory = ClientProxyFactory::new(
            test_builder(&disposed)
                .configure_client_config(move |config| {
                    let n = callback_configured.fetch_add(1, Ordering::SeqCst);
                    config.insert_header("x-client-seq", &n.to_string());
                })
                .build()
                .unwrap(),
        );

        let first = factory.create_client();
        let second = factory.create_client();
        let _third = factory.create_client();

        assert_eq!(configured.load(Ordering::SeqCst), 3);
        assert_eq!(first.config().headers().get("x-client-seq").unwrap(), "0");
        assert_eq!(second.config().headers().get("x-client-seq").unwrap(), "1");
        // Creating clients never builds a handler.
        assert_eq!(factory.snapshot().generation, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn configure_callback_sees_services() {
        let disposed = Arc::new(Mutex::new(Vec::new()));
        let factory = ClientProxyFactory::new(
            test_builder(&disposed)
                .set_services(Services::new().with(String::from("tenant-a")))
                .configure_client_config(|config| {
                    let tenant = config.services().and_then(|s| s.get::<String>());
                    if let Some(tenant) = tenant {
                        config.insert_header("x-tenant", &tenant);
                    }
                })
                .build()
                .unwrap(),
        );

        let client = factory.create_client();
        assert_eq!(client.config().headers().get("x-tenant").unwrap(), "tenant-a");
    }

    #[tokio::test(start_paused = true)]
    async fn clients_share_handler_and_follow_rotation() {
        let disposed = Arc::new(Mutex::new(Vec::new()));
        let factory = ClientProxyFactory::new(
            test_builder(&disposed)
                .set_lifetime(Duration::from_secs(2))
                .unwrap()
                .build()
                .unwrap(),
        );

        let early = factory.create_client();
        let other = factory.create_client();
        assert_eq!(generation_of(&early).await, 1);
        assert_eq!(generation_of(&other).await, 1);

        tokio::time::advance(Duration::from_secs(2)).await;

        // The client created before rotation picks up the new generation.
        assert_eq!(generation_of(&early).await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn lifetime_two_interval_one_scenario() {
        let disposed = Arc::new(Mutex::new(Vec::new()));
        let factory = ClientProxyFactory::new(
            test_builder(&disposed)
                .set_lifetime(Duration::from_secs(2))
                .unwrap()
                .set_cleanup_interval(Duration::from_secs(1))
                .unwrap()
                .build()
                .unwrap(),
        );
        let client = factory.create_client();

        // t=0: handler A
        assert_eq!(generation_of(&client).await, 1);

        // t=1: still A
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(generation_of(&client).await, 1);

        // t=3: B, and A was retired by the sweep at t=2
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(*disposed.lock().unwrap(), vec![1]);
        assert_eq!(generation_of(&client).await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_call_survives_sweep() {
        let disposed = Arc::new(Mutex::new(Vec::new()));
        let factory = ClientProxyFactory::new(
            test_builder(&disposed)
                .set_lifetime(Duration::from_secs(2))
                .unwrap()
                .set_cleanup_interval(Duration::from_secs(1))
                .unwrap()
                .build()
                .unwrap(),
        );
        let client = factory.create_client();

        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let call = tokio::spawn(async move {
            client
                .call(|handler| async move {
                    let _ = release_rx.await;
                    Ok(handler.generation)
                })
                .await
        });

        // Several sweeps fire while the call holds generation 1.
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(disposed.lock().unwrap().is_empty());
        assert_eq!(factory.snapshot().draining_in_flight, 1);

        release_tx.send(()).unwrap();
        assert_eq!(call.await.unwrap().unwrap(), 1);
        assert_eq!(*disposed.lock().unwrap(), vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_operation_releases_borrow() {
        let disposed = Arc::new(Mutex::new(Vec::new()));
        let factory = ClientProxyFactory::new(test_builder(&disposed).build().unwrap());
        let client = factory.create_client();

        let result: crate::Result<()> = client
            .call(|_handler| async move {
                Err(Error::Status {
                    status: 503,
                    body: "unavailable".into(),
                })
            })
            .await;

        assert!(matches!(result, Err(Error::Status { status: 503, .. })));
        assert_eq!(factory.snapshot().current.unwrap().in_flight, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_operation_releases_borrow() {
        let disposed = Arc::new(Mutex::new(Vec::new()));
        let factory = ClientProxyFactory::new(test_builder(&disposed).build().unwrap());
        let client = factory.create_client();

        let (started_tx, started_rx) = tokio::sync::oneshot::channel::<()>();
        let call = tokio::spawn(async move {
            client
                .call(|_handler| async move {
                    let _ = started_tx.send(());
                    std::future::pending::<()>().await;
                    Ok(())
                })
                .await
        });

        started_rx.await.unwrap();
        assert_eq!(factory.snapshot().current.unwrap().in_flight, 1);

        call.abort();
        assert!(call.await.unwrap_err().is_cancelled());
        assert_eq!(factory.snapshot().current.unwrap().in_flight, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_retires_and_rejects_calls() {
        let disposed = Arc::new(Mutex::new(Vec::new()));
        let factory = ClientProxyFactory::new(test_builder(&disposed).build().unwrap());
        let client = factory.create_client();
        assert_eq!(generation_of(&client).await, 1);

        let report = factory.shutdown();
        assert_eq!(report.retired, vec![1]);
        assert_eq!(*disposed.lock().unwrap(), vec![1]);

        let result = client.call(|handler| async move { Ok(handler.generation) }).await;
        assert!(matches!(result, Err(Error::ShutDown)));
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_factory_and_clients_disposes_handler() {
        let disposed = Arc::new(Mutex::new(Vec::new()));
        let factory = ClientProxyFactory::new(test_builder(&disposed).build().unwrap());
        let client = factory.create_client();
        assert_eq!(generation_of(&client).await, 1);

        drop(factory);
        // The client still holds the pool.
        assert!(disposed.lock().unwrap().is_empty());

        drop(client);
        assert_eq!(*disposed.lock().unwrap(), vec![1]);
    }
}
