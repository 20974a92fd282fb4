use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusHandle;
use tokio::sync::watch;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tracing::info;

use miniservice_core::{Endpoint, Error, HealthCheck, Registry, RegistryRecord, ServiceIdentity, tag};

use crate::config::ServiceConfig;
use crate::handler::{HandlerRegistrar, ServerHandle};
use crate::lifecycle::{Lifecycle, stopped};
use crate::{host, probe};

/// Wait between starting both listeners and publishing the instance, so the
/// registry's first health check finds the probe up.
pub const REGISTRATION_DELAY: Duration = Duration::from_millis(250);

/// A tonic server that publishes itself into a [`Registry`] while it runs.
pub struct MiniService {
    identity: ServiceIdentity,
    registry: Arc<dyn Registry>,
    config: ServiceConfig,
    services: ServerHandle,
    metrics: Option<PrometheusHandle>,
}

impl MiniService {
    pub fn new(id: impl Into<String>, name: impl Into<String>, registry: impl Registry + 'static) -> Self {
        Self {
            identity: ServiceIdentity::new(id, name),
            registry: Arc::new(registry),
            config: ServiceConfig::default(),
            services: ServerHandle::default(),
            metrics: None,
        }
    }

    pub fn with_config(mut self, config: ServiceConfig) -> Self {
        self.config = config;
        self
    }

    /// Serves `/metrics` from the liveness listener.
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    pub fn identity(&self) -> &ServiceIdentity {
        &self.identity
    }

    /// Names of the RPC services registered so far.
    pub fn services(&self) -> Vec<&'static str> {
        self.services.services().collect()
    }

    /// Calls `f` exactly once with this server's handle and `handler`.
    /// Register every handler before [`listen`](Self::listen).
    ///
    /// ```ignore
    /// service.register(|s, h| { s.add_service(GreeterServer::new(h)); }, MyGreeter);
    /// ```
    pub fn register<H, F>(&mut self, f: F, handler: H) -> &mut Self
    where
        F: FnOnce(&mut ServerHandle, H),
    {
        self.register_with(f, handler)
    }

    /// Like [`register`](Self::register) for any [`HandlerRegistrar`].
    pub fn register_with<H, R>(&mut self, registrar: R, handler: H) -> &mut Self
    where
        R: HandlerRegistrar<H>,
    {
        registrar.register(&mut self.services, handler);
        self
    }

    /// Runs until the RPC server or the health probe stops.
    pub async fn listen(self) -> Result<(), Error> {
        self.listen_until(std::future::pending()).await
    }

    /// Runs until the RPC server or the health probe stops, or `shutdown`
    /// resolves. The instance is deregistered on the way out if it was
    /// registered.
    pub async fn listen_until<F>(self, shutdown: F) -> Result<(), Error>
    where
        F: Future<Output = ()>,
    {
        let MiniService {
            identity,
            registry,
            config,
            services,
            metrics,
        } = self;
        let ephemeral = SocketAddr::new(config.bind_address, 0);

        let (rpc_listener, rpc_port) = host::bind(ephemeral, "rpc").await?;
        let host = match &config.advertise_host {
            Some(host) => host.clone(),
            None => host::reachable(config.bind_address).await?,
        };
        let rpc_endpoint = Endpoint::new(host, rpc_port);
        let discovery_tag = tag::encode(&rpc_endpoint);
        info!(id = %identity.id, "service reachable at: {rpc_endpoint} (tag: {discovery_tag})");

        let (probe_listener, probe_port) = host::bind(ephemeral, "health check").await?;
        let (stop, stop_rx) = watch::channel(false);

        let probe = tokio::spawn(probe::serve(
            probe_listener,
            probe::router(metrics),
            stopped(stop_rx.clone()),
        ));

        let routes = services.into_routes();
        let rpc = tokio::spawn(async move {
            Server::builder()
                .add_routes(routes)
                .serve_with_incoming_shutdown(TcpListenerStream::new(rpc_listener), stopped(stop_rx))
                .await
                .map_err(|e| Error::transport("failed serving grpc service", e))
        });

        let check = HealthCheck::http(&rpc_endpoint.host, probe_port)
            .with_interval(config.check_interval.clone())
            .with_timeout(config.check_timeout.clone());
        let record = RegistryRecord::new(identity, &rpc_endpoint, probe_port).with_check(check);

        Lifecycle {
            registry: &*registry,
            record,
            registration_delay: config.registration_delay(),
            drain_timeout: config.drain_timeout(),
            stop,
        }
        .run(probe, rpc, shutdown)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::tests::{Greeter, Orders};
    use miniservice_core::MemoryRegistry;

    fn local_config() -> ServiceConfig {
        ServiceConfig::default()
            .with_bind_address("127.0.0.1".parse().unwrap())
            .with_advertise_host("127.0.0.1")
    }

    async fn registered(registry: &MemoryRegistry, id: &str) -> RegistryRecord {
        for _ in 0..100 {
            if let Some(record) = registry.get(id) {
                return record;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("{id} was never registered");
    }

    #[test]
    fn register_invokes_function_once_and_chains() {
        let mut service = MiniService::new("a", "orders", MemoryRegistry::new());
        let mut calls = 0;

        service
            .register(
                |s, h| {
                    calls += 1;
                    s.add_service(h);
                },
                Greeter,
            )
            .register(|s, h| { s.add_service(h); }, Orders);

        assert_eq!(calls, 1);
        assert_eq!(service.services(), ["test.Greeter", "test.Orders"]);
    }

    #[test]
    fn register_accepts_function_that_attaches_nothing() {
        let mut service = MiniService::new("a", "orders", MemoryRegistry::new());
        let mut seen = None;

        service.register(
            |_s: &mut ServerHandle, h: &str| {
                seen = Some(h.to_string());
            },
            "",
        );

        assert_eq!(seen.as_deref(), Some(""));
        assert!(service.services().is_empty());
    }

    #[test]
    fn reregistering_a_service_invokes_function_and_replaces_it() {
        let mut service = MiniService::new("a", "orders", MemoryRegistry::new());
        let mut calls = 0;

        service.register(|s, h| { s.add_service(h); }, Greeter);
        service.register(
            |s, h| {
                calls += 1;
                s.add_service(h);
            },
            Greeter,
        );

        assert_eq!(calls, 1);
        assert_eq!(service.services(), ["test.Greeter"]);
    }

    #[tokio::test]
    async fn publishes_tag_and_deregisters_on_shutdown() {
        let registry = Arc::new(MemoryRegistry::new());
        let service = MiniService::new("orders-1", "orders", registry.clone())
            .with_config(local_config().with_advertise_host("10.0.0.5"));
        let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
        let run = tokio::spawn(service.listen_until(async {
            let _ = stopped.await;
        }));

        let record = registered(&registry, "orders-1").await;
        let endpoint = tag::decode(record.discovery_tag().unwrap()).unwrap();
        assert_eq!(endpoint.host, "10.0.0.5");
        assert_ne!(endpoint.port, record.port);
        assert!(record.tags.contains(&"miniservice".to_string()));
        assert_eq!(
            record.check.http,
            format!("http://10.0.0.5:{}/health", record.port)
        );

        stop.send(()).unwrap();
        run.await.unwrap().unwrap();
        assert!(registry.records().is_empty());
    }

    #[tokio::test]
    async fn probe_and_rpc_listeners_are_live_while_serving() {
        let registry = Arc::new(MemoryRegistry::new());
        let service = MiniService::new("orders-1", "orders", registry.clone())
            .with_config(local_config());
        let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
        let run = tokio::spawn(service.listen_until(async {
            let _ = stopped.await;
        }));

        let record = registered(&registry, "orders-1").await;
        let rpc = tag::decode(record.discovery_tag().unwrap()).unwrap();
        tokio::net::TcpStream::connect(("127.0.0.1", record.port)).await.unwrap();
        tonic::transport::Endpoint::from_shared(rpc.uri())
            .unwrap()
            .connect()
            .await
            .unwrap();

        stop.send(()).unwrap();
        run.await.unwrap().unwrap();
        assert!(tokio::net::TcpStream::connect(("127.0.0.1", record.port)).await.is_err());
    }

    #[tokio::test]
    async fn specific_bind_address_is_published_when_no_host_is_advertised() {
        let registry = Arc::new(MemoryRegistry::new());
        let config = ServiceConfig::default().with_bind_address("127.0.0.1".parse().unwrap());
        let service = MiniService::new("orders-1", "orders", registry.clone()).with_config(config);
        let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
        let run = tokio::spawn(service.listen_until(async {
            let _ = stopped.await;
        }));

        let record = registered(&registry, "orders-1").await;
        assert_eq!(tag::decode(record.discovery_tag().unwrap()).unwrap().host, "127.0.0.1");
        assert_eq!(record.address, "127.0.0.1");

        stop.send(()).unwrap();
        run.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn bind_failure_is_network_error_before_registration() {
        let registry = Arc::new(MemoryRegistry::new());
        let config = local_config().with_bind_address("203.0.113.1".parse().unwrap());
        let service = MiniService::new("orders-1", "orders", registry.clone()).with_config(config);

        assert!(matches!(service.listen().await, Err(Error::Network { .. })));
        assert!(registry.records().is_empty());
    }
}
