use tonic::transport::{Channel, Endpoint as Dial};
use tracing::debug;

use miniservice_core::{Endpoint, Error, Registry, TAG_PREFIX, tag};

/// Turns a logical `(id, name)` into the endpoint its instance published.
pub struct Resolver<R> {
    registry: R,
}

impl<R: Registry> Resolver<R> {
    pub fn new(registry: R) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    /// Looks up instance `id` of `name` and decodes its discovery tag. If the
    /// registry lists `id` more than once, the first entry wins.
    pub async fn resolve(&self, id: &str, name: &str) -> Result<Endpoint, Error> {
        let entries = self.registry.list_services(name).await?;
        let entry = entries
            .iter()
            .find(|e| e.service_id == id)
            .ok_or_else(|| Error::NotFound(format!("could not find service {id} : {name}")))?;
        let discovery_tag = entry.discovery_tag().ok_or_else(|| {
            Error::NotFound(format!(
                "could not find tag with prefix {TAG_PREFIX} for service ({id} : {name})"
            ))
        })?;

        let endpoint = tag::decode(discovery_tag)?;
        debug!(id, name, %endpoint, "resolved service");
        Ok(endpoint)
    }

    /// Resolves and dials with tonic's default settings. Not retried.
    pub async fn connect(&self, id: &str, name: &str) -> Result<Channel, Error> {
        self.connect_with(id, name, |dial| dial).await
    }

    /// Resolves and dials, letting `configure` set timeouts, keepalive and
    /// other dial options first.
    pub async fn connect_with<F>(&self, id: &str, name: &str, configure: F) -> Result<Channel, Error>
    where
        F: FnOnce(Dial) -> Dial,
    {
        let endpoint = self.resolve(id, name).await?;
        let dial = Dial::from_shared(endpoint.uri())
            .map_err(|e| Error::transport(format!("invalid address for {id} : {name}"), e))?;
        configure(dial)
            .connect()
            .await
            .map_err(|e| Error::transport(format!("failed connecting to {id} : {name} at {endpoint}"), e))
    }
}
