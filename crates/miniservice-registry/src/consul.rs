use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, Url};
use serde::{Deserialize, Serialize};

use miniservice_core::{CatalogEntry, Error, Registry, RegistryRecord};

pub const DEFAULT_ADDRESS: &str = "127.0.0.1:8500";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Where the local Consul agent is and how to authenticate to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsulConfig {
    /// `host:port` or a full `http(s)://` URL
    pub address: String,
    pub token: Option<String>,
    pub tls: bool,
    /// Upper bound for each request, connect through response body.
    pub timeout: Duration,
}

impl Default for ConsulConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            token: None,
            tls: false,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl ConsulConfig {
    /// Reads `CONSUL_HTTP_ADDR`, `CONSUL_HTTP_TOKEN` and `CONSUL_HTTP_SSL`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(address) = std::env::var("CONSUL_HTTP_ADDR") {
            config.address = address;
        }
        config.token = std::env::var("CONSUL_HTTP_TOKEN").ok().filter(|t| !t.is_empty());
        config.tls = std::env::var("CONSUL_HTTP_SSL")
            .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
            .unwrap_or(false);
        config
    }

    fn base_url(&self) -> String {
        if self.address.starts_with("http://") || self.address.starts_with("https://") {
            self.address.clone()
        } else if self.tls {
            format!("https://{}", self.address)
        } else {
            format!("http://{}", self.address)
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct AgentServiceRegistration<'a> {
    #[serde(rename = "ID")]
    id: &'a str,
    name: &'a str,
    tags: &'a [String],
    address: &'a str,
    port: u16,
    check: AgentServiceCheck<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct AgentServiceCheck<'a> {
    #[serde(rename = "HTTP")]
    http: &'a str,
    interval: &'a str,
    timeout: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CatalogService {
    #[serde(rename = "ServiceID")]
    service_id: String,
    service_name: String,
    #[serde(default)]
    service_tags: Option<Vec<String>>,
    #[serde(default)]
    service_address: String,
    #[serde(default)]
    service_port: u16,
}

impl From<CatalogService> for CatalogEntry {
    fn from(s: CatalogService) -> Self {
        CatalogEntry {
            service_id: s.service_id,
            service_name: s.service_name,
            service_tags: s.service_tags.unwrap_or_default(),
            service_address: s.service_address,
            service_port: s.service_port,
        }
    }
}

/// [`Registry`] backed by a Consul agent's HTTP API.
#[derive(Debug, Clone)]
pub struct ConsulRegistry {
    client: Client,
    base: Url,
    token: Option<String>,
}

impl ConsulRegistry {
    pub fn new(config: ConsulConfig) -> Result<Self, Error> {
        let base = Url::parse(&config.base_url())
            .map_err(|e| Error::registry("connect", format!("invalid consul address {:?}: {e}", config.address)))?;
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::registry("connect", e))?;
        Ok(Self {
            client,
            base,
            token: config.token,
        })
    }

    pub fn from_env() -> Result<Self, Error> {
        Self::new(ConsulConfig::from_env())
    }

    fn url(&self, operation: &'static str, segments: &[&str]) -> Result<Url, Error> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| Error::registry(operation, format!("consul address {} cannot be a base", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => builder.header("X-Consul-Token", token),
            None => builder,
        }
    }

    async fn send(&self, operation: &'static str, builder: RequestBuilder) -> Result<Response, Error> {
        let res = self
            .authorized(builder)
            .send()
            .await
            .map_err(|e| Error::registry(operation, e))?;
        if res.status().is_success() {
            return Ok(res);
        }
        let status = res.status();
        let body = res.text().await.unwrap_or_default();
        Err(Error::registry(operation, format!("consul returned {status}: {}", body.trim())))
    }
}

#[async_trait]
impl Registry for ConsulRegistry {
    async fn list_services(&self, name: &str) -> Result<Vec<CatalogEntry>, Error> {
        let url = self.url("list", &["v1", "catalog", "service", name])?;
        let services: Vec<CatalogService> = self
            .send("list", self.client.get(url))
            .await?
            .json()
            .await
            .map_err(|e| Error::registry("list", e))?;
        Ok(services.into_iter().map(CatalogEntry::from).collect())
    }

    async fn register(&self, record: &RegistryRecord) -> Result<(), Error> {
        let url = self.url("register", &["v1", "agent", "service", "register"])?;
        let body = AgentServiceRegistration {
            id: &record.identity.id,
            name: &record.identity.name,
            tags: &record.tags,
            address: &record.address,
            port: record.port,
            check: AgentServiceCheck {
                http: &record.check.http,
                interval: &record.check.interval,
                timeout: &record.check.timeout,
            },
        };
        self.send("register", self.client.put(url).json(&body)).await?;
        tracing::debug!(id = %record.identity.id, "consul registration accepted");
        Ok(())
    }

    async fn deregister(&self, id: &str) -> Result<(), Error> {
        let url = self.url("deregister", &["v1", "agent", "service", "deregister", id])?;
        self.send("deregister", self.client.put(url)).await?;
        Ok(())
    }
}
