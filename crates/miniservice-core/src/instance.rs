use serde::{Deserialize, Serialize};

use crate::health::HealthCheck;
use crate::tag::{self, CATEGORY_TAG, Endpoint};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceIdentity {
    /// Distinguishes instances that share a name
    pub id: String,
    pub name: String,
}

impl ServiceIdentity {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// What an instance submits to the registry, once per run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryRecord {
    pub identity: ServiceIdentity,
    pub tags: Vec<String>,
    /// Host the registry reaches the instance on
    pub address: String,
    /// Port of the liveness probe
    pub port: u16,
    pub check: HealthCheck,
}

impl RegistryRecord {
    /// Builds the record for an instance whose RPC listener is `rpc` and whose
    /// probe listens on `probe_port` of the same host.
    pub fn new(identity: ServiceIdentity, rpc: &Endpoint, probe_port: u16) -> Self {
        Self {
            identity,
            tags: vec![CATEGORY_TAG.to_string(), tag::encode(rpc)],
            address: rpc.host.clone(),
            port: probe_port,
            check: HealthCheck::http(&rpc.host, probe_port),
        }
    }

    pub fn with_check(mut self, check: HealthCheck) -> Self {
        self.check = check;
        self
    }

    pub fn discovery_tag(&self) -> Option<&str> {
        tag::find_discovery_tag(&self.tags)
    }

    /// The view a resolver gets of this record once it is in a registry.
    pub fn to_catalog_entry(&self) -> CatalogEntry {
        CatalogEntry {
            service_id: self.identity.id.clone(),
            service_name: self.identity.name.clone(),
            service_tags: self.tags.clone(),
            service_address: self.address.clone(),
            service_port: self.port,
        }
    }
}

/// A registered instance as listed by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub service_id: String,
    pub service_name: String,
    pub service_tags: Vec<String>,
    #[serde(default)]
    pub service_address: String,
    #[serde(default)]
    pub service_port: u16,
}

impl CatalogEntry {
    pub fn discovery_tag(&self) -> Option<&str> {
        tag::find_discovery_tag(&self.service_tags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_carries_category_and_discovery_tag() {
        let record = RegistryRecord::new(
            ServiceIdentity::new("orders-1", "orders"),
            &Endpoint::new("10.0.0.5", 51000),
            51001,
        );

        assert_eq!(record.tags, vec!["miniservice", "miniservice-10.0.0.5:51000"]);
        assert_eq!(record.discovery_tag(), Some("miniservice-10.0.0.5:51000"));
        assert_eq!(record.port, 51001);
        assert_eq!(record.check.http, "http://10.0.0.5:51001/health");
        assert_eq!(record.check.interval, "2s");
        assert_eq!(record.check.timeout, "2s");
    }

    #[test]
    fn catalog_entry_mirrors_record() {
        let record = RegistryRecord::new(
            ServiceIdentity::new("orders-1", "orders"),
            &Endpoint::new("10.0.0.5", 51000),
            51001,
        );
        let entry = record.to_catalog_entry();

        assert_eq!(entry.service_id, "orders-1");
        assert_eq!(entry.service_name, "orders");
        assert_eq!(entry.discovery_tag(), record.discovery_tag());
    }
}
