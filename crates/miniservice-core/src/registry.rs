use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::{CatalogEntry, Error, RegistryRecord};

/// The slice of a service registry the lifecycle layer needs.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Every instance registered under `name`, in registry order.
    async fn list_services(&self, name: &str) -> Result<Vec<CatalogEntry>, Error>;
    async fn register(&self, record: &RegistryRecord) -> Result<(), Error>;
    async fn deregister(&self, id: &str) -> Result<(), Error>;
}

#[async_trait]
impl<R: Registry + ?Sized> Registry for Arc<R> {
    async fn list_services(&self, name: &str) -> Result<Vec<CatalogEntry>, Error> {
        (**self).list_services(name).await
    }

    async fn register(&self, record: &RegistryRecord) -> Result<(), Error> {
        (**self).register(record).await
    }

    async fn deregister(&self, id: &str) -> Result<(), Error> {
        (**self).deregister(id).await
    }
}

/// In-process registry. Registering an id that is already present replaces
/// the old record in place.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    records: RwLock<Vec<RegistryRecord>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<RegistryRecord> {
        self.records.read().clone()
    }

    pub fn get(&self, id: &str) -> Option<RegistryRecord> {
        self.records
            .read()
            .iter()
            .find(|r| r.identity.id == id)
            .cloned()
    }
}

#[async_trait]
impl Registry for MemoryRegistry {
    async fn list_services(&self, name: &str) -> Result<Vec<CatalogEntry>, Error> {
        Ok(self
            .records
            .read()
            .iter()
            .filter(|r| r.identity.name == name)
            .map(RegistryRecord::to_catalog_entry)
            .collect())
    }

    async fn register(&self, record: &RegistryRecord) -> Result<(), Error> {
        let mut records = self.records.write();
        match records
            .iter_mut()
            .find(|r| r.identity.id == record.identity.id)
        {
            Some(existing) => *existing = record.clone(),
            None => records.push(record.clone()),
        }
        Ok(())
    }

    async fn deregister(&self, id: &str) -> Result<(), Error> {
        let mut records = self.records.write();
        let before = records.len();
        records.retain(|r| r.identity.id != id);
        if records.len() == before {
            return Err(Error::registry(
                "deregister",
                format!("unknown service id {id:?}"),
            ));
        }
        Ok(())
    }
}
