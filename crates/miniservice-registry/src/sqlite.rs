use std::path::Path;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{Connection, Result as SqlResult, params};

use miniservice_core::{CatalogEntry, Error, Registry, RegistryRecord};

/// File-backed registry for processes sharing one host.
///
/// Health checks are stored with each record but nothing runs them.
pub struct SqliteRegistry {
    conn: Mutex<Connection>,
}

impl SqliteRegistry {
    pub fn open(path: impl AsRef<Path>) -> SqlResult<Self> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> SqlResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> SqlResult<Self> {
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_tables()?;
        Ok(db)
    }

    fn init_tables(&self) -> SqlResult<()> {
        self.conn.lock().execute_batch(
            "
            CREATE TABLE IF NOT EXISTS services (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                tags TEXT NOT NULL,
                address TEXT NOT NULL,
                port INTEGER NOT NULL,
                check_http TEXT NOT NULL,
                check_interval TEXT NOT NULL,
                check_timeout TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS services_by_name ON services(name);
            ",
        )
    }
}

#[async_trait]
impl Registry for SqliteRegistry {
    async fn list_services(&self, name: &str) -> Result<Vec<CatalogEntry>, Error> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT id, name, tags, address, port FROM services WHERE name = ?1 ORDER BY rowid")
            .map_err(|e| Error::registry("list", e))?;
        let rows = stmt
            .query_map([name], |row| {
                let tags: String = row.get(2)?;
                let tags: Vec<String> = serde_json::from_str(&tags)
                    .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?;
                Ok(CatalogEntry {
                    service_id: row.get(0)?,
                    service_name: row.get(1)?,
                    service_tags: tags,
                    service_address: row.get(3)?,
                    service_port: row.get(4)?,
                })
            })
            .map_err(|e| Error::registry("list", e))?;

        rows.collect::<SqlResult<Vec<_>>>()
            .map_err(|e| Error::registry("list", e))
    }

    async fn register(&self, record: &RegistryRecord) -> Result<(), Error> {
        let tags = serde_json::to_string(&record.tags).map_err(|e| Error::registry("register", e))?;
        self.conn
            .lock()
            .execute(
                "INSERT INTO services (id, name, tags, address, port, check_http, check_interval, check_timeout)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    tags = excluded.tags,
                    address = excluded.address,
                    port = excluded.port,
                    check_http = excluded.check_http,
                    check_interval = excluded.check_interval,
                    check_timeout = excluded.check_timeout",
                params![
                    record.identity.id,
                    record.identity.name,
                    tags,
                    record.address,
                    record.port,
                    record.check.http,
                    record.check.interval,
                    record.check.timeout,
                ],
            )
            .map_err(|e| Error::registry("register", e))?;
        Ok(())
    }

    async fn deregister(&self, id: &str) -> Result<(), Error> {
        let removed = self
            .conn
            .lock()
            .execute("DELETE FROM services WHERE id = ?1", [id])
            .map_err(|e| Error::registry("deregister", e))?;
        if removed == 0 {
            return Err(Error::registry("deregister", format!("unknown service id {id:?}")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use miniservice_core::{Endpoint, ServiceIdentity};

    fn record(id: &str, name: &str, port: u16) -> RegistryRecord {
        RegistryRecord::new(
            ServiceIdentity::new(id, name),
            &Endpoint::new("10.0.0.5", port),
            port + 1,
        )
    }

    #[tokio::test]
    async fn records_survive_reopening_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.db");

        {
            let registry = SqliteRegistry::open(&path).unwrap();
            registry.register(&record("orders-1", "orders", 51000)).await.unwrap();
        }

        let registry = SqliteRegistry::open(&path).unwrap();
        let entries = registry.list_services("orders").await.unwrap();
        assert_eq!(entries, vec![record("orders-1", "orders", 51000).to_catalog_entry()]);
    }

    #[tokio::test]
    async fn lists_by_name_in_registration_order() {
        let registry = SqliteRegistry::in_memory().unwrap();
        registry.register(&record("b", "orders", 2000)).await.unwrap();
        registry.register(&record("x", "billing", 3000)).await.unwrap();
        registry.register(&record("a", "orders", 1000)).await.unwrap();
        registry.register(&record("b", "orders", 4000)).await.unwrap();

        let entries = registry.list_services("orders").await.unwrap();
        let ids: Vec<_> = entries.iter().map(|e| e.service_id.as_str()).collect();
        assert_eq!(ids, ["b", "a"]);
        assert_eq!(entries[0].discovery_tag(), Some("miniservice-10.0.0.5:4000"));
    }

    #[tokio::test]
    async fn deregister_removes_and_rejects_unknown_ids() {
        let registry = SqliteRegistry::in_memory().unwrap();
        registry.register(&record("a", "orders", 1000)).await.unwrap();

        registry.deregister("a").await.unwrap();
        assert!(registry.list_services("orders").await.unwrap().is_empty());
        assert!(matches!(
            registry.deregister("a").await,
            Err(Error::Registry { operation: "deregister", .. })
        ));
    }
}
