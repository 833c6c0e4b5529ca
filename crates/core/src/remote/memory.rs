//! In-memory document server.
//!
//! Holds resources keyed by their server-relative path. Used for offline document inspection
//! from the CLI and as the remote side in tests. Unit tests can additionally make individual
//! paths fail and inspect the writes.

use super::{resource_path, DocumentClient, DocumentClientFactory, RemoteCapability, TenantStore};
use crate::error::RemoteError;
use fhir::{Resource, ResourceType};
use serde_json::Value;
use std::collections::BTreeMap;
#[cfg(test)]
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct Store {
    resources: BTreeMap<String, Value>,
    #[cfg(test)]
    failing_paths: BTreeSet<String>,
    #[cfg(test)]
    reject_writes: bool,
    writes: Vec<String>,
}

#[derive(Debug, Default)]
pub struct InMemoryDocumentServer {
    store: Mutex<Store>,
}

impl InMemoryDocumentServer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store a typed resource at its own path.
    pub fn insert(&self, resource: &Resource) -> Result<(), RemoteError> {
        let path = resource_path(resource)?;
        let body = serde_json::to_value(resource)
            .map_err(|err| RemoteError::InvalidRequest(err.to_string()))?;
        self.lock().resources.insert(path, body);
        Ok(())
    }

    /// Store an arbitrary body at `path`, without checking it.
    pub fn insert_raw(&self, path: impl Into<String>, body: Value) {
        self.lock().resources.insert(path.into(), body);
    }

    /// Make reads of `path` fail as if the server were unavailable.
    #[cfg(test)]
    pub fn fail_reads_of(&self, path: impl Into<String>) {
        self.lock().failing_paths.insert(path.into());
    }

    /// Make every write fail.
    #[cfg(test)]
    pub fn reject_writes(&self, reject: bool) {
        self.lock().reject_writes = reject;
    }

    pub fn get(&self, path: &str) -> Option<Value> {
        self.lock().resources.get(path).cloned()
    }

    /// Paths written through [`DocumentClient::create_or_update`], in order.
    #[cfg(test)]
    pub fn writes(&self) -> Vec<String> {
        self.lock().writes.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
fn unavailable(path: &str) -> RemoteError {
    RemoteError::Status {
        path: path.to_owned(),
        status: 503,
        body: "unavailable".into(),
    }
}

impl DocumentClient for InMemoryDocumentServer {
    fn read(&self, path: &str) -> Result<Value, RemoteError> {
        let store = self.lock();
        #[cfg(test)]
        if store.failing_paths.contains(path) {
            return Err(unavailable(path));
        }
        store
            .resources
            .get(path)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(path.to_owned()))
    }

    /// Matches top-level string members by equality; `_`-prefixed parameters are ignored.
    ///
    /// Token searches on nested elements (`code=system|code`) and search modifiers are not
    /// supported and match nothing.
    fn search(
        &self,
        resource_type: ResourceType,
        params: &[(&str, &str)],
    ) -> Result<Vec<Value>, RemoteError> {
        let prefix = format!("/{resource_type}/");
        let store = self.lock();
        #[cfg(test)]
        if store.failing_paths.contains(prefix.trim_end_matches('/')) {
            return Err(unavailable(&prefix));
        }
        Ok(store
            .resources
            .iter()
            .filter(|(path, _)| path.starts_with(&prefix))
            .filter(|(_, body)| {
                params
                    .iter()
                    .filter(|(key, _)| !key.starts_with('_'))
                    .all(|(key, value)| body.get(*key).and_then(Value::as_str) == Some(*value))
            })
            .map(|(_, body)| body.clone())
            .collect())
    }

    fn create_or_update(&self, resource: &Resource) -> Result<(), RemoteError> {
        let path = resource_path(resource)?;
        #[cfg(test)]
        if self.lock().reject_writes {
            return Err(unavailable(&path));
        }
        self.insert(resource)?;
        self.lock().writes.push(path);
        Ok(())
    }
}

/// Connects every capability to the same [`InMemoryDocumentServer`] and records the
/// capabilities it was asked for.
#[derive(Debug, Default)]
pub struct InMemoryClientFactory {
    server: Arc<InMemoryDocumentServer>,
    connections: Mutex<Vec<RemoteCapability>>,
}

impl InMemoryClientFactory {
    pub fn new(server: Arc<InMemoryDocumentServer>) -> Self {
        Self {
            server,
            connections: Mutex::new(Vec::new()),
        }
    }

    pub fn server(&self) -> &Arc<InMemoryDocumentServer> {
        &self.server
    }

    pub fn connections(&self) -> Vec<RemoteCapability> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

struct SharedServer(Arc<InMemoryDocumentServer>);

impl DocumentClient for SharedServer {
    fn read(&self, path: &str) -> Result<Value, RemoteError> {
        self.0.read(path)
    }

    fn search(
        &self,
        resource_type: ResourceType,
        params: &[(&str, &str)],
    ) -> Result<Vec<Value>, RemoteError> {
        self.0.search(resource_type, params)
    }

    fn create_or_update(&self, resource: &Resource) -> Result<(), RemoteError> {
        self.0.create_or_update(resource)
    }
}

impl DocumentClientFactory for InMemoryClientFactory {
    fn connect(
        &self,
        capability: &RemoteCapability,
    ) -> Result<Box<dyn DocumentClient>, RemoteError> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(capability.clone());
        Ok(Box::new(SharedServer(Arc::clone(&self.server))))
    }
}

/// One [`InMemoryDocumentServer`] per customer, created on first use.
#[derive(Debug, Default)]
pub struct InMemoryTenantStore {
    tenants: Mutex<BTreeMap<String, Arc<InMemoryDocumentServer>>>,
}

impl InMemoryTenantStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The server holding `customer_id`'s resources.
    pub fn server(&self, customer_id: &str) -> Arc<InMemoryDocumentServer> {
        let mut tenants = self.tenants.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(tenants.entry(customer_id.to_owned()).or_default())
    }
}

impl TenantStore for InMemoryTenantStore {
    fn tenant(&self, customer_id: &str) -> Result<Box<dyn DocumentClient>, RemoteError> {
        Ok(Box::new(SharedServer(self.server(customer_id))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fhir::{NegotiationStatus, Task};
    use serde_json::json;

    fn task(id: &str, status: NegotiationStatus) -> Resource {
        let mut task = Task {
            id: Some(id.into()),
            ..Task::default()
        };
        task.set_negotiation_status(status);
        Resource::Task(task)
    }

    #[test]
    fn read_write_and_failures() {
        let server = InMemoryDocumentServer::new();
        server.create_or_update(&task("t1", NegotiationStatus::Requested)).unwrap();

        assert_eq!(server.read("/Task/t1").unwrap()["status"], "requested");
        assert_eq!(server.writes(), vec!["/Task/t1".to_owned()]);
        assert!(matches!(
            server.read("/Task/missing"),
            Err(RemoteError::NotFound(_))
        ));

        server.fail_reads_of("/Task/t1");
        assert!(matches!(
            server.read("/Task/t1"),
            Err(RemoteError::Status { status: 503, .. })
        ));

        server.reject_writes(true);
        assert!(server.create_or_update(&task("t2", NegotiationStatus::Requested)).is_err());
        assert!(server.get("/Task/t2").is_none());
    }

    #[test]
    fn search_filters_on_type_and_members() {
        let server = InMemoryDocumentServer::new();
        server.insert(&task("t1", NegotiationStatus::Requested)).unwrap();
        server.insert(&task("t2", NegotiationStatus::Accepted)).unwrap();
        server.insert_raw("/Patient/p1", json!({"resourceType": "Patient", "id": "p1"}));

        let all = server.search(ResourceType::Task, &[("_lastUpdated", "x")]).unwrap();
        assert_eq!(all.len(), 2);

        let accepted = server.search(ResourceType::Task, &[("status", "accepted")]).unwrap();
        assert_eq!(accepted.len(), 1);
        assert_eq!(accepted[0]["id"], "t2");
    }

    #[test]
    fn tenants_do_not_share_resources() {
        let store = InMemoryTenantStore::new();
        store
            .tenant("1")
            .unwrap()
            .create_or_update(&task("t1", NegotiationStatus::Requested))
            .unwrap();

        assert!(store.server("1").get("/Task/t1").is_some());
        assert!(matches!(
            store.tenant("2").unwrap().read("/Task/t1"),
            Err(RemoteError::NotFound(_))
        ));
    }

    #[test]
    fn nested_token_searches_match_nothing() {
        let server = InMemoryDocumentServer::new();
        server.insert(&task("t1", NegotiationStatus::Requested)).unwrap();
        let found = server
            .search(ResourceType::Task, &[("code", "http://snomed.info/sct|308292007")])
            .unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn factory_records_capabilities() {
        let factory = InMemoryClientFactory::new(Arc::new(InMemoryDocumentServer::new()));
        let capability = RemoteCapability::new("https://sender.example/fhir", "token-1");

        let client = factory.connect(&capability).unwrap();
        client.create_or_update(&task("t1", NegotiationStatus::OnHold)).unwrap();

        assert_eq!(factory.connections(), vec![capability]);
        assert!(factory.server().get("/Task/t1").is_some());
    }
}
