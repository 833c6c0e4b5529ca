//! Transport to FHIR document servers.
//!
//! A [`RemoteCapability`] is the explicit value that scopes access to another organisation's
//! server: its base URL plus the bearer token obtained from the authorization gateway. A
//! [`DocumentClientFactory`] turns a capability into a [`DocumentClient`]; nothing about the
//! tenant or token is held anywhere else.

mod http;
mod memory;

pub use http::{HttpClientFactory, HttpDocumentClient, HttpTenantStore};
pub use memory::{InMemoryClientFactory, InMemoryDocumentServer, InMemoryTenantStore};

use crate::error::RemoteError;
use fhir::{Resource, ResourceType};
use serde_json::Value;
use std::fmt;

/// Scoped access to one organisation's document server.
#[derive(Clone, PartialEq, Eq)]
pub struct RemoteCapability {
    base_url: String,
    access_token: String,
}

impl RemoteCapability {
    pub fn new(base_url: impl Into<String>, access_token: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
            access_token: access_token.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }
}

impl fmt::Debug for RemoteCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteCapability")
            .field("base_url", &self.base_url)
            .field("access_token", &"<redacted>")
            .finish()
    }
}

/// Resource-oriented access to a document server.
pub trait DocumentClient: Send + Sync {
    /// `GET {base}{path}`, where `path` is server-relative (`/Task/123`).
    fn read(&self, path: &str) -> Result<Value, RemoteError>;

    /// `GET {base}/{type}?k=v&...`, returning the resources of the result Bundle.
    fn search(
        &self,
        resource_type: ResourceType,
        params: &[(&str, &str)],
    ) -> Result<Vec<Value>, RemoteError>;

    /// `PUT {base}/{type}/{id}`. The resource must carry an id.
    fn create_or_update(&self, resource: &Resource) -> Result<(), RemoteError>;
}

pub trait DocumentClientFactory: Send + Sync {
    fn connect(&self, capability: &RemoteCapability) -> Result<Box<dyn DocumentClient>, RemoteError>;
}

/// The organisation's own document server, scoped to one customer at a time.
///
/// Customers never see each other's resources through a tenant client.
pub trait TenantStore: Send + Sync {
    fn tenant(&self, customer_id: &str) -> Result<Box<dyn DocumentClient>, RemoteError>;
}

/// Server-relative path for writing `resource`.
pub(crate) fn resource_path(resource: &Resource) -> Result<String, RemoteError> {
    resource
        .reference()
        .map(|reference| reference.path())
        .map_err(|err| RemoteError::InvalidRequest(err.to_string()))
}

/// Extract `entry[].resource` from a search Bundle.
pub(crate) fn bundle_resources(path: &str, bundle: Value) -> Result<Vec<Value>, RemoteError> {
    let invalid = |message: &str| RemoteError::InvalidBody {
        path: path.to_owned(),
        message: message.to_owned(),
    };

    let Value::Object(mut bundle) = bundle else {
        return Err(invalid("search result is not an object"));
    };
    if bundle.get("resourceType").and_then(Value::as_str) != Some("Bundle") {
        return Err(invalid("search result is not a Bundle"));
    }

    match bundle.remove("entry") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(entries)) => Ok(entries
            .into_iter()
            .filter_map(|mut entry| entry.get_mut("resource").map(Value::take))
            .collect()),
        Some(_) => Err(invalid("Bundle.entry is not an array")),
    }
}
