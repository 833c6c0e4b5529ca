//! Blocking HTTP document client.
//!
//! `reqwest::blocking` clients own an internal runtime: build them outside of any async
//! context (the REST runner does so inside `spawn_blocking`).

use super::{
    bundle_resources, resource_path, DocumentClient, DocumentClientFactory, RemoteCapability,
    TenantStore,
};
use crate::error::RemoteError;
use fhir::{Resource, ResourceType};
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;

const FHIR_JSON: &str = "application/fhir+json";

/// A [`DocumentClient`] over HTTP.
#[derive(Clone)]
pub struct HttpDocumentClient {
    http: Client,
    base_url: String,
    access_token: Option<String>,
}

impl HttpDocumentClient {
    pub fn new(http: Client, capability: &RemoteCapability) -> Self {
        Self {
            http,
            base_url: capability.base_url().to_owned(),
            access_token: Some(capability.access_token().to_owned()),
        }
    }

    /// Client for the organisation's own document server, which is reached without a token.
    pub fn local(http: Client, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_owned(),
            access_token: None,
        }
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    fn send(&self, path: &str, request: RequestBuilder) -> Result<Response, RemoteError> {
        let request = match &self.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        };
        let response = request.header(ACCEPT, FHIR_JSON).send()?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(RemoteError::NotFound(path.to_owned()));
        }
        let body = response.text().unwrap_or_default();
        Err(RemoteError::Status {
            path: path.to_owned(),
            status: status.as_u16(),
            body,
        })
    }

    fn json(path: &str, response: Response) -> Result<Value, RemoteError> {
        response.json::<Value>().map_err(|err| RemoteError::InvalidBody {
            path: path.to_owned(),
            message: err.to_string(),
        })
    }
}

impl DocumentClient for HttpDocumentClient {
    fn read(&self, path: &str) -> Result<Value, RemoteError> {
        tracing::debug!("GET {}{}", self.base_url, path);
        let response = self.send(path, self.http.get(self.url(path)))?;
        Self::json(path, response)
    }

    fn search(
        &self,
        resource_type: ResourceType,
        params: &[(&str, &str)],
    ) -> Result<Vec<Value>, RemoteError> {
        let path = format!("/{resource_type}");
        tracing::debug!("GET {}{} (search)", self.base_url, path);
        let response = self.send(&path, self.http.get(self.url(&path)).query(params))?;
        bundle_resources(&path, Self::json(&path, response)?)
    }

    fn create_or_update(&self, resource: &Resource) -> Result<(), RemoteError> {
        let path = resource_path(resource)?;
        tracing::debug!("PUT {}{}", self.base_url, path);
        let request = self
            .http
            .put(self.url(&path))
            .header(CONTENT_TYPE, FHIR_JSON)
            .json(resource);
        self.send(&path, request)?;
        Ok(())
    }
}

/// Connects [`HttpDocumentClient`]s sharing one connection pool.
#[derive(Clone, Debug)]
pub struct HttpClientFactory {
    http: Client,
}

impl HttpClientFactory {
    /// # Errors
    ///
    /// Returns [`RemoteError::Transport`] if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self, RemoteError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self { http })
    }

    pub fn http(&self) -> &Client {
        &self.http
    }
}

impl DocumentClientFactory for HttpClientFactory {
    fn connect(
        &self,
        capability: &RemoteCapability,
    ) -> Result<Box<dyn DocumentClient>, RemoteError> {
        Ok(Box::new(HttpDocumentClient::new(
            self.http.clone(),
            capability,
        )))
    }
}

/// The organisation's own document server, partitioned per customer at `{base}/{customer_id}`.
#[derive(Clone, Debug)]
pub struct HttpTenantStore {
    http: Client,
    base_url: String,
    multi_tenant: bool,
}

impl HttpTenantStore {
    pub fn new(http: Client, base_url: &str, multi_tenant: bool) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_owned(),
            multi_tenant,
        }
    }

    fn tenant_base_url(&self, customer_id: &str) -> Result<String, RemoteError> {
        if !self.multi_tenant {
            return Ok(self.base_url.clone());
        }
        if customer_id.is_empty() || customer_id.contains(['/', '?', '#']) {
            return Err(RemoteError::InvalidRequest(format!(
                "invalid tenant '{customer_id}'"
            )));
        }
        Ok(format!("{}/{}", self.base_url, customer_id))
    }
}

impl TenantStore for HttpTenantStore {
    fn tenant(&self, customer_id: &str) -> Result<Box<dyn DocumentClient>, RemoteError> {
        let base_url = self.tenant_base_url(customer_id)?;
        Ok(Box::new(HttpDocumentClient::local(self.http.clone(), &base_url)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenants_are_served_below_the_base_url() {
        let http = Client::new();
        let store = HttpTenantStore::new(http.clone(), "http://fhir.local/fhir/", true);
        assert_eq!(
            store.tenant_base_url("7").unwrap(),
            "http://fhir.local/fhir/7"
        );
        assert!(store.tenant_base_url("").is_err());
        assert!(store.tenant_base_url("7/Task").is_err());

        let shared = HttpTenantStore::new(http, "http://fhir.local/fhir", false);
        assert_eq!(shared.tenant_base_url("7").unwrap(), "http://fhir.local/fhir");
    }
}
