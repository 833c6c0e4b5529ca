//! Core runtime configuration.
//!
//! Configuration is resolved once at process startup and then passed into core services.
//! Environment variables are read by the binaries only, never during request handling.

use crate::constants::{
    DEFAULT_HTTP_TIMEOUT_SECS, INCOMING_TRANSFERS_DIR_NAME, OUTGOING_TRANSFERS_DIR_NAME,
};
use crate::error::{TransferError, TransferResult};
use eoverdracht_types::NonEmptyText;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Core configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    data_dir: PathBuf,
    customers_file: PathBuf,
    nuts_node_address: String,
    local_fhir_url: String,
    fhir_proxy_path: String,
    service_name: NonEmptyText,
    http_timeout: Duration,
    multi_tenancy: bool,
}

impl CoreConfig {
    /// Create a new `CoreConfig`.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::InvalidInput`] if an address is not an absolute `http(s)` URL,
    /// the proxy path does not start with `/`, or the service name is blank.
    pub fn new(
        data_dir: PathBuf,
        customers_file: PathBuf,
        nuts_node_address: String,
        local_fhir_url: String,
        fhir_proxy_path: String,
        service_name: String,
    ) -> TransferResult<Self> {
        let nuts_node_address = normalise_base_url("nuts_node_address", &nuts_node_address)?;
        let local_fhir_url = normalise_base_url("local_fhir_url", &local_fhir_url)?;

        if !fhir_proxy_path.starts_with('/') {
            return Err(TransferError::InvalidInput(format!(
                "fhir_proxy_path must start with '/', got '{fhir_proxy_path}'"
            )));
        }
        let fhir_proxy_path = match fhir_proxy_path.trim_end_matches('/') {
            "" => "/".to_owned(),
            trimmed => trimmed.to_owned(),
        };

        let service_name = NonEmptyText::new(&service_name)
            .map_err(|_| TransferError::InvalidInput("service_name cannot be empty".into()))?;

        Ok(Self {
            data_dir,
            customers_file,
            nuts_node_address,
            local_fhir_url,
            fhir_proxy_path,
            service_name,
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
            multi_tenancy: true,
        })
    }

    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    /// When disabled, every customer is served from `local_fhir_url` itself instead of
    /// `{local_fhir_url}/{customer_id}`.
    pub fn with_multi_tenancy(mut self, enabled: bool) -> Self {
        self.multi_tenancy = enabled;
        self
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn incoming_transfers_dir(&self) -> PathBuf {
        self.data_dir.join(INCOMING_TRANSFERS_DIR_NAME)
    }

    pub fn outgoing_transfers_dir(&self) -> PathBuf {
        self.data_dir.join(OUTGOING_TRANSFERS_DIR_NAME)
    }

    pub fn customers_file(&self) -> &Path {
        &self.customers_file
    }

    pub fn nuts_node_address(&self) -> &str {
        &self.nuts_node_address
    }

    pub fn local_fhir_url(&self) -> &str {
        &self.local_fhir_url
    }

    pub fn fhir_proxy_path(&self) -> &str {
        &self.fhir_proxy_path
    }

    /// Service name inbound capability tokens must declare.
    pub fn service_name(&self) -> &str {
        self.service_name.as_str()
    }

    pub fn http_timeout(&self) -> Duration {
        self.http_timeout
    }

    /// Whether the local document server is partitioned per customer.
    pub fn multi_tenancy(&self) -> bool {
        self.multi_tenancy
    }
}

fn normalise_base_url(name: &str, value: &str) -> TransferResult<String> {
    let trimmed = value.trim().trim_end_matches('/');
    let has_scheme = trimmed.starts_with("http://") || trimmed.starts_with("https://");
    let has_host = trimmed.split_once("://").is_some_and(|(_, rest)| !rest.is_empty());
    if !has_scheme || !has_host {
        return Err(TransferError::InvalidInput(format!(
            "{name} must be an http(s) URL, got '{value}'"
        )));
    }
    Ok(trimmed.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::SENDER_SERVICE_NAME;

    fn config(nuts: &str, fhir: &str, proxy: &str, service: &str) -> TransferResult<CoreConfig> {
        CoreConfig::new(
            PathBuf::from("/data"),
            PathBuf::from("/data/customers.json"),
            nuts.into(),
            fhir.into(),
            proxy.into(),
            service.into(),
        )
    }

    #[test]
    fn normalises_urls_and_proxy_path() {
        let cfg = config(
            "http://localhost:1323/",
            "https://fhir.local/fhir/",
            "/fhir/",
            SENDER_SERVICE_NAME,
        )
        .unwrap();

        assert_eq!(cfg.nuts_node_address(), "http://localhost:1323");
        assert_eq!(cfg.local_fhir_url(), "https://fhir.local/fhir");
        assert_eq!(cfg.fhir_proxy_path(), "/fhir");
        assert_eq!(cfg.service_name(), SENDER_SERVICE_NAME);
        assert_eq!(
            cfg.incoming_transfers_dir(),
            PathBuf::from("/data/incoming_transfers")
        );
        assert_eq!(
            cfg.outgoing_transfers_dir(),
            PathBuf::from("/data/outgoing_transfers")
        );
        assert!(cfg.multi_tenancy());
        assert!(!cfg.with_multi_tenancy(false).multi_tenancy());
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(config("localhost:1323", "http://f", "/fhir", "s").is_err());
        assert!(config("http://", "http://f", "/fhir", "s").is_err());
        assert!(config("http://n", "http://f", "fhir", "s").is_err());
        assert!(matches!(
            config("http://n", "http://f", "/fhir", "   "),
            Err(TransferError::InvalidInput(_))
        ));
    }
}
