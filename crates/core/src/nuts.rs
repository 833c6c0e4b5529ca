//! HTTP adapter for the identity node.
//!
//! [`NutsNodeClient`] implements [`OrganizationRegistry`], [`CredentialRegistry`] and
//! [`AccessTokenService`] against the node's internal APIs:
//!
//! - `GET  /internal/didman/v1/did/{did}/compoundservice/{service}/endpoint/{type}`
//! - `POST /internal/vcr/v1/{concept}` (credential search)
//! - `GET  /internal/vcr/v1/vc/{id}`
//! - `POST /internal/auth/v1/request-access-token`
//! - `POST /internal/auth/v1/accesstoken/introspect`
//!
//! Uses a blocking client: construct it outside of any async runtime.

use crate::constants::{AUTHORIZATION_CREDENTIAL_TYPE, ORGANIZATION_CREDENTIAL_TYPE};
use crate::error::NodeError;
use crate::ports::{
    AccessToken, AccessTokenRequest, AccessTokenService, CredentialRegistry, IntrospectedToken,
    Organization, OrganizationRegistry,
};
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

#[derive(Serialize)]
struct SearchRequest<'a> {
    params: Vec<KeyValuePair<'a>>,
}

#[derive(Serialize)]
struct KeyValuePair<'a> {
    key: &'a str,
    value: &'a str,
}

#[derive(Deserialize)]
struct EndpointResponse {
    endpoint: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResolutionResult {
    verifiable_credential: Value,
}

#[derive(Clone, Debug)]
pub struct NutsNodeClient {
    http: Client,
    base_url: Url,
}

impl NutsNodeClient {
    /// # Errors
    ///
    /// Returns [`NodeError::InvalidResponse`] for an unparseable address and
    /// [`NodeError::Transport`] if the HTTP client cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, NodeError> {
        let base_url = Url::parse(base_url)
            .map_err(|err| NodeError::InvalidResponse(format!("node address {base_url}: {err}")))?;
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self { http, base_url })
    }

    /// `segments` are percent-encoded individually, so DIDs and credential ids (which contain
    /// `:` and `#`) stay single path segments.
    fn url(&self, segments: &[&str]) -> Result<Url, NodeError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| NodeError::InvalidResponse(format!("{} cannot be a base", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn send<T: DeserializeOwned>(&self, endpoint: &str, request: RequestBuilder) -> Result<T, NodeError> {
        tracing::debug!("calling node endpoint {}", endpoint);
        let response = request.send()?;
        let response = check_status(endpoint, response)?;
        response
            .json::<T>()
            .map_err(|err| NodeError::InvalidResponse(format!("{endpoint}: {err}")))
    }

    fn search(&self, concept: &str, params: &[(&str, &str)]) -> Result<Vec<Value>, NodeError> {
        let body = SearchRequest {
            params: params
                .iter()
                .map(|(key, value)| KeyValuePair { key, value })
                .collect(),
        };
        let url = self.url(&["internal", "vcr", "v1", concept])?;
        self.send("vcr search", self.http.post(url).json(&body))
    }
}

fn check_status(endpoint: &str, response: Response) -> Result<Response, NodeError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::NOT_FOUND {
        return Err(NodeError::NotFound(endpoint.to_owned()));
    }
    let body = response.text().unwrap_or_default();
    Err(NodeError::Status {
        endpoint: endpoint.to_owned(),
        status: status.as_u16(),
        body,
    })
}

/// Read the organisation a `NutsOrganizationCredential` is about.
pub fn organization_from_credential(credential: &Value) -> Result<Organization, NodeError> {
    let is_organization_credential = match credential.get("type") {
        Some(Value::String(single)) => single == ORGANIZATION_CREDENTIAL_TYPE,
        Some(Value::Array(types)) => types
            .iter()
            .any(|t| t.as_str() == Some(ORGANIZATION_CREDENTIAL_TYPE)),
        _ => false,
    };
    if !is_organization_credential {
        return Err(NodeError::InvalidResponse(format!(
            "credential is not a {ORGANIZATION_CREDENTIAL_TYPE}"
        )));
    }

    let subject = match credential.get("credentialSubject") {
        Some(Value::Array(subjects)) => subjects.first(),
        other => other,
    }
    .ok_or_else(|| NodeError::InvalidResponse("credential has no credentialSubject".into()))?;

    let field = |name: &str| {
        subject
            .pointer(&format!("/organization/{name}"))
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| {
                NodeError::InvalidResponse(format!("credentialSubject.organization.{name} missing"))
            })
    };
    let did = subject
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| NodeError::InvalidResponse("credentialSubject.id missing".into()))?;

    Ok(Organization {
        did: did.to_owned(),
        name: field("name")?,
        city: field("city")?,
    })
}

impl OrganizationRegistry for NutsNodeClient {
    fn get(&self, did: &str) -> Result<Organization, NodeError> {
        let credentials = self.search("organization", &[("subject", did)])?;
        let credential = credentials
            .first()
            .ok_or_else(|| NodeError::NotFound(format!("organization {did}")))?;
        organization_from_credential(credential)
    }

    fn compound_service_endpoint(
        &self,
        did: &str,
        service: &str,
        endpoint_type: &str,
    ) -> Result<String, NodeError> {
        let url = self.url(&[
            "internal",
            "didman",
            "v1",
            "did",
            did,
            "compoundservice",
            service,
            "endpoint",
            endpoint_type,
        ])?;
        let response: EndpointResponse = self.send("compound service endpoint", self.http.get(url))?;
        Ok(response.endpoint)
    }
}

impl CredentialRegistry for NutsNodeClient {
    fn find_authorization_credentials(
        &self,
        service: &str,
        subject: &str,
        resource_path: &str,
    ) -> Result<Vec<Value>, NodeError> {
        self.search(
            AUTHORIZATION_CREDENTIAL_TYPE,
            &[
                ("credentialSubject.id", subject),
                ("credentialSubject.purposeOfUse", service),
                ("credentialSubject.resources.#.path", resource_path),
            ],
        )
    }

    fn resolve_credential(&self, id: &str) -> Result<Value, NodeError> {
        let url = self.url(&["internal", "vcr", "v1", "vc", id])?;
        let result: ResolutionResult = self.send("resolve credential", self.http.get(url))?;
        Ok(result.verifiable_credential)
    }
}

impl AccessTokenService for NutsNodeClient {
    fn request_access_token(&self, request: &AccessTokenRequest) -> Result<AccessToken, NodeError> {
        let url = self.url(&["internal", "auth", "v1", "request-access-token"])?;
        self.send("request access token", self.http.post(url).json(request))
    }

    fn introspect(&self, token: &str) -> Result<IntrospectedToken, NodeError> {
        let url = self.url(&["internal", "auth", "v1", "accesstoken", "introspect"])?;
        self.send(
            "introspect access token",
            self.http.post(url).form(&[("token", token)]),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builds_encoded_endpoint_urls() {
        let client = NutsNodeClient::new("http://node.local:1323/", Duration::from_secs(1)).unwrap();
        let url = client
            .url(&["internal", "vcr", "v1", "vc", "did:nuts:abc#1"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://node.local:1323/internal/vcr/v1/vc/did:nuts:abc%231"
        );

        assert!(NutsNodeClient::new("not a url", Duration::from_secs(1)).is_err());
    }

    #[test]
    fn reads_organization_credentials() {
        let credential = json!({
            "type": ["VerifiableCredential", ORGANIZATION_CREDENTIAL_TYPE],
            "credentialSubject": {
                "id": "did:nuts:oost",
                "organization": {"name": "Ziekenhuis Oost", "city": "Enschede"}
            }
        });
        let organization = organization_from_credential(&credential).unwrap();
        assert_eq!(organization.did, "did:nuts:oost");
        assert_eq!(organization.city, "Enschede");

        let mut wrong_type = credential.clone();
        wrong_type["type"] = json!(AUTHORIZATION_CREDENTIAL_TYPE);
        assert!(organization_from_credential(&wrong_type).is_err());

        let mut no_city = credential;
        no_city["credentialSubject"]["organization"] = json!({"name": "Ziekenhuis Oost"});
        assert!(organization_from_credential(&no_city).is_err());
    }

    #[test]
    fn access_token_request_wire_shape() {
        let request = AccessTokenRequest {
            requester: "did:nuts:receiver".into(),
            authorizer: "did:nuts:sender".into(),
            service: "eOverdracht-sender".into(),
            credentials: Vec::new(),
        };
        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(
            body,
            json!({
                "requester": "did:nuts:receiver",
                "authorizer": "did:nuts:sender",
                "service": "eOverdracht-sender",
                "credentials": []
            })
        );
    }
}
