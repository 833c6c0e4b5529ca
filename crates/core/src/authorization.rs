//! Capability-scoped access to and from other organisations.
//!
//! Outbound, [`AuthorizationGateway::remote_capability`] obtains a [`RemoteCapability`] for the
//! custodian's document server. Inbound, [`AuthorizationGateway::verify_access`] checks an
//! introspected token against the authorization credentials bound to it.
//!
//! Denials are never defaulted to allow: every path through `verify_access` that does not find
//! a matching rule returns an [`AccessDenied`] naming the rule that failed.

use crate::constants::{AUTHORIZATION_CREDENTIAL_TYPE, FHIR_ENDPOINT_TYPE, SENDER_SERVICE_NAME};
use crate::error::{NodeError, TransferError, TransferResult};
use crate::ports::{
    AccessTokenRequest, AccessTokenService, CredentialRegistry, IntrospectedToken,
    OrganizationRegistry,
};
use crate::remote::RemoteCapability;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

// ============================================================================
// Credentials
// ============================================================================

/// A verifiable credential in the uniform shape used for matching and token requests.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationCredential {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", default, deserialize_with = "one_or_many")]
    pub types: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    #[serde(default)]
    pub credential_subject: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialSubject {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub purpose_of_use: Option<String>,
    #[serde(default)]
    pub resources: Vec<CredentialResource>,
}

/// A resource an authorization credential grants access to.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialResource {
    pub path: String,
    #[serde(default)]
    pub operations: Vec<String>,
    #[serde(default)]
    pub user_context: bool,
}

impl AuthorizationCredential {
    /// Normalise a raw verifiable credential.
    pub fn from_value(raw: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(raw)
    }

    pub fn is_authorization_credential(&self) -> bool {
        self.types.iter().any(|t| t == AUTHORIZATION_CREDENTIAL_TYPE)
    }

    /// The credential subject; for a subject list, the first entry.
    pub fn subject(&self) -> Result<CredentialSubject, serde_json::Error> {
        match &self.credential_subject {
            Value::Array(subjects) => match subjects.first() {
                Some(first) => CredentialSubject::deserialize(first),
                None => Ok(CredentialSubject::default()),
            },
            subject => CredentialSubject::deserialize(subject),
        }
    }
}

fn one_or_many<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(single) => vec![single],
        OneOrMany::Many(many) => many,
    })
}

// ============================================================================
// Routes
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    Read,
    Create,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Read => "read",
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }

    pub fn from_method(method: &str) -> Option<Self> {
        match method.to_ascii_uppercase().as_str() {
            "GET" | "HEAD" => Some(Operation::Read),
            "POST" => Some(Operation::Create),
            "PUT" | "PATCH" => Some(Operation::Update),
            "DELETE" => Some(Operation::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An inbound request on the document server proxy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FhirRoute {
    operation: Operation,
    path: String,
}

impl FhirRoute {
    /// A route with a path relative to the proxy base, e.g. `/Task/123`.
    pub fn new(operation: Operation, path: impl Into<String>) -> Self {
        Self {
            operation,
            path: path.into(),
        }
    }

    /// Parse a request on the proxy mounted at `base_path`.
    ///
    /// The query string is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`AccessDenied::UnsupportedRoute`] for unknown methods or paths outside the
    /// proxy base.
    pub fn parse(method: &str, request_path: &str, base_path: &str) -> Result<Self, AccessDenied> {
        let operation = Operation::from_method(method)
            .ok_or_else(|| AccessDenied::UnsupportedRoute(format!("method {method}")))?;

        let path = request_path
            .split_once('?')
            .map_or(request_path, |(path, _)| path);
        let base = base_path.trim_end_matches('/');
        let relative = path
            .strip_prefix(base)
            .filter(|rest| rest.is_empty() || rest.starts_with('/'))
            .ok_or_else(|| AccessDenied::UnsupportedRoute(format!("path {path}")))?;

        let relative = match relative.trim_end_matches('/') {
            "" => "/",
            trimmed => trimmed,
        };
        Ok(Self::new(operation, relative))
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// The Task search route, `{base}/Task`.
    pub fn is_task_search(&self) -> bool {
        self.path == "/Task"
    }
}

// ============================================================================
// Denials
// ============================================================================

/// Why a single bound credential did not grant access.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MismatchReason {
    Unresolvable(String),
    InvalidFormat(String),
    NotAuthorizationCredential,
    PathNotListed,
    OperationNotAllowed,
    UserContextRequired,
}

impl fmt::Display for MismatchReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MismatchReason::Unresolvable(err) => write!(f, "could not be resolved ({err})"),
            MismatchReason::InvalidFormat(err) => write!(f, "has an invalid format ({err})"),
            MismatchReason::NotAuthorizationCredential => {
                write!(f, "is not a {AUTHORIZATION_CREDENTIAL_TYPE}")
            }
            MismatchReason::PathNotListed => f.write_str("does not list the resource path"),
            MismatchReason::OperationNotAllowed => f.write_str("does not allow the operation"),
            MismatchReason::UserContextRequired => {
                f.write_str("requires user context but the token has no user session")
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CredentialMismatch {
    pub credential_id: String,
    pub reason: MismatchReason,
}

fn summarize(mismatches: &[CredentialMismatch]) -> String {
    mismatches
        .iter()
        .map(|m| format!("{} {}", m.credential_id, m.reason))
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum AccessDenied {
    #[error("access-token is not active")]
    InactiveToken,

    #[error("access-token doesn't contain 'service' claim")]
    MissingServiceClaim,

    #[error("access-token contains incorrect 'service' claim: {found}, must be {expected}")]
    ServiceMismatch { found: String, expected: String },

    #[error("incorrect operation {operation} on {path}, must be read")]
    SearchOperationNotAllowed { operation: Operation, path: String },

    #[error("no NutsAuthorizationCredential in access-token")]
    NoCredentials,

    #[error(
        "no matching NutsAuthorizationCredential for {operation} on {path}: {}",
        summarize(.mismatches)
    )]
    NoMatchingCredential {
        operation: Operation,
        path: String,
        mismatches: Vec<CredentialMismatch>,
    },

    #[error("unsupported route: {0}")]
    UnsupportedRoute(String),
}

// ============================================================================
// Gateway
// ============================================================================

/// Mediates every call between this system and other organisations' document servers.
#[derive(Clone)]
pub struct AuthorizationGateway {
    organizations: Arc<dyn OrganizationRegistry>,
    credentials: Arc<dyn CredentialRegistry>,
    tokens: Arc<dyn AccessTokenService>,
    service_name: String,
}

impl AuthorizationGateway {
    pub fn new(
        organizations: Arc<dyn OrganizationRegistry>,
        credentials: Arc<dyn CredentialRegistry>,
        tokens: Arc<dyn AccessTokenService>,
    ) -> Self {
        Self {
            organizations,
            credentials,
            tokens,
            service_name: SENDER_SERVICE_NAME.to_owned(),
        }
    }

    /// Override the service name inbound tokens must declare.
    pub fn with_service_name(mut self, service_name: impl Into<String>) -> Self {
        self.service_name = service_name.into();
        self
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Obtain a capability for `resource_path` on the custodian's document server, acting as
    /// `local_actor_did`.
    ///
    /// No retries: any resolution or token failure aborts.
    pub fn remote_capability(
        &self,
        custodian_did: &str,
        local_actor_did: &str,
        resource_path: &str,
    ) -> TransferResult<RemoteCapability> {
        let base_url = self
            .organizations
            .compound_service_endpoint(custodian_did, SENDER_SERVICE_NAME, FHIR_ENDPOINT_TYPE)
            .map_err(|err| {
                TransferError::node(
                    format!("resolving {SENDER_SERVICE_NAME} endpoint of {custodian_did}"),
                    err,
                )
            })?;

        let raw_credentials = self
            .credentials
            .find_authorization_credentials(SENDER_SERVICE_NAME, local_actor_did, resource_path)
            .map_err(|err| {
                TransferError::node(
                    format!("searching authorization credentials for {resource_path}"),
                    err,
                )
            })?;

        let credentials = raw_credentials
            .into_iter()
            .map(|raw| {
                AuthorizationCredential::from_value(raw).map_err(|err| {
                    TransferError::node(
                        "normalising authorization credential",
                        NodeError::InvalidResponse(err.to_string()),
                    )
                })
            })
            .collect::<TransferResult<Vec<_>>>()?;

        tracing::debug!(
            "requesting access token for {} on {} ({} credentials)",
            resource_path,
            custodian_did,
            credentials.len()
        );
        let request = AccessTokenRequest {
            requester: local_actor_did.to_owned(),
            authorizer: custodian_did.to_owned(),
            service: SENDER_SERVICE_NAME.to_owned(),
            credentials,
        };
        let token = self.tokens.request_access_token(&request).map_err(|err| {
            TransferError::node(format!("requesting access token from {custodian_did}"), err)
        })?;

        Ok(RemoteCapability::new(base_url, token.access_token))
    }

    /// Introspect a bearer token presented to the proxy.
    pub fn introspect(&self, token: &str) -> TransferResult<IntrospectedToken> {
        self.tokens
            .introspect(token)
            .map_err(|err| TransferError::node("introspecting access token", err))
    }

    /// Check an inbound request against the token's service claim and bound credentials.
    pub fn verify_access(
        &self,
        route: &FhirRoute,
        token: &IntrospectedToken,
    ) -> Result<(), AccessDenied> {
        let outcome = self.check_access(route, token);
        if let Err(denied) = &outcome {
            tracing::warn!(
                "access denied for {} on {}: {}",
                route.operation(),
                route.path(),
                denied
            );
        }
        outcome
    }

    fn check_access(&self, route: &FhirRoute, token: &IntrospectedToken) -> Result<(), AccessDenied> {
        if !token.active {
            return Err(AccessDenied::InactiveToken);
        }

        let service = token.service.as_deref().ok_or(AccessDenied::MissingServiceClaim)?;
        if service != self.service_name {
            return Err(AccessDenied::ServiceMismatch {
                found: service.to_owned(),
                expected: self.service_name.clone(),
            });
        }

        // Task search: read only, query filters optional, no credential needed.
        if route.is_task_search() {
            if route.operation() != Operation::Read {
                return Err(AccessDenied::SearchOperationNotAllowed {
                    operation: route.operation(),
                    path: route.path().to_owned(),
                });
            }
            return Ok(());
        }

        let credential_ids = match token.vcs.as_deref() {
            Some(ids) if !ids.is_empty() => ids,
            _ => return Err(AccessDenied::NoCredentials),
        };

        let has_user = token.usi.is_some();
        let mut mismatches = Vec::new();
        for credential_id in credential_ids {
            match self.match_credential(credential_id, route, has_user) {
                Ok(()) => return Ok(()),
                Err(reason) => mismatches.push(CredentialMismatch {
                    credential_id: credential_id.clone(),
                    reason,
                }),
            }
        }

        Err(AccessDenied::NoMatchingCredential {
            operation: route.operation(),
            path: route.path().to_owned(),
            mismatches,
        })
    }

    fn match_credential(
        &self,
        credential_id: &str,
        route: &FhirRoute,
        has_user: bool,
    ) -> Result<(), MismatchReason> {
        let raw = self
            .credentials
            .resolve_credential(credential_id)
            .map_err(|err| MismatchReason::Unresolvable(err.to_string()))?;
        credential_allows(raw, route, has_user)
    }
}

/// Check one raw verifiable credential against a route.
///
/// `has_user` tells whether the token carries a user session; resources flagged with
/// `userContext` require one.
pub fn credential_allows(raw: Value, route: &FhirRoute, has_user: bool) -> Result<(), MismatchReason> {
    let credential = AuthorizationCredential::from_value(raw)
        .map_err(|err| MismatchReason::InvalidFormat(err.to_string()))?;
    if !credential.is_authorization_credential() {
        return Err(MismatchReason::NotAuthorizationCredential);
    }
    let subject = credential
        .subject()
        .map_err(|err| MismatchReason::InvalidFormat(err.to_string()))?;

    let mut reason = MismatchReason::PathNotListed;
    for resource in subject.resources.iter().filter(|r| r.path == route.path()) {
        if resource.user_context && !has_user {
            reason = MismatchReason::UserContextRequired;
            continue;
        }
        if resource
            .operations
            .iter()
            .any(|operation| operation == route.operation().as_str())
        {
            return Ok(());
        }
        if reason == MismatchReason::PathNotListed {
            reason = MismatchReason::OperationNotAllowed;
        }
    }
    Err(reason)
}
