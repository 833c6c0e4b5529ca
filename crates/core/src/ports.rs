//! Collaborator ports on the identity network.
//!
//! The core depends on these traits only; [`crate::nuts`] provides the HTTP implementations.

use crate::authorization::AuthorizationCredential;
use crate::error::NodeError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A care organisation on the network.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub did: String,
    pub name: String,
    pub city: String,
}

/// A local tenant of this system.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: String,
    pub name: String,
    /// Absent until an organisation credential has been issued for the customer.
    #[serde(default)]
    pub did: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub active: bool,
}

pub trait OrganizationRegistry: Send + Sync {
    fn get(&self, did: &str) -> Result<Organization, NodeError>;

    /// URL of `endpoint_type` within the organisation's compound service `service`.
    fn compound_service_endpoint(
        &self,
        did: &str,
        service: &str,
        endpoint_type: &str,
    ) -> Result<String, NodeError>;
}

pub trait CredentialRegistry: Send + Sync {
    /// Authorization credentials issued to `subject` for `service` covering `resource_path`,
    /// as raw verifiable credentials.
    fn find_authorization_credentials(
        &self,
        service: &str,
        subject: &str,
        resource_path: &str,
    ) -> Result<Vec<Value>, NodeError>;

    fn resolve_credential(&self, id: &str) -> Result<Value, NodeError>;
}

/// Parameters of an access token request.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AccessTokenRequest {
    /// The local actor.
    pub requester: String,
    /// The custodian of the resources.
    pub authorizer: String,
    pub service: String,
    pub credentials: Vec<AuthorizationCredential>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct AccessToken {
    pub access_token: String,
}

/// Claims of an introspected inbound access token.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntrospectedToken {
    #[serde(default)]
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    /// User session, present when the token was issued with a user contract.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usi: Option<String>,
    /// Ids of the authorization credentials bound to the token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vcs: Option<Vec<String>>,
}

pub trait AccessTokenService: Send + Sync {
    fn request_access_token(&self, request: &AccessTokenRequest) -> Result<AccessToken, NodeError>;

    fn introspect(&self, token: &str) -> Result<IntrospectedToken, NodeError>;
}
