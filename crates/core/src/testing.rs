//! In-memory fakes of the collaborator ports, shared by the unit tests.

use crate::constants::AUTHORIZATION_CREDENTIAL_TYPE;
use crate::error::{NodeError, RepositoryError, TransferError, TransferResult};
use crate::notification::{TransferNotification, TransferNotifier};
use crate::ports::{
    AccessToken, AccessTokenRequest, AccessTokenService, CredentialRegistry, IntrospectedToken,
    Organization, OrganizationRegistry,
};
use crate::repositories::{IncomingTransfer, IncomingTransferRepository};
use chrono::{NaiveDate, Utc};
use eoverdracht_uuid::RecordId;
use fhir::NegotiationStatus;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// One resource entry of an authorization credential subject.
pub fn grant(path: &str, operations: &[&str], user_context: bool) -> Value {
    json!({"path": path, "operations": operations, "userContext": user_context})
}

pub fn authorization_credential(resources: Vec<Value>) -> Value {
    json!({
        "id": "did:nuts:sender#credential",
        "type": ["VerifiableCredential", AUTHORIZATION_CREDENTIAL_TYPE],
        "issuer": "did:nuts:sender",
        "credentialSubject": {
            "id": "did:nuts:receiver",
            "purposeOfUse": "eOverdracht-sender",
            "resources": resources
        }
    })
}

#[derive(Default)]
struct NodeState {
    endpoints: HashMap<String, String>,
    organizations: HashMap<String, Organization>,
    credentials: HashMap<String, Value>,
    search_results: Vec<Value>,
    token_requests: Vec<AccessTokenRequest>,
    tokens: HashMap<String, IntrospectedToken>,
}

/// Plays the organisation registry, credential registry and token service of an identity node.
#[derive(Default)]
pub struct FakeNode {
    state: Mutex<NodeState>,
}

impl FakeNode {
    fn lock(&self) -> MutexGuard<'_, NodeState> {
        self.state.lock().unwrap()
    }

    pub fn set_endpoint(&self, did: &str, url: &str) {
        self.lock().endpoints.insert(did.into(), url.into());
    }

    pub fn add_organization(&self, did: &str, name: &str, city: &str) {
        self.lock().organizations.insert(
            did.into(),
            Organization {
                did: did.into(),
                name: name.into(),
                city: city.into(),
            },
        );
    }

    pub fn add_credential(&self, id: &str, credential: Value) {
        self.lock().credentials.insert(id.into(), credential);
    }

    pub fn add_search_result(&self, credential: Value) {
        self.lock().search_results.push(credential);
    }

    pub fn add_token(&self, token: &str, introspected: IntrospectedToken) {
        self.lock().tokens.insert(token.into(), introspected);
    }

    pub fn token_requests(&self) -> Vec<AccessTokenRequest> {
        self.lock().token_requests.clone()
    }
}

impl OrganizationRegistry for FakeNode {
    fn get(&self, did: &str) -> Result<Organization, NodeError> {
        self.lock()
            .organizations
            .get(did)
            .cloned()
            .ok_or_else(|| NodeError::NotFound(did.into()))
    }

    fn compound_service_endpoint(
        &self,
        did: &str,
        _service: &str,
        _endpoint_type: &str,
    ) -> Result<String, NodeError> {
        self.lock()
            .endpoints
            .get(did)
            .cloned()
            .ok_or_else(|| NodeError::NotFound(did.into()))
    }
}

impl CredentialRegistry for FakeNode {
    fn find_authorization_credentials(
        &self,
        _service: &str,
        _subject: &str,
        _resource_path: &str,
    ) -> Result<Vec<Value>, NodeError> {
        Ok(self.lock().search_results.clone())
    }

    fn resolve_credential(&self, id: &str) -> Result<Value, NodeError> {
        self.lock()
            .credentials
            .get(id)
            .cloned()
            .ok_or_else(|| NodeError::NotFound(id.into()))
    }
}

impl AccessTokenService for FakeNode {
    fn request_access_token(&self, request: &AccessTokenRequest) -> Result<AccessToken, NodeError> {
        self.lock().token_requests.push(request.clone());
        Ok(AccessToken {
            access_token: format!("token-for-{}", request.requester),
        })
    }

    fn introspect(&self, token: &str) -> Result<IntrospectedToken, NodeError> {
        Ok(self.lock().tokens.get(token).cloned().unwrap_or_default())
    }
}

#[derive(Default)]
struct TransferState {
    records: HashMap<RecordId, IncomingTransfer>,
    writes: usize,
    fail_writes: bool,
}

/// Incoming-transfer repository that counts writes and can be made to fail them.
#[derive(Default)]
pub struct MemoryTransferRepository {
    state: Mutex<TransferState>,
}

impl MemoryTransferRepository {
    fn lock(&self) -> MutexGuard<'_, TransferState> {
        self.state.lock().unwrap()
    }

    pub fn writes(&self) -> usize {
        self.lock().writes
    }

    pub fn fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    pub fn status_of(&self, customer_id: &str, task_id: &str) -> Option<NegotiationStatus> {
        self.lock()
            .records
            .get(&IncomingTransfer::id_for(customer_id, task_id))
            .map(|transfer| transfer.status)
    }
}

impl IncomingTransferRepository for MemoryTransferRepository {
    fn find_by_task_id(
        &self,
        customer_id: &str,
        task_id: &str,
    ) -> Result<Option<IncomingTransfer>, RepositoryError> {
        Ok(self
            .lock()
            .records
            .get(&IncomingTransfer::id_for(customer_id, task_id))
            .cloned())
    }

    fn create_or_update(
        &self,
        status: NegotiationStatus,
        customer_id: &str,
        sender_did: &str,
        task_id: &str,
        transfer_date: Option<NaiveDate>,
    ) -> Result<IncomingTransfer, RepositoryError> {
        let mut state = self.lock();
        if state.fail_writes {
            return Err(RepositoryError::Unavailable("writes disabled".into()));
        }
        state.writes += 1;

        let id = IncomingTransfer::id_for(customer_id, task_id);
        let now = Utc::now();
        let existing = state.records.get(&id);
        let created_at = existing.map_or(now, |t| t.created_at);
        let transfer_date = transfer_date.or_else(|| existing.and_then(|t| t.transfer_date));
        let transfer = IncomingTransfer {
            id,
            task_id: task_id.into(),
            customer_id: customer_id.into(),
            sender_did: sender_did.into(),
            status,
            transfer_date,
            created_at,
            updated_at: now,
        };
        state.records.insert(id, transfer.clone());
        Ok(transfer)
    }

    fn find_by_id(
        &self,
        customer_id: &str,
        id: &RecordId,
    ) -> Result<Option<IncomingTransfer>, RepositoryError> {
        Ok(self
            .lock()
            .records
            .get(id)
            .filter(|transfer| transfer.customer_id == customer_id)
            .cloned())
    }
}

#[derive(Default)]
struct NotifierState {
    sent: Vec<TransferNotification>,
    unreachable: bool,
}

/// Notifier that records what it delivered and can play an unreachable receiver.
#[derive(Default)]
pub struct RecordingNotifier {
    state: Mutex<NotifierState>,
}

impl RecordingNotifier {
    fn lock(&self) -> MutexGuard<'_, NotifierState> {
        self.state.lock().unwrap()
    }

    pub fn sent(&self) -> Vec<TransferNotification> {
        self.lock().sent.clone()
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.lock().unreachable = unreachable;
    }
}

impl TransferNotifier for RecordingNotifier {
    fn notify(&self, notification: &TransferNotification) -> TransferResult<()> {
        let mut state = self.lock();
        if state.unreachable {
            return Err(TransferError::node(
                "notifying receiver",
                NodeError::NotFound(notification.receiver_did.clone()),
            ));
        }
        state.sent.push(notification.clone());
        Ok(())
    }
}
