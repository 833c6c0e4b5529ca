//! Receiver-side transfer negotiation.
//!
//! [`TransferService`] keeps the local negotiation record of a Task owned by another
//! organisation in line with that Task. Status changes run through
//! [`validate_transition`](crate::transition::validate_transition) before anything is written.
//!
//! Two writes are not transactional with each other and surface as their own errors:
//!
//! - reaching `completed` persists the status first and then materialises the handoff patient
//!   locally; a failure of the latter is a [`TransferError::Completion`];
//! - changing the remote Task writes remotely first and then mirrors locally; a failure of the
//!   latter is a [`TransferError::ReconciliationGap`].

use crate::assembler::{assemble_advance_notice, assemble_nursing_handoff, fetch};
use crate::authorization::AuthorizationGateway;
use crate::error::{TransferError, TransferResult};
use crate::ports::{Organization, OrganizationRegistry};
use crate::remote::{DocumentClient, DocumentClientFactory, TenantStore};
use crate::repositories::{CustomerRepository, IncomingTransfer, IncomingTransferRepository};
use crate::transition::validate_transition;
use chrono::NaiveDate;
use eoverdracht_types::Did;
use eoverdracht_uuid::RecordId;
use fhir::codes;
use fhir::{FhirError, NegotiationStatus, Resource, ResourceRef, ResourceType, Task, TransferProperties};
use serde::Serialize;
use std::sync::Arc;

/// The receiver's view of a transfer proposal.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    pub sender: Organization,
    pub status: NegotiationStatus,
    pub advance_notice: TransferProperties,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nursing_handoff: Option<TransferProperties>,
}

pub struct TransferService {
    transfers: Arc<dyn IncomingTransferRepository>,
    customers: Arc<dyn CustomerRepository>,
    gateway: AuthorizationGateway,
    organizations: Arc<dyn OrganizationRegistry>,
    clients: Arc<dyn DocumentClientFactory>,
    local_stores: Arc<dyn TenantStore>,
}

impl TransferService {
    pub fn new(
        transfers: Arc<dyn IncomingTransferRepository>,
        customers: Arc<dyn CustomerRepository>,
        gateway: AuthorizationGateway,
        organizations: Arc<dyn OrganizationRegistry>,
        clients: Arc<dyn DocumentClientFactory>,
        local_stores: Arc<dyn TenantStore>,
    ) -> Self {
        Self {
            transfers,
            customers,
            gateway,
            organizations,
            clients,
            local_stores,
        }
    }

    /// Record a status notification from the sender of `task_id`.
    ///
    /// The first notification creates the record at whatever status it carries. A repeated
    /// notification with the current status returns the record without writing. A proposed
    /// `transfer_date` is recorded with the status it arrives with.
    ///
    /// # Errors
    ///
    /// - [`TransferError::InvalidTransition`] if the change is not allowed; nothing is written.
    /// - [`TransferError::InvalidInput`] for a malformed sender DID, or a sender that differs from
    ///   the one the negotiation was opened with.
    /// - [`TransferError::Completion`] if the status reached `completed` and was persisted, but
    ///   the handoff patient could not be stored locally.
    pub fn create_or_update(
        &self,
        status: NegotiationStatus,
        customer_id: &str,
        customer_did: &str,
        sender_did: &str,
        task_id: &str,
        transfer_date: Option<NaiveDate>,
    ) -> TransferResult<IncomingTransfer> {
        let sender = Did::parse(sender_did)
            .map_err(|err| TransferError::InvalidInput(format!("sender DID: {err}")))?;

        if let Some(existing) = self.transfers.find_by_task_id(customer_id, task_id)? {
            if existing.sender_did != sender.as_str() {
                return Err(TransferError::InvalidInput(format!(
                    "task {task_id} is negotiated with {}, not {sender}",
                    existing.sender_did
                )));
            }
            if existing.status == status {
                tracing::debug!("task {} already {}, nothing to update", task_id, status);
                return Ok(existing);
            }
            validate_transition(existing.status, status)?;
        }

        let transfer = self.transfers.create_or_update(
            status,
            customer_id,
            sender.as_str(),
            task_id,
            transfer_date,
        )?;
        tracing::info!(
            "incoming transfer {} for task {} is now {}",
            transfer.id,
            task_id,
            status
        );

        if status == NegotiationStatus::Completed {
            self.complete_transfer(&transfer, customer_did)
                .map_err(|source| TransferError::Completion {
                    task_id: task_id.to_owned(),
                    source: Box::new(source),
                })?;
        }
        Ok(transfer)
    }

    /// Fetch the handoff patient from the sender and store it with the customer's resources.
    fn complete_transfer(
        &self,
        transfer: &IncomingTransfer,
        customer_did: &str,
    ) -> TransferResult<()> {
        let task_ref = ResourceRef::new(ResourceType::Task, &transfer.task_id);
        let task_path = task_ref.path();
        let client = self.remote_client(&transfer.sender_did, customer_did, &task_path)?;

        let task = fetch(client.as_ref(), &task_ref, Resource::into_task)?;
        let composition_ref = required_input(&task, &task_path, &codes::NURSING_HANDOFF)?;

        let composition = fetch(client.as_ref(), &composition_ref, Resource::into_composition)?;
        let patient_ref = composition
            .subject_ref()
            .unwrap_or_else(|| Err(FhirError::MissingElement("Composition.subject".into())))
            .map_err(|err| TransferError::malformed(composition_ref.path(), err))?;
        let patient = fetch(client.as_ref(), &patient_ref, Resource::into_patient)?;

        self.local_stores
            .tenant(&transfer.customer_id)
            .and_then(|store| store.create_or_update(&Resource::Patient(patient)))
            .map_err(|err| TransferError::remote(format!("storing {patient_ref} locally"), err))?;
        tracing::info!(
            "stored handoff patient {} of task {} locally",
            patient_ref,
            transfer.task_id
        );
        Ok(())
    }

    /// Change the status of the requester's Task as the customer, then mirror it locally.
    ///
    /// When the remote Task already has `new_status` nothing is written remotely; the local
    /// record is only written if it is missing or differs.
    ///
    /// # Errors
    ///
    /// - [`TransferError::UnknownCustomer`] / [`TransferError::CustomerWithoutDid`].
    /// - [`TransferError::InvalidTransition`] before any remote write.
    /// - [`TransferError::Remote`] if the remote write fails; nothing changed.
    /// - [`TransferError::ReconciliationGap`] if the remote write succeeded but confirming it or
    ///   updating the local record failed. Replaying needs only the local write.
    pub fn update_transfer_request_state(
        &self,
        customer_id: &str,
        requester_did: &str,
        task_id: &str,
        new_status: NegotiationStatus,
    ) -> TransferResult<IncomingTransfer> {
        let customer_did = self.customer_did(customer_id)?;
        let task_ref = ResourceRef::new(ResourceType::Task, task_id);
        let task_path = task_ref.path();
        let client = self.remote_client(requester_did, &customer_did, &task_path)?;

        let mut task = fetch(client.as_ref(), &task_ref, Resource::into_task)?;
        let current = task
            .negotiation_status()
            .map_err(|err| TransferError::malformed(&task_path, err))?;

        if current == new_status {
            return self.mirror(customer_id, requester_did, task_id, current);
        }
        validate_transition(current, new_status)?;

        task.set_negotiation_status(new_status);
        client
            .create_or_update(&Resource::Task(task))
            .map_err(|err| TransferError::remote(format!("updating {task_path}"), err))?;
        tracing::info!("task {} of {} set to {}", task_id, requester_did, new_status);

        let confirmed = fetch(client.as_ref(), &task_ref, Resource::into_task)
            .and_then(|task| {
                task.negotiation_status()
                    .map_err(|err| TransferError::malformed(&task_path, err))
            })
            .map_err(|source| {
                tracing::warn!("could not confirm status of task {}: {}", task_id, source);
                TransferError::ReconciliationGap {
                    task_id: task_id.to_owned(),
                    remote_status: new_status,
                    source: Box::new(source),
                }
            })?;

        self.mirror(customer_id, requester_did, task_id, confirmed)
    }

    /// Bring the local record in line with the remote status.
    fn mirror(
        &self,
        customer_id: &str,
        sender_did: &str,
        task_id: &str,
        remote_status: NegotiationStatus,
    ) -> TransferResult<IncomingTransfer> {
        let gap = |source: TransferError| {
            tracing::warn!(
                "task {} is {} remotely but the local record was not updated: {}",
                task_id,
                remote_status,
                source
            );
            TransferError::ReconciliationGap {
                task_id: task_id.to_owned(),
                remote_status,
                source: Box::new(source),
            }
        };

        match self.transfers.find_by_task_id(customer_id, task_id) {
            Ok(Some(existing)) if existing.status == remote_status => return Ok(existing),
            Ok(_) => {}
            Err(err) => return Err(gap(err.into())),
        }
        self.transfers
            .create_or_update(remote_status, customer_id, sender_did, task_id, None)
            .map_err(|err| gap(err.into()))
    }

    /// Reconstruct the proposal made to the customer by `requester_did`.
    ///
    /// The Task must carry the transfer type code and an advance notice input. The nursing
    /// handoff is included once the sender has attached it.
    pub fn get_transfer_request(
        &self,
        customer_id: &str,
        requester_did: &str,
        task_id: &str,
    ) -> TransferResult<TransferRequest> {
        let customer_did = self.customer_did(customer_id)?;
        let task_ref = ResourceRef::new(ResourceType::Task, task_id);
        let task_path = task_ref.path();
        let client = self.remote_client(requester_did, &customer_did, &task_path)?;

        let task = fetch(client.as_ref(), &task_ref, Resource::into_task)?;
        if !task.is_transfer() {
            return Err(TransferError::malformed(
                &task_path,
                FhirError::InvalidInput(format!(
                    "Task.code does not carry the transfer type {}",
                    codes::TRANSFER_TYPE.code
                )),
            ));
        }
        let status = task
            .negotiation_status()
            .map_err(|err| TransferError::malformed(&task_path, err))?;

        let notice_ref = required_input(&task, &task_path, &codes::ADVANCE_NOTICE)?;
        let advance_notice = assemble_advance_notice(client.as_ref(), &notice_ref)?
            .to_transfer_properties()
            .map_err(|err| TransferError::malformed(notice_ref.path(), err))?;

        let nursing_handoff = match task.input_reference(&codes::NURSING_HANDOFF) {
            None => None,
            Some(reference) => {
                let handoff_ref =
                    reference.map_err(|err| TransferError::malformed(&task_path, err))?;
                let properties = assemble_nursing_handoff(client.as_ref(), &handoff_ref)?
                    .to_transfer_properties()
                    .map_err(|err| TransferError::malformed(handoff_ref.path(), err))?;
                Some(properties)
            }
        };

        let sender = self.organizations.get(requester_did).map_err(|err| {
            TransferError::node(format!("resolving organization {requester_did}"), err)
        })?;

        Ok(TransferRequest {
            sender,
            status,
            advance_notice,
            nursing_handoff,
        })
    }

    pub fn find_incoming_transfer(
        &self,
        customer_id: &str,
        id: &RecordId,
    ) -> TransferResult<Option<IncomingTransfer>> {
        Ok(self.transfers.find_by_id(customer_id, id)?)
    }

    /// The DID a customer acts under on the network.
    ///
    /// # Errors
    ///
    /// [`TransferError::UnknownCustomer`] or [`TransferError::CustomerWithoutDid`].
    pub fn customer_did(&self, customer_id: &str) -> TransferResult<String> {
        let customer = self
            .customers
            .find_by_id(customer_id)?
            .ok_or_else(|| TransferError::UnknownCustomer(customer_id.to_owned()))?;
        customer
            .did
            .ok_or_else(|| TransferError::CustomerWithoutDid(customer_id.to_owned()))
    }

    fn remote_client(
        &self,
        custodian_did: &str,
        local_actor_did: &str,
        resource_path: &str,
    ) -> TransferResult<Box<dyn DocumentClient>> {
        let capability =
            self.gateway
                .remote_capability(custodian_did, local_actor_did, resource_path)?;
        self.clients.connect(&capability).map_err(|err| {
            TransferError::remote(format!("connecting to {}", capability.base_url()), err)
        })
    }
}

/// The reference of the Task input typed with `definition`, which must be present.
fn required_input(
    task: &Task,
    task_path: &str,
    definition: &codes::CodeDefinition,
) -> TransferResult<ResourceRef> {
    task.input_reference(definition)
        .unwrap_or_else(|| {
            Err(FhirError::MissingElement(format!(
                "Task.input of type {}|{}",
                definition.system, definition.code
            )))
        })
        .map_err(|err| TransferError::malformed(task_path, err))
}
