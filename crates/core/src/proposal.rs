//! Sender-side transfers.
//!
//! A transfer is offered to receiving organisations one negotiation at a time. Each negotiation
//! publishes a proposal on the customer's own document server: the advance notice graph first,
//! then the Task that references it, so a receiver that sees the Task can always resolve its
//! inputs. The receiver answers by changing that Task; the negotiation record follows the Task.
//! Once a negotiation is accepted the transfer can be assigned to it, which attaches the nursing
//! handoff to the same Task.
//!
//! Every status change is announced to the receiver. Announcements are best effort and never
//! undo the change.

use crate::assembler::{assemble_advance_notice, fetch};
use crate::error::{TransferError, TransferResult};
use crate::notification::{notify_best_effort, TransferNotification, TransferNotifier};
use crate::ports::{Organization, OrganizationRegistry};
use crate::remote::{DocumentClient, TenantStore};
use crate::repositories::{
    OutgoingNegotiation, OutgoingTransfer, OutgoingTransferRepository, TransferStatus,
};
use crate::transition::validate_transition;
use chrono::{NaiveDate, Utc};
use eoverdracht_types::Did;
use eoverdracht_uuid::RecordId;
use fhir::codes;
use fhir::{
    AdvanceNotice, Composition, CreateTransferRequest, FhirError, IdGenerator, NegotiationStatus,
    PatientSummary, Reference, Resource, ResourceRef, ResourceType, TaskParameter, TaskProperties,
    TransferBuilder, UuidGenerator,
};
use serde::Serialize;
use std::sync::Arc;

/// What a receiver needs to start negotiating.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedProposal {
    pub task_id: String,
    pub advance_notice: String,
    pub status: NegotiationStatus,
}

/// A negotiation with the receiving organisation it is held with, when that could be resolved.
#[derive(Clone, Debug)]
pub struct ListedNegotiation {
    pub negotiation: OutgoingNegotiation,
    pub organization: Option<Organization>,
}

pub struct ProposalService<G = UuidGenerator> {
    transfers: Arc<dyn OutgoingTransferRepository>,
    organizations: Arc<dyn OrganizationRegistry>,
    local_stores: Arc<dyn TenantStore>,
    notifier: Arc<dyn TransferNotifier>,
    builder: TransferBuilder<G>,
}

impl ProposalService<UuidGenerator> {
    pub fn new(
        transfers: Arc<dyn OutgoingTransferRepository>,
        organizations: Arc<dyn OrganizationRegistry>,
        local_stores: Arc<dyn TenantStore>,
        notifier: Arc<dyn TransferNotifier>,
    ) -> Self {
        Self::with_builder(
            transfers,
            organizations,
            local_stores,
            notifier,
            TransferBuilder::new(),
        )
    }
}

impl<G: IdGenerator> ProposalService<G> {
    pub fn with_builder(
        transfers: Arc<dyn OutgoingTransferRepository>,
        organizations: Arc<dyn OrganizationRegistry>,
        local_stores: Arc<dyn TenantStore>,
        notifier: Arc<dyn TransferNotifier>,
        builder: TransferBuilder<G>,
    ) -> Self {
        Self {
            transfers,
            organizations,
            local_stores,
            notifier,
            builder,
        }
    }

    /// Record a new transfer. Nothing is published until a negotiation is started.
    ///
    /// Of `patient` only the postal code is kept; it is all an advance notice reveals.
    pub fn create_transfer(
        &self,
        customer_id: &str,
        request: &CreateTransferRequest,
        patient: &PatientSummary,
    ) -> TransferResult<OutgoingTransfer> {
        let transfer = self.transfers.create(
            customer_id,
            request.transfer_date,
            request.care_plan.clone(),
            patient.postal_code.clone(),
        )?;
        tracing::info!("created transfer {} for customer {}", transfer.id, customer_id);
        Ok(transfer)
    }

    /// # Errors
    ///
    /// [`TransferError::UnknownTransfer`] if the customer has no transfer `transfer_id`.
    pub fn find_transfer(
        &self,
        customer_id: &str,
        transfer_id: &RecordId,
    ) -> TransferResult<OutgoingTransfer> {
        self.transfers
            .find_by_id(customer_id, transfer_id)?
            .ok_or_else(|| TransferError::UnknownTransfer(transfer_id.to_string()))
    }

    /// Offer an open transfer to `organization_did`.
    ///
    /// `transfer_date` overrides the transfer's date for this offer only. Starting again while
    /// an offer to the same organisation is still running returns that offer and announces it
    /// again.
    ///
    /// # Errors
    ///
    /// - [`TransferError::TransferClosed`] once the transfer is assigned, completed or cancelled.
    /// - [`TransferError::InvalidInput`] for a malformed organisation DID.
    pub fn start_negotiation(
        &self,
        customer_id: &str,
        sender_did: &str,
        transfer_id: &RecordId,
        organization_did: &str,
        transfer_date: Option<NaiveDate>,
    ) -> TransferResult<OutgoingNegotiation> {
        let mut transfer = self.find_transfer(customer_id, transfer_id)?;
        ensure_open(&transfer)?;
        let organization = Did::parse(organization_did)
            .map_err(|err| TransferError::InvalidInput(format!("organization DID: {err}")))?;

        let running = transfer.negotiations.iter().find(|negotiation| {
            negotiation.organization_did == organization.as_str()
                && !negotiation.status.is_terminal()
        });
        if let Some(running) = running {
            tracing::debug!(
                "transfer {} is already offered to {} as task {}",
                transfer.id,
                organization,
                running.task_id
            );
            self.announce(sender_did, running);
            return Ok(running.clone());
        }

        let transfer_date = transfer_date.unwrap_or(transfer.transfer_date);
        let request = CreateTransferRequest {
            transfer_date,
            care_plan: transfer.care_plan.clone(),
        };
        let patient = PatientSummary {
            postal_code: transfer.postal_code.clone(),
            ..PatientSummary::default()
        };
        let published = self.publish(
            customer_id,
            sender_did,
            organization.as_str(),
            &request,
            &patient,
        )?;

        let now = Utc::now();
        let negotiation = OutgoingNegotiation {
            id: RecordId::new(),
            task_id: published.task_id,
            organization_did: organization.as_str().to_owned(),
            transfer_date,
            status: published.status,
            created_at: now,
            updated_at: now,
        };
        transfer.negotiations.push(negotiation.clone());
        transfer.status = TransferStatus::Requested;
        transfer.updated_at = now;
        self.transfers.save(&transfer)?;
        tracing::info!(
            "transfer {} offered to {} as task {}",
            transfer.id,
            organization,
            negotiation.task_id
        );

        self.announce(sender_did, &negotiation);
        Ok(negotiation)
    }

    /// The transfer's negotiations, brought in line with their Tasks first.
    ///
    /// Neither an unreadable Task nor an unresolvable organisation fails the listing; both are
    /// logged and the negotiation is returned as recorded.
    pub fn list_negotiations(
        &self,
        customer_id: &str,
        transfer_id: &RecordId,
    ) -> TransferResult<Vec<ListedNegotiation>> {
        let mut transfer = self.find_transfer(customer_id, transfer_id)?;
        let store = self.tenant(customer_id)?;
        self.sync(store.as_ref(), &mut transfer)?;

        Ok(transfer
            .negotiations
            .into_iter()
            .map(|negotiation| {
                let organization = match self.organizations.get(&negotiation.organization_did) {
                    Ok(organization) => Some(organization),
                    Err(err) => {
                        tracing::warn!(
                            "could not resolve organization {}: {}",
                            negotiation.organization_did,
                            err
                        );
                        None
                    }
                };
                ListedNegotiation {
                    negotiation,
                    organization,
                }
            })
            .collect())
    }

    /// Change the status of one negotiation, on its Task first and then on the record.
    ///
    /// Completing the assigned negotiation completes the transfer.
    ///
    /// # Errors
    ///
    /// - [`TransferError::UnknownNegotiation`] if the transfer has no such negotiation.
    /// - [`TransferError::InvalidTransition`] before anything is written.
    pub fn update_negotiation_status(
        &self,
        customer_id: &str,
        sender_did: &str,
        transfer_id: &RecordId,
        negotiation_id: &RecordId,
        new_status: NegotiationStatus,
    ) -> TransferResult<OutgoingNegotiation> {
        let mut transfer = self.find_transfer(customer_id, transfer_id)?;
        let store = self.tenant(customer_id)?;
        self.sync(store.as_ref(), &mut transfer)?;

        let negotiation = find_negotiation(&transfer, negotiation_id)?;
        if negotiation.status == new_status {
            return Ok(negotiation.clone());
        }
        validate_transition(negotiation.status, new_status)?;
        let task_id = negotiation.task_id.clone();
        self.set_task_status(store.as_ref(), &task_id, new_status)?;

        let negotiation = self.record_status(&mut transfer, negotiation_id, new_status)?;
        self.announce(sender_did, &negotiation);
        Ok(negotiation)
    }

    /// Give the transfer to the organisation of an accepted negotiation.
    ///
    /// The nursing handoff for `patient_id` is attached to the negotiation's Task, which then
    /// moves to `in-progress`.
    ///
    /// # Errors
    ///
    /// - [`TransferError::TransferClosed`] unless the transfer is still open.
    /// - [`TransferError::ProposalNotAccepted`] unless the negotiation is `accepted`.
    pub fn assign(
        &self,
        customer_id: &str,
        sender_did: &str,
        transfer_id: &RecordId,
        negotiation_id: &RecordId,
        patient_id: &str,
    ) -> TransferResult<OutgoingTransfer> {
        let mut transfer = self.find_transfer(customer_id, transfer_id)?;
        ensure_open(&transfer)?;
        let store = self.tenant(customer_id)?;
        self.sync(store.as_ref(), &mut transfer)?;

        let negotiation = find_negotiation(&transfer, negotiation_id)?;
        if negotiation.status != NegotiationStatus::Accepted {
            return Err(TransferError::ProposalNotAccepted {
                task_id: negotiation.task_id.clone(),
                status: negotiation.status,
            });
        }
        let task_id = negotiation.task_id.clone();

        self.attach_nursing_handoff(customer_id, sender_did, &task_id, patient_id)?;
        self.set_task_status(store.as_ref(), &task_id, NegotiationStatus::InProgress)?;

        transfer.status = TransferStatus::Assigned;
        transfer.assigned_negotiation = Some(negotiation_id.clone());
        let negotiation =
            self.record_status(&mut transfer, negotiation_id, NegotiationStatus::InProgress)?;
        tracing::info!(
            "transfer {} assigned to {}",
            transfer.id,
            negotiation.organization_did
        );

        self.announce(sender_did, &negotiation);
        Ok(transfer)
    }

    /// Withdraw the transfer and every negotiation that can still be cancelled.
    ///
    /// Requested and on-hold negotiations end up `cancelled`, each step announced to the
    /// receiver. Accepted and in-progress negotiations keep their status and are logged.
    /// Cancelling a cancelled transfer changes nothing.
    ///
    /// # Errors
    ///
    /// [`TransferError::TransferClosed`] once the transfer is assigned or completed.
    pub fn cancel_transfer(
        &self,
        customer_id: &str,
        sender_did: &str,
        transfer_id: &RecordId,
    ) -> TransferResult<OutgoingTransfer> {
        let mut transfer = self.find_transfer(customer_id, transfer_id)?;
        match transfer.status {
            TransferStatus::Cancelled => return Ok(transfer),
            TransferStatus::Assigned | TransferStatus::Completed => {
                return Err(TransferError::TransferClosed {
                    transfer_id: transfer.id.to_string(),
                    status: transfer.status,
                });
            }
            TransferStatus::Created | TransferStatus::Requested => {}
        }
        let store = self.tenant(customer_id)?;
        self.sync(store.as_ref(), &mut transfer)?;

        let now = Utc::now();
        let mut announcements = Vec::new();
        for negotiation in &mut transfer.negotiations {
            // Only on-hold Tasks can be cancelled; a requested one is put on hold first.
            let steps: &[NegotiationStatus] = match negotiation.status {
                NegotiationStatus::Requested => {
                    &[NegotiationStatus::OnHold, NegotiationStatus::Cancelled]
                }
                NegotiationStatus::OnHold => &[NegotiationStatus::Cancelled],
                status if status.is_terminal() => continue,
                status => {
                    tracing::warn!(
                        "leaving task {} {}: it can no longer be cancelled",
                        negotiation.task_id,
                        status
                    );
                    continue;
                }
            };
            for &step in steps {
                validate_transition(negotiation.status, step)?;
                self.set_task_status(store.as_ref(), &negotiation.task_id, step)?;
                negotiation.status = step;
                negotiation.updated_at = now;
                announcements.push(negotiation.clone());
            }
        }

        transfer.status = TransferStatus::Cancelled;
        transfer.updated_at = now;
        self.transfers.save(&transfer)?;
        tracing::info!("transfer {} cancelled", transfer.id);

        for negotiation in &announcements {
            self.announce(sender_did, negotiation);
        }
        Ok(transfer)
    }

    /// Publish a proposal from `requester_did` to `owner_did` at status `requested`.
    pub fn publish(
        &self,
        customer_id: &str,
        requester_did: &str,
        owner_did: &str,
        request: &CreateTransferRequest,
        patient: &PatientSummary,
    ) -> TransferResult<PublishedProposal> {
        let store = self.tenant(customer_id)?;
        let notice = self.builder.build_advance_notice(request, patient);
        let notice_ref = composition_ref(&notice.composition)?;
        for resource in graph_resources(&notice) {
            store_resource(store.as_ref(), &resource)?;
        }

        let task = self.builder.build_task(TaskProperties {
            id: None,
            status: NegotiationStatus::Requested,
            requester_did: requester_did.to_owned(),
            owner_did: owner_did.to_owned(),
            input: vec![TaskParameter::reference(&codes::ADVANCE_NOTICE, &notice_ref)],
            output: Vec::new(),
        });
        let task_id = task.id.clone().unwrap_or_default();
        store_resource(store.as_ref(), &Resource::Task(task))?;

        tracing::info!(
            "published transfer proposal {} from {} to {}",
            task_id,
            requester_did,
            owner_did
        );
        Ok(PublishedProposal {
            task_id,
            advance_notice: notice_ref.to_string(),
            status: NegotiationStatus::Requested,
        })
    }

    /// Attach the identified nursing handoff for `patient_id` to an accepted Task.
    ///
    /// The handoff takes over the care plan and administrative data of the advance notice. The
    /// Task gains the handoff input (replacing an earlier one) and its `for` patient. Nothing is
    /// written unless the Task was requested by `sender_did` and is `accepted` or `in-progress`.
    ///
    /// # Errors
    ///
    /// - [`TransferError::NotRequester`] if the Task was requested by someone else.
    /// - [`TransferError::ProposalNotAccepted`] for any other status.
    pub fn attach_nursing_handoff(
        &self,
        customer_id: &str,
        sender_did: &str,
        task_id: &str,
        patient_id: &str,
    ) -> TransferResult<Composition> {
        let store = self.tenant(customer_id)?;
        let client = store.as_ref();
        let task_ref = ResourceRef::new(ResourceType::Task, task_id);
        let task_path = task_ref.path();
        let mut task = fetch(client, &task_ref, Resource::into_task)?;

        if task.requester_did() != Some(sender_did) {
            return Err(TransferError::NotRequester {
                task_id: task_id.to_owned(),
                did: sender_did.to_owned(),
            });
        }
        let status = task
            .negotiation_status()
            .map_err(|err| TransferError::malformed(&task_path, err))?;
        if !matches!(
            status,
            NegotiationStatus::Accepted | NegotiationStatus::InProgress
        ) {
            return Err(TransferError::ProposalNotAccepted {
                task_id: task_id.to_owned(),
                status,
            });
        }

        let notice_ref = task
            .input_reference(&codes::ADVANCE_NOTICE)
            .unwrap_or_else(|| {
                Err(FhirError::MissingElement(
                    "Task.input of type advance notice".into(),
                ))
            })
            .map_err(|err| TransferError::malformed(&task_path, err))?;
        let notice = assemble_advance_notice(client, &notice_ref)?;

        let handoff = self
            .builder
            .build_nursing_handoff_composition(patient_id, &notice)
            .map_err(|err| TransferError::malformed(notice_ref.path(), err))?;
        let handoff_ref = composition_ref(&handoff)?;
        store_resource(client, &Resource::Composition(handoff.clone()))?;

        task.input
            .retain(|input| !input.kind.has_code(&codes::NURSING_HANDOFF));
        task.input
            .push(TaskParameter::reference(&codes::NURSING_HANDOFF, &handoff_ref));
        task.for_patient = Some(Reference::to(&ResourceRef::new(
            ResourceType::Patient,
            patient_id,
        )));
        store_resource(client, &Resource::Task(task))?;

        tracing::info!("attached nursing handoff {} to task {}", handoff_ref, task_id);
        Ok(handoff)
    }

    fn tenant(&self, customer_id: &str) -> TransferResult<Box<dyn DocumentClient>> {
        self.local_stores.tenant(customer_id).map_err(|err| {
            TransferError::remote(format!("opening the document store of {customer_id}"), err)
        })
    }

    /// Copy the status of each open negotiation's Task into the record, saving if anything
    /// changed.
    fn sync(
        &self,
        store: &dyn DocumentClient,
        transfer: &mut OutgoingTransfer,
    ) -> TransferResult<()> {
        let now = Utc::now();
        let mut changed = false;
        for negotiation in &mut transfer.negotiations {
            if negotiation.status.is_terminal() {
                continue;
            }
            match task_status(store, &negotiation.task_id) {
                Ok(status) if status != negotiation.status => {
                    tracing::debug!(
                        "task {} moved from {} to {}",
                        negotiation.task_id,
                        negotiation.status,
                        status
                    );
                    negotiation.status = status;
                    negotiation.updated_at = now;
                    changed = true;
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!("could not read task {}: {}", negotiation.task_id, err);
                }
            }
        }
        if complete_if_handed_over(transfer) {
            changed = true;
        }
        if changed {
            transfer.updated_at = now;
            self.transfers.save(transfer)?;
        }
        Ok(())
    }

    fn set_task_status(
        &self,
        store: &dyn DocumentClient,
        task_id: &str,
        status: NegotiationStatus,
    ) -> TransferResult<()> {
        let task_ref = ResourceRef::new(ResourceType::Task, task_id);
        let mut task = fetch(store, &task_ref, Resource::into_task)?;
        task.set_negotiation_status(status);
        store_resource(store, &Resource::Task(task))?;
        tracing::info!("task {} set to {}", task_id, status);
        Ok(())
    }

    /// Set one negotiation's status on the record and save the transfer.
    fn record_status(
        &self,
        transfer: &mut OutgoingTransfer,
        negotiation_id: &RecordId,
        status: NegotiationStatus,
    ) -> TransferResult<OutgoingNegotiation> {
        let now = Utc::now();
        let negotiation = transfer
            .negotiation_mut(negotiation_id)
            .ok_or_else(|| TransferError::UnknownNegotiation(negotiation_id.to_string()))?;
        negotiation.status = status;
        negotiation.updated_at = now;
        let negotiation = negotiation.clone();

        complete_if_handed_over(transfer);
        transfer.updated_at = now;
        self.transfers.save(transfer)?;
        Ok(negotiation)
    }

    fn announce(&self, sender_did: &str, negotiation: &OutgoingNegotiation) {
        let notification = TransferNotification {
            sender_did: sender_did.to_owned(),
            receiver_did: negotiation.organization_did.clone(),
            task_id: negotiation.task_id.clone(),
            status: negotiation.status,
            transfer_date: Some(negotiation.transfer_date),
        };
        notify_best_effort(self.notifier.as_ref(), &notification);
    }
}

fn ensure_open(transfer: &OutgoingTransfer) -> TransferResult<()> {
    if transfer.status.is_open() {
        Ok(())
    } else {
        Err(TransferError::TransferClosed {
            transfer_id: transfer.id.to_string(),
            status: transfer.status,
        })
    }
}

fn find_negotiation<'a>(
    transfer: &'a OutgoingTransfer,
    negotiation_id: &RecordId,
) -> TransferResult<&'a OutgoingNegotiation> {
    transfer
        .negotiation(negotiation_id)
        .ok_or_else(|| TransferError::UnknownNegotiation(negotiation_id.to_string()))
}

/// Mark an assigned transfer completed once its negotiation is. Returns whether it changed.
fn complete_if_handed_over(transfer: &mut OutgoingTransfer) -> bool {
    let handed_over = transfer.status == TransferStatus::Assigned
        && transfer
            .assigned_negotiation
            .as_ref()
            .and_then(|id| transfer.negotiation(id))
            .is_some_and(|negotiation| negotiation.status == NegotiationStatus::Completed);
    if handed_over {
        transfer.status = TransferStatus::Completed;
    }
    handed_over
}

fn task_status(store: &dyn DocumentClient, task_id: &str) -> TransferResult<NegotiationStatus> {
    let task_ref = ResourceRef::new(ResourceType::Task, task_id);
    fetch(store, &task_ref, Resource::into_task)?
        .negotiation_status()
        .map_err(|err| TransferError::malformed(task_ref.path(), err))
}

fn store_resource(store: &dyn DocumentClient, resource: &Resource) -> TransferResult<()> {
    store.create_or_update(resource).map_err(|err| {
        TransferError::remote(format!("publishing {}", resource.resource_type()), err)
    })
}

fn composition_ref(composition: &Composition) -> TransferResult<ResourceRef> {
    composition
        .id
        .as_deref()
        .map(|id| ResourceRef::new(ResourceType::Composition, id))
        .ok_or_else(|| TransferError::InvalidInput("composition has no id".into()))
}

/// Dependencies before the resources referencing them.
fn graph_resources(notice: &AdvanceNotice) -> Vec<Resource> {
    let mut resources: Vec<Resource> = notice.patient.iter().cloned().map(Resource::from).collect();
    resources.extend(notice.problems.iter().cloned().map(Resource::from));
    resources.extend(notice.interventions.iter().cloned().map(Resource::from));
    resources.push(Resource::Composition(notice.composition.clone()));
    resources
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{InMemoryDocumentServer, InMemoryTenantStore};
    use crate::repositories::FileOutgoingTransferRepository;
    use crate::testing::{FakeNode, RecordingNotifier};
    use fhir::{CarePlan, Intervention, PatientProblem, Problem, ProblemStatus};
    use std::cell::Cell;
    use tempfile::TempDir;

    const CUSTOMER: &str = "1";
    const SENDER_DID: &str = "did:nuts:sender";
    const RECEIVER_DID: &str = "did:nuts:receiver";

    struct Sequence(Cell<u32>);

    impl IdGenerator for Sequence {
        fn generate_id(&self) -> String {
            let next = self.0.get() + 1;
            self.0.set(next);
            format!("id-{next}")
        }
    }

    struct Fixture {
        service: ProposalService<Sequence>,
        tenants: Arc<InMemoryTenantStore>,
        notifier: Arc<RecordingNotifier>,
        _dir: TempDir,
    }

    impl Fixture {
        fn server(&self) -> Arc<InMemoryDocumentServer> {
            self.tenants.server(CUSTOMER)
        }

        fn task(&self, task_id: &str) -> fhir::Task {
            let body = self.server().get(&format!("/Task/{task_id}")).unwrap();
            Resource::from_json(body).unwrap().into_task().unwrap()
        }

        /// Act as the receiver changing the Task through the proxy.
        fn receiver_sets(&self, task_id: &str, status: NegotiationStatus) {
            let mut task = self.task(task_id);
            task.set_negotiation_status(status);
            self.server().insert(&Resource::Task(task)).unwrap();
        }

        fn create_transfer(&self) -> OutgoingTransfer {
            let patient = PatientSummary {
                postal_code: Some("7511 JE".into()),
                first_name: Some("Anna".into()),
                ..PatientSummary::default()
            };
            self.service
                .create_transfer(CUSTOMER, &request(), &patient)
                .unwrap()
        }

        fn offer(&self, transfer: &OutgoingTransfer) -> OutgoingNegotiation {
            self.service
                .start_negotiation(CUSTOMER, SENDER_DID, &transfer.id, RECEIVER_DID, None)
                .unwrap()
        }
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().expect("tempdir");
        let node = Arc::new(FakeNode::default());
        node.add_organization(RECEIVER_DID, "Verpleeghuis De Nootjes", "Enschede");
        let tenants = Arc::new(InMemoryTenantStore::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let service = ProposalService::with_builder(
            Arc::new(FileOutgoingTransferRepository::with_root(dir.path())),
            node,
            tenants.clone(),
            notifier.clone(),
            TransferBuilder::with_id_generator(Sequence(Cell::new(0))),
        );
        Fixture {
            service,
            tenants,
            notifier,
            _dir: dir,
        }
    }

    fn request() -> CreateTransferRequest {
        CreateTransferRequest {
            transfer_date: NaiveDate::from_ymd_opt(2026, 12, 1).unwrap(),
            care_plan: CarePlan {
                patient_problems: vec![PatientProblem {
                    problem: Problem {
                        name: "Valrisico".into(),
                        status: ProblemStatus::Active,
                    },
                    interventions: vec![
                        Intervention {
                            comment: "Rollator binnen handbereik".into(),
                        },
                        Intervention {
                            comment: "  ".into(),
                        },
                    ],
                }],
            },
        }
    }

    fn publish(f: &Fixture) -> PublishedProposal {
        f.service
            .publish(
                CUSTOMER,
                SENDER_DID,
                RECEIVER_DID,
                &request(),
                &PatientSummary::default(),
            )
            .unwrap()
    }

    #[test]
    fn publishes_dependencies_before_the_task() {
        let f = fixture();
        let proposal = publish(&f);

        let writes = f.server().writes();
        assert_eq!(writes.last(), Some(&format!("/Task/{}", proposal.task_id)));
        assert!(writes.contains(&format!("/{}", proposal.advance_notice)));
        // Patient stub, one problem, one intervention (blank comment skipped), composition, task.
        assert_eq!(writes.len(), 5);

        let task = f.server().get(&format!("/Task/{}", proposal.task_id)).unwrap();
        assert_eq!(task["status"], "requested");
        assert!(task.get("for").is_none());
        assert!(f.tenants.server("2").is_empty());
    }

    #[test]
    fn attaching_the_handoff_updates_an_accepted_task() {
        let f = fixture();
        let proposal = publish(&f);
        f.receiver_sets(&proposal.task_id, NegotiationStatus::Accepted);

        let handoff = f
            .service
            .attach_nursing_handoff(CUSTOMER, SENDER_DID, &proposal.task_id, "patient-7")
            .unwrap();
        assert!(handoff.kind.has_code(&codes::NURSING_HANDOFF));

        // Attaching again replaces the input instead of adding one.
        f.service
            .attach_nursing_handoff(CUSTOMER, SENDER_DID, &proposal.task_id, "patient-7")
            .unwrap();

        let task = f.task(&proposal.task_id);
        assert_eq!(task.input.len(), 2);
        assert_eq!(
            task.for_patient.and_then(|r| r.reference).as_deref(),
            Some("Patient/patient-7")
        );
    }

    #[test]
    fn attaching_before_acceptance_writes_nothing() {
        let f = fixture();
        let proposal = publish(&f);
        let writes = f.server().writes().len();

        let err = f
            .service
            .attach_nursing_handoff(CUSTOMER, SENDER_DID, &proposal.task_id, "patient-7")
            .expect_err("still requested");

        assert!(matches!(
            err,
            TransferError::ProposalNotAccepted {
                status: NegotiationStatus::Requested,
                ..
            }
        ));
        assert!(f.task(&proposal.task_id).for_patient.is_none());
        assert_eq!(f.server().writes().len(), writes);
    }

    #[test]
    fn only_the_requester_attaches_the_handoff() {
        let f = fixture();
        let proposal = publish(&f);
        f.receiver_sets(&proposal.task_id, NegotiationStatus::Accepted);

        let err = f
            .service
            .attach_nursing_handoff(CUSTOMER, "did:nuts:other", &proposal.task_id, "patient-7")
            .expect_err("other requester");
        assert!(matches!(err, TransferError::NotRequester { .. }));
        assert!(f.task(&proposal.task_id).for_patient.is_none());

        // Another customer's store does not hold the Task at all.
        let err = f
            .service
            .attach_nursing_handoff("2", SENDER_DID, &proposal.task_id, "patient-7")
            .expect_err("other tenant");
        assert!(matches!(err, TransferError::Remote { .. }));
    }

    #[test]
    fn attaching_to_an_unknown_task_fails() {
        let f = fixture();
        let err = f
            .service
            .attach_nursing_handoff(CUSTOMER, SENDER_DID, "missing", "patient-7")
            .expect_err("no task");
        assert!(matches!(err, TransferError::Remote { .. }));
    }

    #[test]
    fn starting_a_negotiation_publishes_and_announces() {
        let f = fixture();
        let transfer = f.create_transfer();
        assert_eq!(transfer.status, TransferStatus::Created);
        assert_eq!(transfer.postal_code.as_deref(), Some("7511 JE"));

        let date = NaiveDate::from_ymd_opt(2026, 12, 3).unwrap();
        let negotiation = f
            .service
            .start_negotiation(CUSTOMER, SENDER_DID, &transfer.id, RECEIVER_DID, Some(date))
            .unwrap();
        assert_eq!(negotiation.status, NegotiationStatus::Requested);
        assert_eq!(negotiation.transfer_date, date);

        let task = f.task(&negotiation.task_id);
        assert_eq!(task.owner_did(), Some(RECEIVER_DID));
        assert_eq!(task.requester_did(), Some(SENDER_DID));

        let stored = f.service.find_transfer(CUSTOMER, &transfer.id).unwrap();
        assert_eq!(stored.status, TransferStatus::Requested);
        assert_eq!(stored.negotiations, vec![negotiation.clone()]);

        let sent = f.notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].receiver_did, RECEIVER_DID);
        assert_eq!(sent[0].task_id, negotiation.task_id);
        assert_eq!(sent[0].transfer_date, Some(date));

        // Offering again to the same organisation reuses the running negotiation.
        let again = f.offer(&transfer);
        assert_eq!(again.id, negotiation.id);
        assert_eq!(f.notifier.sent().len(), 2);
        let stored = f.service.find_transfer(CUSTOMER, &transfer.id).unwrap();
        assert_eq!(stored.negotiations.len(), 1);
    }

    #[test]
    fn unreachable_receivers_do_not_fail_the_negotiation() {
        let f = fixture();
        f.notifier.set_unreachable(true);
        let transfer = f.create_transfer();

        let negotiation = f.offer(&transfer);
        assert!(f.notifier.sent().is_empty());
        let stored = f.service.find_transfer(CUSTOMER, &transfer.id).unwrap();
        assert_eq!(stored.negotiation(&negotiation.id), Some(&negotiation));
    }

    #[test]
    fn listing_follows_the_receivers_answer() {
        let f = fixture();
        let transfer = f.create_transfer();
        let negotiation = f.offer(&transfer);
        let other = f
            .service
            .start_negotiation(CUSTOMER, SENDER_DID, &transfer.id, "did:nuts:unknown", None)
            .unwrap();
        f.receiver_sets(&negotiation.task_id, NegotiationStatus::Accepted);

        let listed = f.service.list_negotiations(CUSTOMER, &transfer.id).unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].negotiation.status, NegotiationStatus::Accepted);
        assert_eq!(
            listed[0].organization.as_ref().map(|org| org.name.as_str()),
            Some("Verpleeghuis De Nootjes")
        );
        assert_eq!(listed[1].negotiation.id, other.id);
        assert!(listed[1].organization.is_none());

        let stored = f.service.find_transfer(CUSTOMER, &transfer.id).unwrap();
        assert_eq!(
            stored.negotiation(&negotiation.id).map(|n| n.status),
            Some(NegotiationStatus::Accepted)
        );
    }

    #[test]
    fn status_updates_are_validated_written_and_announced() {
        let f = fixture();
        let transfer = f.create_transfer();
        let negotiation = f.offer(&transfer);

        let err = f
            .service
            .update_negotiation_status(
                CUSTOMER,
                SENDER_DID,
                &transfer.id,
                &negotiation.id,
                NegotiationStatus::Completed,
            )
            .expect_err("requested -> completed");
        assert!(matches!(err, TransferError::InvalidTransition(_)));
        assert_eq!(
            f.task(&negotiation.task_id).negotiation_status().unwrap(),
            NegotiationStatus::Requested
        );

        let updated = f
            .service
            .update_negotiation_status(
                CUSTOMER,
                SENDER_DID,
                &transfer.id,
                &negotiation.id,
                NegotiationStatus::OnHold,
            )
            .unwrap();
        assert_eq!(updated.status, NegotiationStatus::OnHold);
        assert_eq!(
            f.task(&negotiation.task_id).negotiation_status().unwrap(),
            NegotiationStatus::OnHold
        );
        assert_eq!(
            f.notifier.sent().last().map(|n| n.status),
            Some(NegotiationStatus::OnHold)
        );

        assert!(matches!(
            f.service.update_negotiation_status(
                CUSTOMER,
                SENDER_DID,
                &transfer.id,
                &RecordId::new(),
                NegotiationStatus::Requested,
            ),
            Err(TransferError::UnknownNegotiation(_))
        ));
    }

    #[test]
    fn assigning_requires_an_accepted_negotiation() {
        let f = fixture();
        let transfer = f.create_transfer();
        let negotiation = f.offer(&transfer);

        let err = f
            .service
            .assign(CUSTOMER, SENDER_DID, &transfer.id, &negotiation.id, "patient-7")
            .expect_err("not accepted");
        assert!(matches!(err, TransferError::ProposalNotAccepted { .. }));
        assert!(f.task(&negotiation.task_id).for_patient.is_none());

        f.receiver_sets(&negotiation.task_id, NegotiationStatus::Accepted);
        let assigned = f
            .service
            .assign(CUSTOMER, SENDER_DID, &transfer.id, &negotiation.id, "patient-7")
            .unwrap();
        assert_eq!(assigned.status, TransferStatus::Assigned);
        assert_eq!(assigned.assigned_negotiation.as_ref(), Some(&negotiation.id));
        assert_eq!(
            assigned.negotiation(&negotiation.id).map(|n| n.status),
            Some(NegotiationStatus::InProgress)
        );

        let task = f.task(&negotiation.task_id);
        assert_eq!(task.negotiation_status().unwrap(), NegotiationStatus::InProgress);
        assert!(task.input_reference(&codes::NURSING_HANDOFF).is_some());
        assert_eq!(
            f.notifier.sent().last().map(|n| n.status),
            Some(NegotiationStatus::InProgress)
        );

        // The receiver completing the Task completes the transfer.
        f.receiver_sets(&negotiation.task_id, NegotiationStatus::Completed);
        f.service.list_negotiations(CUSTOMER, &transfer.id).unwrap();
        let stored = f.service.find_transfer(CUSTOMER, &transfer.id).unwrap();
        assert_eq!(stored.status, TransferStatus::Completed);
    }

    #[test]
    fn cancelling_withdraws_open_negotiations() {
        let f = fixture();
        let transfer = f.create_transfer();
        let requested = f.offer(&transfer);
        let accepted = f
            .service
            .start_negotiation(CUSTOMER, SENDER_DID, &transfer.id, "did:nuts:other", None)
            .unwrap();
        f.receiver_sets(&accepted.task_id, NegotiationStatus::Accepted);

        let cancelled = f
            .service
            .cancel_transfer(CUSTOMER, SENDER_DID, &transfer.id)
            .unwrap();
        assert_eq!(cancelled.status, TransferStatus::Cancelled);
        assert_eq!(
            cancelled.negotiation(&requested.id).map(|n| n.status),
            Some(NegotiationStatus::Cancelled)
        );
        // An accepted Task can no longer be cancelled.
        assert_eq!(
            cancelled.negotiation(&accepted.id).map(|n| n.status),
            Some(NegotiationStatus::Accepted)
        );
        assert_eq!(
            f.task(&requested.task_id).negotiation_status().unwrap(),
            NegotiationStatus::Cancelled
        );
        let announced: Vec<_> = f
            .notifier
            .sent()
            .into_iter()
            .filter(|n| n.task_id == requested.task_id)
            .map(|n| n.status)
            .collect();
        assert_eq!(
            announced,
            vec![
                NegotiationStatus::Requested,
                NegotiationStatus::OnHold,
                NegotiationStatus::Cancelled
            ]
        );

        let again = f
            .service
            .cancel_transfer(CUSTOMER, SENDER_DID, &transfer.id)
            .unwrap();
        assert_eq!(again, cancelled);

        assert!(matches!(
            f.service
                .start_negotiation(CUSTOMER, SENDER_DID, &transfer.id, RECEIVER_DID, None),
            Err(TransferError::TransferClosed {
                status: TransferStatus::Cancelled,
                ..
            })
        ));
    }

    #[test]
    fn transfers_are_scoped_to_their_customer() {
        let f = fixture();
        let transfer = f.create_transfer();
        assert!(matches!(
            f.service.find_transfer("2", &transfer.id),
            Err(TransferError::UnknownTransfer(_))
        ));
        assert!(matches!(
            f.service
                .start_negotiation("2", SENDER_DID, &transfer.id, RECEIVER_DID, None),
            Err(TransferError::UnknownTransfer(_))
        ));
    }
}
