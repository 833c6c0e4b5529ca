//! Construction of the transfer document graph on the sending side.

use crate::codes;
use crate::eoverdracht::{AdvanceNotice, CarePlan, CreateTransferRequest, PatientSummary};
use crate::reference::{ResourceRef, ResourceType};
use crate::resources::{
    Address, Annotation, CodeableConcept, Composition, Condition, Extension, Patient, Procedure,
    Reference, Section, Task, TaskProperties, TaskRequester,
};
use crate::sections::find_section;
use crate::FhirResult;
use chrono::{NaiveTime, SecondsFormat};

/// Source of resource ids for newly built resources.
pub trait IdGenerator {
    fn generate_id(&self) -> String;
}

/// Random (v4) UUID ids.
#[derive(Clone, Copy, Debug, Default)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn generate_id(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

/// Builds Tasks and eOverdracht Compositions.
#[derive(Clone, Debug, Default)]
pub struct TransferBuilder<G = UuidGenerator> {
    ids: G,
}

impl TransferBuilder<UuidGenerator> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<G: IdGenerator> TransferBuilder<G> {
    pub fn with_id_generator(ids: G) -> Self {
        Self { ids }
    }

    /// Build a transfer Task. A fresh id is generated when `properties.id` is `None`.
    ///
    /// The patient (`for`) is never set here: the receiving organisation only learns who the
    /// patient is once the transfer has been assigned to it.
    pub fn build_task(&self, properties: TaskProperties) -> Task {
        let mut task = Task {
            id: Some(properties.id.unwrap_or_else(|| self.ids.generate_id())),
            code: Some(CodeableConcept::from_definition(&codes::TRANSFER_TYPE)),
            requester: Some(TaskRequester {
                agent: Some(Reference::to_did(&properties.requester_did)),
            }),
            owner: Some(Reference::to_did(&properties.owner_did)),
            input: properties.input,
            output: properties.output,
            ..Task::default()
        };
        task.set_negotiation_status(properties.status);
        task
    }

    /// Build the anonymised advance notice for a new transfer proposal.
    pub fn build_advance_notice(
        &self,
        request: &CreateTransferRequest,
        patient: &PatientSummary,
    ) -> AdvanceNotice {
        let (problems, interventions, care_plan) = self.build_care_plan(&request.care_plan);
        let administrative_data = administrative_data(request);
        let anonymous_patient = self.build_anonymous_patient(patient);

        let patient_ref = ResourceRef::new(
            ResourceType::Patient,
            anonymous_patient.id.clone().unwrap_or_default(),
        );
        let composition = Composition {
            id: Some(self.ids.generate_id()),
            kind: CodeableConcept::from_definition(&codes::ADVANCE_NOTICE),
            status: Some("final".into()),
            subject: Some(Reference::to(&patient_ref)),
            title: Some("Advance notice".into()),
            section: vec![administrative_data, care_plan],
            ..Composition::default()
        };

        AdvanceNotice {
            composition,
            patient: Some(anonymous_patient),
            problems,
            interventions,
        }
    }

    /// Build the nursing handoff for an assigned transfer.
    ///
    /// The administrative data and care plan sections are taken over from the advance notice;
    /// the subject becomes the identified patient.
    ///
    /// # Errors
    ///
    /// Returns [`crate::FhirError::SectionNotFound`] if the advance notice lacks either section.
    pub fn build_nursing_handoff_composition(
        &self,
        patient_id: &str,
        advance_notice: &AdvanceNotice,
    ) -> FhirResult<Composition> {
        let sections = &advance_notice.composition.section;
        let administrative_data = find_section(sections, &codes::ADMINISTRATIVE_DATA)?.clone();
        let care_plan = find_section(sections, &codes::CARE_PLAN)?.clone();

        Ok(Composition {
            id: Some(self.ids.generate_id()),
            kind: CodeableConcept::from_definition(&codes::NURSING_HANDOFF),
            status: Some("final".into()),
            subject: Some(Reference::to(&ResourceRef::new(
                ResourceType::Patient,
                patient_id,
            ))),
            title: Some("Nursing handoff".into()),
            section: vec![administrative_data, care_plan],
            ..Composition::default()
        })
    }

    /// Address information only, enough for a receiver to decide whether it can deliver care.
    fn build_anonymous_patient(&self, patient: &PatientSummary) -> Patient {
        Patient {
            id: Some(self.ids.generate_id()),
            address: vec![Address {
                postal_code: patient.postal_code.clone(),
                ..Address::default()
            }],
            ..Patient::default()
        }
    }

    fn build_care_plan(&self, care_plan: &CarePlan) -> (Vec<Condition>, Vec<Procedure>, Section) {
        let mut problems = Vec::new();
        let mut interventions = Vec::new();

        for patient_problem in &care_plan.patient_problems {
            let condition = Condition {
                id: Some(self.ids.generate_id()),
                clinical_status: Some(patient_problem.problem.status.as_str().to_owned()),
                note: vec![Annotation {
                    text: Some(patient_problem.problem.name.clone()),
                }],
                ..Condition::default()
            };
            let condition_ref =
                ResourceRef::new(ResourceType::Condition, condition.id.clone().unwrap_or_default());

            for intervention in &patient_problem.interventions {
                if intervention.comment.trim().is_empty() {
                    continue;
                }
                interventions.push(Procedure {
                    id: Some(self.ids.generate_id()),
                    reason_reference: vec![Reference::to(&condition_ref)],
                    note: vec![Annotation {
                        text: Some(intervention.comment.clone()),
                    }],
                    ..Procedure::default()
                });
            }
            problems.push(condition);
        }

        let entry = problems
            .iter()
            .map(|condition| (ResourceType::Condition, condition.id.as_deref()))
            .chain(
                interventions
                    .iter()
                    .map(|procedure| (ResourceType::Procedure, procedure.id.as_deref())),
            )
            .map(|(resource_type, id)| {
                Reference::to(&ResourceRef::new(resource_type, id.unwrap_or_default()))
            })
            .collect();

        let nursing_diagnosis = Section {
            title: Some("Current patient problems".into()),
            code: CodeableConcept::from_definition(&codes::NURSING_DIAGNOSIS),
            entry,
            ..Section::default()
        };
        let care_plan = Section {
            code: CodeableConcept::from_definition(&codes::CARE_PLAN),
            section: vec![nursing_diagnosis],
            ..Section::default()
        };

        (problems, interventions, care_plan)
    }
}

fn administrative_data(request: &CreateTransferRequest) -> Section {
    let transfer_date = request
        .transfer_date
        .and_time(NaiveTime::MIN)
        .and_utc()
        .to_rfc3339_opts(SecondsFormat::Secs, true);
    Section {
        title: Some("Administrative data".into()),
        code: CodeableConcept::from_definition(&codes::ADMINISTRATIVE_DATA),
        extension: vec![Extension {
            url: codes::TRANSFER_DATE_EXTENSION_URL.into(),
            value_date_time: Some(transfer_date),
            value_string: None,
        }],
        ..Section::default()
    }
}
