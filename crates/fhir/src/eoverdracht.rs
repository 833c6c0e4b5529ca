//! eOverdracht document views and their domain-level projection.
//!
//! An [`AdvanceNotice`] and a [`NursingHandoff`] share one Composition shape:
//! administrative data (carrying the proposed transfer date) plus a care plan whose
//! nursing-diagnosis section lists Condition ("problem") and Procedure ("intervention") entries.
//! They differ in the patient: the advance notice carries at most an anonymous stub with a postal
//! code, the handoff carries the identified patient.
//!
//! The domain types in this module are what the rest of the system (REST surface, proposal
//! publisher) works with; the FHIR resources stay inside the views.

use crate::codes;
use crate::resources::{Composition, Condition, Patient, Procedure};
use crate::sections::find_section;
use crate::{FhirError, FhirResult};
use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};

// ============================================================================
// Domain types
// ============================================================================

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProblemStatus {
    #[default]
    Active,
    Inactive,
}

impl ProblemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProblemStatus::Active => "active",
            ProblemStatus::Inactive => "inactive",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Problem {
    pub name: String,
    pub status: ProblemStatus,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intervention {
    pub comment: String,
}

/// A problem and the interventions planned for it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientProblem {
    pub problem: Problem,
    #[serde(default)]
    pub interventions: Vec<Intervention>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CarePlan {
    #[serde(default)]
    pub patient_problems: Vec<PatientProblem>,
}

/// The patient as shown to the other party.
///
/// For an advance notice only `postal_code` is populated.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientSummary {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub surname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub birth_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
}

impl From<&Patient> for PatientSummary {
    fn from(patient: &Patient) -> Self {
        let name = patient.name.first();
        let first_name = name
            .filter(|name| !name.given.is_empty())
            .map(|name| name.given.join(" "));
        Self {
            id: patient.id.clone(),
            first_name,
            surname: name.and_then(|name| name.family.clone()),
            gender: patient.gender.clone(),
            birth_date: patient.birth_date.clone(),
            postal_code: patient
                .address
                .iter()
                .find_map(|address| address.postal_code.clone()),
        }
    }
}

/// Properties of a transfer as negotiated between the parties.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferProperties {
    /// Proposed by the sender; absent if the administrative data section is missing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transfer_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient: Option<PatientSummary>,
    #[serde(default)]
    pub care_plan: CarePlan,
}

/// Sender-side input for a new transfer proposal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTransferRequest {
    pub transfer_date: NaiveDate,
    #[serde(default)]
    pub care_plan: CarePlan,
}

// ============================================================================
// Views
// ============================================================================

/// The anonymised proposal document offered to candidate receivers.
#[derive(Clone, Debug, PartialEq)]
pub struct AdvanceNotice {
    pub composition: Composition,
    pub patient: Option<Patient>,
    pub problems: Vec<Condition>,
    pub interventions: Vec<Procedure>,
}

impl AdvanceNotice {
    pub fn to_transfer_properties(&self) -> FhirResult<TransferProperties> {
        transfer_properties(
            &self.composition,
            self.patient.as_ref(),
            &self.problems,
            &self.interventions,
        )
    }
}

/// The identified handoff document made available to the assigned receiver.
#[derive(Clone, Debug, PartialEq)]
pub struct NursingHandoff {
    pub composition: Composition,
    pub patient: Patient,
    pub problems: Vec<Condition>,
    pub interventions: Vec<Procedure>,
}

impl NursingHandoff {
    pub fn to_transfer_properties(&self) -> FhirResult<TransferProperties> {
        transfer_properties(
            &self.composition,
            Some(&self.patient),
            &self.problems,
            &self.interventions,
        )
    }
}

/// Project the document graph onto [`TransferProperties`].
///
/// Interventions are grouped under the problem their `reasonReference` points at.
/// Interventions that do not reference one of the given problems are not part of the care plan.
fn transfer_properties(
    composition: &Composition,
    patient: Option<&Patient>,
    problems: &[Condition],
    interventions: &[Procedure],
) -> FhirResult<TransferProperties> {
    let transfer_date = match find_section(&composition.section, &codes::ADMINISTRATIVE_DATA) {
        Ok(section) => section
            .extension_date_time(codes::TRANSFER_DATE_EXTENSION_URL)
            .map(parse_transfer_date)
            .transpose()?,
        Err(err) if err.is_section_not_found() => None,
        Err(err) => return Err(err),
    };

    let patient_problems = problems
        .iter()
        .map(|condition| {
            let problem_ref = condition.id.as_deref().map(|id| format!("Condition/{id}"));
            let interventions = interventions
                .iter()
                .filter(|procedure| {
                    procedure.reason_reference.iter().any(|reason| {
                        reason.reference.is_some() && reason.reference == problem_ref
                    })
                })
                .map(|procedure| Intervention {
                    comment: first_note(&procedure.note).unwrap_or_default(),
                })
                .collect();
            PatientProblem {
                problem: problem_from_condition(condition),
                interventions,
            }
        })
        .collect();

    Ok(TransferProperties {
        transfer_date,
        patient: patient.map(PatientSummary::from),
        care_plan: CarePlan { patient_problems },
    })
}

fn problem_from_condition(condition: &Condition) -> Problem {
    let name = first_note(&condition.note)
        .or_else(|| condition.code.as_ref().and_then(|code| code.text.clone()))
        .unwrap_or_default();
    let status = match condition.clinical_status.as_deref() {
        Some("inactive") | Some("resolved") => ProblemStatus::Inactive,
        _ => ProblemStatus::Active,
    };
    Problem { name, status }
}

fn first_note(notes: &[crate::resources::Annotation]) -> Option<String> {
    notes.iter().find_map(|note| note.text.clone())
}

/// Accepts a plain date or an RFC 3339 date-time.
pub fn parse_transfer_date(value: &str) -> FhirResult<NaiveDate> {
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Ok(date);
    }
    DateTime::parse_from_rfc3339(value)
        .map(|date_time| date_time.date_naive())
        .map_err(|err| FhirError::Translation(format!("invalid transfer date '{value}': {err}")))
}
