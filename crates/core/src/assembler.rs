//! Assembly of the remote clinical document graph.
//!
//! Walks Composition → subject Patient → care plan → nursing diagnosis → entries, fetching each
//! node through a [`DocumentClient`]. Assembly is all-or-nothing: a single failed fetch or
//! malformed node discards everything fetched so far.

use crate::error::{TransferError, TransferResult};
use crate::remote::DocumentClient;
use fhir::codes;
use fhir::{
    find_section, AdvanceNotice, Composition, Condition, FhirError, NursingHandoff, Patient,
    Procedure, Resource, ResourceRef, ResourceType,
};

/// Fetch `reference` and decode it as the resource type `into` expects.
///
/// Read failures are reported as [`TransferError::Remote`]; bodies that do not decode into the
/// expected type as [`TransferError::MalformedDocument`] at the resource's path.
pub(crate) fn fetch<T>(
    client: &dyn DocumentClient,
    reference: &ResourceRef,
    into: fn(Resource) -> Result<T, FhirError>,
) -> TransferResult<T> {
    let path = reference.path();
    tracing::debug!("fetching {}", path);
    let body = client
        .read(&path)
        .map_err(|err| TransferError::remote(format!("fetching {path}"), err))?;
    Resource::from_json(body)
        .and_then(into)
        .map_err(|err| TransferError::malformed(path, err))
}

struct Graph {
    composition: Composition,
    patient: Option<Patient>,
    problems: Vec<Condition>,
    interventions: Vec<Procedure>,
}

/// Assemble the anonymised advance notice rooted at `composition_ref`.
///
/// The subject Patient is fetched only when the composition references one.
pub fn assemble_advance_notice(
    client: &dyn DocumentClient,
    composition_ref: &ResourceRef,
) -> TransferResult<AdvanceNotice> {
    let graph = assemble(client, composition_ref, false)?;
    Ok(AdvanceNotice {
        composition: graph.composition,
        patient: graph.patient,
        problems: graph.problems,
        interventions: graph.interventions,
    })
}

/// Assemble the identified nursing handoff rooted at `composition_ref`.
///
/// The composition must reference its subject Patient.
pub fn assemble_nursing_handoff(
    client: &dyn DocumentClient,
    composition_ref: &ResourceRef,
) -> TransferResult<NursingHandoff> {
    let graph = assemble(client, composition_ref, true)?;
    let patient = graph.patient.ok_or_else(|| {
        TransferError::malformed(
            composition_ref.path(),
            FhirError::MissingElement("Composition.subject".into()),
        )
    })?;
    Ok(NursingHandoff {
        composition: graph.composition,
        patient,
        problems: graph.problems,
        interventions: graph.interventions,
    })
}

fn assemble(
    client: &dyn DocumentClient,
    composition_ref: &ResourceRef,
    subject_required: bool,
) -> TransferResult<Graph> {
    let composition_path = composition_ref.path();
    let composition = fetch(client, composition_ref, Resource::into_composition)?;

    let patient = match composition.subject_ref() {
        Some(subject) => {
            let subject = subject.map_err(|err| TransferError::malformed(&composition_path, err))?;
            if subject.resource_type() != ResourceType::Patient {
                return Err(TransferError::malformed(
                    &composition_path,
                    FhirError::UnexpectedResourceType {
                        expected: ResourceType::Patient,
                        found: subject.resource_type(),
                    },
                ));
            }
            Some(fetch(client, &subject, Resource::into_patient)?)
        }
        None if subject_required => {
            return Err(TransferError::malformed(
                &composition_path,
                FhirError::MissingElement("Composition.subject".into()),
            ))
        }
        None => None,
    };

    let care_plan = find_section(&composition.section, &codes::CARE_PLAN)
        .map_err(|err| TransferError::malformed(&composition_path, err))?;
    let nursing_diagnosis = find_section(&care_plan.section, &codes::NURSING_DIAGNOSIS)
        .map_err(|err| TransferError::malformed(&composition_path, err))?;

    let mut problems = Vec::new();
    let mut interventions = Vec::new();
    for (index, entry) in nursing_diagnosis.entry.iter().enumerate() {
        let target = match &entry.reference {
            Some(_) => entry.target(),
            None => Err(FhirError::MissingElement(format!(
                "nursing diagnosis entry[{index}].reference"
            ))),
        }
        .map_err(|err| TransferError::malformed(&composition_path, err))?;

        match target.resource_type() {
            ResourceType::Condition => {
                problems.push(fetch(client, &target, Resource::into_condition)?);
            }
            ResourceType::Procedure => {
                interventions.push(fetch(client, &target, Resource::into_procedure)?);
            }
            other => {
                return Err(TransferError::malformed(
                    &composition_path,
                    FhirError::InvalidReference(format!(
                        "nursing diagnosis entry[{index}] references a {other}"
                    )),
                ))
            }
        }
    }

    tracing::debug!(
        "assembled {} with {} problems and {} interventions",
        composition_path,
        problems.len(),
        interventions.len()
    );
    Ok(Graph {
        composition,
        patient,
        problems,
        interventions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RemoteError;
    use crate::remote::InMemoryDocumentServer;
    use fhir::{Annotation, CodeableConcept, Reference, Section};
    use serde_json::json;

    fn entries(references: &[&str]) -> Vec<Reference> {
        references
            .iter()
            .map(|reference| Reference {
                reference: Some((*reference).to_owned()),
                ..Reference::default()
            })
            .collect()
    }

    fn composition(subject: Option<&str>, diagnosis_entries: Option<&[&str]>) -> Composition {
        let mut care_plan = Section {
            code: CodeableConcept::from_definition(&codes::CARE_PLAN),
            ..Section::default()
        };
        if let Some(references) = diagnosis_entries {
            care_plan.section.push(Section {
                code: CodeableConcept::from_definition(&codes::NURSING_DIAGNOSIS),
                entry: entries(references),
                ..Section::default()
            });
        }
        Composition {
            id: Some("c1".into()),
            kind: CodeableConcept::from_definition(&codes::ADVANCE_NOTICE),
            subject: subject.map(|reference| Reference {
                reference: Some(reference.to_owned()),
                ..Reference::default()
            }),
            section: vec![care_plan],
            ..Composition::default()
        }
    }

    fn condition(id: &str) -> Resource {
        Resource::Condition(Condition {
            id: Some(id.into()),
            note: vec![Annotation {
                text: Some(format!("problem {id}")),
            }],
            ..Condition::default()
        })
    }

    fn procedure(id: &str) -> Resource {
        Resource::Procedure(Procedure {
            id: Some(id.into()),
            ..Procedure::default()
        })
    }

    fn server_with(composition: Composition) -> InMemoryDocumentServer {
        let server = InMemoryDocumentServer::new();
        server.insert(&Resource::Composition(composition)).unwrap();
        server
            .insert(&Resource::Patient(Patient {
                id: Some("p1".into()),
                ..Patient::default()
            }))
            .unwrap();
        for resource in [condition("a"), condition("b"), procedure("x")] {
            server.insert(&resource).unwrap();
        }
        server
    }

    fn root() -> ResourceRef {
        ResourceRef::new(ResourceType::Composition, "c1")
    }

    #[test]
    fn collects_entries_in_section_order() {
        let server = server_with(composition(
            Some("Patient/p1"),
            Some(&["Condition/b", "Procedure/x", "Condition/a"]),
        ));

        let notice = assemble_advance_notice(&server, &root()).expect("assemble");

        assert_eq!(notice.problems.len(), 2);
        assert_eq!(notice.problems[0].id.as_deref(), Some("b"));
        assert_eq!(notice.problems[1].id.as_deref(), Some("a"));
        assert_eq!(notice.interventions.len(), 1);
        assert_eq!(
            notice.patient.and_then(|patient| patient.id).as_deref(),
            Some("p1")
        );
    }

    #[test]
    fn advance_notice_subject_is_optional() {
        let server = server_with(composition(None, Some(&["Condition/a"])));
        let notice = assemble_advance_notice(&server, &root()).expect("assemble");
        assert!(notice.patient.is_none());

        let err = assemble_nursing_handoff(&server, &root()).expect_err("subject required");
        assert!(matches!(err, TransferError::MalformedDocument { .. }));
    }

    #[test]
    fn missing_nursing_diagnosis_is_malformed() {
        let server = server_with(composition(Some("Patient/p1"), None));
        match assemble_nursing_handoff(&server, &root()) {
            Err(TransferError::MalformedDocument { path, source }) => {
                assert_eq!(path, "/Composition/c1");
                assert!(source.is_section_not_found());
            }
            other => panic!("expected MalformedDocument, got {other:?}"),
        }
    }

    #[test]
    fn a_failed_entry_fetch_aborts_assembly() {
        let server = server_with(composition(
            Some("Patient/p1"),
            Some(&["Condition/a", "Condition/b"]),
        ));
        server.fail_reads_of("/Condition/b");

        match assemble_advance_notice(&server, &root()) {
            Err(TransferError::Remote { source, .. }) => {
                assert!(matches!(source, RemoteError::Status { status: 503, .. }));
            }
            other => panic!("expected Remote, got {other:?}"),
        }

        let server = server_with(composition(Some("Patient/p1"), Some(&["Condition/zz"])));
        assert!(matches!(
            assemble_advance_notice(&server, &root()),
            Err(TransferError::Remote {
                source: RemoteError::NotFound(_),
                ..
            })
        ));
    }

    #[test]
    fn unexpected_entries_are_malformed() {
        for reference in ["Task/t1", "Observation/o1", "not-a-reference"] {
            let server = server_with(composition(Some("Patient/p1"), Some(&[reference])));
            let err = assemble_advance_notice(&server, &root()).expect_err(reference);
            assert!(
                matches!(err, TransferError::MalformedDocument { .. }),
                "{reference}: {err}"
            );
        }
    }

    #[test]
    fn entry_of_the_wrong_type_is_malformed_at_its_path() {
        let server = server_with(composition(Some("Patient/p1"), Some(&["Condition/a"])));
        server.insert_raw("/Condition/a", json!({"resourceType": "Procedure", "id": "a"}));

        match assemble_advance_notice(&server, &root()) {
            Err(TransferError::MalformedDocument { path, .. }) => assert_eq!(path, "/Condition/a"),
            other => panic!("expected MalformedDocument, got {other:?}"),
        }
    }
}
