//! FHIR (STU3) resource wire models for the transfer document graph.
//!
//! Only the members this system reads or writes are modelled. Every resource keeps the
//! remaining members in `extra`, so a resource fetched from a remote server can be written back
//! (for example after a Task status change) without losing data.
//!
//! Resources are exchanged as a [`Resource`] tagged union keyed on `resourceType`. Deserialise
//! through [`Resource::from_json`] rather than the individual structs: the tag is only stripped
//! when going through the union.

use crate::codes::{self, CodeDefinition};
use crate::reference::{ResourceRef, ResourceType};
use crate::status::NegotiationStatus;
use crate::FhirError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ============================================================================
// Data types
// ============================================================================

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coding {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

impl Coding {
    pub fn from_definition(definition: &CodeDefinition) -> Self {
        Self {
            system: Some(definition.system.to_owned()),
            code: Some(definition.code.to_owned()),
            display: definition.display.map(str::to_owned),
        }
    }

    /// Exact code match. A coding that states a system must state the definition's system.
    pub fn matches(&self, definition: &CodeDefinition) -> bool {
        self.code.as_deref() == Some(definition.code)
            && self
                .system
                .as_deref()
                .map_or(true, |system| system == definition.system)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeableConcept {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub coding: Vec<Coding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl CodeableConcept {
    pub fn from_definition(definition: &CodeDefinition) -> Self {
        Self {
            coding: vec![Coding::from_definition(definition)],
            text: None,
        }
    }

    pub fn has_code(&self, definition: &CodeDefinition) -> bool {
        self.coding.iter().any(|coding| coding.matches(definition))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identifier {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reference {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<Identifier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

impl Reference {
    /// A literal reference to a resource instance.
    pub fn to(target: &ResourceRef) -> Self {
        Self {
            reference: Some(target.to_string()),
            ..Self::default()
        }
    }

    /// A logical reference to an organisation by its DID.
    pub fn to_did(did: &str) -> Self {
        Self {
            identifier: Some(Identifier {
                system: Some(codes::NUTS_CODING_SYSTEM.to_owned()),
                value: Some(did.to_owned()),
            }),
            ..Self::default()
        }
    }

    /// Parses the literal reference, failing if it is absent or malformed.
    pub fn target(&self) -> Result<ResourceRef, FhirError> {
        let reference = self
            .reference
            .as_deref()
            .ok_or_else(|| FhirError::MissingElement("reference.reference".into()))?;
        ResourceRef::parse(reference)
    }

    fn identifier_value(&self) -> Option<&str> {
        self.identifier.as_ref()?.value.as_deref()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Annotation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Extension {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_date_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_string: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HumanName {
    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    pub use_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub given: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub line: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
}

// ============================================================================
// Resources
// ============================================================================

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Patient {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub identifier: Vec<Identifier>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub name: Vec<HumanName>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub birth_date: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub address: Vec<Address>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clinical_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<CodeableConcept>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<Reference>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub note: Vec<Annotation>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Procedure {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<Reference>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reason_reference: Vec<Reference>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub note: Vec<Annotation>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A coded section of a Composition.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub code: CodeableConcept,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extension: Vec<Extension>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub section: Vec<Section>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entry: Vec<Reference>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Section {
    /// Value of the extension with the given URL, if any.
    pub fn extension_date_time(&self, url: &str) -> Option<&str> {
        self.extension
            .iter()
            .find(|extension| extension.url == url)
            .and_then(|extension| extension.value_date_time.as_deref())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Composition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: CodeableConcept,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Absent (or without a literal reference) when the subject is withheld.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<Reference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub author: Vec<Reference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub section: Vec<Section>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Composition {
    /// The subject reference, if the composition identifies one.
    pub fn subject_ref(&self) -> Option<Result<ResourceRef, FhirError>> {
        let subject = self.subject.as_ref()?;
        subject.reference.as_ref()?;
        Some(subject.target())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRequester {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<Reference>,
}

/// A typed Task input or output.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskParameter {
    #[serde(rename = "type", default)]
    pub kind: CodeableConcept,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_reference: Option<Reference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_date_time: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TaskParameter {
    pub fn reference(definition: &CodeDefinition, target: &ResourceRef) -> Self {
        Self {
            kind: CodeableConcept::from_definition(definition),
            value_reference: Some(Reference::to(target)),
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<CodeableConcept>,
    /// Withheld until the receiving organisation has been assigned the transfer.
    #[serde(rename = "for", default, skip_serializing_if = "Option::is_none")]
    pub for_patient: Option<Reference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requester: Option<TaskRequester>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<Reference>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub input: Vec<TaskParameter>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub output: Vec<TaskParameter>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Task {
    pub fn is_transfer(&self) -> bool {
        self.code
            .as_ref()
            .is_some_and(|code| code.has_code(&codes::TRANSFER_TYPE))
    }

    pub fn negotiation_status(&self) -> Result<NegotiationStatus, FhirError> {
        self.status.parse()
    }

    pub fn set_negotiation_status(&mut self, status: NegotiationStatus) {
        self.status = status.as_str().to_owned();
    }

    /// The first input typed with `definition`, if present.
    pub fn input_of_type(&self, definition: &CodeDefinition) -> Option<&TaskParameter> {
        self.input.iter().find(|input| input.kind.has_code(definition))
    }

    /// The literal reference of the first input typed with `definition`.
    ///
    /// Returns `None` when no such input exists, and an error when it exists but does not carry
    /// a valid reference.
    pub fn input_reference(
        &self,
        definition: &CodeDefinition,
    ) -> Option<Result<ResourceRef, FhirError>> {
        let input = self.input_of_type(definition)?;
        Some(match &input.value_reference {
            Some(reference) => reference.target(),
            None => Err(FhirError::MissingElement(format!(
                "Task.input[{}].valueReference",
                definition.code
            ))),
        })
    }

    pub fn requester_did(&self) -> Option<&str> {
        self.requester.as_ref()?.agent.as_ref()?.identifier_value()
    }

    pub fn owner_did(&self) -> Option<&str> {
        self.owner.as_ref()?.identifier_value()
    }
}

/// Builder input for a transfer Task.
#[derive(Clone, Debug, PartialEq)]
pub struct TaskProperties {
    /// Generated when absent.
    pub id: Option<String>,
    pub status: NegotiationStatus,
    /// DID of the placer.
    pub requester_did: String,
    /// DID of the filler.
    pub owner_did: String,
    pub input: Vec<TaskParameter>,
    pub output: Vec<TaskParameter>,
}

// ============================================================================
// Tagged union
// ============================================================================

/// Any resource of the transfer document graph, tagged by `resourceType`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "resourceType")]
pub enum Resource {
    Condition(Condition),
    Procedure(Procedure),
    Composition(Composition),
    Patient(Patient),
    Task(Task),
}

macro_rules! resource_accessors {
    ($($variant:ident => $into:ident),* $(,)?) => {
        impl Resource {
            $(
                pub fn $into(self) -> Result<$variant, FhirError> {
                    match self {
                        Resource::$variant(inner) => Ok(inner),
                        other => Err(FhirError::UnexpectedResourceType {
                            expected: ResourceType::$variant,
                            found: other.resource_type(),
                        }),
                    }
                }
            )*
        }

        $(
            impl From<$variant> for Resource {
                fn from(inner: $variant) -> Self {
                    Resource::$variant(inner)
                }
            }
        )*
    };
}

resource_accessors! {
    Condition => into_condition,
    Procedure => into_procedure,
    Composition => into_composition,
    Patient => into_patient,
    Task => into_task,
}

impl Resource {
    pub fn resource_type(&self) -> ResourceType {
        match self {
            Resource::Condition(_) => ResourceType::Condition,
            Resource::Procedure(_) => ResourceType::Procedure,
            Resource::Composition(_) => ResourceType::Composition,
            Resource::Patient(_) => ResourceType::Patient,
            Resource::Task(_) => ResourceType::Task,
        }
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            Resource::Condition(r) => r.id.as_deref(),
            Resource::Procedure(r) => r.id.as_deref(),
            Resource::Composition(r) => r.id.as_deref(),
            Resource::Patient(r) => r.id.as_deref(),
            Resource::Task(r) => r.id.as_deref(),
        }
    }

    /// Reference to this resource instance; the resource must carry an id.
    pub fn reference(&self) -> Result<ResourceRef, FhirError> {
        let id = self
            .id()
            .ok_or_else(|| FhirError::MissingElement(format!("{}.id", self.resource_type())))?;
        Ok(ResourceRef::new(self.resource_type(), id))
    }

    /// Decode a resource body.
    ///
    /// The `resourceType` is checked first so an unsupported type is reported as such, then the
    /// body is decoded with `serde_path_to_error` to point at the failing member.
    ///
    /// # Errors
    ///
    /// Returns [`FhirError::Translation`] if `resourceType` is missing or the body does not match
    /// the wire model, and [`FhirError::InvalidReference`] for unsupported resource types.
    pub fn from_json(value: Value) -> Result<Self, FhirError> {
        let resource_type = value
            .get("resourceType")
            .and_then(Value::as_str)
            .ok_or_else(|| FhirError::Translation("resource has no resourceType".into()))?;
        resource_type.parse::<ResourceType>()?;

        serde_path_to_error::deserialize::<_, Resource>(value).map_err(|err| {
            let path = err.path().to_string();
            let source = err.into_inner();
            let path = if path.is_empty() || path == "." {
                "<root>".to_owned()
            } else {
                path
            };
            FhirError::Translation(format!("resource schema mismatch at {path}: {source}"))
        })
    }

    pub fn to_json(&self) -> Result<Value, FhirError> {
        Ok(serde_json::to_value(self)?)
    }
}
