//! FHIR wire/boundary support for eOverdracht transfer negotiation.
//!
//! This crate provides **wire models** and **translation helpers** for the remote clinical
//! document graph exchanged between care organisations:
//! - Task, Composition, Condition, Procedure and Patient resources (JSON)
//! - references of the form `ResourceType/id`
//! - the coding-system constants both parties must agree on
//! - the AdvanceNotice and NursingHandoff views over a Composition
//!
//! This crate focuses on:
//! - FHIR semantic alignment (STU3 shapes, only the members this system reads or writes)
//! - serialisation/deserialisation, preserving members it does not model
//! - translation between wire resources and domain-level transfer properties
//!
//! Transport, authorisation and persistence live in `eoverdracht-core`.

pub mod builders;
pub mod codes;
pub mod eoverdracht;
pub mod reference;
pub mod resources;
pub mod sections;
pub mod status;

// Re-export facades
pub use builders::{IdGenerator, TransferBuilder, UuidGenerator};
pub use eoverdracht::{AdvanceNotice, NursingHandoff};
pub use reference::{ResourceRef, ResourceType};
pub use resources::Resource;
pub use sections::find_section;
pub use status::NegotiationStatus;

// Re-export public domain-level types
pub use eoverdracht::{
    CarePlan, CreateTransferRequest, Intervention, PatientProblem, PatientSummary, Problem,
    ProblemStatus, TransferProperties,
};
pub use resources::{
    Address, Annotation, CodeableConcept, Coding, Composition, Condition, Extension, HumanName,
    Identifier, Patient, Procedure, Reference, Section, Task, TaskParameter, TaskProperties,
    TaskRequester,
};

/// Errors returned by the `fhir` boundary crate.
#[derive(Debug, thiserror::Error)]
pub enum FhirError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("translation error: {0}")]
    Translation(String),

    #[error("invalid reference: '{0}'")]
    InvalidReference(String),

    #[error("unexpected resource type: expected {expected}, got {found}")]
    UnexpectedResourceType {
        expected: ResourceType,
        found: ResourceType,
    },

    #[error("section not found (code {system}|{code})")]
    SectionNotFound {
        system: &'static str,
        code: &'static str,
    },

    #[error("missing required element: {0}")]
    MissingElement(String),

    #[error("unknown negotiation status: '{0}'")]
    UnknownStatus(String),
}

impl FhirError {
    /// Returns true when the error reports an absent section. Documents may legitimately be
    /// incomplete while a negotiation is still being staged, so callers can recover from this.
    pub fn is_section_not_found(&self) -> bool {
        matches!(self, FhirError::SectionNotFound { .. })
    }
}

/// Type alias for Results that can fail with a [`FhirError`].
pub type FhirResult<T> = Result<T, FhirError>;
