//! Coding systems and classification codes used by eOverdracht.
//!
//! These values must match bit-for-bit across every XIS taking part in a transfer, so they are
//! compiled in rather than configured.

/// A single code bound to its coding system.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CodeDefinition {
    pub system: &'static str,
    pub code: &'static str,
    pub display: Option<&'static str>,
}

pub const SNOMED_CODING_SYSTEM: &str = "http://snomed.info/sct";
pub const LOINC_CODING_SYSTEM: &str = "http://loinc.org";
pub const NUTS_CODING_SYSTEM: &str = "http://nuts.nl";

/// Task code marking a resource as a transfer of care.
pub const TRANSFER_TYPE: CodeDefinition = CodeDefinition {
    system: SNOMED_CODING_SYSTEM,
    code: "308292007",
    display: Some("Overdracht van zorg"),
};

/// Composition type and Task input type of the anonymised advance notice.
pub const ADVANCE_NOTICE: CodeDefinition = CodeDefinition {
    system: LOINC_CODING_SYSTEM,
    code: "57830-2",
    display: None,
};

/// Composition type and Task input type of the identified nursing handoff.
pub const NURSING_HANDOFF: CodeDefinition = CodeDefinition {
    system: SNOMED_CODING_SYSTEM,
    code: "371535009",
    display: Some("verslag van overdracht"),
};

/// Task input type carrying a counter-proposed transfer date.
pub const ALTERNATIVE_DATE: CodeDefinition = CodeDefinition {
    system: SNOMED_CODING_SYSTEM,
    code: "146851000146105",
    display: None,
};

pub const ADMINISTRATIVE_DATA: CodeDefinition = CodeDefinition {
    system: SNOMED_CODING_SYSTEM,
    code: "405624007",
    display: Some("Administrative documentation"),
};

pub const CARE_PLAN: CodeDefinition = CodeDefinition {
    system: SNOMED_CODING_SYSTEM,
    code: "773130005",
    display: Some("Nursing care plan"),
};

/// Section under the care plan holding the Condition and Procedure entries.
pub const NURSING_DIAGNOSIS: CodeDefinition = CodeDefinition {
    system: SNOMED_CODING_SYSTEM,
    code: "86644006",
    display: Some("Nursing diagnosis"),
};

/// Extension on the administrative data section holding the proposed transfer date.
pub const TRANSFER_DATE_EXTENSION_URL: &str =
    "http://nictiz.nl/fhir/StructureDefinition/eOverdracht-TransferDate";
