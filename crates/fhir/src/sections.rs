//! Code-based lookup of Composition sections.

use crate::codes::CodeDefinition;
use crate::resources::Section;
use crate::FhirError;

/// Find the first section carrying `code`, searching depth-first in document order.
///
/// A section is visited before its nested sections, and the nested sections before the next
/// sibling.
///
/// # Errors
///
/// Returns [`FhirError::SectionNotFound`] if no section (at any depth) carries the code. Callers
/// may treat this as recoverable via [`FhirError::is_section_not_found`].
pub fn find_section<'a>(
    sections: &'a [Section],
    code: &CodeDefinition,
) -> Result<&'a Section, FhirError> {
    search(sections, code).ok_or(FhirError::SectionNotFound {
        system: code.system,
        code: code.code,
    })
}

fn search<'a>(sections: &'a [Section], code: &CodeDefinition) -> Option<&'a Section> {
    for section in sections {
        if section.code.has_code(code) {
            return Some(section);
        }
        if let Some(found) = search(&section.section, code) {
            return Some(found);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codes;
    use crate::resources::CodeableConcept;

    fn section(title: &str, code: &CodeDefinition, nested: Vec<Section>) -> Section {
        Section {
            title: Some(title.into()),
            code: CodeableConcept::from_definition(code),
            section: nested,
            ..Section::default()
        }
    }

    #[test]
    fn finds_top_level_and_nested_sections() {
        let sections = vec![
            section("admin", &codes::ADMINISTRATIVE_DATA, vec![]),
            section(
                "care plan",
                &codes::CARE_PLAN,
                vec![section("diagnosis", &codes::NURSING_DIAGNOSIS, vec![])],
            ),
        ];

        let care_plan = find_section(&sections, &codes::CARE_PLAN).expect("care plan");
        assert_eq!(care_plan.title.as_deref(), Some("care plan"));

        let diagnosis = find_section(&sections, &codes::NURSING_DIAGNOSIS).expect("diagnosis");
        assert_eq!(diagnosis.title.as_deref(), Some("diagnosis"));
    }

    #[test]
    fn nested_match_wins_over_later_sibling() {
        let sections = vec![
            section(
                "outer",
                &codes::CARE_PLAN,
                vec![section("first", &codes::NURSING_DIAGNOSIS, vec![])],
            ),
            section("second", &codes::NURSING_DIAGNOSIS, vec![]),
        ];

        let found = find_section(&sections, &codes::NURSING_DIAGNOSIS).expect("found");
        assert_eq!(found.title.as_deref(), Some("first"));
    }

    #[test]
    fn missing_section_is_recoverable() {
        let sections = vec![section("admin", &codes::ADMINISTRATIVE_DATA, vec![])];

        let err = find_section(&sections, &codes::CARE_PLAN).expect_err("absent");
        assert!(err.is_section_not_found());
        assert!(find_section(&[], &codes::CARE_PLAN).is_err());
    }
}
