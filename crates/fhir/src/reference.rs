//! Resource type names and `ResourceType/id` references.

use crate::FhirError;
use std::fmt;
use std::str::FromStr;

/// Resource types that appear in the transfer document graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceType {
    Condition,
    Procedure,
    Composition,
    Patient,
    Task,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Condition => "Condition",
            ResourceType::Procedure => "Procedure",
            ResourceType::Composition => "Composition",
            ResourceType::Patient => "Patient",
            ResourceType::Task => "Task",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = FhirError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Condition" => Ok(ResourceType::Condition),
            "Procedure" => Ok(ResourceType::Procedure),
            "Composition" => Ok(ResourceType::Composition),
            "Patient" => Ok(ResourceType::Patient),
            "Task" => Ok(ResourceType::Task),
            other => Err(FhirError::InvalidReference(format!(
                "unsupported resource type {other}"
            ))),
        }
    }
}

/// A parsed relative reference to a single resource instance.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResourceRef {
    resource_type: ResourceType,
    id: String,
}

impl ResourceRef {
    pub fn new(resource_type: ResourceType, id: impl Into<String>) -> Self {
        Self {
            resource_type,
            id: id.into(),
        }
    }

    /// Parses `Type/id` (a single leading `/` is tolerated).
    ///
    /// # Errors
    ///
    /// Returns [`FhirError::InvalidReference`] if the reference does not have exactly two
    /// non-empty segments or names a resource type outside the transfer document graph.
    pub fn parse(reference: &str) -> Result<Self, FhirError> {
        let trimmed = reference.trim();
        let relative = trimmed.strip_prefix('/').unwrap_or(trimmed);

        let (type_part, id) = relative
            .split_once('/')
            .ok_or_else(|| FhirError::InvalidReference(reference.to_owned()))?;
        if id.is_empty() || id.contains('/') {
            return Err(FhirError::InvalidReference(reference.to_owned()));
        }

        let resource_type = type_part
            .parse::<ResourceType>()
            .map_err(|_| FhirError::InvalidReference(reference.to_owned()))?;

        Ok(Self::new(resource_type, id))
    }

    pub fn resource_type(&self) -> ResourceType {
        self.resource_type
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Server-relative request path, e.g. `/Task/123`.
    pub fn path(&self) -> String {
        format!("/{}/{}", self.resource_type, self.id)
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.resource_type, self.id)
    }
}

impl FromStr for ResourceRef {
    type Err = FhirError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceRef::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_relative_reference() {
        let reference = ResourceRef::parse("Condition/abc-1").expect("parse");
        assert_eq!(reference.resource_type(), ResourceType::Condition);
        assert_eq!(reference.id(), "abc-1");
        assert_eq!(reference.path(), "/Condition/abc-1");
        assert_eq!(reference.to_string(), "Condition/abc-1");
    }

    #[test]
    fn tolerates_leading_slash() {
        let reference: ResourceRef = "/Task/42".parse().expect("parse");
        assert_eq!(reference, ResourceRef::new(ResourceType::Task, "42"));
    }

    #[test]
    fn rejects_malformed_references() {
        for input in ["", "Condition", "Condition/", "/Condition/1/_history/2", "Observation/1"] {
            let err = ResourceRef::parse(input).expect_err(input);
            assert!(matches!(err, FhirError::InvalidReference(_)), "{input}");
        }
    }
}
