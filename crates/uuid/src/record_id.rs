use crate::{UuidError, UuidResult};
use std::path::{Path, PathBuf};
use std::{fmt, str::FromStr};

pub use ::uuid::Uuid;

/// Namespace for name-based record ids.
const RECORD_NAMESPACE: Uuid = Uuid::from_bytes([
    0x6f, 0x1d, 0x2c, 0x8e, 0x4b, 0x3a, 0x4e, 0x55, 0x9a, 0x61, 0x0d, 0x7e, 0x3c, 0x21, 0x90, 0xb4,
]);

/// Separates key parts before hashing so `("ab", "c")` and `("a", "bc")` differ.
const KEY_SEPARATOR: u8 = 0x1f;

/// A record identifier in canonical form (32 lowercase hex characters, no hyphens).
///
/// Once constructed the contained UUID is guaranteed canonical. Use [`RecordId::parse`] for
/// identifiers that arrive from outside (REST paths, CLI arguments).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RecordId(Uuid);

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordId {
    /// A fresh random (v4) id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// A stable id for the given natural key parts.
    pub fn derive(parts: &[&str]) -> Self {
        let mut name = Vec::new();
        for (i, part) in parts.iter().enumerate() {
            if i > 0 {
                name.push(KEY_SEPARATOR);
            }
            name.extend_from_slice(part.as_bytes());
        }
        Self(Uuid::new_v5(&RECORD_NAMESPACE, &name))
    }

    /// Validates an identifier that must already be canonical.
    ///
    /// Hyphenated or uppercase forms are rejected rather than normalised.
    ///
    /// # Errors
    ///
    /// Returns [`UuidError::InvalidInput`] if `input` is not canonical.
    pub fn parse(input: &str) -> UuidResult<Self> {
        if !Self::is_canonical(input) {
            return Err(UuidError::InvalidInput(format!(
                "UUID must be 32 lowercase hex characters without hyphens, got: '{input}'"
            )));
        }
        Uuid::parse_str(input)
            .map(Self)
            .map_err(|e| UuidError::InvalidInput(format!("'{input}': {e}")))
    }

    pub fn uuid(&self) -> Uuid {
        self.0
    }

    pub fn is_canonical(input: &str) -> bool {
        input.len() == 32
            && input
                .bytes()
                .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
    }

    /// Returns `parent_dir/<s1>/<s2>/<id>/`, where `s1` and `s2` are the first two pairs of hex
    /// characters.
    pub fn sharded_dir(&self, parent_dir: &Path) -> PathBuf {
        let canonical = self.0.simple().to_string();
        parent_dir
            .join(&canonical[0..2])
            .join(&canonical[2..4])
            .join(&canonical)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl FromStr for RecordId {
    type Err = UuidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RecordId::parse(s)
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for RecordId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for RecordId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        RecordId::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_ids_are_canonical() {
        let id = RecordId::new();
        assert!(RecordId::is_canonical(&id.to_string()));
    }

    #[test]
    fn derive_is_stable_per_key() {
        let a = RecordId::derive(&["customer-1", "task-1"]);
        let b = RecordId::derive(&["customer-1", "task-1"]);
        assert_eq!(a, b);
        assert_ne!(a, RecordId::derive(&["customer-2", "task-1"]));
        assert_ne!(
            RecordId::derive(&["ab", "c"]),
            RecordId::derive(&["a", "bc"])
        );
        assert!(RecordId::is_canonical(&a.to_string()));
    }

    #[test]
    fn parse_accepts_only_canonical_form() {
        let canonical = "550e8400e29b41d4a716446655440000";
        assert_eq!(RecordId::parse(canonical).unwrap().to_string(), canonical);

        for invalid in [
            "550e8400-e29b-41d4-a716-446655440000",
            "550E8400E29B41D4A716446655440000",
            "550e8400e29b41d4a71644665544000",
            "550e8400e29b41d4a716446655440000a",
            "550e8400e29b41d4a71644665544000g",
        ] {
            match RecordId::parse(invalid) {
                Err(UuidError::InvalidInput(msg)) => assert!(msg.contains(invalid)),
                other => panic!("expected InvalidInput for {invalid}, got {other:?}"),
            }
        }
    }

    #[test]
    fn sharded_dir_uses_two_level_prefix() {
        let id = RecordId::parse("550e8400e29b41d4a716446655440000").unwrap();
        let dir = id.sharded_dir(Path::new("/data/incoming"));
        assert_eq!(
            dir,
            PathBuf::from("/data/incoming/55/0e/550e8400e29b41d4a716446655440000")
        );
    }

    #[cfg(feature = "serde")]
    #[test]
    fn serde_uses_canonical_string() {
        let id = RecordId::parse("550e8400e29b41d4a716446655440000").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"550e8400e29b41d4a716446655440000\"");

        let err = serde_json::from_str::<RecordId>("\"550e8400-e29b-41d4-a716-446655440000\"");
        assert!(err.is_err());
    }
}
