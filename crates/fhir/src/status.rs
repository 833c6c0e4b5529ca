//! Negotiation status as carried in `Task.status`.

use crate::FhirError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Status of a transfer negotiation.
///
/// The wire values are the lowercase, hyphenated tokens of the FHIR Task status value set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NegotiationStatus {
    Requested,
    Accepted,
    Rejected,
    OnHold,
    InProgress,
    Completed,
    Cancelled,
}

impl NegotiationStatus {
    pub const ALL: [NegotiationStatus; 7] = [
        NegotiationStatus::Requested,
        NegotiationStatus::Accepted,
        NegotiationStatus::Rejected,
        NegotiationStatus::OnHold,
        NegotiationStatus::InProgress,
        NegotiationStatus::Completed,
        NegotiationStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NegotiationStatus::Requested => "requested",
            NegotiationStatus::Accepted => "accepted",
            NegotiationStatus::Rejected => "rejected",
            NegotiationStatus::OnHold => "on-hold",
            NegotiationStatus::InProgress => "in-progress",
            NegotiationStatus::Completed => "completed",
            NegotiationStatus::Cancelled => "cancelled",
        }
    }

    /// Terminal negotiations accept no further status changes.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NegotiationStatus::Completed | NegotiationStatus::Cancelled | NegotiationStatus::Rejected
        )
    }
}

impl fmt::Display for NegotiationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NegotiationStatus {
    type Err = FhirError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NegotiationStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| FhirError::UnknownStatus(s.to_owned()))
    }
}
