//! The negotiation status graph.

use fhir::NegotiationStatus::{self, *};

/// A status change outside the allowed graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("invalid status transition from '{from}' to '{to}'")]
pub struct InvalidTransition {
    pub from: NegotiationStatus,
    pub to: NegotiationStatus,
}

/// Every allowed status change. Anything not listed, self-transitions included, is invalid.
pub const ALLOWED_TRANSITIONS: [(NegotiationStatus, NegotiationStatus); 7] = [
    (Requested, Accepted),
    (Requested, Rejected),
    (Requested, OnHold),
    (OnHold, Requested),
    (OnHold, Cancelled),
    (Accepted, InProgress),
    (InProgress, Completed),
];

/// Check a status change against [`ALLOWED_TRANSITIONS`].
///
/// Callers treat `from == to` as an idempotent no-op before calling this; it is not a valid
/// transition.
pub fn validate_transition(
    from: NegotiationStatus,
    to: NegotiationStatus,
) -> Result<(), InvalidTransition> {
    if ALLOWED_TRANSITIONS.contains(&(from, to)) {
        Ok(())
    } else {
        Err(InvalidTransition { from, to })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_listed_edges_are_allowed() {
        for from in NegotiationStatus::ALL {
            for to in NegotiationStatus::ALL {
                let listed = ALLOWED_TRANSITIONS.contains(&(from, to));
                assert_eq!(
                    validate_transition(from, to).is_ok(),
                    listed,
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn self_transitions_are_rejected() {
        for status in NegotiationStatus::ALL {
            assert_eq!(
                validate_transition(status, status),
                Err(InvalidTransition {
                    from: status,
                    to: status
                })
            );
        }
    }

    #[test]
    fn spot_checks() {
        assert!(validate_transition(Accepted, InProgress).is_ok());
        assert!(validate_transition(OnHold, Cancelled).is_ok());
        assert!(validate_transition(Accepted, Rejected).is_err());
        assert!(validate_transition(Requested, Completed).is_err());
        assert!(validate_transition(Completed, Requested).is_err());
    }

    #[test]
    fn terminal_states_have_no_outgoing_edges() {
        for (from, _) in ALLOWED_TRANSITIONS {
            assert!(!from.is_terminal(), "{from} is terminal");
        }
    }

    #[test]
    fn error_message_uses_wire_values() {
        let err = validate_transition(Accepted, OnHold).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid status transition from 'accepted' to 'on-hold'"
        );
    }
}
