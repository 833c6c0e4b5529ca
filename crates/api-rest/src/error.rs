//! Mapping of core errors onto HTTP responses.

use axum::http::StatusCode;
use eoverdracht_core::{RemoteError, TransferError};

/// Error half of every handler result: a status and a message for the caller.
pub type ApiError = (StatusCode, String);

pub type ApiResult<T> = Result<T, ApiError>;

pub fn status_for(err: &TransferError) -> StatusCode {
    match err {
        TransferError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        TransferError::UnknownCustomer(_)
        | TransferError::UnknownTransfer(_)
        | TransferError::UnknownNegotiation(_) => StatusCode::NOT_FOUND,
        TransferError::InvalidTransition(_)
        | TransferError::TransferClosed { .. }
        | TransferError::ProposalNotAccepted { .. } => StatusCode::CONFLICT,
        TransferError::CustomerWithoutDid(_) => StatusCode::UNPROCESSABLE_ENTITY,
        TransferError::AccessDenied(_) | TransferError::NotRequester { .. } => {
            StatusCode::FORBIDDEN
        }
        TransferError::Remote {
            source: RemoteError::NotFound(_),
            ..
        } => StatusCode::NOT_FOUND,
        TransferError::MalformedDocument { .. }
        | TransferError::Remote { .. }
        | TransferError::Node { .. } => StatusCode::BAD_GATEWAY,
        TransferError::ReconciliationGap { .. }
        | TransferError::Completion { .. }
        | TransferError::Repository(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Log `err` and turn it into a response. Server-side failures keep their detail in the log.
pub fn transfer_error(context: &str, err: TransferError) -> ApiError {
    let status = status_for(&err);
    if status.is_server_error() {
        tracing::error!("{} error: {}", context, err);
    } else {
        tracing::warn!("{} rejected: {}", context, err);
    }
    let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
        "Internal error".to_owned()
    } else {
        err.to_string()
    };
    (status, message)
}

pub fn bad_request(message: impl Into<String>) -> ApiError {
    (StatusCode::BAD_REQUEST, message.into())
}

pub fn join_error(err: tokio::task::JoinError) -> ApiError {
    tracing::error!("blocking task failed: {}", err);
    (StatusCode::INTERNAL_SERVER_ERROR, "Internal error".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use eoverdracht_core::{validate_transition, TransferStatus};
    use fhir::NegotiationStatus;

    #[test]
    fn maps_errors_to_statuses() {
        let invalid = validate_transition(NegotiationStatus::Completed, NegotiationStatus::Requested)
            .map_err(TransferError::from)
            .unwrap_err();
        assert_eq!(status_for(&invalid), StatusCode::CONFLICT);

        let missing = TransferError::Remote {
            context: "fetching /Task/1".into(),
            source: RemoteError::NotFound("/Task/1".into()),
        };
        assert_eq!(status_for(&missing), StatusCode::NOT_FOUND);

        let unavailable = TransferError::Remote {
            context: "fetching /Task/1".into(),
            source: RemoteError::Status {
                path: "/Task/1".into(),
                status: 503,
                body: String::new(),
            },
        };
        assert_eq!(status_for(&unavailable), StatusCode::BAD_GATEWAY);

        let (status, message) =
            transfer_error("test", TransferError::UnknownCustomer("9".into()));
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(message.contains('9'));
    }

    #[test]
    fn maps_sender_side_refusals() {
        let closed = TransferError::TransferClosed {
            transfer_id: "x".into(),
            status: TransferStatus::Assigned,
        };
        assert_eq!(status_for(&closed), StatusCode::CONFLICT);

        let early = TransferError::ProposalNotAccepted {
            task_id: "t1".into(),
            status: NegotiationStatus::Requested,
        };
        assert_eq!(status_for(&early), StatusCode::CONFLICT);

        let stranger = TransferError::NotRequester {
            task_id: "t1".into(),
            did: "did:nuts:other".into(),
        };
        assert_eq!(status_for(&stranger), StatusCode::FORBIDDEN);
        assert_eq!(
            status_for(&TransferError::UnknownNegotiation("n".into())),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn hides_internal_detail() {
        let gap = TransferError::ReconciliationGap {
            task_id: "1".into(),
            remote_status: NegotiationStatus::Accepted,
            source: Box::new(TransferError::InvalidInput("disk full".into())),
        };
        let (status, message) = transfer_error("test", gap);
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(message, "Internal error");
    }
}
