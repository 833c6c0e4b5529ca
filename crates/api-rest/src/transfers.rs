//! Receiver-side negotiation endpoints.

use crate::error::{bad_request, ApiResult};
use crate::{run_blocking, AppState};
use axum::{
    extract::{Path as AxumPath, State},
    http::{HeaderMap, StatusCode},
    response::Json,
};
use chrono::NaiveDate;
use eoverdracht_core::{IncomingTransfer, Organization, TransferError, TransferRequest};
use eoverdracht_uuid::RecordId;
use fhir::{NegotiationStatus, TransferProperties};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Header carrying the DID of the organisation sending a notification.
pub const SENDER_HEADER: &str = "x-sender";

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NotifyReq {
    pub task_owner_did: String,
    pub task_id: String,
    pub status: String,
    /// Date the sender proposes for the transfer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>, format = Date)]
    pub transfer_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UpdateStateReq {
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct IncomingTransferRes {
    pub id: String,
    pub task_id: String,
    pub customer_id: String,
    pub sender_did: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(format = Date)]
    pub transfer_date: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<IncomingTransfer> for IncomingTransferRes {
    fn from(transfer: IncomingTransfer) -> Self {
        Self {
            id: transfer.id.to_string(),
            task_id: transfer.task_id,
            customer_id: transfer.customer_id,
            sender_did: transfer.sender_did,
            status: transfer.status.to_string(),
            transfer_date: transfer.transfer_date.map(|date| date.to_string()),
            created_at: transfer.created_at.to_rfc3339(),
            updated_at: transfer.updated_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TransferRequestRes {
    #[schema(value_type = Object)]
    pub sender: Organization,
    pub status: String,
    #[schema(value_type = Object)]
    pub advance_notice: TransferProperties,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub nursing_handoff: Option<TransferProperties>,
}

impl From<TransferRequest> for TransferRequestRes {
    fn from(request: TransferRequest) -> Self {
        Self {
            sender: request.sender,
            status: request.status.to_string(),
            advance_notice: request.advance_notice,
            nursing_handoff: request.nursing_handoff,
        }
    }
}

pub(crate) fn parse_status(value: &str) -> ApiResult<NegotiationStatus> {
    value
        .parse::<NegotiationStatus>()
        .map_err(|err| bad_request(err.to_string()))
}

#[utoipa::path(
    post,
    path = "/external/transfer/notify",
    request_body = NotifyReq,
    params(("X-Sender" = String, Header, description = "DID of the sending organisation")),
    responses(
        (status = 200, description = "Negotiation recorded", body = IncomingTransferRes),
        (status = 400, description = "Bad request"),
        (status = 404, description = "No customer with the task owner DID"),
        (status = 409, description = "Status change not allowed"),
        (status = 500, description = "Internal server error")
    )
)]
/// Record a status notification about a Task owned by another organisation.
///
/// The task owner DID selects the local customer the Task was offered to.
#[axum::debug_handler]
pub(crate) async fn notify(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<NotifyReq>,
) -> ApiResult<Json<IncomingTransferRes>> {
    let sender_did = headers
        .get(SENDER_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| bad_request("missing X-Sender header"))?
        .trim()
        .to_owned();
    let status = parse_status(&req.status)?;

    let transfer = run_blocking("notify", move || {
        let customer = state
            .customers
            .find_by_did(&req.task_owner_did)?
            .ok_or_else(|| TransferError::UnknownCustomer(req.task_owner_did.clone()))?;
        state.transfers.create_or_update(
            status,
            &customer.id,
            &req.task_owner_did,
            &sender_did,
            &req.task_id,
            req.transfer_date,
        )
    })
    .await?;
    Ok(Json(transfer.into()))
}

#[utoipa::path(
    get,
    path = "/customers/{customer_id}/transfer-requests/{requester_did}/{task_id}",
    params(
        ("customer_id" = String, Path, description = "Local customer"),
        ("requester_did" = String, Path, description = "DID of the sending organisation"),
        ("task_id" = String, Path, description = "Task on the sender's document server")
    ),
    responses(
        (status = 200, description = "Transfer request", body = TransferRequestRes),
        (status = 404, description = "Unknown customer or task"),
        (status = 502, description = "Sender's documents unavailable or malformed")
    )
)]
/// Show the proposal a sender made to a customer.
#[axum::debug_handler]
pub(crate) async fn get_transfer_request(
    State(state): State<AppState>,
    AxumPath((customer_id, requester_did, task_id)): AxumPath<(String, String, String)>,
) -> ApiResult<Json<TransferRequestRes>> {
    let request = run_blocking("get transfer request", move || {
        state
            .transfers
            .get_transfer_request(&customer_id, &requester_did, &task_id)
    })
    .await?;
    Ok(Json(request.into()))
}

#[utoipa::path(
    put,
    path = "/customers/{customer_id}/transfer-requests/{requester_did}/{task_id}/state",
    request_body = UpdateStateReq,
    params(
        ("customer_id" = String, Path, description = "Local customer"),
        ("requester_did" = String, Path, description = "DID of the sending organisation"),
        ("task_id" = String, Path, description = "Task on the sender's document server")
    ),
    responses(
        (status = 200, description = "Status changed", body = IncomingTransferRes),
        (status = 400, description = "Bad request"),
        (status = 409, description = "Status change not allowed"),
        (status = 500, description = "Remote task changed but local record not updated"),
        (status = 502, description = "Sender's document server unavailable")
    )
)]
/// Accept, reject or otherwise change the status of a sender's Task.
#[axum::debug_handler]
pub(crate) async fn update_transfer_request_state(
    State(state): State<AppState>,
    AxumPath((customer_id, requester_did, task_id)): AxumPath<(String, String, String)>,
    Json(req): Json<UpdateStateReq>,
) -> ApiResult<Json<IncomingTransferRes>> {
    let status = parse_status(&req.status)?;
    let transfer = run_blocking("update transfer request state", move || {
        state
            .transfers
            .update_transfer_request_state(&customer_id, &requester_did, &task_id, status)
    })
    .await?;
    Ok(Json(transfer.into()))
}

#[utoipa::path(
    get,
    path = "/customers/{customer_id}/incoming-transfers/{id}",
    params(
        ("customer_id" = String, Path, description = "Local customer"),
        ("id" = String, Path, description = "Negotiation record id")
    ),
    responses(
        (status = 200, description = "Negotiation record", body = IncomingTransferRes),
        (status = 400, description = "Invalid id"),
        (status = 404, description = "No such negotiation for the customer")
    )
)]
#[axum::debug_handler]
pub(crate) async fn get_incoming_transfer(
    State(state): State<AppState>,
    AxumPath((customer_id, id)): AxumPath<(String, String)>,
) -> ApiResult<Json<IncomingTransferRes>> {
    let id = RecordId::parse(&id).map_err(|err| bad_request(err.to_string()))?;
    let transfer = run_blocking("get incoming transfer", move || {
        state.transfers.find_incoming_transfer(&customer_id, &id)
    })
    .await?
    .ok_or_else(|| (StatusCode::NOT_FOUND, "Incoming transfer not found".to_owned()))?;
    Ok(Json(transfer.into()))
}
