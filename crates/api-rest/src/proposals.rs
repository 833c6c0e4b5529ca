//! Sender-side transfer endpoints.

use crate::error::{bad_request, ApiResult};
use crate::transfers::{parse_status, UpdateStateReq};
use crate::{run_blocking, AppState};
use axum::{
    extract::{Path as AxumPath, State},
    http::StatusCode,
    response::Json,
};
use chrono::NaiveDate;
use eoverdracht_core::{ListedNegotiation, OutgoingNegotiation, OutgoingTransfer};
use eoverdracht_uuid::RecordId;
use fhir::{CarePlan, CreateTransferRequest, PatientSummary};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateTransferReq {
    #[schema(value_type = String, format = Date)]
    pub transfer_date: NaiveDate,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub care_plan: CarePlan,
    /// Only the postal code is shared with receivers before assignment.
    #[serde(default)]
    pub postal_code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StartNegotiationReq {
    /// DID of the organisation the transfer is offered to.
    pub organization_did: String,
    /// Overrides the transfer date for this offer.
    #[serde(default)]
    #[schema(value_type = Option<String>, format = Date)]
    pub transfer_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AssignReq {
    pub negotiation_id: String,
    /// Local Patient the transfer is about.
    pub patient_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NegotiationRes {
    pub id: String,
    pub task_id: String,
    pub organization_did: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization_name: Option<String>,
    #[schema(format = Date)]
    pub transfer_date: String,
    pub status: String,
    pub updated_at: String,
}

impl From<OutgoingNegotiation> for NegotiationRes {
    fn from(negotiation: OutgoingNegotiation) -> Self {
        Self {
            id: negotiation.id.to_string(),
            task_id: negotiation.task_id,
            organization_did: negotiation.organization_did,
            organization_name: None,
            transfer_date: negotiation.transfer_date.to_string(),
            status: negotiation.status.to_string(),
            updated_at: negotiation.updated_at.to_rfc3339(),
        }
    }
}

impl From<ListedNegotiation> for NegotiationRes {
    fn from(listed: ListedNegotiation) -> Self {
        Self {
            organization_name: listed.organization.map(|organization| organization.name),
            ..NegotiationRes::from(listed.negotiation)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TransferRes {
    pub id: String,
    #[schema(format = Date)]
    pub transfer_date: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_negotiation: Option<String>,
    pub negotiations: Vec<NegotiationRes>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<OutgoingTransfer> for TransferRes {
    fn from(transfer: OutgoingTransfer) -> Self {
        Self {
            id: transfer.id.to_string(),
            transfer_date: transfer.transfer_date.to_string(),
            status: transfer.status.to_string(),
            assigned_negotiation: transfer.assigned_negotiation.map(|id| id.to_string()),
            negotiations: transfer.negotiations.into_iter().map(Into::into).collect(),
            created_at: transfer.created_at.to_rfc3339(),
            updated_at: transfer.updated_at.to_rfc3339(),
        }
    }
}

fn parse_id(value: &str) -> ApiResult<RecordId> {
    RecordId::parse(value).map_err(|err| bad_request(err.to_string()))
}

#[utoipa::path(
    post,
    path = "/customers/{customer_id}/transfers",
    request_body = CreateTransferReq,
    params(("customer_id" = String, Path, description = "Local customer sending the patient")),
    responses(
        (status = 201, description = "Transfer created", body = TransferRes),
        (status = 400, description = "Bad request")
    )
)]
/// Record a new transfer. Nothing is shared until a negotiation is started.
#[axum::debug_handler]
pub(crate) async fn create_transfer(
    State(state): State<AppState>,
    AxumPath(customer_id): AxumPath<String>,
    Json(req): Json<CreateTransferReq>,
) -> ApiResult<(StatusCode, Json<TransferRes>)> {
    let transfer = run_blocking("create transfer", move || {
        state.transfers.customer_did(&customer_id)?;
        let request = CreateTransferRequest {
            transfer_date: req.transfer_date,
            care_plan: req.care_plan,
        };
        let patient = PatientSummary {
            postal_code: req.postal_code,
            ..PatientSummary::default()
        };
        state
            .proposals
            .create_transfer(&customer_id, &request, &patient)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(transfer.into())))
}

#[utoipa::path(
    get,
    path = "/customers/{customer_id}/transfers/{transfer_id}",
    params(
        ("customer_id" = String, Path, description = "Local customer"),
        ("transfer_id" = String, Path, description = "Transfer id")
    ),
    responses(
        (status = 200, description = "Transfer", body = TransferRes),
        (status = 404, description = "No such transfer for the customer")
    )
)]
#[axum::debug_handler]
pub(crate) async fn get_transfer(
    State(state): State<AppState>,
    AxumPath((customer_id, transfer_id)): AxumPath<(String, String)>,
) -> ApiResult<Json<TransferRes>> {
    let transfer_id = parse_id(&transfer_id)?;
    let transfer = run_blocking("get transfer", move || {
        state.proposals.find_transfer(&customer_id, &transfer_id)
    })
    .await?;
    Ok(Json(transfer.into()))
}

#[utoipa::path(
    delete,
    path = "/customers/{customer_id}/transfers/{transfer_id}",
    params(
        ("customer_id" = String, Path, description = "Local customer"),
        ("transfer_id" = String, Path, description = "Transfer id")
    ),
    responses(
        (status = 200, description = "Transfer cancelled", body = TransferRes),
        (status = 404, description = "No such transfer for the customer"),
        (status = 409, description = "Transfer already assigned or completed")
    )
)]
/// Cancel a transfer and withdraw its open negotiations.
#[axum::debug_handler]
pub(crate) async fn cancel_transfer(
    State(state): State<AppState>,
    AxumPath((customer_id, transfer_id)): AxumPath<(String, String)>,
) -> ApiResult<Json<TransferRes>> {
    let transfer_id = parse_id(&transfer_id)?;
    let transfer = run_blocking("cancel transfer", move || {
        let sender_did = state.transfers.customer_did(&customer_id)?;
        state
            .proposals
            .cancel_transfer(&customer_id, &sender_did, &transfer_id)
    })
    .await?;
    Ok(Json(transfer.into()))
}

#[utoipa::path(
    post,
    path = "/customers/{customer_id}/transfers/{transfer_id}/negotiations",
    request_body = StartNegotiationReq,
    params(
        ("customer_id" = String, Path, description = "Local customer sending the patient"),
        ("transfer_id" = String, Path, description = "Transfer id")
    ),
    responses(
        (status = 201, description = "Proposal published and announced", body = NegotiationRes),
        (status = 404, description = "Unknown customer or transfer"),
        (status = 409, description = "Transfer no longer open"),
        (status = 422, description = "Customer has no DID"),
        (status = 502, description = "Local document server unavailable")
    )
)]
/// Offer the transfer to a receiving organisation.
#[axum::debug_handler]
pub(crate) async fn start_negotiation(
    State(state): State<AppState>,
    AxumPath((customer_id, transfer_id)): AxumPath<(String, String)>,
    Json(req): Json<StartNegotiationReq>,
) -> ApiResult<(StatusCode, Json<NegotiationRes>)> {
    let transfer_id = parse_id(&transfer_id)?;
    let negotiation = run_blocking("start negotiation", move || {
        let sender_did = state.transfers.customer_did(&customer_id)?;
        state.proposals.start_negotiation(
            &customer_id,
            &sender_did,
            &transfer_id,
            &req.organization_did,
            req.transfer_date,
        )
    })
    .await?;
    Ok((StatusCode::CREATED, Json(negotiation.into())))
}

#[utoipa::path(
    get,
    path = "/customers/{customer_id}/transfers/{transfer_id}/negotiations",
    params(
        ("customer_id" = String, Path, description = "Local customer"),
        ("transfer_id" = String, Path, description = "Transfer id")
    ),
    responses(
        (status = 200, description = "Negotiations of the transfer", body = [NegotiationRes]),
        (status = 404, description = "No such transfer for the customer")
    )
)]
#[axum::debug_handler]
pub(crate) async fn list_negotiations(
    State(state): State<AppState>,
    AxumPath((customer_id, transfer_id)): AxumPath<(String, String)>,
) -> ApiResult<Json<Vec<NegotiationRes>>> {
    let transfer_id = parse_id(&transfer_id)?;
    let negotiations = run_blocking("list negotiations", move || {
        state.proposals.list_negotiations(&customer_id, &transfer_id)
    })
    .await?;
    Ok(Json(negotiations.into_iter().map(Into::into).collect()))
}

#[utoipa::path(
    put,
    path = "/customers/{customer_id}/transfers/{transfer_id}/negotiations/{negotiation_id}/status",
    request_body = UpdateStateReq,
    params(
        ("customer_id" = String, Path, description = "Local customer"),
        ("transfer_id" = String, Path, description = "Transfer id"),
        ("negotiation_id" = String, Path, description = "Negotiation id")
    ),
    responses(
        (status = 200, description = "Status changed and announced", body = NegotiationRes),
        (status = 400, description = "Bad request"),
        (status = 404, description = "Unknown transfer or negotiation"),
        (status = 409, description = "Status change not allowed")
    )
)]
#[axum::debug_handler]
pub(crate) async fn update_negotiation_status(
    State(state): State<AppState>,
    AxumPath((customer_id, transfer_id, negotiation_id)): AxumPath<(String, String, String)>,
    Json(req): Json<UpdateStateReq>,
) -> ApiResult<Json<NegotiationRes>> {
    let transfer_id = parse_id(&transfer_id)?;
    let negotiation_id = parse_id(&negotiation_id)?;
    let status = parse_status(&req.status)?;
    let negotiation = run_blocking("update negotiation status", move || {
        let sender_did = state.transfers.customer_did(&customer_id)?;
        state.proposals.update_negotiation_status(
            &customer_id,
            &sender_did,
            &transfer_id,
            &negotiation_id,
            status,
        )
    })
    .await?;
    Ok(Json(negotiation.into()))
}

#[utoipa::path(
    put,
    path = "/customers/{customer_id}/transfers/{transfer_id}/assign",
    request_body = AssignReq,
    params(
        ("customer_id" = String, Path, description = "Local customer sending the patient"),
        ("transfer_id" = String, Path, description = "Transfer id")
    ),
    responses(
        (status = 200, description = "Transfer assigned, nursing handoff attached", body = TransferRes),
        (status = 403, description = "Task not requested by the customer"),
        (status = 404, description = "Unknown transfer or negotiation"),
        (status = 409, description = "Negotiation not accepted or transfer no longer open"),
        (status = 502, description = "Proposal documents unavailable or malformed")
    )
)]
/// Assign the transfer to the organisation of an accepted negotiation.
#[axum::debug_handler]
pub(crate) async fn assign_transfer(
    State(state): State<AppState>,
    AxumPath((customer_id, transfer_id)): AxumPath<(String, String)>,
    Json(req): Json<AssignReq>,
) -> ApiResult<Json<TransferRes>> {
    let transfer_id = parse_id(&transfer_id)?;
    let negotiation_id = parse_id(&req.negotiation_id)?;
    let transfer = run_blocking("assign transfer", move || {
        let sender_did = state.transfers.customer_did(&customer_id)?;
        state.proposals.assign(
            &customer_id,
            &sender_did,
            &transfer_id,
            &negotiation_id,
            &req.patient_id,
        )
    })
    .await?;
    Ok(Json(transfer.into()))
}
