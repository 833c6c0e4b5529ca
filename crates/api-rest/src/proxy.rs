//! Capability-checked pass-through to the local document server.
//!
//! Every request is introspected and checked against the credentials bound to its token before
//! it reaches the local server. The token's issuer selects the customer whose resources are
//! served. Denials are answered with a FHIR OperationOutcome.

use crate::error::status_for;
use crate::AppState;
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Json, Response},
};
use eoverdracht_core::{
    validate_transition, Customer, DocumentClient, FhirRoute, IntrospectedToken, Operation,
    RemoteError, TransferError,
};
use fhir::{Resource, ResourceType};
use serde_json::{json, Value};

const FHIR_JSON: &str = "application/fhir+json";

#[derive(Debug)]
enum ProxyError {
    Unauthorized(String),
    UnknownTenant(String),
    BadRequest(String),
    Transfer(TransferError),
    Remote(RemoteError),
}

impl From<RemoteError> for ProxyError {
    fn from(err: RemoteError) -> Self {
        ProxyError::Remote(err)
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let (status, code, diagnostics) = match self {
            ProxyError::Unauthorized(message) => (StatusCode::UNAUTHORIZED, "security", message),
            ProxyError::UnknownTenant(message) => (StatusCode::BAD_REQUEST, "security", message),
            ProxyError::BadRequest(message) => (StatusCode::BAD_REQUEST, "invalid", message),
            ProxyError::Transfer(err) => {
                let status = status_for(&err);
                if status.is_server_error() {
                    tracing::error!("fhir proxy error: {}", err);
                } else {
                    tracing::warn!("fhir proxy request rejected: {}", err);
                }
                let code = match status {
                    StatusCode::CONFLICT => "business-rule",
                    status if status.is_server_error() => "exception",
                    _ => "invalid",
                };
                (status, code, err.to_string())
            }
            ProxyError::Remote(RemoteError::NotFound(path)) => (
                StatusCode::NOT_FOUND,
                "not-found",
                format!("{path} not found"),
            ),
            ProxyError::Remote(err) => {
                tracing::error!("local document server error: {}", err);
                (StatusCode::BAD_GATEWAY, "exception", err.to_string())
            }
        };
        fhir_response(status, operation_outcome(code, &diagnostics))
    }
}

fn fhir_response(status: StatusCode, body: Value) -> Response {
    (status, [(header::CONTENT_TYPE, FHIR_JSON)], Json(body)).into_response()
}

pub(crate) fn operation_outcome(code: &str, diagnostics: &str) -> Value {
    json!({
        "resourceType": "OperationOutcome",
        "issue": [{
            "severity": "error",
            "code": code,
            "diagnostics": diagnostics
        }]
    })
}

fn search_bundle(resources: Vec<Value>) -> Value {
    json!({
        "resourceType": "Bundle",
        "type": "searchset",
        "total": resources.len(),
        "entry": resources
            .into_iter()
            .map(|resource| json!({"resource": resource}))
            .collect::<Vec<_>>()
    })
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_owned)
}

pub(crate) async fn forward(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Query(params): Query<Vec<(String, String)>>,
    body: Bytes,
) -> Response {
    let Some(token) = bearer_token(&headers) else {
        return ProxyError::Unauthorized("missing bearer token".into()).into_response();
    };
    let route = match FhirRoute::parse(method.as_str(), uri.path(), &state.proxy_path) {
        Ok(route) => route,
        Err(denied) => return ProxyError::Unauthorized(denied.to_string()).into_response(),
    };

    let outcome =
        tokio::task::spawn_blocking(move || handle(&state, &route, &token, &params, &body)).await;
    match outcome {
        Ok(Ok(body)) => fhir_response(StatusCode::OK, body),
        Ok(Err(err)) => err.into_response(),
        Err(err) => {
            tracing::error!("blocking task failed: {}", err);
            fhir_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                operation_outcome("exception", "Internal error"),
            )
        }
    }
}

fn handle(
    state: &AppState,
    route: &FhirRoute,
    token: &str,
    params: &[(String, String)],
    body: &[u8],
) -> Result<Value, ProxyError> {
    let introspected = state.gateway.introspect(token).map_err(ProxyError::Transfer)?;
    state
        .gateway
        .verify_access(route, &introspected)
        .map_err(|denied| ProxyError::Unauthorized(denied.to_string()))?;
    let customer = tenant(state, &introspected)?;
    let store = state
        .local_stores
        .tenant(&customer.id)
        .map_err(ProxyError::Remote)?;

    match route.operation() {
        Operation::Read if route.is_task_search() => {
            let params: Vec<(&str, &str)> = params
                .iter()
                .map(|(key, value)| (key.as_str(), value.as_str()))
                .collect();
            let resources = store.search(ResourceType::Task, &params)?;
            Ok(search_bundle(resources))
        }
        Operation::Read => Ok(store.read(route.path())?),
        Operation::Update => {
            let value: Value = serde_json::from_slice(body)
                .map_err(|err| ProxyError::BadRequest(format!("invalid JSON body: {err}")))?;
            let resource = Resource::from_json(value.clone())
                .map_err(|err| ProxyError::BadRequest(err.to_string()))?;
            let target = resource
                .reference()
                .map_err(|err| ProxyError::BadRequest(err.to_string()))?;
            if target.path() != route.path() {
                return Err(ProxyError::BadRequest(format!(
                    "resource {target} does not match {}",
                    route.path()
                )));
            }
            if let Resource::Task(task) = &resource {
                check_task_transition(store.as_ref(), route.path(), task)?;
            }
            store.create_or_update(&resource)?;
            tracing::info!("updated {} of {} through the proxy", target, customer.id);
            Ok(value)
        }
        other => Err(ProxyError::BadRequest(format!(
            "{other} is not supported by the proxy"
        ))),
    }
}

/// The customer that issued the access token.
fn tenant(state: &AppState, introspected: &IntrospectedToken) -> Result<Customer, ProxyError> {
    let Some(issuer) = introspected.iss.as_deref() else {
        return Err(ProxyError::UnknownTenant("access token has no issuer".into()));
    };
    state
        .customers
        .find_by_did(issuer)
        .map_err(|err| ProxyError::Transfer(err.into()))?
        .ok_or_else(|| ProxyError::UnknownTenant(format!("no tenant for {issuer}")))
}

/// A Task may only change status along the transition table.
fn check_task_transition(
    store: &dyn DocumentClient,
    path: &str,
    task: &fhir::Task,
) -> Result<(), ProxyError> {
    let current = match store.read(path) {
        Ok(body) => Resource::from_json(body)
            .and_then(Resource::into_task)
            .and_then(|existing| existing.negotiation_status())
            .map_err(|err| ProxyError::Transfer(TransferError::InvalidInput(err.to_string())))?,
        Err(RemoteError::NotFound(_)) => return Ok(()),
        Err(err) => return Err(ProxyError::Remote(err)),
    };
    let next = task
        .negotiation_status()
        .map_err(|err| ProxyError::BadRequest(err.to_string()))?;
    if current != next {
        validate_transition(current, next)
            .map_err(|err| ProxyError::Transfer(TransferError::from(err)))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn extracts_bearer_tokens() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert_eq!(bearer_token(&headers).as_deref(), Some("abc"));
    }

    #[test]
    fn wraps_search_results_in_a_bundle() {
        let bundle = search_bundle(vec![json!({"resourceType": "Task", "id": "1"})]);
        assert_eq!(bundle["type"], "searchset");
        assert_eq!(bundle["total"], 1);
        assert_eq!(bundle["entry"][0]["resource"]["id"], "1");
    }
}
