//! # API REST
//!
//! REST API implementation for eOverdracht.
//!
//! Handles:
//! - negotiation endpoints for the receiving side with axum
//! - transfer and negotiation endpoints for the sending side
//! - the capability-checked pass-through to each customer's documents
//! - OpenAPI/Swagger documentation
//!
//! Core operations block on HTTP and file I/O, so every handler runs them on
//! [`tokio::task::spawn_blocking`].

#![warn(rust_2018_idioms)]

pub mod error;
mod proposals;
mod proxy;
mod transfers;

use axum::{
    response::Json,
    routing::{get, post, put},
    Router,
};
use eoverdracht_core::{
    AuthorizationGateway, CoreConfig, CustomerRepository, FileIncomingTransferRepository,
    FileOutgoingTransferRepository, HttpClientFactory, HttpTenantStore, HttpTransferNotifier,
    JsonFileCustomerRepository, NutsNodeClient, ProposalService, TenantStore, TransferResult,
    TransferService,
};
use error::{join_error, transfer_error, ApiResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use utoipa::{OpenApi, ToSchema};
use utoipa_swagger_ui::SwaggerUi;

pub use proposals::{
    AssignReq, CreateTransferReq, NegotiationRes, StartNegotiationReq, TransferRes,
};
pub use transfers::{IncomingTransferRes, NotifyReq, TransferRequestRes, UpdateStateReq};

/// Application state shared across REST API handlers.
#[derive(Clone)]
pub struct AppState {
    transfers: Arc<TransferService>,
    proposals: Arc<ProposalService>,
    gateway: AuthorizationGateway,
    customers: Arc<dyn CustomerRepository>,
    local_stores: Arc<dyn TenantStore>,
    proxy_path: Arc<str>,
}

impl AppState {
    pub fn new(
        transfers: Arc<TransferService>,
        proposals: Arc<ProposalService>,
        gateway: AuthorizationGateway,
        customers: Arc<dyn CustomerRepository>,
        local_stores: Arc<dyn TenantStore>,
        proxy_path: &str,
    ) -> Self {
        Self {
            transfers,
            proposals,
            gateway,
            customers,
            local_stores,
            proxy_path: Arc::from(proxy_path.trim_end_matches('/')),
        }
    }

    /// Wire the HTTP adapters described by `cfg`.
    ///
    /// Builds blocking HTTP clients, so call it outside of the async runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if an HTTP client cannot be built or the customers file is invalid.
    pub fn from_config(cfg: Arc<CoreConfig>) -> anyhow::Result<Self> {
        let node = Arc::new(NutsNodeClient::new(
            cfg.nuts_node_address(),
            cfg.http_timeout(),
        )?);
        let clients = Arc::new(HttpClientFactory::new(cfg.http_timeout())?);
        let local_stores: Arc<dyn TenantStore> = Arc::new(HttpTenantStore::new(
            clients.http().clone(),
            cfg.local_fhir_url(),
            cfg.multi_tenancy(),
        ));
        let customers: Arc<dyn CustomerRepository> =
            Arc::new(JsonFileCustomerRepository::open(cfg.customers_file())?);

        let gateway = AuthorizationGateway::new(node.clone(), node.clone(), node.clone())
            .with_service_name(cfg.service_name());
        let transfers = TransferService::new(
            Arc::new(FileIncomingTransferRepository::new(cfg.clone())),
            customers.clone(),
            gateway.clone(),
            node.clone(),
            clients.clone(),
            local_stores.clone(),
        );
        let notifier = HttpTransferNotifier::new(clients.http().clone(), node.clone());
        let proposals = ProposalService::new(
            Arc::new(FileOutgoingTransferRepository::new(cfg.clone())),
            node,
            local_stores.clone(),
            Arc::new(notifier),
        );

        Ok(Self::new(
            Arc::new(transfers),
            Arc::new(proposals),
            gateway,
            customers,
            local_stores,
            cfg.fhir_proxy_path(),
        ))
    }
}

/// Run a core operation off the async runtime.
pub(crate) async fn run_blocking<T, F>(context: &'static str, operation: F) -> ApiResult<T>
where
    F: FnOnce() -> TransferResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(operation)
        .await
        .map_err(join_error)?
        .map_err(|err| transfer_error(context, err))
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthRes {
    pub ok: bool,
    pub message: String,
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health,
        transfers::notify,
        transfers::get_transfer_request,
        transfers::update_transfer_request_state,
        transfers::get_incoming_transfer,
        proposals::create_transfer,
        proposals::get_transfer,
        proposals::cancel_transfer,
        proposals::start_negotiation,
        proposals::list_negotiations,
        proposals::update_negotiation_status,
        proposals::assign_transfer,
    ),
    components(schemas(
        HealthRes,
        NotifyReq,
        UpdateStateReq,
        IncomingTransferRes,
        TransferRequestRes,
        CreateTransferReq,
        StartNegotiationReq,
        AssignReq,
        NegotiationRes,
        TransferRes,
    ))
)]
struct ApiDoc;

/// Build the REST router.
pub fn router(state: AppState) -> Router {
    let proxy_route = format!("{}/*path", state.proxy_path);
    Router::new()
        .route("/health", get(health))
        .route("/external/transfer/notify", post(transfers::notify))
        .route(
            "/customers/:customer_id/transfer-requests/:requester_did/:task_id",
            get(transfers::get_transfer_request),
        )
        .route(
            "/customers/:customer_id/transfer-requests/:requester_did/:task_id/state",
            put(transfers::update_transfer_request_state),
        )
        .route(
            "/customers/:customer_id/incoming-transfers/:id",
            get(transfers::get_incoming_transfer),
        )
        .route(
            "/customers/:customer_id/transfers",
            post(proposals::create_transfer),
        )
        .route(
            "/customers/:customer_id/transfers/:transfer_id",
            get(proposals::get_transfer).delete(proposals::cancel_transfer),
        )
        .route(
            "/customers/:customer_id/transfers/:transfer_id/negotiations",
            post(proposals::start_negotiation).get(proposals::list_negotiations),
        )
        .route(
            "/customers/:customer_id/transfers/:transfer_id/negotiations/:negotiation_id/status",
            put(proposals::update_negotiation_status),
        )
        .route(
            "/customers/:customer_id/transfers/:transfer_id/assign",
            put(proposals::assign_transfer),
        )
        .route(&proxy_route, get(proxy::forward).put(proxy::forward))
        .merge(
            SwaggerUi::new("/swagger-ui/{_:.*}").url("/api-docs/openapi.json", ApiDoc::openapi()),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Health check response", body = HealthRes)
    )
)]
/// Health check endpoint for monitoring and load balancers.
#[axum::debug_handler]
async fn health() -> Json<HealthRes> {
    Json(HealthRes {
        ok: true,
        message: "eOverdracht REST API is alive".into(),
    })
}
