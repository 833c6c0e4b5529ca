use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api_rest::AppState;
use eoverdracht_core::constants::{
    DEFAULT_CUSTOMERS_FILENAME, DEFAULT_DATA_DIR, DEFAULT_FHIR_PROXY_PATH, SENDER_SERVICE_NAME,
};
use eoverdracht_core::CoreConfig;

/// Main entry point for the eOverdracht application
///
/// Starts the REST server, including the capability-checked FHIR proxy.
///
/// # Environment Variables
/// - `EOVERDRACHT_REST_ADDR`: REST server address (default: "0.0.0.0:3000")
/// - `EOVERDRACHT_DATA_DIR`: Directory for negotiation records (default: "eoverdracht_data")
/// - `EOVERDRACHT_CUSTOMERS_FILE`: Customers JSON file (default: "<data dir>/customers.json")
/// - `NUTS_NODE_ADDRESS`: Identity node base URL (default: "http://localhost:1323")
/// - `LOCAL_FHIR_URL`: Local document server base URL (default: "http://localhost:8080/fhir")
/// - `FHIR_PROXY_PATH`: Path the proxy is mounted on (default: "/fhir")
/// - `EOVERDRACHT_SERVICE_NAME`: Service inbound tokens must declare (default: "eOverdracht-sender")
/// - `EOVERDRACHT_MULTI_TENANCY`: Serve each customer below `LOCAL_FHIR_URL/<customer id>`
///   (default: "true")
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("eoverdracht=info".parse()?)
                .add_directive("api_rest=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let rest_addr =
        std::env::var("EOVERDRACHT_REST_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());
    let data_dir = PathBuf::from(
        std::env::var("EOVERDRACHT_DATA_DIR").unwrap_or_else(|_| DEFAULT_DATA_DIR.into()),
    );
    let customers_file = std::env::var("EOVERDRACHT_CUSTOMERS_FILE")
        .map(PathBuf::from)
        .unwrap_or_else(|_| data_dir.join(DEFAULT_CUSTOMERS_FILENAME));

    let multi_tenancy = match std::env::var("EOVERDRACHT_MULTI_TENANCY") {
        Ok(value) => value.trim().parse::<bool>().map_err(|_| {
            anyhow::anyhow!("EOVERDRACHT_MULTI_TENANCY must be true or false, got {value:?}")
        })?,
        Err(_) => true,
    };

    let cfg = Arc::new(CoreConfig::new(
        data_dir,
        customers_file,
        std::env::var("NUTS_NODE_ADDRESS").unwrap_or_else(|_| "http://localhost:1323".into()),
        std::env::var("LOCAL_FHIR_URL").unwrap_or_else(|_| "http://localhost:8080/fhir".into()),
        std::env::var("FHIR_PROXY_PATH").unwrap_or_else(|_| DEFAULT_FHIR_PROXY_PATH.into()),
        std::env::var("EOVERDRACHT_SERVICE_NAME").unwrap_or_else(|_| SENDER_SERVICE_NAME.into()),
    )?
    .with_multi_tenancy(multi_tenancy));

    tracing::info!("++ Using identity node {}", cfg.nuts_node_address());
    tracing::info!(
        "++ Proxying {} to {} (multi-tenant: {})",
        cfg.fhir_proxy_path(),
        cfg.local_fhir_url(),
        cfg.multi_tenancy()
    );

    // Blocking HTTP clients must not be built on the async runtime.
    let state = tokio::task::spawn_blocking(move || AppState::from_config(cfg)).await??;

    tracing::info!("++ Starting eOverdracht REST on {}", rest_addr);
    let listener = tokio::net::TcpListener::bind(&rest_addr).await?;
    axum::serve(listener, api_rest::router(state)).await?;

    Ok(())
}
