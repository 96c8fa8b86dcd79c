//! REST API server module
//!
//! Exposes search, download and the combined query-and-download pipeline over
//! HTTP, plus the downloaded files themselves under `/static`.

use crate::{ImageSearchService, Result};
use axum::{Router, http::HeaderValue, routing::get, routing::post};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub mod error_response;
pub mod openapi;
pub mod routes;
pub mod state;

pub use openapi::ApiDoc;
pub use state::AppState;

/// Create the API router with all route definitions
///
/// # Routes
///
/// ## Search and acquisition
/// - `GET /` - Liveness text
/// - `GET /query` - Run a search
/// - `POST /download` - Acquire a JSON list of results
/// - `POST /exec_pipeline` - Search, then acquire (form encoded)
/// - `GET /get_engine_list` - Enabled engines
/// - `GET /get_postproc_module_list` - Available post-process modules
/// - `GET /static/*` - Downloaded files
///
/// ## System
/// - `GET /health` - Health check
/// - `GET /openapi.json` - OpenAPI specification
/// - `GET /swagger-ui` - Interactive Swagger UI documentation (if enabled)
/// - `GET /events` - Server-sent events stream
pub fn create_router(service: Arc<ImageSearchService>) -> Router {
    let api = service.config().api.clone();
    let static_dir = service.static_dir();
    let state = AppState::new(service);

    let router = Router::new()
        .route("/", get(routes::index))
        .route("/query", get(routes::query))
        .route("/download", post(routes::download))
        .route("/exec_pipeline", post(routes::exec_pipeline))
        .route("/get_engine_list", get(routes::get_engine_list))
        .route(
            "/get_postproc_module_list",
            get(routes::get_postproc_module_list),
        )
        // System
        .route("/health", get(routes::health_check))
        .route("/openapi.json", get(routes::openapi_spec))
        .route("/events", get(routes::event_stream))
        .nest_service("/static", ServeDir::new(static_dir));

    // SwaggerUi registers its own spec route, so it gets a path distinct from /openapi.json
    let router = if api.swagger_ui {
        router.merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
    } else {
        router
    };

    let router = router.with_state(state).layer(TraceLayer::new_for_http());

    if api.cors_enabled {
        router.layer(build_cors_layer(&api.cors_origins))
    } else {
        router
    }
}

/// Build a CORS layer based on configured origins
///
/// `"*"` (or an empty list) allows any origin.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let allow_any = origins.iter().any(|o| o == "*");

    if allow_any || origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let allowed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(AllowOrigin::list(allowed))
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

/// Start the API server on the configured bind address.
///
/// Runs until the server fails. See [`start_api_server_with_shutdown`] for a
/// server that stops on a signal.
///
/// # Example
///
/// ```no_run
/// use imsearch_dl::{Config, ImageSearchService};
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let service = Arc::new(ImageSearchService::new(Config::default())?);
///
/// // Start API server (blocks until shutdown)
/// imsearch_dl::api::start_api_server(service).await?;
/// # Ok(())
/// # }
/// ```
pub async fn start_api_server(service: Arc<ImageSearchService>) -> Result<()> {
    start_api_server_with_shutdown(service, std::future::pending()).await
}

/// Start the API server and stop accepting connections once `shutdown` resolves.
///
/// In-flight requests are allowed to finish.
pub async fn start_api_server_with_shutdown<F>(
    service: Arc<ImageSearchService>,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let bind_address = service.config().api.bind_address;

    tracing::info!(address = %bind_address, "Starting API server");

    let app = create_router(service);

    let listener = TcpListener::bind(bind_address)
        .await
        .map_err(crate::error::Error::Io)?;

    tracing::info!(
        address = %listener.local_addr().map_err(crate::error::Error::Io)?,
        "API server listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| crate::error::Error::ApiServerError(e.to_string()))?;

    tracing::info!("API server stopped");
    Ok(())
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
