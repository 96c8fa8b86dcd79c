//! OpenAPI documentation and schema generation
//!
//! Describes the imsearch-dl REST API using utoipa for compile-time spec generation.

use utoipa::OpenApi;

/// OpenAPI documentation for the imsearch-dl REST API
///
/// The spec can be accessed via:
/// - `/openapi.json` - JSON format OpenAPI specification
/// - `/swagger-ui` - Interactive Swagger UI documentation (if enabled)
#[derive(OpenApi)]
#[openapi(
    info(
        title = "imsearch-dl REST API",
        version = "0.1.0",
        description = "Image search across web providers with concurrent download, thumbnailing and optional post-processing",
        license(
            name = "MIT OR Apache-2.0"
        )
    ),
    servers(
        (url = "http://localhost:8157", description = "Local development server")
    ),
    paths(
        // Search and acquisition
        crate::api::routes::index,
        crate::api::routes::query,
        crate::api::routes::download,
        crate::api::routes::exec_pipeline,
        crate::api::routes::get_engine_list,
        crate::api::routes::get_postproc_module_list,

        // System
        crate::api::routes::health_check,
        crate::api::routes::openapi_spec,
        crate::api::routes::event_stream,
    ),
    components(schemas(
        // Core types from types.rs
        crate::types::NormalizedResult,
        crate::types::ImageDescriptor,
        crate::types::ImageSize,
        crate::types::ImageStyle,
        crate::types::QueryParams,
        crate::types::ResizePolicy,
        crate::types::TaskState,
        crate::types::Event,

        // Config types from config.rs
        crate::config::Config,
        crate::config::ServiceConfig,
        crate::config::ProvidersConfig,
        crate::config::PagingConfig,
        crate::config::AcquisitionConfig,
        crate::config::ApiConfig,

        // Request types from routes
        crate::api::routes::ExecPipelineForm,

        // Error types from error.rs
        crate::error::ApiError,
        crate::error::ErrorDetail,
    )),
    tags(
        (name = "search", description = "Search providers, download results, run the combined pipeline"),
        (name = "system", description = "System endpoints - Health checks, OpenAPI spec, events"),
    )
)]
pub struct ApiDoc;
