//! Search handlers: query, download, exec_pipeline, engine and module lists.

use super::{ExecPipelineForm, SearchQuery, public_descriptors};
use crate::api::AppState;
use crate::error::Error;
use crate::types::{ImageDescriptor, NormalizedResult};
use axum::{
    Form, Json,
    extract::{
        Host, Query, State,
        rejection::{FormRejection, JsonRejection, QueryRejection},
    },
    response::{IntoResponse, Response},
};

/// GET / - Liveness text
#[utoipa::path(
    get,
    path = "/",
    tag = "search",
    responses(
        (status = 200, description = "Service is running", content_type = "text/plain")
    )
)]
pub async fn index() -> &'static str {
    "imsearch HTTP service is running"
}

/// GET /query - Run a search and return normalized results
#[utoipa::path(
    get,
    path = "/query",
    tag = "search",
    params(SearchQuery),
    responses(
        (status = 200, description = "Results in provider order", body = Vec<NormalizedResult>),
        (status = 400, description = "Missing query, unknown or disabled engine", body = crate::error::ApiError)
    )
)]
pub async fn query(
    State(state): State<AppState>,
    params: Result<Query<SearchQuery>, QueryRejection>,
) -> Result<Json<Vec<NormalizedResult>>, Error> {
    let Query(params) = params?;
    let request = params.into_request();

    let results = state.service.query(&request).await?;
    tracing::info!(query = %request.query, count = results.len(), "query completed");

    Ok(Json(results))
}

/// POST /download - Acquire a list of results into the static directory
///
/// Paths in the response are rewritten as URLs served under `/static`.
#[utoipa::path(
    post,
    path = "/download",
    tag = "search",
    request_body = Vec<NormalizedResult>,
    responses(
        (status = 200, description = "Descriptors of the acquired images", body = Vec<ImageDescriptor>),
        (status = 400, description = "Body is not a non-empty JSON list of results", body = crate::error::ApiError)
    )
)]
pub async fn download(
    State(state): State<AppState>,
    Host(host): Host,
    body: Result<Json<Vec<NormalizedResult>>, JsonRejection>,
) -> Result<Json<Vec<ImageDescriptor>>, Error> {
    let Json(results) = body?;

    let descriptors = state.service.download_to_dir(results, None).await?;
    let base_dir = &state.service.config().service.base_dir;

    Ok(Json(public_descriptors(&host, base_dir, descriptors)))
}

/// POST /exec_pipeline - Search, then acquire every result
///
/// Returns the descriptor list, or the text `DONE` when `return_dfiles_list`
/// is 0. Paths stay local when a custom output directory was honored.
#[utoipa::path(
    post,
    path = "/exec_pipeline",
    tag = "search",
    request_body(content = ExecPipelineForm, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Descriptors of the acquired images, or DONE", body = Vec<ImageDescriptor>),
        (status = 400, description = "Invalid form, engine or post-process module", body = crate::error::ApiError)
    )
)]
pub async fn exec_pipeline(
    State(state): State<AppState>,
    Host(host): Host,
    form: Result<Form<ExecPipelineForm>, FormRejection>,
) -> Result<Response, Error> {
    let Form(form) = form?;
    let returns_file_list = form.returns_file_list();
    let local_paths =
        form.custom_path().is_some() && state.service.config().service.custom_local_path_enabled;

    let request = form.into_request()?;
    let descriptors = state.service.exec_pipeline(request).await?;

    if !returns_file_list {
        return Ok("DONE".into_response());
    }

    let descriptors = if local_paths {
        descriptors
    } else {
        let base_dir = &state.service.config().service.base_dir;
        public_descriptors(&host, base_dir, descriptors)
    };
    Ok(Json(descriptors).into_response())
}

/// GET /get_engine_list - Enabled engine identifiers
#[utoipa::path(
    get,
    path = "/get_engine_list",
    tag = "search",
    responses(
        (status = 200, description = "Engines with configured credentials", body = Vec<String>)
    )
)]
pub async fn get_engine_list(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.service.engines())
}

/// GET /get_postproc_module_list - Available post-process modules
#[utoipa::path(
    get,
    path = "/get_postproc_module_list",
    tag = "search",
    responses(
        (status = 200, description = "Registered post-process module names", body = Vec<String>)
    )
)]
pub async fn get_postproc_module_list(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.service.postproc_modules())
}
