//! Route handlers for the REST API
//!
//! Handlers are organized by domain:
//! - [`search`]: Queries, downloads, the combined pipeline, engine and module lists
//! - [`system`]: Health, events, OpenAPI

use crate::error::{Error, Result};
use crate::service::{ExecPipelineRequest, QueryRequest};
use crate::types::{ImageDescriptor, ImageSize, ImageStyle, QueryParams, ResizePolicy};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

mod search;
mod system;

pub use search::*;
pub use system::*;

// ============================================================================
// Query/Request Types (shared across handlers)
// ============================================================================

/// Query parameters for GET /query
#[derive(Debug, Deserialize, Serialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SearchQuery {
    /// Search text
    pub q: String,
    /// Engine identifier (default: first enabled engine)
    pub engine: Option<String>,
    /// Size hint: small, medium or large (default: medium)
    #[param(value_type = Option<String>)]
    pub size: Option<ImageSize>,
    /// Style hint: photo, clipart, lineart, face or news (default: photo)
    #[param(value_type = Option<String>)]
    pub style: Option<ImageStyle>,
    /// Maximum number of results (default: 100)
    pub num_results: Option<usize>,
}

impl SearchQuery {
    fn params(&self) -> QueryParams {
        let defaults = QueryParams::default();
        QueryParams {
            size: self.size.or(defaults.size),
            style: self.style.or(defaults.style),
            num_results: self.num_results.unwrap_or(defaults.num_results),
        }
    }

    /// The service-level request
    pub fn into_request(self) -> QueryRequest {
        let params = self.params();
        QueryRequest {
            query: self.q,
            engine: self.engine,
            params,
            query_timeout: None,
        }
    }
}

/// Form fields for POST /exec_pipeline
///
/// Non-positive timeouts and dimensions mean "unset".
#[derive(Debug, Default, Deserialize, Serialize, utoipa::ToSchema)]
pub struct ExecPipelineForm {
    /// Search text
    pub q: String,
    /// Engine identifier (default: first enabled engine)
    pub engine: Option<String>,
    /// Size hint
    pub size: Option<ImageSize>,
    /// Style hint
    pub style: Option<ImageStyle>,
    /// Maximum number of results (default: 100)
    pub num_results: Option<usize>,
    /// Provider request timeout in seconds
    pub query_timeout: Option<f64>,
    /// Bound on the whole acquisition phase, in seconds
    pub improc_timeout: Option<f64>,
    /// Bound on each image download, in seconds
    pub per_image_timeout: Option<f64>,
    /// Maximum width of the clean variant
    pub resize_width: Option<i64>,
    /// Maximum height of the clean variant
    pub resize_height: Option<i64>,
    /// Post-process module name
    pub postproc_module: Option<String>,
    /// JSON object of module parameters
    pub postproc_extra_prms: Option<String>,
    /// Output directory override (honored only when enabled at startup)
    pub custom_local_path: Option<String>,
    /// 1 to return the descriptor list, 0 to return "DONE"
    /// (default: 1 without a post-process module, else 0)
    pub return_dfiles_list: Option<i64>,
}

impl ExecPipelineForm {
    /// Whether the response carries the descriptor list
    pub fn returns_file_list(&self) -> bool {
        let default = if self.module().is_none() { 1 } else { 0 };
        self.return_dfiles_list.unwrap_or(default) == 1
    }

    /// Post-process module name; an empty name means none
    fn module(&self) -> Option<&str> {
        self.postproc_module.as_deref().filter(|m| !m.is_empty())
    }

    /// Custom output directory, if one was given
    pub fn custom_path(&self) -> Option<PathBuf> {
        self.custom_local_path
            .as_deref()
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
    }

    /// The service-level request
    pub fn into_request(self) -> Result<ExecPipelineRequest> {
        let postproc_extra_params = match self.postproc_extra_prms.as_deref() {
            None | Some("") => serde_json::Map::new(),
            Some(raw) => match serde_json::from_str(raw) {
                Ok(serde_json::Value::Object(map)) => map,
                // Non-object parameters are ignored
                Ok(_) => serde_json::Map::new(),
                Err(e) => {
                    return Err(Error::InvalidRequest(format!(
                        "postproc_extra_prms is not valid JSON: {e}"
                    )));
                }
            },
        };

        let custom_local_path = self.custom_path();
        let postproc_module = self.module().map(str::to_string);
        let search = SearchQuery {
            q: self.q,
            engine: self.engine,
            size: self.size,
            style: self.style,
            num_results: self.num_results,
        };
        let mut query = search.into_request();
        query.query_timeout = positive_secs(self.query_timeout);

        Ok(ExecPipelineRequest {
            query: Some(query),
            overall_timeout: positive_secs(self.improc_timeout),
            per_item_timeout: positive_secs(self.per_image_timeout),
            resize_policy: ResizePolicy {
                max_width: positive_dimension(self.resize_width),
                max_height: positive_dimension(self.resize_height),
            },
            postproc_module,
            postproc_extra_params,
            custom_local_path,
        })
    }
}

fn positive_secs(secs: Option<f64>) -> Option<Duration> {
    secs.filter(|s| s.is_finite() && *s > 0.0)
        .map(Duration::from_secs_f64)
}

fn positive_dimension(value: Option<i64>) -> Option<u32> {
    value.filter(|v| *v > 0).and_then(|v| u32::try_from(v).ok())
}

/// Rewrite a local path under `base_dir` as a URL on `host`
pub fn public_url(host: &str, base_dir: &Path, local: &str) -> String {
    let local = Path::new(local);
    let relative = local.strip_prefix(base_dir).unwrap_or(local);
    let segments: Vec<String> = relative
        .components()
        .filter_map(|c| match c {
            std::path::Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    format!("http://{host}/{}", segments.join("/"))
}

/// Rewrite every path of every descriptor with [`public_url`]
pub fn public_descriptors(
    host: &str,
    base_dir: &Path,
    descriptors: Vec<ImageDescriptor>,
) -> Vec<ImageDescriptor> {
    descriptors
        .into_iter()
        .map(|d| ImageDescriptor {
            orig_fn: public_url(host, base_dir, &d.orig_fn),
            thumb_fn: public_url(host, base_dir, &d.thumb_fn),
            clean_fn: public_url(host, base_dir, &d.clean_fn),
            source_url: d.source_url,
        })
        .collect()
}
