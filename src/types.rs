//! Core types for imsearch-dl

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use utoipa::ToSchema;

use crate::postprocess::PostProcessor;

/// One provider-native result entry, before normalization
pub type RawItem = serde_json::Value;

/// A search result, normalized across providers
///
/// `image_id` is unique only within the provider that produced it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct NormalizedResult {
    /// Direct URL of the image
    pub url: String,
    /// Provider-scoped image identifier
    pub image_id: String,
    /// Title or caption reported by the provider
    pub title: String,
}

/// One page of raw provider results
#[derive(Clone, Debug, Default)]
pub struct FetchPage {
    /// Items in provider order
    pub items: Vec<RawItem>,
    /// Offset the page was requested at
    pub requested_offset: usize,
    /// Number of items asked for
    pub requested_count: usize,
}

impl FetchPage {
    /// An empty page, used when the fetch failed
    pub fn empty(requested_offset: usize, requested_count: usize) -> Self {
        Self {
            items: Vec::new(),
            requested_offset,
            requested_count,
        }
    }

    /// A page is short when the provider returned fewer items than requested,
    /// which signals the end of its results
    pub fn is_short(&self) -> bool {
        self.items.len() < self.requested_count
    }
}

/// Requested image size, mapped to each provider's own vocabulary
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ImageSize {
    /// Small images
    Small,
    /// Medium images (default)
    Medium,
    /// Large images
    Large,
}

impl std::str::FromStr for ImageSize {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "small" => Ok(ImageSize::Small),
            "medium" => Ok(ImageSize::Medium),
            "large" => Ok(ImageSize::Large),
            other => Err(crate::Error::InvalidRequest(format!(
                "unsupported size '{other}'"
            ))),
        }
    }
}

/// Requested image style, mapped to each provider's own vocabulary
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ImageStyle {
    /// Photographs (default)
    Photo,
    /// Clip art
    Clipart,
    /// Line drawings
    Lineart,
    /// Faces
    Face,
    /// News imagery
    News,
}

impl std::str::FromStr for ImageStyle {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "photo" => Ok(ImageStyle::Photo),
            "clipart" => Ok(ImageStyle::Clipart),
            "lineart" => Ok(ImageStyle::Lineart),
            "face" => Ok(ImageStyle::Face),
            "news" => Ok(ImageStyle::News),
            other => Err(crate::Error::InvalidRequest(format!(
                "unsupported style '{other}'"
            ))),
        }
    }
}

/// Parameters for a single search query
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct QueryParams {
    /// Size hint (default: medium)
    #[serde(default)]
    pub size: Option<ImageSize>,
    /// Style hint (default: photo)
    #[serde(default)]
    pub style: Option<ImageStyle>,
    /// Maximum number of results to return (default: 100)
    #[serde(default = "default_num_results")]
    pub num_results: usize,
}

impl Default for QueryParams {
    fn default() -> Self {
        Self {
            size: Some(ImageSize::Medium),
            style: Some(ImageStyle::Photo),
            num_results: default_num_results(),
        }
    }
}

fn default_num_results() -> usize {
    100
}

/// Bounds for the clean image variant; unset bounds leave that dimension free
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ResizePolicy {
    /// Maximum width of the clean variant
    pub max_width: Option<u32>,
    /// Maximum height of the clean variant
    pub max_height: Option<u32>,
}

impl ResizePolicy {
    /// True when at least one bound is set
    pub fn is_active(&self) -> bool {
        self.max_width.is_some() || self.max_height.is_some()
    }
}

/// Record of a successfully acquired image and its three persisted variants
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ImageDescriptor {
    /// The URL the image was fetched from (use this to correlate with inputs)
    pub source_url: String,
    /// Path (or URL) of the untouched original
    pub orig_fn: String,
    /// Path (or URL) of the thumbnail
    pub thumb_fn: String,
    /// Path (or URL) of the clean, resized variant
    pub clean_fn: String,
}

/// Lifecycle of one acquisition task
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Waiting for a pool slot
    Pending,
    /// Downloading image bytes
    Fetching,
    /// Download failed or timed out
    FetchFailed,
    /// Bytes received
    Fetched,
    /// Decoding and producing variants
    Transforming,
    /// Bytes could not be decoded or files could not be written
    TransformFailed,
    /// Variants persisted
    Transformed,
    /// Post-process callback running
    Postprocessing,
    /// Post-process callback failed
    PostprocessFailed,
    /// Descriptor produced
    Done,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Pending => "pending",
            TaskState::Fetching => "fetching",
            TaskState::FetchFailed => "fetch_failed",
            TaskState::Fetched => "fetched",
            TaskState::Transforming => "transforming",
            TaskState::TransformFailed => "transform_failed",
            TaskState::Transformed => "transformed",
            TaskState::Postprocessing => "postprocessing",
            TaskState::PostprocessFailed => "postprocess_failed",
            TaskState::Done => "done",
        };
        f.write_str(s)
    }
}

/// Events emitted during acquisition
///
/// Consumers subscribe through [`ImageSearchService::subscribe`](crate::ImageSearchService::subscribe)
/// or the `/events` server-sent events endpoint.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// An image was fully acquired
    ItemAcquired {
        /// Position of the result in the submitted list
        index: usize,
        /// The produced descriptor
        descriptor: ImageDescriptor,
    },
    /// An image was dropped
    ItemFailed {
        /// Position of the result in the submitted list
        index: usize,
        /// URL of the failed result
        url: String,
        /// Terminal state the task ended in
        state: TaskState,
        /// Error message
        error: String,
    },
    /// A post-process module handed back the path of a processed image
    ImagePathReturned {
        /// Path of the clean image given to the backend
        #[schema(value_type = String)]
        path: PathBuf,
    },
}

/// Settings for one acquisition run
///
/// The post-process callback and the event sender are injected here explicitly;
/// nothing in the pipeline reads process-wide state.
#[derive(Clone)]
pub struct PipelineConfig {
    /// Upper bound on the whole run; when it elapses, completed descriptors are returned
    pub overall_timeout: Option<Duration>,
    /// Upper bound on each image download
    pub per_item_timeout: Option<Duration>,
    /// Bounds for the clean variant
    pub resize_policy: ResizePolicy,
    /// Optional consumer invoked after each successful transform
    pub postprocess_callback: Option<Arc<dyn PostProcessor>>,
    /// Opaque parameters handed to the callback
    pub callback_extra_params: serde_json::Map<String, serde_json::Value>,
    /// Directory the three variants are written to
    pub output_dir: PathBuf,
    /// Optional event sink
    pub events: Option<tokio::sync::broadcast::Sender<Event>>,
}

impl PipelineConfig {
    /// A config with no timeouts, no resizing, and no callback
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            overall_timeout: None,
            per_item_timeout: None,
            resize_policy: ResizePolicy::default(),
            postprocess_callback: None,
            callback_extra_params: serde_json::Map::new(),
            output_dir: output_dir.into(),
            events: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("overall_timeout", &self.overall_timeout)
            .field("per_item_timeout", &self.per_item_timeout)
            .field("resize_policy", &self.resize_policy)
            .field(
                "postprocess_callback",
                &self.postprocess_callback.as_ref().map(|c| c.name()),
            )
            .field("callback_extra_params", &self.callback_extra_params)
            .field("output_dir", &self.output_dir)
            .field("events", &self.events.is_some())
            .finish()
    }
}
