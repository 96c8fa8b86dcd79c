//! Service glue between the HTTP layer and the fetcher/pipeline core

use crate::config::Config;
use crate::error::{Error, Result};
use crate::fetcher::PagedFetcher;
use crate::pipeline::{HttpImageSource, ImageAcquisitionPipeline, ImageSource};
use crate::postprocess::PostProcessRegistry;
use crate::providers::{ProviderOptions, ProviderRegistry};
use crate::types::{Event, ImageDescriptor, NormalizedResult, PipelineConfig, QueryParams, ResizePolicy};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Capacity of the event channel; slow subscribers that fall further behind miss events
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// One search request
#[derive(Clone, Debug)]
pub struct QueryRequest {
    /// Search text
    pub query: String,
    /// Provider identifier; `None` picks the first enabled engine
    pub engine: Option<String>,
    /// Size/style hints and result count
    pub params: QueryParams,
    /// Overrides the configured provider timeout
    pub query_timeout: Option<Duration>,
}

impl QueryRequest {
    /// A request with default parameters
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            engine: None,
            params: QueryParams::default(),
            query_timeout: None,
        }
    }
}

/// A query followed by acquisition of its results
#[derive(Clone, Debug, Default)]
pub struct ExecPipelineRequest {
    /// The search to run
    pub query: Option<QueryRequest>,
    /// Upper bound on the acquisition phase
    pub overall_timeout: Option<Duration>,
    /// Upper bound on each image download
    pub per_item_timeout: Option<Duration>,
    /// Bounds for the clean variant
    pub resize_policy: ResizePolicy,
    /// Post-process module to run on each image
    pub postproc_module: Option<String>,
    /// Opaque parameters for the module
    pub postproc_extra_params: Map<String, Value>,
    /// Write files here instead of the static directory (only if enabled)
    pub custom_local_path: Option<PathBuf>,
}

/// Owns credentials, registries, the image source and the event channel
pub struct ImageSearchService {
    config: Config,
    providers: ProviderRegistry,
    postprocessors: PostProcessRegistry,
    source: Arc<dyn ImageSource>,
    event_tx: broadcast::Sender<Event>,
}

impl ImageSearchService {
    /// Create a service with the built-in providers and modules and an HTTP image source
    pub fn new(config: Config) -> Result<Self> {
        let source = Arc::new(HttpImageSource::new(&config.acquisition.user_agent)?);
        Self::with_parts(
            config,
            ProviderRegistry::with_builtin(),
            PostProcessRegistry::with_builtin(),
            source,
        )
    }

    /// Create a service from explicit parts
    pub fn with_parts(
        config: Config,
        providers: ProviderRegistry,
        postprocessors: PostProcessRegistry,
        source: Arc<dyn ImageSource>,
    ) -> Result<Self> {
        config.validate()?;

        let p = &config.providers;
        if p.google_api_key.is_some() != p.google_search_engine_id.is_some() {
            tracing::warn!(
                "only one of google_api_key and google_search_engine_id was given; \
                 they only make sense together (google_api engine will be disabled)"
            );
        }

        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let service = Self {
            config,
            providers,
            postprocessors,
            source,
            event_tx,
        };
        tracing::info!(
            engines = ?service.engines(),
            postproc_modules = ?service.postproc_modules(),
            "image search service ready"
        );
        Ok(service)
    }

    /// The active configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Enabled engine identifiers, in registration order
    pub fn engines(&self) -> Vec<String> {
        self.providers.enabled(&self.config.providers)
    }

    /// Available post-process module names
    pub fn postproc_modules(&self) -> Vec<String> {
        self.postprocessors.module_names()
    }

    /// Subscribe to acquisition events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Directory downloads go to by default
    pub fn static_dir(&self) -> PathBuf {
        self.config.service.static_dir()
    }

    /// Run a search
    ///
    /// # Errors
    ///
    /// Only configuration errors: an unknown or disabled engine, or no engine
    /// enabled at all. Provider faults shorten the result list instead.
    pub async fn query(&self, request: &QueryRequest) -> Result<Vec<NormalizedResult>> {
        let engine = match &request.engine {
            Some(engine) => engine.clone(),
            None => self
                .engines()
                .into_iter()
                .next()
                .ok_or_else(|| Error::InvalidRequest("no query engine is enabled".into()))?,
        };

        let options = ProviderOptions {
            timeout: request
                .query_timeout
                .unwrap_or(self.config.providers.query_timeout),
        };
        let provider = self.providers.build(&engine, &self.config.providers, &options)?;
        let fetcher =
            PagedFetcher::with_page_concurrency(provider, self.config.paging.page_concurrency);

        Ok(fetcher.query(&request.query, &request.params).await)
    }

    /// Acquire `results` into `output_dir` (default: the static directory)
    ///
    /// # Errors
    ///
    /// [`Error::InvalidRequest`] for an empty result list.
    pub async fn download_to_dir(
        &self,
        results: Vec<NormalizedResult>,
        output_dir: Option<PathBuf>,
    ) -> Result<Vec<ImageDescriptor>> {
        if results.is_empty() {
            return Err(Error::InvalidRequest(
                "input must be a JSON list of results".into(),
            ));
        }
        let config = self.pipeline_config(output_dir.unwrap_or_else(|| self.static_dir()));
        Ok(self.pipeline().process(results, &config).await)
    }

    /// Search, then acquire every result
    ///
    /// The post-process module and engine are checked before anything is fetched.
    pub async fn exec_pipeline(&self, request: ExecPipelineRequest) -> Result<Vec<ImageDescriptor>> {
        let query = request
            .query
            .ok_or_else(|| Error::InvalidRequest("missing query".into()))?;

        let callback = request
            .postproc_module
            .as_deref()
            .map(|name| self.postprocessors.get(name))
            .transpose()?;

        let output_dir = match request.custom_local_path {
            Some(path) if self.config.service.custom_local_path_enabled => path,
            Some(path) => {
                tracing::debug!(path = %path.display(), "custom_local_path disabled, ignoring");
                self.static_dir()
            }
            None => self.static_dir(),
        };

        let results = self.query(&query).await?;
        tracing::info!(
            query = %query.query,
            count = results.len(),
            "query completed"
        );
        if results.is_empty() {
            return Ok(Vec::new());
        }

        let mut config = self.pipeline_config(output_dir);
        config.overall_timeout = request.overall_timeout;
        config.per_item_timeout = request.per_item_timeout;
        config.resize_policy = request.resize_policy;
        config.postprocess_callback = callback;
        config.callback_extra_params = request.postproc_extra_params;

        tracing::info!(
            query = %query.query,
            overall_timeout = ?config.overall_timeout,
            per_item_timeout = ?config.per_item_timeout,
            "download started"
        );
        let descriptors = self.pipeline().process(results, &config).await;
        tracing::info!(
            query = %query.query,
            count = descriptors.len(),
            "download completed"
        );
        Ok(descriptors)
    }

    fn pipeline(&self) -> ImageAcquisitionPipeline {
        ImageAcquisitionPipeline::new(
            Arc::clone(&self.source),
            self.config.acquisition.max_concurrent,
        )
    }

    fn pipeline_config(&self, output_dir: PathBuf) -> PipelineConfig {
        let mut config = PipelineConfig::new(output_dir);
        config.events = Some(self.event_tx.clone());
        config
    }
}
