//! # imsearch-dl
//!
//! Image search aggregation with bounded-concurrency acquisition.
//!
//! A query goes to one of several web image search providers; the paginated
//! results are normalized into [`NormalizedResult`]s. Each result can then be
//! downloaded, decoded, thumbnailed and resized by the
//! [`ImageAcquisitionPipeline`], which persists three files per image and can
//! hand every image to a [`PostProcessor`] (for example a feature extraction
//! backend).
//!
//! ## Quick Start
//!
//! ```no_run
//! use imsearch_dl::{Config, ImageSearchService, QueryRequest};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = Config::default();
//!     config.providers.bing_api_key = Some("<subscription key>".to_string());
//!
//!     let service = ImageSearchService::new(config)?;
//!
//!     // Subscribe to events
//!     let mut events = service.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let results = service.query(&QueryRequest::new("red bicycle")).await?;
//!     let descriptors = service.download_to_dir(results, None).await?;
//!     println!("acquired {} images", descriptors.len());
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// REST API module
pub mod api;
/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Provider-agnostic pagination
pub mod fetcher;
/// Concurrent image acquisition
pub mod pipeline;
/// Bounded task pool
pub mod pool;
/// Post-process modules run on acquired images
pub mod postprocess;
/// Search provider adapters
pub mod providers;
/// Service glue used by the HTTP layer
pub mod service;
/// Image decoding, thumbnailing and resizing
pub mod transform;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use error::{ApiError, Error, ErrorDetail, Result, ToHttpStatus};
pub use fetcher::PagedFetcher;
pub use pipeline::{HttpImageSource, ImageAcquisitionPipeline, ImageSource};
pub use pool::ConcurrencyPool;
pub use postprocess::{PostProcessRegistry, PostProcessor};
pub use providers::{Provider, ProviderRegistry};
pub use service::{ExecPipelineRequest, ImageSearchService, QueryRequest};
pub use types::{
    Event, FetchPage, ImageDescriptor, ImageSize, ImageStyle, NormalizedResult, PipelineConfig,
    QueryParams, RawItem, ResizePolicy, TaskState,
};

/// Serve the REST API until a termination signal arrives.
///
/// In-flight requests finish before this returns.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use imsearch_dl::{Config, ImageSearchService, run_with_shutdown};
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let service = Arc::new(ImageSearchService::new(Config::default())?);
///
///     // Run with automatic signal handling
///     run_with_shutdown(service).await?;
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(service: std::sync::Arc<ImageSearchService>) -> Result<()> {
    api::start_api_server_with_shutdown(service, wait_for_signal()).await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
