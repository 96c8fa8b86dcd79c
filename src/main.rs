//! imsearch-dl HTTP service

use clap::Parser;
use imsearch_dl::{Config, ImageSearchService, run_with_shutdown};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Image search aggregation and download service", long_about = None)]
struct Args {
    /// JSON configuration file; command line options override its values
    #[arg(long, env = "IMSEARCH_CONFIG")]
    config: Option<PathBuf>,

    /// Results are saved relative to this directory
    #[arg(long, env = "IMSEARCH_BASE_DIR")]
    base_dir: Option<PathBuf>,

    /// Allow /exec_pipeline to write into a caller-provided directory
    #[arg(long, env = "IMSEARCH_ENABLE_CUSTOM_LOCAL_PATH")]
    enable_custom_local_path: bool,

    /// Bing Image Search subscription key
    #[arg(long, env = "BING_API_KEY", hide_env_values = true)]
    bing_api_key: Option<String>,

    /// Google Custom Search API key (requires --google-search-engine-id)
    #[arg(long, env = "GOOGLE_API_KEY", hide_env_values = true)]
    google_api_key: Option<String>,

    /// Google Programmable Search Engine ID (requires --google-api-key)
    #[arg(long, env = "GOOGLE_SEARCH_ENGINE_ID")]
    google_search_engine_id: Option<String>,

    /// Provider request timeout in seconds
    #[arg(long, env = "IMSEARCH_QUERY_TIMEOUT")]
    query_timeout: Option<u64>,

    /// Result pages requested in parallel
    #[arg(long, env = "IMSEARCH_PAGE_CONCURRENCY")]
    page_concurrency: Option<usize>,

    /// Images acquired concurrently
    #[arg(long, env = "IMSEARCH_MAX_CONCURRENT")]
    max_concurrent: Option<usize>,

    /// Address to listen on
    #[arg(long, env = "IMSEARCH_BIND")]
    bind: Option<SocketAddr>,

    /// Port to listen on (keeps the configured host)
    #[arg(short, long, env = "IMSEARCH_PORT")]
    port: Option<u16>,

    /// Serve Swagger UI at /swagger-ui
    #[arg(long, env = "IMSEARCH_SWAGGER_UI")]
    swagger_ui: bool,

    /// Log filter directive (falls back to RUST_LOG, then "imsearch_dl=info")
    #[arg(long)]
    log_filter: Option<String>,
}

impl Args {
    fn into_config(self) -> imsearch_dl::Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_json_file(path)?,
            None => Config::default(),
        };

        if let Some(base_dir) = self.base_dir {
            config.service.base_dir = base_dir;
        }
        if self.enable_custom_local_path {
            config.service.custom_local_path_enabled = true;
        }

        let providers = &mut config.providers;
        if self.bing_api_key.is_some() {
            providers.bing_api_key = self.bing_api_key;
        }
        if self.google_api_key.is_some() {
            providers.google_api_key = self.google_api_key;
        }
        if self.google_search_engine_id.is_some() {
            providers.google_search_engine_id = self.google_search_engine_id;
        }
        if let Some(secs) = self.query_timeout {
            providers.query_timeout = Duration::from_secs(secs);
        }

        if let Some(n) = self.page_concurrency {
            config.paging.page_concurrency = n;
        }
        if let Some(n) = self.max_concurrent {
            config.acquisition.max_concurrent = n;
        }

        if let Some(bind) = self.bind {
            config.api.bind_address = bind;
        }
        if let Some(port) = self.port {
            config.api.bind_address.set_port(port);
        }
        if self.swagger_ui {
            config.api.swagger_ui = true;
        }

        Ok(config)
    }
}

fn init_logging(filter: Option<&str>) {
    let filter = match filter {
        Some(directive) => EnvFilter::new(directive),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("imsearch_dl=info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> imsearch_dl::Result<()> {
    let args = Args::parse();
    init_logging(args.log_filter.as_deref());

    let config = args.into_config()?;
    tracing::info!(
        base_dir = %config.service.base_dir.display(),
        bind = %config.api.bind_address,
        "starting imsearch-dl"
    );

    let service = Arc::new(ImageSearchService::new(config)?);
    run_with_shutdown(service).await
}
