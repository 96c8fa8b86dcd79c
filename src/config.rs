//! Configuration types for imsearch-dl

use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::PathBuf, time::Duration};
use utoipa::ToSchema;

/// Service-level settings (storage locations)
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct ServiceConfig {
    /// Results are saved relative to this directory (default: "/var/lib/imsearch-tools")
    ///
    /// Downloaded images land in `<base_dir>/static`, which is also served at `/static`.
    #[serde(default = "default_base_dir")]
    #[schema(value_type = String)]
    pub base_dir: PathBuf,

    /// Allow callers to pass `custom_local_path` to `/exec_pipeline` (default: false)
    ///
    /// This lets the service write files anywhere the process can write, so it is
    /// only sensible for a local, single-user deployment.
    #[serde(default)]
    pub custom_local_path_enabled: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            custom_local_path_enabled: false,
        }
    }
}

impl ServiceConfig {
    /// Default output directory for downloaded images
    pub fn static_dir(&self) -> PathBuf {
        self.base_dir.join("static")
    }
}

/// Provider credentials and query behavior
///
/// Engines are enabled implicitly by supplying their keys. Google needs both
/// the API key and the search engine ID.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct ProvidersConfig {
    /// Bing Image Search v5 subscription key (enables `bing_api`)
    #[serde(default)]
    pub bing_api_key: Option<String>,

    /// Google Custom Search JSON API key (enables `google_api` with the engine ID)
    #[serde(default)]
    pub google_api_key: Option<String>,

    /// Google Programmable Search Engine ID (enables `google_api` with the key)
    #[serde(default)]
    pub google_search_engine_id: Option<String>,

    /// Default timeout for provider requests (default: 5 seconds)
    #[serde(default = "default_query_timeout", with = "duration_serde")]
    #[schema(value_type = u64)]
    pub query_timeout: Duration,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            bing_api_key: None,
            google_api_key: None,
            google_search_engine_id: None,
            query_timeout: default_query_timeout(),
        }
    }
}

/// Pagination behavior, shared by every provider
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct PagingConfig {
    /// Maximum number of result pages requested in parallel (default: 1 = sequential)
    #[serde(default = "default_page_concurrency")]
    pub page_concurrency: usize,
}

impl Default for PagingConfig {
    fn default() -> Self {
        Self {
            page_concurrency: default_page_concurrency(),
        }
    }
}

/// Image acquisition behavior
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct AcquisitionConfig {
    /// Maximum number of images acquired concurrently (default: 50)
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// User-Agent header sent when fetching images
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            user_agent: default_user_agent(),
        }
    }
}

/// REST API server configuration
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiConfig {
    /// Address to bind to (default: 0.0.0.0:8157)
    #[serde(default = "default_bind_address")]
    #[schema(value_type = String)]
    pub bind_address: SocketAddr,

    /// Enable CORS for browser access (default: true)
    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    /// Allowed CORS origins (default: any)
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,

    /// Serve Swagger UI at /swagger-ui (default: false)
    #[serde(default)]
    pub swagger_ui: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            cors_enabled: true,
            cors_origins: default_cors_origins(),
            swagger_ui: false,
        }
    }
}

/// Main configuration for ImageSearchService
#[derive(Clone, Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct Config {
    /// Storage locations
    #[serde(default)]
    pub service: ServiceConfig,

    /// Provider credentials and query timeout
    #[serde(default)]
    pub providers: ProvidersConfig,

    /// Pagination concurrency
    #[serde(default)]
    pub paging: PagingConfig,

    /// Image acquisition concurrency
    #[serde(default)]
    pub acquisition: AcquisitionConfig,

    /// REST API server
    #[serde(default)]
    pub api: ApiConfig,
}

impl Config {
    /// Load a configuration from a JSON file; missing fields take their defaults
    pub fn from_json_file(path: &std::path::Path) -> crate::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&raw)?;
        Ok(config)
    }

    /// Reject settings that would make the service unusable
    pub fn validate(&self) -> crate::Result<()> {
        if self.acquisition.max_concurrent == 0 {
            return Err(crate::Error::config(
                "max_concurrent must be at least 1",
                "acquisition.max_concurrent",
            ));
        }
        if self.paging.page_concurrency == 0 {
            return Err(crate::Error::config(
                "page_concurrency must be at least 1",
                "paging.page_concurrency",
            ));
        }
        Ok(())
    }
}

fn default_base_dir() -> PathBuf {
    PathBuf::from("/var/lib/imsearch-tools")
}

fn default_query_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_page_concurrency() -> usize {
    1
}

fn default_max_concurrent() -> usize {
    50
}

fn default_user_agent() -> String {
    format!("imsearch-dl/{}", env!("CARGO_PKG_VERSION"))
}

fn default_bind_address() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8157))
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_true() -> bool {
    true
}

// Duration serialization helper
pub(crate) mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Optional Duration deserialization helper
pub(crate) mod optional_duration_serde {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = Option::<u64>::deserialize(deserializer)?;
        Ok(secs.map(Duration::from_secs))
    }
}
