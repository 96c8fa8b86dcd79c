//! Search providers
//!
//! A [`Provider`] exposes one page of provider-native results at a time plus a
//! mapping from those raw items to [`NormalizedResult`]s. Pagination itself
//! lives in [`PagedFetcher`](crate::PagedFetcher), so providers only describe a
//! single request.
//!
//! Providers are looked up by identifier in a [`ProviderRegistry`]. Each entry
//! pairs a factory with a predicate deciding, from the credentials in
//! [`ProvidersConfig`], whether the engine is enabled.

mod bing;
mod google;

pub use bing::{BING_API_ENDPOINT, BingProvider};
pub use google::{GOOGLE_API_ENDPOINT, GoogleProvider};

use crate::config::ProvidersConfig;
use crate::error::{Error, Result};
use crate::types::{NormalizedResult, QueryParams, RawItem};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Provider-specific query parameters sent with every page request
pub type AuxParams = Vec<(String, String)>;

/// A search engine producing offset-limited pages of raw results
#[async_trait]
pub trait Provider: Send + Sync {
    /// Identifier the provider is registered under (e.g. "bing_api")
    fn name(&self) -> &str;

    /// Most items one `fetch_page` call may ask for
    fn per_page_cap(&self) -> usize;

    /// Hard ceiling on the total number of results, if the provider has one
    fn max_results(&self) -> Option<usize> {
        None
    }

    /// Translate size/style hints into the provider's own parameters.
    ///
    /// Hints the provider does not support are left out.
    fn aux_params(&self, params: &QueryParams) -> AuxParams;

    /// Request `count` items starting at `offset`
    async fn fetch_page(
        &self,
        query: &str,
        offset: usize,
        count: usize,
        aux: &AuxParams,
    ) -> Result<Vec<RawItem>>;

    /// Map one raw item; `None` drops a malformed item
    fn normalize(&self, item: &RawItem) -> Option<NormalizedResult>;
}

/// Options applied when a provider is constructed
#[derive(Clone, Debug)]
pub struct ProviderOptions {
    /// Timeout for each page request
    pub timeout: Duration,
}

impl Default for ProviderOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
        }
    }
}

/// Builds a provider from credentials and options
pub type ProviderFactory =
    Arc<dyn Fn(&ProvidersConfig, &ProviderOptions) -> Result<Arc<dyn Provider>> + Send + Sync>;

/// Decides from the credentials whether a provider is usable
pub type ProviderPredicate = Arc<dyn Fn(&ProvidersConfig) -> bool + Send + Sync>;

struct ProviderEntry {
    name: String,
    is_enabled: ProviderPredicate,
    factory: ProviderFactory,
}

/// Registration table mapping provider identifiers to factories
///
/// Entries keep registration order, which is also the order of
/// [`enabled`](Self::enabled) and [`names`](Self::names).
#[derive(Default)]
pub struct ProviderRegistry {
    entries: Vec<ProviderEntry>,
}

impl ProviderRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding `bing_api` and `google_api`
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();

        registry.register(
            "bing_api",
            |config: &ProvidersConfig| config.bing_api_key.is_some(),
            |config: &ProvidersConfig, options: &ProviderOptions| {
                let key = config.bing_api_key.clone().ok_or_else(|| {
                    Error::config("bing_api requires an API key", "bing_api_key")
                })?;
                let provider: Arc<dyn Provider> = Arc::new(BingProvider::new(key, options)?);
                Ok(provider)
            },
        );

        registry.register(
            "google_api",
            |config: &ProvidersConfig| {
                config.google_api_key.is_some() && config.google_search_engine_id.is_some()
            },
            |config: &ProvidersConfig, options: &ProviderOptions| {
                let key = config.google_api_key.clone().ok_or_else(|| {
                    Error::config("google_api requires an API key", "google_api_key")
                })?;
                let engine_id = config.google_search_engine_id.clone().ok_or_else(|| {
                    Error::config(
                        "google_api requires a search engine ID",
                        "google_search_engine_id",
                    )
                })?;
                let provider: Arc<dyn Provider> =
                    Arc::new(GoogleProvider::new(key, engine_id, options)?);
                Ok(provider)
            },
        );

        registry
    }

    /// Register (or replace) a provider under `name`
    pub fn register<P, F>(&mut self, name: impl Into<String>, is_enabled: P, factory: F)
    where
        P: Fn(&ProvidersConfig) -> bool + Send + Sync + 'static,
        F: Fn(&ProvidersConfig, &ProviderOptions) -> Result<Arc<dyn Provider>>
            + Send
            + Sync
            + 'static,
    {
        let name = name.into();
        let entry = ProviderEntry {
            name: name.clone(),
            is_enabled: Arc::new(is_enabled),
            factory: Arc::new(factory),
        };
        match self.entries.iter_mut().find(|e| e.name == name) {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
    }

    /// Every registered identifier
    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.name.clone()).collect()
    }

    /// Identifiers whose credentials are present in `config`
    pub fn enabled(&self, config: &ProvidersConfig) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| (e.is_enabled)(config))
            .map(|e| e.name.clone())
            .collect()
    }

    /// Construct the provider registered under `name`
    ///
    /// # Errors
    ///
    /// [`Error::UnknownProvider`] if nothing is registered under `name`,
    /// [`Error::EngineDisabled`] if its credentials are missing.
    pub fn build(
        &self,
        name: &str,
        config: &ProvidersConfig,
        options: &ProviderOptions,
    ) -> Result<Arc<dyn Provider>> {
        let entry = self
            .entries
            .iter()
            .find(|e| e.name == name)
            .ok_or_else(|| Error::UnknownProvider(name.to_string()))?;

        if !(entry.is_enabled)(config) {
            return Err(Error::EngineDisabled(name.to_string()));
        }

        (entry.factory)(config, options)
    }
}

/// Read a JSON response body, turning non-success statuses into [`Error::HttpStatus`]
pub(crate) async fn read_json(response: reqwest::Response) -> Result<serde_json::Value> {
    let status = response.status();
    if !status.is_success() {
        return Err(Error::HttpStatus {
            url: response.url().to_string(),
            status: status.as_u16(),
        });
    }
    Ok(response.json().await?)
}

/// HTTP client shared by a provider's page requests
pub(crate) fn build_client(options: &ProviderOptions) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(options.timeout)
        .build()
        .map_err(Error::Network)
}
