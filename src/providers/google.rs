//! Google Custom Search JSON API (image search)
//!
//! Needs two separately provisioned credentials: the ID of a Programmable
//! Search Engine (`cx`), which controls what is searched, and an API key for the
//! Custom Search JSON API used to query it.

use super::{AuxParams, Provider, ProviderOptions, build_client, read_json};
use crate::error::Result;
use crate::types::{ImageSize, ImageStyle, NormalizedResult, QueryParams, RawItem};
use async_trait::async_trait;

/// Custom Search JSON API entry point
pub const GOOGLE_API_ENDPOINT: &str = "https://www.googleapis.com/customsearch/v1";

const RESULTS_PER_REQUEST: usize = 10;

/// The API refuses to page past the 100th result
const MAX_RESULTS: usize = 100;

/// `google_api` provider
pub struct GoogleProvider {
    client: reqwest::Client,
    api_key: String,
    search_engine_id: String,
    endpoint: String,
}

impl GoogleProvider {
    /// Create a provider talking to the public Custom Search endpoint
    pub fn new(
        api_key: impl Into<String>,
        search_engine_id: impl Into<String>,
        options: &ProviderOptions,
    ) -> Result<Self> {
        Self::with_endpoint(api_key, search_engine_id, GOOGLE_API_ENDPOINT, options)
    }

    /// Create a provider talking to `endpoint` instead of the public one
    pub fn with_endpoint(
        api_key: impl Into<String>,
        search_engine_id: impl Into<String>,
        endpoint: impl Into<String>,
        options: &ProviderOptions,
    ) -> Result<Self> {
        Ok(Self {
            client: build_client(options)?,
            api_key: api_key.into(),
            search_engine_id: search_engine_id.into(),
            endpoint: endpoint.into(),
        })
    }
}

// Google's size buckets run one step larger than the generic hints
fn native_size(size: ImageSize) -> &'static str {
    match size {
        ImageSize::Small => "medium",
        ImageSize::Medium => "large",
        ImageSize::Large => "xxlarge",
    }
}

fn native_style(style: ImageStyle) -> &'static str {
    match style {
        ImageStyle::Photo => "photo",
        ImageStyle::Clipart => "clipart",
        ImageStyle::Lineart => "lineart",
        ImageStyle::Face => "face",
        ImageStyle::News => "news",
    }
}

#[async_trait]
impl Provider for GoogleProvider {
    fn name(&self) -> &str {
        "google_api"
    }

    fn per_page_cap(&self) -> usize {
        RESULTS_PER_REQUEST
    }

    fn max_results(&self) -> Option<usize> {
        Some(MAX_RESULTS)
    }

    fn aux_params(&self, params: &QueryParams) -> AuxParams {
        let mut aux: AuxParams = vec![
            ("cx".into(), self.search_engine_id.clone()),
            ("key".into(), self.api_key.clone()),
            ("searchType".into(), "image".into()),
        ];
        if let Some(size) = params.size {
            aux.push(("imgSize".into(), native_size(size).into()));
        }
        if let Some(style) = params.style {
            aux.push(("imgType".into(), native_style(style).into()));
        }
        aux
    }

    async fn fetch_page(
        &self,
        query: &str,
        offset: usize,
        count: usize,
        aux: &AuxParams,
    ) -> Result<Vec<RawItem>> {
        // `start` is 1-based
        let start = (offset + 1).to_string();
        let num = count.to_string();

        let mut params: Vec<(&str, &str)> =
            aux.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        params.push(("q", query));
        params.push(("start", &start));
        params.push(("num", &num));

        tracing::debug!(query, start = %start, num = %num, "google page request");

        let response = self
            .client
            .get(&self.endpoint)
            .query(&params)
            .send()
            .await?;
        let body = read_json(response).await?;

        // No `items` key means the result set is exhausted
        let mut items = match body.get("items") {
            Some(serde_json::Value::Array(items)) => items.clone(),
            _ => Vec::new(),
        };
        items.truncate(count);
        Ok(items)
    }

    fn normalize(&self, item: &RawItem) -> Option<NormalizedResult> {
        let link = item.get("link")?.as_str()?;
        let title = item.get("title").and_then(|v| v.as_str()).unwrap_or_default();
        Some(NormalizedResult {
            url: link.to_string(),
            image_id: format!("{:x}", md5::compute(link.as_bytes())),
            title: title.to_string(),
        })
    }
}
