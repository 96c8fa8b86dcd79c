//! Bing Image Search API v5

use super::{AuxParams, Provider, ProviderOptions, build_client, read_json};
use crate::error::{Error, Result};
use crate::types::{ImageSize, ImageStyle, NormalizedResult, QueryParams, RawItem};
use async_trait::async_trait;

/// Bing Image Search v5 entry point
pub const BING_API_ENDPOINT: &str = "https://api.cognitive.microsoft.com/bing/v5.0/images/search";

const SUBSCRIPTION_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";
const RESULTS_PER_REQUEST: usize = 50;

/// `bing_api` provider
///
/// Authenticates with the Cognitive Services subscription key sent in the
/// `Ocp-Apim-Subscription-Key` header.
pub struct BingProvider {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
}

impl BingProvider {
    /// Create a provider talking to the public Bing endpoint
    pub fn new(api_key: impl Into<String>, options: &ProviderOptions) -> Result<Self> {
        Self::with_endpoint(api_key, BING_API_ENDPOINT, options)
    }

    /// Create a provider talking to `endpoint` instead of the public one
    pub fn with_endpoint(
        api_key: impl Into<String>,
        endpoint: impl Into<String>,
        options: &ProviderOptions,
    ) -> Result<Self> {
        Ok(Self {
            client: build_client(options)?,
            api_key: api_key.into(),
            endpoint: endpoint.into(),
        })
    }
}

fn native_size(size: ImageSize) -> &'static str {
    match size {
        ImageSize::Small => "Small",
        ImageSize::Medium => "Medium",
        ImageSize::Large => "Large",
    }
}

fn native_style(style: ImageStyle) -> Option<&'static str> {
    match style {
        ImageStyle::Photo => Some("Photo"),
        ImageStyle::Clipart => Some("Clipart"),
        ImageStyle::Lineart => Some("Line"),
        ImageStyle::Face | ImageStyle::News => None,
    }
}

#[async_trait]
impl Provider for BingProvider {
    fn name(&self) -> &str {
        "bing_api"
    }

    fn per_page_cap(&self) -> usize {
        RESULTS_PER_REQUEST
    }

    fn aux_params(&self, params: &QueryParams) -> AuxParams {
        let mut aux = AuxParams::new();
        if let Some(size) = params.size {
            aux.push(("size".into(), native_size(size).into()));
        }
        if let Some(style) = params.style.and_then(native_style) {
            aux.push(("imageType".into(), style.into()));
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
        let quoted = format!("'{query}'");
        let offset = offset.to_string();
        let count = count.to_string();

        let mut params: Vec<(&str, &str)> =
            aux.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        params.push(("q", &quoted));
        params.push(("offset", &offset));
        params.push(("count", &count));

        tracing::debug!(query = %quoted, offset = %offset, count = %count, "bing page request");

        let response = self
            .client
            .get(&self.endpoint)
            .header(SUBSCRIPTION_KEY_HEADER, &self.api_key)
            .query(&params)
            .send()
            .await?;
        let body = read_json(response).await?;

        match body.get("value") {
            Some(serde_json::Value::Array(items)) => Ok(items.clone()),
            _ => Err(Error::MalformedResponse {
                provider: self.name().to_string(),
                reason: "missing 'value' array".into(),
            }),
        }
    }

    fn normalize(&self, item: &RawItem) -> Option<NormalizedResult> {
        let url = item.get("contentUrl")?.as_str()?;
        let image_id = item.get("imageId")?.as_str()?;
        let title = item.get("name").and_then(|v| v.as_str()).unwrap_or_default();
        Some(NormalizedResult {
            url: url.to_string(),
            image_id: image_id.to_string(),
            title: title.to_string(),
        })
    }
}
