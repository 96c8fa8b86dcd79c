//! Paginated result aggregation
//!
//! [`PagedFetcher`] turns a provider's offset-limited pages into one ordered
//! result list. Transport faults never reach the caller: a failed page counts as
//! an empty page, which ends pagination with whatever was gathered so far.

use crate::providers::Provider;
use crate::types::{FetchPage, NormalizedResult, QueryParams};
use futures::StreamExt;
use std::sync::Arc;

/// Drives pagination against one provider
pub struct PagedFetcher {
    provider: Arc<dyn Provider>,
    page_concurrency: usize,
}

impl PagedFetcher {
    /// Fetch pages one at a time
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self::with_page_concurrency(provider, 1)
    }

    /// Allow up to `page_concurrency` pages in flight (0 is raised to 1)
    pub fn with_page_concurrency(provider: Arc<dyn Provider>, page_concurrency: usize) -> Self {
        Self {
            provider,
            page_concurrency: page_concurrency.max(1),
        }
    }

    /// The provider this fetcher queries
    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    /// Run `term` and return at most `params.num_results` results in provider order.
    ///
    /// Stops at the requested count, at the first short page, or at the first
    /// failed page, whichever comes first.
    pub async fn query(&self, term: &str, params: &QueryParams) -> Vec<NormalizedResult> {
        let provider = self.provider.as_ref();
        let name = provider.name();

        let mut num_results = params.num_results;
        if let Some(ceiling) = provider.max_results()
            && num_results > ceiling
        {
            tracing::warn!(
                provider = name,
                requested = num_results,
                ceiling,
                "num_results exceeds provider ceiling, clamping"
            );
            num_results = ceiling;
        }
        if num_results == 0 {
            return Vec::new();
        }

        let aux = provider.aux_params(params);
        let cap = provider.per_page_cap().max(1);

        // Every page but the last asks for a full `cap`, so offsets are known up front
        let plan: Vec<(usize, usize)> = (0..num_results)
            .step_by(cap)
            .map(|offset| (offset, cap.min(num_results - offset)))
            .collect();

        let aux = &aux;
        let pages = futures::stream::iter(plan)
            .map(move |(offset, count)| async move {
                match provider.fetch_page(term, offset, count, aux).await {
                    Ok(mut items) => {
                        items.truncate(count);
                        FetchPage {
                            items,
                            requested_offset: offset,
                            requested_count: count,
                        }
                    }
                    Err(e) => {
                        tracing::warn!(
                            provider = name,
                            offset,
                            error = %e,
                            "page fetch failed, returning partial results"
                        );
                        FetchPage::empty(offset, count)
                    }
                }
            })
            .buffered(self.page_concurrency);
        let mut pages = std::pin::pin!(pages);

        let mut results = Vec::with_capacity(num_results);
        while let Some(page) = pages.next().await {
            let raw_count = page.items.len();
            let before = results.len();
            results.extend(page.items.iter().filter_map(|item| provider.normalize(item)));

            let dropped = raw_count - (results.len() - before);
            if dropped > 0 {
                tracing::debug!(
                    provider = name,
                    offset = page.requested_offset,
                    dropped,
                    "dropped malformed items"
                );
            }

            if page.is_short() {
                tracing::debug!(
                    provider = name,
                    offset = page.requested_offset,
                    received = raw_count,
                    requested = page.requested_count,
                    "short page, end of results"
                );
                break;
            }
        }

        results.truncate(num_results);
        tracing::info!(provider = name, query = term, count = results.len(), "query finished");
        results
    }
}
