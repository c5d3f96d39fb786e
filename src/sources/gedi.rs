//! GEDI granule search against NASA's Common Metadata Repository.

use crate::adapters::http::{send_with_retry, RetryPolicy};
use crate::domain::model::{format_query_date, BoundingBox, DateRange, GediProduct};
use crate::utils::error::Result;
use reqwest::Client;
use serde_json::Value;

pub const CMR_SEARCH_URL: &str = "https://cmr.earthdata.nasa.gov/search/granules.json";
pub const DEFAULT_VERSION: &str = "002";
/// Link relation CMR uses for downloadable granule files.
pub const DATA_LINK_REL: &str = "http://esipfed.org/ns/fedsearch/1.1/data#";
const PAGE_SIZE: usize = 100;
const HITS_HEADER: &str = "CMR-Hits";

pub struct GediClient {
    product: GediProduct,
    version: String,
    endpoint: String,
    client: Client,
    retry: RetryPolicy,
}

/// One page of a granule search.
#[derive(Debug, Clone)]
pub struct GranulePage {
    pub body: Value,
    /// Total matches reported by CMR, independent of paging.
    pub hits: Option<u64>,
}

impl GranulePage {
    pub fn entries(&self) -> &[Value] {
        self.body
            .pointer("/feed/entry")
            .and_then(|e| e.as_array())
            .map(|e| e.as_slice())
            .unwrap_or(&[])
    }
}

impl GediClient {
    pub fn new(product: GediProduct) -> Self {
        Self {
            product,
            version: DEFAULT_VERSION.to_string(),
            endpoint: CMR_SEARCH_URL.to_string(),
            client: Client::new(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn product(&self) -> GediProduct {
        self.product
    }

    pub async fn query_granules(
        &self,
        bbox: &BoundingBox,
        range: &DateRange,
        page_size: usize,
        page_num: usize,
    ) -> Result<GranulePage> {
        let params = [
            ("short_name", self.product.as_str().to_string()),
            ("version", self.version.clone()),
            ("bounding_box", bbox.to_query_string()),
            (
                "temporal",
                format!(
                    "{},{}",
                    format_query_date(&range.start),
                    format_query_date(&range.end)
                ),
            ),
            ("page_size", page_size.to_string()),
            ("page_num", page_num.to_string()),
        ];

        tracing::debug!(
            "CMR search {} page {} (size {}) bbox {}",
            self.product,
            page_num,
            page_size,
            bbox
        );

        let request = self.client.get(&self.endpoint).query(&params);
        let response = send_with_retry(request, &self.retry).await?;

        let hits = response
            .headers()
            .get(HITS_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        let body: Value = response.json().await?;

        Ok(GranulePage { body, hits })
    }

    /// Data file URLs of every matching granule. `max_results` of `None` or
    /// `Some(0)` means unlimited.
    pub async fn get_download_urls(
        &self,
        bbox: &BoundingBox,
        range: &DateRange,
        max_results: Option<usize>,
    ) -> Result<Vec<String>> {
        let limit = max_results.filter(|m| *m > 0);
        let mut urls = Vec::new();
        let mut page_num = 1;

        loop {
            let page = self.query_granules(bbox, range, PAGE_SIZE, page_num).await?;
            let entries = page.entries();
            if entries.is_empty() {
                break;
            }

            for entry in entries {
                urls.extend(data_links(entry));
                if let Some(limit) = limit {
                    if urls.len() >= limit {
                        urls.truncate(limit);
                        return Ok(urls);
                    }
                }
            }

            if entries.len() < PAGE_SIZE {
                break;
            }
            page_num += 1;
        }

        tracing::info!("Found {} {} download URLs", urls.len(), self.product);
        Ok(urls)
    }

    pub async fn get_granule_count(&self, bbox: &BoundingBox, range: &DateRange) -> Result<u64> {
        let page = self.query_granules(bbox, range, 1, 1).await?;
        let count = page.hits.unwrap_or(page.entries().len() as u64);
        tracing::info!("{} granules of {} match", count, self.product);
        Ok(count)
    }
}

fn data_links(entry: &Value) -> impl Iterator<Item = String> + '_ {
    entry
        .get("links")
        .and_then(|l| l.as_array())
        .into_iter()
        .flatten()
        .filter(|link| link.get("rel").and_then(|r| r.as_str()) == Some(DATA_LINK_REL))
        .filter_map(|link| link.get("href").and_then(|h| h.as_str()).map(str::to_string))
}
