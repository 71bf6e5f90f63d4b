//! Batch discovery from the remote directory listing
//!
//! The listing is an HTML page whose anchors point at `<id>.<ext>` archives.
//! Every anchor whose target ends with the archive suffix contributes one
//! [`BatchId`]; anything else on the page is ignored.

use reqwest::Client;
use scraper::{Html, Selector};
use std::collections::BTreeSet;
use tracing::{debug, info};
use url::Url;

use crate::error::DiscoveryError;
use crate::types::BatchId;

/// Finds the batch ids currently published on a listing page
#[derive(Debug, Clone)]
pub struct ListingDiscoverer {
    client: Client,
    listing_url: Url,
    extension: String,
}

impl ListingDiscoverer {
    pub fn new(client: Client, listing_url: Url, extension: impl Into<String>) -> Self {
        Self {
            client,
            listing_url,
            extension: extension.into(),
        }
    }

    pub fn listing_url(&self) -> &Url {
        &self.listing_url
    }

    /// Fetch the listing and return every batch id on it, ascending
    pub async fn discover(&self) -> Result<Vec<BatchId>, DiscoveryError> {
        let html = self.fetch_listing().await?;
        let ids = parse_listing(&html, &self.extension)?;

        info!(
            url = %self.listing_url,
            count = ids.len(),
            newest = ?ids.last(),
            "Discovered batches"
        );

        Ok(ids)
    }

    async fn fetch_listing(&self) -> Result<String, DiscoveryError> {
        let url = self.listing_url.as_str();
        debug!(url, "Fetching directory listing");

        let response = self
            .client
            .get(self.listing_url.clone())
            .send()
            .await
            .map_err(|source| DiscoveryError::Request {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(DiscoveryError::Status {
                url: url.to_string(),
                status,
            });
        }

        response.text().await.map_err(|source| DiscoveryError::Request {
            url: url.to_string(),
            source,
        })
    }
}

/// Extract the batch ids linked from `html`.
///
/// A link qualifies when its base name ends with `.<extension>`. The stem
/// must then be an unsigned integer; a qualifying link that is not aborts
/// discovery without a partial result.
pub fn parse_listing(html: &str, extension: &str) -> Result<Vec<BatchId>, DiscoveryError> {
    let document = Html::parse_document(html);
    let anchors =
        Selector::parse("a[href]").map_err(|e| DiscoveryError::Selector(e.to_string()))?;
    let suffix = format!(".{extension}");

    let mut ids = BTreeSet::new();

    for element in document.select(&anchors) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };

        let base_name = href.rsplit('/').next().unwrap_or(href);
        let Some(stem) = base_name.strip_suffix(&suffix) else {
            continue;
        };

        let id = stem
            .parse::<BatchId>()
            .map_err(|source| DiscoveryError::InvalidBatchId {
                href: href.to_string(),
                source,
            })?;

        debug!(href, batch_id = %id, "Found archive link");
        ids.insert(id);
    }

    Ok(ids.into_iter().collect())
}
