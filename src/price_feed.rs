//! External reference prices.
//!
//! Scrapes the community price page for `(name, buy, sell)` rows and feeds
//! them into the shared [`PriceTable`] through the clamp/midpoint rule.

use anyhow::{Context, Result};
use regex::Regex;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::catalog::ItemCatalog;
use crate::pricing::{reference_from_quotes, PriceTable};
use crate::types::Gold;

const HTTP_TIMEOUT_SECS: u64 = 10;

fn price_row() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"<td class='row1 ex'>([A-Z][A-Za-z ]+)</td><td class='row1'>([0-9]+)g</td><td class='row1'>([0-9]+)g</td>")
            .expect("valid regex")
    })
}

/// One scraped row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quote {
    pub name: String,
    pub buy: Gold,
    pub sell: Gold,
}

/// Extract every price row from the page
pub fn parse_quotes(html: &str) -> Vec<Quote> {
    price_row()
        .captures_iter(html)
        .filter_map(|caps| {
            Some(Quote {
                name: caps.get(1)?.as_str().to_string(),
                buy: caps.get(2)?.as_str().parse().ok()?,
                sell: caps.get(3)?.as_str().parse().ok()?,
            })
        })
        .collect()
}

/// Store references for quotes naming catalog items. Returns how many were stored.
pub fn ingest(catalog: &ItemCatalog, prices: &PriceTable, quotes: &[Quote]) -> usize {
    let mut skipped = 0;
    let entries: Vec<(String, Gold)> = quotes
        .iter()
        .filter_map(|q| match catalog.rarity(&q.name) {
            Some(rarity) => Some((q.name.clone(), reference_from_quotes(rarity, q.buy, q.sell))),
            None => {
                skipped += 1;
                None
            }
        })
        .collect();

    if skipped > 0 {
        debug!("[PRICES] Skipped {} quotes for unknown cards", skipped);
    }
    let stored = entries.len();
    prices.extend(entries);
    stored
}

pub struct PriceFeed {
    http: reqwest::Client,
    url: String,
    catalog: Arc<ItemCatalog>,
    prices: Arc<PriceTable>,
}

impl PriceFeed {
    pub fn new(url: &str, catalog: Arc<ItemCatalog>, prices: Arc<PriceTable>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            url: url.to_string(),
            catalog,
            prices,
        })
    }

    async fn fetch_page(&self) -> Result<String> {
        let resp = self
            .http
            .get(&self.url)
            .send()
            .await
            .with_context(|| format!("Failed to fetch {}", self.url))?
            .error_for_status()
            .context("Price page returned an error status")?;
        resp.text().await.context("Failed to read price page body")
    }

    /// Fetch once and ingest. Returns the number of references stored.
    pub async fn refresh(&self) -> Result<usize> {
        let html = self.fetch_page().await?;
        let quotes = parse_quotes(&html);
        if quotes.is_empty() {
            warn!("[PRICES] No price rows found at {}", self.url);
        }
        Ok(ingest(&self.catalog, &self.prices, &quotes))
    }

    /// Refresh every `every`, starting one period from now. Failures keep the previous table.
    pub async fn run(self, every: Duration) {
        let mut ticker = interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match self.refresh().await {
                Ok(n) => info!("[PRICES] Refreshed {} reference prices ({} known)", n, self.prices.len()),
                Err(e) => error!("[PRICES] Refresh failed: {:#}", e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogEntry, Rarity};

    const PAGE: &str = "<table><tr>\
        <td class='row1 ex'>Wolf Rider</td><td class='row1'>250g</td><td class='row1'>450g</td></tr><tr>\
        <td class='row1 ex'>Bear</td><td class='row1'>90g</td><td class='row1'>200g</td></tr><tr>\
        <td class='row1 ex'>Mystery Card</td><td class='row1'>10g</td><td class='row1'>20g</td></tr><tr>\
        <td class='row1 ex'>bad row</td><td class='row1'>10g</td><td class='row1'>20g</td>\
        </tr></table>";

    #[test]
    fn test_parse_quotes() {
        let quotes = parse_quotes(PAGE);
        assert_eq!(quotes.len(), 3);
        assert_eq!(
            quotes[0],
            Quote { name: "Wolf Rider".to_string(), buy: 250, sell: 450 }
        );
    }

    #[test]
    fn test_ingest_clamps_and_skips_unknown() {
        let catalog = ItemCatalog::new(vec![
            CatalogEntry { name: "Bear".to_string(), rarity: Rarity::Common },
            CatalogEntry { name: "Wolf Rider".to_string(), rarity: Rarity::Uncommon },
        ])
        .unwrap();
        let prices = PriceTable::new();

        let stored = ingest(&catalog, &prices, &parse_quotes(PAGE));
        assert_eq!(stored, 2);
        // (300 + 450) / 2 after clamping 250 up to 300
        assert_eq!(prices.reference("Wolf Rider"), Some(375));
        // (90 + 150) / 2 after clamping 200 down to 150
        assert_eq!(prices.reference("Bear"), Some(120));
        assert_eq!(prices.reference("Mystery Card"), None);
    }

    #[test]
    fn test_feed_construction() {
        let feed = PriceFeed::new(
            "http://127.0.0.1:9/trade",
            Arc::new(ItemCatalog::new(vec![CatalogEntry { name: "Bear".to_string(), rarity: Rarity::Common }]).unwrap()),
            Arc::new(PriceTable::new()),
        );
        assert!(feed.is_ok());
    }
}
