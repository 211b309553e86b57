use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use serde::Deserialize;
use std::{collections::HashMap, str::FromStr, time::Duration};
use tracing::debug;

use crate::{
    config::ExchangeConfig,
    exchange::traits::{MarketData, Ticker},
    types::PriceQuote,
};

/// Public `returnTicker` endpoint. Needs no credentials.
pub struct PoloniexTicker {
    http: reqwest::Client,
    ticker_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTickerEntry {
    highest_bid: String,
    lowest_ask: String,
}

impl PoloniexTicker {
    pub fn new(config: &ExchangeConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| anyhow!("Failed to build HTTP client: {}", e))?;

        Ok(Self {
            http,
            ticker_url: config.ticker_url.clone(),
        })
    }
}

/// Parses a `returnTicker` body, where every price is a decimal string.
pub fn parse_ticker(body: &str) -> Result<Ticker> {
    let raw: HashMap<String, RawTickerEntry> = serde_json::from_str(body)
        .map_err(|e| anyhow!("Malformed ticker response: {}", e))?;

    raw.into_iter()
        .map(|(pair, entry)| {
            let highest_bid = BigDecimal::from_str(&entry.highest_bid)
                .map_err(|e| anyhow!("Invalid highestBid for {}: {}", pair, e))?;
            let lowest_ask = BigDecimal::from_str(&entry.lowest_ask)
                .map_err(|e| anyhow!("Invalid lowestAsk for {}: {}", pair, e))?;

            let quote = PriceQuote {
                pair: pair.clone(),
                highest_bid,
                lowest_ask,
            };
            Ok((pair, quote))
        })
        .collect()
}

#[async_trait]
impl MarketData for PoloniexTicker {
    fn name(&self) -> &str {
        "Poloniex"
    }

    async fn fetch_ticker(&self) -> Result<Ticker> {
        let response = self
            .http
            .get(&self.ticker_url)
            .send()
            .await
            .map_err(|e| anyhow!("Ticker request failed: {}", e))?
            .error_for_status()
            .map_err(|e| anyhow!("Ticker request rejected: {}", e))?;

        let body = response
            .text()
            .await
            .map_err(|e| anyhow!("Failed to read ticker response: {}", e))?;

        let ticker = parse_ticker(&body)?;
        debug!("Fetched ticker with {} pairs", ticker.len());
        Ok(ticker)
    }
}
