//! Exit-price fetching.
//!
//! Bet-scoped cache keyed by (bet-id, snapshot-id) with a 5-minute TTL.
//! Primary path is one batch call returning every requested ticker's close;
//! the fallback fetches per ticker in parallel. The deterministic hash over
//! the price array lets two parties detect disagreement without revealing
//! prices.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use sha3::Digest as _;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use windward_core::constants::EXIT_PRICE_CACHE_TTL_SECS;
use windward_core::error::WindwardError;
use windward_core::retry::{retry_async, RetryPolicy};
use windward_core::types::{Amount, BetId, Digest};
use windward_crypto::Keccak256;

/// Resolution of one trade index: a close price, or a cancelled market.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitPrice {
    Price(Amount),
    Cancelled,
}

/// Source of exit prices; the coordinator depends on this seam.
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn exit_prices(
        &self,
        bet_id: BetId,
        snapshot_id: &str,
        tickers: &[String],
    ) -> Result<Vec<ExitPrice>, WindwardError>;
}

/// Require every index in `[0, expected)` to be resolved.
pub fn validate(prices: &[ExitPrice], expected: usize, bet_id: BetId) -> Result<(), WindwardError> {
    if prices.len() != expected {
        return Err(WindwardError::MissingExitPrices {
            bet_id: bet_id.0,
            missing: expected.saturating_sub(prices.len()),
            total: expected,
        });
    }
    Ok(())
}

/// Deterministic digest over the resolved price array. Cancelled entries
/// hash as a fixed marker so both sides agree on the framing.
pub fn hash(prices: &[ExitPrice]) -> Digest {
    let mut h = Keccak256::new();
    for p in prices {
        match p {
            ExitPrice::Price(v) => h.update(v.to_string().as_bytes()),
            ExitPrice::Cancelled => h.update(b"X"),
        }
        h.update(b"|");
    }
    let out = h.finalize();
    let mut arr = [0u8; 32];
    arr.copy_from_slice(&out);
    Digest::from_bytes(arr)
}

struct CacheEntry {
    prices: Vec<ExitPrice>,
    fetched_at: Instant,
}

/// HTTP fetcher against the price backend.
pub struct ExitPriceFetcher {
    backend_url: String,
    retry: RetryPolicy,
    ttl: Duration,
    client: reqwest::Client,
    cache: Mutex<HashMap<(BetId, String), CacheEntry>>,
}

impl ExitPriceFetcher {
    pub fn new(backend_url: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            backend_url: backend_url.into(),
            retry,
            ttl: Duration::from_secs(EXIT_PRICE_CACHE_TTL_SECS),
            client: reqwest::Client::new(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Batch call: every requested ticker in one response.
    async fn fetch_batch(
        &self,
        snapshot_id: &str,
        tickers: &[String],
    ) -> Result<Vec<ExitPrice>, WindwardError> {
        let url = format!(
            "{}/prices/close?snapshot={}&tickers={}",
            self.backend_url.trim_end_matches('/'),
            snapshot_id,
            tickers.join(",")
        );
        let body: serde_json::Value = retry_async(&self.retry, "prices_batch", |_| async {
            let resp = self
                .client
                .get(&url)
                .send()
                .await
                .map_err(|e| WindwardError::Transport(format!("prices: {e}")))?;
            if !resp.status().is_success() {
                return Err(WindwardError::HttpStatus {
                    status: resp.status().as_u16(),
                    url: url.clone(),
                });
            }
            resp.json()
                .await
                .map_err(|e| WindwardError::Serialization(format!("prices body: {e}")))
        })
        .await?;

        let map = body
            .get("prices")
            .and_then(|p| p.as_object())
            .ok_or_else(|| WindwardError::Serialization("prices: missing object".into()))?;

        tickers
            .iter()
            .map(|ticker| match map.get(ticker) {
                Some(serde_json::Value::Null) => Ok(ExitPrice::Cancelled),
                Some(serde_json::Value::String(s)) => s
                    .parse()
                    .map(ExitPrice::Price)
                    .map_err(|e| WindwardError::Serialization(format!("price '{s}': {e}"))),
                // An absent ticker is missing data, never a cancellation.
                _ => Err(WindwardError::Serialization(format!("price for {ticker} absent"))),
            })
            .collect()
    }

    /// Fallback: one request per ticker, in parallel. 404 means the market
    /// was cancelled.
    async fn fetch_each(
        &self,
        snapshot_id: &str,
        tickers: &[String],
    ) -> Result<Vec<ExitPrice>, WindwardError> {
        let fetches = tickers.iter().map(|ticker| {
            let url = format!(
                "{}/prices/close/{}?snapshot={}",
                self.backend_url.trim_end_matches('/'),
                ticker,
                snapshot_id
            );
            let client = self.client.clone();
            let retry = self.retry;
            async move {
                retry_async(&retry, "price_single", |_| {
                    let client = client.clone();
                    let url = url.clone();
                    async move {
                        let resp = client
                            .get(&url)
                            .send()
                            .await
                            .map_err(|e| WindwardError::Transport(format!("price: {e}")))?;
                        if resp.status().as_u16() == 404 {
                            return Ok(ExitPrice::Cancelled);
                        }
                        if !resp.status().is_success() {
                            return Err(WindwardError::HttpStatus {
                                status: resp.status().as_u16(),
                                url,
                            });
                        }
                        let body: serde_json::Value = resp
                            .json()
                            .await
                            .map_err(|e| WindwardError::Serialization(format!("price body: {e}")))?;
                        let s = body
                            .get("price")
                            .and_then(|p| p.as_str())
                            .ok_or_else(|| WindwardError::Serialization("price: missing field".into()))?;
                        s.parse()
                            .map(ExitPrice::Price)
                            .map_err(|e| WindwardError::Serialization(format!("price '{s}': {e}")))
                    }
                })
                .await
            }
        });

        futures::future::join_all(fetches).await.into_iter().collect()
    }
}

#[async_trait]
impl PriceSource for ExitPriceFetcher {
    async fn exit_prices(
        &self,
        bet_id: BetId,
        snapshot_id: &str,
        tickers: &[String],
    ) -> Result<Vec<ExitPrice>, WindwardError> {
        let key = (bet_id, snapshot_id.to_string());
        {
            let cache = self.cache.lock().await;
            if let Some(entry) = cache.get(&key) {
                if entry.fetched_at.elapsed() < self.ttl {
                    debug!(%bet_id, snapshot_id, "exit prices served from cache");
                    return Ok(entry.prices.clone());
                }
            }
        }

        let prices = match self.fetch_batch(snapshot_id, tickers).await {
            Ok(p) => p,
            Err(e) => {
                warn!(%bet_id, error = %e, "batch price fetch failed, falling back per ticker");
                self.fetch_each(snapshot_id, tickers).await?
            }
        };

        validate(&prices, tickers.len(), bet_id)?;
        let mut cache = self.cache.lock().await;
        cache.insert(key, CacheEntry { prices: prices.clone(), fetched_at: Instant::now() });
        Ok(prices)
    }
}
