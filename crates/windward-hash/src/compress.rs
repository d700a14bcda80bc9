//! Trade payload compression.
//!
//! Trades travel as a self-describing container: gzip (fixed at level 1 to
//! keep encode latency bounded on 10⁶-trade payloads) over a compact JSON
//! projection `[[ticker, method, entry-price-as-string], …]`, then base64.
//! Decode restores the exact ordered list; prices parse losslessly back
//! into u128.

use std::io::{Read, Write};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};

use windward_core::error::WindwardError;
use windward_core::types::Trade;

/// Wire container for a compressed trade list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradePayload {
    /// base64 of gzip-1 over the JSON projection.
    pub data: String,
    pub original_size: usize,
    pub compressed_size: usize,
    pub count: usize,
}

/// Compress an ordered trade list into a wire container.
pub fn encode(trades: &[Trade]) -> Result<TradePayload, WindwardError> {
    let projection: Vec<(&str, &str, String)> = trades
        .iter()
        .map(|t| (t.ticker.as_str(), t.method.as_str(), t.entry_price.to_string()))
        .collect();
    let json = serde_json::to_vec(&projection)?;
    let original_size = json.len();

    let mut encoder = GzEncoder::new(Vec::new(), Compression::new(1));
    encoder.write_all(&json)?;
    let compressed = encoder.finish()?;
    let compressed_size = compressed.len();

    Ok(TradePayload {
        data: BASE64.encode(compressed),
        original_size,
        compressed_size,
        count: trades.len(),
    })
}

/// Restore the exact ordered trade list from a wire container.
pub fn decode(payload: &TradePayload) -> Result<Vec<Trade>, WindwardError> {
    let compressed = BASE64
        .decode(&payload.data)
        .map_err(|e| WindwardError::Serialization(format!("payload base64: {e}")))?;

    let mut json = Vec::with_capacity(payload.original_size);
    GzDecoder::new(compressed.as_slice()).read_to_end(&mut json)?;

    let projection: Vec<(String, String, String)> = serde_json::from_slice(&json)?;
    if projection.len() != payload.count {
        return Err(WindwardError::InvalidPortfolio(format!(
            "container claims {} trades, payload holds {}",
            payload.count,
            projection.len()
        )));
    }

    projection
        .into_iter()
        .map(|(ticker, method, price)| {
            let entry_price = price.parse().map_err(|e| {
                WindwardError::InvalidPortfolio(format!("price '{price}' not a u128: {e}"))
            })?;
            Ok(Trade { ticker, method, entry_price })
        })
        .collect()
}
