//! Portfolio root hashing.
//!
//! Framing: `{snapshot-id}|{ticker}:{method}:{entry-price}|…` fed straight
//! into Keccak-256. Ordering is carried by sequence position only — the
//! framing never embeds a trade index. Three input shapes produce the same
//! digest for the same logical list: owned `Trade` rows, columnar arrays,
//! and a raw method/price buffer.

use sha3::Digest as _;

use windward_core::error::WindwardError;
use windward_core::types::{Amount, Digest, Trade};
use windward_crypto::Keccak256;

/// Maximum decimal digits of a u128.
const DEC_MAX: usize = 39;

/// Write `v` as decimal into `buf`, returning the used suffix.
fn dec(buf: &mut [u8; DEC_MAX], v: Amount) -> &[u8] {
    if v == 0 {
        buf[DEC_MAX - 1] = b'0';
        return &buf[DEC_MAX - 1..];
    }
    let mut v = v;
    let mut i = DEC_MAX;
    while v > 0 {
        i -= 1;
        buf[i] = b'0' + (v % 10) as u8;
        v /= 10;
    }
    &buf[i..]
}

/// Write `n` as decimal left-padded with zeros to at least `width` digits.
fn dec_padded(buf: &mut [u8; DEC_MAX], n: usize, width: usize) -> &[u8] {
    let mut i = DEC_MAX;
    let mut v = n;
    loop {
        i -= 1;
        buf[i] = b'0' + (v % 10) as u8;
        v /= 10;
        if v == 0 {
            break;
        }
    }
    while DEC_MAX - i < width && i > 0 {
        i -= 1;
        buf[i] = b'0';
    }
    &buf[i..]
}

fn finish(h: Keccak256) -> Digest {
    let out = h.finalize();
    let mut arr = [0u8; 32];
    arr.copy_from_slice(&out);
    Digest::from_bytes(arr)
}

/// Root hash over an owned trade list.
pub fn root(snapshot_id: &str, trades: &[Trade]) -> Digest {
    let mut h = Keccak256::new();
    let mut num = [0u8; DEC_MAX];
    h.update(snapshot_id.as_bytes());
    for t in trades {
        h.update(b"|");
        h.update(t.ticker.as_bytes());
        h.update(b":");
        h.update(t.method.as_bytes());
        h.update(b":");
        h.update(dec(&mut num, t.entry_price));
    }
    finish(h)
}

/// Root hash over columnar inputs: tickers are `{prefix}{ordinal}` with the
/// ordinal zero-padded to `ticker_pad_width`, methods are dictionary indices.
///
/// Avoids allocating per-trade rows; the digest equals [`root`] over the
/// equivalent expanded list.
pub fn root_columnar(
    snapshot_id: &str,
    ticker_prefix: &str,
    ticker_pad_width: usize,
    method_dictionary: &[&str],
    method_indices: &[u8],
    entry_prices: &[Amount],
) -> Result<Digest, WindwardError> {
    if method_indices.len() != entry_prices.len() {
        return Err(WindwardError::InvalidPortfolio(format!(
            "column length mismatch: {} methods vs {} prices",
            method_indices.len(),
            entry_prices.len()
        )));
    }

    let mut h = Keccak256::new();
    let mut num = [0u8; DEC_MAX];
    h.update(snapshot_id.as_bytes());
    for (i, (&mi, &price)) in method_indices.iter().zip(entry_prices).enumerate() {
        let method = method_dictionary.get(mi as usize).ok_or_else(|| {
            WindwardError::InvalidPortfolio(format!("method index {mi} out of range at row {i}"))
        })?;
        h.update(b"|");
        h.update(ticker_prefix.as_bytes());
        h.update(dec_padded(&mut num, i, ticker_pad_width));
        h.update(b":");
        h.update(method.as_bytes());
        h.update(b":");
        h.update(dec(&mut num, price));
    }
    Ok(finish(h))
}

/// Root hash over a raw buffer: `count` one-byte method-dictionary indices
/// followed by `count` 16-byte big-endian u128 entry prices.
pub fn root_from_buffer(
    snapshot_id: &str,
    ticker_prefix: &str,
    ticker_pad_width: usize,
    method_dictionary: &[&str],
    buffer: &[u8],
    count: usize,
) -> Result<Digest, WindwardError> {
    let expected = count + count * 16;
    if buffer.len() != expected {
        return Err(WindwardError::InvalidPortfolio(format!(
            "buffer length {} does not match count {count} (expected {expected})",
            buffer.len()
        )));
    }

    let (methods, prices) = buffer.split_at(count);
    let mut h = Keccak256::new();
    let mut num = [0u8; DEC_MAX];
    h.update(snapshot_id.as_bytes());
    for i in 0..count {
        let mi = methods[i];
        let method = method_dictionary.get(mi as usize).ok_or_else(|| {
            WindwardError::InvalidPortfolio(format!("method index {mi} out of range at row {i}"))
        })?;
        let mut pb = [0u8; 16];
        pb.copy_from_slice(&prices[i * 16..(i + 1) * 16]);
        let price = Amount::from_be_bytes(pb);

        h.update(b"|");
        h.update(ticker_prefix.as_bytes());
        h.update(dec_padded(&mut num, i, ticker_pad_width));
        h.update(b":");
        h.update(method.as_bytes());
        h.update(b":");
        h.update(dec(&mut num, price));
    }
    Ok(finish(h))
}
