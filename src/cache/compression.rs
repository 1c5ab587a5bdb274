//! Optional zstd compression of L1 payloads.
//!
//! Compressed payloads are recognised by the zstd frame magic, so an L1
//! tier can hold a mix of compressed and plain entries (e.g. after
//! compression is toggled) and [`decompress`] handles both.
//!
//! L2 payloads are never compressed: other processes and tools read the
//! shared store and expect plain JSON.

/// Zstd magic bytes (little-endian): 0xFD2FB528
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];

/// Level 3 favours speed; L1 sits on the request path.
const COMPRESSION_LEVEL: i32 = 3;

/// Payloads smaller than this are stored as-is; the frame overhead would
/// eat the savings.
pub const MIN_COMPRESS_BYTES: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum CompressionError {
    #[error("compression failed: {0}")]
    CompressFailed(String),
    #[error("decompression failed: {0}")]
    DecompressFailed(String),
}

#[inline]
#[must_use]
pub fn is_compressed(data: &[u8]) -> bool {
    data.len() >= 4 && data[..4] == ZSTD_MAGIC
}

/// Compress `data` unless it is too small to benefit. Returns the stored
/// bytes and whether they are compressed.
pub fn compress(data: &[u8]) -> Result<(Vec<u8>, bool), CompressionError> {
    if data.len() < MIN_COMPRESS_BYTES {
        return Ok((data.to_vec(), false));
    }
    let compressed = zstd::encode_all(data, COMPRESSION_LEVEL)
        .map_err(|e| CompressionError::CompressFailed(e.to_string()))?;
    // Incompressible input: keep the original
    if compressed.len() >= data.len() {
        return Ok((data.to_vec(), false));
    }
    Ok((compressed, true))
}

/// Decompress if the payload carries the zstd magic; plain payloads are
/// returned unchanged.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>, CompressionError> {
    if is_compressed(data) {
        zstd::decode_all(data).map_err(|e| CompressionError::DecompressFailed(e.to_string()))
    } else {
        Ok(data.to_vec())
    }
}

/// Running original/stored byte totals for the `compression_ratio` stat.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CompressionTotals {
    pub original_bytes: u64,
    pub stored_bytes: u64,
}

impl CompressionTotals {
    pub fn record(&mut self, original: usize, stored: usize) {
        self.original_bytes += original as u64;
        self.stored_bytes += stored as u64;
    }

    /// `original / stored`; 1.0 before anything was written.
    #[must_use]
    pub fn ratio(&self) -> f64 {
        if self.stored_bytes == 0 {
            1.0
        } else {
            self.original_bytes as f64 / self.stored_bytes as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_product_payload_compresses() {
        let product = json!({
            "products": (0..50).map(|i| json!({
                "sku": format!("SKU-{i:05}"),
                "title": "Stainless steel water bottle 750ml",
                "status": "onsale",
                "currency": "USD",
            })).collect::<Vec<_>>()
        });
        let raw = serde_json::to_vec(&product).unwrap();

        let (stored, compressed) = compress(&raw).unwrap();
        assert!(compressed);
        assert!(is_compressed(&stored));
        assert!(stored.len() < raw.len() / 2);
        assert_eq!(decompress(&stored).unwrap(), raw);
    }

    #[test]
    fn test_small_payload_kept_plain() {
        let (stored, compressed) = compress(b"{\"qty\":3}").unwrap();
        assert!(!compressed);
        assert_eq!(stored, b"{\"qty\":3}");
        assert_eq!(decompress(&stored).unwrap(), b"{\"qty\":3}");
    }

    #[test]
    fn test_is_compressed_detection() {
        assert!(!is_compressed(b""));
        assert!(!is_compressed(b"abc"));
        assert!(!is_compressed(b"{\"test\": \"data\"}"));
    }

    #[test]
    fn test_totals_ratio() {
        let mut totals = CompressionTotals::default();
        assert_eq!(totals.ratio(), 1.0);
        totals.record(1000, 250);
        totals.record(100, 100);
        assert!((totals.ratio() - 1100.0 / 350.0).abs() < 1e-9);
    }
}
