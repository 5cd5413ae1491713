use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::io::{Read, Write};

use crate::error::{MetricsError, Result};

/// Gzip-compress a body
pub fn compress(body: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(body.len() / 2), Compression::default());
    encoder
        .write_all(body)
        .map_err(|e| MetricsError::Compression(format!("failed to compress body: {}", e)))?;
    encoder
        .finish()
        .map_err(|e| MetricsError::Compression(format!("failed to finish gzip stream: {}", e)))
}

/// Inflate a gzip body, failing once the output grows past `limit` bytes
pub fn decompress_limited(body: &[u8], limit: usize) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(body.len().saturating_mul(2).min(limit));
    GzDecoder::new(body)
        .take((limit as u64).saturating_add(1))
        .read_to_end(&mut out)
        .map_err(|e| MetricsError::Compression(format!("failed to decompress body: {}", e)))?;
    if out.len() > limit {
        return Err(MetricsError::Compression(format!(
            "decompressed body exceeds {} bytes",
            limit
        )));
    }
    Ok(out)
}

/// Inflate a gzip body
pub fn decompress(body: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(body);
    let mut out = Vec::with_capacity(body.len() * 2);
    decoder
        .read_to_end(&mut out)
        .map_err(|e| MetricsError::Compression(format!("failed to decompress body: {}", e)))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compress_then_decompress() {
        let body = br#"[{"id":"PollCount","type":"counter","delta":1}]"#;
        let packed = compress(body).unwrap();
        assert_ne!(packed.as_slice(), &body[..]);
        assert_eq!(decompress(&packed).unwrap(), body);
    }

    #[test]
    fn test_decompress_limit() {
        let packed = compress(&[0u8; 1000]).unwrap();
        assert_eq!(decompress_limited(&packed, 1000).unwrap().len(), 1000);
        assert!(matches!(
            decompress_limited(&packed, 999),
            Err(MetricsError::Compression(_))
        ));
    }

    #[test]
    fn test_decompress_garbage() {
        assert!(matches!(
            decompress(b"definitely not gzip"),
            Err(MetricsError::Compression(_))
        ));
    }
}
