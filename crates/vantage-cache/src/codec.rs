//! In-band compression of stored values.
//!
//! Values larger than the threshold are zlib-compressed and prefixed with
//! `COMPRESSED:`. The compressed form is kept only when it is smaller than the
//! raw bytes, so a stored value is never larger than its payload.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::error::CacheResult;

pub const COMPRESSED_PREFIX: &[u8] = b"COMPRESSED:";

pub fn encode(raw: Vec<u8>, threshold: usize) -> CacheResult<Vec<u8>> {
    if raw.len() <= threshold {
        return Ok(raw);
    }

    let mut encoder = ZlibEncoder::new(Vec::with_capacity(raw.len() / 2), Compression::default());
    encoder.write_all(&raw)?;
    let compressed = encoder.finish()?;

    if compressed.len() + COMPRESSED_PREFIX.len() < raw.len() {
        let mut out = Vec::with_capacity(COMPRESSED_PREFIX.len() + compressed.len());
        out.extend_from_slice(COMPRESSED_PREFIX);
        out.extend_from_slice(&compressed);
        Ok(out)
    } else {
        Ok(raw)
    }
}

pub fn decode(stored: Vec<u8>) -> CacheResult<Vec<u8>> {
    match stored.strip_prefix(COMPRESSED_PREFIX) {
        Some(body) => {
            let mut decoder = ZlibDecoder::new(body);
            let mut raw = Vec::new();
            decoder.read_to_end(&mut raw)?;
            Ok(raw)
        }
        None => Ok(stored),
    }
}

pub fn is_compressed(stored: &[u8]) -> bool {
    stored.starts_with(COMPRESSED_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_values_stored_raw() {
        let raw = b"{\"a\":1}".to_vec();
        let stored = encode(raw.clone(), 1024).unwrap();
        assert_eq!(stored, raw);
        assert!(!is_compressed(&stored));
    }

    #[test]
    fn test_large_repetitive_values_compressed() {
        let raw = "tehran,restaurant,".repeat(500).into_bytes();
        let stored = encode(raw.clone(), 1024).unwrap();
        assert!(is_compressed(&stored));
        assert!(stored.len() < raw.len());
        assert_eq!(decode(stored).unwrap(), raw);
    }

    #[test]
    fn test_incompressible_values_kept_raw() {
        // Pseudo-random bytes from a simple LCG do not shrink under zlib.
        let mut state: u32 = 12345;
        let raw: Vec<u8> = (0..4096)
            .map(|_| {
                state = state.wrapping_mul(1_103_515_245).wrapping_add(12345);
                (state >> 16) as u8
            })
            .collect();
        let stored = encode(raw.clone(), 1024).unwrap();
        assert!(stored.len() <= raw.len());
        assert_eq!(decode(stored).unwrap(), raw);
    }

    #[test]
    fn test_corrupt_compressed_value_is_an_error() {
        let mut stored = COMPRESSED_PREFIX.to_vec();
        stored.extend_from_slice(b"not zlib");
        assert!(decode(stored).is_err());
    }
}
