use serde::{Deserialize, Serialize};
use std::io;

/// Payloads smaller than this are never compressed.
pub const COMPRESSION_THRESHOLD: usize = 1024;

const ZSTD_LEVEL: i32 = 3;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionKind {
    #[default]
    None,
    Zstd,
}

/// Compress when the payload crosses the threshold and compression actually
/// shrinks it; otherwise the bytes pass through untouched.
pub fn maybe_compress(data: &[u8]) -> io::Result<(Vec<u8>, CompressionKind)> {
    if data.len() < COMPRESSION_THRESHOLD {
        return Ok((data.to_vec(), CompressionKind::None));
    }
    let compressed = zstd::encode_all(data, ZSTD_LEVEL)?;
    if compressed.len() < data.len() {
        Ok((compressed, CompressionKind::Zstd))
    } else {
        Ok((data.to_vec(), CompressionKind::None))
    }
}

pub fn decompress(data: &[u8], kind: CompressionKind) -> io::Result<Vec<u8>> {
    match kind {
        CompressionKind::None => Ok(data.to_vec()),
        CompressionKind::Zstd => zstd::decode_all(data),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_payloads_pass_through() {
        let data = vec![1u8; 100];
        let (out, kind) = maybe_compress(&data).unwrap();
        assert_eq!(kind, CompressionKind::None);
        assert_eq!(out, data);
    }

    #[test]
    fn large_compressible_payload_round_trips() {
        let data: Vec<u8> = b"abcdef".iter().cycle().take(8 * 1024).copied().collect();
        let (out, kind) = maybe_compress(&data).unwrap();
        assert_eq!(kind, CompressionKind::Zstd);
        assert!(out.len() < data.len());
        assert_eq!(decompress(&out, kind).unwrap(), data);
    }

    #[test]
    fn incompressible_payload_stays_raw() {
        // pseudo-random bytes do not shrink under zstd
        let mut state = 0x12345678u32;
        let data: Vec<u8> = (0..4096)
            .map(|_| {
                state = state.wrapping_mul(1664525).wrapping_add(1013904223);
                (state >> 24) as u8
            })
            .collect();
        let (out, kind) = maybe_compress(&data).unwrap();
        if kind == CompressionKind::None {
            assert_eq!(out, data);
        } else {
            assert!(out.len() < data.len());
        }
    }
}
