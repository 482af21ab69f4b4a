//! Fixed-width byte encoding for embedding vectors.
//!
//! Vectors are stored in SQLite as BLOBs: 4 bytes per component,
//! little-endian f32, length = 4 * dimension. Decoding and similarity
//! fail loudly on malformed input — a bad blob or a dimension mismatch
//! is a bug, not an expected runtime condition.

use anyhow::{bail, Result};

/// Pack a vector into its 4-byte-per-float little-endian encoding.
pub fn serialize(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Unpack a vector previously encoded with [`serialize`].
///
/// Errors if the byte length is not a multiple of 4.
pub fn deserialize(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        bail!(
            "malformed embedding blob: {} bytes is not a multiple of 4",
            bytes.len()
        );
    }

    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

/// Cosine similarity between two vectors of equal dimension.
///
/// Returns `0.0` when either vector has zero norm. Errors on a length
/// mismatch rather than silently comparing incomparable vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        bail!(
            "embedding dimension mismatch: {} vs {}",
            a.len(),
            b.len()
        );
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += f64::from(*x) * f64::from(*y);
        norm_a += f64::from(*x) * f64::from(*x);
        norm_b += f64::from(*y) * f64::from(*y);
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(0.0);
    }

    Ok((dot / (norm_a.sqrt() * norm_b.sqrt())) as f32)
}
