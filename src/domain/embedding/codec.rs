//! On-disk vector encodings
//!
//! The preferred form packs the vector as little-endian f32 and base64s
//! it behind a short tag. Older rows store a comma-separated decimal
//! list (sometimes bracketed); those decode fine and are re-encoded in
//! the packed form the next time the record is written.

use base64::{Engine as _, engine::general_purpose::STANDARD};

use crate::domain::DomainError;

const BINARY_TAG: &str = "f32le:";

/// Encode a vector in the packed binary form.
pub fn encode(vector: &[f32]) -> String {
    let mut bytes = Vec::with_capacity(vector.len() * 4);

    for value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }

    format!("{}{}", BINARY_TAG, STANDARD.encode(bytes))
}

/// Whether an encoded value uses the packed binary form.
pub fn is_binary(encoded: &str) -> bool {
    encoded.starts_with(BINARY_TAG)
}

/// Decode either encoding into a vector.
pub fn decode(encoded: &str) -> Result<Vec<f32>, DomainError> {
    if let Some(b64) = encoded.strip_prefix(BINARY_TAG) {
        decode_binary(b64)
    } else {
        decode_textual(encoded)
    }
}

fn decode_binary(b64: &str) -> Result<Vec<f32>, DomainError> {
    let bytes = STANDARD
        .decode(b64)
        .map_err(|e| DomainError::storage(format!("invalid base64 embedding: {}", e)))?;

    if bytes.len() % 4 != 0 {
        return Err(DomainError::storage(format!(
            "packed embedding length {} is not a multiple of 4",
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

fn decode_textual(encoded: &str) -> Result<Vec<f32>, DomainError> {
    let trimmed = encoded
        .trim()
        .trim_start_matches('[')
        .trim_end_matches(']');

    if trimmed.is_empty() {
        return Err(DomainError::storage("empty embedding encoding"));
    }

    trimmed
        .split(',')
        .map(|part| {
            part.trim()
                .parse::<f32>()
                .map_err(|e| DomainError::storage(format!("invalid embedding component: {}", e)))
        })
        .collect()
}
