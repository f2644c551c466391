/// BLAKE3 helpers: content digests for stored chunks and per-object key derivation.

/// Digest of a chunk's bytes.
pub fn hash(data: &[u8]) -> [u8; 32] {
    blake3::hash(data).into()
}

/// Hex digest, used as the local content id of an encoded blob.
pub fn content_digest(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

/// Keyed hash for domain-separated derivations.
pub fn keyed_hash(key: &[u8; 32], data: &[u8]) -> [u8; 32] {
    blake3::keyed_hash(key, data).into()
}

/// Derive 32 bytes from input keying material under a fixed context string.
pub fn derive_key(context: &str, ikm: &[u8]) -> [u8; 32] {
    blake3::derive_key(context, ikm)
}
