/// Chunked AEAD for protected prefixes above the single-shot threshold.
///
/// A 5% prefix of a 13 GiB package is still several hundred MiB, so large
/// prefixes are sealed in 1 MiB segments under one key:
///   segment_nonce = base_nonce XOR segment_index
/// Each segment's AAD ends with its index and a final flag, so segments
/// cannot be reordered, dropped or truncated without failing authentication.
use crate::crypto::aead::{self, NONCE_LEN, TAG_LEN};
use crate::crypto::sensitive::SensitiveBytes32;
use crate::error::{Result, VaultError};

pub const SEGMENT_SIZE: usize = 1024 * 1024;

fn segment_nonce(base: &[u8; NONCE_LEN], index: u64) -> [u8; NONCE_LEN] {
    let mut nonce = *base;
    for (b, i) in nonce.iter_mut().zip(index.to_le_bytes()) {
        *b ^= i;
    }
    nonce
}

fn segment_aad(base_aad: &[u8], index: u64, is_final: bool) -> Vec<u8> {
    let mut aad = Vec::with_capacity(base_aad.len() + 9);
    aad.extend_from_slice(base_aad);
    aad.extend_from_slice(&index.to_le_bytes());
    aad.push(u8::from(is_final));
    aad
}

/// Seal `plaintext` as `[seg_len(4 LE) | segment_with_tag]*`.
pub fn encrypt_segmented(
    key: &SensitiveBytes32,
    base_nonce: &[u8; NONCE_LEN],
    plaintext: &[u8],
    base_aad: &[u8],
) -> Result<Vec<u8>> {
    let total = plaintext.len().div_ceil(SEGMENT_SIZE).max(1);
    let mut out = Vec::with_capacity(plaintext.len() + total * (4 + TAG_LEN));

    for (i, segment) in plaintext
        .chunks(SEGMENT_SIZE)
        .chain(plaintext.is_empty().then_some(&[][..]))
        .enumerate()
    {
        let index = i as u64;
        let aad = segment_aad(base_aad, index, i == total - 1);
        let sealed =
            aead::encrypt_with_nonce(key, &segment_nonce(base_nonce, index), segment, &aad)?;
        out.extend_from_slice(&(sealed.len() as u32).to_le_bytes());
        out.extend_from_slice(&sealed);
    }

    Ok(out)
}

pub fn decrypt_segmented(
    key: &SensitiveBytes32,
    base_nonce: &[u8; NONCE_LEN],
    data: &[u8],
    base_aad: &[u8],
) -> Result<Vec<u8>> {
    let mut plaintext = Vec::with_capacity(data.len());
    let mut offset = 0;
    let mut index: u64 = 0;

    if data.is_empty() {
        return Err(VaultError::Decryption("missing final segment".into()));
    }

    while offset < data.len() {
        let header: [u8; 4] = data
            .get(offset..offset + 4)
            .and_then(|h| h.try_into().ok())
            .ok_or_else(|| VaultError::Decryption("truncated segment header".into()))?;
        let len = u32::from_le_bytes(header) as usize;
        offset += 4;

        let sealed = data
            .get(offset..offset + len)
            .ok_or_else(|| VaultError::Decryption("truncated segment".into()))?;
        offset += len;

        let aad = segment_aad(base_aad, index, offset >= data.len());
        let opened = aead::decrypt(key, &segment_nonce(base_nonce, index), sealed, &aad)?;
        plaintext.extend_from_slice(&opened);
        index += 1;
    }

    Ok(plaintext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::aead::{generate_key, generate_nonce};

    #[test]
    fn test_multi_segment_roundtrip() {
        let key = generate_key();
        let nonce = generate_nonce();
        let data: Vec<u8> = (0..SEGMENT_SIZE * 2 + 333).map(|i| i as u8).collect();

        let sealed = encrypt_segmented(&key, &nonce, &data, b"obj").unwrap();
        assert_eq!(decrypt_segmented(&key, &nonce, &sealed, b"obj").unwrap(), data);
    }

    #[test]
    fn test_exact_segment_boundary() {
        let key = generate_key();
        let nonce = generate_nonce();
        let data = vec![0x5A; SEGMENT_SIZE];

        let sealed = encrypt_segmented(&key, &nonce, &data, b"").unwrap();
        assert_eq!(sealed.len(), 4 + SEGMENT_SIZE + TAG_LEN);
        assert_eq!(decrypt_segmented(&key, &nonce, &sealed, b"").unwrap(), data);
    }

    #[test]
    fn test_empty_plaintext_has_final_segment() {
        let key = generate_key();
        let nonce = generate_nonce();
        let sealed = encrypt_segmented(&key, &nonce, b"", b"").unwrap();
        assert!(decrypt_segmented(&key, &nonce, &sealed, b"").unwrap().is_empty());
    }

    #[test]
    fn test_truncation_detected() {
        let key = generate_key();
        let nonce = generate_nonce();
        let data = vec![7u8; SEGMENT_SIZE + 10];
        let sealed = encrypt_segmented(&key, &nonce, &data, b"").unwrap();

        // drop the final segment: the new last segment was not sealed as final
        let first_len = 4 + SEGMENT_SIZE + TAG_LEN;
        assert!(decrypt_segmented(&key, &nonce, &sealed[..first_len], b"").is_err());
    }
}
