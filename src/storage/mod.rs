/// Blob storage boundary.
///
/// Storing a chunk is four phases: encode the bytes, reserve space for them,
/// transfer them, then certify the blob so the network vouches for it. A
/// chunk id exists only after certification. [`publish_blob`] runs the phases
/// in order; callers retry the whole sequence, not individual phases.
pub mod memory;
pub mod walrus;

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::crypto::hash;
use crate::error::{Result, VaultError};
use crate::ledger::AccountAddress;

pub use memory::MemoryStore;
pub use walrus::{WalrusConfig, WalrusStore};

/// Default storage lifetime, in storage-network epochs.
pub const DEFAULT_EPOCHS: u32 = 2;

/// Prefix of placeholder ids written by old clients that never finished storing.
const PLACEHOLDER_PREFIX: &str = "walrus_";

/// Identifier of a certified blob.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkId(String);

impl ChunkId {
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(VaultError::InvalidInput("empty chunk id".into()));
        }
        if s.starts_with(PLACEHOLDER_PREFIX) {
            return Err(VaultError::InvalidInput(format!(
                "{s} is a placeholder, not a stored blob"
            )));
        }
        Ok(Self(s.to_string()))
    }

    /// Blank means absent.
    pub fn parse_optional(s: &str) -> Result<Option<Self>> {
        if s.trim().is_empty() {
            return Ok(None);
        }
        Self::parse(s).map(Some)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A named payload ready to be stored.
#[derive(Debug, Clone)]
pub struct BlobFile {
    pub identifier: String,
    pub content_type: String,
    pub data: Bytes,
}

impl BlobFile {
    pub fn new(identifier: impl Into<String>, content_type: &str, data: impl Into<Bytes>) -> Self {
        Self {
            identifier: identifier.into(),
            content_type: content_type.to_string(),
            data: data.into(),
        }
    }
}

/// Output of the encode phase.
#[derive(Debug, Clone)]
pub struct EncodedBlob {
    pub identifier: String,
    pub content_type: String,
    /// BLAKE3 hex digest of `data`.
    pub digest: String,
    pub data: Bytes,
}

impl EncodedBlob {
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub id: String,
    pub epochs: u32,
    pub owner: AccountAddress,
}

#[derive(Debug, Clone)]
pub struct TransferReceipt {
    pub reservation_id: String,
    pub bytes: u64,
    /// Blob id assigned by the network, when the transfer already yields one.
    pub remote_id: Option<String>,
}

/// A certified chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredChunk {
    pub id: ChunkId,
    pub identifier: String,
    pub size: u64,
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    fn name(&self) -> &str;

    async fn encode(&self, file: BlobFile) -> Result<EncodedBlob> {
        Ok(EncodedBlob {
            digest: hash::content_digest(&file.data),
            identifier: file.identifier,
            content_type: file.content_type,
            data: file.data,
        })
    }

    async fn reserve(
        &self,
        blob: &EncodedBlob,
        epochs: u32,
        owner: &AccountAddress,
    ) -> Result<Reservation>;

    async fn transfer(&self, blob: &EncodedBlob, reservation: &Reservation)
        -> Result<TransferReceipt>;

    async fn certify(
        &self,
        blob: &EncodedBlob,
        reservation: &Reservation,
        receipt: &TransferReceipt,
    ) -> Result<StoredChunk>;

    async fn retrieve(&self, id: &ChunkId) -> Result<Bytes>;
}

/// Run encode, reserve, transfer and certify for one file.
pub async fn publish_blob(
    store: &dyn BlobStore,
    file: BlobFile,
    epochs: u32,
    owner: &AccountAddress,
) -> Result<StoredChunk> {
    let blob = store.encode(file).await?;
    let reservation = store.reserve(&blob, epochs, owner).await?;
    let receipt = store.transfer(&blob, &reservation).await?;
    let chunk = store.certify(&blob, &reservation, &receipt).await?;
    debug!(
        store = store.name(),
        identifier = %chunk.identifier,
        id = %chunk.id,
        size = chunk.size,
        "Blob certified"
    );
    Ok(chunk)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_id_parse() {
        assert_eq!(ChunkId::parse(" abc ").unwrap().as_str(), "abc");
        assert!(ChunkId::parse("").is_err());
        assert!(ChunkId::parse("walrus_1712345").is_err());
    }

    #[test]
    fn test_chunk_id_optional() {
        assert!(ChunkId::parse_optional("").unwrap().is_none());
        assert!(ChunkId::parse_optional("   ").unwrap().is_none());
        assert!(ChunkId::parse_optional("xyz").unwrap().is_some());
        assert!(ChunkId::parse_optional("walrus_x").is_err());
    }
}
