/// In-memory blob store.
///
/// Content-addressed by BLAKE3 digest. Reservations that are never certified
/// stay visible through [`MemoryStore::pending_reservations`], which is how
/// tests observe orphaned storage after a failed publish.
use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{BlobStore, ChunkId, EncodedBlob, Reservation, StoredChunk, TransferReceipt};
use crate::crypto::hash;
use crate::error::{Result, VaultError};
use crate::ledger::AccountAddress;

#[derive(Default)]
pub struct MemoryStore {
    blobs: RwLock<HashMap<ChunkId, Bytes>>,
    reservations: RwLock<HashMap<String, Reservation>>,
    /// Transferred but not yet certified.
    staged: RwLock<HashMap<String, Bytes>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn contains(&self, id: &ChunkId) -> bool {
        self.blobs.read().await.contains_key(id)
    }

    pub async fn pending_reservations(&self) -> Vec<Reservation> {
        self.reservations.read().await.values().cloned().collect()
    }

    /// Replace a stored blob's bytes, bypassing certification.
    pub async fn overwrite(&self, id: &ChunkId, data: impl Into<Bytes>) {
        self.blobs.write().await.insert(id.clone(), data.into());
    }
}

#[async_trait]
impl BlobStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn reserve(
        &self,
        _blob: &EncodedBlob,
        epochs: u32,
        owner: &AccountAddress,
    ) -> Result<Reservation> {
        if epochs == 0 {
            return Err(VaultError::InvalidInput("epochs must be at least 1".into()));
        }
        let reservation = Reservation {
            id: Uuid::now_v7().to_string(),
            epochs,
            owner: owner.clone(),
        };
        self.reservations
            .write()
            .await
            .insert(reservation.id.clone(), reservation.clone());
        Ok(reservation)
    }

    async fn transfer(
        &self,
        blob: &EncodedBlob,
        reservation: &Reservation,
    ) -> Result<TransferReceipt> {
        if !self.reservations.read().await.contains_key(&reservation.id) {
            return Err(VaultError::Storage(format!(
                "unknown reservation {}",
                reservation.id
            )));
        }
        self.staged
            .write()
            .await
            .insert(reservation.id.clone(), blob.data.clone());
        Ok(TransferReceipt {
            reservation_id: reservation.id.clone(),
            bytes: blob.size(),
            remote_id: None,
        })
    }

    async fn certify(
        &self,
        blob: &EncodedBlob,
        reservation: &Reservation,
        receipt: &TransferReceipt,
    ) -> Result<StoredChunk> {
        let data = self
            .staged
            .write()
            .await
            .remove(&receipt.reservation_id)
            .ok_or_else(|| VaultError::Storage("nothing transferred for reservation".into()))?;

        let digest = hash::content_digest(&data);
        if digest != blob.digest {
            return Err(VaultError::Integrity(format!(
                "transferred digest {digest} does not match encoded {}",
                blob.digest
            )));
        }

        self.reservations.write().await.remove(&reservation.id);
        let id = ChunkId::parse(&digest)?;
        self.blobs.write().await.insert(id.clone(), data);
        Ok(StoredChunk {
            id,
            identifier: blob.identifier.clone(),
            size: blob.size(),
        })
    }

    async fn retrieve(&self, id: &ChunkId) -> Result<Bytes> {
        self.blobs
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| VaultError::Storage(format!("blob {id} not found")))
    }
}
