/// Download orchestrator.
///
/// Runs the stage machine `Verifying -> Downloading -> Decrypting ->
/// Reconstructing -> Complete`, with `Error` reachable from every step. Each
/// step reports a progress event; a failure reports `Error` and comes back
/// attributed to the stage it happened in.
///
/// Access is decided by the decrypt call alone. Finding a token locally only
/// picks which token to present, and a wallet with no token at all is turned
/// away before any chunk is fetched.
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use tracing::{error, info, Instrument};
use uuid::Uuid;

use crate::asset::DEFAULT_CONTENT_TYPE;
use crate::capability::{self, AcquiredAccess, WalletSigner, DEFAULT_CAPABILITY_TTL};
use crate::detect::{EncryptionMetadata, EncryptionMode};
use crate::error::{Result, Stage, StageExt, VaultError};
use crate::ledger::{AssetRecord, TokenLocator};
use crate::plan::format_size;
use crate::seal::{AccessApproval, EncryptionId, EncryptionService, PolicyId};
use crate::split;
use crate::storage::{BlobStore, ChunkId};

#[derive(Debug, Clone)]
pub struct DownloadConfig {
    /// Used only for records whose encryption id does not name a policy.
    pub policy: PolicyId,
    pub capability_ttl: Duration,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            policy: PolicyId::testnet(),
            capability_ttl: DEFAULT_CAPABILITY_TTL,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DownloadProgress {
    pub stage: Stage,
    pub percent: u8,
    pub message: String,
}

pub trait ProgressSink: Send + Sync {
    fn report(&self, progress: DownloadProgress);
}

impl<F> ProgressSink for F
where
    F: Fn(DownloadProgress) + Send + Sync,
{
    fn report(&self, progress: DownloadProgress) {
        self(progress)
    }
}

/// Discards progress events.
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _progress: DownloadProgress) {}
}

#[derive(Debug, Clone)]
pub struct DownloadedAsset {
    pub bytes: Bytes,
    pub content_type: String,
    pub file_name: String,
    pub mode: EncryptionMode,
}

impl DownloadedAsset {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        tokio::fs::write(path, &self.bytes).await?;
        Ok(())
    }
}

pub struct Downloader {
    store: Arc<dyn BlobStore>,
    seal: Arc<dyn EncryptionService>,
    tokens: Arc<dyn TokenLocator>,
    config: DownloadConfig,
}

struct Reporter<'a> {
    sink: &'a dyn ProgressSink,
}

impl Reporter<'_> {
    fn emit(&self, stage: Stage, percent: u8, message: impl Into<String>) {
        self.sink.report(DownloadProgress {
            stage,
            percent,
            message: message.into(),
        });
    }
}

impl Downloader {
    pub fn new(
        store: Arc<dyn BlobStore>,
        seal: Arc<dyn EncryptionService>,
        tokens: Arc<dyn TokenLocator>,
        config: DownloadConfig,
    ) -> Self {
        Self {
            store,
            seal,
            tokens,
            config,
        }
    }

    pub async fn download(
        &self,
        record: &AssetRecord,
        wallet: &dyn WalletSigner,
        progress: &dyn ProgressSink,
    ) -> Result<DownloadedAsset> {
        let flow_id = Uuid::now_v7();
        let span = tracing::info_span!("download", flow = %flow_id, asset = %record.id);
        let reporter = Reporter { sink: progress };

        async {
            let result = self.run(record, wallet, &reporter).await;
            if let Err(e) = &result {
                error!(stage = ?e.stage(), category = ?e.category(), error = %e, "Download failed");
                reporter.emit(Stage::Error, 0, e.to_string());
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn run(
        &self,
        record: &AssetRecord,
        wallet: &dyn WalletSigner,
        reporter: &Reporter<'_>,
    ) -> Result<DownloadedAsset> {
        let meta = EncryptionMetadata::from_record(record);
        let primary = record.primary_chunk().at(Stage::Verifying)?;
        let secondary = match &meta.mode {
            EncryptionMode::Partial { secondary } => {
                Some(ChunkId::parse(secondary).at(Stage::Verifying)?)
            }
            _ => None,
        };
        info!(mode = meta.mode.as_str(), title = %record.title, "Starting download");

        reporter.emit(Stage::Verifying, 5, "Checking ownership");
        let access = if meta.mode.is_encrypted() {
            let policy = self.policy_for(&meta);
            let access = capability::acquire_capability(
                wallet,
                &record.id,
                &policy,
                self.tokens.as_ref(),
                self.seal.as_ref(),
                self.config.capability_ttl,
            )
            .await
            .at(Stage::Verifying)?;
            reporter.emit(Stage::Verifying, 15, "Capability acquired");
            Some(access)
        } else {
            reporter.emit(Stage::Verifying, 15, "No capability required");
            None
        };

        let bytes = match &meta.mode {
            EncryptionMode::Unencrypted => {
                reporter.emit(Stage::Downloading, 50, "Downloading file");
                let data = self.fetch(&primary).await?;
                check_total(&meta, data.len() as u64).at(Stage::Reconstructing)?;
                data
            }
            EncryptionMode::LegacyFull => {
                reporter.emit(Stage::Downloading, 30, "Downloading encrypted file");
                let encrypted = self.fetch(&primary).await?;

                reporter.emit(Stage::Decrypting, 70, "Decrypting file");
                let plain = self.decrypt(&encrypted, access.as_ref()).await?;
                check_total(&meta, plain.len() as u64).at(Stage::Reconstructing)?;
                Bytes::from(plain)
            }
            EncryptionMode::Partial { .. } => {
                reporter.emit(Stage::Downloading, 25, "Downloading encrypted prefix");
                let encrypted = self.fetch(&primary).await?;
                reporter.emit(Stage::Downloading, 45, "Downloading plain suffix");
                let suffix = match &secondary {
                    Some(id) => self.fetch(id).await?,
                    None => Bytes::new(),
                };

                reporter.emit(Stage::Decrypting, 70, "Decrypting prefix");
                let prefix = self.decrypt(&encrypted, access.as_ref()).await?;

                reporter.emit(Stage::Reconstructing, 85, "Reconstructing file");
                check_partial(&meta, prefix.len() as u64, suffix.len() as u64)
                    .at(Stage::Reconstructing)?;
                Bytes::from(split::reconstruct(&prefix, &suffix))
            }
        };

        reporter.emit(Stage::Complete, 100, "Download complete");
        info!(size = %format_size(bytes.len() as u64), "Download complete");

        Ok(DownloadedAsset {
            bytes,
            content_type: meta
                .content_type
                .clone()
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
            file_name: meta.file_name.clone().unwrap_or_else(|| record.title.clone()),
            mode: meta.mode,
        })
    }

    /// The asset's own policy, read from its encryption id.
    fn policy_for(&self, meta: &EncryptionMetadata) -> PolicyId {
        match meta.encryption_id.as_ref().and_then(EncryptionId::policy) {
            Some(policy) => {
                if policy != self.config.policy {
                    tracing::debug!(%policy, "Asset uses a non-default policy");
                }
                policy
            }
            None => self.config.policy.clone(),
        }
    }

    async fn fetch(&self, id: &ChunkId) -> Result<Bytes> {
        let data = self.store.retrieve(id).await.at(Stage::Downloading)?;
        tracing::debug!(chunk = %id, size = data.len(), "Chunk retrieved");
        Ok(data)
    }

    async fn decrypt(&self, encrypted: &[u8], access: Option<&AcquiredAccess>) -> Result<Vec<u8>> {
        let access = access
            .ok_or_else(|| VaultError::AccessDenied("no capability for encrypted asset".into()))
            .at(Stage::Decrypting)?;
        let approval = AccessApproval::for_object(encrypted, &access.token.id).at(Stage::Decrypting)?;
        self.seal
            .decrypt(encrypted, &access.capability, &approval)
            .await
            .at(Stage::Decrypting)
    }
}

/// Length checks for a two-chunk asset before concatenation.
fn check_partial(meta: &EncryptionMetadata, prefix_len: u64, suffix_len: u64) -> Result<()> {
    if suffix_len == 0 {
        return Err(VaultError::Integrity(
            "plain chunk is empty for a partially encrypted asset".into(),
        ));
    }
    if let Some(plan) = &meta.plan {
        plan.validate(meta.original_size)?;
        if prefix_len != plan.protected_length || suffix_len != plan.plain_length {
            return Err(VaultError::Integrity(format!(
                "chunks are {prefix_len} + {suffix_len} bytes, plan recorded {} + {}",
                plan.protected_length, plan.plain_length
            )));
        }
    }
    check_total(meta, prefix_len + suffix_len)
}

fn check_total(meta: &EncryptionMetadata, total: u64) -> Result<()> {
    match meta.original_size {
        Some(expected) if expected != total => Err(VaultError::Integrity(format!(
            "reconstructed {total} bytes, published size was {expected}"
        ))),
        _ => Ok(()),
    }
}
