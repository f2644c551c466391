/// Upload orchestrator.
///
/// Coordinates one publish:
/// 1. Validate the asset (and optional cover) before any network call
/// 2. Decide the mode: small files go up unencrypted, larger ones get a plan
/// 3. Encrypt the protected prefix only
/// 4. Store the protected chunk, then the plain chunk, then the cover, each
///    through the four-phase storage publish with bounded retry
/// 5. Hand back chunk ids and metadata for the caller to record on the ledger
///
/// Nothing is returned until every chunk is certified, so a caller never
/// sees a partially stored asset.
use std::path::Path;
use std::sync::Arc;

use tracing::{error, info, Instrument};
use uuid::Uuid;

use crate::asset::{Asset, Listing};
use crate::detect::EncryptionMode;
use crate::error::{Result, Stage, StageExt, VaultError};
use crate::ledger::metadata::{
    CoverImageMetadata, EncryptionInfo, GameFileMetadata, METADATA_VERSION,
};
use crate::ledger::{AccountAddress, AssetRecord, AssetRegistry, EnhancedMetadata, NewAssetRecord};
use crate::plan::{self, format_size, EncryptionPlan, GIB, MIB, PLAN_POLICY_VERSION};
use crate::retry::{self, RetryPolicy};
use crate::seal::{EncryptionId, EncryptionService, PolicyId, DEFAULT_THRESHOLD};
use crate::storage::{self, BlobFile, BlobStore, StoredChunk, DEFAULT_EPOCHS};

/// Files at or below this size are published unencrypted.
pub const DEFAULT_BYPASS_THRESHOLD: u64 = 30 * MIB;

/// 13.3 GiB.
pub const MAX_FILE_SIZE: u64 = 13 * GIB + 3 * GIB / 10;

const ENCRYPTED_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Clone)]
pub struct UploadConfig {
    pub bypass_threshold: u64,
    pub max_file_size: u64,
    /// Key-server shares needed to decrypt.
    pub threshold: u8,
    pub epochs: u32,
    pub policy: PolicyId,
    pub retry: RetryPolicy,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            bypass_threshold: DEFAULT_BYPASS_THRESHOLD,
            max_file_size: MAX_FILE_SIZE,
            threshold: DEFAULT_THRESHOLD,
            epochs: DEFAULT_EPOCHS,
            policy: PolicyId::testnet(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Result of a completed publish.
#[derive(Debug, Clone)]
pub struct PublishReceipt {
    pub flow_id: Uuid,
    pub publisher: AccountAddress,
    /// The protected chunk, or the whole file when published unencrypted.
    pub primary_chunk: StoredChunk,
    /// Plaintext suffix, present only for partially encrypted assets.
    pub plain_chunk: Option<StoredChunk>,
    pub cover_chunk: Option<StoredChunk>,
    pub mode: EncryptionMode,
    pub encryption_id: Option<EncryptionId>,
    pub plan: Option<EncryptionPlan>,
    pub metadata: EnhancedMetadata,
}

impl PublishReceipt {
    /// The ledger record for this publish. Absent references become empty strings.
    pub fn into_record(self, listing: &Listing) -> Result<NewAssetRecord> {
        Ok(NewAssetRecord {
            title: listing.title.clone(),
            description: listing.description.clone(),
            genre: listing.genre.clone(),
            price: listing.price,
            enhanced_metadata: self.metadata.to_json()?,
            publisher: self.publisher,
            primary_chunk_id: self.primary_chunk.id.to_string(),
            cover_chunk_id: self.cover_chunk.map(|c| c.id.to_string()).unwrap_or_default(),
            secondary_chunk_id: self.plain_chunk.map(|c| c.id.to_string()).unwrap_or_default(),
            encryption_id: self.encryption_id.map(|id| id.to_string()).unwrap_or_default(),
        })
    }
}

pub struct Publisher {
    store: Arc<dyn BlobStore>,
    seal: Arc<dyn EncryptionService>,
    config: UploadConfig,
}

impl Publisher {
    pub fn new(
        store: Arc<dyn BlobStore>,
        seal: Arc<dyn EncryptionService>,
        config: UploadConfig,
    ) -> Self {
        Self {
            store,
            seal,
            config,
        }
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    pub async fn publish(&self, asset: &Asset, account: &AccountAddress) -> Result<PublishReceipt> {
        self.publish_with_cover(asset, None, account).await
    }

    pub async fn publish_with_cover(
        &self,
        asset: &Asset,
        cover: Option<&Asset>,
        account: &AccountAddress,
    ) -> Result<PublishReceipt> {
        let flow_id = Uuid::now_v7();
        let span = tracing::info_span!("publish", flow = %flow_id, asset = %asset.title());

        async {
            let result = self.run(flow_id, asset, cover, account).await;
            if let Err(e) = &result {
                error!(stage = ?e.stage(), category = ?e.category(), error = %e, "Publish failed");
            }
            result
        }
        .instrument(span)
        .await
    }

    /// Publish, then persist the record with one registry call.
    pub async fn publish_and_record(
        &self,
        asset: &Asset,
        cover: Option<&Asset>,
        account: &AccountAddress,
        registry: &dyn AssetRegistry,
    ) -> Result<AssetRecord> {
        let receipt = self.publish_with_cover(asset, cover, account).await?;
        let record = registry
            .publish_asset(receipt.into_record(&asset.listing)?)
            .await?;
        info!(asset_id = %record.id, "Asset recorded on ledger");
        Ok(record)
    }

    async fn run(
        &self,
        flow_id: Uuid,
        asset: &Asset,
        cover: Option<&Asset>,
        account: &AccountAddress,
    ) -> Result<PublishReceipt> {
        self.validate(asset, cover).at(Stage::Validating)?;

        let plan = (asset.len() > self.config.bypass_threshold)
            .then(|| plan::select_boundary(asset.len()));
        info!(
            size = %format_size(asset.len()),
            encrypted = plan.is_some(),
            protected = plan.map(|p| p.protected_length),
            "Starting publish"
        );

        let (primary_chunk, plain_chunk, encryption_id) = match plan {
            None => {
                let data = asset.read_all().await.at(Stage::Storing)?;
                let file = BlobFile::new(asset.title(), &asset.content_type, data);
                (self.store_chunk(file, account).await?, None, None)
            }
            Some(plan) => {
                let id = EncryptionId::generate(&self.config.policy);
                let sealed = self.encrypt_prefix(asset, &plan, &id).await?;

                let file = BlobFile::new(
                    format!("{}.encrypted", asset.title()),
                    ENCRYPTED_CONTENT_TYPE,
                    sealed,
                );
                let primary = self.store_chunk(file, account).await?;

                let plain = if plan.is_full() {
                    None
                } else {
                    let data = asset.read_range(plan.plain_range()).await.at(Stage::Storing)?;
                    let file =
                        BlobFile::new(format!("{}.data", asset.title()), &asset.content_type, data);
                    Some(self.store_chunk(file, account).await?)
                };
                (primary, plain, Some(id))
            }
        };

        let cover_chunk = match cover {
            Some(cover) => {
                let data = cover.read_all().await.at(Stage::Storing)?;
                let file = BlobFile::new(
                    cover_identifier(asset.title(), &cover.file_name),
                    &cover.content_type,
                    data,
                );
                Some(self.store_chunk(file, account).await?)
            }
            None => None,
        };

        let mode = match (&plan, &plain_chunk) {
            (None, _) => EncryptionMode::Unencrypted,
            (Some(_), Some(plain)) => EncryptionMode::Partial {
                secondary: plain.id.to_string(),
            },
            (Some(_), None) => EncryptionMode::LegacyFull,
        };
        let metadata = build_metadata(
            asset,
            &primary_chunk,
            plain_chunk.as_ref(),
            cover.zip(cover_chunk.as_ref()),
            plan.as_ref(),
        );

        info!(
            mode = mode.as_str(),
            primary = %primary_chunk.id,
            plain = plain_chunk.as_ref().map(|c| c.id.as_str()),
            "Publish complete"
        );

        Ok(PublishReceipt {
            flow_id,
            publisher: account.clone(),
            primary_chunk,
            plain_chunk,
            cover_chunk,
            mode,
            encryption_id,
            plan,
            metadata,
        })
    }

    fn validate(&self, asset: &Asset, cover: Option<&Asset>) -> Result<()> {
        if asset.listing.title.trim().is_empty() {
            return Err(VaultError::InvalidInput("asset title is required".into()));
        }
        if asset.is_empty() {
            return Err(VaultError::InvalidInput("asset is empty".into()));
        }
        if asset.len() > self.config.max_file_size {
            return Err(VaultError::InvalidInput(format!(
                "asset is {}, limit is {}",
                format_size(asset.len()),
                format_size(self.config.max_file_size)
            )));
        }
        if let Some(cover) = cover {
            if !cover.content_type.starts_with("image/") {
                return Err(VaultError::InvalidInput(format!(
                    "cover must be an image, got {}",
                    cover.content_type
                )));
            }
            if cover.is_empty() {
                return Err(VaultError::InvalidInput("cover image is empty".into()));
            }
        }
        Ok(())
    }

    async fn encrypt_prefix(
        &self,
        asset: &Asset,
        plan: &EncryptionPlan,
        id: &EncryptionId,
    ) -> Result<Vec<u8>> {
        let protected = asset
            .read_range(plan.protected_range())
            .await
            .at(Stage::Encrypting)?;
        let sealed = self
            .seal
            .encrypt(&protected, self.config.threshold, &self.config.policy, id)
            .await
            .at(Stage::Encrypting)?;
        info!(
            service = self.seal.name(),
            protected = %format_size(plan.protected_length),
            sealed = sealed.len(),
            "Protected prefix encrypted"
        );
        Ok(sealed)
    }

    async fn store_chunk(&self, file: BlobFile, account: &AccountAddress) -> Result<StoredChunk> {
        let label = file.identifier.clone();
        let store = self.store.as_ref();
        let epochs = self.config.epochs;

        let chunk = retry::with_retries(&self.config.retry, &label, |attempt| {
            let file = file.clone();
            tracing::debug!(chunk = %file.identifier, attempt, "Storing chunk");
            async move { storage::publish_blob(store, file, epochs, account).await }
        })
        .await
        .at(Stage::Storing)?;

        info!(chunk = %label, id = %chunk.id, size = %format_size(chunk.size), "Chunk stored");
        Ok(chunk)
    }
}

fn cover_identifier(title: &str, cover_name: &str) -> String {
    match Path::new(cover_name).extension() {
        Some(ext) => format!("{title}_cover.{}", ext.to_string_lossy()),
        None => format!("{title}_cover"),
    }
}

fn build_metadata(
    asset: &Asset,
    primary: &StoredChunk,
    plain: Option<&StoredChunk>,
    cover: Option<(&Asset, &StoredChunk)>,
    plan: Option<&EncryptionPlan>,
) -> EnhancedMetadata {
    let encryption_info = plan.map(|plan| EncryptionInfo {
        plan: *plan,
        encrypted_size: primary.size,
        unencrypted_size: plan.plain_length,
        encryption_percentage: plan.protected_percent(),
        policy_version: PLAN_POLICY_VERSION,
    });

    EnhancedMetadata {
        version: METADATA_VERSION,
        game_file: GameFileMetadata {
            name: asset.file_name.clone(),
            original_size: asset.len(),
            content_type: asset.content_type.clone(),
            primary_chunk_id: primary.id.to_string(),
            secondary_chunk_id: plain.map(|c| c.id.to_string()),
            is_partially_encrypted: plain.is_some() && plan.is_some(),
            encryption_info,
        },
        cover_image: cover.map(|(asset, chunk)| CoverImageMetadata {
            name: asset.file_name.clone(),
            size: chunk.size,
            content_type: asset.content_type.clone(),
            chunk_id: chunk.id.to_string(),
        }),
    }
}
