/// Encryption-mode detection for published assets.
///
/// The single place where an asset record's optional fields are turned into
/// a download path. Everything downstream matches on [`EncryptionMode`].
use serde::Serialize;

use crate::ledger::AssetRecord;
use crate::plan::EncryptionPlan;
use crate::seal::EncryptionId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum EncryptionMode {
    /// One plaintext chunk.
    Unencrypted,
    /// Encrypted prefix chunk plus the plaintext suffix in `secondary`.
    ///
    /// The id is kept as recorded. It is validated when the chunk is fetched,
    /// so a bad id fails the download instead of changing the mode.
    Partial { secondary: String },
    /// One chunk holding the whole asset encrypted.
    LegacyFull,
}

impl EncryptionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            EncryptionMode::Unencrypted => "unencrypted",
            EncryptionMode::Partial { .. } => "partial",
            EncryptionMode::LegacyFull => "legacy_full",
        }
    }

    pub fn is_encrypted(&self) -> bool {
        !matches!(self, EncryptionMode::Unencrypted)
    }
}

/// Classify from the raw ledger fields. Total and side-effect free.
///
/// Any non-blank secondary chunk id means `Partial`, whether or not it names
/// a stored blob. Otherwise a valid encryption id means `LegacyFull`, and
/// anything else is `Unencrypted`.
pub fn classify(secondary_chunk: Option<&str>, encryption_id: Option<&str>) -> EncryptionMode {
    let secondary = secondary_chunk.map(str::trim).filter(|s| !s.is_empty());
    let encrypted = encryption_id.is_some_and(|id| EncryptionId::parse(id).is_ok());

    match (secondary, encrypted) {
        (Some(secondary), _) => EncryptionMode::Partial {
            secondary: secondary.to_string(),
        },
        (None, true) => EncryptionMode::LegacyFull,
        (None, false) => EncryptionMode::Unencrypted,
    }
}

/// Everything the download path needs to know about how an asset was stored.
#[derive(Debug, Clone, PartialEq)]
pub struct EncryptionMetadata {
    pub mode: EncryptionMode,
    pub encryption_id: Option<EncryptionId>,
    /// Plan persisted at publish time, absent for legacy records.
    pub plan: Option<EncryptionPlan>,
    pub original_size: Option<u64>,
    pub content_type: Option<String>,
    pub file_name: Option<String>,
}

impl EncryptionMetadata {
    pub fn from_record(record: &AssetRecord) -> Self {
        let mode = classify(record.secondary_chunk_ref(), record.encryption_id_ref());
        let encryption_id = record
            .encryption_id_ref()
            .and_then(|id| EncryptionId::parse(id).ok());
        let enhanced = record.metadata();

        Self {
            mode,
            encryption_id,
            plan: enhanced.as_ref().and_then(|m| m.plan().copied()),
            original_size: enhanced.as_ref().map(|m| m.game_file.original_size),
            content_type: enhanced.as_ref().map(|m| m.game_file.content_type.clone()),
            file_name: enhanced.map(|m| m.game_file.name),
        }
    }
}
