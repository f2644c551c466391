/// Enhanced asset metadata, stored as a JSON string on the asset record.
///
/// Carries what download needs beyond the raw chunk references: the persisted
/// split plan, the original size and the plan policy version it was made with.
/// Records published before this existed have an empty string here; they are
/// still downloadable, with weaker length checks.
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Result, VaultError};
use crate::plan::EncryptionPlan;

pub const METADATA_VERSION: u8 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnhancedMetadata {
    pub version: u8,
    pub game_file: GameFileMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_image: Option<CoverImageMetadata>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameFileMetadata {
    pub name: String,
    pub original_size: u64,
    #[serde(rename = "type")]
    pub content_type: String,
    pub primary_chunk_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary_chunk_id: Option<String>,
    pub is_partially_encrypted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_info: Option<EncryptionInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptionInfo {
    pub plan: EncryptionPlan,
    /// Size of the stored encrypted object, header included.
    pub encrypted_size: u64,
    pub unencrypted_size: u64,
    pub encryption_percentage: f64,
    pub policy_version: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverImageMetadata {
    pub name: String,
    pub size: u64,
    #[serde(rename = "type")]
    pub content_type: String,
    pub chunk_id: String,
}

impl EnhancedMetadata {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| VaultError::Serialization(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| VaultError::Serialization(e.to_string()))
    }

    /// Parse if present and well-formed. Malformed metadata is logged and ignored.
    pub fn parse_lenient(json: &str) -> Option<Self> {
        if json.trim().is_empty() {
            return None;
        }
        match Self::from_json(json) {
            Ok(meta) => Some(meta),
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable enhanced metadata");
                None
            }
        }
    }

    /// The persisted plan, when the asset was published partially encrypted.
    pub fn plan(&self) -> Option<&EncryptionPlan> {
        self.game_file.encryption_info.as_ref().map(|i| &i.plan)
    }
}
