/// Ownership ledger: asset records, ownership tokens and the access rule.
///
/// The ledger is an external system. The traits here are the three things the
/// pipeline needs from it: locating a caller's token for an asset, deciding
/// whether a token unlocks an encryption id, and publishing asset records.
pub mod memory;
pub mod metadata;

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;
use crate::seal::EncryptionId;
use crate::storage::ChunkId;

pub use metadata::EnhancedMetadata;

/// Page size used when walking an account's tokens.
pub const TOKEN_PAGE_SIZE: usize = 50;

/// Upper bound on pages walked for one lookup.
pub const MAX_TOKEN_PAGES: usize = 1000;

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(
    /// Ledger account, `0x`-prefixed.
    AccountAddress
);
string_id!(
    /// Ledger object id of a published asset.
    AssetId
);
string_id!(
    /// Ledger object id of an ownership token.
    TokenId
);

/// A published asset as the ledger stores it.
///
/// Optional references are stored as empty strings, the ledger's encoding of
/// absence; use the accessor methods rather than the raw fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetRecord {
    pub id: AssetId,
    pub title: String,
    pub description: String,
    pub genre: String,
    pub price: u64,
    pub publisher: AccountAddress,
    pub primary_chunk_id: String,
    pub cover_chunk_id: String,
    pub secondary_chunk_id: String,
    pub encryption_id: String,
    /// JSON-encoded [`EnhancedMetadata`].
    pub enhanced_metadata: String,
    pub publish_date: DateTime<Utc>,
}

impl AssetRecord {
    pub fn primary_chunk(&self) -> Result<ChunkId> {
        ChunkId::parse(&self.primary_chunk_id)
    }

    pub fn cover_chunk(&self) -> Result<Option<ChunkId>> {
        ChunkId::parse_optional(&self.cover_chunk_id)
    }

    pub fn secondary_chunk_ref(&self) -> Option<&str> {
        non_empty(&self.secondary_chunk_id)
    }

    pub fn encryption_id_ref(&self) -> Option<&str> {
        non_empty(&self.encryption_id)
    }

    /// Parsed enhanced metadata, or `None` for legacy records without it.
    pub fn metadata(&self) -> Option<EnhancedMetadata> {
        EnhancedMetadata::parse_lenient(&self.enhanced_metadata)
    }
}

fn non_empty(s: &str) -> Option<&str> {
    let s = s.trim();
    (!s.is_empty()).then_some(s)
}

/// Fields supplied by the publisher when creating an asset record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAssetRecord {
    pub title: String,
    pub description: String,
    pub genre: String,
    pub price: u64,
    pub publisher: AccountAddress,
    pub primary_chunk_id: String,
    pub cover_chunk_id: String,
    pub secondary_chunk_id: String,
    pub encryption_id: String,
    pub enhanced_metadata: String,
}

/// Proof of an account's right to one asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipToken {
    pub id: TokenId,
    pub asset_id: AssetId,
    pub owner: AccountAddress,
    pub is_publisher_copy: bool,
}

#[derive(Debug, Clone, Default)]
pub struct TokenPage {
    pub tokens: Vec<OwnershipToken>,
    pub next_cursor: Option<String>,
}

#[async_trait]
pub trait TokenLocator: Send + Sync {
    /// One page of tokens held by `owner`, starting after `cursor`.
    async fn owned_tokens(
        &self,
        owner: &AccountAddress,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<TokenPage>;
}

/// The ledger-side rule the key service consults before releasing keys.
#[async_trait]
pub trait AccessRule: Send + Sync {
    /// True when `token` is held by `account` and belongs to the asset
    /// encrypted under `id`.
    async fn approve_access(
        &self,
        id: &EncryptionId,
        token: &TokenId,
        account: &AccountAddress,
    ) -> Result<bool>;
}

#[async_trait]
pub trait AssetRegistry: Send + Sync {
    async fn publish_asset(&self, record: NewAssetRecord) -> Result<AssetRecord>;

    async fn asset(&self, id: &AssetId) -> Result<Option<AssetRecord>>;
}

/// Walk all of `owner`'s tokens looking for one that belongs to `asset`.
pub async fn find_token_for_asset(
    locator: &dyn TokenLocator,
    owner: &AccountAddress,
    asset: &AssetId,
) -> Result<Option<OwnershipToken>> {
    let mut cursor: Option<String> = None;
    for _ in 0..MAX_TOKEN_PAGES {
        let page = locator
            .owned_tokens(owner, cursor.as_deref(), TOKEN_PAGE_SIZE)
            .await?;
        if let Some(token) = page.tokens.into_iter().find(|t| &t.asset_id == asset) {
            return Ok(Some(token));
        }
        match page.next_cursor {
            Some(next) if cursor.as_deref() == Some(next.as_str()) => {
                warn!(%owner, cursor = %next, "Token locator returned the same cursor twice");
                return Ok(None);
            }
            Some(next) => cursor = Some(next),
            None => return Ok(None),
        }
    }
    warn!(%owner, pages = MAX_TOKEN_PAGES, "Gave up walking token pages");
    Ok(None)
}
