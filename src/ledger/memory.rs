/// In-process ledger used by the `roundtrip` command and by tests.
use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    AccessRule, AccountAddress, AssetId, AssetRecord, AssetRegistry, NewAssetRecord,
    OwnershipToken, TokenId, TokenLocator, TokenPage,
};
use crate::error::{Result, VaultError};
use crate::seal::EncryptionId;

#[derive(Default)]
pub struct MemoryLedger {
    assets: RwLock<HashMap<AssetId, AssetRecord>>,
    /// Insertion-ordered so that pagination cursors stay stable.
    tokens: RwLock<Vec<OwnershipToken>>,
}

fn object_id() -> String {
    format!("0x{}", Uuid::now_v7().simple())
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    async fn mint(&self, asset: &AssetId, owner: &AccountAddress, publisher_copy: bool) -> TokenId {
        let token = OwnershipToken {
            id: TokenId::new(object_id()),
            asset_id: asset.clone(),
            owner: owner.clone(),
            is_publisher_copy: publisher_copy,
        };
        let id = token.id.clone();
        self.tokens.write().await.push(token);
        id
    }

    /// Mint a token for `buyer`. Payment is out of scope here.
    pub async fn purchase(&self, asset: &AssetId, buyer: &AccountAddress) -> Result<TokenId> {
        if !self.assets.read().await.contains_key(asset) {
            return Err(VaultError::InvalidInput(format!("unknown asset {asset}")));
        }
        Ok(self.mint(asset, buyer, false).await)
    }

    pub async fn transfer(&self, token: &TokenId, to: &AccountAddress) -> Result<()> {
        let mut tokens = self.tokens.write().await;
        let entry = tokens
            .iter_mut()
            .find(|t| &t.id == token)
            .ok_or_else(|| VaultError::InvalidInput(format!("unknown token {token}")))?;
        entry.owner = to.clone();
        Ok(())
    }

    pub async fn token(&self, token: &TokenId) -> Option<OwnershipToken> {
        self.tokens.read().await.iter().find(|t| &t.id == token).cloned()
    }
}

#[async_trait]
impl AssetRegistry for MemoryLedger {
    /// Stores the record and mints the publisher's own copy.
    async fn publish_asset(&self, record: NewAssetRecord) -> Result<AssetRecord> {
        let asset = AssetRecord {
            id: AssetId::new(object_id()),
            title: record.title,
            description: record.description,
            genre: record.genre,
            price: record.price,
            publisher: record.publisher,
            primary_chunk_id: record.primary_chunk_id,
            cover_chunk_id: record.cover_chunk_id,
            secondary_chunk_id: record.secondary_chunk_id,
            encryption_id: record.encryption_id,
            enhanced_metadata: record.enhanced_metadata,
            publish_date: Utc::now(),
        };
        self.assets
            .write()
            .await
            .insert(asset.id.clone(), asset.clone());
        self.mint(&asset.id, &asset.publisher, true).await;
        Ok(asset)
    }

    async fn asset(&self, id: &AssetId) -> Result<Option<AssetRecord>> {
        Ok(self.assets.read().await.get(id).cloned())
    }
}

#[async_trait]
impl TokenLocator for MemoryLedger {
    async fn owned_tokens(
        &self,
        owner: &AccountAddress,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<TokenPage> {
        let start = match cursor {
            Some(c) => c
                .parse::<usize>()
                .map_err(|_| VaultError::InvalidInput(format!("bad cursor {c}")))?,
            None => 0,
        };
        let owned: Vec<OwnershipToken> = self
            .tokens
            .read()
            .await
            .iter()
            .filter(|t| &t.owner == owner)
            .cloned()
            .collect();

        let end = (start + limit.max(1)).min(owned.len());
        let tokens = owned.get(start..end).map(<[_]>::to_vec).unwrap_or_default();
        let next_cursor = (end < owned.len()).then(|| end.to_string());
        Ok(TokenPage {
            tokens,
            next_cursor,
        })
    }
}

#[async_trait]
impl AccessRule for MemoryLedger {
    async fn approve_access(
        &self,
        id: &EncryptionId,
        token: &TokenId,
        account: &AccountAddress,
    ) -> Result<bool> {
        let Some(token) = self.token(token).await else {
            return Ok(false);
        };
        if &token.owner != account {
            return Ok(false);
        }
        let assets = self.assets.read().await;
        Ok(assets
            .get(&token.asset_id)
            .is_some_and(|a| a.encryption_id == id.as_str()))
    }
}
