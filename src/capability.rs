/// Ownership capabilities: short-lived, wallet-signed proof of who is asking for keys.
///
/// A capability is created from a [`CapabilityRequest`] once the account's wallet
/// has signed the request's challenge. It cannot be cloned or serialized, and it
/// exposes its signature only through a borrowed [`CapabilityProof`] handed to
/// the encryption service. The signature bytes are zeroized when it drops.
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::crypto::sensitive::SensitiveVec;
use crate::error::{Result, VaultError};
use crate::ledger::{self, AccountAddress, AssetId, OwnershipToken, TokenLocator};
use crate::seal::{EncryptionService, PolicyId};

/// Default capability lifetime.
pub const DEFAULT_CAPABILITY_TTL: Duration = Duration::from_secs(10 * 60);

/// Something that can sign a personal message for an account.
#[async_trait]
pub trait WalletSigner: Send + Sync {
    fn address(&self) -> AccountAddress;

    async fn sign_personal_message(&self, message: &[u8]) -> Result<Vec<u8>>;
}

/// An unsigned capability session.
#[derive(Debug, Clone)]
pub struct CapabilityRequest {
    account: AccountAddress,
    policy: PolicyId,
    ttl: Duration,
    created_at: DateTime<Utc>,
    session: Uuid,
}

impl CapabilityRequest {
    pub fn new(account: AccountAddress, policy: PolicyId, ttl: Duration) -> Result<Self> {
        chrono::Duration::from_std(ttl)
            .map_err(|_| VaultError::InvalidInput(format!("capability ttl {ttl:?} too long")))?;
        Ok(Self {
            account,
            policy,
            ttl,
            created_at: Utc::now(),
            session: Uuid::now_v7(),
        })
    }

    pub fn account(&self) -> &AccountAddress {
        &self.account
    }

    /// The message the account's wallet must sign.
    pub fn challenge(&self) -> Vec<u8> {
        format!(
            "Accessing keys of package {} for {} mins from {}, session {}",
            self.policy,
            self.ttl.as_secs() / 60,
            self.created_at.to_rfc3339(),
            self.session
        )
        .into_bytes()
    }

    /// Attach the wallet's signature over [`challenge`](Self::challenge).
    ///
    /// The signature is not checked here; the encryption service verifies it
    /// when the capability is presented.
    pub fn activate(self, signature: Vec<u8>) -> OwnershipCapability {
        let challenge = self.challenge();
        // `new` already checked the ttl converts
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or_else(|_| chrono::Duration::zero());
        OwnershipCapability {
            expires_at: self.created_at + ttl,
            account: self.account,
            policy: self.policy,
            challenge,
            signature: SensitiveVec::new(signature),
        }
    }
}

/// Live, signed capability. Opaque outside this module.
pub struct OwnershipCapability {
    account: AccountAddress,
    policy: PolicyId,
    challenge: Vec<u8>,
    signature: SensitiveVec,
    expires_at: DateTime<Utc>,
}

/// Borrowed view of a capability for the encryption service.
pub struct CapabilityProof<'a> {
    pub account: &'a AccountAddress,
    pub policy: &'a PolicyId,
    pub challenge: &'a [u8],
    pub signature: &'a [u8],
}

impl OwnershipCapability {
    pub fn account(&self) -> &AccountAddress {
        &self.account
    }

    pub fn policy(&self) -> &PolicyId {
        &self.policy
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn present(&self) -> CapabilityProof<'_> {
        CapabilityProof {
            account: &self.account,
            policy: &self.policy,
            challenge: &self.challenge,
            signature: self.signature.as_bytes(),
        }
    }
}

impl fmt::Debug for OwnershipCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnershipCapability")
            .field("account", &self.account)
            .field("policy", &self.policy)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// A capability together with the token it will be presented with.
#[derive(Debug)]
pub struct AcquiredAccess {
    pub capability: OwnershipCapability,
    pub token: OwnershipToken,
}

/// Locate the wallet's token for `asset` and obtain a signed capability.
///
/// Fails with `AccessDenied` before any key-service round trip when the wallet
/// holds no token for the asset.
pub async fn acquire_capability(
    wallet: &dyn WalletSigner,
    asset: &AssetId,
    policy: &PolicyId,
    locator: &dyn TokenLocator,
    service: &dyn EncryptionService,
    ttl: Duration,
) -> Result<AcquiredAccess> {
    let account = wallet.address();
    let token = ledger::find_token_for_asset(locator, &account, asset)
        .await?
        .ok_or_else(|| {
            VaultError::AccessDenied(format!("{account} holds no ownership token for {asset}"))
        })?;
    debug!(token = %token.id, asset = %asset, "Found ownership token");

    let request = service.request_capability(&account, policy, ttl).await?;
    let signature = wallet.sign_personal_message(&request.challenge()).await?;
    let capability = request.activate(signature);

    info!(
        account = %account,
        expires_at = %capability.expires_at(),
        "Capability acquired"
    );
    Ok(AcquiredAccess { capability, token })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::sign::{self, LocalWallet};
    use crate::ledger::memory::MemoryLedger;
    use crate::ledger::{AssetRegistry, NewAssetRecord};
    use crate::seal::LocalKeyServer;
    use std::sync::Arc;

    fn policy() -> PolicyId {
        PolicyId::parse("0xb94e").unwrap()
    }

    #[test]
    fn test_challenge_names_policy_and_ttl() {
        let request = CapabilityRequest::new(
            AccountAddress::new("0xa11ce"),
            policy(),
            DEFAULT_CAPABILITY_TTL,
        )
        .unwrap();
        let text = String::from_utf8(request.challenge()).unwrap();
        assert!(text.starts_with("Accessing keys of package 0xb94e for 10 mins from "));
    }

    #[test]
    fn test_expiry() {
        let request = CapabilityRequest::new(
            AccountAddress::new("0xa11ce"),
            policy(),
            Duration::from_secs(60),
        )
        .unwrap();
        let cap = request.activate(vec![0u8; 64]);
        assert!(!cap.is_expired());
        assert!(cap.is_expired_at(cap.expires_at()));
        assert!(cap.is_expired_at(cap.expires_at() + chrono::Duration::seconds(1)));
    }

    #[test]
    fn test_debug_hides_signature() {
        let request =
            CapabilityRequest::new(AccountAddress::new("0xa11ce"), policy(), Duration::ZERO)
                .unwrap();
        let cap = request.activate(vec![0x42; 64]);
        let debug = format!("{cap:?}");
        assert!(debug.contains("0xa11ce"));
        assert!(!debug.contains("signature"));
    }

    #[tokio::test]
    async fn test_acquire_signs_challenge() {
        let ledger = Arc::new(MemoryLedger::new());
        let service = LocalKeyServer::generate(ledger.clone());
        let wallet = LocalWallet::generate();

        let asset = ledger
            .publish_asset(NewAssetRecord {
                title: "t".into(),
                description: String::new(),
                genre: String::new(),
                price: 1,
                publisher: AccountAddress::new("0xpub"),
                primary_chunk_id: "b".into(),
                cover_chunk_id: String::new(),
                secondary_chunk_id: String::new(),
                encryption_id: String::new(),
                enhanced_metadata: String::new(),
            })
            .await
            .unwrap();
        ledger.purchase(&asset.id, wallet.address()).await.unwrap();

        let access = acquire_capability(
            &wallet,
            &asset.id,
            &policy(),
            ledger.as_ref(),
            &service,
            DEFAULT_CAPABILITY_TTL,
        )
        .await
        .unwrap();

        assert_eq!(access.token.asset_id, asset.id);
        let proof = access.capability.present();
        assert!(sign::verify(proof.account, proof.challenge, proof.signature).is_ok());
    }

    #[tokio::test]
    async fn test_acquire_without_token_is_denied() {
        let ledger = Arc::new(MemoryLedger::new());
        let service = LocalKeyServer::generate(ledger.clone());
        let wallet = LocalWallet::generate();

        let result = acquire_capability(
            &wallet,
            &AssetId::new("0xmissing"),
            &policy(),
            ledger.as_ref(),
            &service,
            DEFAULT_CAPABILITY_TTL,
        )
        .await;
        assert!(matches!(result, Err(VaultError::AccessDenied(_))));
    }
}
