/// Threshold-encryption service boundary.
///
/// The service encrypts a payload under an access policy (an on-ledger
/// package) and an encryption id, and later releases it only to a caller
/// presenting a live capability whose ownership token the ledger's access
/// rule approves. Keys never leave the service; the pipeline only ever sees
/// ciphertext and the final plaintext.
pub mod local;
pub mod object;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::capability::{CapabilityRequest, OwnershipCapability};
use crate::error::{Result, VaultError};
use crate::ledger::{AccountAddress, TokenId};

pub use local::LocalKeyServer;
pub use object::EncryptedObject;

/// Number of key-server shares needed to decrypt.
pub const DEFAULT_THRESHOLD: u8 = 2;

/// Random bytes appended to the policy bytes to form an encryption id.
pub const ID_NONCE_LEN: usize = 5;

/// Access-policy package on the test network.
pub const TESTNET_POLICY_PACKAGE: &str =
    "0xb94e12661bbb311c6f5605f3f546da5b628fe439e716c43fc1e7295bbae9705d";

/// `0x`-prefixed hex id of the package that holds the access rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PolicyId(String);

impl PolicyId {
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let hex_part = s
            .strip_prefix("0x")
            .ok_or_else(|| VaultError::Config(format!("policy id {s:?} must start with 0x")))?;
        if hex_part.is_empty() || hex::decode(hex_part).is_err() {
            return Err(VaultError::Config(format!("policy id {s:?} is not hex")));
        }
        Ok(Self(s.to_ascii_lowercase()))
    }

    /// The access-policy package deployed on the test network.
    pub fn testnet() -> Self {
        Self(TESTNET_POLICY_PACKAGE.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn bytes(&self) -> Vec<u8> {
        hex::decode(&self.0[2..]).unwrap_or_default()
    }
}

impl TryFrom<String> for PolicyId {
    type Error = VaultError;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<PolicyId> for String {
    fn from(p: PolicyId) -> String {
        p.0
    }
}

impl fmt::Display for PolicyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity a payload is encrypted under: policy bytes followed by a random
/// suffix, hex encoded. Recorded on the asset so the access rule can match it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EncryptionId(String);

impl EncryptionId {
    pub fn generate(policy: &PolicyId) -> Self {
        let mut bytes = policy.bytes();
        let mut nonce = [0u8; ID_NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce);
        bytes.extend_from_slice(&nonce);
        Self(hex::encode(bytes))
    }

    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() || hex::decode(s).is_err() {
            return Err(VaultError::InvalidInput(format!(
                "encryption id {s:?} is not hex"
            )));
        }
        Ok(Self(s.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this id was derived from `policy`.
    /// Policy package the id was generated under: every byte but the random
    /// suffix. `None` when the id is too short to carry one.
    pub fn policy(&self) -> Option<PolicyId> {
        let bytes = hex::decode(&self.0).ok()?;
        let split = bytes.len().checked_sub(ID_NONCE_LEN).filter(|n| *n > 0)?;
        Some(PolicyId(format!("0x{}", hex::encode(&bytes[..split]))))
    }

    pub fn is_under(&self, policy: &PolicyId) -> bool {
        hex::decode(&self.0)
            .map(|b| b.starts_with(&policy.bytes()))
            .unwrap_or(false)
    }
}

impl fmt::Display for EncryptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What the caller asks the access rule to approve: this token unlocks this id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessApproval {
    pub encryption_id: EncryptionId,
    pub token: TokenId,
}

impl AccessApproval {
    /// Build the approval for an encrypted object, reading its id from the header.
    pub fn for_object(encrypted: &[u8], token: &TokenId) -> Result<Self> {
        let object = EncryptedObject::parse(encrypted)?;
        Ok(Self {
            encryption_id: object.id,
            token: token.clone(),
        })
    }
}

#[async_trait]
pub trait EncryptionService: Send + Sync {
    fn name(&self) -> &str;

    /// Encrypt `data` under `policy` and `id`. Returns a self-describing object.
    async fn encrypt(
        &self,
        data: &[u8],
        threshold: u8,
        policy: &PolicyId,
        id: &EncryptionId,
    ) -> Result<Vec<u8>>;

    /// Start a capability session for `account`, to be signed by its wallet.
    async fn request_capability(
        &self,
        account: &AccountAddress,
        policy: &PolicyId,
        ttl: Duration,
    ) -> Result<CapabilityRequest>;

    /// Decrypt an object. Any failed access check is `AccessDenied`.
    async fn decrypt(
        &self,
        encrypted: &[u8],
        capability: &OwnershipCapability,
        approval: &AccessApproval,
    ) -> Result<Vec<u8>>;
}
