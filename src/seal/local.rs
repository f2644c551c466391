/// Single-node key server implementing the encryption-service contract in-process.
///
/// Object keys are derived from a master secret and the object's policy and id,
/// so nothing per-object is stored. The threshold is recorded in the object
/// header; one node holds the whole master key.
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::capability::{CapabilityRequest, OwnershipCapability};
use crate::crypto::sensitive::SensitiveBytes32;
use crate::crypto::{aead, hash, sign, streaming};
use crate::error::{Result, VaultError};
use crate::ledger::{AccessRule, AccountAddress};
use crate::seal::object::{BodyMode, EncryptedObject, OBJECT_VERSION};
use crate::seal::{AccessApproval, EncryptionId, EncryptionService, PolicyId};

/// Payloads above this many bytes are sealed in segments.
pub const DEFAULT_STREAMING_THRESHOLD: usize = 8 * 1024 * 1024;

const KEY_CONTEXT: &str = "coldcache local key server 2024-06 object key";

pub struct LocalKeyServer {
    master: SensitiveBytes32,
    rule: Arc<dyn AccessRule>,
    streaming_threshold: usize,
}

impl LocalKeyServer {
    pub fn new(master: SensitiveBytes32, rule: Arc<dyn AccessRule>) -> Self {
        Self {
            master,
            rule,
            streaming_threshold: DEFAULT_STREAMING_THRESHOLD,
        }
    }

    /// Key server with a fresh random master secret.
    pub fn generate(rule: Arc<dyn AccessRule>) -> Self {
        Self::new(aead::generate_key(), rule)
    }

    pub fn with_streaming_threshold(mut self, bytes: usize) -> Self {
        self.streaming_threshold = bytes;
        self
    }

    fn object_key(&self, policy: &PolicyId, id: &EncryptionId) -> SensitiveBytes32 {
        let base = SensitiveBytes32::new(hash::derive_key(KEY_CONTEXT, self.master.as_bytes()));
        let label = format!("{policy}/{id}");
        SensitiveBytes32::new(hash::keyed_hash(base.as_bytes(), label.as_bytes()))
    }

    async fn check_access(
        &self,
        object: &EncryptedObject,
        capability: &OwnershipCapability,
        approval: &AccessApproval,
    ) -> Result<()> {
        if capability.is_expired() {
            return Err(VaultError::AccessDenied("capability expired".into()));
        }
        let proof = capability.present();
        if proof.policy != &object.policy {
            return Err(VaultError::AccessDenied(format!(
                "capability is for policy {}, object uses {}",
                proof.policy, object.policy
            )));
        }
        sign::verify(proof.account, proof.challenge, proof.signature)?;

        if approval.encryption_id != object.id {
            return Err(VaultError::AccessDenied(
                "approval names a different encryption id".into(),
            ));
        }
        let approved = self
            .rule
            .approve_access(&object.id, &approval.token, proof.account)
            .await?;
        if !approved {
            warn!(
                account = %proof.account,
                token = %approval.token,
                "Access rule rejected key request"
            );
            return Err(VaultError::AccessDenied(format!(
                "token {} does not grant access to {}",
                approval.token, object.id
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl EncryptionService for LocalKeyServer {
    fn name(&self) -> &str {
        "local-key-server"
    }

    async fn encrypt(
        &self,
        data: &[u8],
        threshold: u8,
        policy: &PolicyId,
        id: &EncryptionId,
    ) -> Result<Vec<u8>> {
        if threshold == 0 {
            return Err(VaultError::Encryption("threshold must be at least 1".into()));
        }
        if !id.is_under(policy) {
            return Err(VaultError::Encryption(format!(
                "encryption id {id} was not derived from policy {policy}"
            )));
        }

        let mode = if data.len() > self.streaming_threshold {
            BodyMode::Segmented
        } else {
            BodyMode::Single
        };
        let mut object = EncryptedObject {
            version: OBJECT_VERSION,
            threshold,
            mode,
            policy: policy.clone(),
            id: id.clone(),
            nonce: aead::generate_nonce(),
            body: Vec::new(),
        };

        let key = self.object_key(policy, id);
        let aad = object.aad();
        object.body = match mode {
            BodyMode::Single => aead::encrypt_with_nonce(&key, &object.nonce, data, &aad)?,
            BodyMode::Segmented => streaming::encrypt_segmented(&key, &object.nonce, data, &aad)?,
        };

        debug!(id = %id, mode = ?mode, plain = data.len(), "Sealed object");
        Ok(object.to_bytes())
    }

    async fn request_capability(
        &self,
        account: &AccountAddress,
        policy: &PolicyId,
        ttl: Duration,
    ) -> Result<CapabilityRequest> {
        CapabilityRequest::new(account.clone(), policy.clone(), ttl)
    }

    async fn decrypt(
        &self,
        encrypted: &[u8],
        capability: &OwnershipCapability,
        approval: &AccessApproval,
    ) -> Result<Vec<u8>> {
        let object = EncryptedObject::parse(encrypted)?;
        self.check_access(&object, capability, approval).await?;

        let key = self.object_key(&object.policy, &object.id);
        let aad = object.aad();
        match object.mode {
            BodyMode::Single => aead::decrypt(&key, &object.nonce, &object.body, &aad),
            BodyMode::Segmented => {
                streaming::decrypt_segmented(&key, &object.nonce, &object.body, &aad)
            }
        }
    }
}
