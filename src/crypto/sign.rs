/// Ed25519 account keys.
///
/// An account address is `0x` followed by the hex-encoded verifying key, so a
/// key server can check a capability signature against the address alone.
use async_trait::async_trait;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;

use crate::capability::WalletSigner;
use crate::crypto::sensitive::SensitiveBytes32;
use crate::error::{Result, VaultError};
use crate::ledger::AccountAddress;

pub const SIGNATURE_LEN: usize = 64;

/// An in-process wallet holding one Ed25519 signing key.
pub struct LocalWallet {
    signing_key: SigningKey,
    address: AccountAddress,
}

impl LocalWallet {
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::generate(&mut OsRng))
    }

    pub fn from_secret(secret: &SensitiveBytes32) -> Self {
        Self::from_signing_key(SigningKey::from_bytes(secret.as_bytes()))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let address = address_of(&signing_key.verifying_key());
        Self {
            signing_key,
            address,
        }
    }

    pub fn address(&self) -> &AccountAddress {
        &self.address
    }

    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.signing_key.sign(message).to_bytes().to_vec()
    }
}

impl std::fmt::Debug for LocalWallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalWallet")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl WalletSigner for LocalWallet {
    fn address(&self) -> AccountAddress {
        self.address.clone()
    }

    async fn sign_personal_message(&self, message: &[u8]) -> Result<Vec<u8>> {
        Ok(self.sign(message))
    }
}

pub fn address_of(key: &VerifyingKey) -> AccountAddress {
    AccountAddress::new(format!("0x{}", hex::encode(key.as_bytes())))
}

/// Verify `signature` over `message` against the key encoded in `address`.
pub fn verify(address: &AccountAddress, message: &[u8], signature: &[u8]) -> Result<()> {
    let key_bytes: [u8; 32] = hex::decode(address.as_str().trim_start_matches("0x"))
        .ok()
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| VaultError::AccessDenied(format!("{address} is not a signing key")))?;
    let key = VerifyingKey::from_bytes(&key_bytes)
        .map_err(|_| VaultError::AccessDenied(format!("{address} is not a signing key")))?;

    let sig_bytes: [u8; SIGNATURE_LEN] = signature
        .try_into()
        .map_err(|_| VaultError::AccessDenied("malformed signature".into()))?;

    key.verify(message, &Signature::from_bytes(&sig_bytes))
        .map_err(|_| VaultError::AccessDenied("signature does not match account".into()))
}
