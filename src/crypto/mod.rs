/// Cryptographic primitives used by the local key server and wallet.
///
/// The threshold-encryption service proper is an external collaborator;
/// these primitives back the in-process implementation of its contract
/// and the Ed25519 account keys that sign capability challenges.
pub mod aead;
pub mod hash;
pub mod sensitive;
pub mod sign;
pub mod streaming;
