use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Step of a publish or download flow that a failure (or a progress event) belongs to.
///
/// `Verifying` through `Complete` form the download state machine; `Error` is its
/// terminal failure state. The first three belong to the upload side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Validating,
    Encrypting,
    Storing,
    Verifying,
    Downloading,
    Decrypting,
    Reconstructing,
    Complete,
    Error,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Validating => "validating",
            Stage::Encrypting => "encrypting",
            Stage::Storing => "storing",
            Stage::Verifying => "verifying",
            Stage::Downloading => "downloading",
            Stage::Decrypting => "decrypting",
            Stage::Reconstructing => "reconstructing",
            Stage::Complete => "complete",
            Stage::Error => "error",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse failure class used to pick user-facing messaging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Bad caller input. Never retried.
    Input,
    /// Storage or network failure.
    Infrastructure,
    /// The caller cannot decrypt. Route to an acquisition flow, not "try again".
    Access,
    /// Reconstructed bytes do not match what was published.
    Integrity,
    /// Encrypted object written by an unknown format version. Needs re-publishing.
    Compatibility,
}

#[derive(Error, Debug)]
pub enum VaultError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Transient storage failure: {0}")]
    Transient(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Failed to upload {chunk} after {attempts} attempts: {message}")]
    UploadExhausted {
        chunk: String,
        attempts: u32,
        message: String,
    },

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Integrity check failed: {0}")]
    Integrity(String),

    #[error("Incompatible encrypted object, re-publish required: {0}")]
    Incompatible(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{stage} failed: {source}")]
    AtStage {
        stage: Stage,
        source: Box<VaultError>,
    },
}

impl VaultError {
    /// Attribute this error to a stage. Already-attributed errors keep their original stage.
    pub fn at(self, stage: Stage) -> Self {
        match self {
            VaultError::AtStage { .. } => self,
            other => VaultError::AtStage {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// Stage the failure happened in, if it was attributed.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            VaultError::AtStage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// The underlying error with any stage attribution removed.
    pub fn root(&self) -> &VaultError {
        match self {
            VaultError::AtStage { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self.root() {
            VaultError::InvalidInput(_) | VaultError::Config(_) => ErrorCategory::Input,
            VaultError::Transient(_)
            | VaultError::Storage(_)
            | VaultError::UploadExhausted { .. }
            | VaultError::Encryption(_)
            | VaultError::Serialization(_)
            | VaultError::Io(_) => ErrorCategory::Infrastructure,
            VaultError::Decryption(_) | VaultError::AccessDenied(_) => ErrorCategory::Access,
            VaultError::Integrity(_) => ErrorCategory::Integrity,
            VaultError::Incompatible(_) => ErrorCategory::Compatibility,
            VaultError::AtStage { source, .. } => source.category(),
        }
    }

    /// Whether a retry could change the outcome.
    pub fn is_transient(&self) -> bool {
        matches!(self.root(), VaultError::Transient(_))
    }
}

pub type Result<T> = std::result::Result<T, VaultError>;

/// Stage attribution for results.
pub trait StageExt<T> {
    fn at(self, stage: Stage) -> Result<T>;
}

impl<T> StageExt<T> for Result<T> {
    fn at(self, stage: Stage) -> Result<T> {
        self.map_err(|e| e.at(stage))
    }
}
