/// File-based configuration.
///
/// Every field has a default, so an empty or missing file yields a working
/// testnet setup. Sections convert into the runtime configs of the components
/// they drive.
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::download::DownloadConfig;
use crate::error::{Result, VaultError};
use crate::retry::RetryPolicy;
use crate::seal::{PolicyId, DEFAULT_THRESHOLD, TESTNET_POLICY_PACKAGE};
use crate::storage::walrus::{WalrusConfig, TESTNET_AGGREGATOR, TESTNET_PUBLISHER};
use crate::storage::DEFAULT_EPOCHS;
use crate::upload::{UploadConfig, DEFAULT_BYPASS_THRESHOLD, MAX_FILE_SIZE};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColdCacheConfig {
    pub storage: StorageSection,
    pub seal: SealSection,
    pub upload: UploadSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    pub publisher_url: String,
    pub aggregator_url: String,
    pub epochs: u32,
    pub timeout_secs: u64,
    pub deletable: bool,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            publisher_url: TESTNET_PUBLISHER.into(),
            aggregator_url: TESTNET_AGGREGATOR.into(),
            epochs: DEFAULT_EPOCHS,
            timeout_secs: 300,
            deletable: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SealSection {
    pub package_id: String,
    pub threshold: u8,
    pub capability_ttl_mins: u64,
}

impl Default for SealSection {
    fn default() -> Self {
        Self {
            package_id: TESTNET_POLICY_PACKAGE.into(),
            threshold: DEFAULT_THRESHOLD,
            capability_ttl_mins: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadSection {
    pub bypass_threshold: u64,
    pub max_file_size: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
}

impl Default for UploadSection {
    fn default() -> Self {
        Self {
            bypass_threshold: DEFAULT_BYPASS_THRESHOLD,
            max_file_size: MAX_FILE_SIZE,
            max_retries: 3,
            retry_base_delay_ms: 1000,
        }
    }
}

impl ColdCacheConfig {
    /// Load from `path`, or defaults when no path is given.
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = tokio::fs::read_to_string(path).await.map_err(|e| {
            VaultError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        debug!(path = %path.display(), "Loaded config file");
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| VaultError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.seal.threshold == 0 {
            return Err(VaultError::Config("seal.threshold must be at least 1".into()));
        }
        if self.storage.epochs == 0 {
            return Err(VaultError::Config("storage.epochs must be at least 1".into()));
        }
        if self.upload.bypass_threshold > self.upload.max_file_size {
            return Err(VaultError::Config(
                "upload.bypass_threshold exceeds upload.max_file_size".into(),
            ));
        }
        self.policy()?;
        Ok(())
    }

    pub fn policy(&self) -> Result<PolicyId> {
        PolicyId::parse(&self.seal.package_id)
    }

    pub fn upload_config(&self) -> Result<UploadConfig> {
        Ok(UploadConfig {
            bypass_threshold: self.upload.bypass_threshold,
            max_file_size: self.upload.max_file_size,
            threshold: self.seal.threshold,
            epochs: self.storage.epochs,
            policy: self.policy()?,
            retry: RetryPolicy {
                max_retries: self.upload.max_retries,
                base_delay: Duration::from_millis(self.upload.retry_base_delay_ms),
            },
        })
    }

    pub fn download_config(&self) -> Result<DownloadConfig> {
        Ok(DownloadConfig {
            policy: self.policy()?,
            capability_ttl: Duration::from_secs(self.seal.capability_ttl_mins * 60),
        })
    }

    pub fn walrus_config(&self) -> WalrusConfig {
        WalrusConfig {
            publisher_url: self.storage.publisher_url.clone(),
            aggregator_url: self.storage.aggregator_url.clone(),
            timeout: Duration::from_secs(self.storage.timeout_secs),
            deletable: self.storage.deletable,
        }
    }
}
