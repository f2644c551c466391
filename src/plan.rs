/// Boundary selection: how much of an asset goes through the encryption service.
///
/// Only a prefix of each file is encrypted. The prefix length is a tiered
/// fraction of the total size with a 1 MiB floor, so the cost of the
/// threshold-encryption step stays bounded no matter how large the package is,
/// while the plaintext suffix moves at full storage-network throughput.
///
/// | total size        | protected fraction |
/// |-------------------|--------------------|
/// | <= 500 MiB        | 15%                |
/// | 500 MiB - 1 GiB   | 10%                |
/// | > 1 GiB           | 5%                 |
///
/// The resulting plan is persisted with the asset and read back at download
/// time; it is never recomputed from the file size.
use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::error::{Result, VaultError};

pub const KIB: u64 = 1024;
pub const MIB: u64 = 1024 * KIB;
pub const GIB: u64 = 1024 * MIB;

/// Smallest prefix that is ever encrypted (unless the whole file is smaller).
pub const MIN_PROTECTED_LENGTH: u64 = MIB;

/// Version of the tier table below. Recorded in asset metadata.
pub const PLAN_POLICY_VERSION: u16 = 1;

/// (inclusive upper bound, protected percent)
const TIERS: [(u64, u64); 3] = [(500 * MIB, 15), (GIB, 10), (u64::MAX, 5)];

/// Where an asset is split into protected prefix and plain suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptionPlan {
    pub boundary_offset: u64,
    pub protected_length: u64,
    pub plain_length: u64,
}

impl EncryptionPlan {
    /// Build a plan for an explicit boundary.
    pub fn at_offset(total_length: u64, boundary_offset: u64) -> Result<Self> {
        if boundary_offset > total_length {
            return Err(VaultError::InvalidInput(format!(
                "boundary {boundary_offset} exceeds asset length {total_length}"
            )));
        }
        Ok(Self {
            boundary_offset,
            protected_length: boundary_offset,
            plain_length: total_length - boundary_offset,
        })
    }

    pub fn total_length(&self) -> u64 {
        self.boundary_offset + self.plain_length
    }

    /// True when the whole asset is protected and no plain chunk exists.
    pub fn is_full(&self) -> bool {
        self.plain_length == 0
    }

    pub fn protected_range(&self) -> Range<u64> {
        0..self.boundary_offset
    }

    pub fn plain_range(&self) -> Range<u64> {
        self.boundary_offset..self.total_length()
    }

    /// Share of the asset that is encrypted, in percent.
    pub fn protected_percent(&self) -> f64 {
        let total = self.total_length();
        if total == 0 {
            return 0.0;
        }
        self.protected_length as f64 * 100.0 / total as f64
    }

    /// Check the plan's own arithmetic and, when known, that it covers `total_length`.
    pub fn validate(&self, total_length: Option<u64>) -> Result<()> {
        if self.protected_length != self.boundary_offset {
            return Err(VaultError::Integrity(format!(
                "plan protected length {} does not match boundary {}",
                self.protected_length, self.boundary_offset
            )));
        }
        if let Some(total) = total_length {
            if self.total_length() != total {
                return Err(VaultError::Integrity(format!(
                    "plan covers {} bytes but asset has {total}",
                    self.total_length()
                )));
            }
        }
        Ok(())
    }
}

/// Percent of an asset of `total_size` bytes that the tier table protects.
pub fn protection_percent(total_size: u64) -> u64 {
    TIERS
        .iter()
        .find(|(upper, _)| total_size <= *upper)
        .map(|(_, pct)| *pct)
        .unwrap_or(5)
}

/// Select the protected/plain boundary for an asset of `total_size` bytes.
///
/// Protected length is `max(round(total * fraction), 1 MiB)`, capped at the
/// total size. Files under 1 MiB come back as a full plan (`is_full()`).
pub fn select_boundary(total_size: u64) -> EncryptionPlan {
    let pct = protection_percent(total_size) as u128;
    // round half up in integer arithmetic; u128 keeps total * pct from overflowing
    let scaled = ((total_size as u128 * pct + 50) / 100) as u64;
    let protected = scaled.max(MIN_PROTECTED_LENGTH).min(total_size);

    EncryptionPlan {
        boundary_offset: protected,
        protected_length: protected,
        plain_length: total_size - protected,
    }
}

/// Human-readable byte size, e.g. `40.0 MB`.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{size:.1} {}", UNITS[unit])
}
