/// Assets: the binary packages being published.
///
/// An asset is immutable once handed to the publisher. Its bytes come either
/// from memory or from a file on disk; file-backed assets are read one range
/// at a time so a package of tens of GiB never sits in memory whole.
use std::ops::Range;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{Result, VaultError};
use crate::split;

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Where an asset's bytes live.
#[derive(Debug, Clone)]
pub enum AssetSource {
    Memory(Bytes),
    File(PathBuf),
}

/// Storefront details recorded next to the asset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Listing {
    pub title: String,
    pub description: String,
    pub genre: String,
    /// Price in the ledger's smallest unit.
    pub price: u64,
}

/// An immutable binary payload plus its declared metadata.
#[derive(Debug, Clone)]
pub struct Asset {
    pub listing: Listing,
    /// Original file name, used for MIME detection and metadata.
    pub file_name: String,
    pub content_type: String,
    len: u64,
    source: AssetSource,
}

impl Asset {
    /// In-memory asset. The content type is guessed from `file_name`.
    pub fn from_bytes(listing: Listing, file_name: &str, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self {
            listing,
            file_name: file_name.to_string(),
            content_type: guess_content_type(file_name),
            len: data.len() as u64,
            source: AssetSource::Memory(data),
        }
    }

    /// File-backed asset. Only the file's metadata is read here.
    pub async fn from_path(listing: Listing, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let meta = tokio::fs::metadata(path).await?;
        if !meta.is_file() {
            return Err(VaultError::InvalidInput(format!(
                "{} is not a regular file",
                path.display()
            )));
        }
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(Self {
            listing,
            content_type: guess_content_type(&file_name),
            file_name,
            len: meta.len(),
            source: AssetSource::File(path.to_path_buf()),
        })
    }

    pub fn with_content_type(mut self, content_type: &str) -> Self {
        self.content_type = content_type.to_string();
        self
    }

    pub fn title(&self) -> &str {
        &self.listing.title
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn source(&self) -> &AssetSource {
        &self.source
    }

    /// Read one byte range of the asset.
    pub async fn read_range(&self, range: Range<u64>) -> Result<Bytes> {
        if range.end > self.len || range.start > range.end {
            return Err(VaultError::InvalidInput(format!(
                "range {}..{} outside asset of {} bytes",
                range.start, range.end, self.len
            )));
        }
        match &self.source {
            AssetSource::Memory(data) => Ok(data.slice(range.start as usize..range.end as usize)),
            AssetSource::File(path) => {
                let mut file = tokio::fs::File::open(path).await?;
                let buf = split::read_range(&mut file, range).await?;
                Ok(Bytes::from(buf))
            }
        }
    }

    /// Read the whole asset.
    pub async fn read_all(&self) -> Result<Bytes> {
        self.read_range(0..self.len).await
    }
}

/// MIME type for a file name, falling back to `application/octet-stream`.
pub fn guess_content_type(file_name: &str) -> String {
    mime_guess::from_path(file_name)
        .first()
        .map(|m| m.essence_str().to_string())
        .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string())
}
