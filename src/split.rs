/// Chunk splitting and reconstruction.
///
/// Upload always treats the bytes before the boundary as the protected chunk
/// and the rest as the plain chunk. Download puts the decrypted protected chunk
/// first and appends the plain chunk, with no re-encoding. That ordering is the
/// whole wire contract between the two sides.
///
/// [`read_range`] works against any seekable async reader, so a multi-GiB
/// package is never resident in memory as a whole: each chunk is read on its
/// own.
use std::ops::Range;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt};

use crate::error::{Result, VaultError};
use crate::plan::EncryptionPlan;

/// Split an in-memory asset into `(protected, plain)` at the plan's boundary.
pub fn split<'a>(asset: &'a [u8], plan: &EncryptionPlan) -> Result<(&'a [u8], &'a [u8])> {
    if plan.total_length() != asset.len() as u64 {
        return Err(VaultError::InvalidInput(format!(
            "plan covers {} bytes but asset has {}",
            plan.total_length(),
            asset.len()
        )));
    }
    let boundary = usize::try_from(plan.boundary_offset)
        .map_err(|_| VaultError::InvalidInput("boundary does not fit in memory".into()))?;
    Ok(asset.split_at(boundary))
}

/// Inverse of [`split`]: protected bytes first, then plain bytes.
pub fn reconstruct(protected: &[u8], plain: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(protected.len() + plain.len());
    out.extend_from_slice(protected);
    out.extend_from_slice(plain);
    out
}

/// Read exactly `range` from a seekable reader.
pub async fn read_range<R>(reader: &mut R, range: Range<u64>) -> Result<Vec<u8>>
where
    R: AsyncRead + AsyncSeek + Unpin,
{
    let expected = range.end.saturating_sub(range.start);
    let capacity = usize::try_from(expected)
        .map_err(|_| VaultError::InvalidInput("range does not fit in memory".into()))?;

    reader.seek(std::io::SeekFrom::Start(range.start)).await?;
    let mut buf = Vec::with_capacity(capacity);
    reader.take(expected).read_to_end(&mut buf).await?;

    if buf.len() as u64 != expected {
        return Err(VaultError::InvalidInput(format!(
            "asset ended early: wanted {expected} bytes at offset {}, got {}",
            range.start,
            buf.len()
        )));
    }
    Ok(buf)
}
