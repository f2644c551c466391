/// Encrypted object format produced by the key server.
///
/// Format:
/// [magic "CCSO"(4B) | version(1B) | threshold(1B) | body_mode(1B) |
///  policy_len(2B LE) | policy | id_len(2B LE) | id | nonce(24B) | body]
///
/// `policy` and `id` are their UTF-8 string forms. The header is authenticated
/// as AAD, so editing it breaks decryption.
use crate::crypto::aead::NONCE_LEN;
use crate::error::{Result, VaultError};
use crate::seal::{EncryptionId, PolicyId};

pub const MAGIC: [u8; 4] = *b"CCSO";
pub const OBJECT_VERSION: u8 = 0x01;

/// Fixed part of the header, without the two variable-length fields.
pub const FIXED_HEADER_LEN: usize = 4 + 1 + 1 + 1 + 2 + 2 + NONCE_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyMode {
    /// One AEAD call over the whole payload.
    Single = 0,
    /// Segmented AEAD, see `crypto::streaming`.
    Segmented = 1,
}

impl BodyMode {
    fn from_byte(b: u8) -> Result<Self> {
        match b {
            0 => Ok(BodyMode::Single),
            1 => Ok(BodyMode::Segmented),
            other => Err(VaultError::Incompatible(format!(
                "unknown body mode {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedObject {
    pub version: u8,
    pub threshold: u8,
    pub mode: BodyMode,
    pub policy: PolicyId,
    pub id: EncryptionId,
    pub nonce: [u8; NONCE_LEN],
    pub body: Vec<u8>,
}

impl EncryptedObject {
    /// Bytes bound into every AEAD call for this object.
    pub fn aad(&self) -> Vec<u8> {
        let mut aad = Vec::with_capacity(self.policy.as_str().len() + self.id.as_str().len() + 3);
        aad.push(self.version);
        aad.push(self.threshold);
        aad.push(self.mode as u8);
        aad.extend_from_slice(self.policy.as_str().as_bytes());
        aad.extend_from_slice(self.id.as_str().as_bytes());
        aad
    }

    pub fn header_len(&self) -> usize {
        FIXED_HEADER_LEN + self.policy.as_str().len() + self.id.as_str().len()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let policy = self.policy.as_str().as_bytes();
        let id = self.id.as_str().as_bytes();

        let mut out = Vec::with_capacity(self.header_len() + self.body.len());
        out.extend_from_slice(&MAGIC);
        out.push(self.version);
        out.push(self.threshold);
        out.push(self.mode as u8);
        out.extend_from_slice(&(policy.len() as u16).to_le_bytes());
        out.extend_from_slice(policy);
        out.extend_from_slice(&(id.len() as u16).to_le_bytes());
        out.extend_from_slice(id);
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.body);
        out
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < MAGIC.len() || data[..MAGIC.len()] != MAGIC {
            return Err(VaultError::Incompatible(
                "not an encrypted object (bad magic)".into(),
            ));
        }
        let mut reader = Reader {
            data,
            offset: MAGIC.len(),
        };

        let version = reader.byte()?;
        if version != OBJECT_VERSION {
            return Err(VaultError::Incompatible(format!(
                "unknown object version {version}"
            )));
        }
        let threshold = reader.byte()?;
        let mode = BodyMode::from_byte(reader.byte()?)?;

        let policy_len = reader.u16()? as usize;
        let policy = PolicyId::parse(reader.utf8(policy_len)?)
            .map_err(|e| VaultError::Integrity(format!("object policy: {e}")))?;
        let id_len = reader.u16()? as usize;
        let id = EncryptionId::parse(reader.utf8(id_len)?)
            .map_err(|e| VaultError::Integrity(format!("object id: {e}")))?;

        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(reader.take(NONCE_LEN)?);
        let body = data[reader.offset..].to_vec();

        Ok(Self {
            version,
            threshold,
            mode,
            policy,
            id,
            nonce,
            body,
        })
    }
}

struct Reader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let data = self.data;
        let slice = data
            .get(self.offset..self.offset + n)
            .ok_or_else(|| {
                VaultError::Integrity(format!(
                    "encrypted object truncated at byte {}",
                    self.data.len()
                ))
            })?;
        self.offset += n;
        Ok(slice)
    }

    fn byte(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn utf8(&mut self, n: usize) -> Result<&'a str> {
        std::str::from_utf8(self.take(n)?)
            .map_err(|_| VaultError::Integrity("object header is not UTF-8".into()))
    }
}
