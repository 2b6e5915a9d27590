//! Snapshot artifact envelope.
//!
//! Layout:
//! [ magic: u32 ][ version: u16 ][ codec: u8 ][ reserved: u8 ]
//! [ uncompressed_len: u64 ][ compressed_len: u64 ]
//! [ payload bytes … ]
//!
//! The artifact's content hash is taken over the whole envelope (header and
//! payload), i.e. the exact bytes handed to the store.

use crate::codec::{self, Codec};
use crate::error::{Error, Result};

pub const MAGIC: u32 = 0x5442_5341; // "TBSA"
pub const VERSION: u16 = 1;
pub const HEADER_LEN: usize = 4 + 2 + 1 + 1 + 8 + 8;

/// Upper bound accepted when decoding; guards against corrupted length fields.
pub const MAX_PAYLOAD_LEN: u64 = 4 * 1024 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeHeader {
    pub magic: u32,
    pub version: u16,
    pub codec: Codec,
    pub uncompressed_len: u64,
    pub compressed_len: u64,
}

impl EnvelopeHeader {
    pub fn new(codec: Codec, uncompressed_len: u64, compressed_len: u64) -> Self {
        Self {
            magic: MAGIC,
            version: VERSION,
            codec,
            uncompressed_len,
            compressed_len,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN);
        out.extend_from_slice(&self.magic.to_le_bytes());
        out.extend_from_slice(&self.version.to_le_bytes());
        out.push(self.codec as u8);
        out.push(0u8); // reserved
        out.extend_from_slice(&self.uncompressed_len.to_le_bytes());
        out.extend_from_slice(&self.compressed_len.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(Error::Storage("short envelope header".into()));
        }
        let magic = u32::from_le_bytes(array(&bytes[0..4]));
        let version = u16::from_le_bytes(array(&bytes[4..6]));
        let codec = Codec::from_u8(bytes[6])?;
        // bytes[7] reserved
        let uncompressed_len = u64::from_le_bytes(array(&bytes[8..16]));
        let compressed_len = u64::from_le_bytes(array(&bytes[16..24]));

        if magic != MAGIC || version != VERSION {
            return Err(Error::Storage("bad envelope magic/version".into()));
        }
        if uncompressed_len > MAX_PAYLOAD_LEN || compressed_len > MAX_PAYLOAD_LEN {
            return Err(Error::Storage("envelope length exceeds limit".into()));
        }

        Ok(Self {
            magic,
            version,
            codec,
            uncompressed_len,
            compressed_len,
        })
    }
}

fn array<const N: usize>(s: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(s);
    out
}

/// Compress `payload` and prepend the header.
pub fn seal_payload(codec: Codec, payload: &[u8]) -> Result<Vec<u8>> {
    let compressed = codec::compress(codec, payload)?;
    let header = EnvelopeHeader::new(codec, payload.len() as u64, compressed.len() as u64);
    let mut out = header.to_bytes();
    out.reserve(compressed.len());
    out.extend_from_slice(&compressed);
    Ok(out)
}

/// Parse the header, check lengths, and return the decompressed payload.
pub fn open_payload(bytes: &[u8]) -> Result<Vec<u8>> {
    let header = EnvelopeHeader::from_bytes(bytes)?;
    let body = &bytes[HEADER_LEN..];
    if body.len() as u64 != header.compressed_len {
        return Err(Error::Storage(format!(
            "envelope body is {} bytes, header says {}",
            body.len(),
            header.compressed_len
        )));
    }
    let out = codec::decompress(header.codec, body)?;
    if out.len() as u64 != header.uncompressed_len {
        return Err(Error::Codec(format!(
            "decoded {} bytes, header says {}",
            out.len(),
            header.uncompressed_len
        )));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_then_open() {
        let bytes = seal_payload(Codec::None, b"{\"a\":1}").unwrap();
        assert_eq!(bytes.len(), HEADER_LEN + 7);
        assert_eq!(open_payload(&bytes).unwrap(), b"{\"a\":1}");
    }

    #[test]
    fn truncated_body_rejected() {
        let mut bytes = seal_payload(Codec::None, b"hello").unwrap();
        bytes.pop();
        assert!(open_payload(&bytes).is_err());
    }

    #[test]
    fn bad_magic_rejected() {
        let mut bytes = seal_payload(Codec::None, b"hello").unwrap();
        bytes[0] ^= 0xff;
        assert!(EnvelopeHeader::from_bytes(&bytes).is_err());
    }
}
