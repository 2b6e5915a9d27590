//! Compression facade for snapshot artifacts (feature-gated).
//!
//! Keep this tiny and synchronous. We only support `None`, `Zstd`, `Lz4`.

use serde::{Deserialize, Serialize};
use tabseal_core::config::SnapshotCodec;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Codec {
    None = 0,
    Zstd = 1,
    Lz4 = 2,
}

impl Codec {
    pub fn from_u8(v: u8) -> Result<Self> {
        match v {
            0 => Ok(Codec::None),
            1 => Ok(Codec::Zstd),
            2 => Ok(Codec::Lz4),
            _ => Err(Error::CodecUnsupported("unknown")),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Codec::None => "none",
            Codec::Zstd => "zstd",
            Codec::Lz4 => "lz4",
        }
    }

    /// Whether this build can actually encode with the codec.
    pub fn is_available(&self) -> bool {
        match self {
            Codec::None => true,
            Codec::Zstd => cfg!(feature = "zstd"),
            Codec::Lz4 => cfg!(feature = "lz4"),
        }
    }
}

impl From<SnapshotCodec> for Codec {
    fn from(c: SnapshotCodec) -> Self {
        match c {
            SnapshotCodec::None => Codec::None,
            SnapshotCodec::Zstd => Codec::Zstd,
            SnapshotCodec::Lz4 => Codec::Lz4,
        }
    }
}

pub fn compress(codec: Codec, input: &[u8]) -> Result<Vec<u8>> {
    match codec {
        Codec::None => Ok(input.to_vec()),
        Codec::Zstd => {
            #[cfg(feature = "zstd")]
            {
                let mut out = Vec::new();
                zstd::stream::copy_encode(input, &mut out, 3)
                    .map_err(|e| Error::Codec(format!("zstd: {e}")))?;
                Ok(out)
            }
            #[cfg(not(feature = "zstd"))]
            {
                Err(Error::CodecUnsupported("zstd"))
            }
        }
        Codec::Lz4 => {
            #[cfg(feature = "lz4")]
            {
                Ok(lz4_flex::compress_prepend_size(input))
            }
            #[cfg(not(feature = "lz4"))]
            {
                Err(Error::CodecUnsupported("lz4"))
            }
        }
    }
}

pub fn decompress(codec: Codec, input: &[u8]) -> Result<Vec<u8>> {
    match codec {
        Codec::None => Ok(input.to_vec()),
        Codec::Zstd => {
            #[cfg(feature = "zstd")]
            {
                let mut out = Vec::new();
                zstd::stream::copy_decode(input, &mut out)
                    .map_err(|e| Error::Codec(format!("zstd: {e}")))?;
                Ok(out)
            }
            #[cfg(not(feature = "zstd"))]
            {
                Err(Error::CodecUnsupported("zstd"))
            }
        }
        Codec::Lz4 => {
            #[cfg(feature = "lz4")]
            {
                lz4_flex::decompress_size_prepended(input)
                    .map_err(|e| Error::Codec(format!("lz4: {e}")))
            }
            #[cfg(not(feature = "lz4"))]
            {
                Err(Error::CodecUnsupported("lz4"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_is_identity() {
        let data = b"abc".to_vec();
        assert_eq!(compress(Codec::None, &data).unwrap(), data);
        assert_eq!(decompress(Codec::None, &data).unwrap(), data);
    }

    #[test]
    fn unknown_tag_rejected() {
        assert!(matches!(Codec::from_u8(9), Err(Error::CodecUnsupported(_))));
    }

    #[cfg(not(feature = "zstd"))]
    #[test]
    fn zstd_without_feature_is_unsupported() {
        assert!(!Codec::Zstd.is_available());
        assert!(matches!(
            compress(Codec::Zstd, b"x"),
            Err(Error::CodecUnsupported("zstd"))
        ));
    }

    #[cfg(feature = "lz4")]
    #[test]
    fn lz4_roundtrip() {
        let data = vec![7u8; 4096];
        let c = compress(Codec::Lz4, &data).unwrap();
        assert!(c.len() < data.len());
        assert_eq!(decompress(Codec::Lz4, &c).unwrap(), data);
    }
}
