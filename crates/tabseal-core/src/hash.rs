//! Stable hashing helpers for rows, datasets, payloads, and chain entries.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::Digest as _;

use crate::error::{Error, Result};

/// A 256-bit digest. Serialized as 64 lowercase hex characters.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    pub const ZERO: Hash256 = Hash256([0u8; 32]);

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        let mut s = String::with_capacity(64);
        for b in &self.0 {
            use std::fmt::Write as _;
            let _ = write!(&mut s, "{:02x}", b);
        }
        s
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.len() != 64 || !s.is_ascii() {
            return Err(Error::Serialize(format!("bad digest hex (len {})", s.len())));
        }
        let mut out = [0u8; 32];
        for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
            let pair = std::str::from_utf8(chunk).map_err(|e| Error::Serialize(e.to_string()))?;
            out[i] = u8::from_str_radix(pair, 16)
                .map_err(|e| Error::Serialize(format!("bad digest hex: {e}")))?;
        }
        Ok(Hash256(out))
    }

    /// First 8 bytes as a little-endian integer; used for bucketing only.
    pub fn prefix_u64(&self) -> u64 {
        let mut b = [0u8; 8];
        b.copy_from_slice(&self.0[..8]);
        u64::from_le_bytes(b)
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash256({})", self.to_hex())
    }
}

impl FromStr for Hash256 {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        Hash256::from_hex(s)
    }
}

impl Serialize for Hash256 {
    fn serialize<S: Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash256 {
    fn deserialize<D: Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        Hash256::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Hash function used by the chain. Content hashes are always BLAKE3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgo {
    #[default]
    Blake3,
    Sha256,
}

impl HashAlgo {
    pub fn digest(&self, bytes: &[u8]) -> Hash256 {
        self.digest_parts(&[bytes])
    }

    /// Digest of the plain concatenation of `parts`.
    pub fn digest_parts(&self, parts: &[&[u8]]) -> Hash256 {
        match self {
            HashAlgo::Blake3 => {
                let mut h = blake3::Hasher::new();
                for p in parts {
                    h.update(p);
                }
                Hash256(h.finalize().into())
            }
            HashAlgo::Sha256 => {
                let mut h = sha2::Sha256::new();
                for p in parts {
                    h.update(p);
                }
                Hash256(h.finalize().into())
            }
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            HashAlgo::Blake3 => "blake3",
            HashAlgo::Sha256 => "sha256",
        }
    }
}

pub fn hash_bytes(bytes: &[u8]) -> Hash256 {
    Hash256(blake3::hash(bytes).into())
}

pub fn hash_str(s: &str) -> Hash256 {
    hash_bytes(s.as_bytes())
}

/// Canonical JSON bytes: object keys sorted recursively, compact separators.
pub fn canonical_json_bytes<T: Serialize>(v: &T) -> Result<Vec<u8>> {
    let value = serde_json::to_value(v)?;
    Ok(serde_json::to_vec(&sort_keys(value))?)
}

// serde_json's `Map` is already sorted unless some crate in the build turns
// on its `preserve_order` feature; the explicit sort keeps hashes stable then.
fn sort_keys(v: serde_json::Value) -> serde_json::Value {
    use serde_json::Value;
    match v {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, sort_keys(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

/// Hash any serde-serializable value deterministically (via canonical JSON).
pub fn hash_serde<T: Serialize>(v: &T) -> Result<Hash256> {
    Ok(hash_bytes(&canonical_json_bytes(v)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_roundtrip_and_serde_shape() {
        let h = hash_str("tabseal");
        assert_eq!(Hash256::from_hex(&h.to_hex()).unwrap(), h);
        let json = serde_json::to_string(&h).unwrap();
        assert_eq!(json, format!("\"{}\"", h.to_hex()));
    }

    #[test]
    fn bad_hex_is_rejected() {
        assert!(Hash256::from_hex("abc").is_err());
        assert!(Hash256::from_hex(&"zz".repeat(32)).is_err());
    }

    #[test]
    fn canonical_json_sorts_nested_keys() {
        let a = serde_json::json!({"b": 1, "a": {"y": 2, "x": [ {"k": 1, "j": 2} ]}});
        let bytes = canonical_json_bytes(&a).unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"a":{"x":[{"j":2,"k":1}],"y":2},"b":1}"#
        );
    }

    #[test]
    fn algos_differ_but_are_stable() {
        let a = HashAlgo::Blake3.digest(b"x");
        let b = HashAlgo::Sha256.digest(b"x");
        assert_ne!(a, b);
        assert_eq!(HashAlgo::Sha256.digest_parts(&[b"ab", b"c"]), HashAlgo::Sha256.digest(b"abc"));
        assert_eq!(a, hash_bytes(b"x"));
    }
}
