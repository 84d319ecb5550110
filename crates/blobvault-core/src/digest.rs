//! Content digests
//!
//! A [`Digest`] is the BLAKE3-256 hash of a blob's content. Its canonical
//! string form is 64 lowercase hex characters, which is also the blob's file
//! name on disk. The first byte selects the bucket directory the file lives
//! in, so the hash function and the encoding are part of the on-disk format
//! and must not change.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::DigestError;

/// Number of raw bytes in a digest
pub const DIGEST_LEN: usize = 32;

/// Number of hex characters in the canonical string form
pub const DIGEST_HEX_LEN: usize = DIGEST_LEN * 2;

/// Content identifier of a blob
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Digest([u8; DIGEST_LEN]);

impl Digest {
    /// Wrap raw digest bytes
    pub const fn from_bytes(bytes: [u8; DIGEST_LEN]) -> Self {
        Self(bytes)
    }

    /// Compute the digest of some content
    pub fn compute(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Parse a digest from its hex form
    ///
    /// Both hex cases are accepted; the parsed value always renders lowercase.
    /// Nothing but the string is inspected, so callers can reject bad input
    /// before touching any storage.
    pub fn parse(s: &str) -> Result<Self, DigestError> {
        if s.len() != DIGEST_HEX_LEN {
            return Err(DigestError::InvalidLength {
                expected: DIGEST_HEX_LEN,
                actual: s.len(),
            });
        }

        let mut bytes = [0u8; DIGEST_LEN];
        hex::decode_to_slice(s, &mut bytes).map_err(|e| match e {
            hex::FromHexError::InvalidHexCharacter { c, index } => DigestError::InvalidCharacter {
                character: c,
                position: index,
            },
            _ => DigestError::InvalidLength {
                expected: DIGEST_HEX_LEN,
                actual: s.len(),
            },
        })?;

        Ok(Self(bytes))
    }

    /// Parse a digest only if `s` is exactly its canonical lowercase form
    ///
    /// Used when scanning directories: a file whose name is not canonical was
    /// not written by a container and counts as an orphan.
    pub fn parse_canonical(s: &str) -> Option<Self> {
        let digest = Self::parse(s).ok()?;
        s.bytes()
            .all(|b| !b.is_ascii_uppercase())
            .then_some(digest)
    }

    /// Raw digest bytes
    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    /// Leading byte, which selects the bucket
    pub fn prefix(&self) -> u8 {
        self.0[0]
    }

    /// Canonical lowercase hex form
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short form for logs (first 8 hex chars)
    pub fn short_hex(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.short_hex())
    }
}

impl FromStr for Digest {
    type Err = DigestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<[u8]> for Digest {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}
