//! Entries and the canonical leaf encoding fed to the hash primitive.

use core::convert::Infallible;
use core::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Length in bytes of an [`EntryKey`].
pub const KEY_LENGTH: usize = 32;

/// Fixed-size key identifying an [`Entry`] within a tree.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryKey([u8; KEY_LENGTH]);

impl EntryKey {
    /// Wraps raw key bytes.
    #[inline(always)]
    pub const fn new(bytes: [u8; KEY_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Derives a key as the SHA-256 digest of `data`.
    ///
    /// ```
    /// use dmtree::EntryKey;
    ///
    /// let key = EntryKey::digest_of(b"key1");
    /// assert_eq!(key, EntryKey::digest_of("key1"));
    /// assert_ne!(key, EntryKey::digest_of(b"key2"));
    /// ```
    pub fn digest_of(data: impl AsRef<[u8]>) -> Self {
        Self(Sha256::digest(data.as_ref()).into())
    }

    /// Returns the raw key bytes.
    #[inline(always)]
    pub const fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.0
    }
}

impl From<[u8; KEY_LENGTH]> for EntryKey {
    #[inline(always)]
    fn from(bytes: [u8; KEY_LENGTH]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for EntryKey {
    #[inline(always)]
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for EntryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for EntryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntryKey({})", hex::encode(self.0))
    }
}

/// A key/value pair stored in a leaf.
///
/// Entries are immutable once inserted; replacing a value means deleting the key and
/// inserting a new entry, which moves it to the end of the sequence.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Entry {
    /// Key unique within the tree.
    pub key: EntryKey,
    /// Opaque payload.
    pub value: Vec<u8>,
}

impl Entry {
    /// Creates an entry.
    pub fn new(key: impl Into<EntryKey>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Canonical serialization of an [`Entry`] into the bytes hashed as its leaf digest.
///
/// Implementations must be deterministic and should be injective: distinct entries must
/// produce distinct leaf material.
pub trait LeafEncoder {
    /// Error reported when an entry can not be encoded.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Encodes `entry` into leaf material.
    fn encode(&self, entry: &Entry) -> Result<Vec<u8>, Self::Error>;
}

/// Encodes entries as compact JSON objects: `{"key":[..],"value":[..]}`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct JsonEncoder;

impl LeafEncoder for JsonEncoder {
    type Error = serde_json::Error;

    #[inline]
    fn encode(&self, entry: &Entry) -> Result<Vec<u8>, Self::Error> {
        serde_json::to_vec(entry)
    }
}

/// Encodes entries as the key bytes, the value length as a big-endian `u64`, then the value
/// bytes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BinaryEncoder;

impl LeafEncoder for BinaryEncoder {
    type Error = Infallible;

    #[inline]
    fn encode(&self, entry: &Entry) -> Result<Vec<u8>, Self::Error> {
        let mut out = Vec::with_capacity(KEY_LENGTH + 8 + entry.value.len());
        out.extend_from_slice(entry.key.as_bytes());
        out.extend_from_slice(&(entry.value.len() as u64).to_be_bytes());
        out.extend_from_slice(&entry.value);
        Ok(out)
    }
}
