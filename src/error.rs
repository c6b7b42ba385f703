//! Error types for tree mutations.

use std::error::Error as StdError;

use thiserror::Error;

use crate::encode::EntryKey;

/// Result type for tree operations.
pub type MerkleResult<T> = Result<T, MerkleError>;

/// Errors returned by [`MerkleTree`](crate::MerkleTree) mutations.
///
/// Every failure is reported before the tree is touched, so the tree keeps its previous state
/// and root hash.
#[derive(Debug, Error)]
pub enum MerkleError {
    /// An entry with this key is already in the tree.
    #[error("duplicate key {0}")]
    DuplicateKey(EntryKey),

    /// No entry with this key is in the tree.
    #[error("key {0} not found")]
    KeyNotFound(EntryKey),

    /// The leaf encoder could not serialize an entry.
    #[error("failed to encode entry: {0}")]
    EncodingFailure(#[source] Box<dyn StdError + Send + Sync>),
}

impl MerkleError {
    pub(crate) fn encoding<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        MerkleError::EncodingFailure(Box::new(err))
    }
}
