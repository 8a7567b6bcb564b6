//! Blind index generation for equality search over encrypted fields.
//!
//! A blind index lets the database answer `WHERE field = ?` and enforce
//! uniqueness without ever seeing the plaintext. The index is computed as:
//!
//! ```text
//! hex(HMAC-SHA256(hash_key, lowercase(trim(value))))
//! ```
//!
//! No collection or field name is mixed in: the same value in two different
//! fields yields the same digest. Queries must always target the index field
//! that belongs to the field being searched.

use std::sync::Arc;

use crate::error::Error;
use crate::key_manager::{expose, hmac_sha256, KeyManager};

/// Length of a hex-encoded blind index.
pub const BLIND_INDEX_HEX_LEN: usize = 64;

/// Normalizes a value before indexing: trims and lowercases.
#[must_use]
pub fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Computes blind indexes with the hash subkey.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use cofre::blind_index::BlindIndex;
/// use cofre::key_manager::KeyManager;
///
/// let index = BlindIndex::new(Arc::new(KeyManager::from_bytes(&[0u8; 32]).unwrap()));
///
/// let digest = index.hash_for_search("Alice ").unwrap();
/// assert_eq!(digest.len(), 64);
/// assert_eq!(digest, index.hash_for_search("alice").unwrap());
/// ```
#[derive(Debug, Clone)]
pub struct BlindIndex {
    keys: Arc<KeyManager>,
}

impl BlindIndex {
    /// Creates a blind index generator over the given key material.
    #[must_use]
    pub const fn new(keys: Arc<KeyManager>) -> Self {
        Self { keys }
    }

    /// Returns the lowercase hex digest for `value` after normalization.
    ///
    /// # Errors
    ///
    /// Returns `Error::KeyDerivation` if the MAC cannot be keyed.
    pub fn hash_for_search(&self, value: &str) -> Result<String, Error> {
        let digest = hmac_sha256(expose(self.keys.hash_key()), normalize(value).as_bytes())?;
        Ok(hex::encode(digest))
    }

    /// Like [`hash_for_search`](Self::hash_for_search), but `None` for values
    /// that are empty after trimming, which are never indexed.
    ///
    /// # Errors
    ///
    /// Returns `Error::KeyDerivation` if the MAC cannot be keyed.
    pub fn hash_if_present(&self, value: &str) -> Result<Option<String>, Error> {
        if value.trim().is_empty() {
            return Ok(None);
        }
        self.hash_for_search(value).map(Some)
    }
}
