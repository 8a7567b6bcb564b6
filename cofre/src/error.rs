//! Error types for `Cofre` operations.

use std::fmt;

/// Main error type for `Cofre` operations.
///
/// Undecryptable envelopes are not errors: the codecs pass them through
/// unchanged. Messages never carry key material or field values.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The master key is absent or does not decode to exactly 32 bytes.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Encryption operation failed
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    /// Subkey derivation failed
    #[error("key derivation failed")]
    KeyDerivation,

    /// Document store operation failed
    #[error("document store error: {0}")]
    Store(#[from] StoreError),

    /// A migration worker panicked or was cancelled
    #[error("migration worker failed: {0}")]
    Worker(String),
}

/// Errors raised by a [`DocumentStore`](crate::store::DocumentStore).
#[derive(Debug)]
pub enum StoreError {
    /// Collection does not exist
    CollectionNotFound(String),

    /// Document id not present in the collection
    DocumentNotFound {
        /// Collection name
        collection: String,
        /// Document id
        id: String,
    },

    /// An update would break a unique index
    DuplicateKey {
        /// Collection name
        collection: String,
        /// Indexed field
        field: String,
    },

    /// Stored data could not be decoded or encoded
    Serialization(String),

    /// I/O operation failed
    Io(std::io::Error),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CollectionNotFound(name) => write!(f, "collection not found: {name}"),
            Self::DocumentNotFound { collection, id } => {
                write!(f, "document {id} not found in {collection}")
            }
            Self::DuplicateKey { collection, field } => {
                write!(f, "duplicate key on unique index {collection}.{field}")
            }
            Self::Serialization(msg) => write!(f, "serialization failed: {msg}"),
            Self::Io(err) => write!(f, "I/O error: {err}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display() {
        let err = StoreError::DuplicateKey {
            collection: "users".to_string(),
            field: "usernameHash".to_string(),
        };
        assert_eq!(err.to_string(), "duplicate key on unique index users.usernameHash");
    }

    #[test]
    fn test_store_error_converts_into_error() {
        let err: Error = StoreError::CollectionNotFound("tools".to_string()).into();
        assert!(matches!(err, Error::Store(StoreError::CollectionNotFound(_))));
        assert_eq!(err.to_string(), "document store error: collection not found: tools");
    }
}
