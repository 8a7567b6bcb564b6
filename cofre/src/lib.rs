//! # Cofre
//!
//! Field-level encryption for document databases, with blind indexes for
//! equality search and an idempotent re-encryption migration.
//!
//! ## Features
//!
//! - Deterministic AES-256-GCM envelopes (`v1:<iv>:<ciphertext>:<tag>`)
//! - Fail-open decryption of legacy plaintext
//! - Typed codecs for strings, numbers, booleans and string lists
//! - Blind indexes (HMAC-SHA256) for lookups and unique constraints
//! - Collection-wide migration over any [`DocumentStore`](store::DocumentStore)
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use cofre::prelude::*;
//!
//! let keys = Arc::new(KeyManager::from_config(&"00".repeat(32))?);
//! let fields = FieldCodec::new(Arc::clone(&keys));
//! let index = BlindIndex::new(keys);
//!
//! let stored = fields.encrypt_string("Maria")?;
//! assert!(stored.starts_with("v1:"));
//! assert_eq!(fields.decrypt_string(&stored), "Maria");
//! assert_eq!(index.hash_for_search("maria ")?, index.hash_for_search("MARIA")?);
//! # Ok::<(), cofre::error::Error>(())
//! ```

#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod blind_index;
pub mod envelope;
pub mod error;
pub mod field;
pub mod key_manager;
pub mod migration;
pub mod schema;
pub mod store;

pub mod prelude {
    //! Convenience re-exports for common use.
    pub use crate::blind_index::BlindIndex;
    pub use crate::envelope::{Envelope, EnvelopeCodec, FallbackReason, Opened};
    pub use crate::error::{Error, StoreError};
    pub use crate::field::{FieldCodec, StoredField};
    pub use crate::key_manager::KeyManager;
    pub use crate::migration::{
        FailurePolicy, MigrationExecutor, MigrationOptions, MigrationReport,
    };
    pub use crate::schema::{builtin, CollectionSchema, FieldKind, FieldSpec, Plain};
    pub use crate::store::{Document, DocumentStore, DocumentUpdate, IndexSpec, MemoryStore};
}
