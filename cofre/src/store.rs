//! Document store abstraction used by the migration executor.
//!
//! The engine only needs three things from a database: a forward cursor over
//! a collection, update-by-id with set/unset semantics, and declarative
//! unique/sparse index creation. [`MemoryStore`] implements them in memory;
//! other backends live in their own crates.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::field::StoredField;

static NULL: Value = Value::Null;

/// A stored document: an id plus its top-level fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Document identifier.
    #[serde(rename = "_id")]
    pub id: String,
    /// Every other top-level field.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Document {
    /// Creates an empty document.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), fields: Map::new() }
    }

    /// Adds a field.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Returns a field's raw value.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Returns true if the field is present and not null.
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        !matches!(self.fields.get(name), None | Some(Value::Null))
    }

    /// Reads a field in the shape the codecs expect.
    #[must_use]
    pub fn stored(&self, name: &str) -> StoredField {
        self.fields.get(name).map_or(StoredField::Absent, stored_from_value)
    }
}

/// Converts a raw JSON value into a [`StoredField`].
///
/// Native numbers and booleans from older documents become their string form.
/// Objects are kept as their JSON text so nothing is silently dropped.
#[must_use]
pub fn stored_from_value(value: &Value) -> StoredField {
    match value {
        Value::Null => StoredField::Absent,
        Value::String(s) => StoredField::Scalar(s.clone()),
        Value::Array(items) => StoredField::List(items.iter().map(element_to_string).collect()),
        other => StoredField::Scalar(element_to_string(other)),
    }
}

fn element_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// A single-document update with set and unset semantics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentUpdate {
    /// Fields to write.
    pub set: Map<String, Value>,
    /// Fields to remove.
    pub unset: BTreeSet<String>,
}

impl DocumentUpdate {
    /// Creates an empty update.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes `value` to `field`.
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        let field = field.into();
        self.unset.remove(&field);
        self.set.insert(field, value.into());
    }

    /// Removes `field`.
    pub fn unset(&mut self, field: impl Into<String>) {
        let field = field.into();
        self.set.remove(&field);
        self.unset.insert(field);
    }

    /// Returns true if there is nothing to write.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.unset.is_empty()
    }

    /// Returns true if applying the update would leave `document` unchanged.
    #[must_use]
    pub fn is_noop_for(&self, document: &Document) -> bool {
        self.set.iter().all(|(field, value)| document.fields.get(field) == Some(value))
            && self.unset.iter().all(|field| !document.fields.contains_key(field))
    }

    /// Applies the update to a field map.
    pub fn apply_to(&self, fields: &mut Map<String, Value>) {
        for field in &self.unset {
            fields.remove(field);
        }
        for (field, value) in &self.set {
            fields.insert(field.clone(), value.clone());
        }
    }
}

/// Declarative index over one field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexSpec {
    /// Indexed field.
    pub field: String,
    /// Reject two documents with the same value.
    pub unique: bool,
    /// Skip documents that lack the field.
    pub sparse: bool,
}

impl IndexSpec {
    /// A unique index that also covers documents missing the field.
    #[must_use]
    pub fn unique(field: impl Into<String>) -> Self {
        Self { field: field.into(), unique: true, sparse: false }
    }

    /// A unique index that ignores documents missing the field.
    #[must_use]
    pub fn unique_sparse(field: impl Into<String>) -> Self {
        Self { field: field.into(), unique: true, sparse: true }
    }

    /// A non-unique lookup index.
    #[must_use]
    pub fn lookup(field: impl Into<String>) -> Self {
        Self { field: field.into(), unique: false, sparse: false }
    }

    fn key<'a>(&self, fields: &'a Map<String, Value>) -> Option<&'a Value> {
        match fields.get(&self.field) {
            Some(Value::Null) | None if self.sparse => None,
            Some(value) => Some(value),
            None => Some(&NULL),
        }
    }
}

/// Forward-only cursor over a collection.
#[async_trait]
pub trait DocumentCursor: Send {
    /// Returns the next document, or `None` when the scan is done.
    ///
    /// # Errors
    ///
    /// Returns a `StoreError` if the backend fails to read.
    async fn next(&mut self) -> Result<Option<Document>, StoreError>;
}

/// The document store collaborator.
///
/// Implementations must be thread-safe (`Send + Sync`) so a migration can
/// issue updates from several workers at once.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Opens a cursor over every document in `collection`.
    ///
    /// A collection that does not exist scans as empty.
    ///
    /// # Errors
    ///
    /// Returns a `StoreError` if the backend cannot start the scan.
    async fn open_cursor(&self, collection: &str) -> Result<Box<dyn DocumentCursor>, StoreError>;

    /// Applies `update` to the document with `id`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::DocumentNotFound` if there is no such document, or
    /// `StoreError::DuplicateKey` if the update breaks a unique index.
    async fn update(
        &self,
        collection: &str,
        id: &str,
        update: DocumentUpdate,
    ) -> Result<(), StoreError>;

    /// Creates `index` on `collection` if it does not already exist.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::DuplicateKey` if existing documents violate it.
    async fn ensure_index(&self, collection: &str, index: IndexSpec) -> Result<(), StoreError>;
}

/// Cursor over an owned snapshot of documents.
#[derive(Debug)]
pub struct SnapshotCursor {
    documents: std::vec::IntoIter<Document>,
}

impl SnapshotCursor {
    /// Creates a cursor over `documents`.
    #[must_use]
    pub fn new(documents: Vec<Document>) -> Self {
        Self { documents: documents.into_iter() }
    }
}

#[async_trait]
impl DocumentCursor for SnapshotCursor {
    async fn next(&mut self) -> Result<Option<Document>, StoreError> {
        Ok(self.documents.next())
    }
}

/// Documents and indexes of one collection, with index enforcement.
#[derive(Debug, Clone, Default)]
pub struct Collection {
    documents: Vec<Document>,
    indexes: Vec<IndexSpec>,
}

impl Collection {
    /// Creates a collection from existing documents and indexes.
    #[must_use]
    pub fn from_parts(documents: Vec<Document>, indexes: Vec<IndexSpec>) -> Self {
        Self { documents, indexes }
    }

    /// Returns the documents in insertion order.
    #[must_use]
    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    /// Returns the declared indexes.
    #[must_use]
    pub fn indexes(&self) -> &[IndexSpec] {
        &self.indexes
    }

    /// Finds a document by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Document> {
        self.documents.iter().find(|doc| doc.id == id)
    }

    /// Inserts a document, enforcing unique indexes.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::DuplicateKey` if a unique index would be broken.
    pub fn insert(&mut self, name: &str, document: Document) -> Result<(), StoreError> {
        self.check_unique(name, None, &document.fields)?;
        self.documents.push(document);
        Ok(())
    }

    /// Applies `update` to the document with `id`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::DocumentNotFound` or `StoreError::DuplicateKey`.
    pub fn apply(&mut self, name: &str, id: &str, update: &DocumentUpdate) -> Result<(), StoreError> {
        let position = self.documents.iter().position(|doc| doc.id == id).ok_or_else(|| {
            StoreError::DocumentNotFound { collection: name.to_string(), id: id.to_string() }
        })?;

        let mut fields = self.documents[position].fields.clone();
        update.apply_to(&mut fields);
        self.check_unique(name, Some(position), &fields)?;

        self.documents[position].fields = fields;
        Ok(())
    }

    /// Declares an index, validating existing documents against it.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::DuplicateKey` if existing documents violate it.
    pub fn add_index(&mut self, name: &str, index: IndexSpec) -> Result<(), StoreError> {
        if self.indexes.contains(&index) {
            return Ok(());
        }

        if index.unique {
            let mut seen = Vec::new();
            for doc in &self.documents {
                if let Some(key) = index.key(&doc.fields) {
                    if seen.contains(&key) {
                        return Err(duplicate(name, &index));
                    }
                    seen.push(key);
                }
            }
        }

        self.indexes.push(index);
        Ok(())
    }

    fn check_unique(
        &self,
        name: &str,
        skip: Option<usize>,
        fields: &Map<String, Value>,
    ) -> Result<(), StoreError> {
        for index in self.indexes.iter().filter(|index| index.unique) {
            let Some(key) = index.key(fields) else {
                continue;
            };
            let clash = self
                .documents
                .iter()
                .enumerate()
                .filter(|(position, _)| Some(*position) != skip)
                .any(|(_, doc)| index.key(&doc.fields) == Some(key));
            if clash {
                return Err(duplicate(name, index));
            }
        }
        Ok(())
    }
}

fn duplicate(name: &str, index: &IndexSpec) -> StoreError {
    StoreError::DuplicateKey { collection: name.to_string(), field: index.field.clone() }
}

/// In-memory document store.
///
/// # Example
///
/// ```
/// use cofre::store::{Document, DocumentStore, DocumentUpdate, MemoryStore};
///
/// # tokio_test_block(async {
/// let store = MemoryStore::new();
/// store.insert("tools", Document::new("1").with_field("key", "conteos")).await?;
///
/// let mut update = DocumentUpdate::new();
/// update.set("label", "Conteos");
/// store.update("tools", "1", update).await?;
/// # Ok::<(), cofre::error::StoreError>(())
/// # }).unwrap();
/// # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
/// # }
/// ```
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a document, creating the collection if needed.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::DuplicateKey` if a unique index would be broken.
    pub async fn insert(&self, collection: &str, document: Document) -> Result<(), StoreError> {
        let mut collections = self.collections.write().await;
        collections.entry(collection.to_string()).or_default().insert(collection, document)
    }

    /// Returns a document by id.
    pub async fn get(&self, collection: &str, id: &str) -> Option<Document> {
        let collections = self.collections.read().await;
        collections.get(collection).and_then(|c| c.get(id)).cloned()
    }

    /// Returns every document of a collection, in insertion order.
    pub async fn documents(&self, collection: &str) -> Vec<Document> {
        let collections = self.collections.read().await;
        collections.get(collection).map(|c| c.documents().to_vec()).unwrap_or_default()
    }

    /// Returns the indexes declared on a collection.
    pub async fn indexes(&self, collection: &str) -> Vec<IndexSpec> {
        let collections = self.collections.read().await;
        collections.get(collection).map(|c| c.indexes().to_vec()).unwrap_or_default()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn open_cursor(&self, collection: &str) -> Result<Box<dyn DocumentCursor>, StoreError> {
        Ok(Box::new(SnapshotCursor::new(self.documents(collection).await)))
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        update: DocumentUpdate,
    ) -> Result<(), StoreError> {
        let mut collections = self.collections.write().await;
        collections
            .get_mut(collection)
            .ok_or_else(|| StoreError::CollectionNotFound(collection.to_string()))?
            .apply(collection, id, &update)
    }

    async fn ensure_index(&self, collection: &str, index: IndexSpec) -> Result<(), StoreError> {
        let mut collections = self.collections.write().await;
        collections.entry(collection.to_string()).or_default().add_index(collection, index)
    }
}
