//! JSON file document store for `Cofre`.
//!
//! This store keeps each collection in a pair of files and is suitable for
//! fixtures, exports, and small datasets.
//!
//! Every insert or update rewrites the whole documents file while holding the
//! store's write lock. Migrating `n` documents therefore costs O(n²) I/O, and
//! updates are applied one at a time whatever the migration's concurrency.
//! The index file is only rewritten when an index is added.

#![warn(clippy::pedantic, clippy::nursery)]

use async_trait::async_trait;
use cofre::error::StoreError;
use cofre::store::{
    Collection, Document, DocumentCursor, DocumentStore, DocumentUpdate, IndexSpec, SnapshotCursor,
};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

const DOCUMENTS_EXT: &str = "json";
const INDEXES_SUFFIX: &str = ".indexes.json";

/// Directory-backed document store.
///
/// Collections are stored with the following structure:
/// ```text
/// data/
/// ├── users.json               (array of documents, `_id` + fields)
/// ├── users.indexes.json       (array of index declarations)
/// ├── store_items.json
/// └── store_items.indexes.json
/// ```
///
/// Collections are loaded lazily on first use and cached. Files are replaced
/// atomically by writing a temporary file and renaming it into place.
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
    collections: RwLock<HashMap<String, Collection>>,
}

impl FileStore {
    /// Opens a store over an existing directory.
    ///
    /// # Errors
    ///
    /// Returns error if the directory doesn't exist.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        if !dir.is_dir() {
            return Err(StoreError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("store directory does not exist: {}", dir.display()),
            )));
        }
        Ok(Self { dir, collections: RwLock::new(HashMap::new()) })
    }

    /// Creates the directory if needed and opens a store over it.
    ///
    /// # Errors
    ///
    /// Returns error if the directory cannot be created.
    pub async fn create(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Self::open(dir)
    }

    /// Returns the store directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Inserts a document, creating the collection if needed.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::DuplicateKey` if a unique index would be broken,
    /// or an I/O error if the collection cannot be read or written.
    pub async fn insert(&self, collection: &str, document: Document) -> Result<(), StoreError> {
        let mut collections = self.collections.write().await;
        let Some(current) = self.resolve(&mut collections, collection, true).await? else {
            return Err(StoreError::CollectionNotFound(collection.to_string()));
        };

        let mut next = current.clone();
        next.insert(collection, document)?;
        self.persist_documents(collection, &next).await?;
        *current = next;
        Ok(())
    }

    /// Returns every document of a collection, in file order.
    ///
    /// # Errors
    ///
    /// Returns an error if the collection file cannot be read.
    pub async fn documents(&self, collection: &str) -> Result<Vec<Document>, StoreError> {
        let mut collections = self.collections.write().await;
        Ok(self
            .resolve(&mut collections, collection, false)
            .await?
            .map(|c| c.documents().to_vec())
            .unwrap_or_default())
    }

    /// Returns the indexes declared on a collection.
    ///
    /// # Errors
    ///
    /// Returns an error if the index file cannot be read.
    pub async fn indexes(&self, collection: &str) -> Result<Vec<IndexSpec>, StoreError> {
        let mut collections = self.collections.write().await;
        Ok(self
            .resolve(&mut collections, collection, false)
            .await?
            .map(|c| c.indexes().to_vec())
            .unwrap_or_default())
    }

    async fn resolve<'a>(
        &self,
        collections: &'a mut HashMap<String, Collection>,
        collection: &str,
        create: bool,
    ) -> Result<Option<&'a mut Collection>, StoreError> {
        if !collections.contains_key(collection) {
            match self.load(collection).await? {
                Some(loaded) => {
                    collections.insert(collection.to_string(), loaded);
                }
                None if create => {
                    collections.insert(collection.to_string(), Collection::default());
                }
                None => return Ok(None),
            }
        }
        Ok(collections.get_mut(collection))
    }

    async fn load(&self, collection: &str) -> Result<Option<Collection>, StoreError> {
        let (documents_path, indexes_path) = self.paths(collection)?;

        let documents: Vec<Document> = match read_json(&documents_path).await? {
            Some(documents) => documents,
            None => return Ok(None),
        };
        let indexes: Vec<IndexSpec> = read_json(&indexes_path).await?.unwrap_or_default();

        tracing::debug!(
            collection,
            documents = documents.len(),
            indexes = indexes.len(),
            "loaded collection"
        );
        Ok(Some(Collection::from_parts(documents, indexes)))
    }

    async fn persist_documents(&self, collection: &str, data: &Collection) -> Result<(), StoreError> {
        let (documents_path, _) = self.paths(collection)?;
        write_json(&documents_path, data.documents()).await
    }

    async fn persist_indexes(&self, collection: &str, data: &Collection) -> Result<(), StoreError> {
        let (_, indexes_path) = self.paths(collection)?;
        write_json(&indexes_path, data.indexes()).await
    }

    fn paths(&self, collection: &str) -> Result<(PathBuf, PathBuf), StoreError> {
        let valid = !collection.is_empty()
            && collection.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(StoreError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid collection name: {collection:?}"),
            )));
        }
        Ok((
            self.dir.join(format!("{collection}.{DOCUMENTS_EXT}")),
            self.dir.join(format!("{collection}{INDEXES_SUFFIX}")),
        ))
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

async fn write_json<T: serde::Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[async_trait]
impl DocumentStore for FileStore {
    async fn open_cursor(&self, collection: &str) -> Result<Box<dyn DocumentCursor>, StoreError> {
        Ok(Box::new(SnapshotCursor::new(self.documents(collection).await?)))
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        update: DocumentUpdate,
    ) -> Result<(), StoreError> {
        let mut collections = self.collections.write().await;
        let Some(current) = self.resolve(&mut collections, collection, false).await? else {
            return Err(StoreError::CollectionNotFound(collection.to_string()));
        };

        let mut next = current.clone();
        next.apply(collection, id, &update)?;
        self.persist_documents(collection, &next).await?;
        *current = next;
        Ok(())
    }

    async fn ensure_index(&self, collection: &str, index: IndexSpec) -> Result<(), StoreError> {
        let mut collections = self.collections.write().await;
        let Some(current) = self.resolve(&mut collections, collection, true).await? else {
            return Err(StoreError::CollectionNotFound(collection.to_string()));
        };

        if current.indexes().contains(&index) {
            return Ok(());
        }
        let mut next = current.clone();
        next.add_index(collection, index)?;
        // The documents file marks the collection as existing.
        self.persist_documents(collection, &next).await?;
        self.persist_indexes(collection, &next).await?;
        *current = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cofre::key_manager::KeyManager;
    use cofre::migration::MigrationExecutor;
    use cofre::schema::builtin;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn create_test_store() -> (TempDir, FileStore) {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn test_open_missing_directory() {
        let dir = TempDir::new().unwrap();
        let result = FileStore::open(dir.path().join("missing"));
        assert!(matches!(result, Err(StoreError::Io(_))));
    }

    #[tokio::test]
    async fn test_create_makes_directory() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::create(dir.path().join("nested/data")).await.unwrap();
        assert!(store.dir().is_dir());
    }

    #[tokio::test]
    async fn test_insert_persists_across_reopen() {
        let (dir, store) = create_test_store();
        store.insert("tools", Document::new("1").with_field("key", "cortes")).await.unwrap();
        store.ensure_index("tools", IndexSpec::unique("keyHash")).await.unwrap();

        let reopened = FileStore::open(dir.path()).unwrap();
        let documents = reopened.documents("tools").await.unwrap();
        assert_eq!(documents, [Document::new("1").with_field("key", "cortes")]);
        assert_eq!(reopened.indexes("tools").await.unwrap(), [IndexSpec::unique("keyHash")]);
    }

    #[tokio::test]
    async fn test_file_layout() {
        let (dir, store) = create_test_store();
        store.insert("users", Document::new("u1").with_field("role", "admin")).await.unwrap();

        let raw = std::fs::read(dir.path().join("users.json")).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(value, json!([{"_id": "u1", "role": "admin"}]));
        assert!(!dir.path().join("users.indexes.json").exists());
        assert!(!dir.path().join("users.tmp").exists());

        store.ensure_index("users", IndexSpec::unique("usernameHash")).await.unwrap();
        assert!(dir.path().join("users.indexes.json").exists());
    }

    #[tokio::test]
    async fn test_update_leaves_index_file_alone() {
        let (dir, store) = create_test_store();
        store.ensure_index("tools", IndexSpec::unique("keyHash")).await.unwrap();
        store.insert("tools", Document::new("1").with_field("keyHash", "a")).await.unwrap();

        // Rewrite the index file in compact form; an update must not touch it.
        let indexes_path = dir.path().join("tools.indexes.json");
        let compact = serde_json::to_vec(&[IndexSpec::unique("keyHash")]).unwrap();
        std::fs::write(&indexes_path, &compact).unwrap();

        let mut update = DocumentUpdate::new();
        update.set("label", "Cortes");
        store.update("tools", "1", update).await.unwrap();

        assert_eq!(std::fs::read(&indexes_path).unwrap(), compact);
        let reopened = FileStore::open(dir.path()).unwrap();
        assert_eq!(reopened.indexes("tools").await.unwrap(), [IndexSpec::unique("keyHash")]);
    }

    #[tokio::test]
    async fn test_missing_collection() {
        let (_dir, store) = create_test_store();
        let mut cursor = store.open_cursor("tools").await.unwrap();
        assert!(cursor.next().await.unwrap().is_none());

        let result = store.update("tools", "1", DocumentUpdate::new()).await;
        assert!(matches!(result, Err(StoreError::CollectionNotFound(_))));
    }

    #[tokio::test]
    async fn test_invalid_collection_name() {
        let (_dir, store) = create_test_store();
        let result = store.insert("../escape", Document::new("1")).await;
        assert!(matches!(result, Err(StoreError::Io(_))));
    }

    #[tokio::test]
    async fn test_rejected_update_is_not_written() {
        let (dir, store) = create_test_store();
        store.ensure_index("tools", IndexSpec::unique_sparse("keyHash")).await.unwrap();
        store.insert("tools", Document::new("1").with_field("keyHash", "a")).await.unwrap();
        store.insert("tools", Document::new("2").with_field("keyHash", "b")).await.unwrap();

        let mut update = DocumentUpdate::new();
        update.set("keyHash", "a");
        let result = store.update("tools", "2", update).await;
        assert!(matches!(result, Err(StoreError::DuplicateKey { .. })));

        let reopened = FileStore::open(dir.path()).unwrap();
        let documents = reopened.documents("tools").await.unwrap();
        assert_eq!(documents[1].get("keyHash"), Some(&json!("b")));
    }

    #[tokio::test]
    async fn test_corrupt_collection_file() {
        let (dir, store) = create_test_store();
        std::fs::write(dir.path().join("tools.json"), b"{not json").unwrap();
        let result = store.documents("tools").await;
        assert!(matches!(result, Err(StoreError::Serialization(_))));
    }

    #[tokio::test]
    async fn test_migration_over_files_is_idempotent() {
        let (dir, store) = create_test_store();
        store
            .insert(
                "store_items",
                Document::new("i1")
                    .with_field("nombre", "Tecate 355")
                    .with_field("codigo_barras", "7501064191343")
                    .with_field("precio", 22.5),
            )
            .await
            .unwrap();

        let keys = Arc::new(KeyManager::from_bytes(&[7u8; 32]).unwrap());
        let executor = MigrationExecutor::new(Arc::new(store), Arc::clone(&keys));
        let schema = builtin::store_items();

        let first = executor.run(&schema).await.unwrap();
        executor.ensure_indexes(&schema).await.unwrap();
        let after_first = std::fs::read(dir.path().join("store_items.json")).unwrap();

        let second = executor.run(&schema).await.unwrap();
        let after_second = std::fs::read(dir.path().join("store_items.json")).unwrap();

        assert_eq!(first.rewritten, 1);
        assert_eq!(second.already_current, 1);
        assert_eq!(after_first, after_second);

        let migrated = FileStore::open(dir.path()).unwrap().documents("store_items").await.unwrap();
        assert!(!migrated[0].has("codigo_barras"));
        assert!(migrated[0].has("codigoBarrasHash"));
    }
}
