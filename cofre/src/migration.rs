//! Re-encryption of whole collections.
//!
//! [`MigrationExecutor`] scans a collection, decodes every field its
//! [`CollectionSchema`] names (accepting envelopes, legacy plaintext, and
//! native legacy values alike), re-encodes everything under the current key,
//! regenerates blind indexes, and writes each document back with a single
//! set/unset update.
//!
//! Encryption is deterministic, so migrating already-migrated data writes
//! byte-identical values. A run can therefore be repeated from the start
//! after any failure.
//!
//! The cursor is read on one task; per-document work runs on a bounded pool
//! of tokio tasks with no ordering between documents.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::task::{JoinError, JoinSet};

use crate::blind_index::BlindIndex;
use crate::envelope::{FallbackReason, Opened};
use crate::error::Error;
use crate::field::{parse_boolean, parse_number, FieldCodec, StoredField};
use crate::key_manager::KeyManager;
use crate::schema::{CollectionSchema, FieldKind, FieldSpec, Plain};
use crate::store::{stored_from_value, Document, DocumentStore, DocumentUpdate};

/// Default number of documents processed concurrently.
pub const DEFAULT_CONCURRENCY: usize = 8;

/// Default number of scanned documents between progress log lines.
pub const DEFAULT_PROGRESS_INTERVAL: u64 = 1000;

/// What a run does when one document fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Stop scanning, let in-flight documents finish, and return the error.
    #[default]
    Abort,
    /// Record the failure in the report and keep going.
    Continue,
}

/// Tuning for a migration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationOptions {
    /// Documents processed concurrently (at least 1).
    pub concurrency: usize,
    /// Failure handling.
    pub failure_policy: FailurePolicy,
    /// Scanned documents between progress log lines (0 disables them).
    pub progress_interval: u64,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            failure_policy: FailurePolicy::default(),
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }
}

/// A document that could not be migrated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentFailure {
    /// Document id.
    pub id: String,
    /// Error description.
    pub error: String,
}

/// Outcome of migrating one collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Collection name.
    pub collection: String,
    /// Documents read from the cursor and handed to a worker.
    pub scanned: u64,
    /// Documents whose stored fields changed.
    pub rewritten: u64,
    /// Documents written back unchanged.
    pub already_current: u64,
    /// Non-empty values that were not envelopes.
    pub legacy_values: u64,
    /// Envelopes whose tag did not verify under the current key. These are
    /// carried over as opaque text, so a non-zero count usually means the
    /// wrong key is configured.
    pub unauthenticated: u64,
    /// Documents skipped under [`FailurePolicy::Continue`].
    pub failures: Vec<DocumentFailure>,
}

impl MigrationReport {
    fn new(collection: &str) -> Self {
        Self { collection: collection.to_string(), ..Self::default() }
    }

    /// Documents successfully written back.
    #[must_use]
    pub const fn updated(&self) -> u64 {
        self.rewritten + self.already_current
    }
}

/// The update planned for one document.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedUpdate {
    /// Set/unset operations to apply.
    pub update: DocumentUpdate,
    /// Non-empty values that were not envelopes.
    pub legacy_values: u64,
    /// Envelopes that failed authentication.
    pub unauthenticated: u64,
}

/// Decodes and re-encodes documents according to a schema.
///
/// This is the pure half of a migration; it never touches the store.
#[derive(Debug, Clone)]
pub struct Rewriter {
    fields: FieldCodec,
    index: BlindIndex,
}

struct DecodeContext<'a> {
    collection: &'a str,
    id: &'a str,
    legacy_values: u64,
    unauthenticated: u64,
}

impl Rewriter {
    /// Creates a rewriter over the given key material.
    #[must_use]
    pub fn new(keys: Arc<KeyManager>) -> Self {
        Self { fields: FieldCodec::new(Arc::clone(&keys)), index: BlindIndex::new(keys) }
    }

    /// Plans the update that brings `document` up to date with `schema`.
    ///
    /// Present values are set; empty or missing values without a default are
    /// unset together with their blind index; legacy aliases are unset.
    ///
    /// # Errors
    ///
    /// Returns an error if a value fails to encrypt or hash.
    pub fn plan(
        &self,
        schema: &CollectionSchema,
        document: &Document,
    ) -> Result<PlannedUpdate, Error> {
        let mut ctx = DecodeContext {
            collection: schema.name(),
            id: &document.id,
            legacy_values: 0,
            unauthenticated: 0,
        };
        let mut update = DocumentUpdate::new();

        for spec in schema.fields() {
            let plain = self.decode(spec, &document.fields, &mut ctx);

            match plain {
                Some(plain) => {
                    if let Some(index) = spec.index() {
                        let digest = match plain.search_text() {
                            Some(text) => self.index.hash_if_present(text)?,
                            None => None,
                        };
                        match digest {
                            Some(digest) => update.set(index.field.clone(), digest),
                            None => update.unset(index.field.clone()),
                        }
                    }
                    update.set(spec.name(), self.encode(&plain)?);
                }
                None => {
                    update.unset(spec.name());
                    if let Some(index) = spec.index() {
                        update.unset(index.field.clone());
                    }
                }
            }

            for alias in spec.aliases() {
                if document.fields.contains_key(alias) {
                    update.unset(alias.clone());
                }
            }
        }

        Ok(PlannedUpdate {
            update,
            legacy_values: ctx.legacy_values,
            unauthenticated: ctx.unauthenticated,
        })
    }

    fn decode(
        &self,
        spec: &FieldSpec,
        fields: &Map<String, Value>,
        ctx: &mut DecodeContext<'_>,
    ) -> Option<Plain> {
        let raw = read_field(spec, fields);
        self.decode_value(spec, raw, ctx).or_else(|| spec.default_value().cloned())
    }

    fn decode_value(
        &self,
        spec: &FieldSpec,
        raw: Option<&Value>,
        ctx: &mut DecodeContext<'_>,
    ) -> Option<Plain> {
        if let FieldKind::Records(members) = spec.kind() {
            return self.decode_records(spec, members, raw, ctx);
        }

        let stored = raw.map(stored_from_value).unwrap_or_default();
        match spec.kind() {
            FieldKind::String => {
                let text = match &stored {
                    StoredField::Scalar(value) => self.open(spec, value, ctx),
                    StoredField::List(values) => {
                        values.first().map(|v| self.open(spec, v, ctx)).unwrap_or_default()
                    }
                    StoredField::Absent => String::new(),
                };
                (!text.is_empty()).then_some(Plain::Text(text))
            }
            FieldKind::Number => match &stored {
                StoredField::Scalar(value) => {
                    parse_number(&self.open(spec, value, ctx)).map(Plain::Number)
                }
                _ => None,
            },
            FieldKind::Boolean => {
                let flag = match &stored {
                    StoredField::Scalar(value) => {
                        parse_boolean(&self.open(spec, value, ctx))
                    }
                    _ => false,
                };
                Some(Plain::Boolean(flag))
            }
            FieldKind::StringList => {
                let values: Vec<String> = match &stored {
                    StoredField::Absent => Vec::new(),
                    StoredField::Scalar(value) => vec![self.open(spec, value, ctx)],
                    StoredField::List(values) => {
                        values.iter().map(|v| self.open(spec, v, ctx)).collect()
                    }
                };
                (!values.is_empty()).then_some(Plain::List(values))
            }
            FieldKind::Records(_) => None,
        }
    }

    fn decode_records(
        &self,
        spec: &FieldSpec,
        members: &[FieldSpec],
        raw: Option<&Value>,
        ctx: &mut DecodeContext<'_>,
    ) -> Option<Plain> {
        let Some(Value::Array(items)) = raw else {
            return None;
        };

        let empty = Map::new();
        let records: Vec<BTreeMap<String, Plain>> = items
            .iter()
            .map(|item| {
                let fields = match item {
                    Value::Object(fields) => fields,
                    _ => &empty,
                };
                members
                    .iter()
                    .filter_map(|member| {
                        self.decode(member, fields, ctx).map(|plain| (member.name().to_string(), plain))
                    })
                    .collect()
            })
            .collect();

        if records.is_empty() {
            tracing::trace!(field = spec.name(), "empty record list");
            return None;
        }
        Some(Plain::Records(records))
    }

    fn open(&self, spec: &FieldSpec, value: &str, ctx: &mut DecodeContext<'_>) -> String {
        let opened = self.fields.open_string(value);
        match &opened {
            Opened::Plain { reason: FallbackReason::Unauthenticated, .. } => {
                ctx.unauthenticated += 1;
                tracing::warn!(
                    collection = ctx.collection,
                    id = ctx.id,
                    field = spec.name(),
                    "envelope failed authentication; carrying it over as text"
                );
            }
            opened if opened.is_legacy() => {
                ctx.legacy_values += 1;
                tracing::debug!(
                    collection = ctx.collection,
                    id = ctx.id,
                    field = spec.name(),
                    "legacy value found"
                );
            }
            _ => {}
        }
        opened.into_value()
    }

    fn encode(&self, plain: &Plain) -> Result<Value, Error> {
        Ok(match plain {
            Plain::Text(text) => Value::String(self.fields.encrypt_string(text)?),
            Plain::Number(n) => Value::String(self.fields.encrypt_number(*n)?),
            Plain::Boolean(flag) => Value::String(self.fields.encrypt_boolean(*flag)?),
            Plain::List(values) => Value::Array(
                self.fields.encrypt_string_array(values)?.into_iter().map(Value::String).collect(),
            ),
            Plain::Records(records) => Value::Array(
                records
                    .iter()
                    .map(|record| {
                        record
                            .iter()
                            .map(|(name, plain)| Ok((name.clone(), self.encode(plain)?)))
                            .collect::<Result<Map<String, Value>, Error>>()
                            .map(Value::Object)
                    })
                    .collect::<Result<Vec<Value>, Error>>()?,
            ),
        })
    }
}

fn read_field<'a>(spec: &FieldSpec, fields: &'a Map<String, Value>) -> Option<&'a Value> {
    std::iter::once(spec.name())
        .chain(spec.aliases().iter().map(String::as_str))
        .filter_map(|name| fields.get(name))
        .find(|value| !value.is_null())
}

struct DocumentOutcome {
    changed: bool,
    legacy_values: u64,
    unauthenticated: u64,
}

/// Drives a collection-wide re-encryption against a [`DocumentStore`].
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use cofre::key_manager::KeyManager;
/// use cofre::migration::MigrationExecutor;
/// use cofre::schema::builtin;
/// use cofre::store::{Document, MemoryStore};
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let store = Arc::new(MemoryStore::new());
/// store.insert("tools", Document::new("1").with_field("key", "conteos")).await.unwrap();
///
/// let keys = Arc::new(KeyManager::from_bytes(&[0u8; 32]).unwrap());
/// let executor = MigrationExecutor::new(Arc::clone(&store), keys);
///
/// let report = executor.run(&builtin::tools()).await.unwrap();
/// assert_eq!(report.scanned, 1);
/// assert_eq!(report.legacy_values, 1);
/// # });
/// ```
pub struct MigrationExecutor<S: ?Sized> {
    store: Arc<S>,
    rewriter: Rewriter,
    options: MigrationOptions,
}

impl<S: DocumentStore + ?Sized + 'static> MigrationExecutor<S> {
    /// Creates an executor with default options.
    #[must_use]
    pub fn new(store: Arc<S>, keys: Arc<KeyManager>) -> Self {
        Self { store, rewriter: Rewriter::new(keys), options: MigrationOptions::default() }
    }

    /// Replaces the run options.
    #[must_use]
    pub const fn with_options(mut self, options: MigrationOptions) -> Self {
        self.options = options;
        self
    }

    /// Returns the run options.
    #[must_use]
    pub const fn options(&self) -> &MigrationOptions {
        &self.options
    }

    /// Returns the document rewriter.
    #[must_use]
    pub const fn rewriter(&self) -> &Rewriter {
        &self.rewriter
    }

    /// Creates the blind-index indexes `schema` declares.
    ///
    /// # Errors
    ///
    /// Returns `Error::Store` if the store rejects an index.
    pub async fn ensure_indexes(&self, schema: &CollectionSchema) -> Result<(), Error> {
        for index in schema.indexes() {
            tracing::info!(
                collection = schema.name(),
                field = %index.field,
                unique = index.unique,
                sparse = index.sparse,
                "ensuring blind index"
            );
            self.store.ensure_index(schema.name(), index).await?;
        }
        Ok(())
    }

    /// Migrates every document of `schema`'s collection.
    ///
    /// # Errors
    ///
    /// Under [`FailurePolicy::Abort`], returns the first document error after
    /// in-flight documents finish. Cursor errors and worker panics always
    /// abort.
    pub async fn run(&self, schema: &CollectionSchema) -> Result<MigrationReport, Error> {
        let (report, abort) = self.scan(schema).await;

        if let Some(err) = abort {
            tracing::error!(
                collection = %report.collection,
                scanned = report.scanned,
                updated = report.updated(),
                error = %err,
                "migration aborted"
            );
            return Err(err);
        }

        if report.unauthenticated > 0 {
            tracing::warn!(
                collection = %report.collection,
                unauthenticated = report.unauthenticated,
                "envelopes failed authentication; check the configured key"
            );
        }
        tracing::info!(
            collection = %report.collection,
            scanned = report.scanned,
            rewritten = report.rewritten,
            already_current = report.already_current,
            legacy_values = report.legacy_values,
            unauthenticated = report.unauthenticated,
            failures = report.failures.len(),
            "migration complete"
        );
        Ok(report)
    }

    async fn scan(&self, schema: &CollectionSchema) -> (MigrationReport, Option<Error>) {
        let schema = Arc::new(schema.clone());
        let collection = schema.name().to_string();
        let concurrency = self.options.concurrency.max(1);

        tracing::info!(collection = %collection, concurrency, "starting migration");

        let mut report = MigrationReport::new(&collection);
        let mut abort: Option<Error> = None;
        let mut workers: JoinSet<(String, Result<DocumentOutcome, Error>)> = JoinSet::new();
        let mut cursor = match self.store.open_cursor(&collection).await {
            Ok(cursor) => cursor,
            Err(err) => return (report, Some(err.into())),
        };

        while abort.is_none() {
            let document = match cursor.next().await {
                Ok(Some(document)) => document,
                Ok(None) => break,
                Err(err) => {
                    abort = Some(err.into());
                    break;
                }
            };
            while workers.len() >= concurrency {
                if let Some(joined) = workers.join_next().await {
                    self.settle(joined, &mut report, &mut abort);
                }
            }
            if abort.is_some() {
                break;
            }
            report.scanned += 1;

            let store = Arc::clone(&self.store);
            let rewriter = self.rewriter.clone();
            let schema = Arc::clone(&schema);
            workers.spawn(async move {
                let id = document.id.clone();
                let outcome = migrate_document(store.as_ref(), &rewriter, &schema, document).await;
                (id, outcome)
            });

            if self.options.progress_interval > 0
                && report.scanned % self.options.progress_interval == 0
            {
                tracing::info!(collection = %collection, scanned = report.scanned, "migration progress");
            }
        }

        while let Some(joined) = workers.join_next().await {
            self.settle(joined, &mut report, &mut abort);
        }

        (report, abort)
    }

    /// Migrates several collections in order, stopping at the first abort.
    ///
    /// # Errors
    ///
    /// Returns the error of the first collection run that aborts.
    pub async fn run_all(&self, schemas: &[CollectionSchema]) -> Result<Vec<MigrationReport>, Error> {
        let mut reports = Vec::with_capacity(schemas.len());
        for schema in schemas {
            reports.push(self.run(schema).await?);
        }
        Ok(reports)
    }

    fn settle(
        &self,
        joined: Result<(String, Result<DocumentOutcome, Error>), JoinError>,
        report: &mut MigrationReport,
        abort: &mut Option<Error>,
    ) {
        match joined {
            Ok((_, Ok(outcome))) => {
                if outcome.changed {
                    report.rewritten += 1;
                } else {
                    report.already_current += 1;
                }
                report.legacy_values += outcome.legacy_values;
                report.unauthenticated += outcome.unauthenticated;
            }
            Ok((id, Err(err))) => match self.options.failure_policy {
                FailurePolicy::Continue => {
                    tracing::warn!(collection = %report.collection, id = %id, error = %err, "document migration failed");
                    report.failures.push(DocumentFailure { id, error: err.to_string() });
                }
                FailurePolicy::Abort => {
                    if abort.is_none() {
                        *abort = Some(err);
                    }
                }
            },
            Err(err) => {
                if abort.is_none() {
                    *abort = Some(Error::Worker(err.to_string()));
                }
            }
        }
    }
}

async fn migrate_document<S: DocumentStore + ?Sized>(
    store: &S,
    rewriter: &Rewriter,
    schema: &CollectionSchema,
    document: Document,
) -> Result<DocumentOutcome, Error> {
    let planned = rewriter.plan(schema, &document)?;
    let changed = !planned.update.is_noop_for(&document);
    store.update(schema.name(), &document.id, planned.update).await?;
    Ok(DocumentOutcome {
        changed,
        legacy_values: planned.legacy_values,
        unauthenticated: planned.unauthenticated,
    })
}
