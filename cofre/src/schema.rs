//! Declarative field plans for encrypted collections.
//!
//! A [`CollectionSchema`] lists every encrypted field of one collection: its
//! logical type, the blind-index field that shadows it (if any), what to do
//! when it is missing, and older names it may still be stored under. The
//! migration executor walks these plans; request handlers can use the same
//! plans to know which index field to query.

use std::collections::BTreeMap;

use crate::store::IndexSpec;

/// Logical type of an encrypted field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    /// A single string.
    String,
    /// A number stored in canonical decimal form.
    Number,
    /// A boolean stored as `"true"`/`"false"`.
    Boolean,
    /// An ordered list of strings, encrypted element by element.
    StringList,
    /// An ordered list of records whose members are themselves encrypted.
    Records(Vec<FieldSpec>),
}

/// A decoded field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Plain {
    /// String value.
    Text(String),
    /// Numeric value.
    Number(f64),
    /// Boolean value.
    Boolean(bool),
    /// String list.
    List(Vec<String>),
    /// Record list, members keyed by field name.
    Records(Vec<BTreeMap<String, Plain>>),
}

impl Plain {
    /// Returns the text to index, for text values.
    #[must_use]
    pub fn search_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }
}

/// Plan for one encrypted field.
///
/// # Example
///
/// ```
/// use cofre::schema::FieldSpec;
/// use cofre::store::IndexSpec;
///
/// let barcode = FieldSpec::string("codigoBarras")
///     .with_index(IndexSpec::unique_sparse("codigoBarrasHash"))
///     .with_alias("codigo_barras");
///
/// assert_eq!(barcode.name(), "codigoBarras");
/// assert_eq!(barcode.aliases(), ["codigo_barras"]);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    name: String,
    kind: FieldKind,
    index: Option<IndexSpec>,
    default: Option<Plain>,
    aliases: Vec<String>,
}

impl FieldSpec {
    /// Creates a plan for a field of the given kind.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self { name: name.into(), kind, index: None, default: None, aliases: Vec::new() }
    }

    /// A string field.
    #[must_use]
    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::String)
    }

    /// A numeric field.
    #[must_use]
    pub fn number(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Number)
    }

    /// A boolean field.
    #[must_use]
    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Boolean)
    }

    /// A string list field.
    #[must_use]
    pub fn string_list(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::StringList)
    }

    /// A list of records with the given member plans.
    #[must_use]
    pub fn records(name: impl Into<String>, members: Vec<Self>) -> Self {
        Self::new(name, FieldKind::Records(members))
    }

    /// Shadows the field with a blind index. Only string fields are indexed.
    #[must_use]
    pub fn with_index(mut self, index: IndexSpec) -> Self {
        self.index = Some(index);
        self
    }

    /// Value written when the field is missing or empty, instead of unsetting it.
    #[must_use]
    pub fn with_default(mut self, value: Plain) -> Self {
        self.default = Some(value);
        self
    }

    /// Older name the field may still be stored under.
    #[must_use]
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    /// Returns the field name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the field kind.
    #[must_use]
    pub const fn kind(&self) -> &FieldKind {
        &self.kind
    }

    /// Returns the blind index shadowing this field.
    #[must_use]
    pub const fn index(&self) -> Option<&IndexSpec> {
        self.index.as_ref()
    }

    /// Returns the default written for missing values.
    #[must_use]
    pub const fn default_value(&self) -> Option<&Plain> {
        self.default.as_ref()
    }

    /// Returns the legacy names.
    #[must_use]
    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }
}

/// Field plans for one collection.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionSchema {
    name: String,
    fields: Vec<FieldSpec>,
}

impl CollectionSchema {
    /// Creates an empty schema.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), fields: Vec::new() }
    }

    /// Adds a field plan.
    #[must_use]
    pub fn with_field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    /// Returns the collection name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the field plans in declaration order.
    #[must_use]
    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Returns the field plan with the given name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|field| field.name == name)
    }

    /// Returns the blind-index indexes the collection needs.
    #[must_use]
    pub fn indexes(&self) -> Vec<IndexSpec> {
        self.fields.iter().filter_map(|field| field.index.clone()).collect()
    }
}

/// Schemas of the dashboard collections.
pub mod builtin {
    use super::{CollectionSchema, FieldSpec, Plain};
    use crate::store::IndexSpec;

    /// Collection names with a built-in schema.
    pub const NAMES: [&str; 4] = ["users", "tools", "store_items", "cash_cuts"];

    /// Dashboard accounts.
    #[must_use]
    pub fn users() -> CollectionSchema {
        CollectionSchema::new("users")
            .with_field(FieldSpec::string("username").with_index(IndexSpec::unique("usernameHash")))
            .with_field(FieldSpec::string("role").with_index(IndexSpec::lookup("roleHash")))
            .with_field(FieldSpec::string("passwordHash"))
            .with_field(FieldSpec::string("passwordSalt"))
    }

    /// Tool registry.
    #[must_use]
    pub fn tools() -> CollectionSchema {
        CollectionSchema::new("tools")
            .with_field(FieldSpec::string("key").with_index(IndexSpec::unique("keyHash")))
            .with_field(FieldSpec::string("label"))
            .with_field(FieldSpec::string("description"))
    }

    /// Inventory items.
    #[must_use]
    pub fn store_items() -> CollectionSchema {
        CollectionSchema::new("store_items")
            .with_field(FieldSpec::string("nombre").with_index(IndexSpec::lookup("nombreHash")))
            .with_field(FieldSpec::string_list("familias"))
            .with_field(
                FieldSpec::string("alfanumerico")
                    .with_index(IndexSpec::unique_sparse("alfanumericoHash")),
            )
            .with_field(
                FieldSpec::string("codigoBarras")
                    .with_index(IndexSpec::unique_sparse("codigoBarrasHash"))
                    .with_alias("codigo_barras"),
            )
            .with_field(FieldSpec::number("precio"))
    }

    /// Cash register cuts.
    #[must_use]
    pub fn cash_cuts() -> CollectionSchema {
        let zero = || Plain::Number(0.0);
        CollectionSchema::new("cash_cuts")
            .with_field(FieldSpec::string("username").with_index(IndexSpec::lookup("usernameHash")))
            .with_field(FieldSpec::number("corteTeorico").with_default(zero()))
            .with_field(FieldSpec::number("corteReal").with_default(zero()))
            .with_field(FieldSpec::number("diferencia").with_default(zero()))
            .with_field(FieldSpec::number("depositado").with_default(zero()))
            .with_field(FieldSpec::number("pico").with_default(zero()))
            .with_field(FieldSpec::records(
                "pendientes",
                vec![FieldSpec::string("text"), FieldSpec::boolean("done")],
            ))
            .with_field(FieldSpec::boolean("fondoValidado"))
            .with_field(FieldSpec::number("fondoCantidad"))
    }

    /// Every built-in schema.
    #[must_use]
    pub fn all() -> Vec<CollectionSchema> {
        vec![users(), tools(), store_items(), cash_cuts()]
    }

    /// Looks up a built-in schema by collection name.
    #[must_use]
    pub fn by_name(name: &str) -> Option<CollectionSchema> {
        all().into_iter().find(|schema| schema.name() == name)
    }
}
