//! Typed field encoding on top of [`EnvelopeCodec`].
//!
//! Numbers are stored as their canonical decimal string, booleans as
//! `"true"`/`"false"`, and string lists element by element. Decoding accepts
//! the shapes older documents may still hold, described by [`StoredField`].

use std::sync::Arc;

use crate::envelope::{EnvelopeCodec, Opened};
use crate::error::Error;
use crate::key_manager::KeyManager;

/// The shape a field was found in, as read from a document.
///
/// Native legacy values (a bare number or boolean) are represented by their
/// string form so they decode through the same path as envelopes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StoredField {
    /// Field missing or null.
    #[default]
    Absent,
    /// A single stored string.
    Scalar(String),
    /// A list of stored strings.
    List(Vec<String>),
}

impl StoredField {
    /// Returns true if the field is missing.
    #[must_use]
    pub const fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }
}

impl From<&str> for StoredField {
    fn from(value: &str) -> Self {
        Self::Scalar(value.to_string())
    }
}

impl From<String> for StoredField {
    fn from(value: String) -> Self {
        Self::Scalar(value)
    }
}

impl From<Vec<String>> for StoredField {
    fn from(values: Vec<String>) -> Self {
        Self::List(values)
    }
}

impl<T: Into<Self>> From<Option<T>> for StoredField {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Absent, Into::into)
    }
}

/// Canonical decimal form used for stored numbers.
///
/// This is the shortest string that parses back to the same `f64`, written
/// without an exponent. Negative zero is written as `"0"`. Non-finite values
/// have no canonical form.
#[must_use]
pub fn canonical_decimal(value: f64) -> Option<String> {
    if !value.is_finite() {
        return None;
    }
    if value == 0.0 {
        return Some("0".to_string());
    }
    Some(value.to_string())
}

/// Encodes and decodes typed document fields.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use cofre::field::FieldCodec;
/// use cofre::key_manager::KeyManager;
///
/// let codec = FieldCodec::new(Arc::new(KeyManager::from_bytes(&[0u8; 32]).unwrap()));
///
/// let price = codec.encrypt_number(12.5).unwrap();
/// assert_eq!(codec.decrypt_number(&price), Some(12.5));
///
/// let tags = codec.encrypt_string_array(&["a", "B"]).unwrap();
/// assert_eq!(codec.decrypt_string_array(&tags.into()), vec!["a", "B"]);
/// ```
#[derive(Debug, Clone)]
pub struct FieldCodec {
    envelope: EnvelopeCodec,
}

impl FieldCodec {
    /// Creates a field codec over the given key material.
    #[must_use]
    pub const fn new(keys: Arc<KeyManager>) -> Self {
        Self { envelope: EnvelopeCodec::new(keys) }
    }

    /// Returns the underlying envelope codec.
    #[must_use]
    pub const fn envelope(&self) -> &EnvelopeCodec {
        &self.envelope
    }

    /// Encrypts a string. Empty strings stay empty.
    ///
    /// # Errors
    ///
    /// Returns `Error::EncryptionFailed` if encryption fails.
    pub fn encrypt_string(&self, value: &str) -> Result<String, Error> {
        self.envelope.encrypt(value.as_bytes())
    }

    /// Decrypts a string, passing non-envelopes through unchanged.
    #[must_use]
    pub fn decrypt_string(&self, value: &str) -> String {
        self.envelope.decrypt(value)
    }

    /// Opens a string, reporting whether it was decrypted or passed through.
    #[must_use]
    pub fn open_string(&self, value: &str) -> Opened {
        self.envelope.open(value)
    }

    /// Decrypts a field of any stored shape as a single string.
    ///
    /// A list yields its first element; an absent field yields `""`.
    #[must_use]
    pub fn decrypt_string_field(&self, stored: &StoredField) -> String {
        match stored {
            StoredField::Absent => String::new(),
            StoredField::Scalar(value) => self.decrypt_string(value),
            StoredField::List(values) => {
                values.first().map(|value| self.decrypt_string(value)).unwrap_or_default()
            }
        }
    }

    /// Encrypts a number in its [`canonical_decimal`] form.
    ///
    /// Non-finite numbers encode as `""`, which reads back as absent.
    ///
    /// # Errors
    ///
    /// Returns `Error::EncryptionFailed` if encryption fails.
    pub fn encrypt_number(&self, value: f64) -> Result<String, Error> {
        canonical_decimal(value).map_or_else(|| Ok(String::new()), |s| self.encrypt_string(&s))
    }

    /// Decrypts a number.
    ///
    /// Returns `None` when the plaintext is empty, does not parse, or is not
    /// finite. Callers treat `None` as an absent field.
    #[must_use]
    pub fn decrypt_number(&self, value: &str) -> Option<f64> {
        parse_number(&self.decrypt_string(value))
    }

    /// Decrypts a number from any stored shape. Lists never hold a number.
    #[must_use]
    pub fn decrypt_number_field(&self, stored: &StoredField) -> Option<f64> {
        match stored {
            StoredField::Scalar(value) => self.decrypt_number(value),
            StoredField::Absent | StoredField::List(_) => None,
        }
    }

    /// Encrypts a boolean as `"true"` or `"false"`.
    ///
    /// # Errors
    ///
    /// Returns `Error::EncryptionFailed` if encryption fails.
    pub fn encrypt_boolean(&self, value: bool) -> Result<String, Error> {
        self.encrypt_string(if value { "true" } else { "false" })
    }

    /// Decrypts a boolean. Anything other than `"true"` is `false`.
    #[must_use]
    pub fn decrypt_boolean(&self, value: &str) -> bool {
        parse_boolean(&self.decrypt_string(value))
    }

    /// Decrypts a boolean from any stored shape.
    #[must_use]
    pub fn decrypt_boolean_field(&self, stored: &StoredField) -> bool {
        match stored {
            StoredField::Scalar(value) => self.decrypt_boolean(value),
            StoredField::Absent | StoredField::List(_) => false,
        }
    }

    /// Encrypts each element, preserving order.
    ///
    /// # Errors
    ///
    /// Returns `Error::EncryptionFailed` if any element fails to encrypt.
    pub fn encrypt_string_array<S: AsRef<str>>(&self, values: &[S]) -> Result<Vec<String>, Error> {
        values.iter().map(|value| self.encrypt_string(value.as_ref())).collect()
    }

    /// Decrypts a string list.
    ///
    /// A scalar is read as a one-element list, for documents written before
    /// the field became a list. An absent field is an empty list.
    #[must_use]
    pub fn decrypt_string_array(&self, stored: &StoredField) -> Vec<String> {
        match stored {
            StoredField::Absent => Vec::new(),
            StoredField::Scalar(value) => vec![self.decrypt_string(value)],
            StoredField::List(values) => {
                values.iter().map(|value| self.decrypt_string(value)).collect()
            }
        }
    }
}

/// Parses a decrypted number. Empty, unparseable, or non-finite text is `None`.
#[must_use]
pub fn parse_number(plain: &str) -> Option<f64> {
    let trimmed = plain.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Parses a decrypted boolean. Only `"true"` is true.
#[must_use]
pub fn parse_boolean(plain: &str) -> bool {
    plain == "true"
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_codec() -> FieldCodec {
        FieldCodec::new(Arc::new(KeyManager::from_bytes(&[0u8; 32]).unwrap()))
    }

    #[test]
    fn test_string_round_trip() {
        let codec = create_test_codec();
        let sealed = codec.encrypt_string("Cerveza Clara").unwrap();
        assert!(sealed.starts_with("v1:"));
        assert_eq!(codec.decrypt_string(&sealed), "Cerveza Clara");
    }

    #[test]
    fn test_unicode_string_round_trip() {
        let codec = create_test_codec();
        let sealed = codec.encrypt_string("Año: café ☕").unwrap();
        assert_eq!(codec.decrypt_string(&sealed), "Año: café ☕");
    }

    #[test]
    fn test_string_field_shapes() {
        let codec = create_test_codec();
        let sealed = codec.encrypt_string("alice").unwrap();

        assert_eq!(codec.decrypt_string_field(&StoredField::Absent), "");
        assert_eq!(codec.decrypt_string_field(&sealed.clone().into()), "alice");
        assert_eq!(codec.decrypt_string_field(&StoredField::List(vec![sealed])), "alice");
    }

    #[test]
    fn test_canonical_decimal() {
        assert_eq!(canonical_decimal(12.5).as_deref(), Some("12.5"));
        assert_eq!(canonical_decimal(3.0).as_deref(), Some("3"));
        assert_eq!(canonical_decimal(0.0).as_deref(), Some("0"));
        assert_eq!(canonical_decimal(-0.0).as_deref(), Some("0"));
        assert_eq!(canonical_decimal(-7.25).as_deref(), Some("-7.25"));
        assert_eq!(canonical_decimal(0.1).as_deref(), Some("0.1"));
        assert_eq!(canonical_decimal(f64::NAN), None);
        assert_eq!(canonical_decimal(f64::INFINITY), None);
    }

    #[test]
    fn test_number_round_trip() {
        let codec = create_test_codec();
        for n in [12.5, 0.0, -3.0, 1234.56, 0.1 + 0.2] {
            let sealed = codec.encrypt_number(n).unwrap();
            assert_eq!(codec.decrypt_number(&sealed), Some(n));
        }
    }

    #[test]
    fn test_negative_zero_matches_zero() {
        let codec = create_test_codec();
        assert_eq!(codec.encrypt_number(-0.0).unwrap(), codec.encrypt_number(0.0).unwrap());
    }

    #[test]
    fn test_non_finite_number_is_absent() {
        let codec = create_test_codec();
        assert_eq!(codec.encrypt_number(f64::NAN).unwrap(), "");
        assert_eq!(codec.decrypt_number(""), None);
    }

    #[test]
    fn test_decrypt_number_parse_failure_is_none() {
        let codec = create_test_codec();
        let sealed = codec.encrypt_string("doce").unwrap();
        assert_eq!(codec.decrypt_number(&sealed), None);
        assert_eq!(codec.decrypt_number("NaN"), None);
        assert_eq!(codec.decrypt_number("inf"), None);
    }

    #[test]
    fn test_decrypt_number_legacy_plaintext() {
        let codec = create_test_codec();
        assert_eq!(codec.decrypt_number("42"), Some(42.0));
        assert_eq!(codec.decrypt_number(" 7.5 "), Some(7.5));
        assert_eq!(codec.decrypt_number_field(&"19.99".into()), Some(19.99));
        assert_eq!(codec.decrypt_number_field(&StoredField::Absent), None);
    }

    #[test]
    fn test_boolean_round_trip() {
        let codec = create_test_codec();
        let yes = codec.encrypt_boolean(true).unwrap();
        let no = codec.encrypt_boolean(false).unwrap();

        assert!(codec.decrypt_boolean(&yes));
        assert!(!codec.decrypt_boolean(&no));
        assert_ne!(yes, no);
    }

    #[test]
    fn test_boolean_other_values_are_false() {
        let codec = create_test_codec();
        let sealed = codec.encrypt_string("TRUE").unwrap();
        assert!(!codec.decrypt_boolean(&sealed));
        assert!(!codec.decrypt_boolean("yes"));
        assert!(codec.decrypt_boolean("true"));
        assert!(!codec.decrypt_boolean_field(&StoredField::Absent));
    }

    #[test]
    fn test_string_array_round_trip_preserves_case_and_order() {
        let codec = create_test_codec();
        let sealed = codec.encrypt_string_array(&["a", "B"]).unwrap();
        assert_eq!(sealed.len(), 2);
        assert_eq!(codec.decrypt_string_array(&sealed.into()), vec!["a", "B"]);
    }

    #[test]
    fn test_string_array_elements_are_independent_envelopes() {
        let codec = create_test_codec();
        let sealed = codec.encrypt_string_array(&["x", "x"]).unwrap();
        assert_eq!(sealed[0], sealed[1]);
        assert_eq!(sealed[0], codec.encrypt_string("x").unwrap());
    }

    #[test]
    fn test_string_array_scalar_is_single_element() {
        let codec = create_test_codec();
        let sealed = codec.encrypt_string("Cervezas").unwrap();
        assert_eq!(codec.decrypt_string_array(&sealed.into()), vec!["Cervezas"]);
        assert_eq!(codec.decrypt_string_array(&"legacy".into()), vec!["legacy"]);
    }

    #[test]
    fn test_string_array_absent_is_empty() {
        let codec = create_test_codec();
        assert!(codec.decrypt_string_array(&StoredField::Absent).is_empty());
        assert!(codec.decrypt_string_array(&None::<String>.into()).is_empty());
    }
}
