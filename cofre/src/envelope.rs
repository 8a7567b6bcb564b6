//! Versioned envelope format and the AES-256-GCM codec behind it.
//!
//! Every encrypted field is stored as one printable string:
//!
//! ```text
//! v1:<base64 iv>:<base64 ciphertext>:<base64 tag>
//! ```
//!
//! The IV is 12 bytes, the tag 16 bytes, and the ciphertext is as long as the
//! plaintext. The IV is not random: it is the first 12 bytes of
//! `HMAC-SHA256(iv_key, plaintext)`, so equal plaintexts always produce
//! byte-identical envelopes.
//!
//! Decoding never fails. Anything that is not a well-formed, authentic `v1`
//! envelope is handed back unchanged as legacy plaintext, which lets a store
//! hold a mix of encrypted and not-yet-migrated values.

use std::fmt;
use std::sync::Arc;

use aes_gcm::{
    aead::{AeadInPlace, KeyInit},
    Aes256Gcm, Nonce, Tag,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::error::Error;
use crate::key_manager::{expose, hmac_sha256, KeyManager};

/// Envelope format version written by this codec.
pub const ENVELOPE_VERSION: &str = "v1";

/// IV size for AES-256-GCM (96 bits).
pub const IV_LEN: usize = 12;

/// Authentication tag size (128 bits).
pub const TAG_LEN: usize = 16;

const PREFIX: &str = "v1:";

/// Why a stored value was returned as-is instead of decrypted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackReason {
    /// The input was empty or absent.
    Empty,
    /// The input does not start with the `v1:` prefix.
    NotEnveloped,
    /// The input has the prefix but not four well-formed segments.
    Malformed,
    /// The tag did not verify under the current key.
    Unauthenticated,
}

/// Result of opening a stored value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Opened {
    /// Authentic envelope; holds the recovered plaintext.
    Cipher(String),
    /// Passed through unchanged.
    Plain {
        /// The original input.
        value: String,
        /// Why it was not decrypted.
        reason: FallbackReason,
    },
}

impl Opened {
    /// Returns the plaintext, or the original input on fallback.
    #[must_use]
    pub fn into_value(self) -> String {
        match self {
            Self::Cipher(value) | Self::Plain { value, .. } => value,
        }
    }

    /// Borrows the plaintext, or the original input on fallback.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Cipher(value) | Self::Plain { value, .. } => value,
        }
    }

    /// Returns true when a non-empty value came back without decryption.
    #[must_use]
    pub const fn is_legacy(&self) -> bool {
        matches!(self, Self::Plain { reason, .. } if !matches!(reason, FallbackReason::Empty))
    }
}

/// A parsed `v1` envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    iv: [u8; IV_LEN],
    ciphertext: Vec<u8>,
    tag: [u8; TAG_LEN],
}

impl Envelope {
    /// Creates an envelope from its parts.
    #[must_use]
    pub const fn new(iv: [u8; IV_LEN], ciphertext: Vec<u8>, tag: [u8; TAG_LEN]) -> Self {
        Self { iv, ciphertext, tag }
    }

    /// Parses the wire form.
    ///
    /// # Errors
    ///
    /// Returns the [`FallbackReason`] describing why `serialized` is not a
    /// `v1` envelope.
    pub fn parse(serialized: &str) -> Result<Self, FallbackReason> {
        if serialized.is_empty() {
            return Err(FallbackReason::Empty);
        }
        if !serialized.starts_with(PREFIX) {
            return Err(FallbackReason::NotEnveloped);
        }

        let parts: Vec<&str> = serialized.split(':').collect();
        let [_, iv, ciphertext, tag] = parts.as_slice() else {
            return Err(FallbackReason::Malformed);
        };

        let iv = decode_fixed::<IV_LEN>(iv)?;
        let ciphertext = STANDARD.decode(ciphertext).map_err(|_| FallbackReason::Malformed)?;
        let tag = decode_fixed::<TAG_LEN>(tag)?;

        Ok(Self { iv, ciphertext, tag })
    }

    /// Returns the IV.
    #[must_use]
    pub const fn iv(&self) -> &[u8; IV_LEN] {
        &self.iv
    }

    /// Returns the ciphertext bytes.
    #[must_use]
    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    /// Returns the authentication tag.
    #[must_use]
    pub const fn tag(&self) -> &[u8; TAG_LEN] {
        &self.tag
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{ENVELOPE_VERSION}:{}:{}:{}",
            STANDARD.encode(self.iv),
            STANDARD.encode(&self.ciphertext),
            STANDARD.encode(self.tag)
        )
    }
}

fn decode_fixed<const N: usize>(segment: &str) -> Result<[u8; N], FallbackReason> {
    let bytes = STANDARD.decode(segment).map_err(|_| FallbackReason::Malformed)?;
    bytes.try_into().map_err(|_| FallbackReason::Malformed)
}

/// Deterministic authenticated encryption of single values.
///
/// Cheap to clone; clones share the same [`KeyManager`].
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use cofre::envelope::EnvelopeCodec;
/// use cofre::key_manager::KeyManager;
///
/// let keys = Arc::new(KeyManager::from_bytes(&[0u8; 32]).unwrap());
/// let codec = EnvelopeCodec::new(keys);
///
/// let sealed = codec.encrypt(b"hello").unwrap();
/// assert!(sealed.starts_with("v1:"));
/// assert_eq!(codec.decrypt(&sealed), "hello");
/// assert_eq!(codec.decrypt("plain-value"), "plain-value");
/// ```
#[derive(Debug, Clone)]
pub struct EnvelopeCodec {
    keys: Arc<KeyManager>,
}

impl EnvelopeCodec {
    /// Creates a codec over the given key material.
    #[must_use]
    pub const fn new(keys: Arc<KeyManager>) -> Self {
        Self { keys }
    }

    /// Returns the key material this codec uses.
    #[must_use]
    pub const fn keys(&self) -> &Arc<KeyManager> {
        &self.keys
    }

    /// Encrypts `plaintext` into its envelope string.
    ///
    /// Empty input yields an empty string and no envelope.
    ///
    /// # Errors
    ///
    /// Returns `Error::EncryptionFailed` if the cipher cannot be initialised
    /// or rejects the input.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String, Error> {
        if plaintext.is_empty() {
            return Ok(String::new());
        }

        let iv = self.derive_iv(plaintext)?;
        let cipher = self.cipher()?;

        let mut buffer = plaintext.to_vec();
        let tag = cipher
            .encrypt_in_place_detached(Nonce::from_slice(&iv), b"", &mut buffer)
            .map_err(|e| Error::EncryptionFailed(format!("AES-256-GCM encryption failed: {e}")))?;

        let mut tag_bytes = [0u8; TAG_LEN];
        tag_bytes.copy_from_slice(&tag);

        Ok(Envelope::new(iv, buffer, tag_bytes).to_string())
    }

    /// Opens a stored value, reporting whether it was actually decrypted.
    #[must_use]
    pub fn open(&self, serialized: &str) -> Opened {
        let envelope = match Envelope::parse(serialized) {
            Ok(envelope) => envelope,
            Err(reason) => return passthrough(serialized, reason),
        };

        let Ok(cipher) = self.cipher() else {
            return passthrough(serialized, FallbackReason::Unauthenticated);
        };

        let mut buffer = envelope.ciphertext;
        if cipher
            .decrypt_in_place_detached(
                Nonce::from_slice(&envelope.iv),
                b"",
                &mut buffer,
                Tag::from_slice(&envelope.tag),
            )
            .is_err()
        {
            return passthrough(serialized, FallbackReason::Unauthenticated);
        }

        match String::from_utf8(buffer) {
            Ok(plaintext) => Opened::Cipher(plaintext),
            Err(_) => passthrough(serialized, FallbackReason::Malformed),
        }
    }

    /// Decrypts a stored value, returning it unchanged when it is not an
    /// authentic envelope.
    #[must_use]
    pub fn decrypt(&self, serialized: &str) -> String {
        self.open(serialized).into_value()
    }

    /// Like [`decrypt`](Self::decrypt), treating `None` as empty.
    #[must_use]
    pub fn decrypt_optional(&self, serialized: Option<&str>) -> String {
        serialized.map(|value| self.decrypt(value)).unwrap_or_default()
    }

    fn derive_iv(&self, plaintext: &[u8]) -> Result<[u8; IV_LEN], Error> {
        let digest = hmac_sha256(expose(self.keys.iv_key()), plaintext)?;
        let mut iv = [0u8; IV_LEN];
        iv.copy_from_slice(&digest[..IV_LEN]);
        Ok(iv)
    }

    fn cipher(&self) -> Result<Aes256Gcm, Error> {
        Aes256Gcm::new_from_slice(expose(self.keys.master_key()))
            .map_err(|e| Error::EncryptionFailed(format!("invalid master key: {e}")))
    }
}

fn passthrough(serialized: &str, reason: FallbackReason) -> Opened {
    if matches!(reason, FallbackReason::Malformed | FallbackReason::Unauthenticated) {
        tracing::debug!(?reason, "stored value is not an authentic envelope; passing through");
    }
    Opened::Plain { value: serialized.to_string(), reason }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec_with(byte: u8) -> EnvelopeCodec {
        EnvelopeCodec::new(Arc::new(KeyManager::from_bytes(&[byte; 32]).unwrap()))
    }

    fn create_test_codec() -> EnvelopeCodec {
        codec_with(0)
    }

    fn flip_bit(segment: &str, index: usize) -> String {
        let mut bytes = STANDARD.decode(segment).unwrap();
        bytes[index] ^= 0x01;
        STANDARD.encode(bytes)
    }

    #[test]
    fn test_encrypt_decrypt_round_trip() {
        let codec = create_test_codec();
        let sealed = codec.encrypt(b"alice").unwrap();
        assert_eq!(codec.decrypt(&sealed), "alice");
        assert!(matches!(codec.open(&sealed), Opened::Cipher(ref s) if s == "alice"));
    }

    #[test]
    fn test_encryption_is_deterministic() {
        let codec = create_test_codec();
        assert_eq!(codec.encrypt(b"alice").unwrap(), codec.encrypt(b"alice").unwrap());
    }

    #[test]
    fn test_different_plaintexts_different_envelopes() {
        let codec = create_test_codec();
        assert_ne!(codec.encrypt(b"alice").unwrap(), codec.encrypt(b"bob").unwrap());
    }

    #[test]
    fn test_different_keys_different_envelopes() {
        let a = codec_with(1).encrypt(b"alice").unwrap();
        let b = codec_with(2).encrypt(b"alice").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_wire_format_layout() {
        let codec = create_test_codec();
        let sealed = codec.encrypt(b"hello").unwrap();
        let parts: Vec<&str> = sealed.split(':').collect();

        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0], "v1");
        assert_eq!(STANDARD.decode(parts[1]).unwrap().len(), IV_LEN);
        assert_eq!(STANDARD.decode(parts[2]).unwrap().len(), 5);
        assert_eq!(STANDARD.decode(parts[3]).unwrap().len(), TAG_LEN);
    }

    #[test]
    fn test_iv_is_hmac_prefix() {
        let codec = create_test_codec();
        let sealed = codec.encrypt(b"hello").unwrap();
        let envelope = Envelope::parse(&sealed).unwrap();

        let digest = hmac_sha256(expose(codec.keys().iv_key()), b"hello").unwrap();
        assert_eq!(envelope.iv(), &digest[..IV_LEN]);
    }

    #[test]
    fn test_empty_plaintext_emits_nothing() {
        let codec = create_test_codec();
        assert_eq!(codec.encrypt(b"").unwrap(), "");
        assert_eq!(codec.decrypt(""), "");
        assert_eq!(codec.decrypt_optional(None), "");
        assert_eq!(
            codec.open(""),
            Opened::Plain { value: String::new(), reason: FallbackReason::Empty }
        );
    }

    #[test]
    fn test_legacy_plaintext_passes_through() {
        let codec = create_test_codec();
        let opened = codec.open("plain-value");
        assert!(opened.is_legacy());
        assert_eq!(
            opened,
            Opened::Plain { value: "plain-value".to_string(), reason: FallbackReason::NotEnveloped }
        );
    }

    #[test]
    fn test_wrong_segment_count_passes_through() {
        let codec = create_test_codec();
        for input in ["v1:", "v1:a:b", "v1:a:b:c:d"] {
            let opened = codec.open(input);
            assert_eq!(opened.as_str(), input);
            assert!(matches!(opened, Opened::Plain { reason: FallbackReason::Malformed, .. }));
        }
    }

    #[test]
    fn test_garbage_ciphertext_decrypts_to_itself() {
        let codec = create_test_codec();
        let garbage = "v1:not*base64:%%%:???";
        assert_eq!(codec.decrypt(garbage), garbage);
    }

    #[test]
    fn test_wrong_length_iv_passes_through() {
        let codec = create_test_codec();
        let sealed = codec.encrypt(b"hello").unwrap();
        let parts: Vec<&str> = sealed.split(':').collect();
        let short_iv = STANDARD.encode([0u8; 8]);
        let tampered = format!("v1:{short_iv}:{}:{}", parts[2], parts[3]);
        assert_eq!(codec.decrypt(&tampered), tampered);
    }

    #[test]
    fn test_flipped_ciphertext_bit_passes_through() {
        let codec = create_test_codec();
        let sealed = codec.encrypt(b"hello").unwrap();
        let parts: Vec<&str> = sealed.split(':').collect();
        let tampered = format!("v1:{}:{}:{}", parts[1], flip_bit(parts[2], 0), parts[3]);

        let opened = codec.open(&tampered);
        assert_eq!(opened.as_str(), tampered);
        assert!(matches!(opened, Opened::Plain { reason: FallbackReason::Unauthenticated, .. }));
    }

    #[test]
    fn test_flipped_tag_bit_passes_through() {
        let codec = create_test_codec();
        let sealed = codec.encrypt(b"hello").unwrap();
        let parts: Vec<&str> = sealed.split(':').collect();
        let tampered = format!("v1:{}:{}:{}", parts[1], parts[2], flip_bit(parts[3], 15));
        assert_eq!(codec.decrypt(&tampered), tampered);
    }

    #[test]
    fn test_wrong_key_passes_through() {
        let sealed = codec_with(1).encrypt(b"hello").unwrap();
        let opened = codec_with(2).open(&sealed);
        assert_eq!(opened.into_value(), sealed);
    }

    #[test]
    fn test_envelope_parse_and_display() {
        let codec = create_test_codec();
        let sealed = codec.encrypt(b"hello").unwrap();
        let envelope = Envelope::parse(&sealed).unwrap();

        assert_eq!(envelope.ciphertext().len(), 5);
        assert_eq!(envelope.tag().len(), TAG_LEN);
        assert_eq!(envelope.to_string(), sealed);
    }

    #[test]
    fn test_large_plaintext() {
        let codec = create_test_codec();
        let plaintext = "x".repeat(10_000);
        let sealed = codec.encrypt(plaintext.as_bytes()).unwrap();
        assert_eq!(codec.decrypt(&sealed), plaintext);
    }

    #[test]
    fn test_codec_clone_shares_keys() {
        let codec1 = create_test_codec();
        let codec2 = codec1.clone();
        let sealed = codec1.encrypt(b"test").unwrap();
        assert_eq!(codec2.decrypt(&sealed), "test");
        assert!(Arc::ptr_eq(codec1.keys(), codec2.keys()));
    }
}
