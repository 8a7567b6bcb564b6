//! Master key loading and purpose-scoped subkey derivation.
//!
//! One 32-byte master key drives everything. Two subkeys are derived from it
//! once, at construction, by keying HMAC-SHA256 with the master key over a
//! fixed purpose label:
//!
//! ```text
//! iv_key   = HMAC-SHA256(master_key, "iv")
//! hash_key = HMAC-SHA256(master_key, "hash")
//! ```
//!
//! The resulting [`KeyManager`] is immutable and meant to be built once at
//! process start and shared (`Arc<KeyManager>`) by every codec.

use std::fmt;

use base64::{
    engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD},
    Engine as _,
};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, Secret};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::Error;

type HmacSha256 = Hmac<Sha256>;

/// Master key and subkey size in bytes (256 bits).
pub const KEY_LEN: usize = 32;

/// Environment variable the master key is read from by [`KeyManager::from_env`].
pub const KEY_ENV_VAR: &str = "DATA_ENCRYPTION_KEY";

/// Derivation label for the IV subkey.
pub const IV_LABEL: &[u8] = b"iv";

/// Derivation label for the blind-index subkey.
pub const HASH_LABEL: &[u8] = b"hash";

/// A 32-byte key kept behind `secrecy` so it is zeroized on drop.
pub type SecretKey = Secret<[u8; KEY_LEN]>;

/// Holds the master key and the subkeys derived from it.
pub struct KeyManager {
    master_key: SecretKey,
    iv_key: SecretKey,
    hash_key: SecretKey,
}

impl KeyManager {
    /// Builds a key manager from the configured key string.
    ///
    /// The value is accepted as 64 hex characters (any case) or as base64
    /// (standard or URL-safe alphabet, with or without padding). Surrounding
    /// whitespace is ignored.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if the value is empty, cannot be decoded,
    /// or does not decode to exactly [`KEY_LEN`] bytes.
    ///
    /// # Example
    ///
    /// ```
    /// use cofre::key_manager::KeyManager;
    ///
    /// let keys = KeyManager::from_config(&"00".repeat(32)).expect("valid key");
    /// # drop(keys);
    /// ```
    pub fn from_config(raw: &str) -> Result<Self, Error> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(Error::Configuration(format!("{KEY_ENV_VAR} is empty")));
        }

        let decoded = decode_key_material(raw).ok_or_else(|| {
            Error::Configuration(format!("{KEY_ENV_VAR} is neither valid hex nor base64"))
        })?;

        Self::from_bytes(&decoded)
    }

    /// Builds a key manager from the [`KEY_ENV_VAR`] environment variable.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if the variable is unset or invalid.
    pub fn from_env() -> Result<Self, Error> {
        let raw = Zeroizing::new(
            std::env::var(KEY_ENV_VAR)
                .map_err(|_| Error::Configuration(format!("{KEY_ENV_VAR} is not set")))?,
        );
        Self::from_config(&raw)
    }

    /// Builds a key manager from raw key bytes.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if `bytes` is not exactly [`KEY_LEN`] long.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        let master: [u8; KEY_LEN] = bytes.try_into().map_err(|_| {
            Error::Configuration(format!(
                "{KEY_ENV_VAR} must be {KEY_LEN} bytes (base64 or hex), got {}",
                bytes.len()
            ))
        })?;

        let iv_key = hmac_sha256(&master, IV_LABEL)?;
        let hash_key = hmac_sha256(&master, HASH_LABEL)?;

        Ok(Self {
            master_key: Secret::new(master),
            iv_key: Secret::new(iv_key),
            hash_key: Secret::new(hash_key),
        })
    }

    /// Returns the AES-256-GCM key.
    #[must_use]
    pub const fn master_key(&self) -> &SecretKey {
        &self.master_key
    }

    /// Returns the subkey used to derive envelope IVs.
    #[must_use]
    pub const fn iv_key(&self) -> &SecretKey {
        &self.iv_key
    }

    /// Returns the subkey used for blind indexes.
    #[must_use]
    pub const fn hash_key(&self) -> &SecretKey {
        &self.hash_key
    }
}

impl fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyManager")
            .field("master_key", &"[REDACTED]")
            .field("iv_key", &"[REDACTED]")
            .field("hash_key", &"[REDACTED]")
            .finish()
    }
}

/// Computes `HMAC-SHA256(key, data)`.
///
/// # Errors
///
/// Returns `Error::KeyDerivation` if the MAC cannot be keyed.
pub(crate) fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<[u8; KEY_LEN], Error> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| Error::KeyDerivation)?;
    mac.update(data);
    let digest = mac.finalize().into_bytes();

    let mut out = [0u8; KEY_LEN];
    out.copy_from_slice(&digest);
    Ok(out)
}

/// Exposes a secret key's bytes.
pub(crate) fn expose(key: &SecretKey) -> &[u8; KEY_LEN] {
    key.expose_secret()
}

fn decode_key_material(raw: &str) -> Option<Zeroizing<Vec<u8>>> {
    if raw.len() == KEY_LEN * 2 && raw.bytes().all(|b| b.is_ascii_hexdigit()) {
        return hex::decode(raw).ok().map(Zeroizing::new);
    }

    [&STANDARD, &STANDARD_NO_PAD, &URL_SAFE, &URL_SAFE_NO_PAD]
        .into_iter()
        .find_map(|engine| engine.decode(raw).ok())
        .map(Zeroizing::new)
}
