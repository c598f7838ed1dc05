//! Signing key material and its rotation lifecycle.
//!
//! A [`KeyRing`] holds the current key plus keys that were rotated out but
//! must keep validating outstanding tokens until their grace period ends.
//! Readers take a lock-free snapshot of the whole epoch, so a rotation is
//! observed atomically by every concurrent verification.

use std::fmt;
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use jsonwebtoken::{DecodingKey, EncodingKey};
use tracing::info;

use super::clock::Clock;
use super::config::ConfigError;
use super::crypto::random_bytes;

/// A symmetric signing key. The secret bytes are consumed on construction
/// and cannot be read back.
pub struct SigningKey {
    kid: String,
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl SigningKey {
    /// Shortest accepted secret, in bytes.
    pub const MIN_SECRET_LEN: usize = 32;

    pub fn from_secret(kid: impl Into<String>, secret: &[u8]) -> Result<Self, ConfigError> {
        let kid = kid.into();
        if kid.is_empty() {
            return Err(ConfigError::InvalidValue { field: "key_id", reason: "must not be empty".into() });
        }
        if secret.len() < Self::MIN_SECRET_LEN {
            return Err(ConfigError::WeakKey { len: secret.len() });
        }
        Ok(Self {
            kid,
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
        })
    }

    /// Builds a key from standard base64 text, as found in environment variables.
    pub fn from_base64(kid: impl Into<String>, encoded: &str) -> Result<Self, ConfigError> {
        let secret = STANDARD
            .decode(encoded.trim())
            .map_err(|e| ConfigError::Parse(format!("signing key is not valid base64: {}", e)))?;
        Self::from_secret(kid, &secret)
    }

    /// Generates a fresh random key.
    pub fn generate(kid: impl Into<String>) -> Result<Self, ConfigError> {
        let secret = random_bytes(Self::MIN_SECRET_LEN)
            .map_err(|_| ConfigError::Parse("system randomness unavailable".into()))?;
        Self::from_secret(kid, &secret)
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    pub(crate) fn encoding_key(&self) -> &EncodingKey {
        &self.encoding
    }

    pub(crate) fn decoding_key(&self) -> &DecodingKey {
        &self.decoding
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey").field("kid", &self.kid).field("secret", &"<redacted>").finish()
    }
}

#[derive(Debug, Clone)]
struct RetiringKey {
    key: Arc<SigningKey>,
    retire_at: i64,
}

/// The set of keys accepted at one point in time.
#[derive(Debug, Clone)]
pub struct KeyEpoch {
    current: Arc<SigningKey>,
    retiring: Vec<RetiringKey>,
}

impl KeyEpoch {
    /// Key used for new signatures.
    pub fn current(&self) -> &SigningKey {
        &self.current
    }

    /// Keys accepted for verification at `now`, current key first.
    pub fn active_keys(&self, now: i64) -> impl Iterator<Item = &SigningKey> {
        std::iter::once(self.current.as_ref()).chain(
            self.retiring
                .iter()
                .filter(move |r| r.retire_at > now)
                .map(|r| r.key.as_ref()),
        )
    }
}

/// Process-wide signing key holder, injected wherever tokens are signed or verified.
pub struct KeyRing {
    epoch: ArcSwap<KeyEpoch>,
    writer: Mutex<()>,
    clock: Arc<dyn Clock>,
}

impl KeyRing {
    pub fn new(initial: SigningKey, clock: Arc<dyn Clock>) -> Self {
        Self {
            epoch: ArcSwap::from_pointee(KeyEpoch { current: Arc::new(initial), retiring: Vec::new() }),
            writer: Mutex::new(()),
            clock,
        }
    }

    /// Lock-free view of the current epoch.
    pub fn snapshot(&self) -> Arc<KeyEpoch> {
        self.epoch.load_full()
    }

    pub fn current_kid(&self) -> String {
        self.epoch.load().current.kid.clone()
    }

    /// Makes `key` the signing key and keeps the previous one valid for `grace_secs`.
    pub fn rotate(&self, key: SigningKey, grace_secs: u64) -> Result<(), ConfigError> {
        let _guard = self.writer.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let now = self.clock.now();
        let old = self.epoch.load_full();
        if old.active_keys(now).any(|k| k.kid == key.kid) {
            return Err(ConfigError::DuplicateKeyId(key.kid));
        }
        let mut retiring: Vec<RetiringKey> =
            old.retiring.iter().filter(|r| r.retire_at > now).cloned().collect();
        retiring.push(RetiringKey {
            key: old.current.clone(),
            retire_at: now.saturating_add(i64::try_from(grace_secs).unwrap_or(i64::MAX)),
        });
        info!(new_kid = %key.kid, old_kid = %old.current.kid, grace_secs, "Signing key rotated");
        self.epoch.store(Arc::new(KeyEpoch { current: Arc::new(key), retiring }));
        Ok(())
    }

    /// Drops retiring keys whose grace period has ended. Returns how many were dropped.
    pub fn prune(&self, now: i64) -> usize {
        let _guard = self.writer.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let old = self.epoch.load_full();
        let retiring: Vec<RetiringKey> =
            old.retiring.iter().filter(|r| r.retire_at > now).cloned().collect();
        let dropped = old.retiring.len() - retiring.len();
        if dropped > 0 {
            self.epoch.store(Arc::new(KeyEpoch { current: old.current.clone(), retiring }));
        }
        dropped
    }
}

impl fmt::Debug for KeyRing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyRing").field("epoch", &self.epoch.load_full()).finish()
    }
}
