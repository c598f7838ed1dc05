//! Runtime configuration for token lifetimes, signing and housekeeping.

use std::env;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::keys::SigningKey;

/// Prefix of every environment variable read by [`AuthConfig::from_env`].
pub const ENV_PREFIX: &str = "HITIME_OAUTH_";

/// Core JWT algorithm options. Only the HMAC family is offered; the key ring
/// holds symmetric secrets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum JWTAlgorithm {
    #[default]
    HS256,
    HS384,
    HS512,
}

impl JWTAlgorithm {
    pub(crate) fn to_jsonwebtoken(self) -> jsonwebtoken::Algorithm {
        match self {
            JWTAlgorithm::HS256 => jsonwebtoken::Algorithm::HS256,
            JWTAlgorithm::HS384 => jsonwebtoken::Algorithm::HS384,
            JWTAlgorithm::HS512 => jsonwebtoken::Algorithm::HS512,
        }
    }
}

/// Tunables for the authorization subsystem. All durations are in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub algorithm: JWTAlgorithm,
    pub access_token_ttl: u64,
    pub refresh_token_ttl: u64,
    pub code_ttl: u64,
    /// Tolerance applied to expiry checks only.
    pub clock_skew: u64,
    /// How long a rotated-out key keeps verifying tokens.
    pub key_grace_period: u64,
    pub sweep_interval: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            algorithm: JWTAlgorithm::HS256,
            access_token_ttl: 3600,
            refresh_token_ttl: 30 * 24 * 3600,
            code_ttl: 120,
            clock_skew: 30,
            key_grace_period: 3600 + 30,
            sweep_interval: 300,
        }
    }
}

impl AuthConfig {
    pub const MIN_CODE_TTL: u64 = 60;
    pub const MAX_CODE_TTL: u64 = 300;
    /// Upper bound for every duration: ten years.
    pub const MAX_DURATION: u64 = 10 * 365 * 24 * 3600;

    /// Parses a JSON document. Missing fields take their defaults.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: AuthConfig = serde_json::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads `HITIME_OAUTH_*` variables on top of the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Same as [`AuthConfig::from_env`] with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = AuthConfig::default();
        let var = |suffix: &str| lookup(&format!("{}{}", ENV_PREFIX, suffix));

        if let Some(raw) = var("ALGORITHM") {
            config.algorithm = match raw.trim().to_ascii_uppercase().as_str() {
                "HS256" => JWTAlgorithm::HS256,
                "HS384" => JWTAlgorithm::HS384,
                "HS512" => JWTAlgorithm::HS512,
                _ => {
                    return Err(ConfigError::InvalidValue { field: "algorithm", reason: format!("unsupported `{}`", raw) });
                }
            };
        }
        let mut grace_overridden = false;
        for (suffix, field, slot) in [
            ("ACCESS_TTL", "access_token_ttl", &mut config.access_token_ttl),
            ("REFRESH_TTL", "refresh_token_ttl", &mut config.refresh_token_ttl),
            ("CODE_TTL", "code_ttl", &mut config.code_ttl),
            ("CLOCK_SKEW", "clock_skew", &mut config.clock_skew),
            ("KEY_GRACE_PERIOD", "key_grace_period", &mut config.key_grace_period),
            ("SWEEP_INTERVAL", "sweep_interval", &mut config.sweep_interval),
        ] {
            if let Some(raw) = var(suffix) {
                *slot = raw
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue { field, reason: format!("`{}` is not a number of seconds", raw) })?;
                grace_overridden |= suffix == "KEY_GRACE_PERIOD";
            }
        }
        if !grace_overridden {
            config.key_grace_period = config.min_grace_period()?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Checks the invariants between fields.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("access_token_ttl", self.access_token_ttl),
            ("refresh_token_ttl", self.refresh_token_ttl),
            ("code_ttl", self.code_ttl),
            ("clock_skew", self.clock_skew),
            ("key_grace_period", self.key_grace_period),
            ("sweep_interval", self.sweep_interval),
        ] {
            if value > Self::MAX_DURATION {
                return Err(ConfigError::InvalidValue {
                    field,
                    reason: format!("must not exceed {} seconds", Self::MAX_DURATION),
                });
            }
        }
        if self.access_token_ttl == 0 {
            return Err(ConfigError::InvalidValue { field: "access_token_ttl", reason: "must be positive".into() });
        }
        if self.refresh_token_ttl == 0 {
            return Err(ConfigError::InvalidValue { field: "refresh_token_ttl", reason: "must be positive".into() });
        }
        if !(Self::MIN_CODE_TTL..=Self::MAX_CODE_TTL).contains(&self.code_ttl) {
            return Err(ConfigError::InvalidValue {
                field: "code_ttl",
                reason: format!("must be within {}..={}", Self::MIN_CODE_TTL, Self::MAX_CODE_TTL),
            });
        }
        if self.key_grace_period < self.min_grace_period()? {
            return Err(ConfigError::InvalidValue {
                field: "key_grace_period",
                reason: "must cover access_token_ttl plus clock_skew".into(),
            });
        }
        if self.sweep_interval == 0 {
            return Err(ConfigError::InvalidValue { field: "sweep_interval", reason: "must be positive".into() });
        }
        Ok(())
    }

    /// Shortest grace period that still covers every token signed by a retired key.
    fn min_grace_period(&self) -> Result<u64, ConfigError> {
        self.access_token_ttl.checked_add(self.clock_skew).ok_or_else(|| ConfigError::InvalidValue {
            field: "access_token_ttl",
            reason: "access_token_ttl plus clock_skew overflows".into(),
        })
    }
}

/// Loads the signing key from `HITIME_OAUTH_SIGNING_KEY` (base64) and
/// `HITIME_OAUTH_SIGNING_KEY_ID`, generating a random one when none is set.
pub fn signing_key_from_env() -> Result<SigningKey, ConfigError> {
    signing_key_from_lookup(|name| env::var(name).ok())
}

pub fn signing_key_from_lookup<F>(lookup: F) -> Result<SigningKey, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let kid = lookup(&format!("{}SIGNING_KEY_ID", ENV_PREFIX)).unwrap_or_else(|| "primary".to_string());
    match lookup(&format!("{}SIGNING_KEY", ENV_PREFIX)) {
        Some(encoded) => SigningKey::from_base64(kid, &encoded),
        None => {
            tracing::warn!("No signing key configured, generating an ephemeral one");
            SigningKey::generate(kid)
        }
    }
}

/// Configuration errors surfaced at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidValue { field: &'static str, reason: String },
    WeakKey { len: usize },
    DuplicateKeyId(String),
    Parse(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidValue { field, reason } => write!(f, "Invalid `{}`: {}", field, reason),
            Self::WeakKey { len } => {
                write!(f, "Signing key too short: {} bytes, need at least {}", len, SigningKey::MIN_SECRET_LEN)
            }
            Self::DuplicateKeyId(kid) => write!(f, "Key id `{}` is already active", kid),
            Self::Parse(err) => write!(f, "Configuration parse error: {}", err),
        }
    }
}

impl std::error::Error for ConfigError {}
