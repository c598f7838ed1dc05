//! JWT codec for bearer tokens, signed with the active key epoch.

use std::sync::Arc;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Header, Validation, decode, decode_header, encode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use super::clock::Clock;
use super::config::JWTAlgorithm;
use super::keys::KeyRing;
use super::types::{AuthError, ScopeSet, TokenKind};

/// Claims carried inside every token this codec signs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub scope: ScopeSet,
    pub kind: TokenKind,
    pub iat: i64,
    pub exp: i64,
    /// Token id; a fresh UUID per token doubles as the nonce.
    pub jti: String,
}

impl Claims {
    pub fn subject(&self) -> &str {
        &self.sub
    }

    pub fn token_id(&self) -> &str {
        &self.jti
    }
}

/// A freshly signed token together with the claims it carries.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub claims: Claims,
}

/// Signs and verifies bearer tokens. Holds no key material of its own; keys
/// come from the injected [`KeyRing`].
pub struct TokenCodec {
    keys: Arc<KeyRing>,
    algorithm: JWTAlgorithm,
    clock: Arc<dyn Clock>,
    skew_secs: i64,
}

impl TokenCodec {
    pub fn new(keys: Arc<KeyRing>, algorithm: JWTAlgorithm, clock: Arc<dyn Clock>, skew_secs: u64) -> Self {
        Self { keys, algorithm, clock, skew_secs: i64::try_from(skew_secs).unwrap_or(i64::MAX) }
    }

    pub fn keys(&self) -> &KeyRing {
        &self.keys
    }

    /// Signs a new token for `subject` that expires `ttl_secs` from now.
    pub fn issue(&self, subject: &str, scopes: &ScopeSet, kind: TokenKind, ttl_secs: u64) -> Result<IssuedToken, AuthError> {
        if ttl_secs == 0 {
            warn!(subject, "Refusing to issue a token with zero lifetime");
            return Err(AuthError::ServerError);
        }
        let now = self.clock.now();
        let exp = i64::try_from(ttl_secs).ok().and_then(|ttl| now.checked_add(ttl)).ok_or_else(|| {
            warn!(subject, ttl_secs, "Token lifetime overflows the expiry timestamp");
            AuthError::ServerError
        })?;
        let claims = Claims {
            sub: subject.to_owned(),
            scope: scopes.clone(),
            kind,
            iat: now,
            exp,
            jti: Uuid::new_v4().to_string(),
        };
        let epoch = self.keys.snapshot();
        let key = epoch.current();
        let mut header = Header::new(self.algorithm.to_jsonwebtoken());
        header.kid = Some(key.kid().to_owned());
        let token = encode(&header, &claims, key.encoding_key()).map_err(|e| {
            warn!(error = %e, "Token signing failed");
            AuthError::ServerError
        })?;
        debug!(jti = %claims.jti, kid = key.kid(), ?kind, "Token issued");
        Ok(IssuedToken { token, claims })
    }

    /// Full verification: structure, signature against the active epoch, then timestamps.
    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let claims = self.inspect(token)?;
        let now = self.clock.now();
        if now >= claims.exp.saturating_add(self.skew_secs) {
            return Err(AuthError::Expired);
        }
        Ok(claims)
    }

    /// Checks structure and signature but not expiry. Used where an expired yet
    /// authentic token still identifies something, such as revocation.
    pub fn inspect(&self, token: &str) -> Result<Claims, AuthError> {
        let header = decode_header(token).map_err(|_| AuthError::MalformedToken)?;
        let algorithm = self.algorithm.to_jsonwebtoken();
        if header.alg != algorithm {
            return Err(AuthError::MalformedToken);
        }

        let mut validation = Validation::new(algorithm);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let now = self.clock.now();
        let epoch = self.keys.snapshot();
        // Try the key named by the header first; any other active key may still match.
        let mut keys: Vec<_> = epoch.active_keys(now).collect();
        if let Some(kid) = header.kid.as_deref() {
            keys.sort_by_key(|k| k.kid() != kid);
        }

        let mut claims = None;
        for key in keys {
            match decode::<Claims>(token, key.decoding_key(), &validation) {
                Ok(data) => {
                    claims = Some(data.claims);
                    break;
                }
                Err(e) if matches!(e.kind(), ErrorKind::InvalidSignature) => continue,
                Err(_) => return Err(AuthError::MalformedToken),
            }
        }
        let claims = claims.ok_or(AuthError::BadSignature)?;

        if claims.exp <= claims.iat || claims.iat > now {
            return Err(AuthError::MalformedToken);
        }
        Ok(claims)
    }
}
