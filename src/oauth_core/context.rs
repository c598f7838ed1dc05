//! Per-request view of an authenticated bearer token.

use super::jwt::Claims;
use super::types::ScopeSet;

/// Identity attached to a request once the bearer gate has accepted it.
///
/// Only [`AuthGate`](super::gate::AuthGate) constructs this; handlers read it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    subject: String,
    scopes: ScopeSet,
    token_id: String,
    expires_at: i64,
}

impl AuthContext {
    pub(crate) fn from_claims(claims: Claims) -> Self {
        Self {
            subject: claims.sub,
            scopes: claims.scope,
            token_id: claims.jti,
            expires_at: claims.exp,
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn scopes(&self) -> &ScopeSet {
        &self.scopes
    }

    pub fn token_id(&self) -> &str {
        &self.token_id
    }

    pub fn expires_at(&self) -> i64 {
        self.expires_at
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.contains(scope)
    }
}
