//! Bearer-token enforcement for protected endpoints.

use std::sync::Arc;

use tracing::{debug, instrument, warn};

use super::context::AuthContext;
use super::jwt::TokenCodec;
use super::token_store::TokenStore;
use super::types::{AuthError, TokenKind};

/// Validates `Authorization: Bearer` credentials and yields an [`AuthContext`].
///
/// Callers only ever see `Unauthenticated` or `Forbidden`; the precise reason
/// a token was refused goes to the log.
#[derive(Clone)]
pub struct AuthGate {
    codec: Arc<TokenCodec>,
    tokens: Arc<dyn TokenStore>,
}

impl AuthGate {
    pub fn new(codec: Arc<TokenCodec>, tokens: Arc<dyn TokenStore>) -> Self {
        Self { codec, tokens }
    }

    /// Extracts the credential from an `Authorization` header value.
    /// The scheme is matched case-insensitively.
    pub fn bearer_token(header: Option<&str>) -> Option<&str> {
        let value = header?.trim();
        let (scheme, token) = value.split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("bearer") {
            return None;
        }
        let token = token.trim();
        (!token.is_empty()).then_some(token)
    }

    #[instrument(skip_all, level = "debug")]
    pub async fn authenticate(&self, authorization: Option<&str>) -> Result<AuthContext, AuthError> {
        let Some(token) = Self::bearer_token(authorization) else {
            debug!(reason = "missing bearer token", "Request rejected");
            return Err(AuthError::Unauthenticated);
        };
        let claims = self.codec.verify(token).map_err(|reason| {
            warn!(?reason, "Bearer token rejected");
            AuthError::Unauthenticated
        })?;
        if claims.kind != TokenKind::Access {
            warn!(jti = %claims.jti, reason = "not an access token", "Bearer token rejected");
            return Err(AuthError::Unauthenticated);
        }
        match self.tokens.is_revoked(&claims.jti).await {
            Ok(false) => {}
            Ok(true) => {
                warn!(jti = %claims.jti, reason = ?AuthError::TokenRevoked, "Bearer token rejected");
                return Err(AuthError::Unauthenticated);
            }
            Err(e) => {
                warn!(jti = %claims.jti, error = ?e, "Revocation ledger unavailable");
                return Err(AuthError::ServerError);
            }
        }
        debug!(jti = %claims.jti, subject = %claims.sub, "Bearer token accepted");
        Ok(AuthContext::from_claims(claims))
    }

    /// Scope policy on top of authentication.
    pub fn require_scope(ctx: &AuthContext, scope: &str) -> Result<(), AuthError> {
        if ctx.has_scope(scope) {
            Ok(())
        } else {
            debug!(subject = ctx.subject(), required = scope, "Insufficient scope");
            Err(AuthError::Forbidden)
        }
    }

    /// Authenticates and, when `required_scope` is given, enforces it.
    pub async fn guard(&self, authorization: Option<&str>, required_scope: Option<&str>) -> Result<AuthContext, AuthError> {
        let ctx = self.authenticate(authorization).await?;
        if let Some(scope) = required_scope {
            Self::require_scope(&ctx, scope)?;
        }
        Ok(ctx)
    }
}
