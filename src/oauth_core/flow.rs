//! Authorization-code grant: authorize, token, refresh and revoke.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use super::client_store::ClientStore;
use super::clock::Clock;
use super::code_store::{AuthorizationCodeStore, PendingGrant, PkceChallenge};
use super::config::AuthConfig;
use super::crypto::{fingerprint, random_token};
use super::jwt::{IssuedToken, TokenCodec};
use super::token_store::{TokenRecord, TokenStore};
use super::types::{AuthError, GrantState, Identity, ScopeSet, TokenGrant, TokenKind, TokenTypeHint};

/// Parameters of an authorize call, after the resource owner has been identified.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub owner: Identity,
    pub client_id: String,
    pub redirect_uri: String,
    pub scopes: ScopeSet,
    pub challenge: Option<PkceChallenge>,
}

impl AuthorizationRequest {
    pub fn new(
        owner: Identity,
        client_id: impl Into<String>,
        redirect_uri: impl Into<String>,
        scopes: ScopeSet,
    ) -> Self {
        Self {
            owner,
            client_id: client_id.into(),
            redirect_uri: redirect_uri.into(),
            scopes,
            challenge: None,
        }
    }

    pub fn with_pkce(mut self, challenge: PkceChallenge) -> Self {
        self.challenge = Some(challenge);
        self
    }
}

/// Drives each authorization attempt through
/// `Requested -> CodeIssued -> Exchanged | Expired | Denied`.
///
/// Every collaborator is supplied at construction.
pub struct OAuthFlowController {
    config: AuthConfig,
    codec: Arc<TokenCodec>,
    clients: Arc<dyn ClientStore>,
    codes: Arc<dyn AuthorizationCodeStore>,
    tokens: Arc<dyn TokenStore>,
    clock: Arc<dyn Clock>,
}

impl OAuthFlowController {
    pub fn new(
        config: AuthConfig,
        codec: Arc<TokenCodec>,
        clients: Arc<dyn ClientStore>,
        codes: Arc<dyn AuthorizationCodeStore>,
        tokens: Arc<dyn TokenStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { config, codec, clients, codes, tokens, clock }
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub fn codec(&self) -> &Arc<TokenCodec> {
        &self.codec
    }

    pub fn clients(&self) -> &Arc<dyn ClientStore> {
        &self.clients
    }

    pub fn tokens(&self) -> &Arc<dyn TokenStore> {
        &self.tokens
    }

    /// Validates the request against the client registry and the owner's
    /// grantable scopes, then issues a one-time code.
    #[instrument(skip(self, request), fields(client_id = %request.client_id, subject = %request.owner.subject), level = "debug")]
    pub async fn authorize(&self, request: AuthorizationRequest) -> Result<String, AuthError> {
        debug!(state = ?GrantState::Requested, scope = %request.scopes, "Authorization requested");
        let client = self.clients.get_client(&request.client_id).await.inspect_err(|e| {
            warn!(error = ?e, state = ?GrantState::Denied, "Unknown client");
        })?;
        if !client.is_registered_redirect(&request.redirect_uri) {
            warn!(state = ?GrantState::Denied, "Redirect URI not registered for client");
            return Err(AuthError::InvalidClient);
        }
        if request.scopes.is_empty()
            || !request.scopes.is_subset(&client.allowed_scopes)
            || !request.scopes.is_subset(&request.owner.scopes)
        {
            warn!(state = ?GrantState::Denied, scope = %request.scopes, "Requested scope not grantable");
            return Err(AuthError::InvalidScope);
        }

        let grant = PendingGrant {
            owner: Identity::new(request.owner.subject, request.scopes),
            client_id: request.client_id,
            redirect_uri: request.redirect_uri,
            challenge: request.challenge,
        };
        let code = self.codes.issue(grant).await?;
        debug!(state = ?GrantState::CodeIssued, code_id = %short_id(&code), "Authorization code issued");
        Ok(code)
    }

    /// Exchanges a code for an access token and a refresh token.
    #[instrument(skip(self, code, code_verifier), fields(code_id = %short_id(code)), level = "debug")]
    pub async fn token(
        &self,
        code: &str,
        client_id: &str,
        redirect_uri: &str,
        code_verifier: Option<&str>,
    ) -> Result<TokenGrant, AuthError> {
        let identity = match self.codes.consume(code, client_id, redirect_uri, code_verifier).await {
            Ok(identity) => identity,
            Err(err) => {
                let state = match err {
                    AuthError::CodeExpired => Some(GrantState::Expired),
                    AuthError::CodeNotFound => None,
                    _ => Some(GrantState::Denied),
                };
                warn!(error = ?err, error_code = err.oauth_code(), ?state, "Code exchange rejected");
                if err == AuthError::CodeAlreadyUsed {
                    self.revoke_replayed(code).await;
                }
                return Err(err);
            }
        };
        debug!(state = ?GrantState::Exchanged, subject = %identity.subject, "Code exchanged");

        let refresh_token = random_token()?;
        let refresh_id = fingerprint(&refresh_token);
        let ttl = i64::try_from(self.config.refresh_token_ttl).unwrap_or(i64::MAX);
        self.tokens
            .register(TokenRecord {
                id: refresh_id.clone(),
                subject: identity.subject.clone(),
                scopes: identity.scopes.clone(),
                kind: TokenKind::Refresh,
                client_id: client_id.to_owned(),
                expires_at: self.clock.now().saturating_add(ttl),
                parent: None,
            })
            .await?;
        // Best effort: the code is already spent and only the replay link is lost.
        if let Err(e) = self.codes.attach_grant(code, &refresh_id).await {
            warn!(error = ?e, "Could not link refresh token to its code");
        }

        let access = self.mint_access(&identity, client_id, &refresh_id).await?;
        info!(subject = %identity.subject, jti = %access.claims.jti, "Tokens granted");
        Ok(self.grant(access, Some(refresh_token)))
    }

    /// Mints a new access token from a live refresh token. The refresh token
    /// itself is not rotated.
    ///
    /// `client_id` is the client the caller already authenticated, if any. It
    /// must be the client the token was issued to. Leaving it out is only
    /// accepted when that client is public.
    #[instrument(skip(self, refresh_token), level = "debug")]
    pub async fn refresh(&self, refresh_token: &str, client_id: Option<&str>) -> Result<TokenGrant, AuthError> {
        let refresh_id = fingerprint(refresh_token);
        let record = self
            .tokens
            .resolve_refresh(&refresh_id, self.clock.now())
            .await
            .inspect_err(|e| warn!(error = ?e, error_code = e.oauth_code(), "Refresh rejected"))?;
        self.check_refresh_client(&record, client_id).await.inspect_err(|_| {
            warn!(bound_client = %record.client_id, ?client_id, "Refresh token presented by another client");
        })?;

        let identity = Identity::new(record.subject, record.scopes);
        let access = self.mint_access(&identity, &record.client_id, &refresh_id).await?;
        if self.tokens.is_revoked(&access.claims.jti).await? {
            // The refresh token was revoked while this call was in flight.
            warn!(jti = %access.claims.jti, "Refresh raced with revocation");
            return Err(AuthError::TokenRevoked);
        }
        info!(subject = %identity.subject, jti = %access.claims.jti, "Access token refreshed");
        Ok(self.grant(access, Some(refresh_token.to_owned())))
    }

    /// Revokes an access or refresh token. Never fails: the outcome is not
    /// observable by the caller, whatever the token was.
    #[instrument(skip(self, token), level = "debug")]
    pub async fn revoke(&self, token: &str, hint: Option<TokenTypeHint>) {
        let order = match hint {
            Some(TokenTypeHint::RefreshToken) => [TokenKind::Refresh, TokenKind::Access],
            _ => [TokenKind::Access, TokenKind::Refresh],
        };
        for kind in order {
            let id = match kind {
                TokenKind::Access => match self.codec.inspect(token) {
                    Ok(claims) => claims.jti,
                    Err(_) => continue,
                },
                TokenKind::Refresh => fingerprint(token),
            };
            match self.tokens.revoke(&id).await {
                Ok(0) => continue,
                Ok(revoked) => {
                    info!(?kind, revoked, "Token revoked");
                    return;
                }
                Err(e) => {
                    warn!(error = ?e, ?kind, "Revocation failed");
                    return;
                }
            }
        }
        debug!("Revocation matched no live token");
    }

    /// Where the attempt behind `code` stands, if the code is still known.
    pub async fn attempt_state(&self, code: &str) -> Result<Option<GrantState>, AuthError> {
        self.codes.state(code).await
    }

    async fn check_refresh_client(&self, record: &TokenRecord, client_id: Option<&str>) -> Result<(), AuthError> {
        match client_id {
            Some(id) if id == record.client_id => Ok(()),
            Some(_) => Err(AuthError::InvalidClient),
            None => match self.clients.get_client(&record.client_id).await {
                Ok(client) if client.secret.is_none() => Ok(()),
                _ => Err(AuthError::InvalidClient),
            },
        }
    }

    async fn mint_access(&self, identity: &Identity, client_id: &str, parent: &str) -> Result<IssuedToken, AuthError> {
        let access = self.codec.issue(
            &identity.subject,
            &identity.scopes,
            TokenKind::Access,
            self.config.access_token_ttl,
        )?;
        self.tokens
            .register(TokenRecord {
                id: access.claims.jti.clone(),
                subject: identity.subject.clone(),
                scopes: identity.scopes.clone(),
                kind: TokenKind::Access,
                client_id: client_id.to_owned(),
                expires_at: access.claims.exp,
                parent: Some(parent.to_owned()),
            })
            .await?;
        Ok(access)
    }

    fn grant(&self, access: IssuedToken, refresh_token: Option<String>) -> TokenGrant {
        TokenGrant {
            access_token: access.token,
            token_type: "bearer".to_string(),
            expires_in: self.config.access_token_ttl,
            refresh_token,
            scope: access.claims.scope,
        }
    }

    /// A spent code presented again means it leaked: pull every token it produced.
    async fn revoke_replayed(&self, code: &str) {
        match self.codes.issued_grant(code).await {
            Ok(Some(refresh_id)) => match self.tokens.revoke(&refresh_id).await {
                Ok(revoked) => warn!(revoked, "Authorization code replayed, issued tokens revoked"),
                Err(e) => warn!(error = ?e, "Failed to revoke tokens of a replayed code"),
            },
            Ok(None) => {}
            Err(e) => warn!(error = ?e, "Failed to look up tokens of a replayed code"),
        }
    }
}

/// Short, non-reversible handle for logging a secret.
fn short_id(secret: &str) -> String {
    fingerprint(secret).chars().take(8).collect()
}
