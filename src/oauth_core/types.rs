//! OAuth2 core primitives: scopes, identities, clients, grants and errors.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, to_vec};
use tracing::warn;

use super::http::HttpResponse;

/// A set of named permission units.
///
/// Scopes travel on the wire as a single space-separated string; internally
/// they are kept ordered and deduplicated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ScopeSet(BTreeSet<String>);

impl ScopeSet {
    /// Creates an empty scope set.
    pub fn new() -> Self {
        Self(BTreeSet::new())
    }

    /// Parses a space-separated scope string. Empty segments are ignored.
    pub fn parse(raw: &str) -> Self {
        Self(raw.split_whitespace().map(str::to_owned).collect())
    }

    pub fn contains(&self, scope: &str) -> bool {
        self.0.contains(scope)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true when every scope in `self` is also in `other`.
    pub fn is_subset(&self, other: &ScopeSet) -> bool {
        self.0.is_subset(&other.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl fmt::Display for ScopeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self.0.iter().map(String::as_str).collect::<Vec<_>>().join(" ");
        f.write_str(&joined)
    }
}

impl<S: Into<String>> FromIterator<S> for ScopeSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl Serialize for ScopeSet {
    fn serialize<Ser: serde::Serializer>(&self, serializer: Ser) -> Result<Ser::Ok, Ser::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ScopeSet {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(ScopeSet::parse(&raw))
    }
}

/// A resource owner as known to the credential store: subject plus the scopes it may grant.
///
/// Identities are produced outside this crate and only read here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub subject: String,
    pub scopes: ScopeSet,
}

impl Identity {
    pub fn new(subject: impl Into<String>, scopes: ScopeSet) -> Self {
        Self { subject: subject.into(), scopes }
    }
}

/// Represents a registered OAuth 2.0 client application.
#[derive(Debug, Clone)]
pub struct Client {
    /// Client identifier.
    pub id: String,
    /// Optional client secret. Clients without one are public clients.
    pub secret: Option<String>,
    /// Redirect URIs registered for this client, matched exactly.
    pub redirect_uris: Vec<String>,
    /// Upper bound of what this client may request.
    pub allowed_scopes: ScopeSet,
}

impl Client {
    /// Creates a public client.
    pub fn public(
        id: impl Into<String>,
        redirect_uris: impl IntoIterator<Item = String>,
        allowed_scopes: ScopeSet,
    ) -> Self {
        Self {
            id: id.into(),
            secret: None,
            redirect_uris: redirect_uris.into_iter().collect(),
            allowed_scopes,
        }
    }

    /// Turns this client into a confidential client holding `secret`.
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    pub fn is_registered_redirect(&self, redirect_uri: &str) -> bool {
        self.redirect_uris.iter().any(|uri| uri == redirect_uri)
    }
}

/// Token kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// Hint passed to the revocation endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenTypeHint {
    AccessToken,
    RefreshToken,
}

impl TokenTypeHint {
    /// Parses the `token_type_hint` parameter. Unknown hints are ignored.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "access_token" => Some(Self::AccessToken),
            "refresh_token" => Some(Self::RefreshToken),
            _ => None,
        }
    }
}

/// Where a single authorization attempt stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GrantState {
    /// The authorize request is being validated; nothing is stored yet.
    Requested,
    /// A code was issued and awaits exchange.
    CodeIssued,
    /// The code was exchanged for tokens.
    Exchanged,
    /// The code outlived its TTL before a successful exchange.
    Expired,
    /// An exchange attempt presented the wrong client, redirect URI or verifier.
    Denied,
}

/// Successful token endpoint response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    pub token_type: String,
    /// Lifetime of the access token in seconds.
    pub expires_in: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub scope: ScopeSet,
}

/// Core authentication and authorization error kinds.
///
/// Every kind is terminal for the call that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// The token is not structurally valid or carries impossible timestamps.
    MalformedToken,
    /// No active signing key produced the token's tag.
    BadSignature,
    /// The token (access or refresh) is past its expiry.
    Expired,
    /// The token was revoked.
    TokenRevoked,
    /// The token is unknown to the store.
    TokenNotFound,
    /// The authorization code is unknown.
    CodeNotFound,
    /// The authorization code is past its TTL.
    CodeExpired,
    /// The authorization code was already spent.
    CodeAlreadyUsed,
    /// The redirect URI differs from the one bound to the code.
    RedirectMismatch,
    /// The PKCE verifier is missing or does not match the challenge.
    PkceMismatch,
    /// Unknown client, unregistered redirect URI or failed client authentication.
    InvalidClient,
    /// Requested scopes exceed what the client or subject may grant.
    InvalidScope,
    /// A required request parameter is missing or malformed.
    InvalidRequest,
    /// The grant type is not supported.
    UnsupportedGrantType,
    /// The caller presented no valid bearer credential.
    Unauthenticated,
    /// The caller is authenticated but lacks the required scope.
    Forbidden,
    /// Generic server-side failure (randomness or signing).
    ServerError,
}

impl AuthError {
    /// The RFC 6749 error code surfaced to external callers.
    pub fn oauth_code(&self) -> &'static str {
        match self {
            AuthError::MalformedToken
            | AuthError::BadSignature
            | AuthError::Expired
            | AuthError::TokenRevoked
            | AuthError::TokenNotFound
            | AuthError::CodeNotFound
            | AuthError::CodeExpired
            | AuthError::CodeAlreadyUsed
            | AuthError::RedirectMismatch
            | AuthError::PkceMismatch => "invalid_grant",
            AuthError::InvalidClient => "invalid_client",
            AuthError::InvalidScope => "invalid_scope",
            AuthError::InvalidRequest => "invalid_request",
            AuthError::UnsupportedGrantType => "unsupported_grant_type",
            AuthError::Unauthenticated => "invalid_token",
            AuthError::Forbidden => "insufficient_scope",
            AuthError::ServerError => "server_error",
        }
    }

    /// HTTP status used when the error leaves the process.
    pub fn status(&self) -> u16 {
        match self {
            AuthError::Unauthenticated => 401,
            AuthError::Forbidden => 403,
            AuthError::ServerError => 500,
            _ => 400,
        }
    }

    /// Description safe to hand to an external caller.
    ///
    /// Grant failures share one description so callers cannot tell an expired
    /// code from a forged refresh token.
    fn public_description(&self) -> &'static str {
        match self.oauth_code() {
            "invalid_grant" => "The provided grant is invalid, expired or revoked",
            "invalid_client" => "Client authentication failed",
            "invalid_scope" => "The requested scope is invalid",
            "invalid_request" => "The request is missing a parameter or is malformed",
            "unsupported_grant_type" => "The grant type is not supported",
            "invalid_token" => "The access token is missing or invalid",
            "insufficient_scope" => "Insufficient scope for this request",
            _ => "Internal server error",
        }
    }

    /// Convert this error into an HTTP JSON response with the proper status.
    pub fn into_response(&self) -> HttpResponse {
        let status = self.status();
        let code = self.oauth_code();
        warn!(error = ?self, error_code = code, http_status = status, "OAuth error returned");
        let body = to_vec(&json!({ "error": code, "error_description": self.public_description() }))
            .unwrap_or_default();
        let mut resp = HttpResponse::new(status)
            .header("Content-Type", "application/json")
            .header("Cache-Control", "no-store")
            .body(body);
        match self {
            AuthError::Unauthenticated => {
                resp = resp.header("WWW-Authenticate", r#"Bearer error="invalid_token""#);
            }
            AuthError::Forbidden => {
                resp = resp.header("WWW-Authenticate", r#"Bearer error="insufficient_scope""#);
            }
            _ => {}
        }
        resp
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedToken => write!(f, "Malformed token"),
            Self::BadSignature => write!(f, "Token signature does not verify"),
            Self::Expired => write!(f, "Token expired"),
            Self::TokenRevoked => write!(f, "Token revoked"),
            Self::TokenNotFound => write!(f, "Token not found"),
            Self::CodeNotFound => write!(f, "Authorization code not found"),
            Self::CodeExpired => write!(f, "Authorization code expired"),
            Self::CodeAlreadyUsed => write!(f, "Authorization code already used"),
            Self::RedirectMismatch => write!(f, "Redirect URI mismatch"),
            Self::PkceMismatch => write!(f, "PKCE verifier mismatch"),
            Self::InvalidClient => write!(f, "Invalid client"),
            Self::InvalidScope => write!(f, "Invalid scope"),
            Self::InvalidRequest => write!(f, "Invalid request"),
            Self::UnsupportedGrantType => write!(f, "Unsupported grant type"),
            Self::Unauthenticated => write!(f, "Unauthenticated"),
            Self::Forbidden => write!(f, "Forbidden"),
            Self::ServerError => write!(f, "Internal server error"),
        }
    }
}

impl std::error::Error for AuthError {}
