//! One-time authorization codes.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::debug;

use super::clock::Clock;
use super::crypto::{constant_time_eq, fingerprint, pkce_code_challenge, random_token};
use super::types::{AuthError, GrantState, Identity};

/// PKCE challenge bound to a code at authorization time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PkceChallenge {
    S256(String),
    Plain(String),
}

impl PkceChallenge {
    /// Builds a challenge from the `code_challenge` / `code_challenge_method` pair.
    pub fn parse(challenge: &str, method: Option<&str>) -> Result<Self, AuthError> {
        if challenge.is_empty() {
            return Err(AuthError::InvalidRequest);
        }
        match method.unwrap_or("plain") {
            "S256" => Ok(Self::S256(challenge.to_owned())),
            "plain" => Ok(Self::Plain(challenge.to_owned())),
            _ => Err(AuthError::InvalidRequest),
        }
    }

    pub fn matches(&self, verifier: &str) -> bool {
        match self {
            Self::S256(challenge) => constant_time_eq(pkce_code_challenge(verifier).as_bytes(), challenge.as_bytes()),
            Self::Plain(challenge) => constant_time_eq(verifier.as_bytes(), challenge.as_bytes()),
        }
    }
}

/// What an authorize call binds to a new code.
#[derive(Debug, Clone)]
pub struct PendingGrant {
    pub owner: Identity,
    pub client_id: String,
    pub redirect_uri: String,
    pub challenge: Option<PkceChallenge>,
}

/// Trait for issuing and consuming authorization codes.
#[async_trait]
pub trait AuthorizationCodeStore: Send + Sync + 'static {
    /// Stores `grant` under a fresh random code and returns the code.
    async fn issue(&self, grant: PendingGrant) -> Result<String, AuthError>;

    /// Spends the code in a single atomic step. Exactly one concurrent caller
    /// can succeed; the rest see `CodeAlreadyUsed`.
    async fn consume(
        &self,
        code: &str,
        client_id: &str,
        redirect_uri: &str,
        code_verifier: Option<&str>,
    ) -> Result<Identity, AuthError>;

    /// Remembers which refresh token an exchanged code produced.
    async fn attach_grant(&self, code: &str, refresh_id: &str) -> Result<(), AuthError>;

    /// Refresh token id produced by the code, if it was exchanged.
    async fn issued_grant(&self, code: &str) -> Result<Option<String>, AuthError>;

    /// Current state of the attempt behind `code`.
    async fn state(&self, code: &str) -> Result<Option<GrantState>, AuthError>;

    /// Removes codes that expired at or before `now`.
    async fn sweep_expired(&self, now: i64) -> Result<usize, AuthError>;
}

#[derive(Debug, Clone)]
struct CodeRecord {
    grant: PendingGrant,
    issued_at: i64,
    expires_at: i64,
    state: GrantState,
    refresh_id: Option<String>,
}

/// In-memory authorization code store. Codes are keyed by fingerprint.
#[derive(Clone)]
pub struct InMemoryCodeStore {
    codes: Arc<DashMap<String, CodeRecord>>,
    clock: Arc<dyn Clock>,
    ttl_secs: i64,
}

impl InMemoryCodeStore {
    pub fn new(clock: Arc<dyn Clock>, ttl_secs: u64) -> Self {
        Self { codes: Arc::new(DashMap::new()), clock, ttl_secs: i64::try_from(ttl_secs).unwrap_or(i64::MAX) }
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

#[async_trait]
impl AuthorizationCodeStore for InMemoryCodeStore {
    async fn issue(&self, grant: PendingGrant) -> Result<String, AuthError> {
        let now = self.clock.now();
        loop {
            let code = random_token()?;
            // A 256-bit collision is practically impossible, but never overwrite a live record.
            if let Entry::Vacant(slot) = self.codes.entry(fingerprint(&code)) {
                slot.insert(CodeRecord {
                    grant,
                    issued_at: now,
                    expires_at: now.saturating_add(self.ttl_secs),
                    state: GrantState::CodeIssued,
                    refresh_id: None,
                });
                return Ok(code);
            }
        }
    }

    async fn consume(
        &self,
        code: &str,
        client_id: &str,
        redirect_uri: &str,
        code_verifier: Option<&str>,
    ) -> Result<Identity, AuthError> {
        let now = self.clock.now();
        let key = fingerprint(code);
        // The entry guard holds the shard write lock for the whole check-and-set.
        let mut record = match self.codes.entry(key) {
            Entry::Occupied(slot) => slot,
            Entry::Vacant(_) => return Err(AuthError::CodeNotFound),
        };
        match record.get().state {
            GrantState::Exchanged | GrantState::Denied => return Err(AuthError::CodeAlreadyUsed),
            GrantState::Expired => {
                // Terminal and reported once more; the slot can go now.
                record.remove();
                return Err(AuthError::CodeExpired);
            }
            GrantState::CodeIssued | GrantState::Requested => {}
        }

        let rec = record.get_mut();
        if now >= rec.expires_at {
            rec.state = GrantState::Expired;
            return Err(AuthError::CodeExpired);
        }
        if rec.grant.client_id != client_id {
            rec.state = GrantState::Denied;
            return Err(AuthError::InvalidClient);
        }
        if rec.grant.redirect_uri != redirect_uri {
            rec.state = GrantState::Denied;
            return Err(AuthError::RedirectMismatch);
        }
        if let Some(challenge) = &rec.grant.challenge {
            if !code_verifier.is_some_and(|v| challenge.matches(v)) {
                rec.state = GrantState::Denied;
                return Err(AuthError::PkceMismatch);
            }
        }
        rec.state = GrantState::Exchanged;
        debug!(age_secs = now - rec.issued_at, "Authorization code exchanged");
        Ok(rec.grant.owner.clone())
    }

    async fn attach_grant(&self, code: &str, refresh_id: &str) -> Result<(), AuthError> {
        let mut rec = self.codes.get_mut(&fingerprint(code)).ok_or(AuthError::CodeNotFound)?;
        rec.refresh_id = Some(refresh_id.to_owned());
        Ok(())
    }

    async fn issued_grant(&self, code: &str) -> Result<Option<String>, AuthError> {
        Ok(self.codes.get(&fingerprint(code)).and_then(|rec| rec.refresh_id.clone()))
    }

    async fn state(&self, code: &str) -> Result<Option<GrantState>, AuthError> {
        Ok(self.codes.get(&fingerprint(code)).map(|rec| rec.state))
    }

    async fn sweep_expired(&self, now: i64) -> Result<usize, AuthError> {
        let before = self.codes.len();
        self.codes.retain(|_, rec| rec.expires_at > now);
        Ok(before.saturating_sub(self.codes.len()))
    }
}
