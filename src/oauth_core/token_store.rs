//! Ledger of issued tokens used for revocation and refresh lookups.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use super::types::{AuthError, ScopeSet, TokenKind};

/// A token as recorded at issuance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRecord {
    /// `jti` for access tokens, fingerprint of the opaque value for refresh tokens.
    pub id: String,
    pub subject: String,
    pub scopes: ScopeSet,
    pub kind: TokenKind,
    /// Client the grant was issued to. Refresh requests must come from it.
    pub client_id: String,
    pub expires_at: i64,
    /// The refresh token this token was minted from, if any.
    pub parent: Option<String>,
}

/// Trait to abstract storage of the revocation ledger.
///
/// Implementations must make `revoke` single-writer-wins per id and must
/// cascade along parent links.
#[async_trait]
pub trait TokenStore: Send + Sync + 'static {
    /// Records an issued token as live.
    async fn register(&self, record: TokenRecord) -> Result<(), AuthError>;

    /// Whether the token id was revoked. Unknown ids are not revoked.
    async fn is_revoked(&self, id: &str) -> Result<bool, AuthError>;

    /// Revokes `id` and every token minted from it. Idempotent; unknown ids
    /// are a no-op. Returns how many tokens this call newly revoked.
    async fn revoke(&self, id: &str) -> Result<usize, AuthError>;

    /// Resolves a live refresh token to the record it was issued under.
    async fn resolve_refresh(&self, id: &str, now: i64) -> Result<TokenRecord, AuthError>;

    /// Removes records that expired at or before `now`. Returns how many were removed.
    async fn sweep_expired(&self, now: i64) -> Result<usize, AuthError>;
}

#[derive(Debug)]
struct LedgerEntry {
    record: TokenRecord,
    revoked: AtomicBool,
}

/// In-memory storage backend for the token ledger.
#[derive(Clone, Default)]
pub struct InMemoryTokenStore {
    records: Arc<DashMap<String, LedgerEntry>>,
    children: Arc<DashMap<String, Vec<String>>>,
}

impl InMemoryTokenStore {
    /// Creates a new in-memory token store.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn parent_revoked(&self, parent: &str) -> bool {
        self.records
            .get(parent)
            .map(|entry| entry.revoked.load(Ordering::SeqCst))
            .unwrap_or(false)
    }
}

#[async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn register(&self, record: TokenRecord) -> Result<(), AuthError> {
        let id = record.id.clone();
        let parent = record.parent.clone();
        self.records.insert(id.clone(), LedgerEntry { record, revoked: AtomicBool::new(false) });

        if let Some(parent) = parent {
            self.children.entry(parent.clone()).or_default().push(id.clone());
            // A cascade may have run between the insert above and the edge
            // becoming visible; re-check so the child cannot escape it.
            if self.parent_revoked(&parent) {
                if let Some(entry) = self.records.get(&id) {
                    entry.revoked.store(true, Ordering::SeqCst);
                }
                debug!(token_id = %id, parent = %parent, "Registered under a revoked parent");
            }
        }
        Ok(())
    }

    async fn is_revoked(&self, id: &str) -> Result<bool, AuthError> {
        Ok(self
            .records
            .get(id)
            .map(|entry| entry.revoked.load(Ordering::SeqCst))
            .unwrap_or(false))
    }

    async fn revoke(&self, id: &str) -> Result<usize, AuthError> {
        let mut pending = vec![id.to_owned()];
        let mut seen = HashSet::new();
        let mut newly_revoked = 0;

        while let Some(current) = pending.pop() {
            if !seen.insert(current.clone()) {
                continue;
            }
            if let Some(entry) = self.records.get(&current) {
                if !entry.revoked.swap(true, Ordering::SeqCst) {
                    newly_revoked += 1;
                }
            }
            if let Some(kids) = self.children.get(&current) {
                pending.extend(kids.iter().cloned());
            }
        }
        debug!(token_id = %id, newly_revoked, "Revocation applied");
        Ok(newly_revoked)
    }

    async fn resolve_refresh(&self, id: &str, now: i64) -> Result<TokenRecord, AuthError> {
        let entry = self.records.get(id).ok_or(AuthError::TokenNotFound)?;
        if entry.record.kind != TokenKind::Refresh {
            return Err(AuthError::TokenNotFound);
        }
        if entry.revoked.load(Ordering::SeqCst) {
            return Err(AuthError::TokenRevoked);
        }
        if now >= entry.record.expires_at {
            return Err(AuthError::Expired);
        }
        Ok(entry.record.clone())
    }

    async fn sweep_expired(&self, now: i64) -> Result<usize, AuthError> {
        let before = self.records.len();
        self.records.retain(|_, entry| entry.record.expires_at > now);
        let records = self.records.clone();
        self.children.retain(|parent, kids| {
            kids.retain(|kid| records.contains_key(kid));
            records.contains_key(parent) && !kids.is_empty()
        });
        Ok(before.saturating_sub(self.records.len()))
    }
}
