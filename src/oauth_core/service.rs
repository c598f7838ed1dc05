//! Wiring of the whole subsystem and its background housekeeping.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, warn};

use super::client_store::{ClientStore, InMemoryClientStore};
use super::clock::{Clock, SystemClock};
use super::code_store::{AuthorizationCodeStore, InMemoryCodeStore};
use super::config::{AuthConfig, ConfigError};
use super::endpoints::OAuthEndpoints;
use super::flow::OAuthFlowController;
use super::gate::AuthGate;
use super::jwt::TokenCodec;
use super::keys::{KeyRing, SigningKey};
use super::token_store::{InMemoryTokenStore, TokenStore};
use super::types::Client;

/// Every component of the subsystem, built once at startup and shared.
#[derive(Clone)]
pub struct AuthService {
    pub config: AuthConfig,
    pub clock: Arc<dyn Clock>,
    pub keys: Arc<KeyRing>,
    pub codec: Arc<TokenCodec>,
    pub codes: Arc<dyn AuthorizationCodeStore>,
    pub tokens: Arc<dyn TokenStore>,
    pub flow: Arc<OAuthFlowController>,
    pub gate: AuthGate,
    pub endpoints: OAuthEndpoints,
}

impl AuthService {
    /// Builds the subsystem from explicit collaborators.
    pub fn new(
        config: AuthConfig,
        signing_key: SigningKey,
        clock: Arc<dyn Clock>,
        clients: Arc<dyn ClientStore>,
        codes: Arc<dyn AuthorizationCodeStore>,
        tokens: Arc<dyn TokenStore>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let keys = Arc::new(KeyRing::new(signing_key, clock.clone()));
        let codec = Arc::new(TokenCodec::new(keys.clone(), config.algorithm, clock.clone(), config.clock_skew));
        let flow = Arc::new(OAuthFlowController::new(
            config.clone(),
            codec.clone(),
            clients,
            codes.clone(),
            tokens.clone(),
            clock.clone(),
        ));
        let gate = AuthGate::new(codec.clone(), tokens.clone());
        let endpoints = OAuthEndpoints::new(flow.clone(), gate.clone());
        Ok(Self { config, clock, keys, codec, codes, tokens, flow, gate, endpoints })
    }

    /// In-memory stores and the system clock.
    pub fn in_memory(config: AuthConfig, signing_key: SigningKey, clients: Vec<Client>) -> Result<Self, ConfigError> {
        Self::in_memory_with_clock(config, signing_key, clients, Arc::new(SystemClock::new()))
    }

    pub fn in_memory_with_clock(
        config: AuthConfig,
        signing_key: SigningKey,
        clients: Vec<Client>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        let codes = Arc::new(InMemoryCodeStore::new(clock.clone(), config.code_ttl));
        Self::new(
            config,
            signing_key,
            clock,
            Arc::new(InMemoryClientStore::new(clients)),
            codes,
            Arc::new(InMemoryTokenStore::new()),
        )
    }

    /// Rotates in a new signing key; the old one verifies for `key_grace_period`.
    pub fn rotate_key(&self, key: SigningKey) -> Result<(), ConfigError> {
        self.keys.rotate(key, self.config.key_grace_period)
    }

    /// One housekeeping pass. Returns how many codes and tokens were dropped.
    ///
    /// Token records outlive their expiry by `clock_skew`, the window in which
    /// the codec still accepts them, so a revocation is never forgotten early.
    pub async fn sweep_once(&self) -> (usize, usize) {
        let skew = i64::try_from(self.config.clock_skew).unwrap_or(i64::MAX);
        sweep(&*self.codes, &*self.tokens, &self.keys, self.clock.now(), skew).await
    }

    /// Runs [`AuthService::sweep_once`] every `sweep_interval` seconds until the handle is aborted.
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        let service = self.clone();
        let period = Duration::from_secs(self.config.sweep_interval);
        tokio::spawn(async move {
            let mut interval = time::interval(period);
            loop {
                interval.tick().await;
                service.sweep_once().await;
            }
        })
    }
}

async fn sweep(
    codes: &dyn AuthorizationCodeStore,
    tokens: &dyn TokenStore,
    keys: &KeyRing,
    now: i64,
    skew: i64,
) -> (usize, usize) {
    let dropped_codes = codes.sweep_expired(now).await.unwrap_or_else(|e| {
        warn!(error = ?e, "Code sweep failed");
        0
    });
    let dropped_tokens = tokens.sweep_expired(now.saturating_sub(skew)).await.unwrap_or_else(|e| {
        warn!(error = ?e, "Token sweep failed");
        0
    });
    let dropped_keys = keys.prune(now);
    debug!(dropped_codes, dropped_tokens, dropped_keys, "Sweep finished");
    (dropped_codes, dropped_tokens)
}
