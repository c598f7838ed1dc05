use std::sync::Arc;
use std::time::Duration;

use hitime_oauth::{
    AuthConfig, AuthService, AuthorizationRequest, Client, Identity, ManualClock, ScopeSet, SigningKey,
};

const START: i64 = 1_700_000_000;
const REDIRECT: &str = "https://a/cb";

fn setup(config: AuthConfig) -> (AuthService, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(START));
    let clients = vec![Client::public("c1", vec![REDIRECT.to_string()], ScopeSet::parse("read"))];
    let key = SigningKey::from_secret("primary", &[9u8; 32]).unwrap();
    let service = AuthService::in_memory_with_clock(config, key, clients, clock.clone()).unwrap();
    (service, clock)
}

fn request() -> AuthorizationRequest {
    AuthorizationRequest::new(Identity::new("u1", ScopeSet::parse("read")), "c1", REDIRECT, ScopeSet::parse("read"))
}

#[test]
fn test_invalid_config_is_rejected_at_startup() {
    let config = AuthConfig { code_ttl: 5, ..AuthConfig::default() };
    let key = SigningKey::from_secret("primary", &[9u8; 32]).unwrap();
    assert!(AuthService::in_memory(config, key, Vec::new()).is_err());
}

#[tokio::test]
async fn test_sweep_drops_expired_codes_and_tokens() {
    let (service, clock) = setup(AuthConfig::default());
    service.flow.authorize(request()).await.unwrap();
    let code = service.flow.authorize(request()).await.unwrap();
    service.flow.token(&code, "c1", REDIRECT, None).await.unwrap();

    assert_eq!(service.sweep_once().await, (0, 0));

    // Both codes are past their TTL; the access token is still inside its lifetime.
    clock.advance(120);
    assert_eq!(service.sweep_once().await, (2, 0));

    // Access token records stay until expiry plus skew.
    clock.advance(3600 - 120);
    assert_eq!(service.sweep_once().await, (0, 0));
    clock.advance(30);
    assert_eq!(service.sweep_once().await, (0, 1));
}

#[tokio::test]
async fn test_sweep_prunes_retired_keys() {
    let (service, clock) = setup(AuthConfig::default());
    service.rotate_key(SigningKey::from_secret("next", &[8u8; 32]).unwrap()).unwrap();
    assert_eq!(service.keys.snapshot().active_keys(START).count(), 2);

    clock.advance(service.config.key_grace_period as i64);
    service.sweep_once().await;
    assert_eq!(service.keys.snapshot().active_keys(START).count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_background_sweeper_runs_on_interval() {
    let config = AuthConfig { sweep_interval: 10, ..AuthConfig::default() };
    let (service, clock) = setup(config);
    service.flow.authorize(request()).await.unwrap();
    clock.advance(120);

    let handle = service.spawn_sweeper();
    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(service.sweep_once().await, (0, 0));
    handle.abort();
}
