use std::collections::HashMap;
use std::sync::Arc;

use hitime_oauth::oauth_core::http::{encode_component, parse_form};
use hitime_oauth::{
    AuthConfig, AuthGate, AuthService, Client, HttpResponse, Identity, ManualClock, ScopeSet, SigningKey, TokenGrant,
};
use serde_json::{Value, json};

const START: i64 = 1_700_000_000;
const REDIRECT: &str = "https://a/cb";
const FORM: Option<&str> = Some("application/x-www-form-urlencoded");

fn setup() -> AuthService {
    let clock = Arc::new(ManualClock::new(START));
    let clients = vec![
        Client::public("c1", vec![REDIRECT.to_string()], ScopeSet::parse("read write")),
        Client::public("conf", vec![REDIRECT.to_string()], ScopeSet::parse("read")).with_secret("s3cret"),
    ];
    let key = SigningKey::from_secret("primary", &[5u8; 32]).unwrap();
    AuthService::in_memory_with_clock(AuthConfig::default(), key, clients, clock).unwrap()
}

fn owner() -> Identity {
    Identity::new("u1", ScopeSet::parse("read write"))
}

fn form(pairs: &[(&str, &str)]) -> Vec<u8> {
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", encode_component(k), encode_component(v)))
        .collect::<Vec<_>>()
        .join("&")
        .into_bytes()
}

fn authorize_query(client_id: &str, scope: &str, state: &str) -> String {
    String::from_utf8(form(&[
        ("response_type", "code"),
        ("client_id", client_id),
        ("redirect_uri", REDIRECT),
        ("scope", scope),
        ("state", state),
    ]))
    .unwrap()
}

fn redirect_params(resp: &HttpResponse) -> HashMap<String, String> {
    assert_eq!(resp.status, 302);
    let location = resp.get_header("Location").unwrap();
    let (base, query) = location.split_once('?').unwrap();
    assert_eq!(base, REDIRECT);
    parse_form(query)
}

fn json_body(resp: &HttpResponse) -> Value {
    serde_json::from_slice(&resp.body).unwrap()
}

async fn obtain_code(service: &AuthService) -> String {
    let resp = service.endpoints.authorize(&authorize_query("c1", "read", "xyz"), &owner()).await;
    redirect_params(&resp)["code"].clone()
}

async fn obtain_grant(service: &AuthService) -> TokenGrant {
    let code = obtain_code(service).await;
    let body = form(&[
        ("grant_type", "authorization_code"),
        ("code", code.as_str()),
        ("client_id", "c1"),
        ("redirect_uri", REDIRECT),
    ]);
    let resp = service.endpoints.token(FORM, &body).await;
    assert_eq!(resp.status, 200);
    serde_json::from_slice(&resp.body).unwrap()
}

#[tokio::test]
async fn test_authorize_redirects_with_code_and_state() {
    let service = setup();
    let resp = service.endpoints.authorize(&authorize_query("c1", "read", "xyz"), &owner()).await;
    let params = redirect_params(&resp);
    assert!(!params["code"].is_empty());
    assert_eq!(params["state"], "xyz");
    assert!(!params.contains_key("error"));
}

#[tokio::test]
async fn test_authorize_errors_go_back_to_verified_client() {
    let service = setup();

    let resp = service.endpoints.authorize(&authorize_query("c1", "admin", "s1"), &owner()).await;
    let params = redirect_params(&resp);
    assert_eq!(params["error"], "invalid_scope");
    assert_eq!(params["state"], "s1");

    let query = authorize_query("c1", "read", "s2").replace("response_type=code", "response_type=token");
    let params = redirect_params(&service.endpoints.authorize(&query, &owner()).await);
    assert_eq!(params["error"], "invalid_request");

    let query = format!("{}&code_challenge=abc&code_challenge_method=md5", authorize_query("c1", "read", "s3"));
    let params = redirect_params(&service.endpoints.authorize(&query, &owner()).await);
    assert_eq!(params["error"], "invalid_request");
}

#[tokio::test]
async fn test_authorize_never_redirects_to_unverified_uri() {
    let service = setup();

    let resp = service.endpoints.authorize(&authorize_query("nobody", "read", "s"), &owner()).await;
    assert_eq!(resp.status, 400);
    assert!(resp.get_header("Location").is_none());
    assert_eq!(json_body(&resp)["error"], "invalid_client");

    let query = String::from_utf8(form(&[
        ("response_type", "code"),
        ("client_id", "c1"),
        ("redirect_uri", "https://evil/cb"),
        ("scope", "read"),
    ]))
    .unwrap();
    let resp = service.endpoints.authorize(&query, &owner()).await;
    assert_eq!(resp.status, 400);
    assert!(resp.get_header("Location").is_none());

    let resp = service.endpoints.authorize("response_type=code&scope=read", &owner()).await;
    assert_eq!(resp.status, 400);
    assert_eq!(json_body(&resp)["error"], "invalid_request");
}

#[tokio::test]
async fn test_token_endpoint_success() {
    let service = setup();
    let code = obtain_code(&service).await;
    let body = form(&[
        ("grant_type", "authorization_code"),
        ("code", code.as_str()),
        ("client_id", "c1"),
        ("redirect_uri", REDIRECT),
    ]);
    let resp = service.endpoints.token(FORM, &body).await;

    assert_eq!(resp.status, 200);
    assert_eq!(resp.get_header("content-type"), Some("application/json"));
    assert_eq!(resp.get_header("Cache-Control"), Some("no-store"));
    let value = json_body(&resp);
    assert_eq!(value["token_type"], "bearer");
    assert_eq!(value["expires_in"], 3600);
    assert_eq!(value["scope"], "read");
    assert!(value["access_token"].as_str().is_some());
    assert!(value["refresh_token"].as_str().is_some());
}

#[tokio::test]
async fn test_token_endpoint_accepts_json_refresh() {
    let service = setup();
    let grant = obtain_grant(&service).await;
    let body = serde_json::to_vec(&json!({
        "grant_type": "refresh_token",
        "refresh_token": grant.refresh_token.clone().unwrap(),
    }))
    .unwrap();

    let resp = service.endpoints.token(Some("application/json; charset=utf-8"), &body).await;
    assert_eq!(resp.status, 200);
    let refreshed: TokenGrant = serde_json::from_slice(&resp.body).unwrap();
    assert_ne!(refreshed.access_token, grant.access_token);
    assert_eq!(refreshed.refresh_token, grant.refresh_token);
}

#[tokio::test]
async fn test_token_endpoint_errors() {
    let service = setup();

    let resp = service.endpoints.token(FORM, &form(&[("grant_type", "password")])).await;
    assert_eq!(resp.status, 400);
    assert_eq!(json_body(&resp)["error"], "unsupported_grant_type");

    let resp = service.endpoints.token(FORM, &form(&[("code", "abc")])).await;
    assert_eq!(json_body(&resp)["error"], "invalid_request");

    let resp = service.endpoints.token(Some("application/json"), b"{not json").await;
    assert_eq!(json_body(&resp)["error"], "invalid_request");

    let body = form(&[
        ("grant_type", "authorization_code"),
        ("code", "made-up"),
        ("client_id", "c1"),
        ("redirect_uri", REDIRECT),
    ]);
    let resp = service.endpoints.token(FORM, &body).await;
    assert_eq!(resp.status, 400);
    assert_eq!(resp.get_header("Cache-Control"), Some("no-store"));
    let value = json_body(&resp);
    assert_eq!(value["error"], "invalid_grant");
    assert!(value["error_description"].as_str().is_some());

    let resp = service.endpoints.token(FORM, &form(&[("grant_type", "refresh_token"), ("refresh_token", "nope")])).await;
    assert_eq!(json_body(&resp)["error"], "invalid_grant");
}

#[tokio::test]
async fn test_confidential_client_must_authenticate() {
    let service = setup();
    let resp = service.endpoints.authorize(&authorize_query("conf", "read", "s"), &owner()).await;
    let code = redirect_params(&resp)["code"].clone();

    let wrong = form(&[
        ("grant_type", "authorization_code"),
        ("code", code.as_str()),
        ("client_id", "conf"),
        ("client_secret", "guess"),
        ("redirect_uri", REDIRECT),
    ]);
    let resp = service.endpoints.token(FORM, &wrong).await;
    assert_eq!(json_body(&resp)["error"], "invalid_client");

    let right = form(&[
        ("grant_type", "authorization_code"),
        ("code", code.as_str()),
        ("client_id", "conf"),
        ("client_secret", "s3cret"),
        ("redirect_uri", REDIRECT),
    ]);
    assert_eq!(service.endpoints.token(FORM, &right).await.status, 200);
}

#[tokio::test]
async fn test_confidential_refresh_token_is_bound_to_its_client() {
    let service = setup();
    let resp = service.endpoints.authorize(&authorize_query("conf", "read", "s"), &owner()).await;
    let code = redirect_params(&resp)["code"].clone();
    let body = form(&[
        ("grant_type", "authorization_code"),
        ("code", code.as_str()),
        ("client_id", "conf"),
        ("client_secret", "s3cret"),
        ("redirect_uri", REDIRECT),
    ]);
    let grant: TokenGrant = serde_json::from_slice(&service.endpoints.token(FORM, &body).await.body).unwrap();
    let refresh_token = grant.refresh_token.unwrap();

    // Redeemed by another (public) client.
    let other = form(&[("grant_type", "refresh_token"), ("refresh_token", refresh_token.as_str()), ("client_id", "c1")]);
    let resp = service.endpoints.token(FORM, &other).await;
    assert_eq!(resp.status, 400);
    assert_eq!(json_body(&resp)["error"], "invalid_client");

    // Unknown client.
    let evil = form(&[("grant_type", "refresh_token"), ("refresh_token", refresh_token.as_str()), ("client_id", "evil")]);
    assert_eq!(json_body(&service.endpoints.token(FORM, &evil).await)["error"], "invalid_client");

    // No client authentication at all.
    let anonymous = form(&[("grant_type", "refresh_token"), ("refresh_token", refresh_token.as_str())]);
    assert_eq!(json_body(&service.endpoints.token(FORM, &anonymous).await)["error"], "invalid_client");

    // Right id, wrong secret.
    let guessed = form(&[
        ("grant_type", "refresh_token"),
        ("refresh_token", refresh_token.as_str()),
        ("client_id", "conf"),
        ("client_secret", "guess"),
    ]);
    assert_eq!(json_body(&service.endpoints.token(FORM, &guessed).await)["error"], "invalid_client");

    let owner_request = form(&[
        ("grant_type", "refresh_token"),
        ("refresh_token", refresh_token.as_str()),
        ("client_id", "conf"),
        ("client_secret", "s3cret"),
    ]);
    assert_eq!(service.endpoints.token(FORM, &owner_request).await.status, 200);
}

#[tokio::test]
async fn test_revoke_always_answers_200() {
    let service = setup();
    let grant = obtain_grant(&service).await;
    let header = format!("Bearer {}", grant.access_token);
    assert!(service.endpoints.protect(Some(header.as_str()), None).await.is_ok());

    for body in [form(&[("token", "garbage")]), Vec::new(), b"%%%".to_vec()] {
        let resp = service.endpoints.revoke(FORM, &body).await;
        assert_eq!(resp.status, 200);
        assert!(resp.body.is_empty());
    }

    let body = form(&[("token", grant.refresh_token.as_deref().unwrap()), ("token_type_hint", "refresh_token")]);
    assert_eq!(service.endpoints.revoke(FORM, &body).await.status, 200);
    assert_eq!(service.endpoints.revoke(FORM, &body).await.status, 200);

    let rejected = service.endpoints.protect(Some(header.as_str()), None).await.unwrap_err();
    assert_eq!(rejected.status, 401);
}

#[tokio::test]
async fn test_protect_distinguishes_401_and_403() {
    let service = setup();
    let grant = obtain_grant(&service).await;
    let header = format!("Bearer {}", grant.access_token);

    let ctx = service.endpoints.protect(Some(header.as_str()), Some("read")).await.unwrap();
    assert_eq!(ctx.subject(), "u1");

    let forbidden = service.endpoints.protect(Some(header.as_str()), Some("write")).await.unwrap_err();
    assert_eq!(forbidden.status, 403);
    assert_eq!(forbidden.get_header("WWW-Authenticate"), Some(r#"Bearer error="insufficient_scope""#));
    assert_eq!(json_body(&forbidden)["error"], "insufficient_scope");

    for header in [None, Some("Basic dTE6cHc="), Some("Bearer "), Some("Bearer not.a.jwt")] {
        let rejected = service.endpoints.protect(header, Some("read")).await.unwrap_err();
        assert_eq!(rejected.status, 401);
        assert_eq!(rejected.get_header("WWW-Authenticate"), Some(r#"Bearer error="invalid_token""#));
        assert_eq!(json_body(&rejected)["error"], "invalid_token");
    }
}

#[test]
fn test_bearer_token_extraction() {
    assert_eq!(AuthGate::bearer_token(Some("Bearer abc")), Some("abc"));
    assert_eq!(AuthGate::bearer_token(Some("bearer abc")), Some("abc"));
    assert_eq!(AuthGate::bearer_token(Some("  BEARER   abc  ")), Some("abc"));
    assert_eq!(AuthGate::bearer_token(Some("Bearer")), None);
    assert_eq!(AuthGate::bearer_token(Some("Bearer   ")), None);
    assert_eq!(AuthGate::bearer_token(Some("Token abc")), None);
    assert_eq!(AuthGate::bearer_token(None), None);
}
