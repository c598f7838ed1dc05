//! Walks one authorization-code grant through the endpoint adapters.
//! Run with: `cargo run --example flow`
//!
//! `HITIME_OAUTH_*` variables are honoured; `RUST_LOG=hitime_oauth=debug`
//! shows every step.

use std::error::Error;

use hitime_oauth::oauth_core::config::signing_key_from_env;
use hitime_oauth::oauth_core::http::{encode_component, parse_form};
use hitime_oauth::{AuthConfig, AuthService, Client, Identity, ScopeSet, TokenGrant};
use tracing_subscriber::EnvFilter;

const REDIRECT: &str = "https://app.hitime.local/callback";
const FORM: Option<&str> = Some("application/x-www-form-urlencoded");

fn form(pairs: &[(&str, &str)]) -> String {
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", encode_component(k), encode_component(v)))
        .collect::<Vec<_>>()
        .join("&")
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AuthConfig::from_env()?;
    let clients = vec![Client::public("web", vec![REDIRECT.to_string()], ScopeSet::parse("profile events"))];
    let service = AuthService::in_memory(config, signing_key_from_env()?, clients)?;
    let sweeper = service.spawn_sweeper();

    // The hosting server has already logged the user in.
    let owner = Identity::new("user-1", ScopeSet::parse("profile events"));
    let query = form(&[
        ("response_type", "code"),
        ("client_id", "web"),
        ("redirect_uri", REDIRECT),
        ("scope", "profile"),
        ("state", "demo"),
    ]);
    let redirect = service.endpoints.authorize(&query, &owner).await;
    let location = redirect.get_header("Location").ok_or("authorize did not redirect")?;
    println!("authorize -> {} {}", redirect.status, location);
    let params = parse_form(location.split_once('?').map(|(_, q)| q).unwrap_or_default());
    let code = params.get("code").ok_or("no code in redirect")?;

    let body = form(&[
        ("grant_type", "authorization_code"),
        ("code", code.as_str()),
        ("client_id", "web"),
        ("redirect_uri", REDIRECT),
    ]);
    let resp = service.endpoints.token(FORM, body.as_bytes()).await;
    println!("token -> {}", resp.status);
    let grant: TokenGrant = serde_json::from_slice(&resp.body)?;

    let header = format!("Bearer {}", grant.access_token);
    match service.endpoints.protect(Some(header.as_str()), Some("profile")).await {
        Ok(ctx) => println!("GET /profile -> 200 for {}", ctx.subject()),
        Err(resp) => println!("GET /profile -> {}", resp.status),
    }
    if let Err(resp) = service.endpoints.protect(Some(header.as_str()), Some("events")).await {
        println!("GET /events -> {}", resp.status);
    }

    let refresh_token = grant.refresh_token.unwrap_or_default();
    let revoke = form(&[("token", refresh_token.as_str()), ("token_type_hint", "refresh_token")]);
    println!("revoke -> {}", service.endpoints.revoke(FORM, revoke.as_bytes()).await.status);
    if let Err(resp) = service.endpoints.protect(Some(header.as_str()), None).await {
        println!("GET /profile after revoke -> {}", resp.status);
    }

    sweeper.abort();
    Ok(())
}
