//! Framework-agnostic adapters for `/oauth/authorize`, `/oauth/token`,
//! `/oauth/revoke` and bearer-protected routes.
//!
//! Routing, request parsing and resource-owner login belong to the hosting
//! server; these adapters take the raw pieces they need and return an
//! [`HttpResponse`].

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use super::code_store::PkceChallenge;
use super::context::AuthContext;
use super::flow::{AuthorizationRequest, OAuthFlowController};
use super::gate::AuthGate;
use super::http::{HttpResponse, append_query, parse_form};
use super::types::{AuthError, Identity, ScopeSet, TokenGrant, TokenTypeHint};

#[derive(Clone)]
pub struct OAuthEndpoints {
    flow: Arc<OAuthFlowController>,
    gate: AuthGate,
}

impl OAuthEndpoints {
    pub fn new(flow: Arc<OAuthFlowController>, gate: AuthGate) -> Self {
        Self { flow, gate }
    }

    /// `GET /oauth/authorize` for an already logged-in resource owner.
    ///
    /// Redirects back to the client with `code` or `error`. When the client or
    /// its redirect URI cannot be verified, answers 400 instead: redirecting to
    /// an unverified URI would make this an open redirector.
    pub async fn authorize(&self, query: &str, owner: &Identity) -> HttpResponse {
        let params = parse_form(query);
        let state = non_empty(&params, "state");
        let (Some(client_id), Some(redirect_uri)) = (non_empty(&params, "client_id"), non_empty(&params, "redirect_uri"))
        else {
            return AuthError::InvalidRequest.into_response();
        };
        match self.flow.clients().get_client(client_id).await {
            Ok(client) if client.is_registered_redirect(redirect_uri) => {}
            _ => {
                warn!(client_id, "Authorize request with unverifiable client or redirect URI");
                return AuthError::InvalidClient.into_response();
            }
        }

        let redirect_error = |err: AuthError| redirect_to(redirect_uri, &[("error", err.oauth_code())], state);

        if params.get("response_type").map(String::as_str) != Some("code") {
            return redirect_error(AuthError::InvalidRequest);
        }
        let scopes = ScopeSet::parse(params.get("scope").map(String::as_str).unwrap_or_default());
        let mut request = AuthorizationRequest::new(owner.clone(), client_id, redirect_uri, scopes);
        if let Some(challenge) = non_empty(&params, "code_challenge") {
            match PkceChallenge::parse(challenge, non_empty(&params, "code_challenge_method")) {
                Ok(challenge) => request = request.with_pkce(challenge),
                Err(err) => return redirect_error(err),
            }
        }

        match self.flow.authorize(request).await {
            Ok(code) => redirect_to(redirect_uri, &[("code", code.as_str())], state),
            Err(AuthError::InvalidClient) => AuthError::InvalidClient.into_response(),
            Err(err) => redirect_error(err),
        }
    }

    /// `POST /oauth/token` with a urlencoded or JSON body.
    pub async fn token(&self, content_type: Option<&str>, body: &[u8]) -> HttpResponse {
        match self.exchange(content_type, body).await {
            Ok(grant) => match serde_json::to_vec(&grant) {
                Ok(json) => HttpResponse::new(200)
                    .header("Content-Type", "application/json")
                    .header("Cache-Control", "no-store")
                    .header("Pragma", "no-cache")
                    .body(json),
                Err(_) => AuthError::ServerError.into_response(),
            },
            Err(err) => err.into_response(),
        }
    }

    async fn exchange(&self, content_type: Option<&str>, body: &[u8]) -> Result<TokenGrant, AuthError> {
        let params = parse_body(content_type, body)?;
        let client_secret = non_empty(&params, "client_secret");
        match non_empty(&params, "grant_type") {
            Some("authorization_code") => {
                let code = required(&params, "code")?;
                let client_id = required(&params, "client_id")?;
                let redirect_uri = required(&params, "redirect_uri")?;
                self.flow.clients().authenticate(client_id, client_secret).await?;
                self.flow
                    .token(code, client_id, redirect_uri, non_empty(&params, "code_verifier"))
                    .await
            }
            Some("refresh_token") => {
                let refresh_token = required(&params, "refresh_token")?;
                let client_id = non_empty(&params, "client_id");
                if let Some(client_id) = client_id {
                    self.flow.clients().authenticate(client_id, client_secret).await?;
                }
                self.flow.refresh(refresh_token, client_id).await
            }
            Some(_) => Err(AuthError::UnsupportedGrantType),
            None => Err(AuthError::InvalidRequest),
        }
    }

    /// `POST /oauth/revoke`. Always 200 with an empty body.
    pub async fn revoke(&self, content_type: Option<&str>, body: &[u8]) -> HttpResponse {
        match parse_body(content_type, body) {
            Ok(params) => {
                if let Some(token) = non_empty(&params, "token") {
                    let hint = non_empty(&params, "token_type_hint").and_then(TokenTypeHint::parse);
                    self.flow.revoke(token, hint).await;
                }
            }
            Err(_) => warn!("Unreadable revocation request ignored"),
        }
        HttpResponse::new(200)
    }

    /// Gate for protected routes: `Ok` with the caller's identity, or the 401/403 to send back.
    pub async fn protect(&self, authorization: Option<&str>, required_scope: Option<&str>) -> Result<AuthContext, HttpResponse> {
        self.gate
            .guard(authorization, required_scope)
            .await
            .map_err(|err| err.into_response())
    }
}

fn redirect_to(redirect_uri: &str, pairs: &[(&str, &str)], state: Option<&str>) -> HttpResponse {
    let mut all: Vec<(&str, &str)> = pairs.to_vec();
    if let Some(state) = state {
        all.push(("state", state));
    }
    HttpResponse::redirect(append_query(redirect_uri, &all))
}

fn non_empty<'a>(params: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    params.get(key).map(String::as_str).filter(|v| !v.is_empty())
}

fn required<'a>(params: &'a HashMap<String, String>, key: &str) -> Result<&'a str, AuthError> {
    non_empty(params, key).ok_or(AuthError::InvalidRequest)
}

/// Reads a form or JSON body into string parameters. Non-string JSON values are dropped.
fn parse_body(content_type: Option<&str>, body: &[u8]) -> Result<HashMap<String, String>, AuthError> {
    let is_json = content_type
        .map(|ct| ct.trim().to_ascii_lowercase().starts_with("application/json"))
        .unwrap_or(false);
    if is_json {
        let object: serde_json::Map<String, Value> =
            serde_json::from_slice(body).map_err(|_| AuthError::InvalidRequest)?;
        Ok(object
            .into_iter()
            .filter_map(|(k, v)| match v {
                Value::String(s) => Some((k, s)),
                _ => None,
            })
            .collect())
    } else {
        let text = std::str::from_utf8(body).map_err(|_| AuthError::InvalidRequest)?;
        Ok(parse_form(text))
    }
}
