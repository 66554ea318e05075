//! Bearer-token auth for the external HTTP surface. `POST /auth` trades the
//! operator-configured shared secret for an opaque, HMAC-signed token;
//! every other `/orchestrate` and `/blackboard` route requires
//! `Authorization: Bearer <token>`. Tokens are held in memory only —
//! restarting the server invalidates every outstanding token, which is
//! acceptable since clients are expected to re-authenticate against
//! `/health` + `/auth` on startup.
//!
//! A token is `{request_id}.{hmac}` where `hmac` is
//! [`common::crypto::sign_request`] over the request id and a fixed
//! action string, keyed by the operator's auth secret. The signature lets
//! `is_valid` reject forged tokens before ever touching the in-memory
//! store; the store only needs to track issuance time and revocation.

use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use common::crypto;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::state::AppState;

const TOKEN_ACTION: &str = "fleet-auth-token";

pub struct TokenStore {
    tokens: DashMap<String, i64>,
    ttl_secs: u64,
}

impl TokenStore {
    pub fn new(ttl_secs: u64) -> Self {
        Self { tokens: DashMap::new(), ttl_secs }
    }

    fn issue(&self, auth_secret: &str) -> String {
        let request_id = uuid::Uuid::new_v4().to_string();
        let signature = crypto::sign_request(auth_secret, &request_id, TOKEN_ACTION);
        let token = format!("{request_id}.{signature}");
        self.tokens.insert(token.clone(), now_millis());
        token
    }

    pub fn is_valid(&self, token: &str, auth_secret: &str) -> bool {
        let Some((request_id, signature)) = token.split_once('.') else {
            return false;
        };
        if !crypto::verify_signature(auth_secret, request_id, TOKEN_ACTION, signature) {
            return false;
        }
        match self.tokens.get(token) {
            Some(issued_at) => now_millis() - *issued_at < self.ttl_secs as i64 * 1000,
            None => false,
        }
    }

    pub fn prune_expired(&self) {
        let cutoff = now_millis() - self.ttl_secs as i64 * 1000;
        self.tokens.retain(|_, issued_at| *issued_at > cutoff);
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Spawns a background task that periodically drops expired tokens,
/// mirroring [`common::rate_limit::spawn_cleanup_task`]'s shape.
pub fn spawn_cleanup_task(store: std::sync::Arc<TokenStore>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            store.prune_expired();
        }
    });
}

#[derive(Deserialize)]
pub struct AuthRequest {
    secret: String,
}

#[derive(Serialize)]
pub struct AuthResponse {
    token: String,
}

pub async fn auth_handler(State(state): State<AppState>, Json(req): Json<AuthRequest>) -> Response {
    if !crypto::constant_time_eq(req.secret.as_bytes(), state.settings.auth_secret.as_bytes()) {
        return (StatusCode::UNAUTHORIZED, "invalid secret").into_response();
    }
    let token = state.tokens.issue(&state.settings.auth_secret);
    Json(AuthResponse { token }).into_response()
}

/// Rejects the request unless it carries a still-valid bearer token.
/// Called at the top of every protected handler rather than as a tower
/// layer, since a handful of routes (auth, health, metrics) must stay
/// unauthenticated.
pub fn require_bearer(headers: &HeaderMap, state: &AppState) -> Result<(), Response> {
    let token = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match token {
        Some(t) if state.tokens.is_valid(t, &state.settings.auth_secret) => Ok(()),
        _ => Err((StatusCode::UNAUTHORIZED, "missing or expired bearer token").into_response()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_token_is_valid_under_the_same_secret() {
        let store = TokenStore::new(60);
        let token = store.issue("s3cret");
        assert!(store.is_valid(&token, "s3cret"));
    }

    #[test]
    fn token_is_rejected_under_a_different_secret() {
        let store = TokenStore::new(60);
        let token = store.issue("s3cret");
        assert!(!store.is_valid(&token, "wrong-secret"));
    }

    #[test]
    fn tampering_with_the_request_id_half_invalidates_the_token() {
        let store = TokenStore::new(60);
        let token = store.issue("s3cret");
        let (_, signature) = token.split_once('.').unwrap();
        let forged = format!("{}.{signature}", uuid::Uuid::new_v4());
        assert!(!store.is_valid(&forged, "s3cret"));
    }

    #[test]
    fn malformed_token_without_a_separator_is_rejected() {
        let store = TokenStore::new(60);
        assert!(!store.is_valid("not-a-real-token", "s3cret"));
    }

    #[test]
    fn expired_token_is_rejected() {
        let store = TokenStore::new(0);
        let token = store.issue("s3cret");
        std::thread::sleep(Duration::from_millis(5));
        assert!(!store.is_valid(&token, "s3cret"));
    }

    #[test]
    fn prune_expired_drops_only_stale_tokens() {
        let store = TokenStore::new(0);
        let token = store.issue("s3cret");
        std::thread::sleep(Duration::from_millis(5));
        store.prune_expired();
        assert!(store.tokens.is_empty());
        let _ = token;
    }
}
