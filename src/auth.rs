//! Bearer-token authentication for the HTTP API.
//!
//! Tokens are opaque random strings handed out once by `lms-agent user add`.
//! Only their SHA-256 digest is stored, so a leaked database does not leak
//! usable credentials.

use crate::error::{LmsError, Result};
use crate::store::{hash_secret, LmsStore, Role};
use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

const TOKEN_LEN: usize = 40;

/// The authenticated caller, available to handlers as a request extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal {
    pub id: Uuid,
    pub role: Role,
}

/// Resolves bearer tokens against the user store.
#[derive(Clone)]
pub struct Authenticator {
    store: Arc<dyn LmsStore>,
    enabled: bool,
}

impl Authenticator {
    pub fn new(store: Arc<dyn LmsStore>, enabled: bool) -> Self {
        Self { store, enabled }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Look up the owner of a raw token.
    pub async fn resolve(&self, token: &str) -> Result<Principal> {
        let user = self
            .store
            .find_user_by_token_hash(&hash_secret(token))
            .await?
            .ok_or_else(|| LmsError::Auth("Invalid token".to_string()))?;
        Ok(Principal {
            id: user.id,
            role: user.role,
        })
    }
}

/// Generate a new API token.
pub fn issue_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LEN)
        .map(char::from)
        .collect()
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

fn reject(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "message": message }))).into_response()
}

/// Middleware admitting only admins and professors.
pub async fn require_staff(
    State(auth): State<Arc<Authenticator>>,
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Response {
    if !auth.enabled() {
        return next.run(request).await;
    }

    let Some(token) = bearer_token(&headers) else {
        return reject(StatusCode::UNAUTHORIZED, "Not authorized, no token");
    };

    let principal = match auth.resolve(token).await {
        Ok(principal) => principal,
        Err(LmsError::Auth(_)) => {
            debug!("Rejected unknown API token");
            return reject(StatusCode::UNAUTHORIZED, "Not authorized, token failed");
        }
        Err(e) => {
            warn!("Token lookup failed: {}", e);
            return reject(StatusCode::INTERNAL_SERVER_ERROR, "Authentication error");
        }
    };

    if !principal.role.is_staff() {
        return reject(
            StatusCode::FORBIDDEN,
            &format!("Role {} is not authorized to access this route", principal.role),
        );
    }

    request.extensions_mut().insert(principal);
    next.run(request).await
}
