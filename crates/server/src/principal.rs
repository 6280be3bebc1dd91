//! HTTP Basic authentication against the configured user directory.

use std::collections::HashMap;

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::error::AppError;
use crate::state::AppState;

/// A configured API user.
#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub api_key: String,
}

/// The authenticated user a request acts for.
///
/// Extracting it from a request enforces authentication; handlers that take
/// a `Principal` argument are never reached without valid credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: String,
    pub username: String,
}

/// Users indexed by username.
#[derive(Debug, Default)]
pub struct UserDirectory {
    users: HashMap<String, User>,
}

impl UserDirectory {
    pub fn new(users: impl IntoIterator<Item = User>) -> Self {
        Self {
            users: users
                .into_iter()
                .map(|u| (u.username.clone(), u))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Checks `username:api_key`, comparing the key in constant time.
    pub fn authenticate(&self, username: &str, api_key: &str) -> Option<Principal> {
        let user = self.users.get(username)?;
        if user.api_key.is_empty() {
            return None;
        }
        let matches: bool = user.api_key.as_bytes().ct_eq(api_key.as_bytes()).into();
        matches.then(|| Principal {
            user_id: user.id.clone(),
            username: user.username.clone(),
        })
    }
}

/// Decodes an `Authorization: Basic <base64(user:key)>` header value.
fn parse_basic(header: &str) -> Option<(String, String)> {
    let (scheme, encoded) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, key) = decoded.split_once(':')?;
    Some((user.to_string(), key.to_string()))
}

impl FromRequestParts<AppState> for Principal {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::Unauthorized("missing credentials".into()))?;

        let (username, api_key) = parse_basic(header)
            .ok_or_else(|| AppError::Unauthorized("malformed credentials".into()))?;

        state.users.authenticate(&username, &api_key).ok_or_else(|| {
            warn!(%username, "rejected credentials");
            AppError::Unauthorized("invalid credentials".into())
        })
    }
}
