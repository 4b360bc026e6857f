//! Password login and the signed session cookie.
//!
//! The password is hashed with bcrypt once at startup; the plaintext is not
//! kept. A successful login sets a cookie signed with a per-process key, so
//! sessions do not survive a restart.

use std::sync::Arc;

use axum::extract::{FromRef, FromRequestParts};
use axum::http::request::Parts;
use axum_extra::extract::cookie::{Cookie, Key, SameSite, SignedCookieJar};
use tracing::debug;

use crate::errors::{ApiError, AuthError};

/// Session cookie name.
pub const SESSION_COOKIE: &str = "boardcast-session";
const SESSION_VALUE: &str = "authenticated";

/// Holds the password hash and the cookie signing key.
#[derive(Debug)]
pub struct AuthManager {
    hash: String,
    key: Key,
}

impl AuthManager {
    /// Hash `password` with the default bcrypt cost.
    pub fn new(password: &str) -> Result<Self, AuthError> {
        Self::with_cost(password, bcrypt::DEFAULT_COST)
    }

    /// Hash `password` with an explicit bcrypt cost.
    pub fn with_cost(password: &str, cost: u32) -> Result<Self, AuthError> {
        if password.is_empty() {
            return Err(AuthError::EmptyPassword);
        }
        Ok(Self {
            hash: bcrypt::hash(password, cost)?,
            key: Key::generate(),
        })
    }

    /// Check a candidate password. Runs bcrypt on the blocking pool.
    pub async fn verify(&self, candidate: String) -> Result<bool, AuthError> {
        let hash = self.hash.clone();
        let matched =
            tokio::task::spawn_blocking(move || bcrypt::verify(candidate, &hash)).await??;
        Ok(matched)
    }

    /// Cookie signing key.
    pub fn key(&self) -> &Key {
        &self.key
    }

    /// Whether the jar carries a valid session.
    pub fn is_authenticated(jar: &SignedCookieJar) -> bool {
        jar.get(SESSION_COOKIE)
            .is_some_and(|cookie| cookie.value() == SESSION_VALUE)
    }

    /// The cookie set on login.
    pub fn session_cookie() -> Cookie<'static> {
        Cookie::build((SESSION_COOKIE, SESSION_VALUE))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .build()
    }

    /// A cookie that removes the session when passed to `SignedCookieJar::remove`.
    pub fn removal_cookie() -> Cookie<'static> {
        Cookie::build(SESSION_COOKIE).path("/").build()
    }
}

/// Extractor that rejects requests without a valid session with 401.
#[derive(Clone, Copy, Debug)]
pub struct Authenticated;

impl<S> FromRequestParts<S> for Authenticated
where
    S: Send + Sync,
    Arc<AuthManager>: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let auth = Arc::<AuthManager>::from_ref(state);
        let jar = SignedCookieJar::from_headers(&parts.headers, auth.key().clone());
        if AuthManager::is_authenticated(&jar) {
            Ok(Self)
        } else {
            debug!(path = %parts.uri.path(), "rejecting request without session");
            Err(ApiError::Unauthorized)
        }
    }
}
