//! Access token inspection and renewal.
//!
//! The push channel and the REST collaborators authenticate with a bearer
//! JWT owned by the surrounding session. This module decides whether the
//! held token is still usable and serializes refreshes so concurrent
//! callers never trigger duplicate renewals.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine as _;
use chrono::Utc;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use crate::error::{NotifyError, Result};

/// Seconds before the recorded expiry at which a token is already treated
/// as expired, covering clock skew and request latency.
pub const EXPIRY_LEEWAY_SECS: i64 = 30;

/// Source of access tokens for the session.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Currently held access token, if any.
    async fn access_token(&self) -> Option<String>;

    /// Obtain a fresh token. `Ok(None)` means the backend declined without
    /// a transport failure, e.g. the session was revoked.
    async fn refresh(&self) -> Result<Option<String>>;
}

#[derive(Debug, Deserialize)]
struct AccessClaims {
    #[serde(default)]
    exp: Option<i64>,
}

/// Decode the payload segment of a compact JWT without verifying it.
///
/// This side never holds the signing key; only the expiry claim matters.
fn decode_claims(token: &str) -> Option<AccessClaims> {
    let mut segments = token.split('.');
    let _header = segments.next()?;
    let payload = segments.next()?;
    segments.next()?;
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload.as_bytes())
        .ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Whether `token` is malformed or inside the expiry leeway.
///
/// A token whose claims carry no `exp` never expires.
pub fn is_expired(token: &str) -> bool {
    let Some(claims) = decode_claims(token) else {
        return true;
    };
    match claims.exp {
        Some(exp) => exp - Utc::now().timestamp() < EXPIRY_LEEWAY_SECS,
        None => false,
    }
}

/// Token supplier that refreshes through a [`CredentialProvider`] with
/// single-flight semantics.
pub struct TokenGuard {
    provider: Arc<dyn CredentialProvider>,
    refresh_lock: Mutex<()>,
}

impl TokenGuard {
    pub fn new(provider: Arc<dyn CredentialProvider>) -> Self {
        Self {
            provider,
            refresh_lock: Mutex::new(()),
        }
    }

    /// Return a token that is outside the expiry leeway, refreshing at most
    /// once when the held token is unusable.
    ///
    /// Concurrent callers serialize on the refresh lock; whoever arrives
    /// second re-checks the stored token and rides on the first refresh.
    #[instrument(skip(self))]
    pub async fn valid_token(&self) -> Result<String> {
        if let Some(token) = self.provider.access_token().await
            && !is_expired(&token)
        {
            return Ok(token);
        }

        let _guard = self.refresh_lock.lock().await;

        if let Some(token) = self.provider.access_token().await
            && !is_expired(&token)
        {
            debug!("Token already refreshed by a concurrent caller");
            return Ok(token);
        }

        debug!("Access token missing or expiring, refreshing");
        match self.provider.refresh().await? {
            Some(token) => Ok(token),
            None => Err(NotifyError::credential("Token refresh produced no token")),
        }
    }
}
