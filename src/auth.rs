use anyhow::{bail, Context, Result};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info, warn};

use std::fmt::Debug;

use crate::client::{ApiConfig, Transport};

/// The token pair used to authorize API calls.
///
/// `access_token` is `None` until the first refresh when no access token
/// was supplied up front.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub access_token: Option<String>,
    pub refresh_token: String,
}

impl AuthContext {
    #[must_use]
    pub fn new(refresh_token: impl Into<String>, access_token: Option<String>) -> Self {
        Self {
            access_token,
            refresh_token: refresh_token.into(),
        }
    }
}

impl Debug for AuthContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthContext")
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

#[derive(Deserialize)]
struct Claims {
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
}

/// Reads the `exp` claim of a JWT access token.
///
/// The signature is not verified: the server does that when the token is
/// used, and here we only need to know whether it's worth sending.
///
/// # Errors
///
/// Returns an error if the token is not a JWT or has no usable `exp` claim.
pub fn token_expiry(access_token: &str) -> Result<DateTime<Utc>> {
    let payload = access_token
        .split('.')
        .nth(1)
        .context("access token is not a JWT")?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .context("decoding access token payload")?;
    let claims: Claims =
        serde_json::from_slice(&bytes).context("reading access token claims")?;
    DateTime::from_timestamp(claims.exp, 0).context("access token expiry out of range")
}

/// Returns a currently valid [`AuthContext`] for `auth`.
///
/// If `auth` carries an access token that hasn't expired, it is returned
/// unchanged without any network call. Otherwise the refresh token is
/// exchanged for a new pair with [`refresh_auth`].
///
/// # Errors
///
/// Returns any error from the refresh exchange.
pub fn check_auth(
    transport: &impl Transport,
    config: &ApiConfig,
    auth: &AuthContext,
) -> Result<AuthContext> {
    check_auth_at(transport, config, auth, Utc::now())
}

pub(crate) fn check_auth_at(
    transport: &impl Transport,
    config: &ApiConfig,
    auth: &AuthContext,
    now: DateTime<Utc>,
) -> Result<AuthContext> {
    if let Some(access_token) = &auth.access_token {
        match token_expiry(access_token) {
            Ok(expiry) if expiry > now => return Ok(auth.clone()),
            Ok(expiry) => debug!(%expiry, "access token expired"),
            Err(err) => warn!("can't read access token expiry, refreshing: {err:#}"),
        }
    }
    refresh_auth(transport, config, &auth.refresh_token)
}

/// Exchanges `refresh_token` for a new token pair at the identity endpoint.
///
/// # Errors
///
/// Returns an error if the request fails, the endpoint answers with a
/// non-success status, or the body lacks either token.
pub fn refresh_auth(
    transport: &impl Transport,
    config: &ApiConfig,
    refresh_token: &str,
) -> Result<AuthContext> {
    let response = transport.post_form(
        &config.token_url,
        &[(
            "Authorization",
            format!("Basic {}", config.client_credential),
        )],
        &[("refresh_token", refresh_token), ("grant_type", "refresh_token")],
    )?;
    if !response.is_success() {
        bail!(
            "token refresh failed: {} answered {}",
            config.token_url,
            response.status
        );
    }
    let tokens: TokenResponse =
        serde_json::from_slice(&response.body).context("reading token refresh response")?;
    info!("requested new access token");
    debug!(access_token = %tokens.access_token);
    Ok(AuthContext {
        access_token: Some(tokens.access_token),
        refresh_token: tokens.refresh_token,
    })
}
