//! Bearer-token exchange for the activity service
//!
//! The configuration holds a long-lived refresh token. Each sync trades it for
//! a short-lived access token unless the cached one still has at least five
//! minutes of life. The configuration store is never written here, even when
//! the service rotates the refresh token.

use alloc::string::String;
use alloc::vec::Vec;

use heapless::String as HString;
use serde::Deserialize;

use crate::config::Configuration;
use crate::net::{form_encode, Network, Request, TransportError};
use crate::retained::{CachedCredential, TOKEN_CAPACITY};
use crate::sync::check_status;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CredentialError {
    #[error("transport: {0}")]
    Transport(#[from] TransportError),
    #[error("exchange rejected with status {0}")]
    Rejected(u16),
    #[error("malformed token response")]
    Malformed,
    #[error("token longer than {} bytes", TOKEN_CAPACITY)]
    TooLong,
    #[error("token already expired")]
    Expired,
}

impl CredentialError {
    pub fn code(&self) -> &'static str {
        match self {
            CredentialError::Transport(e) => e.code(),
            CredentialError::Rejected(_) => "REJECTED",
            CredentialError::Malformed => "MALFORMED",
            CredentialError::TooLong => "TOO_LONG",
            CredentialError::Expired => "EXPIRED",
        }
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_at: Option<u64>,
    expires_in: Option<u64>,
}

/// Turn a token endpoint body into a credential valid at `now`
pub fn parse_token_response(body: &[u8], now: u64) -> Result<CachedCredential, CredentialError> {
    let response: TokenResponse =
        serde_json::from_slice(body).map_err(|_| CredentialError::Malformed)?;
    if response.access_token.is_empty() {
        return Err(CredentialError::Malformed);
    }
    let expires_at = response
        .expires_at
        .or_else(|| response.expires_in.map(|secs| now.saturating_add(secs)))
        .ok_or(CredentialError::Malformed)?;
    if expires_at <= now {
        return Err(CredentialError::Expired);
    }
    let token =
        HString::try_from(response.access_token.as_str()).map_err(|_| CredentialError::TooLong)?;
    Ok(CachedCredential { token, expires_at })
}

/// One refresh-token exchange. Never retried within a sync.
pub async fn exchange<N: Network>(
    network: &mut N,
    token_url: &str,
    config: &Configuration,
    now: u64,
) -> Result<CachedCredential, CredentialError> {
    let form = form_encode(&[
        ("client_id", config.client_id.as_str()),
        ("client_secret", config.client_secret.as_str()),
        ("refresh_token", config.refresh_token.as_str()),
        ("grant_type", "refresh_token"),
    ]);
    let mut body = Vec::new();
    let status = network
        .request(&Request::post_form(token_url, &form), &mut body)
        .await?;
    if check_status(status).is_err() {
        log::warn!("credential exchange returned {}", status);
        return Err(CredentialError::Rejected(status));
    }
    let credential = parse_token_response(&body, now)?;
    log::info!(
        "credential refreshed: {} byte token, valid {} s",
        credential.token.len(),
        credential.expires_at - now
    );
    Ok(credential)
}
