//! Client for the identity provider's password sign-up/sign-in endpoints.
//!
//! This module provides the `IdentityClient` struct and the `IdentityProvider`
//! trait the auth orchestrator talks to. Each call is a single request: no
//! retries and no request timeout.

use chrono::{TimeDelta, Utc};
use futures::future::{BoxFuture, FutureExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::ProviderError;

// ============================================================================
// Constants
// ============================================================================

/// Default base URL of the identity toolkit REST API
pub const DEFAULT_IDENTITY_ENDPOINT: &str = "https://identitytoolkit.googleapis.com/v1";

const SIGN_UP_PATH: &str = "accounts:signUp";
const SIGN_IN_PATH: &str = "accounts:signInWithPassword";

/// Normalized result of a successful sign-up or sign-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderAuthResponse {
    pub email: String,
    pub user_id: String,
    pub token: String,
    pub refresh_token: String,
    /// Token lifetime in seconds; always representable as an expiry instant
    pub expires_in_secs: i64,
    pub registered: Option<bool>,
}

/// Sign-up/sign-in operations of a remote identity provider.
pub trait IdentityProvider: Send + Sync {
    fn sign_up<'a>(
        &'a self,
        email: &'a str,
        password: &'a str,
    ) -> BoxFuture<'a, Result<ProviderAuthResponse, ProviderError>>;

    fn sign_in<'a>(
        &'a self,
        email: &'a str,
        password: &'a str,
    ) -> BoxFuture<'a, Result<ProviderAuthResponse, ProviderError>>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PasswordRequest<'a> {
    email: &'a str,
    password: &'a str,
    return_secure_token: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthResponseData {
    id_token: String,
    email: String,
    #[serde(default)]
    refresh_token: String,
    expires_in: String,
    local_id: String,
    #[serde(default)]
    registered: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// Identity provider client.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct IdentityClient {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl IdentityClient {
    /// Create a client for the default identity endpoint
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_endpoint(DEFAULT_IDENTITY_ENDPOINT, api_key)
    }

    pub fn with_endpoint(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        let endpoint = endpoint.into().trim_end_matches('/').to_string();
        Self {
            client: Client::new(),
            endpoint,
            api_key: api_key.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.endpoint, path)
    }

    async fn password_request(
        &self,
        path: &str,
        email: &str,
        password: &str,
    ) -> Result<ProviderAuthResponse, ProviderError> {
        let url = self.url(path);
        debug!(url = %url, email = email, "Sending identity request");

        let response = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&PasswordRequest {
                email,
                password,
                return_secure_token: true,
            })
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if status.is_success() {
            parse_auth_response(&body)
        } else {
            Err(parse_error_response(status, &body))
        }
    }
}

impl IdentityProvider for IdentityClient {
    fn sign_up<'a>(
        &'a self,
        email: &'a str,
        password: &'a str,
    ) -> BoxFuture<'a, Result<ProviderAuthResponse, ProviderError>> {
        self.password_request(SIGN_UP_PATH, email, password).boxed()
    }

    fn sign_in<'a>(
        &'a self,
        email: &'a str,
        password: &'a str,
    ) -> BoxFuture<'a, Result<ProviderAuthResponse, ProviderError>> {
        self.password_request(SIGN_IN_PATH, email, password).boxed()
    }
}

/// Parse a success body into the normalized response.
fn parse_auth_response(body: &str) -> Result<ProviderAuthResponse, ProviderError> {
    let data: AuthResponseData = serde_json::from_str(body)
        .map_err(|e| ProviderError::InvalidResponse(format!("auth response: {}", e)))?;

    let expires_in_secs = data
        .expires_in
        .trim()
        .parse::<i64>()
        .ok()
        .filter(|secs| *secs >= 0 && is_representable_lifetime(*secs))
        .ok_or_else(|| {
            ProviderError::InvalidResponse(format!("expiresIn is not a lifetime: {:?}", data.expires_in))
        })?;

    Ok(ProviderAuthResponse {
        email: data.email,
        user_id: data.local_id,
        token: data.id_token,
        refresh_token: data.refresh_token,
        expires_in_secs,
        registered: data.registered,
    })
}

/// Whether a token issued now with this lifetime has an expiry chrono can hold.
fn is_representable_lifetime(secs: i64) -> bool {
    TimeDelta::try_seconds(secs)
        .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
        .is_some()
}

/// Parse a failure body; the provider's error code lives at `error.message`.
fn parse_error_response(status: reqwest::StatusCode, body: &str) -> ProviderError {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => ProviderError::Rejected {
            code: envelope.error.message,
        },
        Err(_) => ProviderError::unrecognized(status, body),
    }
}
