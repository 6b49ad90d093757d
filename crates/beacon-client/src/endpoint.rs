//! Token endpoints: refresh-token exchange and password login.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, Method, Url};
use serde::Serialize;

use crate::error::{ClientError, ErrorBody};
use crate::session::TokenResponse;

/// Remote call exchanging a refresh token for a new token pair.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    /// Exchange `refresh_token` for a fresh token response.
    async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, ClientError>;
}

/// Shared reference to a token refresher.
pub type SharedRefresher = Arc<dyn TokenRefresher>;

/// Refresher posting `{"refreshToken": ...}` to the API's refresh endpoint.
///
/// Uses the bare HTTP client: no credential injection and no refresh
/// protocol, so a rejected refresh token surfaces directly.
#[derive(Debug, Clone)]
pub struct HttpTokenRefresher {
    http: Client,
    endpoint: Url,
}

impl HttpTokenRefresher {
    /// Refresher targeting `endpoint`.
    #[must_use]
    pub const fn new(http: Client, endpoint: Url) -> Self {
        Self { http, endpoint }
    }

    /// Absolute refresh endpoint.
    #[must_use]
    pub const fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RefreshRequest<'a> {
    pub(crate) refresh_token: &'a str,
}

#[async_trait]
impl TokenRefresher for HttpTokenRefresher {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, ClientError> {
        post_for_tokens(&self.http, &self.endpoint, &RefreshRequest { refresh_token }).await
    }
}

/// Email and password accepted by the login endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct LoginCredentials {
    /// Login email.
    pub email: String,
    /// Account password.
    pub password: String,
}

impl LoginCredentials {
    /// Credential pair from its parts.
    #[must_use]
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

/// POST a JSON body to a token endpoint and parse the token response.
pub(crate) async fn post_for_tokens<B: Serialize + Sync + ?Sized>(
    http: &Client,
    endpoint: &Url,
    body: &B,
) -> Result<TokenResponse, ClientError> {
    let path = endpoint.path().to_string();
    let transport = |source| ClientError::Transport {
        method: Method::POST,
        path: path.clone(),
        source,
    };

    let response = http
        .post(endpoint.clone())
        .json(body)
        .send()
        .await
        .map_err(transport)?;
    let status = response.status();
    let bytes = response.bytes().await.map_err(transport)?;

    if !status.is_success() {
        return Err(ClientError::Status {
            method: Method::POST,
            path,
            status,
            body: ErrorBody::from_bytes(&bytes),
        });
    }

    serde_json::from_slice(&bytes).map_err(|source| ClientError::Decode { path, source })
}
