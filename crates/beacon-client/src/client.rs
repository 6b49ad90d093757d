//! Authenticated HTTP client with single-flight token refresh.
//!
//! # Design
//! - Credentials are injected per dispatch from a fresh session snapshot into
//!   a copy of the caller's headers; nothing shared is mutated, so replays
//!   never duplicate or carry stale credentials.
//! - A 401 on a request that has not been retried enters the refresh
//!   protocol. The [`RefreshCoordinator`] lets one request refresh while the
//!   rest queue; every queued request is replayed once the refresh succeeds.
//! - Recovery happens at most once per request: replays are marked retried and
//!   a second 401 is terminal (session cleared, login redirect).
//! - Transport failures, timeouts included, never enter the protocol.

use std::sync::Arc;

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::endpoint::{
    HttpTokenRefresher, LoginCredentials, RefreshRequest, SharedRefresher, post_for_tokens,
};
use crate::error::{ClientError, ClientResult, ErrorBody, TENANT_CONTEXT_REQUIRED_CODE};
use crate::navigation::{HeadlessNavigator, SharedNavigator, pathname, redirect_target};
use crate::refresh::{RefreshCoordinator, RefreshLease, RefreshTicket};
use crate::session::{Session, SharedSession, TokenResponse};

/// Request description handed to [`AuthenticatedClient::send`].
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    headers: HeaderMap,
    body: Option<Value>,
    retried: bool,
}

impl ApiRequest {
    /// Request with the given method and API path.
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: HeaderMap::new(),
            body: None,
            retried: false,
        }
    }

    /// `GET` request.
    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    /// `POST` request.
    #[must_use]
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    /// `PUT` request.
    #[must_use]
    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    /// `PATCH` request.
    #[must_use]
    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    /// `DELETE` request.
    #[must_use]
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Append a query parameter.
    #[must_use]
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Set a header explicitly. An explicit `Authorization` or tenant header
    /// takes precedence over the session's.
    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Attach a JSON body.
    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Serialise and attach a JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Encode`] if the body cannot be serialised.
    pub fn with_json<B: Serialize + ?Sized>(self, body: &B) -> ClientResult<Self> {
        let value = serde_json::to_value(body).map_err(|source| ClientError::Encode {
            path: self.path.clone(),
            source,
        })?;
        Ok(self.with_body(value))
    }

    /// HTTP method.
    #[must_use]
    pub const fn method(&self) -> &Method {
        &self.method
    }

    /// API path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Caller-supplied headers (without injected credentials).
    #[must_use]
    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Whether this request already went through a refresh-and-replay.
    #[must_use]
    pub const fn is_retried(&self) -> bool {
        self.retried
    }
}

/// Headers to send for `request_headers` under `session`.
///
/// Adds `Authorization: Bearer <access token>` and the tenant-context header
/// when the session calls for them and the caller has not set them.
///
/// # Errors
///
/// Returns [`ClientError::InvalidHeader`] when a session value cannot be sent
/// as a header.
pub fn outgoing_headers(
    request_headers: &HeaderMap,
    session: &Session,
    tenant_header: &HeaderName,
) -> ClientResult<HeaderMap> {
    let mut headers = request_headers.clone();

    if !headers.contains_key(AUTHORIZATION) {
        if let Some(token) = session.bearer_token() {
            let value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|_| {
                ClientError::InvalidHeader {
                    name: AUTHORIZATION.to_string(),
                }
            })?;
            headers.insert(AUTHORIZATION, value);
        }
    }

    if !headers.contains_key(tenant_header) {
        if let Some(tenant) = session.tenant_context() {
            let value = HeaderValue::from_str(tenant).map_err(|_| ClientError::InvalidHeader {
                name: tenant_header.to_string(),
            })?;
            headers.insert(tenant_header.clone(), value);
        }
    }

    Ok(headers)
}

/// Whether `error` is a 400 complaining about missing tenant context.
///
/// Servers are expected to send the structured
/// [`TENANT_CONTEXT_REQUIRED_CODE`]; a message naming the tenant header is
/// accepted for servers that only send text.
#[must_use]
pub fn is_tenant_context_missing(error: &ClientError, tenant_header: &HeaderName) -> bool {
    let ClientError::Status { status, body, .. } = error else {
        return false;
    };
    if *status != StatusCode::BAD_REQUEST {
        return false;
    }
    if body.code() == Some(TENANT_CONTEXT_REQUIRED_CODE) {
        return true;
    }
    body.message()
        .is_some_and(|message| message.to_ascii_lowercase().contains(tenant_header.as_str()))
}

/// HTTP client for the admin API that injects credentials and recovers from
/// expired access tokens.
///
/// Cloning is cheap and clones share the session, navigator and refresh
/// coordination.
#[derive(Clone)]
pub struct AuthenticatedClient {
    http: Client,
    config: Arc<ClientConfig>,
    session: SharedSession,
    navigator: SharedNavigator,
    refresher: SharedRefresher,
    refresh: RefreshCoordinator,
}

/// Builder for [`AuthenticatedClient`].
pub struct ClientBuilder {
    config: ClientConfig,
    session: SharedSession,
    navigator: Option<SharedNavigator>,
    refresher: Option<SharedRefresher>,
    http: Option<Client>,
}

impl ClientBuilder {
    /// Use a navigator for authentication redirects (default: headless).
    #[must_use]
    pub fn navigator(mut self, navigator: SharedNavigator) -> Self {
        self.navigator = Some(navigator);
        self
    }

    /// Use a custom refresh endpoint implementation.
    #[must_use]
    pub fn refresher(mut self, refresher: SharedRefresher) -> Self {
        self.refresher = Some(refresher);
        self
    }

    /// Use a preconfigured HTTP client (connection reuse, default headers).
    ///
    /// The configured timeout is not applied to a supplied client.
    #[must_use]
    pub fn http_client(mut self, client: Client) -> Self {
        self.http = Some(client);
        self
    }

    /// Build the client.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::HttpClientBuild`] if the HTTP client cannot be
    /// constructed, or [`ClientError::InvalidUrl`] if the refresh endpoint
    /// does not form a valid URL.
    pub fn build(self) -> ClientResult<AuthenticatedClient> {
        let http = match self.http {
            Some(http) => http,
            None => Client::builder()
                .timeout(self.config.timeout)
                .build()
                .map_err(|source| ClientError::HttpClientBuild { source })?,
        };
        let refresher = match self.refresher {
            Some(refresher) => refresher,
            None => Arc::new(HttpTokenRefresher::new(
                http.clone(),
                self.config.endpoint(&self.config.refresh_path)?,
            )),
        };

        Ok(AuthenticatedClient {
            http,
            config: Arc::new(self.config),
            session: self.session,
            navigator: self
                .navigator
                .unwrap_or_else(|| Arc::new(HeadlessNavigator)),
            refresher,
            refresh: RefreshCoordinator::new(),
        })
    }
}

impl AuthenticatedClient {
    /// Start building a client for `config` backed by `session`.
    #[must_use]
    pub fn builder(config: ClientConfig, session: SharedSession) -> ClientBuilder {
        ClientBuilder {
            config,
            session,
            navigator: None,
            refresher: None,
            http: None,
        }
    }

    /// Client configuration.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Snapshot of the current session.
    #[must_use]
    pub fn session(&self) -> Session {
        self.session.state()
    }

    /// Refresh coordination state, for diagnostics.
    #[must_use]
    pub const fn refresh_coordinator(&self) -> &RefreshCoordinator {
        &self.refresh
    }

    /// Change the tenant a platform-wide user acts on.
    pub fn select_tenant(&self, tenant_id: Option<String>) {
        self.session.select_tenant(tenant_id);
    }

    /// `GET` a path and parse the JSON response.
    ///
    /// # Errors
    ///
    /// See [`AuthenticatedClient::send`].
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> ClientResult<T> {
        self.send(ApiRequest::get(path)).await
    }

    /// `GET` a path with query parameters and parse the JSON response.
    ///
    /// # Errors
    ///
    /// See [`AuthenticatedClient::send`].
    pub async fn get_with_query<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> ClientResult<T> {
        let request = query
            .iter()
            .fold(ApiRequest::get(path), |request, (key, value)| {
                request.with_query(*key, *value)
            });
        self.send(request).await
    }

    /// `POST` a JSON body and parse the JSON response.
    ///
    /// # Errors
    ///
    /// See [`AuthenticatedClient::send`].
    pub async fn post<B, T>(&self, path: &str, body: &B) -> ClientResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send(ApiRequest::post(path).with_json(body)?).await
    }

    /// `PUT` a JSON body and parse the JSON response.
    ///
    /// # Errors
    ///
    /// See [`AuthenticatedClient::send`].
    pub async fn put<B, T>(&self, path: &str, body: &B) -> ClientResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send(ApiRequest::put(path).with_json(body)?).await
    }

    /// `PATCH` a JSON body and parse the JSON response.
    ///
    /// # Errors
    ///
    /// See [`AuthenticatedClient::send`].
    pub async fn patch<B, T>(&self, path: &str, body: &B) -> ClientResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send(ApiRequest::patch(path).with_json(body)?).await
    }

    /// `DELETE` a path and parse the JSON response (empty bodies parse as `null`).
    ///
    /// # Errors
    ///
    /// See [`AuthenticatedClient::send`].
    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> ClientResult<T> {
        self.send(ApiRequest::delete(path)).await
    }

    /// Send a request through the refresh protocol and parse the JSON response.
    ///
    /// # Errors
    ///
    /// - [`ClientError::Transport`] for network failures and timeouts.
    /// - [`ClientError::Status`] for error statuses that were not recovered.
    /// - [`ClientError::Refresh`] when the token refresh this request depended on failed.
    /// - [`ClientError::Decode`] when the response body does not match `T`.
    pub async fn send<T: DeserializeOwned>(&self, request: ApiRequest) -> ClientResult<T> {
        let path = request.path.clone();
        let bytes = self.execute(request).await?;
        decode_body(&path, &bytes)
    }

    /// Log in with email and password and store the resulting tokens.
    ///
    /// # Errors
    ///
    /// Returns the login endpoint's failure unchanged; the session is left as is.
    pub async fn login(&self, credentials: &LoginCredentials) -> ClientResult<TokenResponse> {
        let endpoint = self.config.endpoint(&self.config.login_path)?;
        let tokens = post_for_tokens(&self.http, &endpoint, credentials).await?;
        self.session.apply_token_response(&tokens);
        info!(session_id = ?tokens.session_id, "logged in");
        Ok(tokens)
    }

    /// Revoke the held refresh token (best effort) and clear the session.
    pub async fn logout(&self) {
        let session = self.session.state();
        if let Some(refresh_token) = session.refresh_token() {
            let revoke = ApiRequest::post(self.config.logout_path.clone())
                .with_json(&RefreshRequest { refresh_token });
            let outcome = match revoke {
                Ok(request) => self.dispatch(&request, &session).await.map(|_| ()),
                Err(err) => Err(err),
            };
            if let Err(err) = outcome {
                debug!(error = %err, "refresh token revocation failed");
            }
        }
        self.session.clear_session();
        info!("logged out");
    }

    async fn execute(&self, mut request: ApiRequest) -> ClientResult<Vec<u8>> {
        loop {
            let sent_with = self.session.state();
            let error = match self.dispatch(&request, &sent_with).await {
                Ok(bytes) => return Ok(bytes),
                Err(error) => error,
            };
            self.recover(&mut request, &sent_with, error).await?;
        }
    }

    async fn dispatch(&self, request: &ApiRequest, session: &Session) -> ClientResult<Vec<u8>> {
        let headers = outgoing_headers(&request.headers, session, &self.config.tenant_header)?;
        let url = self.config.endpoint(&request.path)?;
        let transport = |source| ClientError::Transport {
            method: request.method.clone(),
            path: request.path.clone(),
            source,
        };

        let mut builder = self
            .http
            .request(request.method.clone(), url)
            .headers(headers);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(transport)?;
        let status = response.status();
        let bytes = response.bytes().await.map_err(transport)?;
        debug!(
            method = %request.method,
            path = %request.path,
            status = status.as_u16(),
            retried = request.retried,
            "api request completed"
        );

        if status.is_success() {
            Ok(bytes.to_vec())
        } else {
            Err(ClientError::Status {
                method: request.method.clone(),
                path: request.path.clone(),
                status,
                body: ErrorBody::from_bytes(&bytes),
            })
        }
    }

    /// Decide what a failed dispatch turns into: `Ok` means replay the request.
    async fn recover(
        &self,
        request: &mut ApiRequest,
        sent_with: &Session,
        error: ClientError,
    ) -> ClientResult<()> {
        let session = self.session.state();

        if session.is_platform_user()
            && is_tenant_context_missing(&error, &self.config.tenant_header)
        {
            self.nudge_tenant_selection();
        }

        if !error.is_unauthorized() {
            return Err(error);
        }

        if session.refresh_token().is_none() || request.retried {
            self.expire_session(request);
            return Err(error);
        }
        request.retried = true;

        // Credentials rotated while this request was in flight: the 401 is
        // stale, replay with the new token instead of refreshing again.
        if rotated_since(request, sent_with, &session) {
            debug!(path = %request.path, "replaying with rotated access token");
            return Ok(());
        }

        match self.refresh.acquire_or_wait() {
            RefreshTicket::Waiter(pending) => {
                debug!(path = %request.path, "queued behind in-flight token refresh");
                pending
                    .wait()
                    .await
                    .map_err(|source| ClientError::Refresh { source })
            }
            RefreshTicket::Leader(lease) => {
                // A refresh may have settled between the snapshot above and
                // taking the lease; its tokens must not be refreshed again.
                let current = self.session.state();
                if rotated_since(request, sent_with, &current) {
                    let released = lease.settle(Ok(()));
                    debug!(
                        path = %request.path,
                        released,
                        "refresh already settled; replaying with rotated access token"
                    );
                    return Ok(());
                }
                let Some(refresh_token) = current.refresh_token().map(str::to_owned) else {
                    lease.settle(Ok(()));
                    self.expire_session(request);
                    return Err(error);
                };
                self.refresh_tokens(lease, &refresh_token).await
            }
        }
    }

    async fn refresh_tokens(&self, lease: RefreshLease, refresh_token: &str) -> ClientResult<()> {
        match self.refresher.refresh(refresh_token).await {
            Ok(tokens) => {
                self.session.apply_token_response(&tokens);
                let released = lease.settle(Ok(()));
                info!(released, "access token refreshed");
                Ok(())
            }
            Err(error) => {
                let error = Arc::new(error);
                let released = lease.settle(Err(Arc::clone(&error)));
                self.session.clear_session();
                warn!(released, error = %error, "token refresh failed; session cleared");
                Err(ClientError::Refresh { source: error })
            }
        }
    }

    fn expire_session(&self, request: &ApiRequest) {
        self.session.clear_session();
        warn!(
            path = %request.path,
            retried = request.retried,
            "authentication rejected; session cleared"
        );

        let Some(current) = self.navigator.current_location() else {
            return;
        };
        let login_page = self.config.login_page.as_str();
        if pathname(&current) != login_page {
            self.navigator
                .replace(&redirect_target(login_page, &current, login_page));
        }
    }

    fn nudge_tenant_selection(&self) {
        let Some(current) = self.navigator.current_location() else {
            return;
        };
        let selection_page = self.config.tenant_selection_page.as_str();
        if pathname(&current) == selection_page {
            return;
        }
        debug!(location = %current, "tenant context missing; routing to tenant selection");
        self.navigator.replace(&redirect_target(
            selection_page,
            &current,
            &self.config.login_page,
        ));
    }
}

/// Whether the session's access token changed since `request` was sent with `sent_with`.
fn rotated_since(request: &ApiRequest, sent_with: &Session, current: &Session) -> bool {
    !request.headers.contains_key(AUTHORIZATION)
        && current.bearer_token().is_some()
        && current.bearer_token() != sent_with.bearer_token()
}

fn decode_body<T: DeserializeOwned>(path: &str, bytes: &[u8]) -> ClientResult<T> {
    let bytes = if bytes.iter().all(u8::is_ascii_whitespace) {
        b"null".as_slice()
    } else {
        bytes
    };
    serde_json::from_slice(bytes).map_err(|source| ClientError::Decode {
        path: path.to_string(),
        source,
    })
}
