//! Client configuration.

use std::time::Duration;

use reqwest::Url;
use reqwest::header::HeaderName;

use crate::error::ClientError;

/// Per-request timeout applied to API calls and the refresh call alike.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(25);
/// Header carrying the tenant a platform-wide user acts on.
pub const DEFAULT_TENANT_HEADER: &str = "x-tenant-id";
/// Login page of the admin application.
pub const DEFAULT_LOGIN_PAGE: &str = "/login";
/// Tenant selection page of the admin application.
pub const DEFAULT_TENANT_SELECTION_PAGE: &str = "/select-tenant";
/// API path exchanging refresh tokens.
pub const DEFAULT_REFRESH_PATH: &str = "/auth/refresh";
/// API path accepting email/password logins.
pub const DEFAULT_LOGIN_PATH: &str = "/auth/login";
/// API path revoking a refresh token.
pub const DEFAULT_LOGOUT_PATH: &str = "/auth/logout";

/// Settings for an [`AuthenticatedClient`](crate::AuthenticatedClient).
///
/// Only the API base URL is required; everything else has a default and a
/// `with_*` override.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct ClientConfig {
    pub(crate) base_url: Url,
    pub(crate) timeout: Duration,
    pub(crate) tenant_header: HeaderName,
    pub(crate) login_page: String,
    pub(crate) tenant_selection_page: String,
    pub(crate) refresh_path: String,
    pub(crate) login_path: String,
    pub(crate) logout_path: String,
}

impl ClientConfig {
    /// Configuration for the API at `base_url`.
    #[must_use]
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            timeout: DEFAULT_TIMEOUT,
            tenant_header: HeaderName::from_static(DEFAULT_TENANT_HEADER),
            login_page: DEFAULT_LOGIN_PAGE.to_string(),
            tenant_selection_page: DEFAULT_TENANT_SELECTION_PAGE.to_string(),
            refresh_path: DEFAULT_REFRESH_PATH.to_string(),
            login_path: DEFAULT_LOGIN_PATH.to_string(),
            logout_path: DEFAULT_LOGOUT_PATH.to_string(),
        }
    }

    /// Override the request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Override the tenant-context header name.
    #[must_use]
    pub fn with_tenant_header(mut self, header: HeaderName) -> Self {
        self.tenant_header = header;
        self
    }

    /// Override the login page used for terminal authentication redirects.
    #[must_use]
    pub fn with_login_page(mut self, page: impl Into<String>) -> Self {
        self.login_page = page.into();
        self
    }

    /// Override the tenant selection page.
    #[must_use]
    pub fn with_tenant_selection_page(mut self, page: impl Into<String>) -> Self {
        self.tenant_selection_page = page.into();
        self
    }

    /// Override the refresh endpoint path.
    #[must_use]
    pub fn with_refresh_path(mut self, path: impl Into<String>) -> Self {
        self.refresh_path = path.into();
        self
    }

    /// Override the login endpoint path.
    #[must_use]
    pub fn with_login_path(mut self, path: impl Into<String>) -> Self {
        self.login_path = path.into();
        self
    }

    /// Override the logout endpoint path.
    #[must_use]
    pub fn with_logout_path(mut self, path: impl Into<String>) -> Self {
        self.logout_path = path.into();
        self
    }

    /// API base URL.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Request timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Tenant-context header name.
    #[must_use]
    pub const fn tenant_header(&self) -> &HeaderName {
        &self.tenant_header
    }

    /// Login page.
    #[must_use]
    pub fn login_page(&self) -> &str {
        &self.login_page
    }

    /// Tenant selection page.
    #[must_use]
    pub fn tenant_selection_page(&self) -> &str {
        &self.tenant_selection_page
    }

    /// Absolute URL for an API path; the path is appended to the base URL's own path.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidUrl`] when the combination is not a valid URL.
    pub fn endpoint(&self, path: &str) -> Result<Url, ClientError> {
        let joined = format!(
            "{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        Url::parse(&joined).map_err(|source| ClientError::InvalidUrl {
            path: path.to_string(),
            source,
        })
    }
}
