//! Session state and the store contract the client reads and mutates.
//!
//! # Design
//! - The store owns the session; the client only takes snapshots and calls the
//!   mutation methods, so embedding applications can back it with whatever
//!   persistence they need.
//! - Token responses are applied under a single write lock; readers never see
//!   a new access token paired with the old refresh token.

use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Authenticated user as reported by the login and refresh endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUser {
    /// Stable user identifier.
    pub id: String,
    /// Login email.
    pub email: String,
    /// Optional display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Platform-wide users are not scoped to a single tenant and must pick one per request.
    #[serde(default)]
    pub is_platform_user: bool,
    /// Home tenant for tenant-scoped users.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    /// Role names granted to the user.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
}

/// Tenant the current user may act on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantSummary {
    /// Tenant identifier sent in the tenant-context header.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Optional URL slug.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
}

/// Token pair and session metadata returned by login and refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    /// Short-lived bearer credential.
    pub access_token: String,
    /// Long-lived credential exchanged for new token pairs.
    pub refresh_token: String,
    /// Access token expiry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token_expires_at: Option<DateTime<Utc>>,
    /// Refresh token expiry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token_expires_at: Option<DateTime<Utc>>,
    /// Server-side session identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// User bound to the tokens; absent responses keep the current user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<SessionUser>,
    /// Tenants the user may select, when the server includes them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accessible_tenants: Option<Vec<TenantSummary>>,
}

/// Snapshot of the authentication session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Bearer credential for outbound requests.
    pub access_token: Option<String>,
    /// Credential used to obtain a new token pair.
    pub refresh_token: Option<String>,
    /// Access token expiry.
    pub access_token_expires_at: Option<DateTime<Utc>>,
    /// Refresh token expiry.
    pub refresh_token_expires_at: Option<DateTime<Utc>>,
    /// Server-side session identifier.
    pub session_id: Option<String>,
    /// Tenant chosen by a platform-wide user.
    pub selected_tenant: Option<String>,
    /// Authenticated user.
    pub user: Option<SessionUser>,
    /// Tenants the user may select.
    #[serde(default)]
    pub accessible_tenants: Vec<TenantSummary>,
}

impl Session {
    /// Session holding only a token pair.
    #[must_use]
    pub fn with_tokens(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: Some(access_token.into()),
            refresh_token: Some(refresh_token.into()),
            ..Self::default()
        }
    }

    /// Attach a user to the session.
    #[must_use]
    pub fn with_user(mut self, user: SessionUser) -> Self {
        self.user = Some(user);
        self
    }

    /// Select a tenant on the session.
    #[must_use]
    pub fn with_selected_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.selected_tenant = Some(tenant_id.into());
        self
    }

    /// Access token to present, if one is set and non-empty.
    #[must_use]
    pub fn bearer_token(&self) -> Option<&str> {
        self.access_token.as_deref().filter(|token| !token.is_empty())
    }

    /// Refresh token, if one is set and non-empty.
    #[must_use]
    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token
            .as_deref()
            .filter(|token| !token.is_empty())
    }

    /// Whether the current user spans tenants.
    #[must_use]
    pub fn is_platform_user(&self) -> bool {
        self.user.as_ref().is_some_and(|user| user.is_platform_user)
    }

    /// Tenant to send as request context: only for platform users with a selection.
    #[must_use]
    pub fn tenant_context(&self) -> Option<&str> {
        if !self.is_platform_user() {
            return None;
        }
        self.selected_tenant
            .as_deref()
            .filter(|tenant| !tenant.is_empty())
    }

    /// Whether the session holds an access token.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.bearer_token().is_some()
    }

    /// Replace token fields and user with the contents of a token response.
    ///
    /// The tenant selection survives only while it stays meaningful: the user
    /// must still be platform-wide and, when the response lists accessible
    /// tenants, the selection must be one of them.
    pub fn apply_token_response(&mut self, response: &TokenResponse) {
        self.access_token = Some(response.access_token.clone());
        self.refresh_token = Some(response.refresh_token.clone());
        self.access_token_expires_at = response.access_token_expires_at;
        self.refresh_token_expires_at = response.refresh_token_expires_at;
        self.session_id.clone_from(&response.session_id);
        if let Some(user) = &response.user {
            self.user = Some(user.clone());
        }
        if let Some(tenants) = &response.accessible_tenants {
            self.accessible_tenants.clone_from(tenants);
        }

        let selection_valid = self.is_platform_user()
            && self.selected_tenant.as_deref().is_some_and(|selected| {
                response.accessible_tenants.as_ref().is_none_or(|tenants| {
                    tenants.is_empty() || tenants.iter().any(|tenant| tenant.id == selected)
                })
            });
        if !selection_valid {
            self.selected_tenant = None;
        }
    }
}

/// Store that owns the session the client authenticates with.
pub trait SessionStore: Send + Sync {
    /// Snapshot of the current session.
    fn state(&self) -> Session;
    /// Replace the token pair and user atomically.
    fn apply_token_response(&self, response: &TokenResponse);
    /// Reset to an unauthenticated session.
    fn clear_session(&self);
    /// Change the tenant a platform-wide user acts on.
    fn select_tenant(&self, tenant_id: Option<String>);
}

/// Shared reference to the session store.
pub type SharedSession = Arc<dyn SessionStore>;

/// Process-local session store.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    session: RwLock<Session>,
}

impl InMemorySessionStore {
    /// Store seeded with the provided session.
    #[must_use]
    pub const fn new(session: Session) -> Self {
        Self {
            session: RwLock::new(session),
        }
    }

    /// Store wrapped for sharing with a client.
    #[must_use]
    pub fn shared(session: Session) -> Arc<Self> {
        Arc::new(Self::new(session))
    }
}

impl SessionStore for InMemorySessionStore {
    fn state(&self) -> Session {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn apply_token_response(&self, response: &TokenResponse) {
        self.session
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .apply_token_response(response);
    }

    fn clear_session(&self) {
        *self.session.write().unwrap_or_else(PoisonError::into_inner) = Session::default();
    }

    fn select_tenant(&self, tenant_id: Option<String>) {
        self.session
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .selected_tenant = tenant_id;
    }
}
