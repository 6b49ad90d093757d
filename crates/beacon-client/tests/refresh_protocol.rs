//! End-to-end behaviour of the refresh-and-replay protocol against a mock API.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Result, anyhow};
use beacon_client::{
    ApiRequest, AuthenticatedClient, ClientConfig, ClientError, InMemorySessionStore,
    LoginCredentials, MemoryNavigator, Session, SessionStore, SessionUser, TokenResponse,
};
use futures_util::future::join_all;
use httpmock::prelude::*;
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, HeaderValue};
use serde_json::{Value, json};

struct Harness {
    client: AuthenticatedClient,
    store: Arc<InMemorySessionStore>,
    navigator: Arc<MemoryNavigator>,
}

fn harness(server: &MockServer, session: Session, location: &str) -> Result<Harness> {
    harness_with_timeout(server, session, location, Duration::from_secs(5))
}

fn harness_with_timeout(
    server: &MockServer,
    session: Session,
    location: &str,
    timeout: Duration,
) -> Result<Harness> {
    let base_url = server
        .base_url()
        .parse()
        .map_err(|_| anyhow!("valid URL"))?;
    let store = InMemorySessionStore::shared(session);
    let navigator = Arc::new(MemoryNavigator::new(location));
    let client = AuthenticatedClient::builder(
        ClientConfig::new(base_url).with_timeout(timeout),
        store.clone(),
    )
    .navigator(navigator.clone())
    .build()?;
    Ok(Harness {
        client,
        store,
        navigator,
    })
}

fn user(is_platform_user: bool) -> SessionUser {
    SessionUser {
        id: "u-1".to_string(),
        email: "ops@beacon.test".to_string(),
        display_name: Some("Ops".to_string()),
        is_platform_user,
        tenant_id: None,
        roles: Vec::new(),
    }
}

fn token_body(access: &str, refresh: &str) -> Value {
    json!({
        "accessToken": access,
        "refreshToken": refresh,
        "accessTokenExpiresAt": "2026-10-19T12:15:00Z",
        "refreshTokenExpiresAt": "2026-11-18T12:00:00Z",
        "sessionId": "s-1",
        "user": {"id": "u-1", "email": "ops@beacon.test", "isPlatformUser": false}
    })
}

#[tokio::test]
async fn expired_token_is_refreshed_and_request_replayed() -> Result<()> {
    let server = MockServer::start_async().await;
    let expired = server.mock(|when, then| {
        when.method(GET)
            .path("/v1/campaigns")
            .header("authorization", "Bearer A1");
        then.status(401).json_body(json!({"message": "token expired"}));
    });
    let refresh = server.mock(|when, then| {
        when.method(POST)
            .path("/auth/refresh")
            .json_body(json!({"refreshToken": "R1"}));
        then.status(200).json_body(token_body("A2", "R2"));
    });
    let fresh = server.mock(|when, then| {
        when.method(GET)
            .path("/v1/campaigns")
            .header("authorization", "Bearer A2");
        then.status(200).json_body(json!([{"id": 1, "name": "Autumn Sale"}]));
    });

    let h = harness(&server, Session::with_tokens("A1", "R1"), "/campaigns")?;
    let campaigns: Value = h.client.get("/v1/campaigns").await?;

    assert_eq!(campaigns, json!([{"id": 1, "name": "Autumn Sale"}]));
    expired.assert_calls(1);
    refresh.assert_calls(1);
    fresh.assert_calls(1);

    let session = h.store.state();
    assert_eq!(session.bearer_token(), Some("A2"));
    assert_eq!(session.refresh_token(), Some("R2"));
    assert_eq!(session.session_id.as_deref(), Some("s-1"));
    assert!(h.navigator.replacements().is_empty());
    assert!(!h.client.refresh_coordinator().is_refreshing());
    Ok(())
}

#[tokio::test]
async fn concurrent_unauthorized_requests_share_one_refresh() -> Result<()> {
    let server = MockServer::start_async().await;
    let expired = server.mock(|when, then| {
        when.method(GET)
            .path("/v1/venues")
            .header("authorization", "Bearer A1");
        then.status(401);
    });
    let refresh = server.mock(|when, then| {
        when.method(POST).path("/auth/refresh");
        then.status(200)
            .delay(Duration::from_millis(300))
            .json_body(token_body("A2", "R2"));
    });
    let fresh = server.mock(|when, then| {
        when.method(GET)
            .path("/v1/venues")
            .header("authorization", "Bearer A2");
        then.status(200).json_body(json!({"items": []}));
    });

    let h = harness(&server, Session::with_tokens("A1", "R1"), "/venues")?;
    let calls = (0..5).map(|_| {
        let client = h.client.clone();
        async move { client.get::<Value>("/v1/venues").await }
    });
    let results = join_all(calls).await;

    for result in results {
        assert_eq!(result?, json!({"items": []}));
    }
    expired.assert_calls(5);
    refresh.assert_calls(1);
    fresh.assert_calls(5);
    assert_eq!(h.client.refresh_coordinator().pending_waiters(), 0);
    Ok(())
}

#[tokio::test]
async fn refresh_failure_rejects_initiator_and_queued_callers() -> Result<()> {
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(GET).path("/v1/audience");
        then.status(401);
    });
    let refresh = server.mock(|when, then| {
        when.method(POST).path("/auth/refresh");
        then.status(500)
            .delay(Duration::from_millis(300))
            .json_body(json!({"message": "refresh backend down"}));
    });

    let h = harness(
        &server,
        Session::with_tokens("A1", "R1").with_user(user(false)),
        "/audience",
    )?;
    let (x, y) = tokio::join!(
        h.client.get::<Value>("/v1/audience"),
        h.client.get::<Value>("/v1/audience")
    );

    for result in [x, y] {
        let err = result
            .err()
            .ok_or_else(|| anyhow!("expected refresh failure"))?;
        assert!(matches!(err, ClientError::Refresh { .. }));
        assert_eq!(err.status(), Some(StatusCode::INTERNAL_SERVER_ERROR));
    }
    refresh.assert_calls(1);
    assert_eq!(h.store.state(), Session::default());
    assert!(!h.client.refresh_coordinator().is_refreshing());
    assert!(h.navigator.replacements().is_empty());
    Ok(())
}

#[tokio::test]
async fn replay_that_is_rejected_again_is_terminal() -> Result<()> {
    let server = MockServer::start_async().await;
    let rejected = server.mock(|when, then| {
        when.method(GET).path("/v1/venues");
        then.status(401).json_body(json!({"message": "account disabled"}));
    });
    let refresh = server.mock(|when, then| {
        when.method(POST).path("/auth/refresh");
        then.status(200).json_body(token_body("A2", "R2"));
    });

    let h = harness(&server, Session::with_tokens("A1", "R1"), "/venues?page=2")?;
    let err = h
        .client
        .get::<Value>("/v1/venues")
        .await
        .err()
        .ok_or_else(|| anyhow!("expected terminal failure"))?;

    assert_eq!(err.status(), Some(StatusCode::UNAUTHORIZED));
    rejected.assert_calls(2);
    refresh.assert_calls(1);
    assert_eq!(h.store.state(), Session::default());
    assert_eq!(
        h.navigator.replacements(),
        vec!["/login?redirect=%2Fvenues%3Fpage%3D2"]
    );
    Ok(())
}

#[tokio::test]
async fn missing_refresh_token_redirects_to_login() -> Result<()> {
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(GET).path("/v1/notifications");
        then.status(401);
    });
    let refresh = server.mock(|when, then| {
        when.method(POST).path("/auth/refresh");
        then.status(200).json_body(token_body("A2", "R2"));
    });

    let session = Session {
        access_token: Some("A1".to_string()),
        ..Session::default()
    };
    let h = harness(&server, session, "/notifications#drafts")?;
    let err = h
        .client
        .get::<Value>("/v1/notifications")
        .await
        .err()
        .ok_or_else(|| anyhow!("expected unauthorized"))?;

    assert!(err.is_unauthorized());
    refresh.assert_calls(0);
    assert_eq!(h.store.state(), Session::default());
    assert_eq!(h.navigator.location(), "/login?redirect=%2Fnotifications%23drafts");
    Ok(())
}

#[tokio::test]
async fn terminal_failure_on_login_page_adds_no_redirect_parameter() -> Result<()> {
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(GET).path("/v1/me");
        then.status(401);
    });

    let session = Session {
        access_token: Some("A1".to_string()),
        ..Session::default()
    };
    let h = harness(&server, session, "/login")?;
    let result = h.client.get::<Value>("/v1/me").await;

    assert!(result.is_err());
    assert_eq!(h.navigator.location(), "/login");
    assert!(
        h.navigator
            .replacements()
            .iter()
            .all(|target| !target.contains("redirect"))
    );
    Ok(())
}

#[tokio::test]
async fn tenant_context_error_routes_platform_user_to_selection() -> Result<()> {
    let server = MockServer::start_async().await;
    let venues = server.mock(|when, then| {
        when.method(GET).path("/v1/venues");
        then.status(400)
            .json_body(json!({"message": "X-Tenant-Id header is required"}));
    });

    let h = harness(
        &server,
        Session::with_tokens("A1", "R1").with_user(user(true)),
        "/venues?sort=name",
    )?;
    let err = h
        .client
        .get::<Value>("/v1/venues")
        .await
        .err()
        .ok_or_else(|| anyhow!("expected bad request"))?;

    assert_eq!(err.status(), Some(StatusCode::BAD_REQUEST));
    venues.assert_calls(1);
    assert_eq!(
        h.navigator.replacements(),
        vec!["/select-tenant?redirect=%2Fvenues%3Fsort%3Dname"]
    );
    assert_eq!(h.store.state().bearer_token(), Some("A1"));
    Ok(())
}

#[tokio::test]
async fn tenant_context_error_is_ignored_for_tenant_users_and_on_selection_page() -> Result<()> {
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(GET).path("/v1/venues");
        then.status(400)
            .json_body(json!({"code": "TENANT_CONTEXT_REQUIRED"}));
    });

    let scoped = harness(
        &server,
        Session::with_tokens("A1", "R1").with_user(user(false)),
        "/venues",
    )?;
    assert!(scoped.client.get::<Value>("/v1/venues").await.is_err());
    assert!(scoped.navigator.replacements().is_empty());

    let selecting = harness(
        &server,
        Session::with_tokens("A1", "R1").with_user(user(true)),
        "/select-tenant?redirect=%2Fvenues",
    )?;
    assert!(selecting.client.get::<Value>("/v1/venues").await.is_err());
    assert!(selecting.navigator.replacements().is_empty());

    let from_login = harness(
        &server,
        Session::with_tokens("A1", "R1").with_user(user(true)),
        "/login",
    )?;
    assert!(from_login.client.get::<Value>("/v1/venues").await.is_err());
    assert_eq!(from_login.navigator.replacements(), vec!["/select-tenant"]);
    Ok(())
}

#[tokio::test]
async fn selected_tenant_is_sent_for_platform_users() -> Result<()> {
    let server = MockServer::start_async().await;
    let scoped = server.mock(|when, then| {
        when.method(POST)
            .path("/v1/promo-codes")
            .header("authorization", "Bearer A1")
            .header("x-tenant-id", "t-9")
            .json_body(json!({"code": "AUTUMN"}));
        then.status(201).json_body(json!({"id": "p-1"}));
    });

    let h = harness(
        &server,
        Session::with_tokens("A1", "R1").with_user(user(true)),
        "/promo-codes",
    )?;
    h.client.select_tenant(Some("t-9".to_string()));
    let created: Value = h
        .client
        .post("/v1/promo-codes", &json!({"code": "AUTUMN"}))
        .await?;

    assert_eq!(created, json!({"id": "p-1"}));
    scoped.assert_calls(1);
    Ok(())
}

#[tokio::test]
async fn explicit_authorization_header_is_not_overridden() -> Result<()> {
    let server = MockServer::start_async().await;
    let mock = server.mock(|when, then| {
        when.method(DELETE)
            .path("/v1/uploads/9")
            .header("authorization", "Bearer service-token");
        then.status(204);
    });

    let h = harness(&server, Session::with_tokens("A1", "R1"), "/uploads")?;
    let request = ApiRequest::delete("/v1/uploads/9").with_header(
        AUTHORIZATION,
        HeaderValue::from_static("Bearer service-token"),
    );
    h.client.send::<()>(request).await?;

    mock.assert_calls(1);
    Ok(())
}

#[tokio::test]
async fn timeout_does_not_enter_refresh_protocol() -> Result<()> {
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(GET).path("/v1/reports");
        then.status(200)
            .delay(Duration::from_millis(1_500))
            .json_body(json!({}));
    });
    let refresh = server.mock(|when, then| {
        when.method(POST).path("/auth/refresh");
        then.status(200).json_body(token_body("A2", "R2"));
    });

    let h = harness_with_timeout(
        &server,
        Session::with_tokens("A1", "R1"),
        "/reports",
        Duration::from_millis(200),
    )?;
    let err = h
        .client
        .get::<Value>("/v1/reports")
        .await
        .err()
        .ok_or_else(|| anyhow!("expected timeout"))?;

    assert!(err.is_timeout());
    refresh.assert_calls(0);
    assert_eq!(h.store.state().bearer_token(), Some("A1"));
    assert!(h.navigator.replacements().is_empty());
    Ok(())
}

#[tokio::test]
async fn other_errors_pass_through_unchanged() -> Result<()> {
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(PUT).path("/v1/campaigns/3");
        then.status(409).json_body(json!({"message": "campaign already live"}));
    });

    let h = harness(&server, Session::with_tokens("A1", "R1"), "/campaigns/3")?;
    let err = h
        .client
        .put::<_, Value>("/v1/campaigns/3", &json!({"status": "draft"}))
        .await
        .err()
        .ok_or_else(|| anyhow!("expected conflict"))?;

    assert_eq!(err.status(), Some(StatusCode::CONFLICT));
    assert_eq!(
        err.body().and_then(|body| body.message()),
        Some("campaign already live")
    );
    assert_eq!(h.store.state().bearer_token(), Some("A1"));
    Ok(())
}

#[tokio::test]
async fn login_stores_tokens_and_logout_revokes_them() -> Result<()> {
    let server = MockServer::start_async().await;
    let login = server.mock(|when, then| {
        when.method(POST)
            .path("/auth/login")
            .json_body(json!({"email": "ops@beacon.test", "password": "hunter2"}));
        then.status(200).json_body(token_body("A1", "R1"));
    });
    let logout = server.mock(|when, then| {
        when.method(POST)
            .path("/auth/logout")
            .header("authorization", "Bearer A1")
            .json_body(json!({"refreshToken": "R1"}));
        then.status(204);
    });

    let h = harness(&server, Session::default(), "/login")?;
    let tokens = h
        .client
        .login(&LoginCredentials::new("ops@beacon.test", "hunter2"))
        .await?;

    login.assert_calls(1);
    assert_eq!(tokens.access_token, "A1");
    assert!(h.client.session().is_authenticated());

    h.client.logout().await;
    logout.assert_calls(1);
    assert_eq!(h.store.state(), Session::default());
    Ok(())
}

#[tokio::test]
async fn logout_clears_session_even_when_revocation_fails() -> Result<()> {
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(POST).path("/auth/logout");
        then.status(500);
    });

    let h = harness(&server, Session::with_tokens("A1", "R1"), "/campaigns")?;
    h.client.logout().await;

    assert_eq!(h.store.state(), Session::default());
    assert!(h.navigator.replacements().is_empty());
    Ok(())
}

#[tokio::test]
async fn rejected_login_leaves_session_untouched() -> Result<()> {
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(POST).path("/auth/login");
        then.status(401).json_body(json!({"message": "invalid credentials"}));
    });

    let h = harness(&server, Session::default(), "/login")?;
    let err = h
        .client
        .login(&LoginCredentials::new("ops@beacon.test", "wrong"))
        .await
        .err()
        .ok_or_else(|| anyhow!("expected login failure"))?;

    assert_eq!(err.status(), Some(StatusCode::UNAUTHORIZED));
    assert_eq!(h.store.state(), Session::default());
    assert!(h.navigator.replacements().is_empty());
    Ok(())
}

/// Store that stores a token response right after handing out its `nth` snapshot,
/// as if a refresh on another thread settled between that read and the next step.
struct RotateAfterRead {
    inner: InMemorySessionStore,
    reads: AtomicUsize,
    nth: usize,
    rotation: Mutex<Option<TokenResponse>>,
}

impl RotateAfterRead {
    fn shared(session: Session, nth: usize, rotation: TokenResponse) -> Arc<Self> {
        Arc::new(Self {
            inner: InMemorySessionStore::new(session),
            reads: AtomicUsize::new(0),
            nth,
            rotation: Mutex::new(Some(rotation)),
        })
    }
}

impl SessionStore for RotateAfterRead {
    fn state(&self) -> Session {
        let snapshot = self.inner.state();
        if self.reads.fetch_add(1, Ordering::SeqCst) + 1 == self.nth {
            let rotation = self
                .rotation
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            if let Some(tokens) = rotation {
                self.inner.apply_token_response(&tokens);
            }
        }
        snapshot
    }

    fn apply_token_response(&self, response: &TokenResponse) {
        self.inner.apply_token_response(response);
    }

    fn clear_session(&self) {
        self.inner.clear_session();
    }

    fn select_tenant(&self, tenant_id: Option<String>) {
        self.inner.select_tenant(tenant_id);
    }
}

#[tokio::test]
async fn refresh_settled_before_lease_is_not_repeated() -> Result<()> {
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(GET)
            .path("/v1/venues")
            .header("authorization", "Bearer A1");
        then.status(401);
    });
    let refresh = server.mock(|when, then| {
        when.method(POST).path("/auth/refresh");
        then.status(200).json_body(token_body("A3", "R3"));
    });
    let fresh = server.mock(|when, then| {
        when.method(GET)
            .path("/v1/venues")
            .header("authorization", "Bearer A2");
        then.status(200).json_body(json!({"items": []}));
    });

    // Read 1 is the dispatch snapshot, read 2 the recovery snapshot; the
    // rotation lands after read 2, just before the lease is taken.
    let rotation: TokenResponse = serde_json::from_value(token_body("A2", "R2"))?;
    let store = RotateAfterRead::shared(Session::with_tokens("A1", "R1"), 2, rotation);
    let base_url = server
        .base_url()
        .parse()
        .map_err(|_| anyhow!("valid URL"))?;
    let client = AuthenticatedClient::builder(ClientConfig::new(base_url), store.clone()).build()?;

    let venues: Value = client.get("/v1/venues").await?;

    assert_eq!(venues, json!({"items": []}));
    refresh.assert_calls(0);
    fresh.assert_calls(1);
    assert_eq!(store.state().refresh_token(), Some("R2"));
    assert!(!client.refresh_coordinator().is_refreshing());
    Ok(())
}

#[tokio::test]
async fn late_unauthorized_after_refresh_replays_with_rotated_token() -> Result<()> {
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(GET)
            .path("/v1/campaigns")
            .header("authorization", "Bearer A1");
        then.status(401);
    });
    server.mock(|when, then| {
        when.method(GET)
            .path("/v1/reports")
            .header("authorization", "Bearer A1");
        then.status(401).delay(Duration::from_millis(400));
    });
    let refresh = server.mock(|when, then| {
        when.method(POST)
            .path("/auth/refresh")
            .json_body(json!({"refreshToken": "R1"}));
        then.status(200)
            .delay(Duration::from_millis(100))
            .json_body(token_body("A2", "R2"));
    });
    let campaigns = server.mock(|when, then| {
        when.method(GET)
            .path("/v1/campaigns")
            .header("authorization", "Bearer A2");
        then.status(200).json_body(json!([]));
    });
    let reports = server.mock(|when, then| {
        when.method(GET)
            .path("/v1/reports")
            .header("authorization", "Bearer A2");
        then.status(200).json_body(json!({"total": 3}));
    });

    let h = harness(&server, Session::with_tokens("A1", "R1"), "/reports")?;
    let (first, late) = tokio::join!(
        h.client.get::<Value>("/v1/campaigns"),
        h.client.get::<Value>("/v1/reports")
    );

    assert_eq!(first?, json!([]));
    assert_eq!(late?, json!({"total": 3}));
    refresh.assert_calls(1);
    campaigns.assert_calls(1);
    reports.assert_calls(1);
    assert_eq!(h.store.state().bearer_token(), Some("A2"));
    assert!(h.navigator.replacements().is_empty());
    Ok(())
}

#[tokio::test]
async fn queued_request_rejected_after_replay_is_terminal() -> Result<()> {
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(GET)
            .path("/v1/campaigns")
            .header("authorization", "Bearer A1");
        then.status(401);
    });
    server.mock(|when, then| {
        when.method(GET)
            .path("/v1/campaigns")
            .header("authorization", "Bearer A2");
        then.status(200).json_body(json!([]));
    });
    let venues = server.mock(|when, then| {
        when.method(GET).path("/v1/venues");
        then.status(401).delay(Duration::from_millis(100));
    });
    let refresh = server.mock(|when, then| {
        when.method(POST).path("/auth/refresh");
        then.status(200)
            .delay(Duration::from_millis(400))
            .json_body(token_body("A2", "R2"));
    });

    let h = harness(&server, Session::with_tokens("A1", "R1"), "/venues")?;
    let (_, queued) = tokio::join!(
        h.client.get::<Value>("/v1/campaigns"),
        h.client.get::<Value>("/v1/venues")
    );

    let err = queued
        .err()
        .ok_or_else(|| anyhow!("expected terminal failure"))?;
    assert_eq!(err.status(), Some(StatusCode::UNAUTHORIZED));
    venues.assert_calls(2);
    refresh.assert_calls(1);
    assert_eq!(h.store.state(), Session::default());
    assert_eq!(h.navigator.replacements(), vec!["/login?redirect=%2Fvenues"]);
    assert!(!h.client.refresh_coordinator().is_refreshing());
    Ok(())
}
