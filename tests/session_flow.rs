//! End-to-end session scenarios against a mock backend, with the token kept
//! in a real on-disk store so restarts can be simulated.

use std::sync::Arc;

use pm_console_lib::auth::{Credentials, SessionPhase};
use pm_console_lib::commands::{self, CommandError};
use pm_console_lib::guard::{self, GuardDecision, Route};
use pm_console_lib::storage::{SecureStorage, TokenStore};
use pm_console_lib::sync::ApiClient;
use pm_console_lib::AppState;
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn app(server: &MockServer, dir: &std::path::Path) -> AppState {
    let api = Arc::new(ApiClient::new(&server.uri()).unwrap());
    AppState::new(api, Arc::new(SecureStorage::new(dir)))
}

fn demo() -> Credentials {
    Credentials {
        email: "demo@example.com".into(),
        password: "password".into(),
    }
}

async fn mount_demo_backend(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .and(body_json(json!({"email": "demo@example.com", "password": "password"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "tok_1"})))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/auth/me"))
        .and(header("authorization", "Bearer tok_1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"user": {"id": 1, "name": "Demo"}})),
        )
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/organizations"))
        .and(header("authorization", "Bearer tok_1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"organizations": [{"id": 1, "name": "Acme"}]})),
        )
        .mount(server)
        .await;
}

#[tokio::test]
async fn login_then_restart_restores_session() {
    let server = MockServer::start().await;
    mount_demo_backend(&server).await;
    let dir = tempfile::tempdir().unwrap();

    let first = app(&server, dir.path());
    assert_eq!(first.session.bootstrap().await.phase(), SessionPhase::Anonymous);

    let session = first.session.login(&demo()).await.unwrap();
    assert_eq!(session.phase(), SessionPhase::Authenticated);
    assert_eq!(session.current_user.unwrap().name.as_deref(), Some("Demo"));
    assert_eq!(first.store.get_token().as_deref(), Some("tok_1"));

    let orgs = commands::list_organizations(&first).await.unwrap();
    assert_eq!(orgs.len(), 1);
    assert_eq!(orgs[0].name, "Acme");
    drop(first);

    let second = app(&server, dir.path());
    assert_eq!(second.session.phase(), SessionPhase::Bootstrapping);
    assert_eq!(
        guard::guard(&second.session.session(), &Route::Organizations),
        GuardDecision::Loading
    );

    let restored = second.session.bootstrap().await;
    assert_eq!(restored.phase(), SessionPhase::Authenticated);
    assert!(commands::get_session_status(&second).token_saved_at.is_some());
}

#[tokio::test]
async fn rejected_token_is_purged_on_restart() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/auth/me"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"error": "jwt expired"})))
        .mount(&server)
        .await;
    let dir = tempfile::tempdir().unwrap();
    SecureStorage::new(dir.path()).set_token(Some("expired"));

    let state = app(&server, dir.path());
    let session = state.session.bootstrap().await;

    assert_eq!(session.phase(), SessionPhase::AnonymousWithError);
    assert_eq!(session.last_error.as_deref(), Some("jwt expired"));
    assert_eq!(SecureStorage::new(dir.path()).get_token(), None);

    let (route, decision) = guard::navigate(&session, "/activity");
    assert_eq!(route, Route::Activity);
    assert_eq!(decision, GuardDecision::RedirectToLogin { from: Route::Activity });

    let err = commands::list_activity(&state).await.unwrap_err();
    assert!(matches!(err, CommandError::NotSignedIn { .. }));
}

#[tokio::test]
async fn invalid_credentials_keep_session_anonymous() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({"error": "invalid credentials"})),
        )
        .mount(&server)
        .await;
    let dir = tempfile::tempdir().unwrap();
    let state = app(&server, dir.path());

    let err = commands::login(&state, "demo@example.com", "wrong")
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "invalid credentials");
    match err {
        CommandError::Auth(auth) => assert_eq!(auth.status_code(), 401),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(state.session.phase(), SessionPhase::Anonymous);
    assert_eq!(state.store.get_token(), None);
}

#[tokio::test]
async fn logout_after_login_clears_disk_and_state() {
    let server = MockServer::start().await;
    mount_demo_backend(&server).await;
    let dir = tempfile::tempdir().unwrap();
    let state = app(&server, dir.path());

    state.session.login(&demo()).await.unwrap();
    let first = commands::logout(&state);
    let second = commands::logout(&state);

    assert_eq!(first.phase, SessionPhase::Anonymous);
    assert_eq!(second.phase, SessionPhase::Anonymous);
    assert_eq!(second.error, None);
    assert_eq!(SecureStorage::new(dir.path()).get_token(), None);
}
