//! Authentication Module
//!
//! Owns the session lifecycle: the persisted token, the confirmed current
//! user, the startup bootstrap and the login/register/logout actions.
//!
//! Phases:
//! - `Anonymous`: no token held
//! - `Bootstrapping`: token held, current user not yet confirmed
//! - `Authenticated`: token and current user held
//! - `AnonymousWithError`: token purged after a failed bootstrap, message kept
//!
//! Each transition that replaces the session bumps a generation counter.
//! A current-user fetch only lands if the generation it started under is
//! still current, so a logout (or teardown) issued while a fetch is in flight
//! turns its eventual result into a no-op.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::resources::RecordId;
use crate::storage::TokenStore;
use crate::sync::{ApiClient, ApiError, RequestOptions};

/// Current user as returned by `/api/auth/me`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentUser {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RecordId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CurrentUser {
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .filter(|n| !n.is_empty())
            .or_else(|| self.email.as_deref().filter(|e| !e.is_empty()))
            .unwrap_or("Signed in")
    }
}

/// Accepts both `{"user": {...}}` and a bare user object
pub fn unwrap_current_user(payload: Value) -> Result<CurrentUser, ApiError> {
    let user = match payload {
        Value::Object(mut map) => match map.remove("user") {
            Some(user @ Value::Object(_)) => user,
            Some(other) => {
                map.insert("user".to_string(), other);
                Value::Object(map)
            }
            None => Value::Object(map),
        },
        _ => return Err(ApiError::UnexpectedShape("current user".to_string())),
    };

    serde_json::from_value(user)
        .map_err(|e| ApiError::UnexpectedShape(format!("current user: {e}")))
}

#[derive(Clone, Serialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Clone, Serialize)]
pub struct Registration {
    pub name: String,
    pub email: String,
    pub password: String,
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("name", &self.name)
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

// Auth endpoints

pub async fn request_register(
    api: &ApiClient,
    registration: &Registration,
) -> Result<Value, ApiError> {
    api.request(
        "/api/auth/register",
        RequestOptions::post(json!({
            "name": registration.name,
            "email": registration.email,
            "password": registration.password,
        })),
    )
    .await
}

pub async fn request_login(api: &ApiClient, credentials: &Credentials) -> Result<Value, ApiError> {
    api.request(
        "/api/auth/login",
        RequestOptions::post(json!({
            "email": credentials.email,
            "password": credentials.password,
        })),
    )
    .await
}

pub async fn get_me(api: &ApiClient, token: &str) -> Result<Value, ApiError> {
    api.request("/api/auth/me", RequestOptions::get().token(Some(token)))
        .await
}

pub async fn fetch_current_user(api: &ApiClient, token: &str) -> Result<CurrentUser, ApiError> {
    unwrap_current_user(get_me(api, token).await?)
}

/// Observable session phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Anonymous,
    Bootstrapping,
    Authenticated,
    AnonymousWithError,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SessionPhase::Anonymous => "anonymous",
            SessionPhase::Bootstrapping => "bootstrapping",
            SessionPhase::Authenticated => "authenticated",
            SessionPhase::AnonymousWithError => "anonymous (session expired)",
        };
        f.write_str(label)
    }
}

/// Session data. `current_user` is only set while `token` is.
#[derive(Clone, Default, PartialEq)]
pub struct Session {
    pub token: Option<String>,
    pub current_user: Option<CurrentUser>,
    pub bootstrapping: bool,
    pub last_error: Option<String>,
}

impl Session {
    pub fn phase(&self) -> SessionPhase {
        if self.bootstrapping {
            return SessionPhase::Bootstrapping;
        }
        match (&self.token, &self.current_user, &self.last_error) {
            (Some(_), Some(_), _) => SessionPhase::Authenticated,
            (None, _, Some(_)) => SessionPhase::AnonymousWithError,
            _ => SessionPhase::Anonymous,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.phase() == SessionPhase::Authenticated
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("current_user", &self.current_user)
            .field("bootstrapping", &self.bootstrapping)
            .field("last_error", &self.last_error)
            .finish()
    }
}

struct SessionState {
    session: Session,
    generation: u64,
}

/// Manages authentication state
pub struct SessionController {
    api: Arc<ApiClient>,
    store: Arc<dyn TokenStore>,
    state: Mutex<SessionState>,
}

impl SessionController {
    /// Create a controller, picking up any token left by a previous run
    pub fn new(api: Arc<ApiClient>, store: Arc<dyn TokenStore>) -> Self {
        let token = store.get_token();
        let bootstrapping = token.is_some();

        if bootstrapping {
            info!("Found stored token, session needs bootstrap");
        } else {
            debug!("No stored token");
        }

        Self {
            api,
            store,
            state: Mutex::new(SessionState {
                session: Session {
                    token,
                    current_user: None,
                    bootstrapping,
                    last_error: None,
                },
                generation: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of the current session
    pub fn session(&self) -> Session {
        self.lock().session.clone()
    }

    pub fn phase(&self) -> SessionPhase {
        self.lock().session.phase()
    }

    pub fn token(&self) -> Option<String> {
        self.lock().session.token.clone()
    }

    pub fn current_user(&self) -> Option<CurrentUser> {
        self.lock().session.current_user.clone()
    }

    /// Validate the held token by fetching the current user.
    ///
    /// Failure is recovered here rather than returned: the token is purged
    /// and the session drops to anonymous with the failure message kept.
    pub async fn bootstrap(&self) -> Session {
        let pending = {
            let mut state = self.lock();
            match state.session.token.clone() {
                Some(token) => {
                    state.session.bootstrapping = true;
                    Some((token, state.generation))
                }
                None => {
                    state.session.bootstrapping = false;
                    None
                }
            }
        };

        let Some((token, generation)) = pending else {
            return self.session();
        };

        let result = fetch_current_user(&self.api, &token).await;

        let mut state = self.lock();
        if state.generation != generation {
            debug!("Discarding stale bootstrap result");
            return state.session.clone();
        }

        match result {
            Ok(user) => {
                info!("Session restored for: {}", user.display_name());
                state.session.current_user = Some(user);
                state.session.bootstrapping = false;
            }
            Err(e) => {
                warn!("Stored token rejected, signing out: {}", e);
                self.store.set_token(None);
                state.generation += 1;
                state.session = Session {
                    last_error: Some(e.human_message()),
                    ..Session::default()
                };
            }
        }

        state.session.clone()
    }

    /// Log in and load the current user. Errors reach the caller.
    pub async fn login(&self, credentials: &Credentials) -> Result<Session, AuthError> {
        info!("Logging in as {}", credentials.email);

        let response = request_login(&self.api, credentials).await?;
        let token = response
            .get("token")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .ok_or(AuthError::MissingToken)?;

        self.store.set_token(Some(&token));
        let generation = {
            let mut state = self.lock();
            state.generation += 1;
            state.session = Session {
                token: Some(token.clone()),
                bootstrapping: true,
                ..Session::default()
            };
            state.generation
        };

        let result = fetch_current_user(&self.api, &token).await;

        let mut state = self.lock();
        if state.generation != generation {
            debug!("Session replaced while login was loading the user");
            return match result {
                Ok(_) => Ok(state.session.clone()),
                Err(e) => Err(e.into()),
            };
        }

        match result {
            Ok(user) => {
                info!("Logged in: {}", user.display_name());
                state.session.current_user = Some(user);
                state.session.bootstrapping = false;
                Ok(state.session.clone())
            }
            Err(e) => {
                warn!("Login token could not load the current user: {}", e);
                self.store.set_token(None);
                state.generation += 1;
                state.session = Session {
                    last_error: Some(e.human_message()),
                    ..Session::default()
                };
                Err(e.into())
            }
        }
    }

    /// Register a new account; the session is left as it was
    pub async fn register(&self, registration: &Registration) -> Result<Value, AuthError> {
        info!("Registering {}", registration.email);
        Ok(request_register(&self.api, registration).await?)
    }

    /// Clear the session and the stored token
    pub fn logout(&self) {
        let mut state = self.lock();
        state.generation += 1;
        self.store.set_token(None);
        state.session = Session::default();
        info!("Session cleared");
    }

    /// Re-fetch the current user with the held token.
    ///
    /// Returns `None` without a request when no token is held, and `None`
    /// when the session was replaced while the fetch was in flight.
    pub async fn refresh_current_user(&self) -> Result<Option<CurrentUser>, AuthError> {
        let (token, generation) = {
            let mut state = self.lock();
            match state.session.token.clone() {
                Some(token) => (token, state.generation),
                None => {
                    state.session.current_user = None;
                    return Ok(None);
                }
            }
        };

        let user = fetch_current_user(&self.api, &token).await?;

        let mut state = self.lock();
        if state.generation != generation {
            debug!("Discarding stale current-user refresh");
            return Ok(None);
        }
        state.session.current_user = Some(user.clone());
        state.session.bootstrapping = false;
        Ok(Some(user))
    }

    /// Dismiss the retained error message
    pub fn clear_error(&self) {
        self.lock().session.last_error = None;
    }

    /// Abandon any in-flight fetch without touching the stored token.
    /// A pending bootstrap stops reporting as loading; the token stays held
    /// without a user until the next bootstrap or login.
    pub fn teardown(&self) {
        let mut state = self.lock();
        state.generation += 1;
        state.session.bootstrapping = false;
        debug!("Session controller torn down");
    }
}

/// Authentication errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum AuthError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("Login succeeded but no token was returned.")]
    MissingToken,
}

impl AuthError {
    pub fn human_message(&self) -> String {
        self.to_string()
    }

    pub fn status_code(&self) -> u16 {
        match self {
            AuthError::Api(e) => e.status_code(),
            AuthError::MissingToken => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryTokenStore;
    use std::time::Duration;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn controller(server: &MockServer, store: Arc<MemoryTokenStore>) -> SessionController {
        let api = Arc::new(ApiClient::new(&server.uri()).unwrap());
        SessionController::new(api, store)
    }

    fn demo_credentials() -> Credentials {
        Credentials {
            email: "demo@example.com".into(),
            password: "password".into(),
        }
    }

    async fn mount_me(server: &MockServer, token: &str, response: ResponseTemplate) {
        Mock::given(method("GET"))
            .and(path("/api/auth/me"))
            .and(header("authorization", format!("Bearer {token}").as_str()))
            .respond_with(response)
            .mount(server)
            .await;
    }

    #[test]
    fn unwraps_wrapped_and_bare_users() {
        let wrapped = unwrap_current_user(json!({"user": {"id": 1, "name": "Demo"}})).unwrap();
        assert_eq!(wrapped.name.as_deref(), Some("Demo"));

        let bare = unwrap_current_user(json!({"id": 2, "email": "a@b.c"})).unwrap();
        assert_eq!(bare.display_name(), "a@b.c");

        assert!(unwrap_current_user(Value::Null).is_err());
        assert!(unwrap_current_user(json!([1, 2])).is_err());
    }

    #[test]
    fn display_name_falls_back() {
        let user = unwrap_current_user(json!({"id": 3})).unwrap();
        assert_eq!(user.display_name(), "Signed in");
    }

    #[test]
    fn session_debug_hides_token() {
        let session = Session {
            token: Some("secret-token".into()),
            ..Session::default()
        };
        assert!(!format!("{:?}", session).contains("secret-token"));

        let credentials = Credentials {
            email: "demo@example.com".into(),
            password: "hunter2".into(),
        };
        assert!(!format!("{:?}", credentials).contains("hunter2"));
    }

    #[tokio::test]
    async fn starts_anonymous_without_stored_token() {
        let server = MockServer::start().await;
        let session = controller(&server, Arc::new(MemoryTokenStore::new()));

        assert_eq!(session.phase(), SessionPhase::Anonymous);
        let after = session.bootstrap().await;
        assert_eq!(after.phase(), SessionPhase::Anonymous);
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn bootstrap_restores_stored_session() {
        let server = MockServer::start().await;
        mount_me(
            &server,
            "tok_1",
            ResponseTemplate::new(200).set_body_json(json!({"id": 1, "name": "Demo"})),
        )
        .await;

        let session = controller(&server, Arc::new(MemoryTokenStore::with_token("tok_1")));
        assert_eq!(session.phase(), SessionPhase::Bootstrapping);

        let after = session.bootstrap().await;
        assert_eq!(after.phase(), SessionPhase::Authenticated);
        assert_eq!(session.current_user().unwrap().display_name(), "Demo");
    }

    #[tokio::test]
    async fn failed_bootstrap_purges_token() {
        let server = MockServer::start().await;
        mount_me(
            &server,
            "stale",
            ResponseTemplate::new(401).set_body_json(json!({"error": "token expired"})),
        )
        .await;

        let store = Arc::new(MemoryTokenStore::with_token("stale"));
        let session = controller(&server, store.clone());

        let after = session.bootstrap().await;
        assert_eq!(after.phase(), SessionPhase::AnonymousWithError);
        assert_eq!(after.last_error.as_deref(), Some("token expired"));
        assert_eq!(after.token, None);
        assert_eq!(store.get_token(), None);

        session.clear_error();
        assert_eq!(session.phase(), SessionPhase::Anonymous);
    }

    #[tokio::test]
    async fn null_current_user_fails_bootstrap() {
        let server = MockServer::start().await;
        mount_me(&server, "tok", ResponseTemplate::new(204)).await;

        let store = Arc::new(MemoryTokenStore::with_token("tok"));
        let session = controller(&server, store.clone());

        assert_eq!(session.bootstrap().await.phase(), SessionPhase::AnonymousWithError);
        assert_eq!(store.get_token(), None);
    }

    #[tokio::test]
    async fn login_adopts_token_and_loads_user() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/auth/login"))
            .and(body_json(json!({"email": "demo@example.com", "password": "password"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "tok_1"})))
            .expect(1)
            .mount(&server)
            .await;
        mount_me(
            &server,
            "tok_1",
            ResponseTemplate::new(200).set_body_json(json!({"user": {"id": 1, "name": "Demo"}})),
        )
        .await;

        let store = Arc::new(MemoryTokenStore::new());
        let session = controller(&server, store.clone());

        let after = session.login(&demo_credentials()).await.unwrap();
        assert_eq!(after.phase(), SessionPhase::Authenticated);
        assert_eq!(after.current_user.unwrap().name.as_deref(), Some("Demo"));
        assert_eq!(store.get_token().as_deref(), Some("tok_1"));
    }

    #[tokio::test]
    async fn login_reports_bootstrapping_until_user_loads() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/auth/login"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "tok_1"})))
            .mount(&server)
            .await;
        mount_me(
            &server,
            "tok_1",
            ResponseTemplate::new(200)
                .set_body_json(json!({"id": 1, "name": "Demo"}))
                .set_delay(Duration::from_millis(300)),
        )
        .await;

        let session = controller(&server, Arc::new(MemoryTokenStore::new()));

        let creds = demo_credentials();
        let (after, during) = tokio::join!(session.login(&creds), async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            session.session()
        });

        assert_eq!(during.phase(), SessionPhase::Bootstrapping);
        assert_eq!(during.token.as_deref(), Some("tok_1"));
        assert_eq!(during.current_user, None);
        assert_eq!(after.unwrap().phase(), SessionPhase::Authenticated);
    }

    #[tokio::test]
    async fn login_during_bootstrap_outlives_stale_rejection() {
        let server = MockServer::start().await;
        mount_me(
            &server,
            "old",
            ResponseTemplate::new(401)
                .set_body_json(json!({"error": "jwt expired"}))
                .set_delay(Duration::from_millis(300)),
        )
        .await;
        Mock::given(method("POST"))
            .and(path("/api/auth/login"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "new"})))
            .mount(&server)
            .await;
        mount_me(
            &server,
            "new",
            ResponseTemplate::new(200).set_body_json(json!({"id": 2, "name": "Fresh"})),
        )
        .await;

        let store = Arc::new(MemoryTokenStore::with_token("old"));
        let session = controller(&server, store.clone());

        let (after_bootstrap, after_login) = tokio::join!(session.bootstrap(), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            session.login(&demo_credentials()).await
        });

        assert_eq!(after_login.unwrap().phase(), SessionPhase::Authenticated);
        assert_eq!(after_bootstrap.phase(), SessionPhase::Authenticated);
        assert_eq!(store.get_token().as_deref(), Some("new"));
        let current = session.session();
        assert_eq!(current.token.as_deref(), Some("new"));
        assert_eq!(current.current_user.unwrap().display_name(), "Fresh");
        assert_eq!(current.last_error, None);
    }

    #[tokio::test]
    async fn login_without_token_leaves_session_untouched() {
        let server = MockServer::start().await;
        mount_me(
            &server,
            "old",
            ResponseTemplate::new(401).set_body_json(json!({"error": "expired"})),
        )
        .await;
        Mock::given(method("POST"))
            .and(path("/api/auth/login"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .mount(&server)
            .await;

        let store = Arc::new(MemoryTokenStore::with_token("old"));
        let session = controller(&server, store.clone());
        session.bootstrap().await;
        let before = session.session();

        let err = session.login(&demo_credentials()).await.unwrap_err();
        assert!(matches!(err, AuthError::MissingToken));
        assert_eq!(session.session(), before);
        assert_eq!(store.get_token(), None);
    }

    #[tokio::test]
    async fn rejected_login_reports_server_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/auth/login"))
            .respond_with(
                ResponseTemplate::new(401).set_body_json(json!({"error": "invalid credentials"})),
            )
            .mount(&server)
            .await;

        let session = controller(&server, Arc::new(MemoryTokenStore::new()));
        let err = session.login(&demo_credentials()).await.unwrap_err();

        assert_eq!(err.human_message(), "invalid credentials");
        assert_eq!(err.status_code(), 401);
        assert_eq!(session.phase(), SessionPhase::Anonymous);
    }

    #[tokio::test]
    async fn login_propagates_current_user_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/auth/login"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "tok_2"})))
            .mount(&server)
            .await;
        mount_me(
            &server,
            "tok_2",
            ResponseTemplate::new(500).set_body_json(json!({"message": "db down"})),
        )
        .await;

        let store = Arc::new(MemoryTokenStore::new());
        let session = controller(&server, store.clone());

        let err = session.login(&demo_credentials()).await.unwrap_err();
        assert_eq!(err.human_message(), "db down");
        assert_eq!(err.status_code(), 500);
        assert_eq!(store.get_token(), None);
        assert!(!session.session().is_authenticated());
    }

    #[tokio::test]
    async fn register_does_not_touch_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/auth/register"))
            .and(body_json(json!({"name": "Ada", "email": "ada@example.com", "password": "pw"})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 5})))
            .expect(1)
            .mount(&server)
            .await;

        let session = controller(&server, Arc::new(MemoryTokenStore::new()));
        let before = session.session();
        let created = session
            .register(&Registration {
                name: "Ada".into(),
                email: "ada@example.com".into(),
                password: "pw".into(),
            })
            .await
            .unwrap();

        assert_eq!(created, json!({"id": 5}));
        assert_eq!(session.session(), before);
    }

    #[tokio::test]
    async fn logout_is_idempotent() {
        let server = MockServer::start().await;
        mount_me(&server, "tok", ResponseTemplate::new(200).set_body_json(json!({"id": 1}))).await;

        let store = Arc::new(MemoryTokenStore::with_token("tok"));
        let session = controller(&server, store.clone());
        session.bootstrap().await;
        assert!(session.session().is_authenticated());

        session.logout();
        let first = session.session();
        session.logout();
        let second = session.session();

        assert_eq!(first, second);
        assert_eq!(second.phase(), SessionPhase::Anonymous);
        assert_eq!(second.last_error, None);
        assert_eq!(store.get_token(), None);
    }

    #[tokio::test]
    async fn logout_during_bootstrap_discards_result() {
        let server = MockServer::start().await;
        mount_me(
            &server,
            "slow",
            ResponseTemplate::new(200)
                .set_body_json(json!({"id": 1, "name": "Late"}))
                .set_delay(Duration::from_millis(300)),
        )
        .await;

        let store = Arc::new(MemoryTokenStore::with_token("slow"));
        let session = controller(&server, store.clone());

        let (after_bootstrap, _) = tokio::join!(session.bootstrap(), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            session.logout();
        });

        assert_eq!(after_bootstrap.phase(), SessionPhase::Anonymous);
        assert_eq!(session.current_user(), None);
        assert_eq!(session.token(), None);
        assert_eq!(store.get_token(), None);
    }

    #[tokio::test]
    async fn teardown_suppresses_failed_bootstrap_purge() {
        let server = MockServer::start().await;
        mount_me(
            &server,
            "tok",
            ResponseTemplate::new(401).set_delay(Duration::from_millis(300)),
        )
        .await;

        let store = Arc::new(MemoryTokenStore::with_token("tok"));
        let session = controller(&server, store.clone());

        tokio::join!(session.bootstrap(), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            session.teardown();
        });

        assert_eq!(store.get_token().as_deref(), Some("tok"));
        let after = session.session();
        assert_eq!(after.last_error, None);
        assert!(!after.bootstrapping);
        assert_eq!(after.phase(), SessionPhase::Anonymous);
    }

    #[tokio::test]
    async fn refresh_without_token_is_a_no_op() {
        let server = MockServer::start().await;
        let session = controller(&server, Arc::new(MemoryTokenStore::new()));

        assert_eq!(session.refresh_current_user().await.unwrap(), None);
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn refresh_updates_user_and_propagates_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/auth/me"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 1, "name": "Demo"})))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/auth/me"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let store = Arc::new(MemoryTokenStore::with_token("tok"));
        let session = controller(&server, store.clone());
        session.bootstrap().await;

        let user = session.refresh_current_user().await.unwrap().unwrap();
        assert_eq!(user.display_name(), "Demo");

        let err = session.refresh_current_user().await.unwrap_err();
        assert_eq!(err.status_code(), 503);
        assert_eq!(store.get_token().as_deref(), Some("tok"));
        assert!(session.session().is_authenticated());
    }
}
