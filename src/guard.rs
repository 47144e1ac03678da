//! Route Guard Module
//!
//! Maps navigation targets to routes and decides, from session state alone,
//! whether a protected route may render.

use std::fmt;

use crate::auth::Session;
use crate::resources::RecordId;

pub const LOGIN_PATH: &str = "/auth";

/// Known application routes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Landing,
    Auth,
    Organizations,
    Projects { org_id: RecordId },
    Tasks { project_id: RecordId },
    Activity,
}

impl Route {
    /// Parse a path; unknown paths resolve to the landing route
    pub fn parse(path: &str) -> Self {
        let path = path.split(['?', '#']).next().unwrap_or("");
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        match segments.as_slice() {
            ["auth"] => Route::Auth,
            ["organizations"] => Route::Organizations,
            ["organizations", org_id, "projects"] => Route::Projects {
                org_id: parse_id(org_id),
            },
            ["projects", project_id, "tasks"] => Route::Tasks {
                project_id: parse_id(project_id),
            },
            ["activity"] => Route::Activity,
            _ => Route::Landing,
        }
    }

    pub fn is_protected(&self) -> bool {
        !matches!(self, Route::Landing | Route::Auth)
    }

    pub fn path(&self) -> String {
        match self {
            Route::Landing => "/".to_string(),
            Route::Auth => LOGIN_PATH.to_string(),
            Route::Organizations => "/organizations".to_string(),
            Route::Projects { org_id } => format!(
                "/organizations/{}/projects",
                urlencoding::encode(&org_id.to_string())
            ),
            Route::Tasks { project_id } => format!(
                "/projects/{}/tasks",
                urlencoding::encode(&project_id.to_string())
            ),
            Route::Activity => "/activity".to_string(),
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

fn parse_id(segment: &str) -> RecordId {
    match urlencoding::decode(segment) {
        Ok(decoded) => RecordId::parse(&decoded),
        Err(_) => RecordId::parse(segment),
    }
}

/// Outcome of guarding a protected route
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    /// Session is still being validated
    Loading,
    /// Not signed in; `from` is where to go after login
    RedirectToLogin { from: Route },
    Render,
}

/// Decide what a protected route shows for the given session
pub fn guard(session: &Session, destination: &Route) -> GuardDecision {
    if session.bootstrapping {
        return GuardDecision::Loading;
    }
    if session.token.is_none() || session.current_user.is_none() {
        return GuardDecision::RedirectToLogin {
            from: destination.clone(),
        };
    }
    GuardDecision::Render
}

/// Where the landing route sends the user
pub fn landing_route(session: &Session) -> Route {
    if session.token.is_some() {
        Route::Organizations
    } else {
        Route::Auth
    }
}

/// Resolve a navigation request to the decision for that route.
/// Unprotected routes always render; the landing route redirects.
pub fn navigate(session: &Session, path: &str) -> (Route, GuardDecision) {
    let route = Route::parse(path);
    match route {
        Route::Landing => {
            let target = landing_route(session);
            let decision = if target.is_protected() {
                guard(session, &target)
            } else {
                GuardDecision::Render
            };
            (target, decision)
        }
        Route::Auth => (route, GuardDecision::Render),
        _ => {
            let decision = guard(session, &route);
            (route, decision)
        }
    }
}
