//! Commands Module
//!
//! Screen-level operations used by the console front end. Protected
//! operations pass through the route guard before touching the API.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::auth::{AuthError, Credentials, Registration, SessionPhase};
use crate::guard::{guard, GuardDecision, Route};
use crate::resources::{
    self, ActivityLogEntry, NewOrganization, NewProject, NewTask, Organization, Project,
    RecordId, Task, TaskStatus,
};
use crate::sync::ApiError;
use crate::AppState;

// Response types for the front end

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub phase: SessionPhase,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub api_base_url: String,
    pub token_saved_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// Form input for a new task
#[derive(Debug, Clone, Default)]
pub struct TaskForm {
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub assignee_id: Option<RecordId>,
}

// Commands

/// Describe the current session
pub fn get_session_status(state: &AppState) -> SessionResponse {
    let session = state.session.session();
    let user = session.current_user.as_ref();

    SessionResponse {
        phase: session.phase(),
        display_name: user.map(|u| u.display_name().to_string()),
        email: user.and_then(|u| u.email.clone()),
        api_base_url: state.api.base_url().to_string(),
        token_saved_at: session
            .token
            .as_ref()
            .and_then(|_| state.store.saved_at()),
        error: session.last_error,
    }
}

pub async fn login(
    state: &AppState,
    email: &str,
    password: &str,
) -> Result<SessionResponse, CommandError> {
    let credentials = Credentials {
        email: email.trim().to_string(),
        password: password.to_string(),
    };
    state.session.login(&credentials).await?;
    Ok(get_session_status(state))
}

pub async fn register(
    state: &AppState,
    name: &str,
    email: &str,
    password: &str,
) -> Result<Value, CommandError> {
    let name = required(name, "Name")?;
    let registration = Registration {
        name,
        email: email.trim().to_string(),
        password: password.to_string(),
    };
    Ok(state.session.register(&registration).await?)
}

pub fn logout(state: &AppState) -> SessionResponse {
    info!("Logging out");
    state.session.logout();
    get_session_status(state)
}

pub async fn list_organizations(state: &AppState) -> Result<Vec<Organization>, CommandError> {
    let token = require_session(state, &Route::Organizations)?;
    Ok(resources::list_organizations(&state.api, &token).await?)
}

pub async fn create_organization(state: &AppState, name: &str) -> Result<Value, CommandError> {
    let token = require_session(state, &Route::Organizations)?;
    let org = NewOrganization {
        name: required(name, "Organization name")?,
    };
    Ok(resources::create_organization(&state.api, &token, &org).await?)
}

pub async fn list_projects(
    state: &AppState,
    org_id: &RecordId,
) -> Result<Vec<Project>, CommandError> {
    let route = Route::Projects {
        org_id: org_id.clone(),
    };
    let token = require_session(state, &route)?;
    Ok(resources::list_projects_for_org(&state.api, &token, org_id).await?)
}

pub async fn create_project(
    state: &AppState,
    org_id: &RecordId,
    name: &str,
    description: Option<&str>,
) -> Result<Value, CommandError> {
    let route = Route::Projects {
        org_id: org_id.clone(),
    };
    let token = require_session(state, &route)?;
    let project = NewProject {
        name: required(name, "Project name")?,
        description: optional(description),
    };
    Ok(resources::create_project_for_org(&state.api, &token, org_id, &project).await?)
}

pub async fn list_tasks(
    state: &AppState,
    project_id: &RecordId,
) -> Result<Vec<Task>, CommandError> {
    let route = Route::Tasks {
        project_id: project_id.clone(),
    };
    let token = require_session(state, &route)?;
    Ok(resources::list_tasks_for_project(&state.api, &token, project_id).await?)
}

pub async fn create_task(
    state: &AppState,
    project_id: &RecordId,
    form: TaskForm,
) -> Result<Value, CommandError> {
    let route = Route::Tasks {
        project_id: project_id.clone(),
    };
    let token = require_session(state, &route)?;
    let task = NewTask {
        title: required(&form.title, "Task title")?,
        description: optional(form.description.as_deref()),
        status: form.status,
        assignee_id: form.assignee_id,
    };
    Ok(resources::create_task_for_project(&state.api, &token, project_id, &task).await?)
}

pub async fn list_activity(state: &AppState) -> Result<Vec<ActivityLogEntry>, CommandError> {
    let token = require_session(state, &Route::Activity)?;
    Ok(resources::list_activity_logs(&state.api, &token).await?)
}

/// Token for a protected route, or why it may not render
fn require_session(state: &AppState, route: &Route) -> Result<String, CommandError> {
    let session = state.session.session();
    match guard(&session, route) {
        GuardDecision::Render => session.token.ok_or(CommandError::NotSignedIn {
            from: route.clone(),
        }),
        GuardDecision::Loading => Err(CommandError::SessionLoading),
        GuardDecision::RedirectToLogin { from } => {
            debug!("Redirecting to login from {}", from);
            Err(CommandError::NotSignedIn { from })
        }
    }
}

fn required(value: &str, field: &str) -> Result<String, CommandError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(CommandError::Validation(format!("{field} is required.")));
    }
    Ok(value.to_string())
}

fn optional(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Command errors
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("Not signed in. Log in to open {from}.")]
    NotSignedIn { from: Route },

    #[error("Session is still loading.")]
    SessionLoading,

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Api(#[from] ApiError),
}
