//! Resources Module
//!
//! Typed pass-through calls for organizations, projects, tasks and activity
//! logs, plus the list-unwrap rules for each endpoint.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::sync::{ApiClient, ApiError, RequestOptions};

/// Identifier as sent by the backend, numeric or string
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    Int(i64),
    Str(String),
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordId::Int(id) => write!(f, "{}", id),
            RecordId::Str(id) => write!(f, "{}", id),
        }
    }
}

impl From<i64> for RecordId {
    fn from(id: i64) -> Self {
        RecordId::Int(id)
    }
}

impl From<&str> for RecordId {
    fn from(id: &str) -> Self {
        RecordId::Str(id.to_string())
    }
}

impl RecordId {
    /// Identifier typed by a user or taken from a path. Numeric only when
    /// the text is already the canonical form of the number, so `007` and
    /// `+5` go back to the server exactly as written.
    pub fn parse(raw: &str) -> Self {
        match raw.parse::<i64>() {
            Ok(id) if id.to_string() == raw => RecordId::Int(id),
            _ => RecordId::Str(raw.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "RawOrganization")]
pub struct Organization {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<RecordId>,
    pub name: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Deserialize)]
struct RawOrganization {
    id: Option<RecordId>,
    #[serde(rename = "orgId")]
    org_id: Option<RecordId>,
    #[serde(rename = "_id")]
    legacy_id: Option<RecordId>,
    name: Option<String>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl From<RawOrganization> for Organization {
    fn from(raw: RawOrganization) -> Self {
        Self {
            id: raw.id.or(raw.org_id).or(raw.legacy_id),
            name: raw.name.unwrap_or_default(),
            extra: raw.extra,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "RawProject")]
pub struct Project {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<RecordId>,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Deserialize)]
struct RawProject {
    id: Option<RecordId>,
    #[serde(rename = "projectId")]
    project_id: Option<RecordId>,
    #[serde(rename = "_id")]
    legacy_id: Option<RecordId>,
    name: Option<String>,
    description: Option<String>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl From<RawProject> for Project {
    fn from(raw: RawProject) -> Self {
        Self {
            id: raw.id.or(raw.project_id).or(raw.legacy_id),
            name: raw.name.unwrap_or_default(),
            description: raw.description,
            extra: raw.extra,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Todo,
    InProgress,
    Done,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 3] = [TaskStatus::Todo, TaskStatus::InProgress, TaskStatus::Done];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Todo => "todo",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Done => "done",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown task status {s:?} (expected todo, in_progress or done)"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "RawTask")]
pub struct Task {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<RecordId>,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Kept as the raw string so unknown statuses still display
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee_id: Option<RecordId>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTask {
    id: Option<RecordId>,
    task_id: Option<RecordId>,
    #[serde(rename = "_id")]
    legacy_id: Option<RecordId>,
    title: Option<String>,
    description: Option<String>,
    status: Option<String>,
    assignee_id: Option<RecordId>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl From<RawTask> for Task {
    fn from(raw: RawTask) -> Self {
        Self {
            id: raw.id.or(raw.task_id).or(raw.legacy_id),
            title: raw.title.unwrap_or_default(),
            description: raw.description,
            status: raw.status,
            assignee_id: raw.assignee_id,
            extra: raw.extra,
        }
    }
}

/// Activity log entry with the field fallbacks older backends need
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "RawActivityLogEntry")]
pub struct ActivityLogEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<RecordId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Deserialize)]
struct RawActivityLogEntry {
    id: Option<RecordId>,
    #[serde(rename = "_id")]
    legacy_id: Option<RecordId>,
    action: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    message: Option<String>,
    description: Option<String>,
    #[serde(rename = "createdAt")]
    created_at: Option<String>,
    timestamp: Option<String>,
    #[serde(rename = "created_at")]
    created_at_snake: Option<String>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

fn first_present(candidates: [Option<String>; 3]) -> Option<String> {
    candidates.into_iter().flatten().find(|s| !s.is_empty())
}

impl From<RawActivityLogEntry> for ActivityLogEntry {
    fn from(raw: RawActivityLogEntry) -> Self {
        Self {
            id: raw.id.or(raw.legacy_id),
            action: first_present([raw.action, raw.kind, None]),
            message: first_present([raw.message, raw.description, None]),
            created_at: first_present([raw.created_at, raw.timestamp, raw.created_at_snake]),
            extra: raw.extra,
        }
    }
}

impl ActivityLogEntry {
    pub fn action_label(&self) -> &str {
        self.action.as_deref().unwrap_or("activity")
    }

    /// `created_at` in local time when it parses as RFC 3339, else verbatim
    pub fn created_at_local(&self) -> Option<String> {
        let raw = self.created_at.as_deref()?;
        Some(match chrono::DateTime::parse_from_rfc3339(raw) {
            Ok(ts) => ts
                .with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string(),
            Err(_) => raw.to_string(),
        })
    }
}

// Create payloads

#[derive(Debug, Clone, Serialize)]
pub struct NewOrganization {
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewProject {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTask {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee_id: Option<RecordId>,
}

/// Endpoint-specific keys that may wrap a list payload, in priority order
pub mod list_keys {
    pub const ORGANIZATIONS: &[&str] = &["organizations", "data"];
    pub const PROJECTS: &[&str] = &["projects", "data"];
    pub const TASKS: &[&str] = &["tasks", "data"];
    pub const ACTIVITY_LOGS: &[&str] = &["activityLogs", "logs", "data"];
}

/// Extract a list from a payload that is either a bare array or an object
/// wrapping it under one of `keys`. `null` is an empty list.
pub fn unwrap_list<T: DeserializeOwned>(
    payload: Value,
    keys: &[&str],
    what: &str,
) -> Result<Vec<T>, ApiError> {
    let items = match payload {
        Value::Null => return Ok(Vec::new()),
        Value::Array(items) => items,
        Value::Object(mut map) => {
            let key = keys
                .iter()
                .find(|key| map.get(**key).map_or(false, Value::is_array))
                .ok_or_else(|| ApiError::UnexpectedShape(what.to_string()))?;
            match map.remove(*key) {
                Some(Value::Array(items)) => items,
                _ => return Err(ApiError::UnexpectedShape(what.to_string())),
            }
        }
        _ => return Err(ApiError::UnexpectedShape(what.to_string())),
    };

    items
        .into_iter()
        .map(|item| {
            serde_json::from_value(item)
                .map_err(|e| ApiError::UnexpectedShape(format!("{what}: {e}")))
        })
        .collect()
}

fn encode(id: &RecordId) -> String {
    urlencoding::encode(&id.to_string()).into_owned()
}

fn to_body<T: Serialize>(value: &T) -> Result<Value, ApiError> {
    serde_json::to_value(value).map_err(|e| ApiError::InvalidRequest(e.to_string()))
}

/// List organizations visible to the user
pub async fn list_organizations(
    api: &ApiClient,
    token: &str,
) -> Result<Vec<Organization>, ApiError> {
    let payload = api
        .request("/api/organizations", RequestOptions::get().token(Some(token)))
        .await?;
    unwrap_list(payload, list_keys::ORGANIZATIONS, "organizations")
}

pub async fn create_organization(
    api: &ApiClient,
    token: &str,
    org: &NewOrganization,
) -> Result<Value, ApiError> {
    api.request(
        "/api/organizations",
        RequestOptions::post(to_body(org)?).token(Some(token)),
    )
    .await
}

pub async fn list_projects_for_org(
    api: &ApiClient,
    token: &str,
    org_id: &RecordId,
) -> Result<Vec<Project>, ApiError> {
    let path = format!("/api/organizations/{}/projects", encode(org_id));
    let payload = api
        .request(&path, RequestOptions::get().token(Some(token)))
        .await?;
    unwrap_list(payload, list_keys::PROJECTS, "projects")
}

pub async fn create_project_for_org(
    api: &ApiClient,
    token: &str,
    org_id: &RecordId,
    project: &NewProject,
) -> Result<Value, ApiError> {
    let path = format!("/api/organizations/{}/projects", encode(org_id));
    api.request(&path, RequestOptions::post(to_body(project)?).token(Some(token)))
        .await
}

pub async fn list_tasks_for_project(
    api: &ApiClient,
    token: &str,
    project_id: &RecordId,
) -> Result<Vec<Task>, ApiError> {
    let path = format!("/api/projects/{}/tasks", encode(project_id));
    let payload = api
        .request(&path, RequestOptions::get().token(Some(token)))
        .await?;
    unwrap_list(payload, list_keys::TASKS, "tasks")
}

pub async fn create_task_for_project(
    api: &ApiClient,
    token: &str,
    project_id: &RecordId,
    task: &NewTask,
) -> Result<Value, ApiError> {
    let path = format!("/api/projects/{}/tasks", encode(project_id));
    api.request(&path, RequestOptions::post(to_body(task)?).token(Some(token)))
        .await
}

/// List recent activity logs
pub async fn list_activity_logs(
    api: &ApiClient,
    token: &str,
) -> Result<Vec<ActivityLogEntry>, ApiError> {
    let payload = api
        .request("/api/activity-logs", RequestOptions::get().token(Some(token)))
        .await?;
    unwrap_list(payload, list_keys::ACTIVITY_LOGS, "activity logs")
}
