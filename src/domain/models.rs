use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub const TEMP_ID_PREFIX: &str = "temp-";
pub const GENERAL_FIELD: &str = "general";

/// Identifier as the server sends it: usually a number, sometimes a string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityId {
    Number(i64),
    Text(String),
}

pub type TaskId = EntityId;

impl EntityId {
    pub fn temporary(sequence: u64) -> Self {
        Self::Text(format!("{TEMP_ID_PREFIX}{sequence}"))
    }

    pub fn is_temporary(&self) -> bool {
        matches!(self, Self::Text(value) if value.starts_with(TEMP_ID_PREFIX))
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(value) => write!(f, "{value}"),
            Self::Text(value) => f.write_str(value),
        }
    }
}

impl FromStr for EntityId {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err("id must not be empty".to_string());
        }
        Ok(trimmed
            .parse::<i64>()
            .map(Self::Number)
            .unwrap_or_else(|_| Self::Text(trimmed.to_string())))
    }
}

impl From<i64> for EntityId {
    fn from(value: i64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for EntityId {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
        }
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "LOW" => Ok(Self::Low),
            "MEDIUM" => Ok(Self::Medium),
            "HIGH" => Ok(Self::High),
            other => Err(format!("unsupported priority: {other}")),
        }
    }
}

/// Client-side view of the signed-in user. Empty until a login or refresh succeeds.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub access_token: Option<String>,
    pub is_authenticated: bool,
    pub user_email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub is_completed: bool,
    /// Server bookkeeping such as `created_at` or `user_id`, kept as-is.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Task {
    pub fn speculative(id: TaskId, new_task: &NewTask) -> Self {
        Self {
            id,
            title: new_task.title.clone(),
            description: new_task.description.clone(),
            due_date: new_task.due_date.clone(),
            priority: new_task.priority,
            is_completed: false,
            extra: serde_json::Map::new(),
        }
    }

    pub fn apply_patch(&mut self, patch: &TaskPatch) {
        if let Some(title) = &patch.title {
            self.title = title.clone();
        }
        if let Some(description) = &patch.description {
            self.description = Some(description.clone());
        }
        if let Some(due_date) = &patch.due_date {
            self.due_date = Some(due_date.clone());
        }
        if let Some(priority) = patch.priority {
            self.priority = priority;
        }
        if let Some(is_completed) = patch.is_completed {
            self.is_completed = is_completed;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewTask {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    pub priority: Priority,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_completed: Option<bool>,
}

impl TaskPatch {
    pub fn completion() -> Self {
        Self {
            is_completed: Some(true),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskPage {
    pub items: Vec<Task>,
    pub total: u64,
    pub limit: u32,
    pub offset: u32,
    pub has_next: bool,
}

/// `/tasks/user` answers with a page when paginated and a bare list otherwise.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TaskListPayload {
    Page(TaskPage),
    Items(Vec<Task>),
}

impl TaskListPayload {
    pub fn into_page(self) -> TaskPage {
        match self {
            Self::Page(page) => page,
            Self::Items(items) => TaskPage {
                total: items.len() as u64,
                limit: u32::try_from(items.len()).unwrap_or(u32::MAX),
                offset: 0,
                has_next: false,
                items,
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskQuery {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    pub is_completed: Option<bool>,
}

impl TaskQuery {
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(limit) = self.limit {
            pairs.push(("limit", limit.to_string()));
        }
        if let Some(offset) = self.offset {
            pairs.push(("offset", offset.to_string()));
        }
        if let Some(is_completed) = self.is_completed {
            pairs.push(("is_completed", is_completed.to_string()));
        }
        pairs
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: EntityId,
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoginResponse {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

/// Cookies the server hands out for session renewal.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RefreshCredential {
    pub refresh_token: Option<String>,
    pub csrf_token: Option<String>,
    pub session: Option<String>,
}

impl RefreshCredential {
    pub fn is_empty(&self) -> bool {
        self.refresh_token.is_none() && self.csrf_token.is_none() && self.session.is_none()
    }
}

/// Per-field validation messages for one form. Only the first message per field is kept.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldErrors {
    errors: BTreeMap<String, String>,
}

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn general(message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.push(GENERAL_FIELD, message);
        errors
    }

    pub fn push(&mut self, field: &str, message: impl Into<String>) {
        self.errors
            .entry(field.to_string())
            .or_insert_with(|| message.into());
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.errors.get(field).map(String::as_str)
    }

    /// Drops the message for a field the user has just edited.
    pub fn clear_field(&mut self, field: &str) {
        self.errors.remove(field);
    }

    pub fn clear(&mut self) {
        self.errors.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn first_message(&self) -> Option<&str> {
        self.get(GENERAL_FIELD)
            .or_else(|| self.errors.values().next().map(String::as_str))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.errors
            .iter()
            .map(|(field, message)| (field.as_str(), message.as_str()))
    }

    pub fn into_result(self) -> Result<(), Self> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self
            .iter()
            .map(|(field, message)| format!("{field}: {message}"))
            .collect::<Vec<_>>()
            .join("; ");
        f.write_str(&joined)
    }
}

/// Accepts RFC 3339, `YYYY-MM-DDTHH:MM` (datetime-local) or a bare date and
/// returns an RFC 3339 UTC timestamp.
pub fn normalize_due_date(raw: &str) -> Result<String, String> {
    let value = raw.trim();
    if value.is_empty() {
        return Err("due date must not be empty".to_string());
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Ok(parsed.with_timezone(&Utc).to_rfc3339());
    }
    for format in ["%Y-%m-%dT%H:%M", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(parsed.and_utc().to_rfc3339());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Ok(midnight.and_utc().to_rfc3339());
        }
    }
    Err(format!("invalid due date: {value}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample_task() -> Task {
        Task {
            id: EntityId::Number(1),
            title: "Write report".to_string(),
            description: Some("quarterly".to_string()),
            due_date: Some("2026-03-01T09:00:00+00:00".to_string()),
            priority: Priority::High,
            is_completed: false,
            extra: serde_json::Map::new(),
        }
    }

    #[test]
    fn task_deserializes_server_payload_and_keeps_extra_fields() {
        let raw = serde_json::json!({
            "id": 42,
            "title": "Ship",
            "description": null,
            "due_date": "2026-03-01T09:00:00",
            "priority": "LOW",
            "is_completed": true,
            "created_at": "2026-02-01T08:00:00",
            "user_id": 7
        });
        let task: Task = serde_json::from_value(raw).expect("deserialize task");
        assert_eq!(task.id, EntityId::Number(42));
        assert_eq!(task.priority, Priority::Low);
        assert!(task.is_completed);
        assert_eq!(task.extra.get("user_id"), Some(&serde_json::json!(7)));
    }

    #[test]
    fn task_defaults_priority_and_completion_when_missing() {
        let task: Task = serde_json::from_value(serde_json::json!({"id": "abc", "title": "x"}))
            .expect("deserialize task");
        assert_eq!(task.id, EntityId::Text("abc".to_string()));
        assert_eq!(task.priority, Priority::Medium);
        assert!(!task.is_completed);
    }

    #[test]
    fn apply_patch_merges_only_present_fields() {
        let mut task = sample_task();
        task.apply_patch(&TaskPatch {
            title: Some("Rewrite report".to_string()),
            priority: Some(Priority::Low),
            ..TaskPatch::default()
        });
        assert_eq!(task.title, "Rewrite report");
        assert_eq!(task.priority, Priority::Low);
        assert_eq!(task.description.as_deref(), Some("quarterly"));
        assert!(!task.is_completed);
    }

    #[test]
    fn patch_serializes_only_set_fields() {
        let value = serde_json::to_value(TaskPatch::completion()).expect("serialize patch");
        assert_eq!(value, serde_json::json!({"is_completed": true}));
        assert!(TaskPatch::default().is_empty());
    }

    #[test]
    fn task_list_payload_accepts_page_and_bare_list() {
        let page: TaskListPayload = serde_json::from_value(serde_json::json!({
            "items": [{"id": 1, "title": "a"}],
            "total": 10,
            "limit": 1,
            "offset": 0,
            "has_next": true
        }))
        .expect("page payload");
        let page = page.into_page();
        assert_eq!(page.total, 10);
        assert!(page.has_next);

        let list: TaskListPayload =
            serde_json::from_value(serde_json::json!([{"id": 1, "title": "a"}, {"id": 2, "title": "b"}]))
                .expect("list payload");
        let page = list.into_page();
        assert_eq!(page.items.len(), 2);
        assert!(!page.has_next);
    }

    #[test]
    fn temporary_ids_are_recognised() {
        assert!(EntityId::temporary(3).is_temporary());
        assert!(!EntityId::Number(3).is_temporary());
        assert_eq!("17".parse::<EntityId>(), Ok(EntityId::Number(17)));
        assert_eq!("temp-1".parse::<EntityId>(), Ok(EntityId::temporary(1)));
    }

    #[test]
    fn field_errors_keep_first_message_and_prefer_general() {
        let mut errors = FieldErrors::new();
        errors.push("title", "Title is required.");
        errors.push("title", "ignored");
        assert_eq!(errors.first_message(), Some("Title is required."));
        errors.push(GENERAL_FIELD, "Failed to update task");
        assert_eq!(errors.first_message(), Some("Failed to update task"));
        assert_eq!(errors.len(), 2);
        errors.clear_field("title");
        assert_eq!(errors.get("title"), None);
        errors.clear();
        assert!(errors.into_result().is_ok());
    }

    #[test]
    fn due_date_normalization_accepts_common_inputs() {
        assert_eq!(
            normalize_due_date("2026-03-01T09:30").as_deref(),
            Ok("2026-03-01T09:30:00+00:00")
        );
        assert_eq!(
            normalize_due_date("2026-03-01").as_deref(),
            Ok("2026-03-01T00:00:00+00:00")
        );
        assert_eq!(
            normalize_due_date("2026-03-01T09:30:00+02:00").as_deref(),
            Ok("2026-03-01T07:30:00+00:00")
        );
        assert!(normalize_due_date("next tuesday").is_err());
    }

    proptest! {
        #[test]
        fn numeric_ids_parse_back_to_numbers(value in 0i64..i64::MAX) {
            let parsed: EntityId = value.to_string().parse().expect("parse id");
            prop_assert_eq!(parsed, EntityId::Number(value));
        }
    }
}
