use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value, json};
use uuid::Uuid;

use crate::error::ValidationError;

pub const TITLE_MAX_CHARS: usize = 255;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Todo,
    Running,
    Done,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 3] = [TaskStatus::Todo, TaskStatus::Running, TaskStatus::Done];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::Running => "running",
            Self::Done => "done",
        }
    }

    /// Human label used by the terminal views.
    pub fn label(self) -> &'static str {
        match self {
            Self::Todo => "To Do",
            Self::Running => "In Progress",
            Self::Done => "Done",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "todo" => Ok(Self::Todo),
            "running" => Ok(Self::Running),
            "done" => Ok(Self::Done),
            other => Err(ValidationError::new(format!(
                "unknown status '{other}' (expected todo, running or done)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: Uuid,

    pub title: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub status: TaskStatus,

    #[serde(default, deserialize_with = "null_as_zero")]
    pub hours_spent: f64,

    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn short_id(&self) -> String {
        self.id.simple().to_string()[..8].to_string()
    }
}

fn null_as_zero<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(0.0))
}

/// Fields accepted when creating a task. Unset fields take the store defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NewTask {
    pub title: String,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub hours_spent: Option<f64>,
    pub due_date: Option<DateTime<Utc>>,
}

impl NewTask {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_title(&self.title)?;
        if let Some(hours) = self.hours_spent {
            validate_hours(hours)?;
        }
        Ok(())
    }

    /// Builds the insert record with `status` and `hours_spent` defaulted.
    pub fn to_row(&self) -> Map<String, Value> {
        let mut row = Map::new();
        row.insert("title".to_string(), json!(self.title.trim()));
        row.insert(
            "description".to_string(),
            json!(normalize_description(self.description.as_deref())),
        );
        row.insert(
            "status".to_string(),
            json!(self.status.unwrap_or_default()),
        );
        row.insert(
            "hours_spent".to_string(),
            json!(self.hours_spent.unwrap_or(0.0)),
        );
        row.insert("due_date".to_string(), json!(self.due_date));
        row
    }
}

/// Partial update. Nullable columns use `Some(None)` to clear the value.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub status: Option<TaskStatus>,
    pub hours_spent: Option<f64>,
    pub due_date: Option<Option<DateTime<Utc>>>,
}

impl TaskPatch {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.status.is_none()
            && self.hours_spent.is_none()
            && self.due_date.is_none()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.is_empty() {
            return Err(ValidationError::new("update contains no fields"));
        }
        if let Some(title) = self.title.as_deref() {
            validate_title(title)?;
        }
        if let Some(hours) = self.hours_spent {
            validate_hours(hours)?;
        }
        Ok(())
    }

    /// Builds the update record: only the supplied fields plus `updated_at`.
    pub fn to_row(&self, updated_at: DateTime<Utc>) -> Map<String, Value> {
        let mut row = Map::new();
        if let Some(title) = self.title.as_deref() {
            row.insert("title".to_string(), json!(title.trim()));
        }
        if let Some(description) = self.description.as_ref() {
            row.insert(
                "description".to_string(),
                json!(normalize_description(description.as_deref())),
            );
        }
        if let Some(status) = self.status {
            row.insert("status".to_string(), json!(status));
        }
        if let Some(hours) = self.hours_spent {
            row.insert("hours_spent".to_string(), json!(hours));
        }
        if let Some(due_date) = self.due_date {
            row.insert("due_date".to_string(), json!(due_date));
        }
        row.insert("updated_at".to_string(), json!(updated_at));
        row
    }
}

fn validate_title(title: &str) -> Result<(), ValidationError> {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::new("title is required"));
    }
    if trimmed.chars().count() > TITLE_MAX_CHARS {
        return Err(ValidationError::new(format!(
            "title is too long (max {TITLE_MAX_CHARS} characters)"
        )));
    }
    Ok(())
}

fn validate_hours(hours: f64) -> Result<(), ValidationError> {
    if !hours.is_finite() || hours < 0.0 {
        return Err(ValidationError::new("hours spent must be a non-negative number"));
    }
    Ok(())
}

fn normalize_description(description: Option<&str>) -> Option<String> {
    description
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;

    #[test]
    fn status_parses_case_insensitively_and_rejects_unknown() {
        assert_eq!("Running".parse::<TaskStatus>().expect("parse"), TaskStatus::Running);
        assert_eq!(" done ".parse::<TaskStatus>().expect("parse"), TaskStatus::Done);
        assert!("blocked".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn task_row_with_null_hours_reads_as_zero() {
        let row = json!({
            "id": "0b9f6a52-0c63-4a43-8d1e-0c1f7a3f6a10",
            "title": "Write spec",
            "description": null,
            "status": "running",
            "hours_spent": null,
            "due_date": "2026-03-01T12:00:00+00:00",
            "created_at": "2026-02-01T08:00:00.123456+00:00",
            "updated_at": "2026-02-02T08:00:00+00:00"
        });
        let task: Task = serde_json::from_value(row).expect("decode task");
        assert_eq!(task.status, TaskStatus::Running);
        assert_eq!(task.hours_spent, 0.0);
        assert_eq!(
            task.due_date,
            Some(Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single().expect("valid"))
        );
    }

    #[test]
    fn unknown_status_in_row_fails_to_decode() {
        let row = json!({
            "id": "0b9f6a52-0c63-4a43-8d1e-0c1f7a3f6a10",
            "title": "x",
            "status": "archived",
            "created_at": "2026-02-01T08:00:00+00:00",
            "updated_at": "2026-02-01T08:00:00+00:00"
        });
        assert!(serde_json::from_value::<Task>(row).is_err());
    }

    #[test]
    fn new_task_row_applies_defaults() {
        let row = NewTask::titled("  Ship it ").to_row();
        assert_eq!(row["title"], json!("Ship it"));
        assert_eq!(row["status"], json!("todo"));
        assert_eq!(row["hours_spent"], json!(0.0));
        assert_eq!(row["description"], Value::Null);
    }

    #[test]
    fn validation_rejects_blank_and_long_titles() {
        assert!(NewTask::titled("   ").validate().is_err());
        assert!(NewTask::titled("x".repeat(TITLE_MAX_CHARS + 1)).validate().is_err());
        assert!(NewTask::titled("x".repeat(TITLE_MAX_CHARS)).validate().is_ok());
    }

    #[test]
    fn validation_rejects_negative_hours() {
        let task = NewTask {
            hours_spent: Some(-1.0),
            ..NewTask::titled("x")
        };
        assert!(task.validate().is_err());

        let patch = TaskPatch {
            hours_spent: Some(f64::NAN),
            ..TaskPatch::default()
        };
        assert!(patch.validate().is_err());
    }

    #[test]
    fn patch_row_carries_only_supplied_fields_and_clears() {
        let now = Utc.with_ymd_and_hms(2026, 2, 17, 12, 0, 0).single().expect("valid");
        let patch = TaskPatch {
            due_date: Some(None),
            status: Some(TaskStatus::Done),
            ..TaskPatch::default()
        };
        let row = patch.to_row(now);

        assert_eq!(row.len(), 3);
        assert_eq!(row["due_date"], Value::Null);
        assert_eq!(row["status"], json!("done"));
        assert!(row.contains_key("updated_at"));
        assert!(!row.contains_key("title"));
    }

    #[test]
    fn empty_patch_is_rejected() {
        assert!(TaskPatch::default().validate().is_err());
    }
}
