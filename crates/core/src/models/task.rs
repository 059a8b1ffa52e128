//! Task model and its allow-listed draft/patch types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::patch::{double_option, from_json, require_text};
use crate::error::{Error, Result};

/// Task status. Any state may move to any other; `Done` can be reopened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TaskStatus {
    #[default]
    #[serde(rename = "To-Do")]
    ToDo,
    #[serde(rename = "In Progress")]
    InProgress,
    #[serde(rename = "Done")]
    Done,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::ToDo => "To-Do",
            TaskStatus::InProgress => "In Progress",
            TaskStatus::Done => "Done",
        }
    }

    pub fn parse(value: &str) -> Option<TaskStatus> {
        match value {
            "To-Do" => Some(TaskStatus::ToDo),
            "In Progress" => Some(TaskStatus::InProgress),
            "Done" => Some(TaskStatus::Done),
            _ => None,
        }
    }

    pub fn all() -> &'static [TaskStatus] {
        &[TaskStatus::ToDo, TaskStatus::InProgress, TaskStatus::Done]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "Low",
            Priority::Medium => "Medium",
            Priority::High => "High",
        }
    }

    pub fn parse(value: &str) -> Option<Priority> {
        match value {
            "Low" => Some(Priority::Low),
            "Medium" => Some(Priority::Medium),
            "High" => Some(Priority::High),
            _ => None,
        }
    }
}

/// A task owned by exactly one project.
///
/// This full document is what gets broadcast after every mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    /// Immutable after creation
    pub project_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub assignee: Option<Uuid>,
    pub priority: Priority,
    pub status: TaskStatus,
    pub deadline: Option<DateTime<Utc>>,
    pub progress: u32,
    /// Bumped by every persisted patch, starting at 1
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(project_id: Uuid, title: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            project_id,
            title,
            description: None,
            assignee: None,
            priority: Priority::default(),
            status: TaskStatus::default(),
            deadline: None,
            progress: 0,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_assignee(mut self, assignee: Uuid) -> Self {
        self.assignee = Some(assignee);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }

    pub fn is_assigned_to(&self, user_id: Uuid) -> bool {
        self.assignee == Some(user_id)
    }
}

/// Fields a client may supply when creating a task
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewTask {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub assignee: Option<Uuid>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub status: Option<TaskStatus>,
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub progress: Option<u32>,
}

impl NewTask {
    pub fn titled(title: &str) -> Self {
        Self {
            title: title.to_string(),
            ..Self::default()
        }
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let draft: NewTask = from_json("task", value)?;
        draft.validate()?;
        Ok(draft)
    }

    pub fn validate(&self) -> Result<()> {
        require_text("title", &self.title)
    }

    pub fn into_task(self, project_id: Uuid) -> Task {
        let mut task = Task::new(project_id, self.title);
        task.description = self.description;
        task.assignee = self.assignee;
        task.priority = self.priority.unwrap_or_default();
        task.status = self.status.unwrap_or_default();
        task.deadline = self.deadline;
        task.progress = self.progress.unwrap_or(0);
        task
    }
}

/// Allow-listed partial update of a task.
///
/// Identifiers, `project_id` and `version` are deliberately absent so they
/// cannot be changed through this path.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskPatch {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
    #[serde(default)]
    pub status: Option<TaskStatus>,
    #[serde(default, deserialize_with = "double_option")]
    pub assignee: Option<Option<Uuid>>,
    #[serde(default, deserialize_with = "double_option")]
    pub deadline: Option<Option<DateTime<Utc>>>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub progress: Option<u32>,
    /// When set, the write is rejected unless the stored version matches
    #[serde(default)]
    pub expected_version: Option<u64>,
}

impl TaskPatch {
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let patch: TaskPatch = from_json("task patch", value)?;
        patch.validate()?;
        Ok(patch)
    }

    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn with_expected_version(mut self, version: u64) -> Self {
        self.expected_version = Some(version);
        self
    }

    /// True when no data field is set (`expected_version` alone is not a change)
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.status.is_none()
            && self.assignee.is_none()
            && self.deadline.is_none()
            && self.priority.is_none()
            && self.progress.is_none()
    }

    pub fn validate(&self) -> Result<()> {
        if self.is_empty() {
            return Err(Error::InvalidArgument("task patch has no fields".into()));
        }
        if let Some(title) = &self.title {
            require_text("title", title)?;
        }
        Ok(())
    }

    /// Assignee the patch would set, if it sets one
    pub fn new_assignee(&self) -> Option<Uuid> {
        self.assignee.flatten()
    }
}
