//! Task storage operations

use chrono::Utc;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Row};
use tracing::{debug, instrument};
use uuid::Uuid;

use super::parse::{
    parse_datetime, parse_datetime_opt, parse_priority, parse_status, parse_uuid, parse_uuid_opt,
    OptionalExt,
};
use crate::error::{Error, Result};
use crate::invariants::assert_task_invariants;
use crate::models::{Task, TaskPatch};

const TASK_COLUMNS: &str = "id, project_id, title, description, assignee_id, priority, status, \
                            deadline, progress, version, created_at, updated_at";

pub struct TaskStore<'a> {
    conn: &'a Connection,
}

impl<'a> TaskStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn map_task(row: &Row<'_>) -> rusqlite::Result<Task> {
        Ok(Task {
            id: parse_uuid(&row.get::<_, String>(0)?)?,
            project_id: parse_uuid(&row.get::<_, String>(1)?)?,
            title: row.get(2)?,
            description: row.get(3)?,
            assignee: parse_uuid_opt(row.get::<_, Option<String>>(4)?)?,
            priority: parse_priority(&row.get::<_, String>(5)?)?,
            status: parse_status(&row.get::<_, String>(6)?)?,
            deadline: parse_datetime_opt(row.get::<_, Option<String>>(7)?)?,
            progress: row.get(8)?,
            version: row.get(9)?,
            created_at: parse_datetime(&row.get::<_, String>(10)?)?,
            updated_at: parse_datetime(&row.get::<_, String>(11)?)?,
        })
    }

    fn find_in(conn: &Connection, id: Uuid) -> Result<Option<Task>> {
        let mut stmt = conn.prepare(&format!("SELECT {} FROM tasks WHERE id = ?1", TASK_COLUMNS))?;
        let task = stmt
            .query_row(params![id.to_string()], Self::map_task)
            .optional()?;
        Ok(task)
    }

    /// Create a new task
    #[instrument(skip(self, task), fields(task_id = %task.id, project_id = %task.project_id))]
    pub fn create(&self, task: &Task) -> Result<()> {
        assert_task_invariants(task);
        self.conn.execute(
            &format!(
                "INSERT INTO tasks ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                TASK_COLUMNS
            ),
            params![
                task.id.to_string(),
                task.project_id.to_string(),
                task.title,
                task.description,
                task.assignee.map(|a| a.to_string()),
                task.priority.as_str(),
                task.status.as_str(),
                task.deadline.map(|d| d.to_rfc3339()),
                task.progress,
                task.version,
                task.created_at.to_rfc3339(),
                task.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Find task by ID
    #[instrument(skip(self))]
    pub fn find_by_id(&self, id: Uuid) -> Result<Option<Task>> {
        Self::find_in(self.conn, id)
    }

    /// Write only the patched columns, bump the version, and read the result
    /// back inside one transaction.
    #[instrument(skip(self, patch))]
    pub fn apply_patch(&self, task_id: Uuid, patch: &TaskPatch) -> Result<Task> {
        patch.validate()?;

        let mut assignments = patch_assignments(patch);
        assignments.push(("updated_at", Value::Text(Utc::now().to_rfc3339())));

        let mut sql = String::from("UPDATE tasks SET version = version + 1");
        let mut values: Vec<Value> = Vec::with_capacity(assignments.len() + 2);
        for (column, value) in assignments {
            values.push(value);
            sql.push_str(&format!(", {} = ?{}", column, values.len()));
        }
        values.push(Value::Text(task_id.to_string()));
        sql.push_str(&format!(" WHERE id = ?{}", values.len()));
        if let Some(expected) = patch.expected_version {
            values.push(Value::Integer(expected as i64));
            sql.push_str(&format!(" AND version = ?{}", values.len()));
        }

        let tx = self.conn.unchecked_transaction()?;
        let changed = tx.execute(&sql, params_from_iter(values))?;

        if changed == 0 {
            let current = Self::find_in(&tx, task_id)?;
            return match current {
                None => Err(Error::not_found("task", task_id)),
                Some(task) => Err(Error::Conflict(format!(
                    "task {} is at version {}, patch expected {}",
                    task_id,
                    task.version,
                    patch.expected_version.unwrap_or_default()
                ))),
            };
        }

        let task = Self::find_in(&tx, task_id)?.ok_or_else(|| Error::not_found("task", task_id))?;
        tx.commit()?;

        assert_task_invariants(&task);
        debug!(task_id = %task.id, version = task.version, "Task patched");
        Ok(task)
    }

    /// Delete task
    #[instrument(skip(self))]
    pub fn delete(&self, task_id: Uuid) -> Result<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM tasks WHERE id = ?1", params![task_id.to_string()])?;
        Ok(changed > 0)
    }

    /// List tasks for a project, oldest first
    #[instrument(skip(self))]
    pub fn list_for_project(&self, project_id: Uuid) -> Result<Vec<Task>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM tasks WHERE project_id = ?1 ORDER BY created_at, rowid",
            TASK_COLUMNS
        ))?;
        let tasks = stmt
            .query_map(params![project_id.to_string()], Self::map_task)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(tasks)
    }

    /// List every task, oldest first
    #[instrument(skip(self))]
    pub fn list_all(&self) -> Result<Vec<Task>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM tasks ORDER BY created_at, rowid",
            TASK_COLUMNS
        ))?;
        let tasks = stmt
            .query_map([], Self::map_task)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(tasks)
    }

    /// List tasks assigned to a user in any project, oldest first
    #[instrument(skip(self))]
    pub fn list_for_assignee(&self, user_id: Uuid) -> Result<Vec<Task>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM tasks WHERE assignee_id = ?1 ORDER BY created_at, rowid",
            TASK_COLUMNS
        ))?;
        let tasks = stmt
            .query_map(params![user_id.to_string()], Self::map_task)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(tasks)
    }
}

/// Column/value pairs for the fields present in a patch
fn patch_assignments(patch: &TaskPatch) -> Vec<(&'static str, Value)> {
    let text = |s: &str| Value::Text(s.to_string());
    let text_opt = |s: Option<String>| s.map(Value::Text).unwrap_or(Value::Null);

    let mut out = Vec::new();
    if let Some(title) = &patch.title {
        out.push(("title", text(title)));
    }
    if let Some(description) = &patch.description {
        out.push(("description", text_opt(description.clone())));
    }
    if let Some(status) = patch.status {
        out.push(("status", text(status.as_str())));
    }
    if let Some(assignee) = patch.assignee {
        out.push(("assignee_id", text_opt(assignee.map(|a| a.to_string()))));
    }
    if let Some(deadline) = patch.deadline {
        out.push(("deadline", text_opt(deadline.map(|d| d.to_rfc3339()))));
    }
    if let Some(priority) = patch.priority {
        out.push(("priority", text(priority.as_str())));
    }
    if let Some(progress) = patch.progress {
        out.push(("progress", Value::Integer(progress as i64)));
    }
    out
}
