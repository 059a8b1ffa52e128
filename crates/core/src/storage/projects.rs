//! Project storage operations

use rusqlite::{params, Connection, Row};
use tracing::instrument;
use uuid::Uuid;

use super::parse::{parse_datetime, parse_datetime_opt, parse_uuid, OptionalExt};
use crate::error::Result;
use crate::invariants::assert_project_invariants;
use crate::models::Project;

const PROJECT_COLUMNS: &str = "p.id, p.name, p.description, p.deadline, p.created_by, p.created_at";

pub struct ProjectStore<'a> {
    conn: &'a Connection,
}

impl<'a> ProjectStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Row mapper; members are loaded separately
    fn map_project(row: &Row<'_>) -> rusqlite::Result<Project> {
        Ok(Project {
            id: parse_uuid(&row.get::<_, String>(0)?)?,
            name: row.get(1)?,
            description: row.get(2)?,
            deadline: parse_datetime_opt(row.get::<_, Option<String>>(3)?)?,
            members: Vec::new(),
            created_by: parse_uuid(&row.get::<_, String>(4)?)?,
            created_at: parse_datetime(&row.get::<_, String>(5)?)?,
        })
    }

    fn load_members(conn: &Connection, project_id: Uuid) -> Result<Vec<Uuid>> {
        let mut stmt = conn.prepare(
            "SELECT user_id FROM project_members WHERE project_id = ?1 ORDER BY rowid",
        )?;
        let members = stmt
            .query_map(params![project_id.to_string()], |row| {
                parse_uuid(&row.get::<_, String>(0)?)
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(members)
    }

    fn write_members(conn: &Connection, project: &Project) -> Result<()> {
        conn.execute(
            "DELETE FROM project_members WHERE project_id = ?1",
            params![project.id.to_string()],
        )?;
        let mut stmt = conn.prepare(
            "INSERT OR IGNORE INTO project_members (project_id, user_id) VALUES (?1, ?2)",
        )?;
        for member in &project.members {
            stmt.execute(params![project.id.to_string(), member.to_string()])?;
        }
        Ok(())
    }

    fn with_members(&self, projects: Vec<Project>) -> Result<Vec<Project>> {
        projects
            .into_iter()
            .map(|mut p| {
                p.members = Self::load_members(self.conn, p.id)?;
                Ok(p)
            })
            .collect()
    }

    /// Create a new project
    #[instrument(skip(self, project), fields(project_id = %project.id, members = project.members.len()))]
    pub fn create(&self, project: &Project) -> Result<()> {
        assert_project_invariants(project);
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO projects (id, name, description, deadline, created_by, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                project.id.to_string(),
                project.name,
                project.description,
                project.deadline.map(|d| d.to_rfc3339()),
                project.created_by.to_string(),
                project.created_at.to_rfc3339(),
            ],
        )?;
        Self::write_members(&tx, project)?;
        tx.commit()?;
        Ok(())
    }

    /// Find project by ID
    #[instrument(skip(self))]
    pub fn find_by_id(&self, id: Uuid) -> Result<Option<Project>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM projects p WHERE p.id = ?1",
            PROJECT_COLUMNS
        ))?;

        let project = stmt
            .query_row(params![id.to_string()], Self::map_project)
            .optional()?;

        match project {
            Some(mut project) => {
                project.members = Self::load_members(self.conn, project.id)?;
                Ok(Some(project))
            }
            None => Ok(None),
        }
    }

    /// Update project fields and replace its member set
    #[instrument(skip(self, project), fields(project_id = %project.id))]
    pub fn update(&self, project: &Project) -> Result<()> {
        assert_project_invariants(project);
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "UPDATE projects SET name = ?1, description = ?2, deadline = ?3 WHERE id = ?4",
            params![
                project.name,
                project.description,
                project.deadline.map(|d| d.to_rfc3339()),
                project.id.to_string(),
            ],
        )?;
        Self::write_members(&tx, project)?;
        tx.commit()?;
        Ok(())
    }

    /// Delete project; tasks, messages and members cascade
    #[instrument(skip(self))]
    pub fn delete(&self, project_id: Uuid) -> Result<bool> {
        let changed = self.conn.execute(
            "DELETE FROM projects WHERE id = ?1",
            params![project_id.to_string()],
        )?;
        Ok(changed > 0)
    }

    /// List all projects
    #[instrument(skip(self))]
    pub fn list(&self) -> Result<Vec<Project>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM projects p ORDER BY p.created_at, p.name",
            PROJECT_COLUMNS
        ))?;
        let projects = stmt
            .query_map([], Self::map_project)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        self.with_members(projects)
    }

    /// List projects a user created or belongs to
    #[instrument(skip(self))]
    pub fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Project>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM projects p
             WHERE p.created_by = ?1
                OR EXISTS (SELECT 1 FROM project_members m
                           WHERE m.project_id = p.id AND m.user_id = ?1)
             ORDER BY p.created_at, p.name",
            PROJECT_COLUMNS
        ))?;
        let projects = stmt
            .query_map(params![user_id.to_string()], Self::map_project)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        self.with_members(projects)
    }
}
