//! SQLite storage layer for Taskdeck

mod messages;
mod migrations;
mod parse;
mod projects;
mod tasks;
mod traits;
mod users;

use uuid::Uuid;

use crate::error::Result;
use crate::models::{Message, ProfilePatch, Project, Role, Task, TaskPatch, User};
use rusqlite::Connection;
use std::path::Path;
use tracing::instrument;

pub use messages::MessageStore;
pub use projects::ProjectStore;
pub use tasks::TaskStore;
pub use traits::{MessageRepository, ProjectRepository, Storage, TaskRepository, UserRepository};
pub use users::UserStore;

/// Main database handle
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open or create database at the given path
    #[instrument(skip(path), fields(path = %path.as_ref().display()))]
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Open in-memory database (for testing)
    #[instrument]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Initialize database schema via migrations
    fn init(&self) -> Result<()> {
        migrations::run_migrations(&self.conn)?;
        Ok(())
    }

    /// Get current schema version
    pub fn schema_version(&self) -> u32 {
        migrations::get_current_version(&self.conn).unwrap_or(0)
    }

    pub fn users(&self) -> UserStore<'_> {
        UserStore::new(&self.conn)
    }

    pub fn projects(&self) -> ProjectStore<'_> {
        ProjectStore::new(&self.conn)
    }

    pub fn tasks(&self) -> TaskStore<'_> {
        TaskStore::new(&self.conn)
    }

    pub fn messages(&self) -> MessageStore<'_> {
        MessageStore::new(&self.conn)
    }
}

// Repository traits delegate to the per-table stores

impl UserRepository for Database {
    fn create_user(&self, user: &User) -> Result<()> {
        self.users().create(user)
    }

    fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>> {
        self.users().find_by_id(id)
    }

    fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        self.users().find_by_email(email)
    }

    fn find_users_by_ids(&self, ids: &[Uuid]) -> Result<Vec<User>> {
        self.users().find_by_ids(ids)
    }

    fn list_users(&self) -> Result<Vec<User>> {
        self.users().list()
    }

    fn update_user_role(&self, user_id: Uuid, role: Role) -> Result<Option<User>> {
        self.users().update_role(user_id, role)
    }

    fn update_user_profile(&self, user_id: Uuid, patch: &ProfilePatch) -> Result<Option<User>> {
        self.users().update_profile(user_id, patch)
    }

    fn delete_user(&self, user_id: Uuid) -> Result<bool> {
        self.users().delete(user_id)
    }
}

impl ProjectRepository for Database {
    fn create_project(&self, project: &Project) -> Result<()> {
        self.projects().create(project)
    }

    fn find_project_by_id(&self, id: Uuid) -> Result<Option<Project>> {
        self.projects().find_by_id(id)
    }

    fn update_project(&self, project: &Project) -> Result<()> {
        self.projects().update(project)
    }

    fn delete_project(&self, project_id: Uuid) -> Result<bool> {
        self.projects().delete(project_id)
    }

    fn list_projects(&self) -> Result<Vec<Project>> {
        self.projects().list()
    }

    fn list_projects_for_user(&self, user_id: Uuid) -> Result<Vec<Project>> {
        self.projects().list_for_user(user_id)
    }
}

impl TaskRepository for Database {
    fn create_task(&self, task: &Task) -> Result<()> {
        self.tasks().create(task)
    }

    fn find_task_by_id(&self, id: Uuid) -> Result<Option<Task>> {
        self.tasks().find_by_id(id)
    }

    fn apply_task_patch(&self, task_id: Uuid, patch: &TaskPatch) -> Result<Task> {
        self.tasks().apply_patch(task_id, patch)
    }

    fn delete_task(&self, task_id: Uuid) -> Result<bool> {
        self.tasks().delete(task_id)
    }

    fn list_tasks_for_project(&self, project_id: Uuid) -> Result<Vec<Task>> {
        self.tasks().list_for_project(project_id)
    }

    fn list_all_tasks(&self) -> Result<Vec<Task>> {
        self.tasks().list_all()
    }

    fn list_tasks_for_assignee(&self, user_id: Uuid) -> Result<Vec<Task>> {
        self.tasks().list_for_assignee(user_id)
    }
}

impl MessageRepository for Database {
    fn append_message(&self, message: &Message) -> Result<Message> {
        self.messages().append(message)
    }

    fn find_message_by_id(&self, id: Uuid) -> Result<Option<Message>> {
        self.messages().find_by_id(id)
    }

    fn list_messages_for_project(&self, project_id: Uuid) -> Result<Vec<Message>> {
        self.messages().list_for_project(project_id)
    }

    fn count_messages_for_project(&self, project_id: Uuid) -> Result<u64> {
        self.messages().count_for_project(project_id)
    }
}
