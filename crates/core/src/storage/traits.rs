//! Storage repository traits
//!
//! These traits are the persistence gateway: single-document atomic
//! operations, no cross-document transactions promised to callers.
//! `Database` implements them over SQLite; tests may substitute fakes.

use uuid::Uuid;

use crate::error::Result;
use crate::models::{Message, ProfilePatch, Project, Role, Task, TaskPatch, User};

/// User repository operations
pub trait UserRepository {
    /// Create a new user
    fn create_user(&self, user: &User) -> Result<()>;

    /// Find user by ID
    fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>>;

    /// Find user by email
    fn find_user_by_email(&self, email: &str) -> Result<Option<User>>;

    /// Load every user in `ids` that still exists
    fn find_users_by_ids(&self, ids: &[Uuid]) -> Result<Vec<User>>;

    /// List all users
    fn list_users(&self) -> Result<Vec<User>>;

    /// Change a user's role, returning the updated user
    fn update_user_role(&self, user_id: Uuid, role: Role) -> Result<Option<User>>;

    /// Apply a profile patch, returning the updated user
    fn update_user_profile(&self, user_id: Uuid, patch: &ProfilePatch) -> Result<Option<User>>;

    /// Delete a user. Returns false if absent.
    fn delete_user(&self, user_id: Uuid) -> Result<bool>;
}

/// Project repository operations
pub trait ProjectRepository {
    /// Create a new project with its member set
    fn create_project(&self, project: &Project) -> Result<()>;

    /// Find project by ID
    fn find_project_by_id(&self, id: Uuid) -> Result<Option<Project>>;

    /// Overwrite project fields and member set
    fn update_project(&self, project: &Project) -> Result<()>;

    /// Delete a project (tasks and messages go with it). Returns false if absent.
    fn delete_project(&self, project_id: Uuid) -> Result<bool>;

    /// List all projects
    fn list_projects(&self) -> Result<Vec<Project>>;

    /// List projects a user created or is a member of
    fn list_projects_for_user(&self, user_id: Uuid) -> Result<Vec<Project>>;
}

/// Task repository operations
pub trait TaskRepository {
    /// Create a new task
    fn create_task(&self, task: &Task) -> Result<()>;

    /// Find task by ID
    fn find_task_by_id(&self, id: Uuid) -> Result<Option<Task>>;

    /// Atomically write only the patched fields and bump the version.
    ///
    /// Fails with `NotFound` for a missing task and `Conflict` when
    /// `patch.expected_version` does not match.
    fn apply_task_patch(&self, task_id: Uuid, patch: &TaskPatch) -> Result<Task>;

    /// Delete a task. Returns false if absent.
    fn delete_task(&self, task_id: Uuid) -> Result<bool>;

    /// List tasks of a project, oldest first
    fn list_tasks_for_project(&self, project_id: Uuid) -> Result<Vec<Task>>;

    /// List every task, oldest first
    fn list_all_tasks(&self) -> Result<Vec<Task>>;

    /// List tasks assigned to a user across all projects, oldest first
    fn list_tasks_for_assignee(&self, user_id: Uuid) -> Result<Vec<Task>>;
}

/// Message repository operations
pub trait MessageRepository {
    /// Append a message; the store assigns the next per-project `seq`
    fn append_message(&self, message: &Message) -> Result<Message>;

    /// Find message by ID
    fn find_message_by_id(&self, id: Uuid) -> Result<Option<Message>>;

    /// Full history of a project in `seq` order
    fn list_messages_for_project(&self, project_id: Uuid) -> Result<Vec<Message>>;

    /// Get message count for a project
    fn count_messages_for_project(&self, project_id: Uuid) -> Result<u64>;
}

/// Combined storage interface
///
/// Provides access to all repository operations.
/// Implementations may be backed by SQLite or test doubles.
pub trait Storage: UserRepository + ProjectRepository + TaskRepository + MessageRepository {}

// Blanket implementation: any type implementing all traits implements Storage
impl<T> Storage for T where
    T: UserRepository + ProjectRepository + TaskRepository + MessageRepository
{
}
