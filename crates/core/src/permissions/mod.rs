//! Membership resolver: who may observe or change what inside a project
//!
//! Every check here is a pure decision over the loaded documents. A `false`
//! answer is translated into a `Forbidden` error by the caller.

use crate::models::{Project, Task, User};

/// Project-scoped actions gated by the resolver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectAction {
    /// See tasks and chat, join the project's room, post messages
    View,
    CreateTask,
    DeleteTask,
    /// Rename, reschedule, change the member list
    Edit,
    Delete,
}

/// Decision functions over `User` role and `Project` membership
pub struct MembershipResolver;

impl MembershipResolver {
    /// Check if a user may perform a project-scoped action
    pub fn can_perform(user: &User, project: &Project, action: ProjectAction) -> bool {
        if user.is_admin() {
            return true;
        }

        match action {
            ProjectAction::View => project.involves(user.id),

            // Task lifecycle and project management - creator only
            ProjectAction::CreateTask => project.created_by == user.id,
            ProjectAction::DeleteTask => project.created_by == user.id,
            ProjectAction::Edit => project.created_by == user.id,
            ProjectAction::Delete => project.created_by == user.id,
        }
    }

    pub fn can_view(user: &User, project: &Project) -> bool {
        Self::can_perform(user, project, ProjectAction::View)
    }

    /// Admin, or the task's assignee
    pub fn can_mutate_task(user: &User, task: &Task, project: &Project) -> bool {
        if task.project_id != project.id {
            return false;
        }
        user.is_admin() || task.is_assigned_to(user.id)
    }

    /// Any registered user may start a project and becomes its creator
    pub fn can_create_project(_user: &User) -> bool {
        true
    }

    /// Listing users, changing roles and deleting accounts
    pub fn can_manage_users(user: &User) -> bool {
        user.is_admin()
    }
}
