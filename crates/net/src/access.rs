//! Document loading and access checks shared by the services
//!
//! These run inside gateway closures, so they see the store directly and
//! return core errors.

use uuid::Uuid;

use taskdeck_core::{Error, MembershipResolver, Project, Result, Storage, Task, User, UserSummary};

/// Load the acting user. An unknown actor is treated as unauthorized.
pub(crate) fn load_actor<S: Storage>(store: &S, actor: Uuid) -> Result<User> {
    store
        .find_user_by_id(actor)?
        .ok_or_else(|| Error::Forbidden(format!("unknown user {}", actor)))
}

pub(crate) fn load_project<S: Storage>(store: &S, project_id: Uuid) -> Result<Project> {
    store
        .find_project_by_id(project_id)?
        .ok_or_else(|| Error::not_found("project", project_id))
}

pub(crate) fn load_task<S: Storage>(store: &S, task_id: Uuid) -> Result<Task> {
    store
        .find_task_by_id(task_id)?
        .ok_or_else(|| Error::not_found("task", task_id))
}

pub(crate) fn require(allowed: bool, user: &User, action: &str) -> Result<()> {
    if allowed {
        Ok(())
    } else {
        Err(Error::Forbidden(format!("user {} may not {}", user.id, action)))
    }
}

/// A task may only be assigned to someone who can see its project
pub(crate) fn check_assignee<S: Storage>(store: &S, project: &Project, assignee: Uuid) -> Result<()> {
    let user = store
        .find_user_by_id(assignee)?
        .ok_or_else(|| Error::InvalidArgument(format!("unknown assignee {}", assignee)))?;
    if !MembershipResolver::can_view(&user, project) {
        return Err(Error::InvalidArgument(format!(
            "assignee {} is not part of project {}",
            assignee, project.id
        )));
    }
    Ok(())
}

/// Every listed member must be an existing user
pub(crate) fn check_members<S: Storage>(store: &S, members: &[Uuid]) -> Result<()> {
    let found = store.find_users_by_ids(members)?;
    if let Some(missing) = members.iter().find(|id| !found.iter().any(|u| u.id == **id)) {
        return Err(Error::InvalidArgument(format!("unknown member {}", missing)));
    }
    Ok(())
}

/// Display info for each id, in order; deleted users become placeholders
pub(crate) fn summarize<S: Storage>(store: &S, ids: &[Uuid]) -> Result<Vec<UserSummary>> {
    let known = store.find_users_by_ids(ids)?;
    Ok(ids.iter().map(|id| UserSummary::resolve(*id, &known)).collect())
}

pub(crate) fn summarize_assignee<S: Storage>(store: &S, task: &Task) -> Result<Option<UserSummary>> {
    match task.assignee {
        Some(id) => Ok(summarize(store, &[id])?.pop()),
        None => Ok(None),
    }
}
