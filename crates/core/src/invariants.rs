//! Developer guardrails and invariants
//!
//! Debug assertions for detecting impossible states during development.
//! These checks are compiled out in release builds.

use uuid::Uuid;

use crate::models::{Message, Project, Task};

/// Validate that a stored Task is internally consistent
pub fn assert_task_invariants(task: &Task) {
    debug_assert!(
        task.project_id != Uuid::nil(),
        "Task {} has nil project_id",
        task.id
    );

    debug_assert!(
        !task.title.trim().is_empty(),
        "Task {} has empty title",
        task.id
    );

    // Version starts at 1 and only grows
    debug_assert!(task.version >= 1, "Task {} has version 0", task.id);

    debug_assert!(
        task.updated_at >= task.created_at,
        "Task {} updated before it was created",
        task.id
    );
}

/// Validate that a Project is internally consistent
pub fn assert_project_invariants(project: &Project) {
    debug_assert!(
        !project.name.trim().is_empty(),
        "Project {} has empty name",
        project.id
    );

    debug_assert!(
        project.created_by != Uuid::nil(),
        "Project {} has nil creator",
        project.id
    );

    // Members form a set
    let mut seen = std::collections::HashSet::new();
    let unique = project.members.iter().all(|m| seen.insert(*m));
    debug_assert!(unique, "Project {} has duplicate members", project.id);
}

/// Validate that a persisted message is consistent
pub fn assert_message_invariants(message: &Message) {
    debug_assert!(
        message.is_persisted(),
        "Message {} has no sequence number",
        message.id
    );

    debug_assert!(
        !message.text.trim().is_empty(),
        "Message {} has blank text",
        message.id
    );
}
