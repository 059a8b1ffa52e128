//! Task mutation pipeline
//!
//! validate -> authorize -> persist -> broadcast. Anything that fails
//! before the store confirms the write returns an error and broadcasts
//! nothing. The project lane is held from the write through the
//! broadcast, so a room sees task updates in persisted order.

use std::sync::Arc;

use tracing::{debug, info, instrument};
use uuid::Uuid;

use taskdeck_core::{
    Error as CoreError, MembershipResolver, NewTask, ProjectAction, Storage, Task, TaskPatch,
};

use crate::access::{
    check_assignee, load_actor, load_project, load_task, require, summarize_assignee,
};
use crate::error::Result;
use crate::gateway::Gateway;
use crate::protocol::SyncEvent;
use crate::rooms::Broadcaster;
use crate::sequencer::Sequencer;

pub struct TaskPipeline<S> {
    gateway: Gateway<S>,
    broadcaster: Arc<dyn Broadcaster>,
    sequencer: Sequencer,
}

impl<S: Storage + Send + 'static> TaskPipeline<S> {
    pub fn new(gateway: Gateway<S>, broadcaster: Arc<dyn Broadcaster>, sequencer: Sequencer) -> Self {
        Self {
            gateway,
            broadcaster,
            sequencer,
        }
    }

    async fn project_of(&self, task_id: Uuid) -> Result<Uuid> {
        let task = self
            .gateway
            .run("find task", move |s| load_task(s, task_id))
            .await?;
        Ok(task.project_id)
    }

    /// Apply an allow-listed patch and announce the full task to the room
    #[instrument(skip(self, patch), fields(actor = %actor))]
    pub async fn mutate(&self, actor: Uuid, task_id: Uuid, patch: TaskPatch) -> Result<Task> {
        patch.validate()?;
        let project_id = self.project_of(task_id).await?;
        let _lane = self.sequencer.lane(project_id).await;

        let (task, assignee) = self
            .gateway
            .run("update task", move |s| {
                let user = load_actor(s, actor)?;
                let task = load_task(s, task_id)?;
                let project = load_project(s, task.project_id)?;
                require(
                    MembershipResolver::can_mutate_task(&user, &task, &project),
                    &user,
                    "change this task",
                )?;
                if let Some(assignee) = patch.new_assignee() {
                    check_assignee(s, &project, assignee)?;
                }
                let task = s.apply_task_patch(task_id, &patch)?;
                let assignee = summarize_assignee(s, &task)?;
                Ok((task, assignee))
            })
            .await?;

        let delivered = self.broadcaster.broadcast(
            task.project_id,
            SyncEvent::TaskUpdated {
                task: task.clone(),
                assignee,
            },
        );
        debug!(task_id = %task.id, version = task.version, delivered, "Task updated");
        Ok(task)
    }

    /// Create a task from an allow-listed draft
    #[instrument(skip(self, draft), fields(actor = %actor))]
    pub async fn create(&self, actor: Uuid, project_id: Uuid, draft: NewTask) -> Result<Task> {
        draft.validate()?;
        let _lane = self.sequencer.lane(project_id).await;

        let (task, assignee) = self
            .gateway
            .run("create task", move |s| {
                let user = load_actor(s, actor)?;
                let project = load_project(s, project_id)?;
                require(
                    MembershipResolver::can_perform(&user, &project, ProjectAction::CreateTask),
                    &user,
                    "create tasks here",
                )?;
                if let Some(assignee) = draft.assignee {
                    check_assignee(s, &project, assignee)?;
                }
                let task = draft.into_task(project.id);
                s.create_task(&task)?;
                let assignee = summarize_assignee(s, &task)?;
                Ok((task, assignee))
            })
            .await?;

        let delivered = self.broadcaster.broadcast(
            project_id,
            SyncEvent::TaskUpdated {
                task: task.clone(),
                assignee,
            },
        );
        info!(task_id = %task.id, project_id = %project_id, delivered, "Task created");
        Ok(task)
    }

    /// Every task for an admin; an employee gets the tasks assigned to them
    pub async fn list(&self, actor: Uuid) -> Result<Vec<Task>> {
        self.gateway
            .run("list tasks", move |s| {
                let user = load_actor(s, actor)?;
                if user.is_admin() {
                    s.list_all_tasks()
                } else {
                    s.list_tasks_for_assignee(user.id)
                }
            })
            .await
    }

    #[instrument(skip(self), fields(actor = %actor))]
    pub async fn delete(&self, actor: Uuid, task_id: Uuid) -> Result<()> {
        let project_id = self.project_of(task_id).await?;
        let _lane = self.sequencer.lane(project_id).await;

        self.gateway
            .run("delete task", move |s| {
                let user = load_actor(s, actor)?;
                let task = load_task(s, task_id)?;
                let project = load_project(s, task.project_id)?;
                require(
                    MembershipResolver::can_perform(&user, &project, ProjectAction::DeleteTask),
                    &user,
                    "delete tasks here",
                )?;
                if !s.delete_task(task_id)? {
                    return Err(CoreError::not_found("task", task_id));
                }
                Ok(())
            })
            .await?;

        let delivered = self
            .broadcaster
            .broadcast(project_id, SyncEvent::TaskDeleted { project_id, task_id });
        info!(task_id = %task_id, project_id = %project_id, delivered, "Task deleted");
        Ok(())
    }
}
