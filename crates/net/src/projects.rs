//! Project lifecycle and snapshots
//!
//! Project edits go through the same lane and broadcast path as task
//! mutations. When an edit takes view access away from someone who has
//! a session in the room, that session is evicted.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{info, instrument};
use uuid::Uuid;

use taskdeck_core::{
    Error as CoreError, MembershipResolver, NewProject, Project, ProjectAction, ProjectPatch,
    Storage,
};

use crate::access::{check_members, load_actor, load_project, require, summarize};
use crate::error::Result;
use crate::gateway::Gateway;
use crate::protocol::{ProjectSnapshot, SyncEvent};
use crate::rooms::{Broadcaster, ChannelManager, SessionHandle};
use crate::sequencer::Sequencer;

pub struct ProjectService<S> {
    gateway: Gateway<S>,
    broadcaster: Arc<dyn Broadcaster>,
    sequencer: Sequencer,
}

impl<S: Storage + Send + 'static> ProjectService<S> {
    pub fn new(gateway: Gateway<S>, broadcaster: Arc<dyn Broadcaster>, sequencer: Sequencer) -> Self {
        Self {
            gateway,
            broadcaster,
            sequencer,
        }
    }

    #[instrument(skip(self, draft), fields(actor = %actor))]
    pub async fn create(&self, actor: Uuid, draft: NewProject) -> Result<Project> {
        let project = self
            .gateway
            .run("create project", move |s| {
                let user = load_actor(s, actor)?;
                require(
                    MembershipResolver::can_create_project(&user),
                    &user,
                    "create projects",
                )?;
                check_members(s, &draft.members)?;
                let project = draft.into_project(user.id);
                s.create_project(&project)?;
                Ok(project)
            })
            .await?;

        info!(project_id = %project.id, members = project.members.len(), "Project created");
        Ok(project)
    }

    #[instrument(skip(self, patch), fields(actor = %actor))]
    pub async fn update(&self, actor: Uuid, project_id: Uuid, patch: ProjectPatch) -> Result<Project> {
        patch.validate()?;
        let _lane = self.sequencer.lane(project_id).await;
        let watching = self.broadcaster.subscribers(project_id);

        let (project, users, revoked) = self
            .gateway
            .run("update project", move |s| {
                let user = load_actor(s, actor)?;
                let mut project = load_project(s, project_id)?;
                require(
                    MembershipResolver::can_perform(&user, &project, ProjectAction::Edit),
                    &user,
                    "edit this project",
                )?;
                if let Some(members) = &patch.members {
                    check_members(s, members)?;
                }
                project.apply(patch);
                s.update_project(&project)?;

                let revoked: Vec<Uuid> = s
                    .find_users_by_ids(&watching)?
                    .into_iter()
                    .filter(|u| !MembershipResolver::can_view(u, &project))
                    .map(|u| u.id)
                    .collect();

                let mut ids = vec![project.created_by];
                ids.extend(project.members.iter().filter(|id| **id != project.created_by));
                let users = summarize(s, &ids)?;
                Ok((project, users, revoked))
            })
            .await?;

        for user_id in &revoked {
            self.broadcaster.evict(project_id, *user_id);
        }
        let delivered = self.broadcaster.broadcast(
            project_id,
            SyncEvent::ProjectUpdated {
                project: project.clone(),
                users,
            },
        );
        info!(project_id = %project_id, revoked = revoked.len(), delivered, "Project updated");
        Ok(project)
    }

    /// Delete a project with its tasks and chat, then close its room
    #[instrument(skip(self), fields(actor = %actor))]
    pub async fn delete(&self, actor: Uuid, project_id: Uuid) -> Result<()> {
        let lane = self.sequencer.lane(project_id).await;

        self.gateway
            .run("delete project", move |s| {
                let user = load_actor(s, actor)?;
                let project = load_project(s, project_id)?;
                require(
                    MembershipResolver::can_perform(&user, &project, ProjectAction::Delete),
                    &user,
                    "delete this project",
                )?;
                if !s.delete_project(project_id)? {
                    return Err(CoreError::not_found("project", project_id));
                }
                Ok(())
            })
            .await?;

        let delivered = self
            .broadcaster
            .broadcast(project_id, SyncEvent::ProjectDeleted { project_id });
        self.broadcaster.close_room(project_id);
        drop(lane);
        self.sequencer.forget(project_id);
        info!(project_id = %project_id, delivered, "Project deleted");
        Ok(())
    }

    /// Projects the actor can see: all of them for an admin
    pub async fn list(&self, actor: Uuid) -> Result<Vec<Project>> {
        self.gateway
            .run("list projects", move |s| {
                let user = load_actor(s, actor)?;
                if user.is_admin() {
                    s.list_projects()
                } else {
                    s.list_projects_for_user(user.id)
                }
            })
            .await
    }

    /// Subscribe a session to a project's room if its user may view it
    ///
    /// Runs on the project's lane and joins before checking, so an edit
    /// that revokes access either lands first and fails the check, or
    /// lands after and finds the session among the room's subscribers.
    #[instrument(skip(self, rooms, session), fields(session_id = %session.id))]
    pub async fn join_room(
        &self,
        rooms: &ChannelManager,
        session: &SessionHandle,
        project_id: Uuid,
    ) -> Result<()> {
        let _lane = self.sequencer.lane(project_id).await;
        rooms.join(session, project_id);

        if let Err(e) = self.ensure_visible(session.user_id, project_id).await {
            rooms.leave(session.id, project_id);
            return Err(e);
        }
        Ok(())
    }

    /// Load a project the actor may view
    pub async fn ensure_visible(&self, actor: Uuid, project_id: Uuid) -> Result<Project> {
        self.gateway
            .run("find project", move |s| {
                let user = load_actor(s, actor)?;
                let project = load_project(s, project_id)?;
                require(
                    MembershipResolver::can_view(&user, &project),
                    &user,
                    "view this project",
                )?;
                Ok(project)
            })
            .await
    }

    /// Full project state: tasks, chat history and the people involved
    #[instrument(skip(self), fields(actor = %actor))]
    pub async fn snapshot(&self, actor: Uuid, project_id: Uuid) -> Result<ProjectSnapshot> {
        self.gateway
            .run("snapshot", move |s| {
                let user = load_actor(s, actor)?;
                let project = load_project(s, project_id)?;
                require(
                    MembershipResolver::can_view(&user, &project),
                    &user,
                    "view this project",
                )?;
                let tasks = s.list_tasks_for_project(project_id)?;
                let messages = s.list_messages_for_project(project_id)?;

                let mut ids = BTreeSet::new();
                ids.insert(project.created_by);
                ids.extend(project.members.iter().copied());
                ids.extend(tasks.iter().filter_map(|t| t.assignee));
                ids.extend(messages.iter().map(|m| m.sender_id));
                let ids: Vec<Uuid> = ids.into_iter().collect();
                let users = summarize(s, &ids)?;

                Ok(ProjectSnapshot {
                    project,
                    tasks,
                    messages,
                    users,
                })
            })
            .await
    }
}
