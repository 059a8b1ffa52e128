//! Admin user directory
//!
//! Role changes and deletions take effect on live sessions: a user who
//! can no longer view a project they are watching is evicted from its room.

use std::sync::Arc;

use tracing::{info, instrument, warn};
use uuid::Uuid;

use taskdeck_core::{Error as CoreError, MembershipResolver, ProfilePatch, Role, Storage, User};

use crate::access::{load_actor, require};
use crate::error::Result;
use crate::gateway::Gateway;
use crate::rooms::Broadcaster;

pub struct Directory<S> {
    gateway: Gateway<S>,
    broadcaster: Arc<dyn Broadcaster>,
}

impl<S: Storage + Send + 'static> Directory<S> {
    pub fn new(gateway: Gateway<S>, broadcaster: Arc<dyn Broadcaster>) -> Self {
        Self {
            gateway,
            broadcaster,
        }
    }

    pub async fn list(&self, actor: Uuid) -> Result<Vec<User>> {
        self.gateway
            .run("list users", move |s| {
                let admin = load_actor(s, actor)?;
                require(MembershipResolver::can_manage_users(&admin), &admin, "list users")?;
                s.list_users()
            })
            .await
    }

    /// Change a user's role. Rooms the user is watching are rechecked
    /// after the write commits, so a join that passed its check under the
    /// old role is still caught.
    #[instrument(skip(self), fields(actor = %actor))]
    pub async fn set_role(&self, actor: Uuid, user_id: Uuid, role: Role) -> Result<User> {
        let user = self
            .gateway
            .run("set role", move |s| {
                let admin = load_actor(s, actor)?;
                require(MembershipResolver::can_manage_users(&admin), &admin, "change roles")?;
                s.update_user_role(user_id, role)?
                    .ok_or_else(|| CoreError::not_found("user", user_id))
            })
            .await?;

        let watching = self.broadcaster.rooms_for_user(user_id);
        let revoked = if watching.is_empty() {
            Vec::new()
        } else {
            let rooms = watching.clone();
            let recheck = self
                .gateway
                .run("recheck rooms", move |s| {
                    let Some(user) = s.find_user_by_id(user_id)? else {
                        return Ok(rooms);
                    };
                    let mut revoked = Vec::new();
                    for project_id in rooms {
                        let still_visible = s
                            .find_project_by_id(project_id)?
                            .is_some_and(|p| MembershipResolver::can_view(&user, &p));
                        if !still_visible {
                            revoked.push(project_id);
                        }
                    }
                    Ok(revoked)
                })
                .await;
            match recheck {
                Ok(revoked) => revoked,
                Err(e) => {
                    warn!(user_id = %user_id, error = %e, "Room recheck failed, evicting from all");
                    watching
                }
            }
        };

        for project_id in &revoked {
            self.broadcaster.evict(*project_id, user_id);
        }
        info!(user_id = %user_id, role = %role, revoked = revoked.len(), "Role changed");
        Ok(user)
    }

    /// Let a user edit their own name or avatar. Role and email are not
    /// part of the patch.
    #[instrument(skip(self, patch), fields(actor = %actor))]
    pub async fn update_profile(&self, actor: Uuid, patch: ProfilePatch) -> Result<User> {
        patch.validate()?;
        let user = self
            .gateway
            .run("update profile", move |s| {
                let user = load_actor(s, actor)?;
                s.update_user_profile(user.id, &patch)?
                    .ok_or_else(|| CoreError::not_found("user", user.id))
            })
            .await?;
        info!(user_id = %user.id, "Profile updated");
        Ok(user)
    }

    /// Delete an account. Its tasks and messages keep the dangling id.
    #[instrument(skip(self), fields(actor = %actor))]
    pub async fn delete(&self, actor: Uuid, user_id: Uuid) -> Result<()> {
        self.gateway
            .run("delete user", move |s| {
                let admin = load_actor(s, actor)?;
                require(MembershipResolver::can_manage_users(&admin), &admin, "delete users")?;
                if !s.delete_user(user_id)? {
                    return Err(CoreError::not_found("user", user_id));
                }
                Ok(())
            })
            .await?;

        let rooms = self.broadcaster.rooms_for_user(user_id);
        for project_id in &rooms {
            self.broadcaster.evict(*project_id, user_id);
        }
        info!(user_id = %user_id, rooms = rooms.len(), "User deleted");
        Ok(())
    }
}
