//! Chat relay
//!
//! Persists a project message, then broadcasts it with the sender's
//! summary. The project lane covers both steps, so the room receives
//! messages in `seq` order.

use std::sync::Arc;

use tracing::{debug, instrument};
use uuid::Uuid;

use taskdeck_core::{validate_text, ChatEntry, MembershipResolver, Message, Storage};

use crate::access::{load_actor, load_project, require};
use crate::error::Result;
use crate::gateway::Gateway;
use crate::protocol::SyncEvent;
use crate::rooms::Broadcaster;
use crate::sequencer::Sequencer;

pub struct ChatRelay<S> {
    gateway: Gateway<S>,
    broadcaster: Arc<dyn Broadcaster>,
    sequencer: Sequencer,
}

impl<S: Storage + Send + 'static> ChatRelay<S> {
    pub fn new(gateway: Gateway<S>, broadcaster: Arc<dyn Broadcaster>, sequencer: Sequencer) -> Self {
        Self {
            gateway,
            broadcaster,
            sequencer,
        }
    }

    #[instrument(skip(self, text), fields(actor = %actor, len = text.len()))]
    pub async fn send(&self, actor: Uuid, project_id: Uuid, text: String) -> Result<ChatEntry> {
        validate_text(&text)?;
        let _lane = self.sequencer.lane(project_id).await;

        let entry = self
            .gateway
            .run("append message", move |s| {
                let user = load_actor(s, actor)?;
                let project = load_project(s, project_id)?;
                require(
                    MembershipResolver::can_view(&user, &project),
                    &user,
                    "post in this project",
                )?;
                let message = s.append_message(&Message::new(project.id, user.id, text)?)?;
                Ok(ChatEntry {
                    message,
                    sender: user.summary(),
                })
            })
            .await?;

        let delivered = self.broadcaster.broadcast(
            project_id,
            SyncEvent::NewMessage {
                message: entry.message.clone(),
                sender: entry.sender.clone(),
            },
        );
        debug!(message_id = %entry.message.id, seq = entry.message.seq, delivered, "Message relayed");
        Ok(entry)
    }
}
