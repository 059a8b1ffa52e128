//! Client-side state reconciliation
//!
//! A `ProjectView` is the client's copy of one project. It is built from a
//! snapshot and kept current by room events. Every merge is an upsert by
//! id: tasks only move forward in `version`, deleted task ids are
//! remembered, and messages are de-duplicated and kept in `seq` order.
//! Applying the same event twice, or a snapshot older than the events
//! already applied, leaves the view unchanged.
//!
//! `ProjectSync` drives one subscription: join the room, fetch the
//! snapshot, then apply events. On disconnect the view is kept but marked
//! stale until a reconnect replaces it with a fresh one.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::time::Duration;

use tracing::{debug, info, warn};
use uuid::Uuid;

use taskdeck_core::{Message, Project, Task, UserSummary};

use crate::client::{Client, ClientEvent};
use crate::error::{Error, Result};
use crate::protocol::{ErrorKind, ProjectSnapshot, SyncEvent};

/// Delay before each reconnect attempt; the last entry repeats
pub const RECONNECT_DELAYS_MS: [u64; 5] = [1000, 2000, 5000, 10_000, 30_000];

/// Backoff for the given zero-based attempt
pub fn reconnect_delay(attempt: usize) -> Duration {
    let idx = attempt.min(RECONNECT_DELAYS_MS.len() - 1);
    Duration::from_millis(RECONNECT_DELAYS_MS[idx])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewStatus {
    /// Receiving events
    Live,
    /// Connection lost; showing last known state
    Stale,
    /// Project deleted or access revoked
    Closed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectView {
    project: Project,
    tasks: HashMap<Uuid, Task>,
    tombstones: HashSet<Uuid>,
    messages: Vec<Message>,
    message_ids: HashSet<Uuid>,
    users: HashMap<Uuid, UserSummary>,
    status: ViewStatus,
}

impl ProjectView {
    pub fn from_snapshot(snapshot: ProjectSnapshot) -> Self {
        let mut view = Self {
            project: snapshot.project.clone(),
            tasks: HashMap::new(),
            tombstones: HashSet::new(),
            messages: Vec::new(),
            message_ids: HashSet::new(),
            users: HashMap::new(),
            status: ViewStatus::Live,
        };
        view.apply_snapshot(snapshot);
        view
    }

    /// Merge a snapshot fetched on the current connection
    ///
    /// No task is removed: tasks absent from the snapshot are either newer
    /// than it or already gone through a `taskDeleted` event. Tombstones
    /// for ids the snapshot no longer lists are dropped, since every
    /// event older than the deletion was applied before the fetch went out.
    pub fn apply_snapshot(&mut self, snapshot: ProjectSnapshot) {
        if snapshot.project.id != self.project.id {
            warn!(
                expected = %self.project.id,
                got = %snapshot.project.id,
                "Ignoring snapshot for another project"
            );
            return;
        }
        self.project = snapshot.project;
        let listed: HashSet<Uuid> = snapshot.tasks.iter().map(|t| t.id).collect();
        for task in snapshot.tasks {
            self.upsert_task(task);
        }
        self.tombstones.retain(|id| listed.contains(id));
        for message in snapshot.messages {
            self.insert_message(message);
        }
        for user in snapshot.users {
            self.users.insert(user.id, user);
        }
    }

    /// Apply a room event; returns whether the view changed
    pub fn apply_event(&mut self, event: &SyncEvent) -> bool {
        if event.project_id() != self.project.id {
            return false;
        }
        match event {
            SyncEvent::TaskUpdated { task, assignee } => {
                if let Some(summary) = assignee {
                    self.users.insert(summary.id, summary.clone());
                }
                self.upsert_task(task.clone())
            }
            SyncEvent::TaskDeleted { task_id, .. } => self.remove_task(*task_id),
            SyncEvent::NewMessage { message, sender } => {
                self.users.insert(sender.id, sender.clone());
                self.insert_message(message.clone())
            }
            SyncEvent::ProjectUpdated { project, users } => {
                for user in users {
                    self.users.insert(user.id, user.clone());
                }
                let changed = self.project != *project;
                self.project = project.clone();
                changed
            }
            SyncEvent::ProjectDeleted { .. } | SyncEvent::AccessRevoked { .. } => {
                let changed = self.status != ViewStatus::Closed;
                self.status = ViewStatus::Closed;
                changed
            }
        }
    }

    /// Insert or replace a task unless the held copy is newer or it was deleted
    pub fn upsert_task(&mut self, task: Task) -> bool {
        if task.project_id != self.project.id || self.tombstones.contains(&task.id) {
            return false;
        }
        match self.tasks.get(&task.id) {
            Some(held) if held.version > task.version => {
                debug!(task_id = %task.id, held = held.version, got = task.version, "Ignoring older task");
                false
            }
            Some(held) if *held == task => false,
            _ => {
                self.tasks.insert(task.id, task);
                true
            }
        }
    }

    pub fn remove_task(&mut self, task_id: Uuid) -> bool {
        self.tombstones.insert(task_id);
        self.tasks.remove(&task_id).is_some()
    }

    pub fn insert_message(&mut self, message: Message) -> bool {
        if message.project_id != self.project.id || !self.message_ids.insert(message.id) {
            return false;
        }
        let at = self.messages.partition_point(|m| m.seq <= message.seq);
        self.messages.insert(at, message);
        true
    }

    pub fn project(&self) -> &Project {
        &self.project
    }

    pub fn task(&self, task_id: Uuid) -> Option<&Task> {
        self.tasks.get(&task_id)
    }

    /// Tasks ordered by creation time
    pub fn tasks(&self) -> Vec<&Task> {
        let mut tasks: Vec<&Task> = self.tasks.values().collect();
        tasks.sort_by_key(|t| (t.created_at, t.id));
        tasks
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Chat history in `seq` order
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// True when some `seq` below the highest one held is missing.
    /// Seqs start at 1 and the store hands them out without holes.
    pub fn has_message_gap(&self) -> bool {
        self.messages
            .last()
            .is_some_and(|last| last.seq != self.messages.len() as u64)
    }

    /// Deleted task ids still remembered
    pub fn tombstone_count(&self) -> usize {
        self.tombstones.len()
    }

    /// Display name for a user id, falling back to the unknown placeholder
    pub fn user(&self, user_id: Uuid) -> UserSummary {
        self.users
            .get(&user_id)
            .cloned()
            .unwrap_or_else(|| UserSummary::unknown(user_id))
    }

    pub fn status(&self) -> ViewStatus {
        self.status
    }

    pub fn mark_stale(&mut self) {
        if self.status == ViewStatus::Live {
            self.status = ViewStatus::Stale;
        }
    }
}

/// One live subscription to a project
pub struct ProjectSync {
    addr: SocketAddr,
    token: String,
    project_id: Uuid,
    client: Option<Client>,
    view: ProjectView,
    backoff: Vec<Duration>,
}

impl ProjectSync {
    /// Connect, join the room, then fetch the snapshot
    pub async fn enter(addr: SocketAddr, token: &str, project_id: Uuid) -> Result<Self> {
        let (client, view) = open(addr, token, project_id).await?;
        info!(project_id = %project_id, tasks = view.task_count(), "Entered project");
        Ok(Self {
            addr,
            token: token.to_string(),
            project_id,
            client: Some(client),
            view,
            backoff: RECONNECT_DELAYS_MS
                .iter()
                .map(|ms| Duration::from_millis(*ms))
                .collect(),
        })
    }

    /// Replace the reconnect schedule
    pub fn with_backoff(mut self, backoff: Vec<Duration>) -> Self {
        if !backoff.is_empty() {
            self.backoff = backoff;
        }
        self
    }

    pub fn project_id(&self) -> Uuid {
        self.project_id
    }

    pub fn view(&self) -> &ProjectView {
        &self.view
    }

    /// The live connection, if any
    pub fn client(&self) -> Option<&Client> {
        self.client.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    /// Wait for the next event and apply it
    ///
    /// A chat message that leaves a hole in `seq` triggers a resync; the
    /// missing one was persisted without reaching this room. Returns
    /// `None` once the connection is gone.
    pub async fn next(&mut self) -> Option<ClientEvent> {
        let event = self.client.as_mut()?.next_event().await?;
        self.handle(&event);
        let chat = matches!(event, ClientEvent::Sync(SyncEvent::NewMessage { .. }));
        if chat && self.view.has_message_gap() {
            debug!(project_id = %self.project_id, "Chat seq gap, resyncing");
            if let Err(e) = self.resync().await {
                warn!(project_id = %self.project_id, error = %e, "Resync after seq gap failed");
            }
        }
        Some(event)
    }

    /// Apply a client event to the view
    pub fn handle(&mut self, event: &ClientEvent) -> bool {
        match event {
            ClientEvent::Sync(sync) => self.view.apply_event(sync),
            ClientEvent::Shutdown | ClientEvent::Disconnected => {
                debug!(project_id = %self.project_id, "Connection lost, view is stale");
                self.client = None;
                let was = self.view.status();
                self.view.mark_stale();
                was != self.view.status()
            }
        }
    }

    /// Merge a task returned by one of our own calls
    pub fn upsert_own(&mut self, task: Task) -> bool {
        self.view.upsert_task(task)
    }

    /// Re-fetch on the current connection and merge
    pub async fn resync(&mut self) -> Result<()> {
        let client = self.client.as_mut().ok_or(Error::NotConnected)?;
        let snapshot = client.fetch(self.project_id).await?;
        self.view.apply_snapshot(snapshot);
        drain(client, &mut self.view);
        Ok(())
    }

    /// Reconnect with backoff, replacing the view with a fresh one
    ///
    /// Gives up after `max_attempts`, or immediately when the token is
    /// refused or the project is no longer visible.
    pub async fn reconnect(&mut self, max_attempts: usize) -> Result<()> {
        if let Some(client) = self.client.take() {
            client.disconnect().await;
        }
        self.view.mark_stale();

        let mut last_err = Error::NotConnected;
        for attempt in 0..max_attempts {
            let delay = self.backoff[attempt.min(self.backoff.len() - 1)];
            tokio::time::sleep(delay).await;

            match open(self.addr, &self.token, self.project_id).await {
                Ok((client, view)) => {
                    info!(project_id = %self.project_id, attempt, "Reconnected");
                    self.client = Some(client);
                    self.view = view;
                    return Ok(());
                }
                Err(e @ Error::Rejected(_)) => return Err(e),
                Err(e) if is_access_lost(&e) => {
                    self.view.apply_event(&SyncEvent::AccessRevoked {
                        project_id: self.project_id,
                    });
                    return Err(e);
                }
                Err(e) => {
                    warn!(project_id = %self.project_id, attempt, error = %e, "Reconnect failed");
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }
}

fn is_access_lost(err: &Error) -> bool {
    matches!(err.kind(), ErrorKind::NotFound | ErrorKind::Forbidden)
}

async fn open(addr: SocketAddr, token: &str, project_id: Uuid) -> Result<(Client, ProjectView)> {
    let mut client = Client::connect(addr, token).await?;
    client.join(project_id).await?;
    let snapshot = client.fetch(project_id).await?;
    let mut view = ProjectView::from_snapshot(snapshot);
    drain(&mut client, &mut view);
    Ok((client, view))
}

/// Apply events that queued up while a fetch was in flight
fn drain(client: &mut Client, view: &mut ProjectView) {
    while let Some(event) = client.try_next_event() {
        match event {
            ClientEvent::Sync(sync) => {
                view.apply_event(&sync);
            }
            ClientEvent::Shutdown | ClientEvent::Disconnected => view.mark_stale(),
        }
    }
}
