//! Realtime channel manager
//!
//! Maps project ids to the sessions subscribed to them and fans room
//! events out to those sessions' outbound queues. The table lives behind
//! a std mutex that is never held across an `.await`; a whole broadcast
//! runs under one lock so every member sees a room's events in call order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::protocol::{ServerMessage, SyncEvent};

pub type SessionId = Uuid;

/// Depth of each session's outbound queue
pub const SESSION_QUEUE_DEPTH: usize = 256;

/// Fan-out seam used by the pipelines
///
/// `ChannelManager` is the in-process implementation; a multi-instance
/// deployment would put a message bus behind the same calls.
pub trait Broadcaster: Send + Sync {
    /// Enqueue `event` to every session in the room. Returns how many
    /// sessions accepted it.
    fn broadcast(&self, project_id: Uuid, event: SyncEvent) -> usize;

    /// Users with at least one session in the room
    fn subscribers(&self, project_id: Uuid) -> Vec<Uuid>;

    /// Rooms in which the user has at least one session
    fn rooms_for_user(&self, user_id: Uuid) -> Vec<Uuid>;

    /// Remove the user's sessions from the room and tell them so
    fn evict(&self, project_id: Uuid, user_id: Uuid) -> usize;

    /// Drop the whole room
    fn close_room(&self, project_id: Uuid) -> usize;
}

/// One connected client's transport handle
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub id: SessionId,
    pub user_id: Uuid,
    tx: mpsc::Sender<ServerMessage>,
    kick: Arc<Notify>,
}

enum Delivery {
    Queued,
    Closed,
    Full,
}

impl SessionHandle {
    pub fn new(user_id: Uuid, tx: mpsc::Sender<ServerMessage>, kick: Arc<Notify>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            tx,
            kick,
        }
    }

    fn deliver(&self, msg: ServerMessage) -> Delivery {
        match self.tx.try_send(msg) {
            Ok(()) => Delivery::Queued,
            Err(TrySendError::Closed(_)) => Delivery::Closed,
            Err(TrySendError::Full(_)) => Delivery::Full,
        }
    }

    /// Ask the connection task to close this session
    pub fn kick(&self) {
        self.kick.notify_one();
    }
}

#[derive(Default)]
struct RoomTable {
    rooms: HashMap<Uuid, HashMap<SessionId, SessionHandle>>,
}

impl RoomTable {
    fn remove_session(&mut self, session_id: SessionId) -> usize {
        let mut left = 0;
        self.rooms.retain(|_, members| {
            if members.remove(&session_id).is_some() {
                left += 1;
            }
            !members.is_empty()
        });
        left
    }
}

/// In-process room table, cheap to clone
#[derive(Clone, Default)]
pub struct ChannelManager {
    inner: Arc<Mutex<RoomTable>>,
}

impl ChannelManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> MutexGuard<'_, RoomTable> {
        // A panic mid-update leaves at worst a stale handle, which the
        // next broadcast prunes
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a session to a room. Returns false if it was already there.
    pub fn join(&self, session: &SessionHandle, project_id: Uuid) -> bool {
        let mut table = self.table();
        let inserted = table
            .rooms
            .entry(project_id)
            .or_default()
            .insert(session.id, session.clone())
            .is_none();
        debug!(session_id = %session.id, project_id = %project_id, inserted, "Room join");
        inserted
    }

    /// Remove a session from a room. Returns false if it was not there.
    pub fn leave(&self, session_id: SessionId, project_id: Uuid) -> bool {
        let mut table = self.table();
        let Some(members) = table.rooms.get_mut(&project_id) else {
            return false;
        };
        let removed = members.remove(&session_id).is_some();
        if members.is_empty() {
            table.rooms.remove(&project_id);
        }
        removed
    }

    /// Remove a session from every room it joined
    pub fn leave_all(&self, session_id: SessionId) -> usize {
        let left = self.table().remove_session(session_id);
        debug!(session_id = %session_id, rooms = left, "Left all rooms");
        left
    }

    pub fn room_size(&self, project_id: Uuid) -> usize {
        self.table().rooms.get(&project_id).map_or(0, HashMap::len)
    }

    pub fn is_member(&self, session_id: SessionId, project_id: Uuid) -> bool {
        self.table()
            .rooms
            .get(&project_id)
            .is_some_and(|members| members.contains_key(&session_id))
    }

    pub fn room_count(&self) -> usize {
        self.table().rooms.len()
    }
}

impl Broadcaster for ChannelManager {
    fn broadcast(&self, project_id: Uuid, event: SyncEvent) -> usize {
        let mut table = self.table();
        let Some(members) = table.rooms.get(&project_id) else {
            return 0;
        };

        let mut delivered = 0;
        let mut closed = Vec::new();
        let mut slow = Vec::new();
        for session in members.values() {
            match session.deliver(ServerMessage::Event {
                event: event.clone(),
            }) {
                Delivery::Queued => delivered += 1,
                Delivery::Closed => closed.push(session.id),
                Delivery::Full => slow.push(session.clone()),
            }
        }

        for session_id in closed {
            debug!(session_id = %session_id, "Dropping closed session");
            table.remove_session(session_id);
        }
        for session in slow {
            warn!(
                session_id = %session.id,
                user_id = %session.user_id,
                project_id = %project_id,
                "Outbound queue full, kicking session"
            );
            table.remove_session(session.id);
            session.kick();
        }

        debug!(project_id = %project_id, event = event.name(), delivered, "Broadcast");
        delivered
    }

    fn subscribers(&self, project_id: Uuid) -> Vec<Uuid> {
        let table = self.table();
        let mut users: Vec<Uuid> = table
            .rooms
            .get(&project_id)
            .map(|members| members.values().map(|s| s.user_id).collect())
            .unwrap_or_default();
        users.sort();
        users.dedup();
        users
    }

    fn rooms_for_user(&self, user_id: Uuid) -> Vec<Uuid> {
        self.table()
            .rooms
            .iter()
            .filter(|(_, members)| members.values().any(|s| s.user_id == user_id))
            .map(|(project_id, _)| *project_id)
            .collect()
    }

    fn evict(&self, project_id: Uuid, user_id: Uuid) -> usize {
        let mut table = self.table();
        let Some(members) = table.rooms.get_mut(&project_id) else {
            return 0;
        };

        let evicted: Vec<SessionHandle> = members
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        let mut slow = Vec::new();
        for session in &evicted {
            members.remove(&session.id);
            if let Delivery::Full = session.deliver(ServerMessage::Event {
                event: SyncEvent::AccessRevoked { project_id },
            }) {
                slow.push(session);
            }
        }
        if members.is_empty() {
            table.rooms.remove(&project_id);
        }
        // The notice was lost, so the client must not keep a live view
        for session in slow {
            warn!(
                session_id = %session.id,
                user_id = %user_id,
                project_id = %project_id,
                "Outbound queue full on eviction, kicking session"
            );
            table.remove_session(session.id);
            session.kick();
        }

        if !evicted.is_empty() {
            debug!(project_id = %project_id, user_id = %user_id, sessions = evicted.len(), "Evicted");
        }
        evicted.len()
    }

    fn close_room(&self, project_id: Uuid) -> usize {
        let closed = self
            .table()
            .rooms
            .remove(&project_id)
            .map_or(0, |members| members.len());
        debug!(project_id = %project_id, sessions = closed, "Room closed");
        closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskdeck_core::Task;

    fn session(user_id: Uuid, depth: usize) -> (SessionHandle, mpsc::Receiver<ServerMessage>, Arc<Notify>) {
        let (tx, rx) = mpsc::channel(depth);
        let kick = Arc::new(Notify::new());
        (SessionHandle::new(user_id, tx, kick.clone()), rx, kick)
    }

    fn task_event(project_id: Uuid, title: &str) -> SyncEvent {
        SyncEvent::TaskUpdated {
            task: Task::new(project_id, title.into()),
            assignee: None,
        }
    }

    fn title_of(msg: ServerMessage) -> String {
        match msg {
            ServerMessage::Event {
                event: SyncEvent::TaskUpdated { task, .. },
            } => task.title,
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_join_is_idempotent() {
        let rooms = ChannelManager::new();
        let project = Uuid::new_v4();
        let (s, _rx, _) = session(Uuid::new_v4(), 8);

        assert!(rooms.join(&s, project));
        assert!(!rooms.join(&s, project));
        assert_eq!(rooms.room_size(project), 1);

        assert!(rooms.leave(s.id, project));
        assert!(!rooms.leave(s.id, project));
        assert_eq!(rooms.room_count(), 0);
    }

    #[test]
    fn test_broadcast_to_empty_room_is_noop() {
        let rooms = ChannelManager::new();
        assert_eq!(rooms.broadcast(Uuid::new_v4(), task_event(Uuid::new_v4(), "x")), 0);
    }

    #[test]
    fn test_room_isolation() {
        let rooms = ChannelManager::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let (in_a, mut rx_a, _) = session(Uuid::new_v4(), 8);
        let (in_b, mut rx_b, _) = session(Uuid::new_v4(), 8);
        rooms.join(&in_a, a);
        rooms.join(&in_b, b);

        assert_eq!(rooms.broadcast(a, task_event(a, "for a")), 1);

        assert_eq!(title_of(rx_a.try_recv().unwrap()), "for a");
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn test_broadcasts_arrive_in_call_order() {
        let rooms = ChannelManager::new();
        let project = Uuid::new_v4();
        let (s1, mut rx1, _) = session(Uuid::new_v4(), 8);
        let (s2, mut rx2, _) = session(Uuid::new_v4(), 8);
        rooms.join(&s1, project);
        rooms.join(&s2, project);

        rooms.broadcast(project, task_event(project, "T1"));
        rooms.broadcast(project, task_event(project, "T2"));

        for rx in [&mut rx1, &mut rx2] {
            assert_eq!(title_of(rx.try_recv().unwrap()), "T1");
            assert_eq!(title_of(rx.try_recv().unwrap()), "T2");
        }
    }

    #[test]
    fn test_closed_session_is_pruned() {
        let rooms = ChannelManager::new();
        let project = Uuid::new_v4();
        let (gone, rx, _) = session(Uuid::new_v4(), 8);
        let (alive, mut alive_rx, _) = session(Uuid::new_v4(), 8);
        rooms.join(&gone, project);
        rooms.join(&gone, Uuid::new_v4());
        rooms.join(&alive, project);
        drop(rx);

        assert_eq!(rooms.broadcast(project, task_event(project, "x")), 1);
        assert!(!rooms.is_member(gone.id, project));
        assert_eq!(rooms.room_count(), 1);
        assert!(alive_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_full_session_is_kicked() {
        let rooms = ChannelManager::new();
        let project = Uuid::new_v4();
        let (slow, _rx, kick) = session(Uuid::new_v4(), 1);
        rooms.join(&slow, project);

        assert_eq!(rooms.broadcast(project, task_event(project, "1")), 1);
        assert_eq!(rooms.broadcast(project, task_event(project, "2")), 0);

        assert!(!rooms.is_member(slow.id, project));
        // The stored permit completes immediately
        tokio::time::timeout(std::time::Duration::from_secs(1), kick.notified())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_evict_kicks_session_with_full_queue() {
        let rooms = ChannelManager::new();
        let project = Uuid::new_v4();
        let other_room = Uuid::new_v4();
        let user = Uuid::new_v4();
        let (slow, mut rx, kick) = session(user, 1);
        rooms.join(&slow, project);
        rooms.join(&slow, other_room);
        assert_eq!(rooms.broadcast(project, task_event(project, "fills queue")), 1);

        assert_eq!(rooms.evict(project, user), 1);

        assert!(!rooms.is_member(slow.id, project));
        assert!(!rooms.is_member(slow.id, other_room));
        tokio::time::timeout(std::time::Duration::from_secs(1), kick.notified())
            .await
            .unwrap();
        // Only the event that filled the queue is there; the revocation was dropped
        assert_eq!(title_of(rx.try_recv().unwrap()), "fills queue");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_evict_with_room_in_queue_does_not_kick() {
        let rooms = ChannelManager::new();
        let project = Uuid::new_v4();
        let user = Uuid::new_v4();
        let (s, mut rx, kick) = session(user, 2);
        rooms.join(&s, project);

        assert_eq!(rooms.evict(project, user), 1);

        assert!(matches!(
            rx.try_recv().unwrap(),
            ServerMessage::Event {
                event: SyncEvent::AccessRevoked { .. }
            }
        ));
        let kicked = tokio::time::timeout(std::time::Duration::from_millis(50), kick.notified()).await;
        assert!(kicked.is_err());
    }

    #[test]
    fn test_leave_all() {
        let rooms = ChannelManager::new();
        let (s, _rx, _) = session(Uuid::new_v4(), 8);
        rooms.join(&s, Uuid::new_v4());
        rooms.join(&s, Uuid::new_v4());

        assert_eq!(rooms.leave_all(s.id), 2);
        assert_eq!(rooms.room_count(), 0);
    }

    #[test]
    fn test_evict_only_targets_user() {
        let rooms = ChannelManager::new();
        let project = Uuid::new_v4();
        let loser = Uuid::new_v4();
        let (phone, mut phone_rx, _) = session(loser, 8);
        let (laptop, _laptop_rx, _) = session(loser, 8);
        let (other, mut other_rx, _) = session(Uuid::new_v4(), 8);
        for s in [&phone, &laptop, &other] {
            rooms.join(s, project);
        }

        assert_eq!(rooms.subscribers(project).len(), 2);
        assert_eq!(rooms.rooms_for_user(loser), vec![project]);
        assert_eq!(rooms.evict(project, loser), 2);

        assert!(matches!(
            phone_rx.try_recv().unwrap(),
            ServerMessage::Event {
                event: SyncEvent::AccessRevoked { .. }
            }
        ));
        assert!(rooms.rooms_for_user(loser).is_empty());

        rooms.broadcast(project, task_event(project, "after"));
        assert!(phone_rx.try_recv().is_err());
        assert_eq!(title_of(other_rx.try_recv().unwrap()), "after");
    }

    #[test]
    fn test_close_room() {
        let rooms = ChannelManager::new();
        let project = Uuid::new_v4();
        let (s, _rx, _) = session(Uuid::new_v4(), 8);
        rooms.join(&s, project);

        assert_eq!(rooms.close_room(project), 1);
        assert_eq!(rooms.close_room(project), 0);
        assert_eq!(rooms.broadcast(project, task_event(project, "x")), 0);
    }
}
