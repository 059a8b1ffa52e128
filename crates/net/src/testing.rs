//! Test doubles shared by the service and server tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use uuid::Uuid;

use taskdeck_core::{
    Database, Error, Message, MessageRepository, ProfilePatch, Project, ProjectRepository, Result,
    Role, Task, TaskPatch, TaskRepository, User, UserRepository,
};

use crate::protocol::SyncEvent;
use crate::rooms::Broadcaster;

/// Remote control for a `FaultyStore` owned by a gateway
#[derive(Clone, Default)]
pub struct FaultSwitch {
    fail_writes: Arc<AtomicBool>,
    write_delay_ms: Arc<AtomicU64>,
    writes: Arc<AtomicU64>,
}

impl FaultSwitch {
    pub fn fail_writes(&self, on: bool) {
        self.fail_writes.store(on, Ordering::SeqCst);
    }

    pub fn delay_writes(&self, delay: Duration) {
        self.write_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Writes that reached the inner database
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }
}

/// Database wrapper whose writes can be made to fail or stall
pub struct FaultyStore {
    inner: Database,
    switch: FaultSwitch,
}

impl FaultyStore {
    pub fn new(inner: Database) -> (Self, FaultSwitch) {
        let switch = FaultSwitch::default();
        (
            Self {
                inner,
                switch: switch.clone(),
            },
            switch,
        )
    }

    fn write<T>(&self, f: impl FnOnce(&Database) -> Result<T>) -> Result<T> {
        let delay = self.switch.write_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            std::thread::sleep(Duration::from_millis(delay));
        }
        if self.switch.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Io(std::io::Error::other("injected write failure")));
        }
        self.switch.writes.fetch_add(1, Ordering::SeqCst);
        f(&self.inner)
    }
}

impl UserRepository for FaultyStore {
    fn create_user(&self, user: &User) -> Result<()> {
        self.write(|db| db.create_user(user))
    }

    fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>> {
        self.inner.find_user_by_id(id)
    }

    fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        self.inner.find_user_by_email(email)
    }

    fn find_users_by_ids(&self, ids: &[Uuid]) -> Result<Vec<User>> {
        self.inner.find_users_by_ids(ids)
    }

    fn list_users(&self) -> Result<Vec<User>> {
        self.inner.list_users()
    }

    fn update_user_role(&self, user_id: Uuid, role: Role) -> Result<Option<User>> {
        self.write(|db| db.update_user_role(user_id, role))
    }

    fn update_user_profile(&self, user_id: Uuid, patch: &ProfilePatch) -> Result<Option<User>> {
        self.write(|db| db.update_user_profile(user_id, patch))
    }

    fn delete_user(&self, user_id: Uuid) -> Result<bool> {
        self.write(|db| db.delete_user(user_id))
    }
}

impl ProjectRepository for FaultyStore {
    fn create_project(&self, project: &Project) -> Result<()> {
        self.write(|db| db.create_project(project))
    }

    fn find_project_by_id(&self, id: Uuid) -> Result<Option<Project>> {
        self.inner.find_project_by_id(id)
    }

    fn update_project(&self, project: &Project) -> Result<()> {
        self.write(|db| db.update_project(project))
    }

    fn delete_project(&self, project_id: Uuid) -> Result<bool> {
        self.write(|db| db.delete_project(project_id))
    }

    fn list_projects(&self) -> Result<Vec<Project>> {
        self.inner.list_projects()
    }

    fn list_projects_for_user(&self, user_id: Uuid) -> Result<Vec<Project>> {
        self.inner.list_projects_for_user(user_id)
    }
}

impl TaskRepository for FaultyStore {
    fn create_task(&self, task: &Task) -> Result<()> {
        self.write(|db| db.create_task(task))
    }

    fn find_task_by_id(&self, id: Uuid) -> Result<Option<Task>> {
        self.inner.find_task_by_id(id)
    }

    fn apply_task_patch(&self, task_id: Uuid, patch: &TaskPatch) -> Result<Task> {
        self.write(|db| db.apply_task_patch(task_id, patch))
    }

    fn delete_task(&self, task_id: Uuid) -> Result<bool> {
        self.write(|db| db.delete_task(task_id))
    }

    fn list_tasks_for_project(&self, project_id: Uuid) -> Result<Vec<Task>> {
        self.inner.list_tasks_for_project(project_id)
    }

    fn list_all_tasks(&self) -> Result<Vec<Task>> {
        self.inner.list_all_tasks()
    }

    fn list_tasks_for_assignee(&self, user_id: Uuid) -> Result<Vec<Task>> {
        self.inner.list_tasks_for_assignee(user_id)
    }
}

impl MessageRepository for FaultyStore {
    fn append_message(&self, message: &Message) -> Result<Message> {
        self.write(|db| db.append_message(message))
    }

    fn find_message_by_id(&self, id: Uuid) -> Result<Option<Message>> {
        self.inner.find_message_by_id(id)
    }

    fn list_messages_for_project(&self, project_id: Uuid) -> Result<Vec<Message>> {
        self.inner.list_messages_for_project(project_id)
    }

    fn count_messages_for_project(&self, project_id: Uuid) -> Result<u64> {
        self.inner.count_messages_for_project(project_id)
    }
}

/// Broadcaster that records instead of delivering
#[derive(Default)]
pub struct RecordingBroadcaster {
    events: Mutex<Vec<SyncEvent>>,
    evictions: Mutex<Vec<(Uuid, Uuid)>>,
    closed: Mutex<Vec<Uuid>>,
    rooms: Mutex<HashMap<Uuid, Vec<Uuid>>>,
}

impl RecordingBroadcaster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Pretend `user_id` has a session in the project's room
    pub fn subscribe(&self, project_id: Uuid, user_id: Uuid) {
        self.rooms
            .lock()
            .unwrap()
            .entry(project_id)
            .or_default()
            .push(user_id);
    }

    pub fn events(&self) -> Vec<SyncEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn evictions(&self) -> Vec<(Uuid, Uuid)> {
        self.evictions.lock().unwrap().clone()
    }

    pub fn closed(&self) -> Vec<Uuid> {
        self.closed.lock().unwrap().clone()
    }
}

impl Broadcaster for RecordingBroadcaster {
    fn broadcast(&self, project_id: Uuid, event: SyncEvent) -> usize {
        assert_eq!(event.project_id(), project_id, "event sent to the wrong room");
        self.events.lock().unwrap().push(event);
        self.subscribers(project_id).len()
    }

    fn subscribers(&self, project_id: Uuid) -> Vec<Uuid> {
        self.rooms
            .lock()
            .unwrap()
            .get(&project_id)
            .cloned()
            .unwrap_or_default()
    }

    fn rooms_for_user(&self, user_id: Uuid) -> Vec<Uuid> {
        self.rooms
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, users)| users.contains(&user_id))
            .map(|(project_id, _)| *project_id)
            .collect()
    }

    fn evict(&self, project_id: Uuid, user_id: Uuid) -> usize {
        self.evictions.lock().unwrap().push((project_id, user_id));
        let mut rooms = self.rooms.lock().unwrap();
        let Some(users) = rooms.get_mut(&project_id) else {
            return 0;
        };
        let before = users.len();
        users.retain(|u| *u != user_id);
        before - users.len()
    }

    fn close_room(&self, project_id: Uuid) -> usize {
        self.closed.lock().unwrap().push(project_id);
        self.rooms
            .lock()
            .unwrap()
            .remove(&project_id)
            .map_or(0, |users| users.len())
    }
}

/// Admin, two employees, and a project the first employee belongs to
pub struct Fixture {
    pub admin: User,
    pub e1: User,
    pub e2: User,
    pub project: Project,
}

impl Fixture {
    pub fn seed(db: &Database) -> Self {
        let admin = User::new("Ada".into(), "ada@example.com".into(), Role::Admin);
        let e1 = User::new("Eve".into(), "eve@example.com".into(), Role::Employee);
        let e2 = User::new("Bob".into(), "bob@example.com".into(), Role::Employee);
        for user in [&admin, &e1, &e2] {
            db.create_user(user).unwrap();
        }
        let project = Project::new("Launch".into(), admin.id).with_members([e1.id]);
        db.create_project(&project).unwrap();
        Self {
            admin,
            e1,
            e2,
            project,
        }
    }

    /// A task in the fixture project assigned to `e1`
    pub fn task_for_e1(&self, db: &Database) -> Task {
        let task = Task::new(self.project.id, "Write docs".into()).with_assignee(self.e1.id);
        db.create_task(&task).unwrap();
        task
    }
}
