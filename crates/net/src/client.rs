//! TCP client for the sync server
//!
//! `Client::connect` performs the handshake, then hands the socket to two
//! background tasks: a reader that decodes frames, and a connection task
//! that writes calls, matches replies to pending calls by id and forwards
//! room events to `next_event`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use taskdeck_core::{ChatEntry, Project, Role, Task, User, UserSummary};

use crate::error::{Error, Result};
use crate::frame::{read_frame, write_frame};
use crate::protocol::{ClientMessage, ProjectSnapshot, Reply, Request, RequestId, ServerMessage, SyncEvent};

/// How long a call waits for its reply
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
}

/// Event received from the server
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// A room broadcast
    Sync(SyncEvent),
    /// Server is shutting down
    Shutdown,
    /// Connection lost; always the last event
    Disconnected,
}

/// Client handle for network operations
pub struct Client {
    user: UserSummary,
    role: Role,
    state: Arc<RwLock<ConnectionState>>,
    event_rx: mpsc::UnboundedReceiver<ClientEvent>,
    cmd_tx: mpsc::Sender<ClientCommand>,
    request_timeout: Duration,
}

enum ClientCommand {
    Call {
        request: Request,
        reply: oneshot::Sender<Result<Reply>>,
    },
    Disconnect,
}

impl Client {
    /// Connect and authenticate with `token`
    pub async fn connect(addr: SocketAddr, token: &str) -> Result<Self> {
        Self::connect_with_timeout(addr, token, DEFAULT_REQUEST_TIMEOUT).await
    }

    pub async fn connect_with_timeout(
        addr: SocketAddr,
        token: &str,
        request_timeout: Duration,
    ) -> Result<Self> {
        info!(addr = %addr, "Connecting to server");

        let stream = TcpStream::connect(addr).await?;
        let (mut reader, mut writer) = tokio::io::split(stream);

        write_frame(
            &mut writer,
            &ClientMessage::Hello {
                token: token.to_string(),
            },
        )
        .await?;

        let first = tokio::time::timeout(request_timeout, read_frame::<ServerMessage, _>(&mut reader))
            .await
            .map_err(|_| Error::Timeout("handshake".into()))??;

        let (user, role) = match first {
            ServerMessage::Welcome { user, role } => (user, role),
            ServerMessage::Rejected { reason } => {
                warn!(reason = %reason, "Handshake rejected");
                return Err(Error::Rejected(reason));
            }
            _ => return Err(Error::Protocol("Expected welcome".into())),
        };

        let state = Arc::new(RwLock::new(ConnectionState::Connected));
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();

        let reader_handle = tokio::spawn(reader_task(reader, incoming_tx));
        tokio::spawn(connection_task(
            writer,
            reader_handle,
            incoming_rx,
            cmd_rx,
            event_tx,
            state.clone(),
        ));

        info!(user_id = %user.id, role = %role, "Connected");

        Ok(Client {
            user,
            role,
            state,
            event_rx,
            cmd_tx,
            request_timeout,
        })
    }

    /// The authenticated user
    pub fn user(&self) -> &UserSummary {
        &self.user
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Get the next server event
    pub async fn next_event(&mut self) -> Option<ClientEvent> {
        self.event_rx.recv().await
    }

    /// Next event if one is already queued
    pub fn try_next_event(&mut self) -> Option<ClientEvent> {
        self.event_rx.try_recv().ok()
    }

    /// Get current connection state
    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Send a request and wait for its reply
    pub async fn call(&self, request: Request) -> Result<Reply> {
        let op = request.name();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(ClientCommand::Call {
                request,
                reply: reply_tx,
            })
            .await
            .map_err(|_| Error::NotConnected)?;

        match tokio::time::timeout(self.request_timeout, reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::NotConnected),
            Err(_) => Err(Error::Timeout(op.into())),
        }
    }

    /// Subscribe to a project's room
    pub async fn join(&self, project_id: Uuid) -> Result<()> {
        let reply = self.call(Request::Join { project_id }).await?;
        expect_done("join", reply)
    }

    pub async fn leave(&self, project_id: Uuid) -> Result<()> {
        let reply = self.call(Request::Leave { project_id }).await?;
        expect_done("leave", reply)
    }

    /// Fetch a project's full state
    pub async fn fetch(&self, project_id: Uuid) -> Result<ProjectSnapshot> {
        match self.call(Request::Fetch { project_id }).await? {
            Reply::Snapshot(snapshot) => Ok(snapshot),
            other => Err(unexpected("fetch", other)),
        }
    }

    pub async fn list_projects(&self) -> Result<Vec<Project>> {
        match self.call(Request::ListProjects).await? {
            Reply::Projects(projects) => Ok(projects),
            other => Err(unexpected("list_projects", other)),
        }
    }

    pub async fn create_project(&self, project: serde_json::Value) -> Result<Project> {
        match self.call(Request::CreateProject { project }).await? {
            Reply::Project(project) => Ok(project),
            other => Err(unexpected("create_project", other)),
        }
    }

    pub async fn update_project(&self, project_id: Uuid, patch: serde_json::Value) -> Result<Project> {
        match self.call(Request::UpdateProject { project_id, patch }).await? {
            Reply::Project(project) => Ok(project),
            other => Err(unexpected("update_project", other)),
        }
    }

    pub async fn delete_project(&self, project_id: Uuid) -> Result<()> {
        let reply = self.call(Request::DeleteProject { project_id }).await?;
        expect_done("delete_project", reply)
    }

    pub async fn create_task(&self, project_id: Uuid, task: serde_json::Value) -> Result<Task> {
        match self.call(Request::CreateTask { project_id, task }).await? {
            Reply::Task(task) => Ok(task),
            other => Err(unexpected("create_task", other)),
        }
    }

    /// Patch a task; the reply is the full updated document
    pub async fn update_task(&self, task_id: Uuid, patch: serde_json::Value) -> Result<Task> {
        match self.call(Request::UpdateTask { task_id, patch }).await? {
            Reply::Task(task) => Ok(task),
            other => Err(unexpected("update_task", other)),
        }
    }

    pub async fn delete_task(&self, task_id: Uuid) -> Result<()> {
        let reply = self.call(Request::DeleteTask { task_id }).await?;
        expect_done("delete_task", reply)
    }

    /// All tasks for an admin, the caller's assigned tasks otherwise
    pub async fn list_tasks(&self) -> Result<Vec<Task>> {
        match self.call(Request::ListTasks).await? {
            Reply::Tasks(tasks) => Ok(tasks),
            other => Err(unexpected("list_tasks", other)),
        }
    }

    pub async fn send_message(&self, project_id: Uuid, text: &str) -> Result<ChatEntry> {
        let request = Request::SendMessage {
            project_id,
            text: text.to_string(),
        };
        match self.call(request).await? {
            Reply::Message(entry) => Ok(entry),
            other => Err(unexpected("send_message", other)),
        }
    }

    pub async fn list_users(&self) -> Result<Vec<User>> {
        match self.call(Request::ListUsers).await? {
            Reply::Users(users) => Ok(users),
            other => Err(unexpected("list_users", other)),
        }
    }

    pub async fn set_role(&self, user_id: Uuid, role: Role) -> Result<User> {
        match self.call(Request::SetRole { user_id, role }).await? {
            Reply::User(user) => Ok(user),
            other => Err(unexpected("set_role", other)),
        }
    }

    pub async fn delete_user(&self, user_id: Uuid) -> Result<()> {
        let reply = self.call(Request::DeleteUser { user_id }).await?;
        expect_done("delete_user", reply)
    }

    /// Edit the caller's own name or avatar
    pub async fn update_profile(&self, patch: serde_json::Value) -> Result<User> {
        match self.call(Request::UpdateProfile { patch }).await? {
            Reply::User(user) => Ok(user),
            other => Err(unexpected("update_profile", other)),
        }
    }

    /// Send a ping
    pub async fn ping(&self) -> Result<()> {
        match self.call(Request::Ping).await? {
            Reply::Pong => Ok(()),
            other => Err(unexpected("ping", other)),
        }
    }

    /// Disconnect from the server
    pub async fn disconnect(&self) {
        let _ = self.cmd_tx.send(ClientCommand::Disconnect).await;
    }
}

fn expect_done(op: &str, reply: Reply) -> Result<()> {
    match reply {
        Reply::Done => Ok(()),
        other => Err(unexpected(op, other)),
    }
}

fn unexpected(op: &str, reply: Reply) -> Error {
    Error::Protocol(format!("Unexpected reply to {}: {:?}", op, reply))
}

/// Decodes frames until the stream fails
///
/// Kept apart from the connection task's `select!` because a frame read
/// must not be cancelled halfway.
async fn reader_task(
    mut reader: ReadHalf<TcpStream>,
    incoming_tx: mpsc::UnboundedSender<Result<ServerMessage>>,
) {
    loop {
        let frame = read_frame::<ServerMessage, _>(&mut reader).await;
        let failed = frame.is_err();
        if incoming_tx.send(frame).is_err() || failed {
            break;
        }
    }
}

/// Main connection task
async fn connection_task(
    mut writer: WriteHalf<TcpStream>,
    reader_handle: JoinHandle<()>,
    mut incoming_rx: mpsc::UnboundedReceiver<Result<ServerMessage>>,
    mut cmd_rx: mpsc::Receiver<ClientCommand>,
    event_tx: mpsc::UnboundedSender<ClientEvent>,
    state: Arc<RwLock<ConnectionState>>,
) {
    let mut pending: HashMap<RequestId, oneshot::Sender<Result<Reply>>> = HashMap::new();
    let mut next_id: RequestId = 1;

    loop {
        tokio::select! {
            incoming = incoming_rx.recv() => {
                match incoming {
                    Some(Ok(ServerMessage::Reply { id, result })) => {
                        match pending.remove(&id) {
                            Some(reply) => {
                                let _ = reply.send(result.map_err(Error::from));
                            }
                            None => debug!(id, "Reply for abandoned call"),
                        }
                    }
                    Some(Ok(ServerMessage::Event { event })) => {
                        debug!(event = event.name(), project_id = %event.project_id(), "Received event");
                        let _ = event_tx.send(ClientEvent::Sync(event));
                    }
                    Some(Ok(ServerMessage::Shutdown)) => {
                        info!("Server shutting down");
                        let _ = event_tx.send(ClientEvent::Shutdown);
                        break;
                    }
                    Some(Ok(_)) => {
                        debug!("Ignoring unexpected message");
                    }
                    Some(Err(Error::ConnectionClosed)) | None => {
                        debug!("Server closed connection");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "Read error");
                        break;
                    }
                }
            }

            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(ClientCommand::Call { request, reply }) => {
                        let id = next_id;
                        next_id += 1;
                        let frame = ClientMessage::Call { id, request };
                        if let Err(e) = write_frame(&mut writer, &frame).await {
                            warn!(error = %e, "Write error");
                            let _ = reply.send(Err(e));
                            break;
                        }
                        pending.insert(id, reply);
                    }
                    Some(ClientCommand::Disconnect) | None => {
                        debug!("Disconnect requested");
                        let _ = write_frame(&mut writer, &ClientMessage::Goodbye).await;
                        break;
                    }
                }
            }
        }
    }

    // Dropping the senders fails every pending call with NotConnected
    pending.clear();
    reader_handle.abort();
    *state.write().await = ConnectionState::Disconnected;
    let _ = event_tx.send(ClientEvent::Disconnected);
    info!("Disconnected from server");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::TokenTable;
    use crate::protocol::ErrorKind;
    use crate::server::{Server, ServerConfig};
    use crate::testing::Fixture;
    use serde_json::json;
    use taskdeck_core::{Database, TaskStatus};

    struct Env {
        server: Server,
        fx: Fixture,
    }

    impl Env {
        async fn start() -> Self {
            let db = Database::open_in_memory().unwrap();
            let fx = Fixture::seed(&db);
            let auth = TokenTable::new()
                .with("admin", fx.admin.id)
                .with("e1", fx.e1.id)
                .with("e2", fx.e2.id);
            let server = Server::start(
                SocketAddr::from(([127, 0, 0, 1], 0)),
                db,
                Arc::new(auth),
                ServerConfig::default(),
            )
            .await
            .unwrap();
            Env { server, fx }
        }

        async fn client(&self, token: &str) -> Client {
            Client::connect(self.server.addr(), token).await.unwrap()
        }
    }

    async fn next_sync(client: &mut Client) -> SyncEvent {
        match tokio::time::timeout(Duration::from_secs(2), client.next_event()).await {
            Ok(Some(ClientEvent::Sync(event))) => event,
            other => panic!("expected sync event, got {:?}", other),
        }
    }

    async fn assert_quiet(client: &mut Client) {
        let waited = tokio::time::timeout(Duration::from_millis(200), client.next_event()).await;
        assert!(waited.is_err(), "unexpected event {:?}", waited);
    }

    fn remote_kind(err: Error) -> ErrorKind {
        match err {
            Error::Remote(e) => e.kind,
            other => panic!("expected remote error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_client_connect() {
        let env = Env::start().await;
        let client = env.client("e1").await;

        assert_eq!(client.user().id, env.fx.e1.id);
        assert_eq!(client.role(), Role::Employee);
        assert_eq!(client.connection_state().await, ConnectionState::Connected);
        client.ping().await.unwrap();

        client.disconnect().await;
        env.server.shutdown();
    }

    #[tokio::test]
    async fn test_bad_token_rejected() {
        let env = Env::start().await;
        match Client::connect(env.server.addr(), "wrong").await {
            Err(Error::Rejected(reason)) => assert_eq!(reason, "invalid token"),
            Err(e) => panic!("unexpected error {:?}", e),
            Ok(_) => panic!("bad token accepted"),
        }
        env.server.shutdown();
    }

    #[tokio::test]
    async fn test_admin_creates_task_member_receives_it() {
        let env = Env::start().await;
        let admin = env.client("admin").await;
        let mut e1 = env.client("e1").await;

        let project = admin
            .create_project(json!({"name": "Launch", "members": [env.fx.e1.id]}))
            .await
            .unwrap();
        e1.join(project.id).await.unwrap();
        assert!(e1.fetch(project.id).await.unwrap().tasks.is_empty());

        let task = admin
            .create_task(project.id, json!({"title": "Write docs", "status": "To-Do"}))
            .await
            .unwrap();

        match next_sync(&mut e1).await {
            SyncEvent::TaskUpdated {
                task: received,
                assignee,
            } => {
                assert_eq!(received, task);
                assert!(assignee.is_none());
                assert_eq!(received.status, TaskStatus::ToDo);
            }
            other => panic!("unexpected {:?}", other),
        }
        env.server.shutdown();
    }

    #[tokio::test]
    async fn test_assignee_status_change_reaches_room() {
        let env = Env::start().await;
        let project_id = env.fx.project.id;
        let mut admin = env.client("admin").await;
        let mut e1 = env.client("e1").await;

        let task = admin
            .create_task(project_id, json!({"title": "Write docs", "assignee": env.fx.e1.id}))
            .await
            .unwrap();
        admin.join(project_id).await.unwrap();
        e1.join(project_id).await.unwrap();

        let updated = e1
            .update_task(task.id, json!({"status": "Done"}))
            .await
            .unwrap();
        assert_eq!(updated.status, TaskStatus::Done);
        assert_eq!(updated.version, task.version + 1);

        for client in [&mut admin, &mut e1] {
            assert_eq!(
                next_sync(client).await,
                SyncEvent::TaskUpdated {
                    task: updated.clone(),
                    assignee: Some(env.fx.e1.summary()),
                }
            );
        }
        env.server.shutdown();
    }

    #[tokio::test]
    async fn test_outsider_mutation_forbidden() {
        let env = Env::start().await;
        let project_id = env.fx.project.id;
        let mut admin = env.client("admin").await;
        let e2 = env.client("e2").await;

        let task = admin
            .create_task(project_id, json!({"title": "Write docs"}))
            .await
            .unwrap();
        admin.join(project_id).await.unwrap();

        let err = e2
            .update_task(task.id, json!({"status": "Done"}))
            .await
            .unwrap_err();
        assert_eq!(remote_kind(err), ErrorKind::Forbidden);

        assert_quiet(&mut admin).await;
        let snapshot = admin.fetch(project_id).await.unwrap();
        assert_eq!(snapshot.tasks, vec![task]);
        env.server.shutdown();
    }

    #[tokio::test]
    async fn test_chat_history_for_late_joiner() {
        let env = Env::start().await;
        let project_id = env.fx.project.id;
        let admin = env.client("admin").await;

        let first = admin.send_message(project_id, "Kickoff").await.unwrap();
        let standup = admin.send_message(project_id, "Standup at 10am").await.unwrap();
        assert_eq!(env.server.rooms().room_size(project_id), 0);

        let mut e1 = env.client("e1").await;
        e1.join(project_id).await.unwrap();
        let snapshot = e1.fetch(project_id).await.unwrap();

        assert_eq!(snapshot.messages, vec![first.message, standup.message]);
        assert_eq!(snapshot.messages[1].text, "Standup at 10am");
        assert_eq!(snapshot.messages[1].seq, 2);
        assert!(snapshot.users.iter().any(|u| u.id == env.fx.admin.id && u.name == "Ada"));
        assert_quiet(&mut e1).await;
        env.server.shutdown();
    }

    #[tokio::test]
    async fn test_sequential_mutations_arrive_in_order() {
        let env = Env::start().await;
        let project_id = env.fx.project.id;
        let admin = env.client("admin").await;
        let mut c1 = env.client("e1").await;
        let mut c2 = env.client("admin").await;

        let t1 = admin.create_task(project_id, json!({"title": "T1"})).await.unwrap();
        let t2 = admin.create_task(project_id, json!({"title": "T2"})).await.unwrap();
        c1.join(project_id).await.unwrap();
        c2.join(project_id).await.unwrap();

        let t1 = admin.update_task(t1.id, json!({"progress": 50})).await.unwrap();
        let t2 = admin.update_task(t2.id, json!({"progress": 75})).await.unwrap();

        for client in [&mut c1, &mut c2] {
            for expected in [&t1, &t2] {
                match next_sync(client).await {
                    SyncEvent::TaskUpdated { task, .. } => assert_eq!(&task, expected),
                    other => panic!("unexpected {:?}", other),
                }
            }
        }
        env.server.shutdown();
    }

    #[tokio::test]
    async fn test_rooms_are_isolated() {
        let env = Env::start().await;
        let admin = env.client("admin").await;
        let mut e2 = env.client("e2").await;

        let other = e2.create_project(json!({"name": "Bob's"})).await.unwrap();
        e2.join(other.id).await.unwrap();

        admin
            .create_task(env.fx.project.id, json!({"title": "Launch only"}))
            .await
            .unwrap();
        admin
            .send_message(env.fx.project.id, "Launch only")
            .await
            .unwrap();
        let mine = admin
            .create_task(other.id, json!({"title": "For Bob"}))
            .await
            .unwrap();

        assert_eq!(
            next_sync(&mut e2).await,
            SyncEvent::TaskUpdated {
                task: mine,
                assignee: None
            }
        );
        assert_quiet(&mut e2).await;
        env.server.shutdown();
    }

    #[tokio::test]
    async fn test_removed_member_is_evicted() {
        let env = Env::start().await;
        let project_id = env.fx.project.id;
        let admin = env.client("admin").await;
        let mut e1 = env.client("e1").await;
        e1.join(project_id).await.unwrap();

        admin
            .update_project(project_id, json!({"members": []}))
            .await
            .unwrap();

        assert_eq!(next_sync(&mut e1).await, SyncEvent::AccessRevoked { project_id });
        admin
            .create_task(project_id, json!({"title": "Secret"}))
            .await
            .unwrap();
        assert_quiet(&mut e1).await;

        let err = e1.join(project_id).await.unwrap_err();
        assert_eq!(remote_kind(err), ErrorKind::Forbidden);
        env.server.shutdown();
    }

    #[tokio::test]
    async fn test_shutdown_then_disconnected() {
        let env = Env::start().await;
        let mut client = env.client("e1").await;

        env.server.shutdown();

        let events = [client.next_event().await, client.next_event().await];
        assert_eq!(
            events,
            [Some(ClientEvent::Shutdown), Some(ClientEvent::Disconnected)]
        );
        assert_eq!(client.connection_state().await, ConnectionState::Disconnected);
        assert!(matches!(client.ping().await, Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn test_task_lists_and_profile_edit() {
        let env = Env::start().await;
        let project_id = env.fx.project.id;
        let admin = env.client("admin").await;
        let e1 = env.client("e1").await;
        let e2 = env.client("e2").await;

        assert!(e1.list_tasks().await.unwrap().is_empty());
        let assigned = admin
            .create_task(project_id, json!({"title": "Yours", "assignee": env.fx.e1.id}))
            .await
            .unwrap();
        admin
            .create_task(project_id, json!({"title": "Nobody's"}))
            .await
            .unwrap();

        assert_eq!(e1.list_tasks().await.unwrap(), vec![assigned]);
        assert!(e2.list_tasks().await.unwrap().is_empty());
        assert_eq!(admin.list_tasks().await.unwrap().len(), 2);

        let me = e1
            .update_profile(json!({"name": "Eve Adams", "avatar_url": "https://example.com/eve.png"}))
            .await
            .unwrap();
        assert_eq!(me.name, "Eve Adams");
        let err = e1.update_profile(json!({"role": "admin"})).await.unwrap_err();
        assert_eq!(remote_kind(err), ErrorKind::InvalidArgument);

        let users = admin.list_users().await.unwrap();
        let eve = users.iter().find(|u| u.id == env.fx.e1.id).unwrap();
        assert_eq!(eve.name, "Eve Adams");
        assert_eq!(eve.role, Role::Employee);
        env.server.shutdown();
    }
}
