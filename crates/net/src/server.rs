//! TCP server for the sync layer
//!
//! Each connection authenticates with a token, then issues numbered
//! calls. Replies and room events share one bounded outbound queue per
//! session, drained by a writer task. When the connection ends, for any
//! reason, the session leaves every room.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, Notify};
use tracing::{debug, error, info, warn};

use taskdeck_core::{NewProject, NewTask, ProfilePatch, ProjectPatch, Storage, TaskPatch, User};

use crate::auth::Authenticator;
use crate::directory::Directory;
use crate::error::{Error, Result};
use crate::frame::{read_frame, write_frame};
use crate::gateway::{Gateway, DEFAULT_PERSIST_TIMEOUT};
use crate::pipeline::TaskPipeline;
use crate::projects::ProjectService;
use crate::protocol::{ClientMessage, Reply, Request, ServerMessage};
use crate::relay::ChatRelay;
use crate::rooms::{Broadcaster, ChannelManager, SessionHandle, SESSION_QUEUE_DEPTH};
use crate::sequencer::Sequencer;

/// Time allowed for queued frames to flush after a session ends
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Server tuning knobs
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub max_sessions: usize,
    pub handshake_timeout: Duration,
    pub persist_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_sessions: 256,
            handshake_timeout: Duration::from_secs(10),
            persist_timeout: DEFAULT_PERSIST_TIMEOUT,
        }
    }
}

/// State shared by all connection tasks
struct Shared<S> {
    rooms: ChannelManager,
    gateway: Gateway<S>,
    pipeline: TaskPipeline<S>,
    relay: ChatRelay<S>,
    projects: ProjectService<S>,
    directory: Directory<S>,
    auth: Arc<dyn Authenticator>,
    config: ServerConfig,
    sessions: Arc<AtomicUsize>,
}

/// Running server handle
pub struct Server {
    addr: SocketAddr,
    rooms: ChannelManager,
    sessions: Arc<AtomicUsize>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Server {
    /// Bind and start accepting connections
    pub async fn start<S: Storage + Send + 'static>(
        bind: SocketAddr,
        store: S,
        auth: Arc<dyn Authenticator>,
        config: ServerConfig,
    ) -> Result<Self> {
        let listener = TcpListener::bind(bind).await?;
        let addr = listener.local_addr()?;

        let rooms = ChannelManager::new();
        let broadcaster: Arc<dyn Broadcaster> = Arc::new(rooms.clone());
        let gateway = Gateway::new(store, config.persist_timeout);
        let sequencer = Sequencer::new();
        let sessions = Arc::new(AtomicUsize::new(0));

        let shared = Arc::new(Shared {
            rooms: rooms.clone(),
            pipeline: TaskPipeline::new(gateway.clone(), broadcaster.clone(), sequencer.clone()),
            relay: ChatRelay::new(gateway.clone(), broadcaster.clone(), sequencer.clone()),
            projects: ProjectService::new(gateway.clone(), broadcaster.clone(), sequencer),
            directory: Directory::new(gateway.clone(), broadcaster),
            gateway,
            auth,
            config,
            sessions: sessions.clone(),
        });

        let (shutdown_tx, _) = broadcast::channel(1);
        tokio::spawn(accept_loop(listener, shared, shutdown_tx.clone()));

        info!(addr = %addr, "Server started");

        Ok(Server {
            addr,
            rooms,
            sessions,
            shutdown_tx,
        })
    }

    /// Get the server's bound address
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn rooms(&self) -> &ChannelManager {
        &self.rooms
    }

    /// Authenticated sessions currently connected
    pub fn session_count(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }

    /// Stop accepting and tell every session to close
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        info!("Server shutdown initiated");
    }
}

/// Counts a session against `max_sessions` while alive
struct SessionSlot(Arc<AtomicUsize>);

impl SessionSlot {
    fn acquire(count: &Arc<AtomicUsize>, max: usize) -> Option<Self> {
        count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n < max).then_some(n + 1))
            .ok()
            .map(|_| SessionSlot(count.clone()))
    }
}

impl Drop for SessionSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Accept incoming connections
async fn accept_loop<S: Storage + Send + 'static>(
    listener: TcpListener,
    shared: Arc<Shared<S>>,
    shutdown_tx: broadcast::Sender<()>,
) {
    let mut shutdown_rx = shutdown_tx.subscribe();
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        debug!(addr = %addr, "New connection");
                        tokio::spawn(handle_connection(
                            stream,
                            addr,
                            shared.clone(),
                            shutdown_tx.subscribe(),
                        ));
                    }
                    Err(e) => {
                        error!(error = %e, "Accept failed");
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!("Accept loop shutting down");
                break;
            }
        }
    }
}

/// Handle a single client connection
async fn handle_connection<S: Storage + Send + 'static>(
    stream: TcpStream,
    addr: SocketAddr,
    shared: Arc<Shared<S>>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let (mut reader, mut writer) = tokio::io::split(stream);

    let handshake = tokio::time::timeout(
        shared.config.handshake_timeout,
        handshake(&mut reader, &shared),
    )
    .await
    .unwrap_or_else(|_| Err(Error::Rejected("handshake timed out".into())));

    let user = match handshake {
        Ok(user) => user,
        Err(e) => {
            warn!(addr = %addr, error = %e, "Handshake failed");
            reject(&mut writer, &e).await;
            return;
        }
    };

    let Some(_slot) = SessionSlot::acquire(&shared.sessions, shared.config.max_sessions) else {
        warn!(addr = %addr, user_id = %user.id, "Server full");
        reject(&mut writer, &Error::Rejected("server full".into())).await;
        return;
    };

    let welcome = ServerMessage::Welcome {
        user: user.summary(),
        role: user.role,
    };
    if let Err(e) = write_frame(&mut writer, &welcome).await {
        debug!(addr = %addr, error = %e, "Failed to send welcome");
        return;
    }

    let (tx, rx) = mpsc::channel(SESSION_QUEUE_DEPTH);
    let kick = Arc::new(Notify::new());
    let session = SessionHandle::new(user.id, tx.clone(), kick.clone());
    let mut writer_handle = tokio::spawn(writer_task(writer, rx));

    info!(addr = %addr, user_id = %user.id, session_id = %session.id, "Session opened");

    // Every branch but the read ends the session, so losing a partially
    // read frame to cancellation is harmless
    loop {
        tokio::select! {
            frame = read_frame::<ClientMessage, _>(&mut reader) => {
                match frame {
                    Ok(ClientMessage::Call { id, request }) => {
                        let op = request.name();
                        let result = dispatch(&shared, &session, request)
                            .await
                            .map_err(|e| {
                                debug!(op, error = %e, "Call failed");
                                e.to_wire()
                            });
                        match tx.try_send(ServerMessage::Reply { id, result }) {
                            Ok(()) => {}
                            Err(TrySendError::Full(_)) => {
                                warn!(session_id = %session.id, "Outbound queue full, closing session");
                                break;
                            }
                            Err(TrySendError::Closed(_)) => break,
                        }
                    }
                    Ok(ClientMessage::Goodbye) => {
                        debug!(session_id = %session.id, "Client said goodbye");
                        break;
                    }
                    Ok(ClientMessage::Hello { .. }) => {
                        warn!(session_id = %session.id, "Repeated hello");
                        break;
                    }
                    Err(Error::ConnectionClosed) => {
                        debug!(session_id = %session.id, "Connection closed");
                        break;
                    }
                    Err(e) => {
                        warn!(session_id = %session.id, error = %e, "Read error");
                        break;
                    }
                }
            }
            _ = kick.notified() => {
                warn!(session_id = %session.id, user_id = %session.user_id, "Session kicked");
                break;
            }
            _ = shutdown_rx.recv() => {
                let _ = tx.try_send(ServerMessage::Shutdown);
                break;
            }
        }
    }

    let rooms_left = shared.rooms.leave_all(session.id);
    drop(session);
    drop(tx);
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer_handle)
        .await
        .is_err()
    {
        writer_handle.abort();
    }

    info!(addr = %addr, user_id = %user.id, rooms_left, "Session closed");
}

/// Read `hello`, verify the token and load the user
async fn handshake<S: Storage + Send + 'static>(
    reader: &mut ReadHalf<TcpStream>,
    shared: &Shared<S>,
) -> Result<User> {
    let token = match read_frame::<ClientMessage, _>(reader).await? {
        ClientMessage::Hello { token } => token,
        _ => return Err(Error::Protocol("Expected hello".into())),
    };

    let user_id = shared
        .auth
        .authenticate(&token)
        .ok_or_else(|| Error::Rejected("invalid token".into()))?;

    shared
        .gateway
        .run("load session user", move |s| s.find_user_by_id(user_id))
        .await?
        .ok_or_else(|| Error::Rejected("unknown user".into()))
}

async fn reject(writer: &mut WriteHalf<TcpStream>, reason: &Error) {
    let reason = match reason {
        Error::Rejected(reason) => reason.clone(),
        other => other.to_string(),
    };
    let _ = write_frame(writer, &ServerMessage::Rejected { reason }).await;
    let _ = writer.shutdown().await;
}

/// Writer task - sends queued frames to the client
async fn writer_task(mut writer: WriteHalf<TcpStream>, mut rx: mpsc::Receiver<ServerMessage>) {
    while let Some(msg) = rx.recv().await {
        if let Err(e) = write_frame(&mut writer, &msg).await {
            debug!(error = %e, "Write failed");
            break;
        }
    }
    let _ = writer.shutdown().await;
}

/// Route one call to its service
async fn dispatch<S: Storage + Send + 'static>(
    shared: &Shared<S>,
    session: &SessionHandle,
    request: Request,
) -> Result<Reply> {
    let actor = session.user_id;
    debug!(session_id = %session.id, op = request.name(), "Call");

    match request {
        Request::Join { project_id } => {
            shared
                .projects
                .join_room(&shared.rooms, session, project_id)
                .await?;
            Ok(Reply::Done)
        }
        Request::Leave { project_id } => {
            shared.rooms.leave(session.id, project_id);
            Ok(Reply::Done)
        }
        Request::Fetch { project_id } => Ok(Reply::Snapshot(
            shared.projects.snapshot(actor, project_id).await?,
        )),
        Request::ListProjects => Ok(Reply::Projects(shared.projects.list(actor).await?)),
        Request::CreateProject { project } => {
            let draft = NewProject::from_value(project)?;
            Ok(Reply::Project(shared.projects.create(actor, draft).await?))
        }
        Request::UpdateProject { project_id, patch } => {
            let patch = ProjectPatch::from_value(patch)?;
            Ok(Reply::Project(
                shared.projects.update(actor, project_id, patch).await?,
            ))
        }
        Request::DeleteProject { project_id } => {
            shared.projects.delete(actor, project_id).await?;
            Ok(Reply::Done)
        }
        Request::CreateTask { project_id, task } => {
            let draft = NewTask::from_value(task)?;
            Ok(Reply::Task(
                shared.pipeline.create(actor, project_id, draft).await?,
            ))
        }
        Request::UpdateTask { task_id, patch } => {
            let patch = TaskPatch::from_value(patch)?;
            Ok(Reply::Task(shared.pipeline.mutate(actor, task_id, patch).await?))
        }
        Request::DeleteTask { task_id } => {
            shared.pipeline.delete(actor, task_id).await?;
            Ok(Reply::Done)
        }
        Request::ListTasks => Ok(Reply::Tasks(shared.pipeline.list(actor).await?)),
        Request::SendMessage { project_id, text } => Ok(Reply::Message(
            shared.relay.send(actor, project_id, text).await?,
        )),
        Request::ListUsers => Ok(Reply::Users(shared.directory.list(actor).await?)),
        Request::SetRole { user_id, role } => Ok(Reply::User(
            shared.directory.set_role(actor, user_id, role).await?,
        )),
        Request::DeleteUser { user_id } => {
            shared.directory.delete(actor, user_id).await?;
            Ok(Reply::Done)
        }
        Request::UpdateProfile { patch } => {
            let patch = ProfilePatch::from_value(patch)?;
            Ok(Reply::User(
                shared.directory.update_profile(actor, patch).await?,
            ))
        }
        Request::Ping => Ok(Reply::Pong),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::TokenTable;
    use crate::protocol::ErrorKind;
    use crate::testing::Fixture;
    use taskdeck_core::Database;

    async fn start(config: ServerConfig) -> (Server, Fixture) {
        let db = Database::open_in_memory().unwrap();
        let fx = Fixture::seed(&db);
        let auth = TokenTable::new()
            .with("admin-token", fx.admin.id)
            .with("e1-token", fx.e1.id)
            .with("ghost-token", uuid::Uuid::new_v4());
        let server = Server::start(
            SocketAddr::from(([127, 0, 0, 1], 0)),
            db,
            Arc::new(auth),
            config,
        )
        .await
        .unwrap();
        (server, fx)
    }

    async fn raw_hello(addr: SocketAddr, token: &str) -> (TcpStream, ServerMessage) {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        write_frame(
            &mut stream,
            &ClientMessage::Hello {
                token: token.into(),
            },
        )
        .await
        .unwrap();
        let reply: ServerMessage = read_frame(&mut stream).await.unwrap();
        (stream, reply)
    }

    async fn call(stream: &mut TcpStream, id: u64, request: Request) -> ServerMessage {
        write_frame(stream, &ClientMessage::Call { id, request })
            .await
            .unwrap();
        read_frame(stream).await.unwrap()
    }

    #[tokio::test]
    async fn test_server_start() {
        let (server, _) = start(ServerConfig::default()).await;
        assert!(server.addr().port() > 0);
        server.shutdown();
    }

    #[tokio::test]
    async fn test_bad_tokens_rejected() {
        let (server, _) = start(ServerConfig::default()).await;

        for token in ["nope", "ghost-token"] {
            let (_, reply) = raw_hello(server.addr(), token).await;
            assert!(matches!(reply, ServerMessage::Rejected { .. }), "{}", token);
        }
        assert_eq!(server.session_count(), 0);
        server.shutdown();
    }

    #[tokio::test]
    async fn test_welcome_and_ping() {
        let (server, fx) = start(ServerConfig::default()).await;
        let (mut stream, reply) = raw_hello(server.addr(), "e1-token").await;

        match reply {
            ServerMessage::Welcome { user, role } => {
                assert_eq!(user.id, fx.e1.id);
                assert_eq!(role, fx.e1.role);
            }
            other => panic!("unexpected {:?}", other),
        }

        match call(&mut stream, 1, Request::Ping).await {
            ServerMessage::Reply {
                id: 1,
                result: Ok(Reply::Pong),
            } => {}
            other => panic!("unexpected {:?}", other),
        }
        server.shutdown();
    }

    #[tokio::test]
    async fn test_join_requires_view() {
        let (server, fx) = start(ServerConfig::default()).await;
        let (mut stream, _) = raw_hello(server.addr(), "e1-token").await;

        let created = call(
            &mut stream,
            1,
            Request::CreateProject {
                project: serde_json::json!({"name": "Private"}),
            },
        )
        .await;
        assert!(matches!(created, ServerMessage::Reply { result: Ok(Reply::Project(_)), .. }));

        let (mut admin, _) = raw_hello(server.addr(), "admin-token").await;
        let private = match call(&mut admin, 1, Request::ListProjects).await {
            ServerMessage::Reply {
                result: Ok(Reply::Projects(projects)),
                ..
            } => projects
                .into_iter()
                .find(|p| p.name == "Private")
                .unwrap(),
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(private.created_by, fx.e1.id);

        // Admins may join anything; e1 may join its own project but not a foreign one
        let joined = call(&mut admin, 2, Request::Join { project_id: private.id }).await;
        assert!(matches!(joined, ServerMessage::Reply { result: Ok(Reply::Done), .. }));

        let foreign = taskdeck_core::Project::new("Admin only".into(), fx.admin.id);
        let reply = call(
            &mut stream,
            2,
            Request::Join {
                project_id: foreign.id,
            },
        )
        .await;
        match reply {
            ServerMessage::Reply { result: Err(e), .. } => assert_eq!(e.kind, ErrorKind::NotFound),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(server.rooms().room_size(private.id), 1);
        server.shutdown();
    }

    #[tokio::test]
    async fn test_disconnect_leaves_rooms() {
        let (server, fx) = start(ServerConfig::default()).await;
        let (mut stream, _) = raw_hello(server.addr(), "e1-token").await;
        call(
            &mut stream,
            1,
            Request::Join {
                project_id: fx.project.id,
            },
        )
        .await;
        assert_eq!(server.rooms().room_size(fx.project.id), 1);
        assert_eq!(server.session_count(), 1);

        drop(stream);

        for _ in 0..50 {
            if server.rooms().room_size(fx.project.id) == 0 && server.session_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(server.rooms().room_size(fx.project.id), 0);
        assert_eq!(server.session_count(), 0);
        server.shutdown();
    }

    #[tokio::test]
    async fn test_max_sessions() {
        let (server, _) = start(ServerConfig {
            max_sessions: 1,
            ..ServerConfig::default()
        })
        .await;

        let (_first, reply) = raw_hello(server.addr(), "e1-token").await;
        assert!(matches!(reply, ServerMessage::Welcome { .. }));
        let (_second, reply) = raw_hello(server.addr(), "admin-token").await;
        match reply {
            ServerMessage::Rejected { reason } => assert_eq!(reason, "server full"),
            other => panic!("unexpected {:?}", other),
        }
        server.shutdown();
    }

    #[tokio::test]
    async fn test_shutdown_notifies_sessions() {
        let (server, _) = start(ServerConfig::default()).await;
        let (mut stream, _) = raw_hello(server.addr(), "e1-token").await;

        server.shutdown();

        let msg: ServerMessage = tokio::time::timeout(Duration::from_secs(2), read_frame(&mut stream))
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(msg, ServerMessage::Shutdown));
    }
}
