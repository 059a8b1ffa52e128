//! Network protocol message types
//!
//! All messages are JSON-serialized and length-prefixed on the wire.
//! A connection opens with `hello`, then carries numbered `call`s from
//! the client and `reply`/`event` frames from the server.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use taskdeck_core::{ChatEntry, Message, Project, Role, Task, User, UserSummary};

/// Correlates a `reply` with the `call` that caused it
pub type RequestId = u64;

/// Frames sent by a client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// First frame on every connection
    Hello { token: String },

    Call { id: RequestId, request: Request },

    /// Polite close; the server leaves all rooms either way
    Goodbye,
}

/// Operations a client may call
///
/// Create and patch bodies travel as raw JSON objects so the server can
/// apply its field allow-lists and reject anything else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Join {
        project_id: Uuid,
    },
    Leave {
        project_id: Uuid,
    },
    /// Full snapshot of a project
    Fetch {
        project_id: Uuid,
    },
    ListProjects,
    CreateProject {
        project: serde_json::Value,
    },
    UpdateProject {
        project_id: Uuid,
        patch: serde_json::Value,
    },
    DeleteProject {
        project_id: Uuid,
    },
    CreateTask {
        project_id: Uuid,
        task: serde_json::Value,
    },
    UpdateTask {
        task_id: Uuid,
        patch: serde_json::Value,
    },
    DeleteTask {
        task_id: Uuid,
    },
    /// Every task for an admin, otherwise the caller's assigned tasks
    ListTasks,
    SendMessage {
        project_id: Uuid,
        text: String,
    },
    ListUsers,
    SetRole {
        user_id: Uuid,
        role: Role,
    },
    DeleteUser {
        user_id: Uuid,
    },
    /// Change the caller's own name or avatar
    UpdateProfile {
        patch: serde_json::Value,
    },
    Ping,
}

impl Request {
    /// Short operation name for logs
    pub fn name(&self) -> &'static str {
        match self {
            Request::Join { .. } => "join",
            Request::Leave { .. } => "leave",
            Request::Fetch { .. } => "fetch",
            Request::ListProjects => "list_projects",
            Request::CreateProject { .. } => "create_project",
            Request::UpdateProject { .. } => "update_project",
            Request::DeleteProject { .. } => "delete_project",
            Request::CreateTask { .. } => "create_task",
            Request::UpdateTask { .. } => "update_task",
            Request::DeleteTask { .. } => "delete_task",
            Request::ListTasks => "list_tasks",
            Request::SendMessage { .. } => "send_message",
            Request::ListUsers => "list_users",
            Request::SetRole { .. } => "set_role",
            Request::DeleteUser { .. } => "delete_user",
            Request::UpdateProfile { .. } => "update_profile",
            Request::Ping => "ping",
        }
    }
}

/// Frames sent by the server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Handshake accepted
    Welcome { user: UserSummary, role: Role },

    /// Handshake refused; the server closes the connection
    Rejected { reason: String },

    Reply {
        id: RequestId,
        result: std::result::Result<Reply, WireError>,
    },

    /// Room broadcast
    Event { event: SyncEvent },

    /// Server is shutting down
    Shutdown,
}

/// Successful results of a `call`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Reply {
    Done,
    Pong,
    Snapshot(ProjectSnapshot),
    Projects(Vec<Project>),
    Project(Project),
    Task(Task),
    Tasks(Vec<Task>),
    Message(ChatEntry),
    Users(Vec<User>),
    User(User),
}

/// Events fanned out to a project's room
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SyncEvent {
    /// Full task document after a create or patch, with its assignee's
    /// display info
    TaskUpdated {
        task: Task,
        #[serde(default)]
        assignee: Option<UserSummary>,
    },
    TaskDeleted { project_id: Uuid, task_id: Uuid },
    NewMessage { message: Message, sender: UserSummary },
    /// `users` covers the creator and every member
    ProjectUpdated {
        project: Project,
        #[serde(default)]
        users: Vec<UserSummary>,
    },
    ProjectDeleted { project_id: Uuid },
    /// The receiving session was removed from the room
    AccessRevoked { project_id: Uuid },
}

impl SyncEvent {
    /// Room the event belongs to
    pub fn project_id(&self) -> Uuid {
        match self {
            SyncEvent::TaskUpdated { task, .. } => task.project_id,
            SyncEvent::NewMessage { message, .. } => message.project_id,
            SyncEvent::ProjectUpdated { project, .. } => project.id,
            SyncEvent::TaskDeleted { project_id, .. }
            | SyncEvent::ProjectDeleted { project_id }
            | SyncEvent::AccessRevoked { project_id } => *project_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SyncEvent::TaskUpdated { .. } => "taskUpdated",
            SyncEvent::TaskDeleted { .. } => "taskDeleted",
            SyncEvent::NewMessage { .. } => "newMessage",
            SyncEvent::ProjectUpdated { .. } => "projectUpdated",
            SyncEvent::ProjectDeleted { .. } => "projectDeleted",
            SyncEvent::AccessRevoked { .. } => "accessRevoked",
        }
    }
}

/// Everything a client needs to render a project from scratch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectSnapshot {
    pub project: Project,
    pub tasks: Vec<Task>,
    /// Full history in `seq` order
    pub messages: Vec<Message>,
    /// Creator, members, assignees and senders; deleted users appear as placeholders
    pub users: Vec<UserSummary>,
}

/// Error taxonomy shared by server and client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Forbidden,
    InvalidArgument,
    /// Stale `expected_version` or a concurrent change
    Conflict,
    /// Storage failure or timeout
    Unavailable,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    pub kind: ErrorKind,
    pub message: String,
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use taskdeck_core::TaskStatus;

    #[test]
    fn test_event_tags_are_camel_case() {
        let task = Task::new(Uuid::new_v4(), "Write docs".into());
        let value = serde_json::to_value(SyncEvent::TaskUpdated {
            task,
            assignee: None,
        })
        .unwrap();
        assert_eq!(value["type"], "taskUpdated");
        assert_eq!(value["task"]["status"], "To-Do");

        let value = serde_json::to_value(SyncEvent::AccessRevoked {
            project_id: Uuid::nil(),
        })
        .unwrap();
        assert_eq!(value["type"], "accessRevoked");
    }

    #[test]
    fn test_events_without_summaries_still_parse() {
        let task = Task::new(Uuid::new_v4(), "Write docs".into());
        let raw = json!({"type": "taskUpdated", "task": task});
        match serde_json::from_value::<SyncEvent>(raw).unwrap() {
            SyncEvent::TaskUpdated { assignee, .. } => assert!(assignee.is_none()),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_request_shape() {
        let task_id = Uuid::new_v4();
        let raw = json!({
            "type": "call",
            "id": 3,
            "request": {"op": "update_task", "task_id": task_id, "patch": {"status": "Done"}}
        });
        let msg: ClientMessage = serde_json::from_value(raw).unwrap();
        match msg {
            ClientMessage::Call {
                id: 3,
                request: Request::UpdateTask { task_id: got, patch },
            } => {
                assert_eq!(got, task_id);
                assert_eq!(patch["status"], "Done");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_reply_result_roundtrip() {
        let task = Task::new(Uuid::new_v4(), "Write docs".into()).with_status(TaskStatus::Done);
        let ok = ServerMessage::Reply {
            id: 1,
            result: Ok(Reply::Task(task.clone())),
        };
        let bytes = serde_json::to_vec(&ok).unwrap();
        match serde_json::from_slice::<ServerMessage>(&bytes).unwrap() {
            ServerMessage::Reply {
                id: 1,
                result: Ok(Reply::Task(got)),
            } => assert_eq!(got, task),
            other => panic!("unexpected {:?}", other),
        }

        let err = ServerMessage::Reply {
            id: 2,
            result: Err(WireError {
                kind: ErrorKind::Forbidden,
                message: "not the assignee".into(),
            }),
        };
        let bytes = serde_json::to_vec(&err).unwrap();
        match serde_json::from_slice::<ServerMessage>(&bytes).unwrap() {
            ServerMessage::Reply { result: Err(e), .. } => assert_eq!(e.kind, ErrorKind::Forbidden),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_event_project_id() {
        let project_id = Uuid::new_v4();
        let task = Task::new(project_id, "Write docs".into());
        let event = SyncEvent::TaskUpdated {
            task,
            assignee: None,
        };
        assert_eq!(event.project_id(), project_id);
        assert_eq!(
            SyncEvent::TaskDeleted {
                project_id,
                task_id: Uuid::new_v4()
            }
            .project_id(),
            project_id
        );
    }
}
