//! Taskdeck Sync Library
//!
//! Real-time task and chat synchronization over TCP.
//!
//! # Architecture
//!
//! - **Rooms**: one per project; sessions join, mutations fan out to them
//! - **Pipeline / Relay**: authorize, persist, then broadcast
//! - **Server**: accepts sessions and routes their calls to the services
//! - **Client**: numbered calls plus a stream of room events
//! - **Reconcile**: client-side project view kept current by upserts
//! - **Protocol**: length-prefixed JSON messages
//!
//! # Usage
//!
//! ```ignore
//! // Server side
//! let server = Server::start(addr, database, Arc::new(tokens), ServerConfig::default()).await?;
//!
//! // Client side
//! let mut sync = ProjectSync::enter(server.addr(), "token", project_id).await?;
//! while let Some(event) = sync.next().await {
//!     render(sync.view());
//! }
//! ```

mod access;
pub mod auth;
pub mod client;
pub mod directory;
pub mod error;
mod frame;
pub mod gateway;
pub mod pipeline;
pub mod projects;
pub mod protocol;
pub mod reconcile;
pub mod relay;
pub mod rooms;
pub mod sequencer;
pub mod server;

#[cfg(test)]
mod testing;

pub use auth::{Authenticator, TokenTable};
pub use client::{Client, ClientEvent, ConnectionState};
pub use directory::Directory;
pub use error::{Error, Result};
pub use gateway::Gateway;
pub use pipeline::TaskPipeline;
pub use projects::ProjectService;
pub use protocol::{
    ClientMessage, ErrorKind, ProjectSnapshot, Reply, Request, ServerMessage, SyncEvent, WireError,
};
pub use reconcile::{ProjectSync, ProjectView, ViewStatus};
pub use relay::ChatRelay;
pub use rooms::{Broadcaster, ChannelManager, SessionHandle};
pub use sequencer::Sequencer;
pub use server::{Server, ServerConfig};

/// Default port for taskdeck servers
pub const DEFAULT_PORT: u16 = 7331;
