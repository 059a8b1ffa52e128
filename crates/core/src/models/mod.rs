//! Data models for Taskdeck

mod message;
mod patch;
mod project;
mod task;
mod user;

pub use message::*;
pub use project::*;
pub use task::*;
pub use user::*;
