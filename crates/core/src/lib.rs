//! Taskdeck Core Library
//!
//! Core models, membership rules, and storage for the Taskdeck tracker.

pub mod error;
pub mod invariants;
pub mod models;
pub mod permissions;
pub mod storage;

pub use error::{Error, Result};
pub use models::*;
pub use permissions::*;
pub use storage::{
    Database, MessageRepository, ProjectRepository, Storage, TaskRepository, UserRepository,
};
