//! User model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::patch::{double_option, from_json, require_text};
use crate::error::{Error, Result};

/// Account role. Only admins may change it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Employee,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Employee => "employee",
        }
    }

    pub fn parse(value: &str) -> Option<Role> {
        match value {
            "admin" => Some(Role::Admin),
            "employee" => Some(Role::Employee),
            _ => None,
        }
    }

    pub fn is_admin(&self) -> bool {
        *self == Role::Admin
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(name: String, email: String, role: Role) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            email,
            role,
            avatar_url: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    pub fn with_avatar(mut self, avatar_url: String) -> Self {
        self.avatar_url = Some(avatar_url);
        self
    }

    pub fn is_admin(&self) -> bool {
        self.role.is_admin()
    }

    pub fn summary(&self) -> UserSummary {
        UserSummary {
            id: self.id,
            name: self.name.clone(),
            avatar_url: self.avatar_url.clone(),
            is_unknown: false,
        }
    }
}

/// Public projection of a user, as shown next to tasks and messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: Uuid,
    pub name: String,
    pub avatar_url: Option<String>,
    /// Set when the referenced user no longer exists
    #[serde(default)]
    pub is_unknown: bool,
}

impl UserSummary {
    pub const UNKNOWN_NAME: &'static str = "Unknown user";

    /// Placeholder for a dangling user reference
    pub fn unknown(id: Uuid) -> Self {
        Self {
            id,
            name: Self::UNKNOWN_NAME.to_string(),
            avatar_url: None,
            is_unknown: true,
        }
    }

    /// Resolve `id` against a set of loaded users, falling back to the placeholder
    pub fn resolve(id: Uuid, users: &[User]) -> Self {
        users
            .iter()
            .find(|u| u.id == id)
            .map(User::summary)
            .unwrap_or_else(|| Self::unknown(id))
    }
}

/// The fields a user may change on their own account
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfilePatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub avatar_url: Option<Option<String>>,
}

impl ProfilePatch {
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let patch: ProfilePatch = from_json("profile", value)?;
        patch.validate()?;
        Ok(patch)
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.avatar_url.is_none()
    }

    pub fn validate(&self) -> Result<()> {
        if self.is_empty() {
            return Err(Error::InvalidArgument("profile patch has no fields".into()));
        }
        if let Some(name) = &self.name {
            require_text("name", name)?;
        }
        if let Some(Some(url)) = &self.avatar_url {
            require_text("avatar_url", url)?;
        }
        Ok(())
    }
}
