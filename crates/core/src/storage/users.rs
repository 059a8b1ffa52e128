//! User storage operations

use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Row};
use tracing::instrument;
use uuid::Uuid;

use super::parse::{parse_datetime, parse_role, parse_uuid, OptionalExt};
use crate::error::Result;
use crate::models::{ProfilePatch, Role, User};

const USER_COLUMNS: &str = "id, name, email, role, avatar_url, created_at";

pub struct UserStore<'a> {
    conn: &'a Connection,
}

impl<'a> UserStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn map_user(row: &Row<'_>) -> rusqlite::Result<User> {
        Ok(User {
            id: parse_uuid(&row.get::<_, String>(0)?)?,
            name: row.get(1)?,
            email: row.get(2)?,
            role: parse_role(&row.get::<_, String>(3)?)?,
            avatar_url: row.get(4)?,
            created_at: parse_datetime(&row.get::<_, String>(5)?)?,
        })
    }

    /// Create a new user
    #[instrument(skip(self, user), fields(user_id = %user.id, role = %user.role))]
    pub fn create(&self, user: &User) -> Result<()> {
        self.conn.execute(
            "INSERT INTO users (id, name, email, role, avatar_url, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                user.id.to_string(),
                user.name,
                user.email,
                user.role.as_str(),
                user.avatar_url,
                user.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Find user by ID
    #[instrument(skip(self))]
    pub fn find_by_id(&self, id: Uuid) -> Result<Option<User>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS))?;
        let user = stmt
            .query_row(params![id.to_string()], Self::map_user)
            .optional()?;
        Ok(user)
    }

    /// Find user by email
    #[instrument(skip(self))]
    pub fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {} FROM users WHERE email = ?1", USER_COLUMNS))?;
        let user = stmt.query_row(params![email], Self::map_user).optional()?;
        Ok(user)
    }

    /// Load the subset of `ids` that still exist
    #[instrument(skip(self, ids), fields(count = ids.len()))]
    pub fn find_by_ids(&self, ids: &[Uuid]) -> Result<Vec<User>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; ids.len()].join(", ");
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM users WHERE id IN ({}) ORDER BY name",
            USER_COLUMNS, placeholders
        ))?;

        let users = stmt
            .query_map(params_from_iter(ids.iter().map(|id| id.to_string())), Self::map_user)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(users)
    }

    /// List all users
    #[instrument(skip(self))]
    pub fn list(&self) -> Result<Vec<User>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {} FROM users ORDER BY name", USER_COLUMNS))?;
        let users = stmt
            .query_map([], Self::map_user)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(users)
    }

    /// Update a user's role
    #[instrument(skip(self))]
    pub fn update_role(&self, user_id: Uuid, role: Role) -> Result<Option<User>> {
        let changed = self.conn.execute(
            "UPDATE users SET role = ?1 WHERE id = ?2",
            params![role.as_str(), user_id.to_string()],
        )?;
        if changed == 0 {
            return Ok(None);
        }
        self.find_by_id(user_id)
    }

    /// Write the fields present in a profile patch
    #[instrument(skip(self, patch))]
    pub fn update_profile(&self, user_id: Uuid, patch: &ProfilePatch) -> Result<Option<User>> {
        patch.validate()?;

        let mut sets = Vec::new();
        let mut values: Vec<Value> = Vec::new();
        if let Some(name) = &patch.name {
            values.push(Value::Text(name.trim().to_string()));
            sets.push(format!("name = ?{}", values.len()));
        }
        if let Some(avatar_url) = &patch.avatar_url {
            values.push(avatar_url.clone().map(Value::Text).unwrap_or(Value::Null));
            sets.push(format!("avatar_url = ?{}", values.len()));
        }
        values.push(Value::Text(user_id.to_string()));
        let sql = format!("UPDATE users SET {} WHERE id = ?{}", sets.join(", "), values.len());

        if self.conn.execute(&sql, params_from_iter(values))? == 0 {
            return Ok(None);
        }
        self.find_by_id(user_id)
    }

    /// Delete a user. Tasks and messages keep their (now dangling) references.
    #[instrument(skip(self))]
    pub fn delete(&self, user_id: Uuid) -> Result<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM users WHERE id = ?1", params![user_id.to_string()])?;
        Ok(changed > 0)
    }
}
