//! Message storage operations
//!
//! Messages are append-only. The store hands out a per-project `seq`
//! at insert time so history always reads back in send order.

use rusqlite::{params, Connection, Row};
use tracing::{debug, instrument};
use uuid::Uuid;

use super::parse::{parse_datetime, parse_uuid, OptionalExt};
use crate::error::{Error, Result};
use crate::invariants::assert_message_invariants;
use crate::models::{validate_text, Message};

const MESSAGE_COLUMNS: &str = "id, project_id, sender_id, text, seq, created_at";

pub struct MessageStore<'a> {
    conn: &'a Connection,
}

impl<'a> MessageStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn map_message(row: &Row<'_>) -> rusqlite::Result<Message> {
        Ok(Message {
            id: parse_uuid(&row.get::<_, String>(0)?)?,
            project_id: parse_uuid(&row.get::<_, String>(1)?)?,
            sender_id: parse_uuid(&row.get::<_, String>(2)?)?,
            text: row.get(3)?,
            seq: row.get(4)?,
            created_at: parse_datetime(&row.get::<_, String>(5)?)?,
        })
    }

    /// Append a message and return it with its assigned `seq`
    #[instrument(skip(self, message), fields(message_id = %message.id, project_id = %message.project_id))]
    pub fn append(&self, message: &Message) -> Result<Message> {
        validate_text(&message.text)?;

        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO messages (id, project_id, sender_id, text, seq, created_at)
             VALUES (?1, ?2, ?3, ?4,
                     (SELECT COALESCE(MAX(seq), 0) + 1 FROM messages WHERE project_id = ?2),
                     ?5)",
            params![
                message.id.to_string(),
                message.project_id.to_string(),
                message.sender_id.to_string(),
                message.text,
                message.created_at.to_rfc3339(),
            ],
        )?;
        let seq: u64 = tx.query_row(
            "SELECT seq FROM messages WHERE id = ?1",
            params![message.id.to_string()],
            |row| row.get(0),
        )?;
        tx.commit()?;

        let stored = Message {
            seq,
            ..message.clone()
        };
        assert_message_invariants(&stored);
        debug!(seq, "Message appended");
        Ok(stored)
    }

    /// Get message by ID
    #[instrument(skip(self))]
    pub fn find_by_id(&self, id: Uuid) -> Result<Option<Message>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM messages WHERE id = ?1",
            MESSAGE_COLUMNS
        ))?;
        let message = stmt
            .query_row(params![id.to_string()], Self::map_message)
            .optional()?;
        Ok(message)
    }

    /// Full history of a project in send order
    #[instrument(skip(self))]
    pub fn list_for_project(&self, project_id: Uuid) -> Result<Vec<Message>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM messages WHERE project_id = ?1 ORDER BY seq",
            MESSAGE_COLUMNS
        ))?;
        let messages = stmt
            .query_map(params![project_id.to_string()], Self::map_message)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(messages)
    }

    /// Get message count for a project
    #[instrument(skip(self))]
    pub fn count_for_project(&self, project_id: Uuid) -> Result<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE project_id = ?1",
            params![project_id.to_string()],
            |row| row.get(0),
        )?;
        u64::try_from(count).map_err(|_| Error::InvalidArgument("negative message count".into()))
    }
}
