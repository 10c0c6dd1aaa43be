use anyhow::Result;
use rally_types::models::Message;
use rusqlite::Connection;
use uuid::Uuid;

use crate::Database;
use crate::gatherings::bump_version;
use crate::rows::{self, MESSAGE_COLUMNS};

pub(crate) fn insert_message(conn: &Connection, message: &Message) -> Result<()> {
    conn.execute(
        "INSERT INTO messages (id, gathering_id, sender_id, kind, text, metadata, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        rusqlite::params![
            message.id.to_string(),
            message.gathering_id.to_string(),
            message.sender_id.map(|id| id.to_string()),
            message.payload.kind(),
            message.text,
            serde_json::to_string(&message.payload)?,
            message.created_at,
        ],
    )?;
    Ok(())
}

/// Appends `messages` and bumps the gathering's version once, returning the
/// new version. Every write that clients should notice ends with this inside
/// its own transaction.
pub(crate) fn record_change(conn: &Connection, gathering_id: Uuid, messages: &[Message]) -> Result<i64> {
    for message in messages {
        insert_message(conn, message)?;
    }
    bump_version(conn, gathering_id)
}

impl Database {
    /// The latest `limit` messages, oldest first.
    pub fn recent_messages(&self, gathering_id: Uuid, limit: u32) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages WHERE gathering_id = ?1
                 ORDER BY rowid DESC LIMIT ?2"
            ))?;
            let mut rows = stmt
                .query_map(rusqlite::params![gathering_id.to_string(), limit], rows::message)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.reverse();
            Ok(rows)
        })
    }
}
