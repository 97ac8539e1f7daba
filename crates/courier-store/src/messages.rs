use rusqlite::{params, OptionalExtension};

use courier_shared::types::{Association, Message, Reaction};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::timestamps::{from_apple, from_apple_optional};

/// Columns read for every message, in `row_to_message` order. The owning
/// chat comes from a subquery so a message joined to several chats still
/// yields one row.
const MESSAGE_COLUMNS: &str = "
    m.ROWID,
    m.guid,
    m.text,
    COALESCE(m.date, 0),
    COALESCE(m.is_from_me, 0),
    h.id,
    COALESCE((SELECT c.guid FROM chat_message_join cmj
              JOIN chat c ON c.ROWID = cmj.chat_id
              WHERE cmj.message_id = m.ROWID
              ORDER BY cmj.chat_id LIMIT 1), ''),
    m.service,
    COALESCE(m.is_read, 0),
    COALESCE(m.date_edited, 0),
    m.associated_message_guid,
    COALESCE(m.associated_message_type, 0),
    COALESCE(m.cache_has_attachments, 0)";

const MESSAGE_FROM: &str = "
    FROM message m
    LEFT JOIN handle h ON h.ROWID = m.handle_id";

/// Upper bound on rows a single diff query will pull. Kept below the hub's
/// per-connection queue so one batch of new rows plus one of edits fits.
pub const MAX_BATCH: i64 = 100;

impl Database {
    /// Highest message id in the store, or 0 when it is empty.
    pub fn max_message_id(&self) -> Result<i64> {
        Ok(self
            .conn()
            .query_row("SELECT COALESCE(MAX(ROWID), 0) FROM message", [], |row| {
                row.get(0)
            })?)
    }

    /// Highest raw `date_edited` in the store, or 0.
    pub fn max_edit_date(&self) -> Result<i64> {
        Ok(self.conn().query_row(
            "SELECT COALESCE(MAX(date_edited), 0) FROM message",
            [],
            |row| row.get(0),
        )?)
    }

    /// Messages with id greater than `after`, ascending, paired with their
    /// raw edit timestamp (0 when never edited). At most [`MAX_BATCH`] rows.
    pub fn messages_after(&self, after: i64) -> Result<Vec<(i64, Message)>> {
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} {MESSAGE_FROM}
             WHERE m.ROWID > ?1
             ORDER BY m.ROWID ASC
             LIMIT ?2"
        );
        self.collect_with_edit_dates(&sql, params![after, MAX_BATCH])
    }

    /// Messages at or below `max_id` edited after the raw `edited_after`
    /// timestamp, paired with their raw edit timestamp.
    pub fn messages_edited_after(
        &self,
        edited_after: i64,
        max_id: i64,
    ) -> Result<Vec<(i64, Message)>> {
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} {MESSAGE_FROM}
             WHERE m.date_edited > ?1 AND m.ROWID <= ?2
             ORDER BY m.date_edited ASC
             LIMIT ?3"
        );
        self.collect_with_edit_dates(&sql, params![edited_after, max_id, MAX_BATCH])
    }

    /// A page of a conversation's messages, newest first, strictly below
    /// `before` when given.
    pub fn messages_for_conversation(
        &self,
        conversation_id: &str,
        before: Option<i64>,
        limit: u32,
    ) -> Result<Vec<Message>> {
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} {MESSAGE_FROM}
             JOIN chat_message_join j ON j.message_id = m.ROWID
             JOIN chat ch ON ch.ROWID = j.chat_id
             WHERE ch.guid = ?1 AND m.ROWID < ?2
             ORDER BY m.ROWID DESC
             LIMIT ?3"
        );
        self.collect_messages(
            &sql,
            params![conversation_id, before.unwrap_or(i64::MAX), limit],
        )
    }

    /// Case-insensitive substring search over message text, newest first.
    pub fn search_messages(
        &self,
        query: &str,
        conversation_id: Option<&str>,
        before: Option<i64>,
        limit: u32,
    ) -> Result<Vec<Message>> {
        let pattern = format!("%{}%", escape_like(query));
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} {MESSAGE_FROM}
             WHERE m.text LIKE ?1 ESCAPE '\\'
               AND m.ROWID < ?2
               AND (?3 IS NULL OR EXISTS (
                    SELECT 1 FROM chat_message_join sj
                    JOIN chat sc ON sc.ROWID = sj.chat_id
                    WHERE sj.message_id = m.ROWID AND sc.guid = ?3))
             ORDER BY m.ROWID DESC
             LIMIT ?4"
        );
        self.collect_messages(
            &sql,
            params![pattern, before.unwrap_or(i64::MAX), conversation_id, limit],
        )
    }

    pub fn get_message(&self, id: i64) -> Result<Message> {
        let sql = format!("SELECT {MESSAGE_COLUMNS} {MESSAGE_FROM} WHERE m.ROWID = ?1");
        let message = self
            .conn()
            .query_row(&sql, params![id], row_to_message)
            .optional()?
            .ok_or(StoreError::NotFound)?;
        self.with_attachments(message)
    }

    fn collect_messages(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(sql)?;
        let rows = stmt.query_map(params, row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(self.with_attachments(row?)?);
        }
        Ok(messages)
    }

    fn collect_with_edit_dates(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<(i64, Message)>> {
        let mut stmt = self.conn().prepare(sql)?;
        let rows = stmt.query_map(params, row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            let row = row?;
            let raw = row.edited_raw;
            messages.push((raw, self.with_attachments(row)?));
        }
        Ok(messages)
    }

    fn with_attachments(&self, mut message: RowMessage) -> Result<Message> {
        if message.has_attachments {
            message.inner.attachments = self.attachments_for_message(message.inner.id)?;
        }
        Ok(message.inner)
    }
}

/// A message row before its attachments are loaded.
struct RowMessage {
    inner: Message,
    has_attachments: bool,
    edited_raw: i64,
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<RowMessage> {
    let is_from_me: i64 = row.get(4)?;
    let handle: Option<String> = row.get(5)?;
    let associated_guid: Option<String> = row.get(10)?;
    let associated_type: i64 = row.get(11)?;
    let has_attachments: i64 = row.get(12)?;
    let edited_raw: i64 = row.get(9)?;

    let association = match (associated_guid, Reaction::from_associated_type(associated_type)) {
        (Some(guid), Some((reaction, added))) => Some(Association {
            target_guid: strip_association_prefix(&guid).to_string(),
            reaction,
            added,
        }),
        _ => None,
    };

    let is_from_me = is_from_me != 0;
    let sender = if is_from_me { None } else { handle };

    Ok(RowMessage {
        inner: Message {
            id: row.get(0)?,
            guid: row.get(1)?,
            text: row.get(2)?,
            timestamp: from_apple(row.get(3)?),
            is_from_me,
            sender,
            conversation_id: row.get(6)?,
            service: row.get(7)?,
            is_read: row.get::<_, i64>(8)? != 0,
            edited_at: from_apple_optional(edited_raw),
            association,
            attachments: Vec::new(),
        },
        has_attachments: has_attachments != 0,
        edited_raw,
    })
}

/// Tapback targets are stored as `p:<part>/<guid>` or `bp:<guid>`.
fn strip_association_prefix(raw: &str) -> &str {
    if let Some((_, guid)) = raw.split_once('/') {
        return guid;
    }
    raw.strip_prefix("bp:").unwrap_or(raw)
}

fn escape_like(query: &str) -> String {
    let mut escaped = String::with_capacity(query.len());
    for c in query.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
