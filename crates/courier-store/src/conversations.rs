use rusqlite::{params, OptionalExtension};

use courier_shared::types::{Conversation, Participant};

use crate::database::Database;
use crate::error::{Result, StoreError};

/// `chat.style` value the host uses for group conversations.
const GROUP_STYLE: i64 = 43;

const CONVERSATION_COLUMNS: &str = "
    c.ROWID,
    c.guid,
    COALESCE(c.chat_identifier, ''),
    NULLIF(c.display_name, ''),
    c.service_name,
    COALESCE(c.style, 0),
    (SELECT MAX(cmj.message_id) FROM chat_message_join cmj WHERE cmj.chat_id = c.ROWID) AS last_id";

struct ConversationRow {
    rowid: i64,
    conversation: Conversation,
    last_message_id: Option<i64>,
}

impl Database {
    /// Conversations ordered by most recent activity, skipping `offset`.
    pub fn list_conversations(&self, offset: u32, limit: u32) -> Result<Vec<Conversation>> {
        let sql = format!(
            "SELECT {CONVERSATION_COLUMNS} FROM chat c
             ORDER BY last_id IS NULL, last_id DESC, c.ROWID DESC
             LIMIT ?1 OFFSET ?2"
        );
        let rows: Vec<ConversationRow> = {
            let mut stmt = self.conn().prepare(&sql)?;
            let mapped = stmt.query_map(params![limit, offset], row_to_conversation)?;
            mapped.collect::<rusqlite::Result<_>>()?
        };

        rows.into_iter().map(|row| self.complete(row)).collect()
    }

    /// One conversation by its guid.
    pub fn get_conversation(&self, guid: &str) -> Result<Conversation> {
        let sql = format!("SELECT {CONVERSATION_COLUMNS} FROM chat c WHERE c.guid = ?1");
        let row = self
            .conn()
            .query_row(&sql, params![guid], row_to_conversation)
            .optional()?
            .ok_or(StoreError::NotFound)?;
        self.complete(row)
    }

    /// Addresses taking part in a conversation, excluding the local user.
    pub fn participants(&self, guid: &str) -> Result<Vec<Participant>> {
        let mut stmt = self.conn().prepare(
            "SELECT h.id, h.service FROM handle h
             JOIN chat_handle_join j ON j.handle_id = h.ROWID
             JOIN chat c ON c.ROWID = j.chat_id
             WHERE c.guid = ?1
             ORDER BY h.ROWID",
        )?;
        let rows = stmt.query_map(params![guid], |row| {
            Ok(Participant {
                address: row.get(0)?,
                service: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    fn complete(&self, row: ConversationRow) -> Result<Conversation> {
        let mut conversation = row.conversation;
        conversation.participants = self.participants(&conversation.id)?;
        if let Some(id) = row.last_message_id {
            conversation.last_message = Some(self.get_message(id)?);
        }
        tracing::trace!(rowid = row.rowid, guid = %conversation.id, "loaded conversation");
        Ok(conversation)
    }
}

fn row_to_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConversationRow> {
    let style: i64 = row.get(5)?;
    Ok(ConversationRow {
        rowid: row.get(0)?,
        conversation: Conversation {
            id: row.get(1)?,
            chat_identifier: row.get(2)?,
            display_name: row.get(3)?,
            service: row.get(4)?,
            participants: Vec::new(),
            last_message: None,
            is_group: style == GROUP_STYLE,
        },
        last_message_id: row.get(6)?,
    })
}
