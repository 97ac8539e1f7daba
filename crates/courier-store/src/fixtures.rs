//! Builders for populating a store the way the host application would.
//!
//! Test support only: every helper panics on SQL errors.

use std::cell::Cell;
use std::path::Path;

use chrono::Utc;
use rusqlite::params;

use crate::database::Database;
use crate::error::Result;
use crate::timestamps::to_apple_nanos;

const DIRECT_STYLE: i64 = 45;
const GROUP_STYLE: i64 = 43;

/// A writable store plus helpers for inserting host-shaped rows.
pub struct Fixture {
    pub db: Database,
    attachments: Cell<i64>,
}

impl Fixture {
    /// In-memory store.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self::wrap(Database::create_in_memory().expect("create in-memory store"))
    }

    /// File-backed store at `path`, for readers in other connections.
    pub fn at(path: &Path) -> Result<Self> {
        Ok(Self::wrap(Database::create_at(path)?))
    }

    fn wrap(db: Database) -> Self {
        Self {
            db,
            attachments: Cell::new(0),
        }
    }

    /// One-to-one conversation with `address`; returns the chat rowid.
    pub fn direct_chat(&self, address: &str) -> i64 {
        let handle = self.handle(address);
        let chat = self.chat(
            &format!("iMessage;-;{address}"),
            address,
            None,
            DIRECT_STYLE,
        );
        self.join(chat, handle);
        chat
    }

    /// Group conversation `iMessage;+;<identifier>` with `members`.
    pub fn group_chat(&self, identifier: &str, name: &str, members: &[&str]) -> i64 {
        let chat = self.chat(
            &format!("iMessage;+;{identifier}"),
            identifier,
            Some(name),
            GROUP_STYLE,
        );
        for member in members {
            let handle = self.handle(member);
            self.join(chat, handle);
        }
        chat
    }

    /// Insert a message and link it to its chat; returns the message rowid.
    pub fn insert(&self, msg: NewMessage) -> i64 {
        let conn = self.db.conn();
        let next: i64 = conn
            .query_row("SELECT COALESCE(MAX(ROWID), 0) + 1 FROM message", [], |r| {
                r.get(0)
            })
            .expect("next message id");
        let handle: i64 = if msg.is_from_me {
            0
        } else {
            conn.query_row(
                "SELECT COALESCE(MIN(handle_id), 0) FROM chat_handle_join WHERE chat_id = ?1",
                params![msg.chat],
                |r| r.get(0),
            )
            .expect("chat handle")
        };
        let date = msg.date.unwrap_or_else(|| to_apple_nanos(Utc::now()));
        let (assoc_guid, assoc_type) = match msg.association {
            Some((guid, kind)) => (Some(format!("p:0/{guid}")), kind),
            None => (None, 0),
        };

        conn.execute(
            "INSERT INTO message
                (guid, text, handle_id, service, date, is_from_me, is_read,
                 associated_message_guid, associated_message_type)
             VALUES (?1, ?2, ?3, 'iMessage', ?4, ?5, ?6, ?7, ?8)",
            params![
                format!("FIXTURE-{next:08}"),
                msg.text,
                handle,
                date,
                msg.is_from_me,
                msg.is_from_me,
                assoc_guid,
                assoc_type,
            ],
        )
        .expect("insert message");
        let id = conn.last_insert_rowid();

        conn.execute(
            "INSERT INTO chat_message_join (chat_id, message_id, message_date)
             VALUES (?1, ?2, ?3)",
            params![msg.chat, id, date],
        )
        .expect("join message");
        id
    }

    /// Record an edit of message `id` at raw store time `edited_at`.
    pub fn edit(&self, id: i64, text: &str, edited_at: i64) {
        self.db
            .conn()
            .execute(
                "UPDATE message SET text = ?1, date_edited = ?2 WHERE ROWID = ?3",
                params![text, edited_at, id],
            )
            .expect("edit message");
    }

    /// Attach a file to message `id`; returns the attachment rowid.
    pub fn attach(&self, id: i64, filename: &str, mime_type: &str) -> i64 {
        let conn = self.db.conn();
        let n = self.attachments.get() + 1;
        self.attachments.set(n);

        let transfer_name = Path::new(filename)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned());
        conn.execute(
            "INSERT INTO attachment (guid, filename, mime_type, transfer_name, total_bytes)
             VALUES (?1, ?2, ?3, ?4, 0)",
            params![format!("AT-FIXTURE-{n:06}"), filename, mime_type, transfer_name],
        )
        .expect("insert attachment");
        let attachment = conn.last_insert_rowid();

        conn.execute(
            "INSERT INTO message_attachment_join (message_id, attachment_id) VALUES (?1, ?2)",
            params![id, attachment],
        )
        .expect("join attachment");
        conn.execute(
            "UPDATE message SET cache_has_attachments = 1 WHERE ROWID = ?1",
            params![id],
        )
        .expect("flag attachment");
        attachment
    }

    fn handle(&self, address: &str) -> i64 {
        let conn = self.db.conn();
        if let Ok(id) = conn.query_row(
            "SELECT ROWID FROM handle WHERE id = ?1",
            params![address],
            |r| r.get(0),
        ) {
            return id;
        }
        conn.execute(
            "INSERT INTO handle (id, service) VALUES (?1, 'iMessage')",
            params![address],
        )
        .expect("insert handle");
        conn.last_insert_rowid()
    }

    fn chat(&self, guid: &str, identifier: &str, name: Option<&str>, style: i64) -> i64 {
        let conn = self.db.conn();
        conn.execute(
            "INSERT INTO chat (guid, style, chat_identifier, service_name, display_name)
             VALUES (?1, ?2, ?3, 'iMessage', ?4)",
            params![guid, style, identifier, name],
        )
        .expect("insert chat");
        conn.last_insert_rowid()
    }

    fn join(&self, chat: i64, handle: i64) {
        self.db
            .conn()
            .execute(
                "INSERT OR IGNORE INTO chat_handle_join (chat_id, handle_id) VALUES (?1, ?2)",
                params![chat, handle],
            )
            .expect("join handle");
    }
}

/// A message about to be inserted by [`Fixture::insert`].
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub chat: i64,
    pub text: Option<String>,
    pub is_from_me: bool,
    pub association: Option<(String, i64)>,
    pub date: Option<i64>,
}

impl NewMessage {
    pub fn inbound(chat: i64, text: &str) -> Self {
        Self {
            chat,
            text: Some(text.to_string()),
            is_from_me: false,
            association: None,
            date: None,
        }
    }

    pub fn outbound(chat: i64, text: &str) -> Self {
        Self {
            is_from_me: true,
            ..Self::inbound(chat, text)
        }
    }

    /// A tapback of `kind` (2000-2005 add, 3000-3005 remove) on `target_guid`.
    pub fn tapback(chat: i64, target_guid: &str, kind: i64) -> Self {
        Self {
            chat,
            text: None,
            is_from_me: false,
            association: Some((target_guid.to_string(), kind)),
            date: None,
        }
    }

    pub fn at(mut self, raw_date: i64) -> Self {
        self.date = Some(raw_date);
        self
    }
}
