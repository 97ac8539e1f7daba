//! Layout of the host message store.
//!
//! Only the tables and columns this crate reads are listed. Production
//! stores are created by the host application; [`install`] exists so tests
//! and local development can build an equivalent database from scratch.

use rusqlite::Connection;

const SCHEMA_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Handles (remote addresses)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS handle (
    ROWID   INTEGER PRIMARY KEY AUTOINCREMENT UNIQUE,
    id      TEXT NOT NULL,                   -- phone number or email
    service TEXT NOT NULL
);

-- ----------------------------------------------------------------
-- Chats (conversations)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS chat (
    ROWID           INTEGER PRIMARY KEY AUTOINCREMENT,
    guid            TEXT UNIQUE NOT NULL,
    style           INTEGER,                 -- 43 = group, 45 = direct
    chat_identifier TEXT,
    service_name    TEXT,
    display_name    TEXT
);

CREATE TABLE IF NOT EXISTS chat_handle_join (
    chat_id   INTEGER REFERENCES chat (ROWID) ON DELETE CASCADE,
    handle_id INTEGER REFERENCES handle (ROWID) ON DELETE CASCADE,
    UNIQUE (chat_id, handle_id)
);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS message (
    ROWID                   INTEGER PRIMARY KEY AUTOINCREMENT,
    guid                    TEXT UNIQUE NOT NULL,
    text                    TEXT,
    handle_id               INTEGER DEFAULT 0,
    service                 TEXT,
    date                    INTEGER,         -- Apple epoch, seconds or nanoseconds
    date_read               INTEGER DEFAULT 0,
    date_edited             INTEGER DEFAULT 0,
    is_from_me              INTEGER DEFAULT 0,
    is_read                 INTEGER DEFAULT 0,
    cache_has_attachments   INTEGER DEFAULT 0,
    associated_message_guid TEXT,
    associated_message_type INTEGER DEFAULT 0
);

CREATE TABLE IF NOT EXISTS chat_message_join (
    chat_id      INTEGER REFERENCES chat (ROWID) ON DELETE CASCADE,
    message_id   INTEGER REFERENCES message (ROWID) ON DELETE CASCADE,
    message_date INTEGER DEFAULT 0,
    PRIMARY KEY (chat_id, message_id)
);

CREATE INDEX IF NOT EXISTS chat_message_join_idx_message_id
    ON chat_message_join (message_id);

-- ----------------------------------------------------------------
-- Attachments
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS attachment (
    ROWID         INTEGER PRIMARY KEY AUTOINCREMENT,
    guid          TEXT UNIQUE NOT NULL,
    filename      TEXT,                      -- may start with ~/
    mime_type     TEXT,
    transfer_name TEXT,
    total_bytes   INTEGER DEFAULT 0
);

CREATE TABLE IF NOT EXISTS message_attachment_join (
    message_id    INTEGER REFERENCES message (ROWID) ON DELETE CASCADE,
    attachment_id INTEGER REFERENCES attachment (ROWID) ON DELETE CASCADE,
    UNIQUE (message_id, attachment_id)
);
"#;

/// Create every table the store layer reads.
pub fn install(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)
}
