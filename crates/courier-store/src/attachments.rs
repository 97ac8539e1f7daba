use std::path::PathBuf;

use rusqlite::{params, OptionalExtension};

use courier_shared::types::AttachmentRef;

use crate::database::Database;
use crate::error::{Result, StoreError};

/// Attachment metadata together with where the host keeps the bytes.
///
/// `path` is exactly what the store recorded, with a leading `~/` expanded
/// against `home` when one was supplied. Callers must still confine it to
/// the attachments root before reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentFile {
    pub meta: AttachmentRef,
    pub filename: Option<String>,
}

impl AttachmentFile {
    /// Resolve the recorded filename to an absolute path.
    pub fn resolve_path(&self, home: Option<&std::path::Path>) -> Option<PathBuf> {
        let raw = self.filename.as_deref()?;
        match (raw.strip_prefix("~/"), home) {
            (Some(rest), Some(home)) => Some(home.join(rest)),
            (Some(_), None) => None,
            (None, _) => Some(PathBuf::from(raw)),
        }
    }
}

const ATTACHMENT_COLUMNS: &str = "
    a.ROWID,
    a.guid,
    a.transfer_name,
    a.mime_type,
    COALESCE(a.total_bytes, 0),
    a.filename";

impl Database {
    /// Attachments linked to a message, in link order.
    pub fn attachments_for_message(&self, message_id: i64) -> Result<Vec<AttachmentRef>> {
        let sql = format!(
            "SELECT {ATTACHMENT_COLUMNS}
             FROM attachment a
             JOIN message_attachment_join j ON j.attachment_id = a.ROWID
             WHERE j.message_id = ?1
             ORDER BY a.ROWID"
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(params![message_id], row_to_attachment)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?.meta);
        }
        Ok(out)
    }

    /// Look up one attachment by id.
    pub fn get_attachment(&self, id: i64) -> Result<AttachmentFile> {
        let sql = format!("SELECT {ATTACHMENT_COLUMNS} FROM attachment a WHERE a.ROWID = ?1");
        self.conn()
            .query_row(&sql, params![id], row_to_attachment)
            .optional()?
            .ok_or(StoreError::NotFound)
    }
}

fn row_to_attachment(row: &rusqlite::Row<'_>) -> rusqlite::Result<AttachmentFile> {
    Ok(AttachmentFile {
        meta: AttachmentRef {
            id: row.get(0)?,
            guid: row.get(1)?,
            transfer_name: row.get(2)?,
            mime_type: row.get(3)?,
            total_bytes: row.get(4)?,
        },
        filename: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{Fixture, NewMessage};
    use std::path::Path;

    #[test]
    fn test_message_carries_attachments() {
        let fx = Fixture::new();
        let chat = fx.direct_chat("+15550001111");
        let id = fx.insert(NewMessage::inbound(chat, ""));
        let att = fx.attach(id, "~/Library/Messages/Attachments/ab/IMG_0001.jpeg", "image/jpeg");

        let msg = fx.db.get_message(id).unwrap();
        assert_eq!(msg.attachments.len(), 1);
        assert_eq!(msg.attachments[0].id, att);
        assert!(msg.attachments[0].is_image());
    }

    #[test]
    fn test_get_attachment_resolves_home() {
        let fx = Fixture::new();
        let chat = fx.direct_chat("+15550001111");
        let id = fx.insert(NewMessage::inbound(chat, ""));
        let att = fx.attach(id, "~/Library/Messages/Attachments/ab/doc.pdf", "application/pdf");

        let file = fx.db.get_attachment(att).unwrap();
        assert_eq!(file.meta.mime_type.as_deref(), Some("application/pdf"));
        assert_eq!(
            file.resolve_path(Some(Path::new("/Users/sam"))),
            Some(PathBuf::from("/Users/sam/Library/Messages/Attachments/ab/doc.pdf"))
        );
        assert_eq!(file.resolve_path(None), None);
    }

    #[test]
    fn test_unknown_attachment() {
        let fx = Fixture::new();
        assert!(matches!(fx.db.get_attachment(7), Err(StoreError::NotFound)));
    }
}
