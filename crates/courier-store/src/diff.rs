//! Incremental change detection against the store.
//!
//! [`DiffEngine::detect_new`] pulls every row past the [`Watermark`] and
//! every older row edited since the last pass, classifies them and only
//! then advances its cursors. A failed query leaves both cursors untouched
//! so the next trigger retries the same range.

use std::sync::Mutex;

use courier_shared::types::{Message, Reaction};

use crate::database::Database;
use crate::error::Result;
use crate::messages::MAX_BATCH;
use crate::watermark::Watermark;

/// A classified store change, in the order it should reach clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreChange {
    NewMessage(Message),
    MessageUpdated(Message),
    Tapback {
        message: Message,
        target_guid: String,
        reaction: Reaction,
        added: bool,
    },
}

impl StoreChange {
    /// The message this change carries.
    pub fn message(&self) -> &Message {
        match self {
            Self::NewMessage(m) | Self::MessageUpdated(m) => m,
            Self::Tapback { message, .. } => message,
        }
    }

    fn classify(message: Message) -> Self {
        match message.association.clone() {
            Some(assoc) => Self::Tapback {
                message,
                target_guid: assoc.target_guid,
                reaction: assoc.reaction,
                added: assoc.added,
            },
            None => Self::NewMessage(message),
        }
    }
}

pub struct DiffEngine {
    watermark: Watermark,
    /// Highest raw `date_edited` seen. Also serializes whole passes.
    edit_cursor: Mutex<i64>,
}

impl std::fmt::Debug for DiffEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiffEngine")
            .field("watermark", &self.watermark.get())
            .finish_non_exhaustive()
    }
}

impl DiffEngine {
    pub fn new(initial: i64, edit_cursor: i64) -> Self {
        Self {
            watermark: Watermark::new(initial),
            edit_cursor: Mutex::new(edit_cursor),
        }
    }

    /// Start at the store's current head so existing history is not replayed.
    pub fn from_store(db: &Database) -> Result<Self> {
        let engine = Self::new(db.max_message_id()?, db.max_edit_date()?);
        tracing::info!(watermark = engine.watermark.get(), "diff engine initialized");
        Ok(engine)
    }

    pub fn watermark(&self) -> &Watermark {
        &self.watermark
    }

    /// Everything that changed since the previous pass.
    ///
    /// Edits of already delivered messages come first, then new rows in
    /// ascending id order. A large backlog is only partially returned; see
    /// [`DiffEngine::next_batch`].
    pub fn detect_new(&self, db: &Database) -> Result<Vec<StoreChange>> {
        self.next_batch(db).map(|batch| batch.changes)
    }

    /// Like [`DiffEngine::detect_new`], but also reports whether either query
    /// hit [`MAX_BATCH`], in which case more changes are already waiting.
    pub fn next_batch(&self, db: &Database) -> Result<DiffBatch> {
        let mut edit_cursor = self
            .edit_cursor
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let from = self.watermark.get();
        let fresh = db.messages_after(from)?;
        let edited = db.messages_edited_after(*edit_cursor, from)?;
        let complete = (fresh.len() as i64) < MAX_BATCH && (edited.len() as i64) < MAX_BATCH;

        let mut changes = Vec::with_capacity(fresh.len() + edited.len());
        let mut next_edit = *edit_cursor;
        for (raw, message) in edited {
            next_edit = next_edit.max(raw);
            changes.push(StoreChange::MessageUpdated(message));
        }

        let mut batch_max = None;
        for (raw, message) in fresh {
            // A row edited before its first pass already carries the edit.
            if complete {
                next_edit = next_edit.max(raw);
            }
            batch_max = batch_max.max(Some(message.id));
            changes.push(StoreChange::classify(message));
        }

        *edit_cursor = next_edit;
        if let Some(max) = batch_max {
            let now = self.watermark.advance(max);
            tracing::debug!(from, to = now, changes = changes.len(), complete, "diff pass");
        }

        Ok(DiffBatch { changes, complete })
    }
}

/// One bounded slice of pending changes.
#[derive(Debug, Default)]
pub struct DiffBatch {
    pub changes: Vec<StoreChange>,
    /// False when the store still holds changes past this batch.
    pub complete: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{Fixture, NewMessage};
    use crate::timestamps::to_apple_nanos;
    use chrono::Utc;

    fn ids(changes: &[StoreChange]) -> Vec<i64> {
        changes.iter().map(|c| c.message().id).collect()
    }

    #[test]
    fn test_starts_at_store_head() {
        let fx = Fixture::new();
        let chat = fx.direct_chat("+15550001111");
        for i in 0..5 {
            fx.insert(NewMessage::inbound(chat, &format!("m{i}")));
        }

        let engine = DiffEngine::from_store(&fx.db).unwrap();
        assert_eq!(engine.watermark().get(), 5);
        assert!(engine.detect_new(&fx.db).unwrap().is_empty());
        assert_eq!(engine.watermark().get(), 5);
    }

    #[test]
    fn test_new_rows_advance_watermark_once() {
        let fx = Fixture::new();
        let chat = fx.direct_chat("+15550001111");
        for i in 0..5 {
            fx.insert(NewMessage::inbound(chat, &format!("m{i}")));
        }
        let engine = DiffEngine::from_store(&fx.db).unwrap();

        let id = fx.insert(NewMessage::inbound(chat, "code 847293"));
        let changes = engine.detect_new(&fx.db).unwrap();
        assert_eq!(ids(&changes), vec![id]);
        assert!(matches!(&changes[0], StoreChange::NewMessage(m)
            if m.conversation_id == "iMessage;-;+15550001111"
            && m.sender.as_deref() == Some("+15550001111")));
        assert_eq!(engine.watermark().get(), id);

        assert!(engine.detect_new(&fx.db).unwrap().is_empty());
        assert_eq!(engine.watermark().get(), id);
    }

    #[test]
    fn test_no_id_at_or_below_watermark_is_new() {
        let fx = Fixture::new();
        let chat = fx.direct_chat("+15550001111");
        let engine = DiffEngine::new(0, 0);

        let mut seen = Vec::new();
        let mut previous = engine.watermark().get();
        for round in 0..4 {
            for i in 0..round {
                fx.insert(NewMessage::inbound(chat, &format!("r{round}-{i}")));
            }
            let start = engine.watermark().get();
            let changes = engine.detect_new(&fx.db).unwrap();
            assert!(ids(&changes).iter().all(|id| *id > start));
            seen.extend(ids(&changes));

            let now = engine.watermark().get();
            assert!(now >= previous);
            previous = now;
        }

        let mut deduped = seen.clone();
        deduped.dedup();
        assert_eq!(seen, deduped);
        assert_eq!(seen, (1..=6).collect::<Vec<_>>());
    }

    #[test]
    fn test_tapbacks_are_classified() {
        let fx = Fixture::new();
        let chat = fx.direct_chat("+15550001111");
        let target = fx.insert(NewMessage::inbound(chat, "dinner?"));
        let target_guid = fx.db.get_message(target).unwrap().guid;
        let engine = DiffEngine::from_store(&fx.db).unwrap();

        fx.insert(NewMessage::tapback(chat, &target_guid, 2000));
        fx.insert(NewMessage::tapback(chat, &target_guid, 3000));
        let changes = engine.detect_new(&fx.db).unwrap();

        let summary: Vec<_> = changes
            .iter()
            .map(|c| match c {
                StoreChange::Tapback {
                    target_guid,
                    reaction,
                    added,
                    ..
                } => (target_guid.clone(), *reaction, *added),
                other => panic!("unexpected change {other:?}"),
            })
            .collect();
        assert_eq!(
            summary,
            vec![
                (target_guid.clone(), Reaction::Love, true),
                (target_guid, Reaction::Love, false),
            ]
        );
    }

    #[test]
    fn test_edits_reported_once() {
        let fx = Fixture::new();
        let chat = fx.direct_chat("+15550001111");
        let id = fx.insert(NewMessage::inbound(chat, "helo"));
        let engine = DiffEngine::from_store(&fx.db).unwrap();

        fx.edit(id, "hello", to_apple_nanos(Utc::now()));
        let changes = engine.detect_new(&fx.db).unwrap();
        assert_eq!(changes.len(), 1);
        match &changes[0] {
            StoreChange::MessageUpdated(m) => {
                assert_eq!(m.id, id);
                assert_eq!(m.text.as_deref(), Some("hello"));
                assert!(m.edited_at.is_some());
            }
            other => panic!("expected update, got {other:?}"),
        }
        assert_eq!(engine.watermark().get(), id);
        assert!(engine.detect_new(&fx.db).unwrap().is_empty());
    }

    #[test]
    fn test_row_edited_before_first_pass_is_not_updated_later() {
        let fx = Fixture::new();
        let chat = fx.direct_chat("+15550001111");
        let engine = DiffEngine::from_store(&fx.db).unwrap();

        let id = fx.insert(NewMessage::inbound(chat, "helo"));
        fx.edit(id, "hello", to_apple_nanos(Utc::now()));

        let changes = engine.detect_new(&fx.db).unwrap();
        assert_eq!(ids(&changes), vec![id]);
        assert!(matches!(&changes[0], StoreChange::NewMessage(m)
            if m.text.as_deref() == Some("hello")));
        assert!(engine.detect_new(&fx.db).unwrap().is_empty());
    }

    #[test]
    fn test_backlog_is_drained_in_batches() {
        let fx = Fixture::new();
        let chat = fx.direct_chat("+15550001111");
        let engine = DiffEngine::new(0, 0);
        let total = MAX_BATCH * 2 + 5;
        for i in 0..total {
            fx.insert(NewMessage::inbound(chat, &format!("m{i}")));
        }

        let first = engine.next_batch(&fx.db).unwrap();
        assert!(!first.complete);
        assert_eq!(first.changes.len() as i64, MAX_BATCH);
        assert_eq!(engine.watermark().get(), MAX_BATCH);

        let mut passes = 1;
        let mut seen = first.changes.len() as i64;
        loop {
            let batch = engine.next_batch(&fx.db).unwrap();
            passes += 1;
            seen += batch.changes.len() as i64;
            if batch.complete {
                break;
            }
        }
        assert_eq!(passes, 3);
        assert_eq!(seen, total);
        assert_eq!(engine.watermark().get(), total);
    }

    #[test]
    fn test_failed_query_leaves_watermark() {
        let fx = Fixture::new();
        let chat = fx.direct_chat("+15550001111");
        fx.insert(NewMessage::inbound(chat, "one"));
        let engine = DiffEngine::new(0, 0);

        fx.db.conn().execute_batch("DROP TABLE chat_message_join").unwrap();
        assert!(engine.detect_new(&fx.db).is_err());
        assert_eq!(engine.watermark().get(), 0);
    }
}
