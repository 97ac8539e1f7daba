//! The sync loop: trigger → diff → enrich → broadcast.
//!
//! Triggers (watcher callbacks or poll ticks) only store a `Notify` permit.
//! Passes therefore never overlap, and any number of triggers arriving
//! during a pass collapse into exactly one follow-up pass.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

use courier_shared::enrich::{EnrichContext, Pipeline};
use courier_shared::protocol::{ServerEvent, TapbackPayload};
use courier_shared::types::Participant;
use courier_store::{DiffEngine, StoreChange};

use crate::error::ServerError;
use crate::hub::{BroadcastSummary, Hub};
use crate::store::StoreHandle;

pub struct SyncService {
    engine: Arc<DiffEngine>,
    store: StoreHandle,
    pipeline: Arc<Pipeline>,
    hub: Hub,
    trigger: Arc<Notify>,
}

impl SyncService {
    pub fn new(engine: Arc<DiffEngine>, store: StoreHandle, pipeline: Arc<Pipeline>, hub: Hub) -> Self {
        Self {
            engine,
            store,
            pipeline,
            hub,
            trigger: Arc::new(Notify::new()),
        }
    }

    /// A callback suitable for the change detector or the poller.
    pub fn trigger(&self) -> impl Fn() + Send + Sync + 'static {
        let trigger = self.trigger.clone();
        move || trigger.notify_one()
    }

    /// Drain every pending change, broadcasting each batch as soon as it is
    /// read so per-connection queues get a chance to empty in between.
    pub async fn run_once(&self) -> Result<BroadcastSummary, ServerError> {
        let mut total = BroadcastSummary::default();
        loop {
            let (summary, complete) = self.run_batch().await?;
            total.delivered += summary.delivered;
            total.dropped += summary.dropped;
            if complete {
                return Ok(total);
            }
        }
    }

    async fn run_batch(&self) -> Result<(BroadcastSummary, bool), ServerError> {
        let engine = self.engine.clone();
        let (batch, participants) = self
            .store
            .run(move |db| {
                // Once this returns the cursors have moved, so nothing after
                // it may fail the pass.
                let batch = engine.next_batch(db)?;
                let mut participants: HashMap<String, Vec<Participant>> = HashMap::new();
                for change in &batch.changes {
                    let conversation = &change.message().conversation_id;
                    if conversation.is_empty() || participants.contains_key(conversation) {
                        continue;
                    }
                    let members = db.participants(conversation).unwrap_or_else(|e| {
                        tracing::warn!(conversation, error = %e, "participant lookup failed");
                        Vec::new()
                    });
                    participants.insert(conversation.clone(), members);
                }
                Ok((batch, participants))
            })
            .await?;

        if batch.changes.is_empty() {
            return Ok((BroadcastSummary::default(), batch.complete));
        }

        let events: Vec<ServerEvent> = batch
            .changes
            .into_iter()
            .map(|change| {
                let ctx = EnrichContext {
                    participants: participants
                        .get(&change.message().conversation_id)
                        .cloned()
                        .unwrap_or_default(),
                };
                to_event(change, &self.pipeline, &ctx)
            })
            .collect();

        tracing::info!(
            events = events.len(),
            watermark = self.engine.watermark().get(),
            "store changed"
        );
        let summary = self.hub.broadcast_all(&events).await;
        Ok((summary, batch.complete))
    }

    /// Drive passes until `shutdown` flips to true. A pass already running
    /// when shutdown arrives completes first.
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = self.trigger.notified() => {
                        if let Err(e) = self.run_once().await {
                            tracing::warn!(error = %e, "diff pass failed, will retry on next change");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::info!("sync loop stopped");
        })
    }
}

fn to_event(change: StoreChange, pipeline: &Pipeline, ctx: &EnrichContext) -> ServerEvent {
    match change {
        StoreChange::NewMessage(message) => {
            ServerEvent::NewMessage(pipeline.process_in(message, ctx))
        }
        StoreChange::MessageUpdated(message) => {
            ServerEvent::MessageUpdated(pipeline.process_in(message, ctx))
        }
        StoreChange::Tapback {
            message,
            target_guid,
            reaction,
            added,
        } => {
            let payload = TapbackPayload {
                message,
                target_guid,
                reaction,
            };
            if added {
                ServerEvent::TapbackAdded(payload)
            } else {
                ServerEvent::TapbackRemoved(payload)
            }
        }
    }
}
