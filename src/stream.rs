use crate::error::StoreError;
use crate::store::SharedStore;
use crate::types::EventRecord;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};

/// One live-update subscriber for a webhook.
///
/// Events come from the webhook's broadcast feed. The watcher remembers the
/// highest id it has handed out and drops anything at or below it, and if
/// the feed overruns it re-reads the ring buffer from that watermark, so a
/// slow client neither sees duplicates nor misses retained events.
///
/// Dropping the watcher (the SSE stream is dropped when the client goes
/// away) releases the feed receiver; nothing else is left running.
pub struct Watcher {
    webhook_id: u64,
    store: SharedStore,
    feed: broadcast::Receiver<Arc<EventRecord>>,
    backlog: VecDeque<Arc<EventRecord>>,
    watermark: u64,
}

impl Watcher {
    pub async fn subscribe(store: &SharedStore, webhook_id: u64) -> Result<Self, StoreError> {
        let (feed, watermark) = store.read().await.subscribe(webhook_id)?;
        tracing::debug!(webhook = webhook_id, watermark, "watcher connected");
        Ok(Self {
            webhook_id,
            store: store.clone(),
            feed,
            backlog: VecDeque::new(),
            watermark,
        })
    }

    pub fn watermark(&self) -> u64 {
        self.watermark
    }

    /// Next new event in append order. `None` once the webhook is deleted.
    pub async fn next(&mut self) -> Option<Arc<EventRecord>> {
        loop {
            if let Some(record) = self.backlog.pop_front() {
                if record.id > self.watermark {
                    self.watermark = record.id;
                    return Some(record);
                }
                continue;
            }

            match self.feed.recv().await {
                Ok(record) if record.id > self.watermark => {
                    self.watermark = record.id;
                    return Some(record);
                }
                Ok(_) => continue,
                Err(RecvError::Lagged(missed)) => {
                    tracing::debug!(webhook = self.webhook_id, missed, "watcher lagged, catching up");
                    self.catch_up().await?;
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    async fn catch_up(&mut self) -> Option<()> {
        let (retained, last_evicted) = match self
            .store
            .read()
            .await
            .events_since(self.webhook_id, self.watermark)
        {
            Ok(found) => found,
            Err(_) => return None,
        };

        if last_evicted > self.watermark {
            tracing::warn!(
                webhook = self.webhook_id,
                watermark = self.watermark,
                evicted_through = last_evicted,
                "events evicted before a lagging watcher could read them"
            );
        }
        if let Some(first) = retained.first() {
            tracing::debug!(
                webhook = self.webhook_id,
                from = first.id,
                count = retained.len(),
                "replaying retained events"
            );
        }
        self.backlog.extend(retained);
        Some(())
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        tracing::debug!(
            webhook = self.webhook_id,
            watermark = self.watermark,
            "watcher disconnected"
        );
    }
}
