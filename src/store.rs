use crate::buffer::{EventBuffer, DEFAULT_CAPACITY};
use crate::capture::Capture;
use crate::error::StoreError;
use crate::types::{CreateWebhook, EventRecord, Stats, UpdateWebhook, Webhook, WebhookSummary};
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

const DEFAULT_FEED_CAPACITY: usize = 256;

/// The store as shared between handlers and watchers.
pub type SharedStore = Arc<RwLock<WebhookStore>>;

/// One registered webhook together with everything it exclusively owns.
struct Slot {
    webhook: Webhook,
    events: EventBuffer,
    feed: broadcast::Sender<Arc<EventRecord>>,
}

/// In-memory registry of webhooks and their event buffers.
pub struct WebhookStore {
    webhooks: BTreeMap<u64, Slot>,
    by_public_id: HashMap<String, u64>,
    next_webhook_id: u64,
    last_event_id: u64,
    event_capacity: usize,
    feed_capacity: usize,
}

impl Default for WebhookStore {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_FEED_CAPACITY)
    }
}

impl WebhookStore {
    pub fn new(event_capacity: usize, feed_capacity: usize) -> Self {
        Self {
            webhooks: BTreeMap::new(),
            by_public_id: HashMap::new(),
            next_webhook_id: 1,
            last_event_id: 0,
            event_capacity,
            feed_capacity,
        }
    }

    pub fn shared(self) -> SharedStore {
        Arc::new(RwLock::new(self))
    }

    // ─── Registry ───────────────────────────────────────────────────────────

    pub fn register(&mut self, input: CreateWebhook) -> Result<Webhook, StoreError> {
        let name = required_name(input.name)?;

        let internal_id = self.next_webhook_id;
        self.next_webhook_id += 1;

        let webhook = Webhook {
            internal_id,
            public_id: Uuid::new_v4().simple().to_string(),
            name,
            description: input.description,
            application: input.application,
            active: true,
            secret: input.secret,
            created_at: Utc::now(),
            updated_at: None,
        };

        // `broadcast::channel` panics on zero capacity.
        let (feed, _) = broadcast::channel(self.feed_capacity.max(1));
        self.by_public_id.insert(webhook.public_id.clone(), internal_id);
        self.webhooks.insert(
            internal_id,
            Slot {
                webhook: webhook.clone(),
                events: EventBuffer::with_capacity(self.event_capacity),
                feed,
            },
        );

        Ok(webhook)
    }

    pub fn get(&self, id: u64) -> Result<Webhook, StoreError> {
        self.slot(id).map(|s| s.webhook.clone())
    }

    pub fn summary(&self, id: u64) -> Result<WebhookSummary, StoreError> {
        self.slot(id).map(Slot::summary)
    }

    pub fn resolve_by_public_id(&self, public_id: &str) -> Result<Webhook, StoreError> {
        self.by_public_id
            .get(public_id)
            .and_then(|id| self.webhooks.get(id))
            .map(|s| s.webhook.clone())
            .ok_or_else(|| StoreError::NotFound("webhook not found".to_string()))
    }

    pub fn update(&mut self, id: u64, patch: UpdateWebhook) -> Result<Webhook, StoreError> {
        let name = match patch.name {
            Some(name) => Some(required_name(name)?),
            None => None,
        };

        let slot = self.slot_mut(id)?;
        let wh = &mut slot.webhook;
        if let Some(name) = name {
            wh.name = name;
        }
        if let Some(description) = patch.description {
            wh.description = description;
        }
        if let Some(application) = patch.application {
            wh.application = application;
        }
        if let Some(secret) = patch.secret {
            wh.secret = secret;
        }
        if let Some(active) = patch.active {
            wh.active = active;
        }
        wh.updated_at = Some(Utc::now());
        Ok(wh.clone())
    }

    /// Remove a webhook, its events and its feed. Dropping the feed sender
    /// ends every open watcher stream for it.
    pub fn delete(&mut self, id: u64) -> bool {
        match self.webhooks.remove(&id) {
            Some(slot) => {
                self.by_public_id.remove(&slot.webhook.public_id);
                true
            }
            None => false,
        }
    }

    pub fn list_with_stats(&self) -> Vec<WebhookSummary> {
        self.webhooks.values().map(Slot::summary).collect()
    }

    pub fn stats(&self) -> Stats {
        let mut stats = Stats::default();
        for slot in self.webhooks.values() {
            stats.total_webhooks += 1;
            stats.total_events += slot.events.len();
            stats.watchers += slot.feed.receiver_count();
            if slot.webhook.active {
                stats.active_webhooks += 1;
            } else {
                stats.inactive_webhooks += 1;
            }
        }
        stats
    }

    // ─── Events ─────────────────────────────────────────────────────────────

    /// Number and append a captured call. Rechecks the webhook because it
    /// may have been deleted or paused since the caller resolved it.
    pub fn append_event(&mut self, id: u64, capture: Capture) -> Result<Arc<EventRecord>, StoreError> {
        let slot = self
            .webhooks
            .get_mut(&id)
            .ok_or_else(|| StoreError::webhook_not_found(id))?;
        if !slot.webhook.active {
            return Err(inactive(&slot.webhook));
        }

        self.last_event_id += 1;
        let record = Arc::new(capture.into_record(self.last_event_id));
        let evicted = slot.events.append(record.clone());
        if evicted > 0 {
            tracing::trace!(webhook = id, evicted, "evicted oldest events");
        }
        // No receivers is not an error worth reporting.
        let _ = slot.feed.send(record.clone());
        Ok(record)
    }

    pub fn events(&self, id: u64) -> Result<Vec<Arc<EventRecord>>, StoreError> {
        self.slot(id).map(|s| s.events.list())
    }

    pub fn event(&self, id: u64, event_id: u64) -> Result<Arc<EventRecord>, StoreError> {
        self.slot(id)?
            .events
            .find_by_id(event_id)
            .ok_or_else(|| StoreError::event_not_found(event_id))
    }

    pub fn delete_event(&mut self, id: u64, event_id: u64) -> Result<(), StoreError> {
        if self.slot_mut(id)?.events.delete_by_id(event_id) {
            Ok(())
        } else {
            Err(StoreError::event_not_found(event_id))
        }
    }

    pub fn clear_events(&mut self, id: u64) -> Result<usize, StoreError> {
        Ok(self.slot_mut(id)?.events.clear())
    }

    /// Retained events above `watermark`, oldest first, plus the highest id
    /// this webhook has lost to overflow. A lost id above the watermark
    /// means the caller missed events that can no longer be replayed.
    pub fn events_since(
        &self,
        id: u64,
        watermark: u64,
    ) -> Result<(Vec<Arc<EventRecord>>, u64), StoreError> {
        self.slot(id)
            .map(|s| (s.events.since(watermark), s.events.last_evicted()))
    }

    /// Attach a receiver to the webhook's feed. The returned watermark is
    /// the last id handed out so far: every later event for this webhook
    /// arrives on the receiver.
    pub fn subscribe(
        &self,
        id: u64,
    ) -> Result<(broadcast::Receiver<Arc<EventRecord>>, u64), StoreError> {
        let slot = self.slot(id)?;
        Ok((slot.feed.subscribe(), self.last_event_id))
    }

    fn slot(&self, id: u64) -> Result<&Slot, StoreError> {
        self.webhooks
            .get(&id)
            .ok_or_else(|| StoreError::webhook_not_found(id))
    }

    fn slot_mut(&mut self, id: u64) -> Result<&mut Slot, StoreError> {
        self.webhooks
            .get_mut(&id)
            .ok_or_else(|| StoreError::webhook_not_found(id))
    }
}

impl Slot {
    fn summary(&self) -> WebhookSummary {
        WebhookSummary {
            webhook: self.webhook.clone(),
            event_count: self.events.len(),
            last_event_at: self.events.newest().map(|e| e.timestamp),
            watchers: self.feed.receiver_count(),
        }
    }
}

fn required_name(name: Option<String>) -> Result<String, StoreError> {
    match name.map(|n| n.trim().to_string()) {
        Some(n) if !n.is_empty() => Ok(n),
        _ => Err(StoreError::Validation("name is required".to_string())),
    }
}

pub fn inactive(webhook: &Webhook) -> StoreError {
    StoreError::Forbidden(format!("webhook '{}' is inactive", webhook.name))
}
