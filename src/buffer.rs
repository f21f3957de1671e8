use crate::types::EventRecord;
use std::collections::VecDeque;
use std::sync::Arc;

pub const DEFAULT_CAPACITY: usize = 100;

/// Bounded event history for one webhook. The front is the newest record;
/// overflow evicts from the back.
#[derive(Debug)]
pub struct EventBuffer {
    events: VecDeque<Arc<EventRecord>>,
    capacity: usize,
    /// Highest id dropped by overflow. Deletes and clears don't count.
    last_evicted: u64,
}

impl Default for EventBuffer {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl EventBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY)),
            capacity,
            last_evicted: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Insert at the front and drop the oldest records past capacity.
    /// Returns how many were evicted.
    pub fn append(&mut self, record: Arc<EventRecord>) -> usize {
        self.events.push_front(record);
        let mut evicted = 0;
        while self.events.len() > self.capacity {
            if let Some(oldest) = self.events.pop_back() {
                self.last_evicted = self.last_evicted.max(oldest.id);
            }
            evicted += 1;
        }
        evicted
    }

    pub fn last_evicted(&self) -> u64 {
        self.last_evicted
    }

    pub fn list(&self) -> Vec<Arc<EventRecord>> {
        self.events.iter().cloned().collect()
    }

    pub fn find_by_id(&self, id: u64) -> Option<Arc<EventRecord>> {
        self.events.iter().find(|e| e.id == id).cloned()
    }

    pub fn delete_by_id(&mut self, id: u64) -> bool {
        match self.events.iter().position(|e| e.id == id) {
            Some(index) => self.events.remove(index).is_some(),
            None => false,
        }
    }

    pub fn clear(&mut self) -> usize {
        let removed = self.events.len();
        self.events.clear();
        removed
    }

    /// Records added since the buffer held `previous_size` entries, oldest
    /// of the batch first. Size alone cannot tell eviction from deletion,
    /// so watchers use [`EventBuffer::since`] instead.
    pub fn size_delta(&self, previous_size: usize) -> Vec<Arc<EventRecord>> {
        let added = self.events.len().saturating_sub(previous_size);
        self.events.iter().take(added).rev().cloned().collect()
    }

    /// Records with an id above `watermark`, oldest first.
    pub fn since(&self, watermark: u64) -> Vec<Arc<EventRecord>> {
        let mut fresh: Vec<_> = self
            .events
            .iter()
            .take_while(|e| e.id > watermark)
            .cloned()
            .collect();
        fresh.reverse();
        fresh
    }

    pub fn newest(&self) -> Option<&Arc<EventRecord>> {
        self.events.front()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
