//! Dedup cache of recently seen events.
//!
//! Entries expire once untouched for `ttl` (every redelivery counts as an
//! access) and the least recently accessed entry is evicted when the cache is
//! full, so memory stays bounded regardless of event volume.
//!
//! Access order is kept in a queue of `(uuid, access time)`. A touch pushes a
//! new pair and leaves the old one behind; pairs whose time no longer matches
//! the entry are skipped when they reach the front, so eviction and expiry
//! are amortised O(1).
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use uuid::Uuid;

use crate::clock::millis;
use crate::event::Event;

#[derive(Clone, Debug)]
struct CachedEvent {
    event: Event,
    last_access: i64,
}

#[derive(Clone, Debug)]
pub struct EventCache {
    entries: HashMap<Uuid, CachedEvent>,
    access_order: VecDeque<(Uuid, i64)>,
    capacity: usize,
    ttl_ms: i64,
}

impl EventCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            access_order: VecDeque::new(),
            capacity: capacity.max(1),
            ttl_ms: millis(ttl),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn is_stale(&self, entry: &CachedEvent, now: i64) -> bool {
        now - entry.last_access >= self.ttl_ms
    }

    fn is_current(&self, uuid: &Uuid, access: i64) -> bool {
        self.entries
            .get(uuid)
            .is_some_and(|entry| entry.last_access == access)
    }

    fn touch(&mut self, uuid: Uuid, now: i64) {
        self.access_order.push_back((uuid, now));
        // Redeliveries leave outdated pairs behind; drop them before they pile up
        if self.access_order.len() > self.capacity.saturating_mul(2) {
            let entries = &self.entries;
            self.access_order.retain(|(uuid, access)| {
                entries
                    .get(uuid)
                    .is_some_and(|entry| entry.last_access == *access)
            });
        }
    }

    /// Look up an event, refreshing its access time. Stale entries are
    /// dropped and reported as absent.
    pub fn get_mut(&mut self, uuid: &Uuid, now: i64) -> Option<&mut Event> {
        let stale = self
            .entries
            .get(uuid)
            .map(|entry| self.is_stale(entry, now))?;
        if stale {
            self.entries.remove(uuid);
            return None;
        }
        let previous = self.entries.get(uuid).map(|entry| entry.last_access)?;
        if previous != now {
            self.touch(*uuid, now);
        }
        self.entries.get_mut(uuid).map(|entry| {
            entry.last_access = now;
            &mut entry.event
        })
    }

    /// Read without counting as an access
    pub fn peek(&self, uuid: &Uuid) -> Option<&Event> {
        self.entries.get(uuid).map(|entry| &entry.event)
    }

    pub fn insert(&mut self, event: Event, now: i64) {
        if self.entries.len() >= self.capacity && !self.entries.contains_key(&event.uuid) {
            self.evict_least_recent();
        }
        let uuid = event.uuid;
        self.entries.insert(
            uuid,
            CachedEvent {
                event,
                last_access: now,
            },
        );
        self.touch(uuid, now);
    }

    fn evict_least_recent(&mut self) {
        while let Some((uuid, access)) = self.access_order.pop_front() {
            if self.is_current(&uuid, access) {
                self.entries.remove(&uuid);
                return;
            }
        }
    }

    /// Drop every stale entry, returning how many were removed
    pub fn purge(&mut self, now: i64) -> usize {
        let mut purged = 0;
        while let Some(&(uuid, access)) = self.access_order.front() {
            if now - access < self.ttl_ms {
                break;
            }
            self.access_order.pop_front();
            if self.is_current(&uuid, access) {
                self.entries.remove(&uuid);
                purged += 1;
            }
        }
        purged
    }
}
