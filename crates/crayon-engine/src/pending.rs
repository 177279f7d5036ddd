use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingConfig {
    pub capacity: usize,
    pub ttl: Duration,
}

impl Default for PendingConfig {
    fn default() -> Self {
        Self {
            capacity: 1_000,
            ttl: Duration::minutes(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingEntry {
    id: String,
    first_seen: DateTime<Utc>,
}

/// Exchanges seen without a response, oldest first.
///
/// Bounded by `capacity` (the oldest entry is evicted to make room) and by
/// `ttl` (entries older than that are dropped by [`PendingTracker::prune`]).
/// Sweeps are round-robin: each [`PendingTracker::drain_batch`] resumes where
/// the previous one stopped, so ids that never get a response cannot starve
/// the rest of the set.
#[derive(Debug, Default)]
pub struct PendingTracker {
    config: PendingConfig,
    entries: VecDeque<PendingEntry>,
    sweep_offset: usize,
}

impl PendingTracker {
    pub fn new(config: PendingConfig) -> Self {
        Self {
            config,
            entries: VecDeque::new(),
            sweep_offset: 0,
        }
    }

    /// Returns `true` when the id was newly inserted. Re-tracking keeps the
    /// original first-seen time.
    pub fn track(&mut self, id: &str, now: DateTime<Utc>) -> bool {
        if id.is_empty() || self.config.capacity == 0 || self.contains(id) {
            return false;
        }

        while self.entries.len() >= self.config.capacity {
            self.evict_oldest();
        }

        self.entries.push_back(PendingEntry {
            id: id.to_string(),
            first_seen: now,
        });
        true
    }

    pub fn resolve(&mut self, id: &str) -> bool {
        let Some(index) = self.position(id) else {
            return false;
        };
        self.remove_at(index);
        true
    }

    /// Drops every entry whose age exceeds the TTL; returns how many went.
    pub fn prune(&mut self, now: DateTime<Utc>) -> usize {
        let ttl = self.config.ttl;
        let mut removed = 0;
        let mut index = 0;
        while index < self.entries.len() {
            if now - self.entries[index].first_seen > ttl {
                self.remove_at(index);
                removed += 1;
            } else {
                index += 1;
            }
        }
        removed
    }

    /// Up to `limit` distinct ids in insertion order, starting after the last
    /// id handed out. Entries stay tracked until resolved, pruned, evicted or
    /// cleared.
    pub fn drain_batch(&mut self, limit: usize) -> Vec<String> {
        let len = self.entries.len();
        if len == 0 || limit == 0 {
            return Vec::new();
        }

        let take = limit.min(len);
        let start = self.sweep_offset % len;
        let batch = (0..take)
            .map(|step| self.entries[(start + step) % len].id.clone())
            .collect::<Vec<_>>();
        self.sweep_offset = (start + take) % len;
        batch
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.sweep_offset = 0;
    }

    pub fn contains(&self, id: &str) -> bool {
        self.position(id).is_some()
    }

    #[cfg(test)]
    fn first_seen(&self, id: &str) -> Option<DateTime<Utc>> {
        self.entries
            .iter()
            .find(|entry| entry.id == id)
            .map(|entry| entry.first_seen)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[cfg(test)]
    fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|entry| entry.id.as_str())
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.entries.iter().position(|entry| entry.id == id)
    }

    fn evict_oldest(&mut self) {
        if self.entries.pop_front().is_some() {
            self.sweep_offset = self.sweep_offset.saturating_sub(1);
        }
    }

    fn remove_at(&mut self, index: usize) {
        if self.entries.remove(index).is_some() && index < self.sweep_offset {
            self.sweep_offset -= 1;
        }
    }
}
