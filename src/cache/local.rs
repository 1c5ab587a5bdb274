// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! L1: the process-local tier.
//!
//! A bounded map with one TTL for every entry. Expired entries are dropped
//! lazily when read; once the map grows past `max_size`, the oldest writes
//! are evicted first (insertion order, not access order). Reads never
//! refresh an entry's age, so an L1 hit is never older than the TTL.

use super::compression::{self, CompressionTotals};
use crate::config::LocalCacheConfig;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

struct LocalEntry {
    data: Vec<u8>,
    written_at: Instant,
    seq: u64,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, LocalEntry>,
    /// write sequence -> key; first entry is the oldest write
    order: BTreeMap<u64, String>,
    next_seq: u64,
    totals: CompressionTotals,
}

impl Inner {
    fn remove(&mut self, key: &str) -> bool {
        match self.entries.remove(key) {
            Some(entry) => {
                self.order.remove(&entry.seq);
                true
            }
            None => false,
        }
    }
}

pub struct LocalCache {
    inner: Mutex<Inner>,
    max_size: usize,
    ttl: Duration,
    compression: bool,
}

impl LocalCache {
    pub fn new(config: &LocalCacheConfig) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            max_size: config.max_size,
            ttl: config.ttl(),
            compression: config.compression,
        }
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    #[must_use]
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Fresh payload for `key`, or `None` when absent or older than the TTL.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let mut inner = self.inner.lock();
        let fresh = match inner.entries.get(key) {
            Some(entry) => entry.written_at.elapsed() < self.ttl,
            None => return None,
        };
        if !fresh {
            inner.remove(key);
            debug!(key, "L1 entry expired");
            return None;
        }

        let stored = inner.entries.get(key).map(|entry| entry.data.clone())?;
        drop(inner);

        match compression::decompress(&stored) {
            Ok(data) => Some(data),
            Err(e) => {
                warn!(key, error = %e, "Dropping unreadable L1 entry");
                self.remove(key);
                None
            }
        }
    }

    /// Store `value`, evicting the oldest writes if the tier overflows.
    /// Returns how many entries were evicted.
    pub fn insert(&self, key: &str, value: &[u8]) -> usize {
        let stored = if self.compression {
            match compression::compress(value) {
                Ok((bytes, _)) => bytes,
                Err(e) => {
                    warn!(key, error = %e, "L1 compression failed, storing plain");
                    value.to_vec()
                }
            }
        } else {
            value.to_vec()
        };

        let mut inner = self.inner.lock();
        inner.totals.record(value.len(), stored.len());
        inner.remove(key);

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.order.insert(seq, key.to_string());
        inner.entries.insert(
            key.to_string(),
            LocalEntry {
                data: stored,
                written_at: Instant::now(),
                seq,
            },
        );

        let mut evicted = 0;
        while inner.entries.len() > self.max_size {
            let Some((_, oldest)) = inner.order.pop_first() else {
                break;
            };
            inner.entries.remove(&oldest);
            evicted += 1;
        }
        if evicted > 0 {
            debug!(evicted, max_size = self.max_size, "L1 over capacity, evicted oldest writes");
        }
        crate::metrics::set_l1_cache_items(inner.entries.len());
        evicted
    }

    pub fn remove(&self, key: &str) -> bool {
        self.inner.lock().remove(key)
    }

    /// Drop every entry; returns how many there were.
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock();
        let count = inner.entries.len();
        inner.entries.clear();
        inner.order.clear();
        crate::metrics::set_l1_cache_items(0);
        count
    }

    /// Drop entries older than the TTL without waiting for a read.
    pub fn purge_expired(&self) -> usize {
        let mut inner = self.inner.lock();
        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, entry)| entry.written_at.elapsed() >= self.ttl)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            inner.remove(key);
        }
        crate::metrics::set_l1_cache_items(inner.entries.len());
        expired.len()
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        let inner = self.inner.lock();
        inner
            .entries
            .get(key)
            .is_some_and(|entry| entry.written_at.elapsed() < self.ttl)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Original bytes over stored bytes for everything written so far.
    #[must_use]
    pub fn compression_ratio(&self) -> f64 {
        self.inner.lock().totals.ratio()
    }
}

impl std::fmt::Debug for LocalCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalCache")
            .field("len", &self.len())
            .field("max_size", &self.max_size)
            .field("ttl", &self.ttl)
            .field("compression", &self.compression)
            .finish()
    }
}
