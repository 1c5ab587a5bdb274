// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-process [`SharedStore`] for tests and single-process deployments.
//!
//! Single-key atomic operations hold the DashMap shard lock for the whole
//! read-decide-write, which gives the same indivisibility the Redis scripts
//! provide. Expiry is lazy: an expired entry is dropped when touched.
//! Time comes from `tokio::time::Instant`, so paused-clock tests can expire
//! leases deterministically.

use super::traits::{BucketOutcome, BucketRequest, BucketState, SharedStore, StoreError};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
enum Value {
    Bytes(Vec<u8>),
    Hash(HashMap<String, String>),
    List(VecDeque<Vec<u8>>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: Value, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|t| Instant::now() + t),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

fn wrong_type(key: &str) -> StoreError {
    StoreError::Backend(format!(
        "WRONGTYPE Operation against a key holding the wrong kind of value: {key}"
    ))
}

pub struct MemoryStore {
    data: DashMap<String, Entry>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self { data: DashMap::new() }
    }

    /// Live (non-expired) key count
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.iter().filter(|e| !e.value().is_expired()).count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.data.clear();
    }

    /// Entry for `key` with expired values removed first.
    fn live_entry(&self, key: &str) -> MapEntry<'_, String, Entry> {
        let mut entry = self.data.entry(key.to_string());
        if let MapEntry::Occupied(occupied) = entry {
            if occupied.get().is_expired() {
                occupied.remove();
                entry = self.data.entry(key.to_string());
            } else {
                entry = MapEntry::Occupied(occupied);
            }
        }
        entry
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore").field("keys", &self.data.len()).finish()
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        match self.live_entry(key) {
            MapEntry::Occupied(e) => match &e.get().value {
                Value::Bytes(b) => Ok(Some(b.clone())),
                _ => Err(wrong_type(key)),
            },
            MapEntry::Vacant(_) => Ok(None),
        }
    }

    async fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StoreError> {
        self.data
            .insert(key.to_string(), Entry::new(Value::Bytes(value.to_vec()), Some(ttl)));
        Ok(())
    }

    async fn set_nx_ex(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool, StoreError> {
        match self.live_entry(key) {
            MapEntry::Occupied(_) => Ok(false),
            MapEntry::Vacant(v) => {
                v.insert(Entry::new(Value::Bytes(value.to_vec()), Some(ttl)));
                Ok(true)
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self
            .data
            .remove(key)
            .is_some_and(|(_, entry)| !entry.is_expired()))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        match self.live_entry(key) {
            MapEntry::Occupied(mut e) => {
                e.get_mut().expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            MapEntry::Vacant(_) => Ok(false),
        }
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        match self.live_entry(key) {
            MapEntry::Occupied(e) => Ok(e
                .get()
                .expires_at
                .map(|at| at.saturating_duration_since(Instant::now()))),
            MapEntry::Vacant(_) => Ok(None),
        }
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let mut keys: Vec<String> = self
            .data
            .iter()
            .filter(|e| !e.value().is_expired() && glob_match(pattern, e.key()))
            .map(|e| e.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn hincr_by(&self, key: &str, field: &str, delta: i64) -> Result<i64, StoreError> {
        let mut entry = self
            .live_entry(key)
            .or_insert_with(|| Entry::new(Value::Hash(HashMap::new()), None));
        let Value::Hash(hash) = &mut entry.value else {
            return Err(wrong_type(key));
        };
        let current: i64 = match hash.get(field) {
            Some(raw) => raw.parse().map_err(|_| StoreError::Malformed {
                key: key.to_string(),
                reason: format!("hash field '{field}' is not an integer"),
            })?,
            None => 0,
        };
        let next = current + delta;
        hash.insert(field.to_string(), next.to_string());
        Ok(next)
    }

    async fn hmget(&self, key: &str, fields: &[&str]) -> Result<Vec<Option<String>>, StoreError> {
        match self.live_entry(key) {
            MapEntry::Occupied(e) => match &e.get().value {
                Value::Hash(hash) => Ok(fields.iter().map(|f| hash.get(*f).cloned()).collect()),
                _ => Err(wrong_type(key)),
            },
            MapEntry::Vacant(_) => Ok(vec![None; fields.len()]),
        }
    }

    async fn lpush_trim(&self, key: &str, value: &[u8], max_len: usize) -> Result<(), StoreError> {
        let mut entry = self
            .live_entry(key)
            .or_insert_with(|| Entry::new(Value::List(VecDeque::new()), None));
        let Value::List(list) = &mut entry.value else {
            return Err(wrong_type(key));
        };
        list.push_front(value.to_vec());
        list.truncate(max_len);
        Ok(())
    }

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<Vec<u8>>, StoreError> {
        let list = match self.live_entry(key) {
            MapEntry::Occupied(e) => match &e.get().value {
                Value::List(list) => list.clone(),
                _ => return Err(wrong_type(key)),
            },
            MapEntry::Vacant(_) => return Ok(Vec::new()),
        };

        let len = list.len() as isize;
        let norm = |i: isize| if i < 0 { len + i } else { i };
        let start = norm(start).max(0);
        let stop = norm(stop).min(len - 1);
        if start > stop {
            return Ok(Vec::new());
        }
        Ok(list
            .into_iter()
            .skip(start as usize)
            .take((stop - start + 1) as usize)
            .collect())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn token_bucket_take(
        &self,
        key: &str,
        req: BucketRequest,
        now: f64,
    ) -> Result<BucketOutcome, StoreError> {
        let expiry = super::traits::bucket_expiry(&req);
        match self.live_entry(key) {
            MapEntry::Vacant(v) => {
                let (next, outcome) = BucketState::full(req.burst, now).take(req, now);
                if let Some(state) = next {
                    v.insert(Entry::new(bucket_hash(state), Some(expiry)));
                }
                Ok(outcome)
            }
            MapEntry::Occupied(mut e) => {
                let Value::Hash(hash) = &e.get().value else {
                    return Err(wrong_type(key));
                };
                let field = |name: &str| hash.get(name).and_then(|v| v.parse::<f64>().ok());
                let state = BucketState {
                    tokens: field("tokens").unwrap_or(req.burst),
                    last_refill: field("last_refill").unwrap_or(now),
                };
                let (next, outcome) = state.take(req, now);
                if let Some(state) = next {
                    *e.get_mut() = Entry::new(bucket_hash(state), Some(expiry));
                }
                Ok(outcome)
            }
        }
    }

    async fn compare_and_delete(&self, key: &str, expected: &[u8]) -> Result<bool, StoreError> {
        Ok(self
            .data
            .remove_if(key, |_, entry| {
                !entry.is_expired() && matches!(&entry.value, Value::Bytes(b) if b == expected)
            })
            .is_some())
    }

    async fn compare_and_expire(&self, key: &str, expected: &[u8], ttl: Duration) -> Result<bool, StoreError> {
        match self.live_entry(key) {
            MapEntry::Occupied(mut e) => {
                let owned = matches!(&e.get().value, Value::Bytes(b) if b == expected);
                if owned {
                    e.get_mut().expires_at = Some(Instant::now() + ttl);
                }
                Ok(owned)
            }
            MapEntry::Vacant(_) => Ok(false),
        }
    }
}

fn bucket_hash(state: BucketState) -> Value {
    Value::Hash(HashMap::from([
        ("tokens".to_string(), state.tokens.to_string()),
        ("last_refill".to_string(), state.last_refill.to_string()),
    ]))
}

/// Redis-style glob: `*` any run, `?` one char, `\` escapes.
pub(crate) fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() {
            match p[pi] {
                '*' => {
                    star = Some((pi, ti));
                    pi += 1;
                    continue;
                }
                '?' => {
                    pi += 1;
                    ti += 1;
                    continue;
                }
                '\\' if pi + 1 < p.len() && p[pi + 1] == t[ti] => {
                    pi += 2;
                    ti += 1;
                    continue;
                }
                c if c != '\\' && c == t[ti] => {
                    pi += 1;
                    ti += 1;
                    continue;
                }
                _ => {}
            }
        }
        match star {
            Some((sp, st)) => {
                pi = sp + 1;
                ti = st + 1;
                star = Some((sp, st + 1));
            }
            None => return false,
        }
    }
    p[pi..].iter().all(|c| *c == '*')
}
