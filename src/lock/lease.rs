// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Lease-based mutual exclusion across processes.
//!
//! A lock is one store key, `distributed_lock:{name}`, whose value is a
//! random owner token written with set-if-absent plus a TTL. Only the
//! holder of the token can extend or delete the key (compare-and-act in a
//! single store operation), so a holder whose lease lapsed can never
//! release somebody else's lock.
//!
//! ```text
//!   acquire ──SET NX PX──► held ──every renewal_interval──► PEXPIRE if token matches
//!                           │                                  │
//!                           │                     lost / max_lock_time ─► stop renewing
//!                           │                     (local lease lapses with the key)
//!                           ▼
//!   release ──DEL if token matches──► free      (lease lapses on its own after ttl)
//! ```
//!
//! Store errors **fail closed**: acquisition reports the error instead of
//! pretending the lock was taken.
//!
//! Each instance tracks a local deadline no later than the key's expiry.
//! Past it the instance no longer reports the lock as held, and a repeated
//! `acquire` re-checks the stored token before claiming the lease again.

use crate::blocking;
use crate::config::LockConfig;
use crate::resilience::classify::{Classify, ErrorKind};
use crate::store::{SharedStore, StoreError};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("lock '{name}' not acquired within {waited:?}")]
    AcquisitionTimeout { name: String, waited: Duration },
    #[error("lock store unavailable: {0}")]
    Store(#[from] StoreError),
    #[error("blocking bridge failed: {0}")]
    Runtime(String),
}

impl Classify for LockError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::AcquisitionTimeout { .. } => ErrorKind::Timeout,
            Self::Store(e) => e.kind(),
            Self::Runtime(_) => ErrorKind::Unknown,
        }
    }
}

/// Snapshot of a lock as seen from one instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockInfo {
    pub lock_key: String,
    pub locked: bool,
    /// Remaining lease; `None` when the key is absent
    pub ttl: Option<Duration>,
    pub is_owner: bool,
}

struct Lease {
    token: String,
    acquired_at: Instant,
    /// Never later than the key's expiry in the store
    expires_at: Instant,
    renewal: Option<JoinHandle<()>>,
}

type LeaseSlot = Arc<Mutex<Option<Lease>>>;

/// Extend the local deadline after a successful renewal started at `attempted`.
fn extend_lease(slot: &LeaseSlot, token: &str, attempted: Instant, ttl: Duration) {
    if let Some(lease) = slot.lock().as_mut().filter(|lease| lease.token == token) {
        lease.expires_at = attempted + ttl;
    }
}

/// Drop the local lease if it still carries `token`.
fn forget_lease(slot: &LeaseSlot, token: &str) -> Option<Lease> {
    let mut guard = slot.lock();
    if guard.as_ref().is_some_and(|lease| lease.token == token) {
        guard.take()
    } else {
        None
    }
}

impl Lease {
    fn stop_renewal(&mut self) {
        if let Some(task) = self.renewal.take() {
            task.abort();
        }
    }
}

/// One holder's handle on a named lock.
///
/// Each concurrent holder needs its own instance; the instance remembers
/// the owner token of the lease it currently holds. Acquiring an instance
/// that already holds its lease confirms the token in the store first.
pub struct DistributedLock {
    name: String,
    key: String,
    store: Arc<dyn SharedStore>,
    ttl: Duration,
    auto_renewal: bool,
    renewal_interval: Duration,
    max_lock_time: Duration,
    poll_interval: Duration,
    lease: LeaseSlot,
}

impl std::fmt::Debug for DistributedLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedLock")
            .field("key", &self.key)
            .field("ttl", &self.ttl)
            .field("auto_renewal", &self.auto_renewal)
            .field("held", &self.is_held())
            .finish()
    }
}

impl DistributedLock {
    pub fn new(name: impl Into<String>, store: Arc<dyn SharedStore>, config: &LockConfig) -> Self {
        let name = name.into();
        Self {
            key: format!("distributed_lock:{name}"),
            name,
            store,
            ttl: config.ttl(),
            auto_renewal: config.auto_renewal,
            renewal_interval: config.renewal_interval(),
            max_lock_time: config.max_lock_time(),
            poll_interval: config.poll_interval(),
            lease: Arc::new(Mutex::new(None)),
        }
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_auto_renewal(mut self, enabled: bool) -> Self {
        self.auto_renewal = enabled;
        self
    }

    #[must_use]
    pub fn with_renewal_interval(mut self, interval: Duration) -> Self {
        self.renewal_interval = interval;
        self
    }

    #[must_use]
    pub fn with_max_lock_time(mut self, max: Duration) -> Self {
        self.max_lock_time = max;
        self
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Whether this instance holds a lease that has not passed its local
    /// deadline. Does not ask the store; [`is_owner`](Self::is_owner) does.
    #[must_use]
    pub fn is_held(&self) -> bool {
        self.lease.lock().as_ref().is_some_and(|lease| Instant::now() < lease.expires_at)
    }

    fn token(&self) -> Option<String> {
        self.lease.lock().as_ref().map(|lease| lease.token.clone())
    }

    /// Poll every `poll_interval` until acquired or `timeout` has elapsed.
    /// `Some(Duration::ZERO)` is a single attempt; `None` waits until the
    /// lease is free, with no fairness between waiters.
    pub async fn acquire(&self, timeout: Option<Duration>) -> Result<bool, LockError> {
        let local = self.lease.lock().as_ref().map(|lease| (lease.token.clone(), Instant::now() < lease.expires_at));
        match local {
            Some((token, true)) => match self.store.get(&self.key).await {
                Ok(current) if current.as_deref() == Some(token.as_bytes()) => {
                    debug!(lock = %self.name, "Lock already held by this instance");
                    return Ok(true);
                }
                Ok(_) => {
                    warn!(lock = %self.name, "Local lease no longer in the store, acquiring again");
                    crate::metrics::record_lock_event("lapsed");
                    self.discard_lease();
                }
                Err(e) => {
                    warn!(lock = %self.name, error = %e, "Lock store unavailable, not acquiring");
                    crate::metrics::record_lock_event("store_error");
                    return Err(LockError::Store(e));
                }
            },
            Some((_, false)) => self.discard_lease(),
            None => {}
        }

        let token = Uuid::new_v4().to_string();
        let started = Instant::now();
        let deadline = timeout.map(|t| started + t);

        loop {
            let attempted = Instant::now();
            match self.store.set_nx_ex(&self.key, token.as_bytes(), self.ttl).await {
                Ok(true) => {
                    self.install(token, attempted);
                    info!(
                        lock = %self.name,
                        ttl_ms = self.ttl.as_millis() as u64,
                        waited_ms = started.elapsed().as_millis() as u64,
                        "Lock acquired"
                    );
                    crate::metrics::record_lock_event("acquired");
                    return Ok(true);
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(lock = %self.name, error = %e, "Lock store unavailable, not acquiring");
                    crate::metrics::record_lock_event("store_error");
                    return Err(LockError::Store(e));
                }
            }

            let Some(deadline) = deadline else {
                sleep(self.poll_interval).await;
                continue;
            };
            let now = Instant::now();
            if now >= deadline {
                debug!(lock = %self.name, "Lock acquisition timed out");
                crate::metrics::record_lock_event(if timeout == Some(Duration::ZERO) { "contended" } else { "timeout" });
                return Ok(false);
            }
            sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    /// Acquire or fail with [`LockError::AcquisitionTimeout`]; the returned
    /// guard releases the lease when dropped.
    pub async fn lock(&self, timeout: Option<Duration>) -> Result<LockGuard<'_>, LockError> {
        let started = Instant::now();
        if self.acquire(timeout).await? {
            Ok(LockGuard { lock: self, armed: true })
        } else {
            Err(LockError::AcquisitionTimeout {
                name: self.name.clone(),
                waited: started.elapsed(),
            })
        }
    }

    fn install(&self, token: String, acquired_at: Instant) {
        let renewal = if self.auto_renewal {
            match blocking::spawn_handle() {
                Ok(handle) => Some(handle.spawn(renew_loop(RenewalTask {
                    store: Arc::clone(&self.store),
                    name: self.name.clone(),
                    key: self.key.clone(),
                    token: token.clone(),
                    lease: Arc::clone(&self.lease),
                    ttl: self.ttl,
                    interval: self.renewal_interval,
                    max_lock_time: self.max_lock_time,
                    acquired_at,
                }))),
                Err(e) => {
                    warn!(lock = %self.name, error = %e, "No runtime for lease renewal; lease will expire after ttl");
                    None
                }
            }
        } else {
            None
        };
        *self.lease.lock() = Some(Lease { token, expires_at: acquired_at + self.ttl, acquired_at, renewal });
    }

    /// Forget a lease that lapsed without touching the store.
    fn discard_lease(&self) {
        let taken = self.lease.lock().take();
        if let Some(mut lease) = taken {
            lease.stop_renewal();
        }
    }

    /// Delete the key if this instance still owns it. Returns `false` (and
    /// changes nothing) when not held or when the lease has passed to
    /// another owner.
    pub async fn release(&self) -> Result<bool, LockError> {
        let taken = self.lease.lock().take();
        let Some(mut lease) = taken else {
            debug!(lock = %self.name, "Release on a lock this instance does not hold");
            crate::metrics::record_lock_event("not_owner");
            return Ok(false);
        };
        lease.stop_renewal();
        crate::metrics::record_lock_hold(lease.acquired_at.elapsed());

        match self.store.compare_and_delete(&self.key, lease.token.as_bytes()).await {
            Ok(true) => {
                info!(lock = %self.name, held_ms = lease.acquired_at.elapsed().as_millis() as u64, "Lock released");
                crate::metrics::record_lock_event("released");
                Ok(true)
            }
            Ok(false) => {
                warn!(lock = %self.name, "Lease expired or taken over before release");
                crate::metrics::record_lock_event("not_owner");
                Ok(false)
            }
            Err(e) => {
                warn!(lock = %self.name, error = %e, "Lock release failed; lease will expire after ttl");
                Err(LockError::Store(e))
            }
        }
    }

    /// Drop the local lease and delete the key from a background task.
    fn release_in_background(&self) {
        let taken = self.lease.lock().take();
        let Some(mut lease) = taken else {
            return;
        };
        lease.stop_renewal();
        let store = Arc::clone(&self.store);
        let key = self.key.clone();
        let name = self.name.clone();
        match blocking::spawn_handle() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = store.compare_and_delete(&key, lease.token.as_bytes()).await {
                        warn!(lock = %name, error = %e, "Background lock release failed");
                    }
                });
            }
            Err(e) => warn!(lock = %name, error = %e, "No runtime to release lock; lease will expire after ttl"),
        }
    }

    /// Extend the lease to a full `ttl` if still owned.
    pub async fn renew(&self) -> Result<bool, LockError> {
        let Some(token) = self.token() else {
            return Ok(false);
        };
        let attempted = Instant::now();
        let renewed = self.store.compare_and_expire(&self.key, token.as_bytes(), self.ttl).await?;
        if renewed {
            extend_lease(&self.lease, &token, attempted, self.ttl);
            crate::metrics::record_lock_event("renewed");
        } else {
            if let Some(mut lease) = forget_lease(&self.lease, &token) {
                lease.stop_renewal();
            }
            crate::metrics::record_lock_event("renewal_lost");
        }
        Ok(renewed)
    }

    /// Stop the renewal task but keep the lease, which then lapses after
    /// `ttl`. This is what a crashed holder looks like to everyone else.
    pub fn stop_renewal(&self) {
        if let Some(lease) = self.lease.lock().as_mut() {
            lease.stop_renewal();
        }
    }

    /// Whether anyone holds the lock.
    pub async fn is_locked(&self) -> Result<bool, LockError> {
        Ok(self.store.get(&self.key).await?.is_some())
    }

    /// Whether the stored token is this instance's token.
    pub async fn is_owner(&self) -> Result<bool, LockError> {
        let Some(token) = self.token() else {
            return Ok(false);
        };
        let current = self.store.get(&self.key).await?;
        Ok(current.as_deref() == Some(token.as_bytes()))
    }

    pub async fn lock_info(&self) -> Result<LockInfo, LockError> {
        let token = self.token();
        let current = self.store.get(&self.key).await?;
        let ttl = if current.is_some() { self.store.ttl(&self.key).await? } else { None };
        Ok(LockInfo {
            lock_key: self.key.clone(),
            locked: current.is_some(),
            ttl,
            is_owner: match (&token, &current) {
                (Some(token), Some(current)) => current.as_slice() == token.as_bytes(),
                _ => false,
            },
        })
    }

    /// Run `f` while holding the lock. The lock is released afterwards
    /// whatever `f` returns, and also if the future is dropped or `f`
    /// panics.
    pub async fn with_lock<F, Fut, T>(&self, timeout: Option<Duration>, f: F) -> Result<T, LockError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        let guard = self.lock(timeout).await?;
        let value = f().await;
        if let Err(e) = guard.release().await {
            warn!(lock = %self.name, error = %e, "Release after critical section failed");
        }
        Ok(value)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Blocking API
    // ═══════════════════════════════════════════════════════════════════════

    pub fn acquire_blocking(&self, timeout: Option<Duration>) -> Result<bool, LockError> {
        blocking::block_on(self.acquire(timeout)).map_err(|e| LockError::Runtime(e.to_string()))?
    }

    pub fn release_blocking(&self) -> Result<bool, LockError> {
        blocking::block_on(self.release()).map_err(|e| LockError::Runtime(e.to_string()))?
    }

    /// Blocking twin of [`with_lock`](Self::with_lock); releases on panic too.
    pub fn with_lock_blocking<F, T>(&self, timeout: Option<Duration>, f: F) -> Result<T, LockError>
    where
        F: FnOnce() -> T,
    {
        struct ReleaseOnDrop<'a>(&'a DistributedLock);

        impl Drop for ReleaseOnDrop<'_> {
            fn drop(&mut self) {
                if let Err(e) = self.0.release_blocking() {
                    warn!(lock = %self.0.name, error = %e, "Release after critical section failed");
                }
            }
        }

        let started = Instant::now();
        if !self.acquire_blocking(timeout)? {
            return Err(LockError::AcquisitionTimeout {
                name: self.name.clone(),
                waited: started.elapsed(),
            });
        }
        let _release = ReleaseOnDrop(self);
        Ok(f())
    }
}

impl Drop for DistributedLock {
    fn drop(&mut self) {
        self.release_in_background();
    }
}

/// Held lock; releases in the background when dropped without
/// [`release`](Self::release).
#[must_use = "dropping the guard releases the lock"]
#[derive(Debug)]
pub struct LockGuard<'a> {
    lock: &'a DistributedLock,
    armed: bool,
}

impl LockGuard<'_> {
    pub async fn release(mut self) -> Result<bool, LockError> {
        self.armed = false;
        self.lock.release().await
    }

    #[must_use]
    pub fn lock(&self) -> &DistributedLock {
        self.lock
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.lock.release_in_background();
        }
    }
}

struct RenewalTask {
    store: Arc<dyn SharedStore>,
    name: String,
    key: String,
    token: String,
    lease: LeaseSlot,
    ttl: Duration,
    interval: Duration,
    max_lock_time: Duration,
    acquired_at: Instant,
}

async fn renew_loop(task: RenewalTask) {
    let mut ticker = tokio::time::interval_at(task.acquired_at + task.interval, task.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        if task.acquired_at.elapsed() >= task.max_lock_time {
            warn!(
                lock = %task.name,
                max_lock_time_secs = task.max_lock_time.as_secs(),
                "Lock held past max lock time, no longer renewing"
            );
            crate::metrics::record_lock_event("max_time");
            return;
        }

        let attempted = Instant::now();
        match task.store.compare_and_expire(&task.key, task.token.as_bytes(), task.ttl).await {
            Ok(true) => {
                extend_lease(&task.lease, &task.token, attempted, task.ttl);
                debug!(lock = %task.name, "Lease renewed");
                crate::metrics::record_lock_event("renewed");
            }
            Ok(false) => {
                warn!(lock = %task.name, "Lease lost before renewal");
                crate::metrics::record_lock_event("renewal_lost");
                // this task's own handle: dropping it detaches
                drop(forget_lease(&task.lease, &task.token));
                return;
            }
            // The lease may still be alive; try again next tick.
            Err(e) => warn!(lock = %task.name, error = %e, "Lease renewal failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn config(ttl: u64, renewal: u64) -> LockConfig {
        LockConfig {
            default_ttl_secs: ttl,
            renewal_interval_secs: renewal,
            ..LockConfig::default()
        }
    }

    fn store() -> Arc<dyn SharedStore> {
        Arc::new(MemoryStore::new())
    }

    #[tokio::test(start_paused = true)]
    async fn test_renewal_keeps_lock_alive() {
        let store = store();
        let a = DistributedLock::new("job:42", Arc::clone(&store), &config(2, 1));
        let b = DistributedLock::new("job:42", Arc::clone(&store), &config(2, 1));

        assert!(a.acquire(None).await.unwrap());
        assert!(!b.acquire(Some(Duration::ZERO)).await.unwrap());

        sleep(Duration::from_secs(5)).await;
        assert!(!b.acquire(Some(Duration::ZERO)).await.unwrap());
        assert!(a.is_owner().await.unwrap());

        assert!(a.release().await.unwrap());
        assert!(b.acquire(None).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_by_non_owner_is_noop() {
        let store = store();
        let a = DistributedLock::new("job:42", Arc::clone(&store), &config(2, 1));
        let b = DistributedLock::new("job:42", Arc::clone(&store), &config(2, 1));

        assert!(a.acquire(None).await.unwrap());
        assert!(!b.release().await.unwrap());
        assert!(a.is_locked().await.unwrap());
        assert!(a.is_owner().await.unwrap());
        assert!(!b.is_owner().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_crashed_holder_lease_lapses() {
        let store = store();
        let a = DistributedLock::new("job:42", Arc::clone(&store), &config(2, 1));
        let b = DistributedLock::new("job:42", Arc::clone(&store), &config(2, 1));

        assert!(a.acquire(None).await.unwrap());
        a.stop_renewal();

        let started = Instant::now();
        assert!(b.acquire(Some(Duration::from_secs(5))).await.unwrap());
        assert!(started.elapsed() <= Duration::from_secs(3));

        // A's stale token must not remove B's lease
        assert!(!a.release().await.unwrap());
        assert!(b.is_owner().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_renewal_stops_after_max_lock_time() {
        let store = store();
        let a = DistributedLock::new("job", Arc::clone(&store), &config(2, 1)).with_max_lock_time(Duration::from_secs(3));
        let b = DistributedLock::new("job", Arc::clone(&store), &config(2, 1));

        assert!(a.acquire(None).await.unwrap());
        sleep(Duration::from_secs(7)).await;
        assert!(!a.is_held());
        assert!(b.acquire(None).await.unwrap());
        assert!(!a.acquire(Some(Duration::ZERO)).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_without_renewal_lease_expires_after_ttl() {
        let store = store();
        let a = DistributedLock::new("job", Arc::clone(&store), &config(2, 1)).with_auto_renewal(false);
        assert!(a.acquire(None).await.unwrap());
        sleep(Duration::from_millis(2100)).await;
        assert!(!a.is_locked().await.unwrap());
        assert!(!a.is_owner().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lapsed_lease_is_not_claimed_again() {
        let store = store();
        let a = DistributedLock::new("job", Arc::clone(&store), &config(2, 1)).with_auto_renewal(false);
        let b = DistributedLock::new("job", Arc::clone(&store), &config(2, 1));

        assert!(a.acquire(None).await.unwrap());
        assert!(a.is_held());
        sleep(Duration::from_secs(3)).await;
        assert!(!a.is_held());

        assert!(b.acquire(Some(Duration::ZERO)).await.unwrap());
        assert!(!a.acquire(Some(Duration::ZERO)).await.unwrap());
        assert!(!a.is_held());
        assert!(!a.is_owner().await.unwrap());

        // a's stale release must leave b's lease in place
        assert!(!a.release().await.unwrap());
        assert!(b.is_owner().await.unwrap());
        assert!(b.is_held());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_renewal_drops_local_lease() {
        let store = store();
        let a = DistributedLock::new("job", Arc::clone(&store), &config(2, 1));
        let b = DistributedLock::new("job", Arc::clone(&store), &config(2, 1));
        assert!(a.acquire(None).await.unwrap());

        // the key vanishes (eviction, manual delete) and b moves in
        store.delete(a.key()).await.unwrap();
        assert!(b.acquire(Some(Duration::ZERO)).await.unwrap());

        sleep(Duration::from_millis(1100)).await;
        assert!(!a.is_held());
        assert!(!a.acquire(Some(Duration::ZERO)).await.unwrap());
        assert!(b.is_owner().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeat_acquire_checks_store() {
        let store = store();
        let a = DistributedLock::new("job", Arc::clone(&store), &config(30, 10));
        let b = DistributedLock::new("job", Arc::clone(&store), &config(30, 10));
        assert!(a.acquire(None).await.unwrap());

        store.delete(a.key()).await.unwrap();
        assert!(b.acquire(Some(Duration::ZERO)).await.unwrap());

        // still inside a's local deadline, but the store says otherwise
        assert!(a.is_held());
        assert!(!a.acquire(Some(Duration::ZERO)).await.unwrap());
        assert!(!a.is_held());
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_timeout_returns_false() {
        let store = store();
        let a = DistributedLock::new("job", Arc::clone(&store), &config(30, 10));
        let b = DistributedLock::new("job", Arc::clone(&store), &config(30, 10));
        assert!(a.acquire(None).await.unwrap());

        let started = Instant::now();
        assert!(!b.acquire(Some(Duration::from_millis(350))).await.unwrap());
        assert!(started.elapsed() >= Duration::from_millis(350));

        let err = b.lock(Some(Duration::from_millis(100))).await.unwrap_err();
        assert!(matches!(err, LockError::AcquisitionTimeout { .. }));
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_without_timeout_waits_for_release() {
        let store = store();
        let a = Arc::new(DistributedLock::new("job", Arc::clone(&store), &config(30, 10)));
        let b = DistributedLock::new("job", Arc::clone(&store), &config(30, 10));
        assert!(a.acquire(None).await.unwrap());

        let holder = Arc::clone(&a);
        tokio::spawn(async move {
            sleep(Duration::from_secs(3)).await;
            holder.release().await.unwrap();
        });

        let started = Instant::now();
        assert!(b.acquire(None).await.unwrap());
        assert!(started.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_is_idempotent_for_holder() {
        let lock = DistributedLock::new("job", store(), &config(30, 10));
        assert!(lock.acquire(None).await.unwrap());
        assert!(lock.acquire(None).await.unwrap());
        assert!(lock.release().await.unwrap());
        assert!(!lock.release().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_lock_releases_afterwards() {
        let store = store();
        let lock = DistributedLock::new("report", Arc::clone(&store), &config(30, 10));

        let result: Result<u32, &str> = lock.with_lock(None, || async { Err("boom") }).await.unwrap();
        assert_eq!(result, Err("boom"));
        assert!(!lock.is_locked().await.unwrap());

        let value = lock.with_lock(None, || async { 7 }).await.unwrap();
        assert_eq!(value, 7);
        assert!(!lock.is_held());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_guard_releases() {
        let store = store();
        let lock = DistributedLock::new("report", Arc::clone(&store), &config(30, 10));
        {
            let _guard = lock.lock(None).await.unwrap();
            assert!(lock.is_locked().await.unwrap());
        }
        sleep(Duration::from_millis(1)).await;
        assert!(!lock.is_locked().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lock_info() {
        let store = store();
        let a = DistributedLock::new("info", Arc::clone(&store), &config(30, 10));
        let b = DistributedLock::new("info", Arc::clone(&store), &config(30, 10));

        let idle = a.lock_info().await.unwrap();
        assert_eq!(idle.lock_key, "distributed_lock:info");
        assert!(!idle.locked);
        assert_eq!(idle.ttl, None);

        a.acquire(None).await.unwrap();
        let held = a.lock_info().await.unwrap();
        assert!(held.locked && held.is_owner);
        assert!(held.ttl.unwrap() <= Duration::from_secs(30));

        let other = b.lock_info().await.unwrap();
        assert!(other.locked && !other.is_owner);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mutual_exclusion() {
        let store = store();
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));
        let completed = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            let inside = Arc::clone(&inside);
            let max_inside = Arc::clone(&max_inside);
            let completed = Arc::clone(&completed);
            tasks.push(tokio::spawn(async move {
                let lock = DistributedLock::new("shared", store, &config(5, 2));
                lock.with_lock(Some(Duration::from_secs(60)), || async {
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    max_inside.fetch_max(now, Ordering::SeqCst);
                    sleep(Duration::from_millis(250)).await;
                    inside.fetch_sub(1, Ordering::SeqCst);
                    completed.fetch_add(1, Ordering::SeqCst);
                })
                .await
                .unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert_eq!(completed.load(Ordering::SeqCst), 8);
    }

    #[test]
    fn test_blocking_api_outside_runtime() {
        let store = store();
        let a = DistributedLock::new("sync-job", Arc::clone(&store), &config(30, 10));
        let b = DistributedLock::new("sync-job", Arc::clone(&store), &config(30, 10));

        assert!(a.acquire_blocking(None).unwrap());
        assert!(!b.acquire_blocking(Some(Duration::ZERO)).unwrap());
        assert!(a.release_blocking().unwrap());

        let value = b.with_lock_blocking(None, || 99).unwrap();
        assert_eq!(value, 99);
        assert!(!b.is_held());
        assert!(a.acquire_blocking(None).unwrap());
    }
}
