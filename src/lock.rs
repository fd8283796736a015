//! # Per-Entity Serialization Lock
//!
//! Every mutation of an entity, and every replay it triggers, runs while
//! holding the lock for its `(tenant, entity)` key. Two mutations of the same
//! entity therefore never interleave their read-append-replay sequence.
//!
//! The key lock is not the only point of serialization. SQLite admits one
//! writer at a time, and the ledger runs every transaction on its single
//! writer connection, so mutations of different entities never wait on each
//! other's key but still commit one after another.
//!
//! ## How It Works
//!
//! ```text
//! held: Mutex<HashSet<LockKey>>      released: Condvar
//!
//! acquire(k):  while k ∈ held { wait on `released` until deadline }
//!              insert k; return guard
//! drop(guard): remove k; notify_all
//! ```
//!
//! The set only contains keys that are currently held, so it never grows
//! with the number of entities ever touched.
//!
//! A poisoned set is recovered with `PoisonError::into_inner`: the set is
//! only ever mutated by single `insert`/`remove` calls, which leave it
//! consistent even if the thread that held the mutex panicked afterwards.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::types::{EntityId, TenantId};

/// The scope of one lock: a single entity of a single tenant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockKey {
    tenant_id: TenantId,
    entity_id: EntityId,
}

impl LockKey {
    /// Builds the key for one entity.
    pub fn new(tenant_id: &TenantId, entity_id: &EntityId) -> Self {
        Self {
            tenant_id: tenant_id.clone(),
            entity_id: entity_id.clone(),
        }
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.tenant_id, self.entity_id)
    }
}

/// The set of currently held entity locks.
#[derive(Debug, Default)]
pub struct KeyLocks {
    held: Mutex<HashSet<LockKey>>,
    released: Condvar,
}

impl KeyLocks {
    /// Creates an empty lock table.
    pub fn new() -> Self {
        Self::default()
    }

    fn held(&self) -> MutexGuard<'_, HashSet<LockKey>> {
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Acquires the lock for `key`, waiting at most `timeout`.
    ///
    /// # Errors
    ///
    /// `Error::LockTimeout` if another holder keeps the key past the
    /// deadline.
    pub fn acquire(&self, key: LockKey, timeout: Duration) -> Result<KeyGuard<'_>> {
        let started = Instant::now();
        let deadline = started + timeout;
        let mut held = self.held();

        while held.contains(&key) {
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::LockTimeout {
                    key: key.to_string(),
                    waited_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                });
            }
            let (guard, _) = self
                .released
                .wait_timeout(held, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            held = guard;
        }

        held.insert(key.clone());
        Ok(KeyGuard { locks: self, key })
    }

    /// Number of keys currently held.
    pub fn held_count(&self) -> usize {
        self.held().len()
    }
}

/// Releases its key when dropped.
#[derive(Debug)]
pub struct KeyGuard<'a> {
    locks: &'a KeyLocks,
    key: LockKey,
}

impl KeyGuard<'_> {
    /// The key this guard holds.
    pub fn key(&self) -> &LockKey {
        &self.key
    }
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        self.locks.held().remove(&self.key);
        self.locks.released.notify_all();
    }
}
