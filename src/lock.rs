//! UTXO lock manager (spec §4.7).
//!
//! A single [`std::sync::Mutex`] guards both indices (`by_outpoint`,
//! `by_lock_id`) so every operation is O(1) both ways and `lock_many` can be
//! all-or-nothing without a separate coordination mechanism.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use bitcoin::OutPoint;

/// Errors raised by lock manager operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LockError {
    /// The outpoint already has an active (non-expired) lock.
    #[error("outpoint {0} is already locked")]
    AlreadyLocked(OutPoint),
    /// `lock_many` found more than one conflicting outpoint; lists every
    /// outpoint that was already locked. No locks were taken.
    #[error("{} outpoints are already locked", .0.len())]
    MultipleConflicts(Vec<OutPoint>),
    /// `lock_id` does not refer to an active lock.
    #[error("lock id {0} not found")]
    LockNotFound(u64),
}

/// Opaque handle identifying a single lock, returned by `lock`/`lock_many`.
pub type LockId = u64;

/// Why an outpoint is locked (spec §4.7's closed purpose set).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockPurpose {
    /// Held while building a replacement transaction.
    Rbf,
    /// Held while building a fee-bumping child.
    Cpfp,
    /// Held for a build that hasn't committed to a specific purpose yet.
    Pending,
}

#[derive(Debug, Clone)]
struct LockEntry {
    id: LockId,
    outpoint: OutPoint,
    purpose: LockPurpose,
    expires_at: Instant,
}

/// A single lock's public view, returned by [`LockManager::get_by_purpose`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockInfo {
    /// This lock's id.
    pub id: LockId,
    /// The outpoint it holds.
    pub outpoint: OutPoint,
    /// Why it's held.
    pub purpose: LockPurpose,
}

#[derive(Debug, Default)]
struct LockTable {
    by_outpoint: HashMap<OutPoint, LockId>,
    by_lock_id: HashMap<LockId, LockEntry>,
}

impl LockTable {
    fn is_expired(entry: &LockEntry, now: Instant) -> bool {
        entry.expires_at <= now
    }

    /// Remove `lock_id` if it exists and has expired. Returns whether it was
    /// removed.
    fn reap_if_expired(&mut self, outpoint: &OutPoint, now: Instant) -> bool {
        if let Some(&id) = self.by_outpoint.get(outpoint) {
            if let Some(entry) = self.by_lock_id.get(&id) {
                if Self::is_expired(entry, now) {
                    self.by_outpoint.remove(outpoint);
                    self.by_lock_id.remove(&id);
                    return true;
                }
            }
        }
        false
    }

    fn active_lock(&mut self, outpoint: &OutPoint, now: Instant) -> Option<LockId> {
        self.reap_if_expired(outpoint, now);
        self.by_outpoint.get(outpoint).copied()
    }

    fn insert(&mut self, id: LockId, outpoint: OutPoint, purpose: LockPurpose, expires_at: Instant) {
        self.by_outpoint.insert(outpoint, id);
        self.by_lock_id.insert(
            id,
            LockEntry {
                id,
                outpoint,
                purpose,
                expires_at,
            },
        );
    }
}

/// Tracks short-lived exclusive locks on outpoints, so concurrent builders
/// don't double-spend the same UTXO.
#[derive(Debug)]
pub struct LockManager {
    table: Mutex<LockTable>,
    next_id: AtomicU64,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LockManager {
    /// New, empty lock manager.
    pub fn new() -> Self {
        Self {
            table: Mutex::new(LockTable::default()),
            next_id: AtomicU64::new(1),
        }
    }

    fn allocate_id(&self) -> LockId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Lock a single outpoint for `ttl`, tagged with `purpose`.
    pub fn lock(
        &self,
        outpoint: OutPoint,
        purpose: LockPurpose,
        ttl: Duration,
    ) -> Result<LockId, LockError> {
        let now = Instant::now();
        let mut table = self.table.lock().expect("lock table poisoned");
        if table.active_lock(&outpoint, now).is_some() {
            return Err(LockError::AlreadyLocked(outpoint));
        }
        let id = self.allocate_id();
        table.insert(id, outpoint, purpose, now + ttl);
        Ok(id)
    }

    /// Release a lock by id. Returns `false` if it was already absent or
    /// expired.
    pub fn unlock(&self, lock_id: LockId) -> bool {
        let mut table = self.table.lock().expect("lock table poisoned");
        match table.by_lock_id.remove(&lock_id) {
            Some(entry) => {
                table.by_outpoint.remove(&entry.outpoint);
                true
            }
            None => false,
        }
    }

    /// Whether `outpoint` currently holds an active (non-expired) lock.
    pub fn is_locked(&self, outpoint: OutPoint) -> bool {
        let now = Instant::now();
        let mut table = self.table.lock().expect("lock table poisoned");
        table.active_lock(&outpoint, now).is_some()
    }

    /// Lock every outpoint in `outpoints`, atomically: if any is already
    /// locked, none are locked and every conflicting outpoint is reported.
    pub fn lock_many(
        &self,
        outpoints: &[OutPoint],
        purpose: LockPurpose,
        ttl: Duration,
    ) -> Result<Vec<LockId>, LockError> {
        let now = Instant::now();
        let mut table = self.table.lock().expect("lock table poisoned");

        let conflicts: Vec<OutPoint> = outpoints
            .iter()
            .filter(|op| table.active_lock(op, now).is_some())
            .copied()
            .collect();
        if !conflicts.is_empty() {
            return Err(LockError::MultipleConflicts(conflicts));
        }

        let ids = outpoints
            .iter()
            .map(|&outpoint| {
                let id = self.allocate_id();
                table.insert(id, outpoint, purpose, now + ttl);
                id
            })
            .collect();
        Ok(ids)
    }

    /// Extend an active lock's expiry by `extra`.
    pub fn extend(&self, lock_id: LockId, extra: Duration) -> Result<(), LockError> {
        let mut table = self.table.lock().expect("lock table poisoned");
        let entry = table
            .by_lock_id
            .get_mut(&lock_id)
            .ok_or(LockError::LockNotFound(lock_id))?;
        entry.expires_at += extra;
        Ok(())
    }

    /// Eagerly remove every expired lock. Returns how many were swept.
    pub fn expire_sweep(&self) -> usize {
        let now = Instant::now();
        let mut table = self.table.lock().expect("lock table poisoned");
        let expired: Vec<LockId> = table
            .by_lock_id
            .values()
            .filter(|entry| LockTable::is_expired(entry, now))
            .map(|entry| entry.id)
            .collect();
        for id in &expired {
            if let Some(entry) = table.by_lock_id.remove(id) {
                table.by_outpoint.remove(&entry.outpoint);
            }
        }
        expired.len()
    }

    /// All active (non-expired) locks tagged with `purpose`.
    pub fn get_by_purpose(&self, purpose: LockPurpose) -> Vec<LockInfo> {
        let now = Instant::now();
        let table = self.table.lock().expect("lock table poisoned");
        table
            .by_lock_id
            .values()
            .filter(|entry| !LockTable::is_expired(entry, now))
            .filter(|entry| entry.purpose == purpose)
            .map(|entry| LockInfo {
                id: entry.id,
                outpoint: entry.outpoint,
                purpose: entry.purpose,
            })
            .collect()
    }

    /// Remove a lock on `outpoint` regardless of its owner, id, or expiry.
    /// Returns `false` if nothing was locked.
    pub fn force_unlock(&self, outpoint: OutPoint) -> bool {
        let mut table = self.table.lock().expect("lock table poisoned");
        match table.by_outpoint.remove(&outpoint) {
            Some(id) => {
                table.by_lock_id.remove(&id);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hashes::Hash;
    use bitcoin::Txid;

    fn outpoint(vout: u32) -> OutPoint {
        OutPoint::new(Txid::from_byte_array([vout as u8; 32]), vout)
    }

    /// Spec §8 property 7: a concurrent lock on an already-locked outpoint
    /// fails with `AlreadyLocked`.
    #[test]
    fn lock_exclusivity() {
        let manager = LockManager::new();
        let op = outpoint(0);
        manager
            .lock(op, LockPurpose::Pending, Duration::from_secs(30))
            .unwrap();
        match manager.lock(op, LockPurpose::Pending, Duration::from_secs(30)) {
            Err(LockError::AlreadyLocked(locked)) => assert_eq!(locked, op),
            other => panic!("expected AlreadyLocked, got {other:?}"),
        }
    }

    #[test]
    fn lock_many_is_all_or_nothing() {
        let manager = LockManager::new();
        let already = outpoint(0);
        manager
            .lock(already, LockPurpose::Pending, Duration::from_secs(30))
            .unwrap();

        let batch = vec![outpoint(1), already, outpoint(2)];
        match manager.lock_many(&batch, LockPurpose::Pending, Duration::from_secs(30)) {
            Err(LockError::MultipleConflicts(conflicts)) => assert_eq!(conflicts, vec![already]),
            other => panic!("expected MultipleConflicts, got {other:?}"),
        }

        assert!(!manager.is_locked(outpoint(1)));
        assert!(!manager.is_locked(outpoint(2)));
        assert!(manager.is_locked(already));
    }

    #[test]
    fn expired_locks_are_treated_as_absent() {
        let manager = LockManager::new();
        let op = outpoint(5);
        manager
            .lock(op, LockPurpose::Pending, Duration::from_millis(1))
            .unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert!(!manager.is_locked(op));
        assert_eq!(manager.expire_sweep(), 0);
    }

    #[test]
    fn unlock_releases_both_indices() {
        let manager = LockManager::new();
        let op = outpoint(9);
        let id = manager
            .lock(op, LockPurpose::Pending, Duration::from_secs(30))
            .unwrap();
        assert!(manager.unlock(id));
        assert!(!manager.is_locked(op));
        assert!(!manager.unlock(id));
    }

    #[test]
    fn get_by_purpose_filters_correctly() {
        let manager = LockManager::new();
        manager
            .lock(outpoint(1), LockPurpose::Cpfp, Duration::from_secs(30))
            .unwrap();
        manager
            .lock(outpoint(2), LockPurpose::Rbf, Duration::from_secs(30))
            .unwrap();

        let cpfp_locks = manager.get_by_purpose(LockPurpose::Cpfp);
        assert_eq!(cpfp_locks.len(), 1);
        assert_eq!(cpfp_locks[0].outpoint, outpoint(1));
    }

    #[test]
    fn force_unlock_ignores_expiry() {
        let manager = LockManager::new();
        let op = outpoint(3);
        manager
            .lock(op, LockPurpose::Pending, Duration::from_secs(30))
            .unwrap();
        assert!(manager.force_unlock(op));
        assert!(!manager.is_locked(op));
        assert!(!manager.force_unlock(op));
    }
}
