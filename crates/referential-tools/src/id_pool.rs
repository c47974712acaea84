//! Contiguous integer id pool with named reservations.
//!
//! The serialized form carries only `start_from`, `end_to` and `members`;
//! the free set is derived state and must be rebuilt with
//! [`IdPool::reconcile`] after deserialization. The free set is kept as a
//! sorted set of disjoint inclusive intervals so that a pool spanning the
//! whole `i64` range costs memory proportional to the number of
//! reservations, not the size of the range.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// An id drawn from a pool.
pub type Id = i64;

/// Errors raised by pool mutations.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The requested range is empty or inverted.
    #[error("invalid pool range [{start_from}, {end_to}], please check start_from and end_to")]
    InvalidRange { start_from: Id, end_to: Id },

    /// A resize would strand an existing reservation outside the new range.
    #[error("still a member that cannot fit into new limits: {key}, that have value: {value}")]
    RangeTooSmall { key: String, value: Id },
}

/// A pool of integer ids in `[start_from, end_to]`, reserved under owner keys.
///
/// Every reserved id is unique across owner keys, and the free set is always
/// the exact complement of the reserved ids within the range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdPool {
    pub start_from: Id,
    pub end_to: Id,
    /// Owner key to reserved id. Values are pairwise distinct.
    pub members: BTreeMap<String, Id>,
    /// Unallocated ids within the range. Derived, never persisted.
    #[serde(skip)]
    free: IntervalSet,
}

impl IdPool {
    /// Create a pool with every id in `[start_from, end_to]` free.
    ///
    /// An inverted range yields a pool for which [`IdPool::is_valid`]
    /// returns false and no id can be allocated.
    pub fn new(start_from: Id, end_to: Id) -> Self {
        let free = if start_from <= end_to {
            IntervalSet::spanning(start_from, end_to)
        } else {
            IntervalSet::default()
        };
        Self {
            start_from,
            end_to,
            members: BTreeMap::new(),
            free,
        }
    }

    /// The range invariant: `start_from <= end_to`.
    pub fn is_valid(&self) -> bool {
        self.start_from <= self.end_to
    }

    /// Rebuild the free set from the range and the reserved members.
    ///
    /// Must be called after deserialization, before any allocation.
    pub fn reconcile(&mut self) {
        let mut free = if self.is_valid() {
            IntervalSet::spanning(self.start_from, self.end_to)
        } else {
            IntervalSet::default()
        };
        for &id in self.members.values() {
            free.remove(id);
        }
        self.free = free;
    }

    /// Carve a single id out of the free set without recording an owner.
    ///
    /// Returns false if the id was not free.
    pub fn remove(&mut self, id: Id) -> bool {
        self.free.remove(id)
    }

    /// Reserve a free id under `owner_key` and return it.
    ///
    /// Returns `None` when the key is already a member or when no free id
    /// remains; in both cases the pool is left unchanged. The lowest free id
    /// is chosen.
    pub fn allocate(&mut self, owner_key: &str) -> Option<Id> {
        if self.members.contains_key(owner_key) {
            return None;
        }
        let id = self.free.first()?;
        self.free.remove(id);
        self.members.insert(owner_key.to_string(), id);
        Some(id)
    }

    /// Release a reserved id back into the free set.
    ///
    /// Removes whichever member holds `id`. Releasing an id that is already
    /// free, or that lies outside the range, is a no-op.
    pub fn release(&mut self, id: Id) {
        self.members.retain(|_, reserved| *reserved != id);
        if id >= self.start_from && id <= self.end_to {
            self.free.insert(id);
        }
    }

    /// Move a reservation from `old_key` to `new_key`, preserving its id.
    ///
    /// Returns false (and changes nothing) when `old_key` is not a member or
    /// `new_key` already is: silently overwriting `new_key` would strand its
    /// id outside both the members map and the free set.
    pub fn rename(&mut self, old_key: &str, new_key: &str) -> bool {
        if !self.members.contains_key(old_key) || self.members.contains_key(new_key) {
            return false;
        }
        if let Some(id) = self.members.remove(old_key) {
            self.members.insert(new_key.to_string(), id);
        }
        true
    }

    /// Change the pool range, keeping every current reservation.
    ///
    /// Fails without mutating when the new range is inverted or when any
    /// member's id falls outside it.
    pub fn resize(&mut self, new_start: Id, new_end: Id) -> Result<(), PoolError> {
        if new_start > new_end {
            return Err(PoolError::InvalidRange {
                start_from: new_start,
                end_to: new_end,
            });
        }
        for (key, &value) in &self.members {
            if value < new_start || value > new_end {
                return Err(PoolError::RangeTooSmall {
                    key: key.clone(),
                    value,
                });
            }
        }
        self.start_from = new_start;
        self.end_to = new_end;
        self.reconcile();
        Ok(())
    }

    /// The id reserved under `owner_key`, if any.
    pub fn get(&self, owner_key: &str) -> Option<Id> {
        self.members.get(owner_key).copied()
    }

    /// True when no id remains free.
    pub fn is_exhausted(&self) -> bool {
        self.free.is_empty()
    }

    /// True when `id` is currently free.
    pub fn is_free(&self, id: Id) -> bool {
        self.free.contains(id)
    }
}

/// Sorted set of disjoint inclusive `[start, end]` intervals.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct IntervalSet {
    // start -> end, disjoint and non-adjacent
    ranges: BTreeMap<Id, Id>,
}

impl IntervalSet {
    fn spanning(start: Id, end: Id) -> Self {
        let mut ranges = BTreeMap::new();
        ranges.insert(start, end);
        Self { ranges }
    }

    fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    fn first(&self) -> Option<Id> {
        self.ranges.keys().next().copied()
    }

    fn contains(&self, id: Id) -> bool {
        self.ranges
            .range(..=id)
            .next_back()
            .is_some_and(|(_, &end)| id <= end)
    }

    /// Carve `id` out of whichever interval covers it.
    fn remove(&mut self, id: Id) -> bool {
        let Some((&start, &end)) = self.ranges.range(..=id).next_back() else {
            return false;
        };
        if id > end {
            return false;
        }
        self.ranges.remove(&start);
        if start < id {
            self.ranges.insert(start, id - 1);
        }
        if id < end {
            self.ranges.insert(id + 1, end);
        }
        true
    }

    /// Insert `id`, merging with neighbouring intervals. No-op when present.
    fn insert(&mut self, id: Id) {
        if self.contains(id) {
            return;
        }
        let mut start = id;
        let mut end = id;
        // Merge with a preceding interval ending at id - 1.
        if let Some((&prev_start, &prev_end)) = self.ranges.range(..id).next_back() {
            if prev_end.checked_add(1) == Some(id) {
                start = prev_start;
                self.ranges.remove(&prev_start);
            }
        }
        // Merge with a following interval starting at id + 1.
        if let Some(next_start) = id.checked_add(1) {
            if let Some(&next_end) = self.ranges.get(&next_start) {
                end = next_end;
                self.ranges.remove(&next_start);
            }
        }
        self.ranges.insert(start, end);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_pool_is_fully_free() {
        let pool = IdPool::new(2, 12);
        assert!(pool.is_valid());
        assert!(!pool.is_exhausted());
        assert!(pool.is_free(2));
        assert!(pool.is_free(12));
        assert!(!pool.is_free(13));
    }

    #[test]
    fn inverted_range_is_invalid_and_exhausted() {
        let pool = IdPool::new(10, 2);
        assert!(!pool.is_valid());
        assert!(pool.is_exhausted());
    }

    #[test]
    fn allocate_hands_out_each_id_once() {
        let mut pool = IdPool::new(1, 3);
        let a = pool.allocate("a").unwrap();
        let b = pool.allocate("b").unwrap();
        let c = pool.allocate("c").unwrap();
        let mut ids = vec![a, b, c];
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 2, 3]);
        assert!(pool.is_exhausted());
    }

    #[test]
    fn allocate_on_exhausted_pool_returns_none_and_keeps_members() {
        let mut pool = IdPool::new(5, 5);
        assert_eq!(pool.allocate("a"), Some(5));
        assert_eq!(pool.allocate("b"), None);
        assert_eq!(pool.members.len(), 1);
        assert_eq!(pool.get("a"), Some(5));
    }

    #[test]
    fn allocate_refuses_existing_owner_key() {
        let mut pool = IdPool::new(1, 10);
        assert!(pool.allocate("a").is_some());
        assert_eq!(pool.allocate("a"), None);
        assert_eq!(pool.members.len(), 1);
    }

    #[test]
    fn release_returns_id_to_free_set() {
        let mut pool = IdPool::new(1, 2);
        let a = pool.allocate("a").unwrap();
        pool.allocate("b").unwrap();
        assert!(pool.is_exhausted());
        pool.release(a);
        assert!(pool.get("a").is_none());
        assert!(pool.is_free(a));
        // The freed id is handed out again.
        assert_eq!(pool.allocate("c"), Some(a));
    }

    #[test]
    fn release_is_idempotent() {
        let mut pool = IdPool::new(1, 4);
        let a = pool.allocate("a").unwrap();
        pool.release(a);
        let snapshot = pool.clone();
        pool.release(a);
        assert_eq!(pool.members, snapshot.members);
        assert_eq!(pool.free, snapshot.free);
    }

    #[test]
    fn release_outside_range_changes_nothing() {
        let mut pool = IdPool::new(1, 4);
        let snapshot = pool.clone();
        pool.release(99);
        assert_eq!(pool.free, snapshot.free);
    }

    #[test]
    fn rename_preserves_id() {
        let mut pool = IdPool::new(1, 10);
        let id = pool.allocate("old").unwrap();
        assert!(pool.rename("old", "new"));
        assert_eq!(pool.get("new"), Some(id));
        assert!(pool.get("old").is_none());
        assert!(!pool.is_free(id));
    }

    #[test]
    fn rename_refuses_missing_source_and_existing_target() {
        let mut pool = IdPool::new(1, 10);
        pool.allocate("a").unwrap();
        pool.allocate("b").unwrap();
        assert!(!pool.rename("missing", "c"));
        assert!(!pool.rename("a", "b"));
        assert_eq!(pool.members.len(), 2);
    }

    #[test]
    fn resize_keeps_members_and_adjusts_free_set() {
        let mut pool = IdPool::new(1, 20);
        pool.remove(17);
        pool.members.insert("a".to_string(), 17);
        pool.resize(15, 30).unwrap();
        assert_eq!(pool.get("a"), Some(17));
        assert!(!pool.is_free(17));
        assert!(pool.is_free(15));
        assert!(pool.is_free(30));
        assert!(!pool.is_free(1));
    }

    #[test]
    fn resize_excluding_member_fails_without_mutating() {
        let mut pool = IdPool::new(1, 20);
        pool.remove(17);
        pool.members.insert("a".to_string(), 17);
        let snapshot = pool.clone();
        let err = pool.resize(1, 10).unwrap_err();
        match err {
            PoolError::RangeTooSmall { key, value } => {
                assert_eq!(key, "a");
                assert_eq!(value, 17);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(pool.start_from, snapshot.start_from);
        assert_eq!(pool.end_to, snapshot.end_to);
        assert_eq!(pool.free, snapshot.free);
    }

    #[test]
    fn serialized_pool_omits_free_set_and_reconciles() {
        let mut pool = IdPool::new(2, 12);
        pool.allocate("req-1").unwrap();
        pool.allocate("req-2").unwrap();
        let json = serde_json::to_value(&pool).unwrap();
        assert!(json.get("free").is_none());
        assert_eq!(json["start_from"], 2);
        assert_eq!(json["end_to"], 12);

        let mut restored: IdPool = serde_json::from_value(json).unwrap();
        restored.reconcile();
        assert_eq!(restored.members, pool.members);
        for id in 2..=12 {
            let reserved = restored.members.values().any(|&v| v == id);
            assert_eq!(restored.is_free(id), !reserved, "id {id}");
        }
    }

    #[test]
    fn full_i64_range_stays_sparse() {
        let mut pool = IdPool::new(1, Id::MAX);
        assert_eq!(pool.allocate("a"), Some(1));
        assert_eq!(pool.allocate("b"), Some(2));
        pool.release(1);
        assert_eq!(pool.allocate("c"), Some(1));
        assert!(pool.is_free(Id::MAX));
    }

    #[test]
    fn interval_set_split_and_merge() {
        let mut set = IntervalSet::spanning(1, 9);
        assert!(set.remove(5));
        assert!(!set.contains(5));
        assert!(set.contains(4));
        assert!(set.contains(6));
        assert!(!set.remove(5));
        set.insert(5);
        assert_eq!(set.ranges.len(), 1);
        assert_eq!(set.ranges.get(&1), Some(&9));
    }
}
