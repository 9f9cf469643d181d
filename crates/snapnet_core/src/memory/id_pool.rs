//! # Snapshot ID Pool
//!
//! Fixed-capacity allocator for the small integer IDs that snapshot items carry.
//!
//! ## Lifecycle
//!
//! ```text
//!   allocate()            free()                 grace elapsed
//! Free ─────────▶ Allocated ─────▶ PendingFree ─────────────────▶ Free
//! ```
//!
//! A freed ID is parked on a FIFO timed list for [`ID_GRACE_PERIOD`] so a client
//! that still references the old occupant never sees a new object under the same
//! ID. Retirement happens lazily on the next [`SnapIdPool::allocate`] or
//! explicitly through [`SnapIdPool::retire_expired`] and [`SnapIdPool::expire_all`].

use std::time::{Duration, Instant};

/// Capacity of the pool: upper bound of concurrently snapshot-visible objects.
pub const MAX_IDS: usize = 16 * 1024;

/// How long a freed ID stays unusable.
pub const ID_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// State of a single ID.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum IdState {
    /// On the free list.
    #[default]
    Free = 0,
    /// Handed out to a caller.
    Allocated = 1,
    /// Freed, waiting for the grace period to end.
    PendingFree = 2,
}

#[derive(Clone, Copy, Debug, Default)]
struct IdSlot {
    /// Next index in whichever list the slot is on.
    next: Option<usize>,
    state: IdState,
    /// Set while the slot is pending.
    timeout: Option<Instant>,
}

/// Pool of snapshot IDs with a timed reuse barrier.
///
/// Two singly linked lists are threaded through the slot array: the free list
/// (LIFO) and the timed list (FIFO, ordered by free time). No allocation happens
/// after construction.
///
/// # Panics
///
/// [`SnapIdPool::allocate`] panics when the pool is exhausted and
/// [`SnapIdPool::free`] panics when handed an ID that is not allocated. Both
/// indicate a capacity or bookkeeping bug in the caller.
pub struct SnapIdPool {
    slots: Box<[IdSlot]>,
    first_free: Option<usize>,
    first_timed: Option<usize>,
    last_timed: Option<usize>,
    /// IDs currently allocated or pending.
    usage: usize,
    /// IDs currently allocated.
    in_usage: usize,
}

impl SnapIdPool {
    /// Creates a pool with [`MAX_IDS`] slots.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(MAX_IDS)
    }

    /// Creates a pool with a custom capacity.
    ///
    /// # Arguments
    ///
    /// * `capacity` - Number of distinct IDs, must be greater than zero
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "Capacity must be greater than zero");

        let slots: Vec<IdSlot> = (0..capacity)
            .map(|i| IdSlot {
                next: if i + 1 < capacity { Some(i + 1) } else { None },
                state: IdState::Free,
                timeout: None,
            })
            .collect();

        Self {
            slots: slots.into_boxed_slice(),
            first_free: Some(0),
            first_timed: None,
            last_timed: None,
            usage: 0,
            in_usage: 0,
        }
    }

    /// Clears every slot back to the free state.
    pub fn reset(&mut self) {
        *self = Self::with_capacity(self.slots.len());
    }

    /// Returns the total capacity.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Returns the number of allocated plus pending IDs.
    #[inline]
    #[must_use]
    pub const fn usage(&self) -> usize {
        self.usage
    }

    /// Returns the number of allocated IDs.
    #[inline]
    #[must_use]
    pub const fn in_usage(&self) -> usize {
        self.in_usage
    }

    /// Returns the state of an ID, or `None` when it is out of range.
    #[must_use]
    pub fn state(&self, id: i32) -> Option<IdState> {
        let index = usize::try_from(id).ok()?;
        self.slots.get(index).map(|slot| slot.state)
    }

    /// Moves the oldest pending ID onto the head of the free list.
    fn retire_first_timed(&mut self) {
        let Some(index) = self.first_timed else {
            return;
        };
        let next_timed = self.slots[index].next;

        let slot = &mut self.slots[index];
        slot.next = self.first_free;
        slot.state = IdState::Free;
        slot.timeout = None;
        self.first_free = Some(index);

        self.first_timed = next_timed;
        if self.first_timed.is_none() {
            self.last_timed = None;
        }
        self.usage -= 1;
    }

    /// Retires every pending ID whose grace period ended strictly before `now`.
    ///
    /// # Returns
    ///
    /// The number of retired IDs.
    pub fn retire_expired(&mut self, now: Instant) -> usize {
        let mut retired = 0;
        while let Some(index) = self.first_timed {
            match self.slots[index].timeout {
                Some(timeout) if timeout < now => {
                    self.retire_first_timed();
                    retired += 1;
                }
                _ => break,
            }
        }
        retired
    }

    /// Force-retires every pending ID regardless of its timeout.
    pub fn expire_all(&mut self) {
        while self.first_timed.is_some() {
            self.retire_first_timed();
        }
    }

    /// Allocates an ID.
    ///
    /// Timed-out pending IDs are retired first, oldest first.
    ///
    /// # Panics
    ///
    /// Panics when no free ID remains.
    pub fn allocate(&mut self, now: Instant) -> i32 {
        self.retire_expired(now);

        let index = self.first_free.expect("snapshot id pool exhausted");
        let slot = &mut self.slots[index];
        self.first_free = slot.next;
        slot.next = None;
        slot.state = IdState::Allocated;

        self.usage += 1;
        self.in_usage += 1;

        i32::try_from(index).expect("snapshot id pool capacity fits in i32")
    }

    /// Frees an ID. It becomes reusable only after [`ID_GRACE_PERIOD`].
    ///
    /// Negative IDs are ignored.
    ///
    /// # Panics
    ///
    /// Panics when the ID is out of range or not currently allocated.
    pub fn free(&mut self, id: i32, now: Instant) {
        let Ok(index) = usize::try_from(id) else {
            return;
        };
        assert!(index < self.slots.len(), "snapshot id {id} out of range");
        assert_eq!(
            self.slots[index].state,
            IdState::Allocated,
            "snapshot id {id} freed while not allocated"
        );

        self.in_usage -= 1;
        let slot = &mut self.slots[index];
        slot.state = IdState::PendingFree;
        slot.timeout = Some(now + ID_GRACE_PERIOD);
        slot.next = None;

        match self.last_timed {
            Some(last) => self.slots[last].next = Some(index),
            None => self.first_timed = Some(index),
        }
        self.last_timed = Some(index);
    }
}

impl Default for SnapIdPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_sequential() {
        let mut pool = SnapIdPool::with_capacity(4);
        let now = Instant::now();

        assert_eq!(pool.allocate(now), 0);
        assert_eq!(pool.allocate(now), 1);
        assert_eq!(pool.in_usage(), 2);
        assert_eq!(pool.state(1), Some(IdState::Allocated));
        assert_eq!(pool.state(2), Some(IdState::Free));
    }

    #[test]
    fn test_freed_id_not_reused_within_grace() {
        let mut pool = SnapIdPool::with_capacity(8);
        let start = Instant::now();

        let id = pool.allocate(start);
        pool.free(id, start);
        assert_eq!(pool.state(id), Some(IdState::PendingFree));

        // Repeated allocate/free cycles inside the grace window never hand it back
        for step in 0..50u64 {
            let now = start + Duration::from_millis(step * 100);
            let other = pool.allocate(now);
            assert_ne!(other, id);
            pool.free(other, now);
        }
    }

    #[test]
    fn test_freed_id_reused_after_grace() {
        let mut pool = SnapIdPool::with_capacity(2);
        let start = Instant::now();

        let id = pool.allocate(start);
        pool.free(id, start);

        // Exactly at the deadline the id is still pending
        let at_deadline = start + ID_GRACE_PERIOD;
        assert_eq!(pool.retire_expired(at_deadline), 0);

        let later = at_deadline + Duration::from_millis(1);
        assert_eq!(pool.allocate(later), id);
    }

    #[test]
    fn test_timed_list_is_fifo() {
        let mut pool = SnapIdPool::with_capacity(4);
        let start = Instant::now();

        let a = pool.allocate(start);
        let b = pool.allocate(start);
        pool.free(a, start);
        pool.free(b, start + Duration::from_secs(2));

        // Only `a` has expired
        let now = start + Duration::from_secs(6);
        assert_eq!(pool.retire_expired(now), 1);
        assert_eq!(pool.state(a), Some(IdState::Free));
        assert_eq!(pool.state(b), Some(IdState::PendingFree));
    }

    #[test]
    fn test_expire_all() {
        let mut pool = SnapIdPool::with_capacity(3);
        let now = Instant::now();

        for _ in 0..3 {
            let id = pool.allocate(now);
            pool.free(id, now);
        }
        assert_eq!(pool.usage(), 3);

        pool.expire_all();
        assert_eq!(pool.usage(), 0);
        // All three are immediately reusable
        for _ in 0..3 {
            pool.allocate(now);
        }
    }

    #[test]
    fn test_negative_id_ignored() {
        let mut pool = SnapIdPool::with_capacity(1);
        pool.free(-1, Instant::now());
        assert_eq!(pool.usage(), 0);
    }

    #[test]
    #[should_panic(expected = "exhausted")]
    fn test_exhaustion_panics() {
        let mut pool = SnapIdPool::with_capacity(2);
        let now = Instant::now();
        pool.allocate(now);
        pool.allocate(now);
        pool.allocate(now);
    }

    #[test]
    #[should_panic(expected = "not allocated")]
    fn test_double_free_panics() {
        let mut pool = SnapIdPool::with_capacity(2);
        let now = Instant::now();
        let id = pool.allocate(now);
        pool.free(id, now);
        pool.free(id, now);
    }
}
