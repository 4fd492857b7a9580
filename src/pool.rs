use std::sync::{Mutex, MutexGuard, PoisonError};

use thiserror::Error;

use crate::frame::{Frame, FrameId, FrameSlot};

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
    #[error("frame pool of worker {owner} is exhausted ({capacity} slots in use)")]
    Exhausted { owner: usize, capacity: usize },
}

/// Fixed-capacity arena of frames allocated by one worker.
///
/// Only the owner allocates, but any worker may free a slot after finishing a frame it stole,
/// hence the mutex around the bookkeeping.
pub struct FramePool<S> {
    owner: usize,
    slots: Box<[FrameSlot<S>]>,
    bitmap: Mutex<SlotBitmap>,
}

struct SlotBitmap {
    in_use: Box<[bool]>,
    /// Where the next allocation starts scanning.
    next_free: usize,
    live: usize,
    allocated: u64,
    freed: u64,
}

impl<S> FramePool<S> {
    pub fn new(owner: usize, capacity: usize) -> Self {
        assert!(capacity > 0, "frame pool needs at least one slot");

        FramePool {
            owner,
            slots: (0..capacity).map(|_| FrameSlot::empty()).collect(),
            bitmap: Mutex::new(SlotBitmap {
                in_use: vec![false; capacity].into_boxed_slice(),
                next_free: 0,
                live: 0,
                allocated: 0,
                freed: 0,
            }),
        }
    }

    #[inline(always)]
    pub fn owner(&self) -> usize {
        self.owner
    }

    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline(always)]
    pub(crate) fn slot(&self, idx: usize) -> &FrameSlot<S> {
        &self.slots[idx]
    }

    fn lock(&self) -> MutexGuard<'_, SlotBitmap> {
        self.bitmap.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stores `frame` in the first free slot at or after the cursor, wrapping around.
    pub fn allocate(&self, frame: Frame<S>) -> Result<FrameId, PoolError> {
        let capacity = self.capacity();
        let idx = {
            let mut bitmap = self.lock();
            let start = bitmap.next_free;
            let idx = (start..capacity)
                .chain(0..start)
                .find(|&i| !bitmap.in_use[i])
                .ok_or(PoolError::Exhausted {
                    owner: self.owner,
                    capacity,
                })?;

            bitmap.in_use[idx] = true;
            bitmap.next_free = (idx + 1) % capacity;
            bitmap.live += 1;
            bitmap.allocated += 1;
            idx
        };

        // SAFETY: the slot was free and is now reserved for us, nobody else holds its id.
        unsafe { self.slots[idx].occupy(frame) };
        Ok(FrameId::new(self.owner, idx))
    }

    /// Returns a slot to the pool. May be called from any worker.
    pub(crate) fn free(&self, idx: usize) {
        let mut bitmap = self.lock();
        debug_assert!(bitmap.in_use[idx], "slot {} of pool {} freed twice", idx, self.owner);

        bitmap.in_use[idx] = false;
        // Freshly freed slots are likely still in cache
        bitmap.next_free = idx;
        bitmap.live -= 1;
        bitmap.freed += 1;
    }

    /// Whether at least one more frame can be allocated right now.
    pub fn has_free_slot(&self) -> bool {
        self.lock().live < self.capacity()
    }

    /// Number of slots currently in use.
    pub fn live(&self) -> usize {
        self.lock().live
    }

    /// Total number of allocations and frees so far.
    pub fn counters(&self) -> (u64, u64) {
        let bitmap = self.lock();
        (bitmap.allocated, bitmap.freed)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::frame::FrameArena;

    fn frame() -> Frame<u8> {
        Frame::new(Arc::new(0), Arc::new(0), 0)
    }

    #[test]
    fn test_allocate_scans_from_cursor() {
        let pool = FramePool::new(3, 4);

        let ids: Vec<_> = (0..4).map(|_| pool.allocate(frame()).unwrap()).collect();
        let slots: Vec<_> = ids.iter().map(|id| id.slot()).collect();
        assert_eq!(slots, vec![0, 1, 2, 3]);
        assert!(ids.iter().all(|id| id.owner() == 3));
        assert_eq!(pool.live(), 4);
    }

    #[test]
    fn test_exhausted_pool_reports_error() {
        let pool = FramePool::new(1, 2);
        pool.allocate(frame()).unwrap();
        pool.allocate(frame()).unwrap();

        assert!(!pool.has_free_slot());
        assert_eq!(
            pool.allocate(frame()),
            Err(PoolError::Exhausted {
                owner: 1,
                capacity: 2
            })
        );
    }

    #[test]
    fn test_free_rewinds_cursor() {
        let pool = FramePool::new(0, 8);
        let ids: Vec<_> = (0..5).map(|_| pool.allocate(frame()).unwrap()).collect();

        pool.free(ids[1].slot());
        assert!(pool.has_free_slot());
        assert_eq!(pool.allocate(frame()).unwrap().slot(), 1);

        // After the hint is consumed, scanning continues behind it
        assert_eq!(pool.allocate(frame()).unwrap().slot(), 5);
        assert_eq!(pool.counters(), (7, 1));
    }

    #[test]
    fn test_allocation_wraps_around() {
        let pool = FramePool::new(0, 3);
        let ids: Vec<_> = (0..3).map(|_| pool.allocate(frame()).unwrap()).collect();

        pool.free(ids[0].slot());
        pool.free(ids[2].slot());
        assert_eq!(pool.allocate(frame()).unwrap().slot(), 2);
        // Cursor wrapped back to the start
        assert_eq!(pool.allocate(frame()).unwrap().slot(), 0);
        assert!(pool.allocate(frame()).is_err());
    }

    #[test]
    fn test_foreign_thread_frees_into_owner_pool() {
        let arena = FrameArena::new(2, 4);
        let ids: Vec<_> = (0..4).map(|_| arena.allocate(0, frame()).unwrap()).collect();
        assert!(arena.allocate(0, frame()).is_err());

        std::thread::scope(|s| {
            s.spawn(|| {
                for &id in &ids {
                    unsafe { arena.release(id) };
                }
            });
        });

        assert_eq!(arena.pool(0).live(), 0);
        assert_eq!(arena.pool(1).live(), 0);
        assert!(arena.allocate(0, frame()).is_ok());
    }
}
