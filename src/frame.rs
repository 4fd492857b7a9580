use std::{
    cell::UnsafeCell,
    marker::PhantomData,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

#[cfg(debug_assertions)]
use std::sync::atomic::AtomicBool;

use crate::pool::{FramePool, PoolError};

/// Identifies a frame by the worker whose pool holds it and the slot inside that pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId {
    owner: u32,
    slot: u32,
}

impl FrameId {
    #[inline(always)]
    pub fn new(owner: usize, slot: usize) -> Self {
        debug_assert!(owner <= u32::MAX as usize && slot <= u32::MAX as usize);
        FrameId {
            owner: owner as u32,
            slot: slot as u32,
        }
    }

    #[inline(always)]
    pub fn owner(self) -> usize {
        self.owner as usize
    }

    #[inline(always)]
    pub fn slot(self) -> usize {
        self.slot as usize
    }

    /// Packs the id into a single word so it can live in an atomic deque slot.
    #[inline(always)]
    pub fn to_bits(self) -> u64 {
        ((self.owner as u64) << 32) | self.slot as u64
    }

    #[inline(always)]
    pub fn from_bits(bits: u64) -> Self {
        FrameId {
            owner: (bits >> 32) as u32,
            slot: bits as u32,
        }
    }
}

/// One suspended step of the recursive search.
pub struct Frame<S> {
    /// State with the smaller weight.
    pub low: Arc<S>,
    pub high: Arc<S>,
    /// Next candidate to try when the frame is resumed.
    pub cursor: usize,
    /// Non-owning back reference, only followed once this frame is freed.
    pub parent: Option<FrameId>,
}

impl<S> Frame<S> {
    pub fn new(low: Arc<S>, high: Arc<S>, cursor: usize) -> Self {
        Frame {
            low,
            high,
            cursor,
            parent: None,
        }
    }
}

/// Storage for a single frame inside a pool.
pub(crate) struct FrameSlot<S> {
    /// 1 for the frame itself plus one per live child.
    ref_count: AtomicUsize,
    #[cfg(debug_assertions)]
    evaluating: AtomicBool,
    frame: UnsafeCell<Option<Frame<S>>>,
}

// Access to `frame` is serialized by the deque hand-off and the reference count.
unsafe impl<S: Send + Sync> Sync for FrameSlot<S> {}

impl<S> FrameSlot<S> {
    pub(crate) fn empty() -> Self {
        FrameSlot {
            ref_count: AtomicUsize::new(0),
            #[cfg(debug_assertions)]
            evaluating: AtomicBool::new(false),
            frame: UnsafeCell::new(None),
        }
    }

    /// Places a freshly allocated frame into the slot.
    ///
    /// # Safety
    /// The slot must have just been marked in use by the calling thread and not yet been handed out.
    pub(crate) unsafe fn occupy(&self, frame: Frame<S>) {
        self.ref_count.store(1, Ordering::Relaxed);
        unsafe { *self.frame.get() = Some(frame) };
    }
}

/// Marks a frame as being evaluated for as long as it is alive (debug builds only).
pub struct EvalGuard<'a> {
    #[cfg(debug_assertions)]
    flag: &'a AtomicBool,
    _marker: PhantomData<&'a ()>,
}

impl Drop for EvalGuard<'_> {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        self.flag.store(false, Ordering::Release);
    }
}

/// What a single `release` call did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Released {
    /// Frames returned to their pools.
    pub freed: usize,
    /// Reference counts decremented, the caller's own reference included.
    pub decrements: usize,
}

/// The frame pools of all workers. Frames may reference parents living in any pool.
pub struct FrameArena<S> {
    pools: Box<[FramePool<S>]>,
}

impl<S: Send + Sync> FrameArena<S> {
    pub fn new(num_pools: usize, slots_per_pool: usize) -> Self {
        FrameArena {
            pools: (0..num_pools)
                .map(|owner| FramePool::new(owner, slots_per_pool))
                .collect(),
        }
    }

    #[inline(always)]
    pub fn pool(&self, owner: usize) -> &FramePool<S> {
        &self.pools[owner]
    }

    pub fn pools(&self) -> &[FramePool<S>] {
        &self.pools
    }

    #[inline(always)]
    fn slot(&self, id: FrameId) -> &FrameSlot<S> {
        self.pools[id.owner()].slot(id.slot())
    }

    /// Allocates a frame in `owner`'s pool with a reference count of 1.
    pub fn allocate(&self, owner: usize, frame: Frame<S>) -> Result<FrameId, PoolError> {
        self.pools[owner].allocate(frame)
    }

    /// Links a freshly allocated `child` to `parent` and accounts for it in the parent's count.
    ///
    /// # Safety
    /// `child` must not have been published to any other thread yet and `parent` must be live.
    pub unsafe fn add_child(&self, parent: FrameId, child: FrameId) {
        let child_slot = self.slot(child);
        child_slot.ref_count.store(1, Ordering::Relaxed);
        if let Some(frame) = unsafe { (*child_slot.frame.get()).as_mut() } {
            frame.parent = Some(parent);
        }

        // The decrement in `release` is the synchronization point.
        self.slot(parent).ref_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Gives up one reference to `id`. A frame whose count drops to zero is returned to its
    /// owning pool and its parent loses a reference in turn.
    ///
    /// # Safety
    /// The caller must hold one of the references counted for `id` and must not use it afterwards.
    pub unsafe fn release(&self, id: FrameId) -> Released {
        let mut released = Released::default();
        let mut current = Some(id);

        while let Some(id) = current {
            let slot = self.slot(id);
            released.decrements += 1;
            if slot.ref_count.fetch_sub(1, Ordering::AcqRel) != 1 {
                break;
            }

            // SAFETY: the count reached zero, so nobody else can reach this frame anymore.
            let frame = unsafe { (*slot.frame.get()).take() };
            debug_assert!(frame.is_some(), "frame {:?} released twice", id);
            self.pools[id.owner()].free(id.slot());
            released.freed += 1;

            current = frame.and_then(|f| f.parent);
        }

        released
    }

    /// Exclusive access to a frame's contents.
    ///
    /// # Safety
    /// The caller must own the frame: it was just allocated, popped or stolen by this thread
    /// and has not been published again.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn frame_mut(&self, id: FrameId) -> &mut Frame<S> {
        let frame = unsafe { &mut *self.slot(id).frame.get() };
        match frame {
            Some(frame) => frame,
            None => panic!("access to freed frame {:?}", id),
        }
    }

    /// Flags `id` as under evaluation until the guard is dropped.
    /// Panics in debug builds if another thread is already evaluating it.
    pub fn enter(&self, id: FrameId) -> EvalGuard<'_> {
        #[cfg(debug_assertions)]
        {
            let flag = &self.slot(id).evaluating;
            let already = flag.swap(true, Ordering::Acquire);
            assert!(!already, "frame {:?} is evaluated concurrently", id);
            EvalGuard {
                flag,
                _marker: PhantomData,
            }
        }

        #[cfg(not(debug_assertions))]
        {
            let _ = id;
            EvalGuard {
                _marker: PhantomData,
            }
        }
    }

    /// Current reference count of a frame. Only meaningful while nothing else touches it.
    pub fn ref_count(&self, id: FrameId) -> usize {
        self.slot(id).ref_count.load(Ordering::Acquire)
    }

    /// Number of frames currently allocated across all pools.
    pub fn live(&self) -> usize {
        self.pools.iter().map(|pool| pool.live()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(value: u32) -> Frame<u32> {
        Frame::new(Arc::new(value), Arc::new(value), 0)
    }

    #[test]
    fn test_frame_id_bits() {
        let cases = [(0, 0), (1, 511), (15, 3), (u32::MAX as usize, u32::MAX as usize)];

        for (owner, slot) in cases {
            let id = FrameId::new(owner, slot);
            let decoded = FrameId::from_bits(id.to_bits());
            assert_eq!(decoded, id, "Packing ({}, {})", owner, slot);
            assert_eq!(decoded.owner(), owner);
            assert_eq!(decoded.slot(), slot);
        }
    }

    #[test]
    fn test_release_without_children_frees() {
        let arena = FrameArena::new(1, 8);
        let id = arena.allocate(0, frame(1)).unwrap();
        assert_eq!(arena.ref_count(id), 1);
        assert_eq!(arena.live(), 1);

        assert_eq!(unsafe { arena.release(id) }.freed, 1);
        assert_eq!(arena.live(), 0);
    }

    #[test]
    fn test_parent_outlives_children() {
        let arena = FrameArena::new(2, 8);
        let root = arena.allocate(0, frame(0)).unwrap();

        let first = arena.allocate(1, frame(1)).unwrap();
        unsafe { arena.add_child(root, first) };
        let second = arena.allocate(0, frame(2)).unwrap();
        unsafe { arena.add_child(root, second) };
        assert_eq!(arena.ref_count(root), 3);

        // K children => K + 1 releases before the parent disappears
        let released = unsafe { arena.release(root) };
        assert_eq!(released, Released { freed: 0, decrements: 1 });
        let released = unsafe { arena.release(first) };
        assert_eq!(released, Released { freed: 1, decrements: 2 });
        assert_eq!(arena.live(), 2);
        assert_eq!(arena.ref_count(root), 1);

        // Last child takes its parent with it
        let released = unsafe { arena.release(second) };
        assert_eq!(released, Released { freed: 2, decrements: 2 });
        assert_eq!(arena.live(), 0);
        assert_eq!(arena.pool(0).counters(), (2, 2));
        assert_eq!(arena.pool(1).counters(), (1, 1));
    }

    #[test]
    fn test_release_collapses_chain() {
        let arena = FrameArena::new(1, 16);
        let mut ids = vec![arena.allocate(0, frame(0)).unwrap()];
        for value in 1..10 {
            let child = arena.allocate(0, frame(value)).unwrap();
            unsafe { arena.add_child(*ids.last().unwrap(), child) };
            ids.push(child);
        }

        // Every frame drops its self reference, the leaf goes last.
        for &id in &ids[..ids.len() - 1] {
            assert_eq!(unsafe { arena.release(id) }.freed, 0);
        }
        let released = unsafe { arena.release(*ids.last().unwrap()) };
        assert_eq!(released.freed, ids.len());
        assert_eq!(released.decrements, ids.len());
        assert_eq!(arena.live(), 0);
    }

    #[test]
    fn test_concurrent_child_releases() {
        let arena = FrameArena::new(4, 256);
        let root = arena.allocate(0, frame(0)).unwrap();

        std::thread::scope(|s| {
            for owner in 0..4 {
                let arena = &arena;
                s.spawn(move || {
                    for value in 0..200 {
                        let child = arena.allocate(owner, frame(value)).unwrap();
                        unsafe {
                            arena.add_child(root, child);
                            arena.release(child);
                        }
                    }
                });
            }
        });

        assert_eq!(arena.live(), 1);
        assert_eq!(arena.ref_count(root), 1);
        assert_eq!(unsafe { arena.release(root) }.freed, 1);
        assert_eq!(arena.live(), 0);
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "evaluated concurrently")]
    fn test_reentrant_evaluation_panics() {
        let arena = FrameArena::new(1, 4);
        let id = arena.allocate(0, frame(7)).unwrap();
        let _first = arena.enter(id);
        let _second = arena.enter(id);
    }

    #[test]
    fn test_eval_guard_resets() {
        let arena = FrameArena::new(1, 4);
        let id = arena.allocate(0, frame(7)).unwrap();
        drop(arena.enter(id));
        drop(arena.enter(id));
    }
}
