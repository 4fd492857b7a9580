//! Fixed-capacity Chase-Lev work-stealing deque of frame ids.
//!
//! The owning worker pushes and pops at the bottom without locking; any other worker steals
//! from the top with a single CAS. Slots hold packed [`FrameId`]s in atomics, so a thief reading
//! a slot the owner is concurrently reusing only ever observes a stale id, which its failing
//! CAS then discards.

use std::sync::atomic::{self, AtomicIsize, AtomicU64, Ordering};

use crossbeam_utils::CachePadded;
use thiserror::Error;

use crate::frame::FrameId;

/// Outcome of a steal attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Steal<T> {
    /// The deque was empty.
    Empty,
    Success(T),
    /// Lost a race against the owner or another thief.
    Retry,
}

impl<T> Steal<T> {
    pub fn success(self) -> Option<T> {
        match self {
            Steal::Success(item) => Some(item),
            _ => None,
        }
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("deque is full ({capacity} frames), cannot push frame {frame:?}")]
pub struct DequeFull {
    pub frame: FrameId,
    pub capacity: usize,
}

pub struct FrameDeque {
    /// Index of the oldest entry. Advanced by thieves and by `pop` taking the last entry.
    top: CachePadded<AtomicIsize>,
    /// One past the newest entry. Written by the owner only.
    bottom: CachePadded<AtomicIsize>,
    buffer: Box<[AtomicU64]>,
    mask: usize,
}

impl FrameDeque {
    /// Creates an empty deque; the capacity is rounded up to a power of two.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1).next_power_of_two();
        FrameDeque {
            top: CachePadded::new(AtomicIsize::new(0)),
            bottom: CachePadded::new(AtomicIsize::new(0)),
            buffer: (0..capacity).map(|_| AtomicU64::new(0)).collect(),
            mask: capacity - 1,
        }
    }

    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Number of queued frames. Exact for the owner, an upper bound for everyone else.
    #[inline(always)]
    pub fn len(&self) -> usize {
        let b = self.bottom.load(Ordering::Relaxed);
        let t = self.top.load(Ordering::Relaxed);
        (b - t).max(0) as usize
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline(always)]
    fn slot(&self, idx: isize) -> &AtomicU64 {
        &self.buffer[idx as usize & self.mask]
    }

    /// Pushes a frame at the bottom. Owner only.
    pub fn push(&self, frame: FrameId) -> Result<(), DequeFull> {
        let b = self.bottom.load(Ordering::Relaxed);
        let t = self.top.load(Ordering::Acquire);
        if b - t >= self.capacity() as isize {
            return Err(DequeFull {
                frame,
                capacity: self.capacity(),
            });
        }

        self.slot(b).store(frame.to_bits(), Ordering::Relaxed);
        self.bottom.store(b + 1, Ordering::Release);
        Ok(())
    }

    /// Pops the most recently pushed frame. Owner only.
    pub fn pop(&self) -> Option<FrameId> {
        let b = self.bottom.load(Ordering::Relaxed);
        let t = self.top.load(Ordering::Relaxed);
        if b <= t {
            return None;
        }

        // Reserve the bottom entry before looking at `top` again
        let b = b - 1;
        self.bottom.store(b, Ordering::Relaxed);
        atomic::fence(Ordering::SeqCst);
        let t = self.top.load(Ordering::Relaxed);

        if t > b {
            // A thief took the last entry in the meantime
            self.bottom.store(b + 1, Ordering::Relaxed);
            return None;
        }

        let frame = FrameId::from_bits(self.slot(b).load(Ordering::Relaxed));
        if t < b {
            return Some(frame);
        }

        // Exactly one entry left: thieves may be going for it as well
        let won = self
            .top
            .compare_exchange(t, t + 1, Ordering::SeqCst, Ordering::Relaxed)
            .is_ok();
        self.bottom.store(b + 1, Ordering::Relaxed);
        won.then_some(frame)
    }

    /// Steals the oldest frame. Any thread.
    pub fn steal(&self) -> Steal<FrameId> {
        let t = self.top.load(Ordering::Acquire);
        atomic::fence(Ordering::SeqCst);
        let b = self.bottom.load(Ordering::Acquire);
        if t >= b {
            return Steal::Empty;
        }

        let frame = FrameId::from_bits(self.slot(t).load(Ordering::Relaxed));
        match self
            .top
            .compare_exchange(t, t + 1, Ordering::SeqCst, Ordering::Relaxed)
        {
            Ok(_) => Steal::Success(frame),
            Err(_) => Steal::Retry,
        }
    }
}
