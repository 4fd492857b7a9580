use std::sync::{
    Arc,
    atomic::{self, AtomicBool, Ordering},
};

use fastrand::Rng;
use log::{debug, error, trace, warn};

use crate::{
    deque::{FrameDeque, Steal},
    frame::{Frame, FrameId},
    pool::PoolError,
    scheduler::{SchedulerError, SharedContext},
    search::{SearchDomain, Solution},
    utils::Backoff,
    worker::stats::WorkerStats,
};

pub mod stats;

/// Result of evaluating one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// A child was allocated; both it and the frame itself must be pushed.
    Expanded(FrameId),
    /// The frame was released.
    Done,
    /// No room to expand right now. The frame is untouched and still owned by the worker.
    Stalled,
}

/// Sets the shared abort flag if a worker unwinds, so stalled peers stop waiting for it.
struct AbortOnUnwind<'a>(&'a AtomicBool);

impl Drop for AbortOnUnwind<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.store(true, Ordering::SeqCst);
        }
    }
}

pub struct Worker<'s, D: SearchDomain> {
    id: usize,
    ctx: &'s SharedContext<D>,
    peers: Vec<usize>,
    rng: Rng,
    best: D::Solution,
    /// Frames that could not be expanded for lack of capacity, oldest first.
    stalled: Vec<FrameId>,
    warned_stall: bool,
}

impl<'s, D: SearchDomain> Worker<'s, D> {
    pub fn new(id: usize, ctx: &'s SharedContext<D>) -> Self {
        Worker {
            id,
            ctx,
            peers: (0..ctx.num_workers()).filter(|&peer| peer != id).collect(),
            rng: Rng::new(),
            best: D::Solution::default(),
            stalled: Vec::new(),
            warned_stall: false,
        }
    }

    /// Processes frames until a full sweep over all deques comes up empty.
    /// Returns the best solution this worker recorded.
    pub fn run(mut self) -> Result<D::Solution, SchedulerError> {
        let _abort = AbortOnUnwind(&self.ctx.aborted);

        if let Err(err) = self.explore() {
            self.ctx.aborted.store(true, Ordering::SeqCst);
            return Err(err);
        }

        debug!(
            "Worker {} finished with best score {}.",
            self.id,
            self.best.score()
        );
        Ok(self.best)
    }

    fn explore(&mut self) -> Result<(), SchedulerError> {
        while let Some(id) = self.fetch()? {
            match self.evaluate(id) {
                Outcome::Expanded(child) => {
                    // The parent goes on top so this worker keeps enumerating its siblings
                    self.push(child)?;
                    self.push(id)?;
                }
                Outcome::Done => {}
                Outcome::Stalled => self.stall(id),
            }
        }

        self.ctx.busy_workers.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    #[inline(always)]
    fn stats(&self) -> &'s WorkerStats {
        &self.ctx.stats[self.id]
    }

    #[inline(always)]
    fn deque(&self) -> &'s FrameDeque {
        &self.ctx.deques[self.id]
    }

    fn fetch(&mut self) -> Result<Option<FrameId>, SchedulerError> {
        if let Some(id) = self.pop_local() {
            return Ok(Some(id));
        }
        if let Some(id) = self.steal_from_peers() {
            return Ok(Some(id));
        }
        if self.stalled.is_empty() {
            return Ok(None);
        }

        self.wait_for_capacity().map(Some)
    }

    fn pop_local(&self) -> Option<FrameId> {
        let id = self.deque().pop()?;
        WorkerStats::bump(&self.stats().pops);
        Some(id)
    }

    fn push(&self, id: FrameId) -> Result<(), SchedulerError> {
        self.deque().push(id)?;
        WorkerStats::bump(&self.stats().pushes);
        Ok(())
    }

    /// One steal attempt against every peer, in random order.
    fn steal_from_peers(&mut self) -> Option<FrameId> {
        self.rng.shuffle(&mut self.peers);

        for &peer in &self.peers {
            match self.ctx.deques[peer].steal() {
                Steal::Success(id) => {
                    WorkerStats::bump(&self.stats().steals);
                    WorkerStats::bump(&self.ctx.stats[peer].stolen_from);
                    trace!("Worker {} stole {:?} from worker {}", self.id, id, peer);
                    return Some(id);
                }
                Steal::Retry => WorkerStats::bump(&self.stats().lost_races),
                Steal::Empty => {}
            }
        }

        None
    }

    /// Whether a child can be allocated and both frames pushed without running out of room.
    fn can_expand(&self) -> bool {
        let deque = self.deque();
        deque.capacity() - deque.len() >= 2 && self.ctx.arena.pool(self.id).has_free_slot()
    }

    pub fn evaluate(&mut self, id: FrameId) -> Outcome {
        let ctx = self.ctx;
        let domain = &ctx.domain;

        let guard = ctx.arena.enter(id);
        // SAFETY: the frame was popped or stolen by this worker and is not published anywhere.
        let frame = unsafe { ctx.arena.frame_mut(id) };
        WorkerStats::bump(&self.stats().evaluations);

        if !domain.is_trivial_pair(&frame.low, &frame.high) {
            if domain.is_admissible_solution(&frame.low, &frame.high)
                && domain.objective(&frame.low, &frame.high) > self.best.score()
            {
                self.best = domain.build_solution(&frame.low, &frame.high);
                WorkerStats::bump(&self.stats().solutions);
            }

            drop(guard);
            self.release(id);
            return Outcome::Done;
        }

        let max = domain.max_candidate();
        while frame.cursor <= max && domain.contains(&frame.high, frame.cursor) {
            frame.cursor += 1;
        }
        if frame.cursor > max {
            drop(guard);
            self.release(id);
            return Outcome::Done;
        }

        let deque = self.deque();
        if deque.capacity() - deque.len() < 2 {
            return Outcome::Stalled;
        }

        let extended = Arc::new(domain.with_candidate_added(&frame.low, frame.cursor));
        let (low, high) = domain.ordered(extended, frame.high.clone());
        let cursor = domain.first_candidate(&low);

        let child = match ctx.arena.allocate(self.id, Frame::new(low, high, cursor)) {
            Ok(child) => child,
            Err(PoolError::Exhausted { .. }) => return Outcome::Stalled,
        };
        // SAFETY: `child` is fresh and `id` is held by this worker.
        unsafe { ctx.arena.add_child(id, child) };
        frame.cursor += 1;

        drop(guard);
        Outcome::Expanded(child)
    }

    fn release(&self, id: FrameId) {
        // SAFETY: the worker holds the frame's own reference and drops it here.
        let released = unsafe { self.ctx.arena.release(id) };
        let stats = self.stats();
        WorkerStats::bump(&stats.releases);
        stats
            .ref_drops
            .fetch_add(released.decrements as u64, Ordering::Relaxed);
        stats
            .frees
            .fetch_add(released.freed as u64, Ordering::Relaxed);
    }

    fn stall(&mut self, id: FrameId) {
        self.stalled.push(id);
        let stats = self.stats();
        WorkerStats::bump(&stats.stalls);
        stats
            .stalled_frames
            .store(self.stalled.len() as u64, Ordering::SeqCst);

        if !self.warned_stall {
            warn!(
                "Worker {} ran out of frame capacity, parking frames until slots free up.",
                self.id
            );
            self.warned_stall = true;
        } else {
            trace!("Worker {} parked {:?}", self.id, id);
        }
    }

    /// Hands back the most recently stalled frame if it can be expanded now.
    fn retry_stalled(&mut self) -> Option<FrameId> {
        if !self.can_expand() {
            return None;
        }

        let id = self.stalled.pop()?;
        self.stats()
            .stalled_frames
            .store(self.stalled.len() as u64, Ordering::SeqCst);
        Some(id)
    }

    /// Called when only stalled frames are left. Waits until one of them can be retried or a
    /// peer has work to steal, and gives up once no worker can ever free a slot again.
    fn wait_for_capacity(&mut self) -> Result<FrameId, SchedulerError> {
        if let Some(id) = self.retry_stalled() {
            return Ok(id);
        }

        let ctx = self.ctx;
        let mut backoff = Backoff::for_stalled_worker();
        ctx.busy_workers.fetch_sub(1, Ordering::SeqCst);

        loop {
            if ctx.aborted.load(Ordering::SeqCst) {
                return Err(self.exhausted());
            }

            backoff.wait();

            // Count as busy before touching anything others may observe
            ctx.busy_workers.fetch_add(1, Ordering::SeqCst);
            let found = match self.retry_stalled() {
                Some(id) => Some(id),
                None => self.steal_from_peers(),
            };
            if let Some(id) = found {
                ctx.progress.fetch_add(1, Ordering::SeqCst);
                return Ok(id);
            }
            ctx.busy_workers.fetch_sub(1, Ordering::SeqCst);

            if backoff.is_sleeping() && self.is_stuck() {
                ctx.aborted.store(true, Ordering::SeqCst);
                error!(
                    "Worker {} gave up: every frame pool is full and no frame can finish.",
                    self.id
                );
                return Err(self.exhausted());
            }
        }
    }

    /// True if no worker is running, nothing is queued and no stalled frame can be retried.
    /// The progress epoch guards against workers waking up in between the individual checks.
    fn is_stuck(&self) -> bool {
        let ctx = self.ctx;
        let epoch = ctx.progress.load(Ordering::SeqCst);

        if ctx.busy_workers.load(Ordering::SeqCst) != 0 {
            return false;
        }

        atomic::fence(Ordering::SeqCst);
        if !ctx.deques.iter().all(FrameDeque::is_empty) {
            return false;
        }

        let retriable = ctx
            .stats
            .iter()
            .zip(ctx.arena.pools())
            .any(|(stats, pool)| {
                stats.stalled_frames.load(Ordering::SeqCst) > 0 && pool.has_free_slot()
            });
        if retriable {
            return false;
        }

        atomic::fence(Ordering::SeqCst);
        ctx.busy_workers.load(Ordering::SeqCst) == 0 && ctx.progress.load(Ordering::SeqCst) == epoch
    }

    fn exhausted(&self) -> SchedulerError {
        SchedulerError::CapacityExhausted {
            worker: self.id,
            stalled: self.stalled.len(),
        }
    }
}
