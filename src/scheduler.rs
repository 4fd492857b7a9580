use std::{
    io,
    num::NonZeroUsize,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
    thread,
    time::Instant,
};

use crossbeam_utils::CachePadded;
use log::info;
use thiserror::Error;

use crate::{
    constants::FRAME_SLOTS,
    deque::{DequeFull, FrameDeque},
    frame::{Frame, FrameArena},
    pool::PoolError,
    search::{SearchDomain, Solution},
    utils::human_duration,
    worker::{
        Worker,
        stats::{WorkerStats, WorkerStatsSnapshot},
    },
};

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error(transparent)]
    Deque(#[from] DequeFull),
    #[error("worker {worker} ran out of frame capacity with {stalled} frame(s) stalled")]
    CapacityExhausted { worker: usize, stalled: usize },
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] io::Error),
    #[error("worker {0} panicked")]
    WorkerPanicked(usize),
    #[error("the search has already been run")]
    AlreadyRun,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub num_workers: NonZeroUsize,
    /// Slots of every worker's frame pool and deque.
    pub frame_slots: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            num_workers: thread::available_parallelism().unwrap_or(NonZeroUsize::MIN),
            frame_slots: FRAME_SLOTS,
        }
    }
}

impl SchedulerConfig {
    /// `num_workers` is clamped to at least one.
    pub fn with_workers(num_workers: usize) -> Self {
        SchedulerConfig {
            num_workers: NonZeroUsize::new(num_workers).unwrap_or(NonZeroUsize::MIN),
            ..Default::default()
        }
    }

    pub fn frame_slots(mut self, frame_slots: usize) -> Self {
        self.frame_slots = frame_slots;
        self
    }

    /// A frame needs room for itself and one child, and deques index with a mask.
    fn effective_slots(&self) -> usize {
        self.frame_slots.max(2).next_power_of_two()
    }
}

/// Everything the workers share. Borrowed by every worker for the duration of a run.
pub struct SharedContext<D: SearchDomain> {
    pub(crate) domain: D,
    pub(crate) arena: FrameArena<D::State>,
    pub(crate) deques: Box<[FrameDeque]>,
    pub(crate) stats: Box<[CachePadded<WorkerStats>]>,
    /// Workers that are neither waiting for capacity nor done.
    pub(crate) busy_workers: AtomicUsize,
    /// Bumped whenever a waiting worker picks work up again.
    pub(crate) progress: AtomicU64,
    pub(crate) aborted: AtomicBool,
}

impl<D: SearchDomain> SharedContext<D> {
    #[inline(always)]
    pub fn num_workers(&self) -> usize {
        self.deques.len()
    }
}

pub struct Scheduler<D: SearchDomain> {
    ctx: SharedContext<D>,
    best: D::Solution,
    finished: bool,
}

impl<D: SearchDomain> Scheduler<D> {
    /// Sets up one pool, deque and stats block per worker and seeds the root frame into the
    /// first worker's deque. The root pair is ordered by weight.
    pub fn initialize(
        domain: D,
        config: SchedulerConfig,
        root_low: Arc<D::State>,
        root_high: Arc<D::State>,
    ) -> Result<Self, SchedulerError> {
        let num_workers = config.num_workers.get();
        let slots = config.effective_slots();

        let ctx = SharedContext {
            arena: FrameArena::new(num_workers, slots),
            deques: (0..num_workers).map(|_| FrameDeque::new(slots)).collect(),
            stats: (0..num_workers)
                .map(|_| CachePadded::new(WorkerStats::default()))
                .collect(),
            busy_workers: AtomicUsize::new(0),
            progress: AtomicU64::new(0),
            aborted: AtomicBool::new(false),
            domain,
        };

        let (low, high) = ctx.domain.ordered(root_low, root_high);
        let cursor = ctx.domain.first_candidate(&low);
        let root = ctx.arena.allocate(0, Frame::new(low, high, cursor))?;
        ctx.deques[0].push(root)?;

        info!(
            "Initialized scheduler with {} worker thread(s) and {} frame slots per worker.",
            num_workers, slots
        );

        Ok(Scheduler {
            ctx,
            best: D::Solution::default(),
            finished: false,
        })
    }

    /// Runs all workers to completion and reduces their results. Can only be called once.
    pub fn run(&mut self) -> Result<&D::Solution, SchedulerError> {
        if self.finished {
            return Err(SchedulerError::AlreadyRun);
        }
        self.finished = true;

        let num_workers = self.ctx.num_workers();
        let ctx = &self.ctx;
        ctx.busy_workers.store(num_workers, Ordering::SeqCst);

        let start = Instant::now();
        let bests = thread::scope(|s| -> Result<Vec<D::Solution>, SchedulerError> {
            let mut handles = Vec::with_capacity(num_workers);
            for id in 0..num_workers {
                let spawned = thread::Builder::new()
                    .name(format!("worker-{}", id))
                    .spawn_scoped(s, move || Worker::new(id, ctx).run());
                match spawned {
                    Ok(handle) => handles.push(handle),
                    Err(err) => {
                        // Workers already running must not wait for the missing one
                        ctx.aborted.store(true, Ordering::SeqCst);
                        return Err(err.into());
                    }
                }
            }

            // Join everyone before looking at the results
            let joined: Vec<_> = handles.into_iter().map(|handle| handle.join()).collect();
            joined
                .into_iter()
                .enumerate()
                .map(|(id, result)| {
                    result
                        .map_err(|_| SchedulerError::WorkerPanicked(id))
                        .and_then(|best| best)
                })
                .collect()
        })?;

        self.best = reduce(bests);
        info!(
            "Search finished in {} with best score {}.",
            human_duration(start.elapsed()),
            self.best.score()
        );

        Ok(&self.best)
    }

    /// Best solution found by `run`, or the default solution before that.
    pub fn best_solution(&self) -> &D::Solution {
        &self.best
    }

    pub fn into_best_solution(self) -> D::Solution {
        self.best
    }

    pub fn domain(&self) -> &D {
        &self.ctx.domain
    }

    pub fn num_workers(&self) -> usize {
        self.ctx.num_workers()
    }

    /// Frames currently allocated across all pools. Zero after a completed run.
    pub fn live_frames(&self) -> usize {
        self.ctx.arena.live()
    }

    pub fn stats(&self) -> Vec<WorkerStatsSnapshot> {
        self.ctx
            .stats
            .iter()
            .zip(self.ctx.arena.pools())
            .map(|(stats, pool)| {
                let (allocated, freed) = pool.counters();
                WorkerStatsSnapshot {
                    allocated,
                    freed,
                    ..stats.snapshot()
                }
            })
            .collect()
    }
}

/// Highest score wins, ties go to the lowest worker id.
fn reduce<S: Solution>(bests: Vec<S>) -> S {
    let mut bests = bests.into_iter();
    let mut best = bests.next().unwrap_or_default();
    for candidate in bests {
        if candidate.score() > best.score() {
            best = candidate;
        }
    }
    best
}
