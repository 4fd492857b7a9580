use std::sync::Arc;

pub mod constants;
pub mod deque;
pub mod frame;
pub mod parser;
pub mod pool;
pub mod scheduler;
pub mod search;
pub mod sumset;
pub mod utils;
pub mod worker;

pub use scheduler::{Scheduler, SchedulerConfig, SchedulerError};
pub use search::{SearchDomain, Solution, solve_sequential};

/// Explores the tree rooted at `(low, high)` with `threads` workers and default capacities.
pub fn solve<D: SearchDomain>(
    domain: D,
    threads: usize,
    low: Arc<D::State>,
    high: Arc<D::State>,
) -> Result<D::Solution, SchedulerError> {
    let mut scheduler =
        Scheduler::initialize(domain, SchedulerConfig::with_workers(threads), low, high)?;
    scheduler.run()?;
    Ok(scheduler.into_best_solution())
}
