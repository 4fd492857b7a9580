use crate::cli::{self, NumWorkerThreads, Stats};
use indicatif::MultiProgress;
use log::{error, info, warn};
use memmap2::Mmap;
use std::{
    error::Error,
    fs::File,
    path::{Path, PathBuf},
    time::Instant,
};
use sumset::{
    Scheduler, SchedulerConfig, Solution, measure_time, parser::parse_problem, record_time,
    sumset::SumsetSolution, utils::human_duration, worker::stats::stats_table,
};

pub struct SolveOptions {
    pub limit: Option<usize>,
    pub verify: bool,
    pub threads: NumWorkerThreads,
    pub frame_slots: usize,
    pub print_stats: bool,
    pub no_progress_bar: bool,
}

pub fn solve(path: PathBuf, options: SolveOptions) -> Result<(), Box<dyn Error>> {
    let progress = cli::init_logging();

    let start = Instant::now();
    let mut stats = Stats::new();
    let mut queue = cli::get_problem_input_queue(&path, options.limit)?;

    // Process the first file to estimate the remaining runtime
    let first_file = if let Some(f) = queue.pop() {
        f
    } else {
        warn!("No problem files found in {:?}", path);
        return Ok(());
    };
    let first_duration = measure_time!({
        solve_file(&first_file, &options, &progress, &mut stats).map_err(|e| {
            error!("Error while solving {:?}: {}", first_file, e);
            e
        })?
    });

    if !queue.is_empty() {
        // Create a progress bar if the remaining time is significant enough
        let pb = if !options.no_progress_bar
            && cli::should_use_progress_bar(queue.len(), first_duration)
        {
            let pb = cli::create_progress_bar(&progress, queue.len());
            pb.set_position(1); // Account for the first file we just solved
            Some(pb)
        } else {
            None
        };

        // Process the remaining files in order
        while let Some(path) = queue.pop() {
            if let Err(e) = solve_file(&path, &options, &progress, &mut stats) {
                stats.errors += 1;
                error!("Error while solving {:?}: {}", path, e);
            }
            if let Some(pb) = &pb {
                pb.inc(1);
            }
        }
        if let Some(pb) = &pb {
            pb.finish_with_message("done");
        }
    }

    stats.print_summary();
    info!("Total runtime: {}", human_duration(start.elapsed()));

    Ok(())
}

/// Solves a single problem file, updating stats and optionally verifying the solution.
fn solve_file(
    path: &Path,
    options: &SolveOptions,
    progress: &MultiProgress,
    stats: &mut Stats,
) -> Result<SumsetSolution, Box<dyn Error>> {
    info!("Solving {:?}", path);
    stats.processed += 1;

    // Parse the problem
    let problem = {
        let file = File::open(path)?;
        // SAFETY: mapping a file is safe as long as the file isn't modified concurrently.
        let mmap = unsafe { Mmap::map(&file)? };

        record_time!(stats.parse_durations, { parse_problem(&mmap)? })
    };

    let threads = match options.threads {
        NumWorkerThreads::FromInput => problem.threads,
        NumWorkerThreads::Num(n) => n,
    };
    let config = SchedulerConfig::with_workers(threads).frame_slots(options.frame_slots);
    let (a, b) = problem.roots();

    // Solve the problem
    let mut scheduler = Scheduler::initialize(problem, config, a, b)?;
    let solution = record_time!(stats.solve_durations, { scheduler.run()?.clone() });

    if options.print_stats {
        info!("Worker statistics:\n{}", stats_table(&scheduler.stats()));
    }

    if solution.score() == 0 {
        stats.empty += 1;
        info!("No admissible pair exists");
    } else {
        stats.found += 1;
        stats.best_sum = stats.best_sum.max(solution.sum);

        if options.verify {
            match solution.verify(scheduler.domain()) {
                Ok(()) => stats.verified_count += 1,
                Err(e) => {
                    warn!("Solution verification failed: {}", e);
                    stats.failed_verifications += 1;
                }
            }
        }
    }

    progress.suspend(|| println!("{}", solution));
    Ok(solution)
}
