use std::{
    error::Error,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use indicatif_log_bridge::LogWrapper;
use log::info;
use sumset::{constants::PROGRESS_BAR_THRESHOLD, utils::human_duration};

pub mod generate;
pub mod solve;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumWorkerThreads {
    /// Use whatever the problem file asks for.
    FromInput,
    Num(usize),
}

pub fn parse_num_worker_threads(s: &str) -> Result<NumWorkerThreads, String> {
    if s == "auto" {
        let n = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Ok(NumWorkerThreads::Num(n))
    } else if s == "input" {
        Ok(NumWorkerThreads::FromInput)
    } else {
        s.parse::<usize>()
            .map(NumWorkerThreads::Num)
            .map_err(|_| format!("Invalid value for --threads: {}", s))
    }
}

/// Routes `log` output through the returned progress bars so they don't tear each other apart.
pub fn init_logging() -> MultiProgress {
    let logger =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).build();
    let level = logger.filter();

    let progress = MultiProgress::new();
    if LogWrapper::new(progress.clone(), logger).try_init().is_ok() {
        log::set_max_level(level);
    }
    progress
}

/// Collects the files to solve. Directories are expanded to their files in sorted order.
/// The queue is returned reversed, so popping yields the files in order.
pub fn get_problem_input_queue(
    path: &Path,
    limit: Option<usize>,
) -> Result<Vec<PathBuf>, Box<dyn Error>> {
    let mut queue = if path.is_dir() {
        let mut entries: Vec<PathBuf> = fs::read_dir(path)?
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| p.is_file())
            .collect();
        entries.sort();
        info!("Found {} problem file(s) in {:?}", entries.len(), path);
        entries
    } else if path.is_file() {
        vec![path.to_path_buf()]
    } else {
        return Err(format!("Path {:?} is not a file or directory", path).into());
    };

    if let Some(limit) = limit {
        queue.truncate(limit);
    }
    queue.reverse();
    Ok(queue)
}

pub fn should_use_progress_bar(remaining: usize, first_duration: Duration) -> bool {
    first_duration.saturating_mul(remaining as u32) > PROGRESS_BAR_THRESHOLD
}

pub fn create_progress_bar(progress: &MultiProgress, total: usize) -> ProgressBar {
    let pb = progress.add(ProgressBar::new(total as u64 + 1));
    let style = ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} ({eta})",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("#>-");
    pb.set_style(style);
    pb
}

/// Aggregated statistics for a run over one or more files.
#[derive(Default)]
pub struct Stats {
    pub processed: usize,
    pub errors: usize,
    pub found: usize,
    pub empty: usize,
    pub verified_count: usize,
    pub failed_verifications: usize,
    pub best_sum: usize,
    pub parse_durations: Vec<Duration>,
    pub solve_durations: Vec<Duration>,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn print_summary(&self) {
        info!(
            "Processed {} file(s): {} with a solution, {} without, {} error(s)",
            self.processed, self.found, self.empty, self.errors
        );
        if self.verified_count + self.failed_verifications > 0 {
            info!(
                "Verified {} solution(s), {} failed verification",
                self.verified_count, self.failed_verifications
            );
        }
        if self.processed > 1 {
            info!("Largest sum found: {}", self.best_sum);
        }

        for (label, durations) in [
            ("parse", &self.parse_durations),
            ("solve", &self.solve_durations),
        ] {
            if let Some(summary) = summarize_durations(durations) {
                info!("{} times: {}", label, summary);
            }
        }
    }
}

fn summarize_durations(durations: &[Duration]) -> Option<String> {
    if durations.is_empty() {
        return None;
    }

    let mut sorted = durations.to_vec();
    sorted.sort();
    let total: Duration = sorted.iter().sum();
    let avg = total / sorted.len() as u32;
    let median = if sorted.len() % 2 == 1 {
        sorted[sorted.len() / 2]
    } else {
        let hi = sorted.len() / 2;
        (sorted[hi - 1] + sorted[hi]) / 2
    };

    Some(format!(
        "total {}, avg {}, min {}, median {}, max {}",
        human_duration(total),
        human_duration(avg),
        human_duration(sorted[0]),
        human_duration(median),
        human_duration(sorted[sorted.len() - 1]),
    ))
}
