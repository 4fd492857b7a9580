use clap::{Parser, Subcommand};
use std::{error::Error, path::PathBuf};
use sumset::constants::FRAME_SLOTS;

use crate::cli::{NumWorkerThreads, parse_num_worker_threads, solve::SolveOptions};

mod cli;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Solve a problem file, or every file in a directory
    Solve {
        #[arg(value_name = "PATH")]
        path: PathBuf,

        /// Number of worker threads: a number, `auto` or `input` (the count in the file)
        #[arg(short, long, default_value = "input", value_parser = parse_num_worker_threads)]
        threads: NumWorkerThreads,

        /// Frame slots per worker, rounded up to a power of two
        #[arg(long, default_value_t = FRAME_SLOTS)]
        frame_slots: usize,

        /// Only solve the first N files of a directory
        #[arg(long)]
        limit: Option<usize>,

        /// Check every solution against its problem
        #[arg(long)]
        verify: bool,

        /// Print per-worker counters after each run
        #[arg(long)]
        stats: bool,

        #[arg(long)]
        no_progress_bar: bool,
    },
    /// Write a random problem to stdout
    Generate {
        #[arg(short, long)]
        d: usize,

        /// Size of the start set A
        #[arg(short, long, default_value_t = 0)]
        n: usize,

        /// Size of the start set B
        #[arg(short, long, default_value_t = 0)]
        m: usize,

        /// Thread count written into the problem
        #[arg(short, long, default_value_t = 8)]
        threads: usize,

        #[arg(long)]
        seed: Option<u64>,
    },
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    match args.command {
        Command::Solve {
            path,
            threads,
            frame_slots,
            limit,
            verify,
            stats,
            no_progress_bar,
        } => cli::solve::solve(
            path,
            SolveOptions {
                limit,
                verify,
                threads,
                frame_slots,
                print_stats: stats,
                no_progress_bar,
            },
        ),
        Command::Generate {
            d,
            n,
            m,
            threads,
            seed,
        } => cli::generate::generate(d, n, m, threads, seed),
    }
}
