use std::{error::Error, io::Read};

use sumset::{parser::parse_problem, solve};

/// Reads one problem from stdin and prints the best solution, nothing else.
pub fn main() -> Result<(), Box<dyn Error>> {
    let mut data = Vec::new();
    std::io::stdin()
        .read_to_end(&mut data)
        .map_err(|e| format!("Failed to read from stdin: {}", e))?;

    let problem = parse_problem(&data).map_err(|e| format!("Failed to parse input: {}", e))?;

    let threads = problem.threads;
    let (a, b) = problem.roots();
    let solution = solve(problem, threads, a, b)?;

    println!("{}", solution);
    Ok(())
}
