use std::{
    error::Error,
    io::{self, BufWriter, Write},
};

use fastrand::Rng;
use sumset::{parser::format_problem, sumset::SumsetProblem};

/// Writes a random problem with bound `d` and start sets of sizes `n` and `m` to stdout.
pub fn generate(
    d: usize,
    n: usize,
    m: usize,
    threads: usize,
    seed: Option<u64>,
) -> Result<(), Box<dyn Error>> {
    let mut rng = match seed {
        Some(seed) => Rng::with_seed(seed),
        None => Rng::new(),
    };

    let problem = random_problem(&mut rng, d, n, m, threads)?;

    let stdout = io::stdout();
    let handle = stdout.lock();
    let mut writer = BufWriter::new(handle);
    write!(writer, "{}", format_problem(&problem))?;
    writer.flush()?;
    Ok(())
}

/// Draws start elements uniformly from `[1, d]`. Fails if the sums would not fit the bitsets.
pub fn random_problem(
    rng: &mut Rng,
    d: usize,
    n: usize,
    m: usize,
    threads: usize,
) -> Result<SumsetProblem, Box<dyn Error>> {
    if d == 0 {
        return Err("d must be at least 1".into());
    }

    let a = (0..n).map(|_| rng.usize(1..=d)).collect();
    let b = (0..m).map(|_| rng.usize(1..=d)).collect();
    Ok(SumsetProblem::new(threads, d, a, b)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_problem_is_valid() {
        let mut rng = Rng::new();
        println!("Seed: {}", rng.get_seed());

        for _ in 0..50 {
            let d = rng.usize(1..=20);
            let problem = random_problem(&mut rng, d, 3, 2, 4).unwrap();
            assert_eq!(problem.a_start.len(), 3);
            assert_eq!(problem.b_start.len(), 2);
            assert!(
                problem
                    .a_start
                    .iter()
                    .chain(&problem.b_start)
                    .all(|&e| (1..=d).contains(&e))
            );
        }
    }

    #[test]
    fn test_seed_is_reproducible() {
        let a = random_problem(&mut Rng::with_seed(7), 10, 4, 4, 1).unwrap();
        let b = random_problem(&mut Rng::with_seed(7), 10, 4, 4, 1).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_rejects_zero_bound() {
        assert!(random_problem(&mut Rng::with_seed(1), 0, 1, 1, 1).is_err());
    }
}
