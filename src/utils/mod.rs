use std::time::Duration;

pub fn human_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs_f64();
    if total_secs < 0.000_001 {
        format!("{:.1}ns", total_secs * 1_000_000_000.0)
    } else if total_secs < 0.001 {
        format!("{:.1}µs", total_secs * 1_000_000.0)
    } else if total_secs < 1.0 {
        format!("{:.1}ms", total_secs * 1000.0)
    } else {
        format!("{:.1}s", total_secs)
    }
}

#[macro_export]
macro_rules! record_time {
    ($durations:expr, $block:block) => {{
        let start = std::time::Instant::now();
        let result = { $block };
        let duration = start.elapsed();
        $durations.push(duration);
        result
    }};
}

#[macro_export]
macro_rules! measure_time {
    ($block:block) => {{
        let start = std::time::Instant::now();
        {
            $block
        };
        let duration = start.elapsed();
        duration
    }};
}

/// A utility that manages a tiered, capped backoff strategy for non-blocking polls.
pub struct Backoff {
    num_spins: usize,
    spin_limit: usize,
    num_yields: usize,
    yield_limit: usize,
    initial_sleep: Duration,
    current_sleep: Duration,
    sleep_limit: Duration,
    sleep_multiplier: f32,
}

/// A tiered backoff strategy for non-blocking polls.
/// The strategy consists of three tiers:
/// 1. Spinning: The thread will spin for a fixed number of iterations.
/// 2. Yielding: The thread will yield to the scheduler for a fixed number of iterations.
/// 3. Sleeping: The thread will sleep for an exponentially increasing duration, capped at a maximum.
impl Backoff {
    pub fn new(
        spin_limit: usize,
        yield_limit: usize,
        initial_sleep: Duration,
        sleep_limit: Duration,
        sleep_multiplier: f32,
    ) -> Self {
        Backoff {
            num_spins: 0,
            spin_limit,
            num_yields: 0,
            yield_limit,
            initial_sleep,
            current_sleep: initial_sleep,
            sleep_limit,
            sleep_multiplier,
        }
    }

    /// Backoff used by workers waiting for frame capacity to free up.
    pub fn for_stalled_worker() -> Self {
        Backoff::new(
            64,
            64,
            Duration::from_micros(10),
            Duration::from_millis(5),
            1.5,
        )
    }

    pub fn wait(&mut self) {
        if self.num_spins < self.spin_limit {
            std::hint::spin_loop();
            self.num_spins += 1;
        } else if self.num_yields < self.yield_limit {
            std::thread::yield_now();
            self.num_yields += 1;
        } else {
            std::thread::sleep(self.current_sleep);

            let next_sleep = self.current_sleep.as_secs_f32() * self.sleep_multiplier;

            self.current_sleep = Duration::from_secs_f32(next_sleep).min(self.sleep_limit);
        }
    }

    /// Whether the spin and yield tiers are used up.
    pub fn is_sleeping(&self) -> bool {
        self.num_spins >= self.spin_limit && self.num_yields >= self.yield_limit
    }

    pub fn reset(&mut self) {
        self.num_spins = 0;
        self.num_yields = 0;
        self.current_sleep = self.initial_sleep;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_human_duration() {
        let cases = [
            (Duration::from_nanos(500), "500.0ns"),
            (Duration::from_micros(15), "15.0µs"),
            (Duration::from_millis(250), "250.0ms"),
            (Duration::from_millis(2500), "2.5s"),
        ];

        for (duration, expected) in cases {
            assert_eq!(human_duration(duration), expected, "Formatting {:?}", duration);
        }
    }

    #[test]
    fn test_backoff_tiers() {
        let mut backoff = Backoff::new(2, 1, Duration::from_micros(1), Duration::from_micros(4), 2.0);
        assert!(!backoff.is_sleeping());

        for _ in 0..3 {
            backoff.wait();
        }
        assert!(backoff.is_sleeping());

        for _ in 0..5 {
            backoff.wait();
        }
        assert_eq!(backoff.current_sleep, Duration::from_micros(4));

        backoff.reset();
        assert!(!backoff.is_sleeping());
        assert_eq!(backoff.current_sleep, Duration::from_micros(1));
    }
}
