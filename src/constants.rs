use std::time::Duration;

/// Minimal runtime after which to show a progress bar instead of simple log messages.
pub const PROGRESS_BAR_THRESHOLD: Duration = Duration::from_millis(500);

/// Default number of frame slots per worker. Used for both the frame pool and the deque.
pub const FRAME_SLOTS: usize = 512;

/// Largest supported element bound `d` of a sumset problem.
pub const MAX_D: usize = 50;

/// Number of representable subset sums. Sums `>= SUMSET_CAPACITY` are dropped.
pub const SUMSET_CAPACITY: usize = 4096;

/// Number of 64-bit words backing a sumset bitset.
pub const SUMSET_WORDS: usize = SUMSET_CAPACITY / 64;
