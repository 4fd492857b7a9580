use comfy_table::{Cell, ContentArrangement, Table};
use num_format::{Locale, ToFormattedString};
use std::{
    iter::Sum,
    ops::Add,
    sync::atomic::{AtomicU64, Ordering},
};

/// Per-worker counters. Written by the owning worker, except `stolen_from` which thieves bump.
#[derive(Default)]
pub struct WorkerStats {
    pub pushes: AtomicU64,
    pub pops: AtomicU64,
    pub steals: AtomicU64,
    pub stolen_from: AtomicU64,
    /// Steal attempts that lost a CAS race.
    pub lost_races: AtomicU64,
    pub evaluations: AtomicU64,
    pub solutions: AtomicU64,
    pub stalls: AtomicU64,
    /// Number of frames currently parked because the worker had no room to expand them.
    pub stalled_frames: AtomicU64,
    pub releases: AtomicU64,
    pub ref_drops: AtomicU64,
    pub frees: AtomicU64,
}

impl WorkerStats {
    #[inline(always)]
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> WorkerStatsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        WorkerStatsSnapshot {
            pushes: load(&self.pushes),
            pops: load(&self.pops),
            steals: load(&self.steals),
            stolen_from: load(&self.stolen_from),
            lost_races: load(&self.lost_races),
            evaluations: load(&self.evaluations),
            solutions: load(&self.solutions),
            stalls: load(&self.stalls),
            releases: load(&self.releases),
            ref_drops: load(&self.ref_drops),
            frees: load(&self.frees),
            allocated: 0,
            freed: 0,
        }
    }
}

/// Plain copy of a worker's counters, plus the allocation counters of its frame pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStatsSnapshot {
    pub pushes: u64,
    pub pops: u64,
    pub steals: u64,
    pub stolen_from: u64,
    pub lost_races: u64,
    pub evaluations: u64,
    pub solutions: u64,
    pub stalls: u64,
    /// `release` calls made by this worker.
    pub releases: u64,
    /// Reference counts decremented by those calls, including parents reached on the way up.
    pub ref_drops: u64,
    /// Frames freed by this worker's releases, in any pool.
    pub frees: u64,
    /// Frames allocated from this worker's pool.
    pub allocated: u64,
    /// Frames returned to this worker's pool, by any worker.
    pub freed: u64,
}

impl Add for WorkerStatsSnapshot {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        WorkerStatsSnapshot {
            pushes: self.pushes + rhs.pushes,
            pops: self.pops + rhs.pops,
            steals: self.steals + rhs.steals,
            stolen_from: self.stolen_from + rhs.stolen_from,
            lost_races: self.lost_races + rhs.lost_races,
            evaluations: self.evaluations + rhs.evaluations,
            solutions: self.solutions + rhs.solutions,
            stalls: self.stalls + rhs.stalls,
            releases: self.releases + rhs.releases,
            ref_drops: self.ref_drops + rhs.ref_drops,
            frees: self.frees + rhs.frees,
            allocated: self.allocated + rhs.allocated,
            freed: self.freed + rhs.freed,
        }
    }
}

impl Sum for WorkerStatsSnapshot {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}

/// Renders one row per worker plus a totals row.
pub fn stats_table(snapshots: &[WorkerStatsSnapshot]) -> Table {
    let fmt = |n: u64| n.to_formatted_string(&Locale::en);

    let mut table = Table::new();
    table
        .load_preset(comfy_table::presets::UTF8_HORIZONTAL_ONLY)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            "ID",
            "Push/Pop",
            "Steal/Stolen",
            "Lost",
            "Evaluated",
            "Solutions",
            "Stalls",
            "Alloc/Freed",
        ]);

    let row = |id: String, s: &WorkerStatsSnapshot| {
        vec![
            Cell::new(id),
            Cell::new(format!("{}/{}", fmt(s.pushes), fmt(s.pops))),
            Cell::new(format!("{}/{}", fmt(s.steals), fmt(s.stolen_from))),
            Cell::new(fmt(s.lost_races)),
            Cell::new(fmt(s.evaluations)),
            Cell::new(fmt(s.solutions)),
            Cell::new(fmt(s.stalls)),
            Cell::new(format!("{}/{}", fmt(s.allocated), fmt(s.freed))),
        ]
    };

    for (id, snapshot) in snapshots.iter().enumerate() {
        table.add_row(row(id.to_string(), snapshot));
    }

    let total: WorkerStatsSnapshot = snapshots.iter().copied().sum();
    table.add_row(row("Σ".to_string(), &total));

    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_sum() {
        let stats = WorkerStats::default();
        WorkerStats::bump(&stats.pushes);
        WorkerStats::bump(&stats.pushes);
        WorkerStats::bump(&stats.steals);

        let a = stats.snapshot();
        let b = WorkerStatsSnapshot {
            pushes: 3,
            allocated: 5,
            ..Default::default()
        };
        let total: WorkerStatsSnapshot = [a, b].into_iter().sum();

        assert_eq!(total.pushes, 5);
        assert_eq!(total.steals, 1);
        assert_eq!(total.allocated, 5);
    }

    #[test]
    fn test_table_has_totals_row() {
        let snapshots = vec![
            WorkerStatsSnapshot {
                evaluations: 1_500,
                ..Default::default()
            },
            WorkerStatsSnapshot {
                evaluations: 2_000,
                ..Default::default()
            },
        ];

        let rendered = stats_table(&snapshots).to_string();
        assert!(rendered.contains("Σ"));
        assert!(rendered.contains("3,500"));
    }
}
