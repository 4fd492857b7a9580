use std::sync::Arc;

/// A solution candidate, totally ordered by its objective score.
/// `Default` is the "nothing found yet" value every worker starts with.
pub trait Solution: Default + Send {
    fn score(&self) -> u64;
}

/// The problem-specific half of a backtracking search over pairs of states.
///
/// The engine only ever looks at a `(low, high)` pair, where `low` is the state
/// with the smaller weight. While a pair is *trivial*, it is expanded by adding
/// candidates `first_candidate(low)..=max_candidate()` to `low`, skipping those
/// that `high` already contains. Non-trivial pairs are leaves that may yield
/// a solution.
pub trait SearchDomain: Sync {
    type State: Send + Sync;
    type Solution: Solution;

    /// Largest candidate index, inclusive.
    fn max_candidate(&self) -> usize;

    /// Total order used to decide which state of a pair is `low`.
    fn weight(&self, state: &Self::State) -> u64;

    /// Cursor position a fresh frame starts from.
    fn first_candidate(&self, low: &Self::State) -> usize;

    /// Whether the pair may still be expanded.
    fn is_trivial_pair(&self, low: &Self::State, high: &Self::State) -> bool;

    fn contains(&self, state: &Self::State, candidate: usize) -> bool;

    fn with_candidate_added(&self, state: &Arc<Self::State>, candidate: usize) -> Self::State;

    fn intersection_size(&self, low: &Self::State, high: &Self::State) -> usize;

    fn is_admissible_solution(&self, low: &Self::State, high: &Self::State) -> bool;

    /// Score `build_solution(low, high)` would have. Override when building is expensive.
    fn objective(&self, low: &Self::State, high: &Self::State) -> u64 {
        self.build_solution(low, high).score()
    }

    fn build_solution(&self, low: &Self::State, high: &Self::State) -> Self::Solution;

    /// Orders a pair so that the first state has the smaller (or equal) weight.
    fn ordered(
        &self,
        a: Arc<Self::State>,
        b: Arc<Self::State>,
    ) -> (Arc<Self::State>, Arc<Self::State>) {
        if self.weight(&a) > self.weight(&b) {
            (b, a)
        } else {
            (a, b)
        }
    }
}

/// Explores the whole search tree on the calling thread, using an explicit stack.
/// Serves as the reference the parallel scheduler is checked against.
pub fn solve_sequential<D: SearchDomain>(
    domain: &D,
    low: Arc<D::State>,
    high: Arc<D::State>,
) -> D::Solution {
    let mut best = D::Solution::default();

    let (low, high) = domain.ordered(low, high);
    let cursor = domain.first_candidate(&low);
    let mut stack = vec![(low, high, cursor)];

    while let Some((low, high, mut cursor)) = stack.pop() {
        if !domain.is_trivial_pair(&low, &high) {
            if domain.is_admissible_solution(&low, &high)
                && domain.objective(&low, &high) > best.score()
            {
                best = domain.build_solution(&low, &high);
            }
            continue;
        }

        while cursor <= domain.max_candidate() && domain.contains(&high, cursor) {
            cursor += 1;
        }
        if cursor > domain.max_candidate() {
            continue;
        }

        let extended = Arc::new(domain.with_candidate_added(&low, cursor));
        let (child_low, child_high) = domain.ordered(extended, high.clone());
        let child_cursor = domain.first_candidate(&child_low);

        // Child on top keeps the stack depth-first.
        stack.push((low, high, cursor + 1));
        stack.push((child_low, child_high, child_cursor));
    }

    best
}
