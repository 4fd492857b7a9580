use std::{fmt, sync::Arc};

use itertools::Itertools;
use thiserror::Error;

use crate::{
    constants::{MAX_D, SUMSET_CAPACITY, SUMSET_WORDS},
    parser::InputError,
    search::{SearchDomain, Solution},
};

/// Set of subset sums `< SUMSET_CAPACITY`, one bit per value.
#[derive(Clone, PartialEq, Eq)]
pub struct SumBits([u64; SUMSET_WORDS]);

impl SumBits {
    /// The subset sums of the empty multiset, i.e. `{0}`.
    pub fn zero() -> Self {
        let mut words = [0u64; SUMSET_WORDS];
        words[0] = 1;
        SumBits(words)
    }

    #[inline(always)]
    pub fn contains(&self, value: usize) -> bool {
        value < SUMSET_CAPACITY && self.0[value / 64] & (1 << (value % 64)) != 0
    }

    /// `self ∪ (self + shift)`: the subset sums after adding an element of size `shift`.
    /// Values pushed past the capacity are dropped.
    pub fn with_shifted(&self, shift: usize) -> Self {
        let word_shift = shift / 64;
        let bit_shift = shift % 64;

        let mut words = self.0;
        for (dst, word) in words.iter_mut().enumerate().skip(word_shift) {
            let src = dst - word_shift;
            let mut shifted = self.0[src] << bit_shift;
            if bit_shift > 0 && src > 0 {
                shifted |= self.0[src - 1] >> (64 - bit_shift);
            }
            *word |= shifted;
        }
        SumBits(words)
    }

    /// Whether the two sets share no value apart from 0.
    pub fn is_intersection_trivial(&self, other: &SumBits) -> bool {
        (self.0[0] & other.0[0]) >> 1 == 0
            && self.0[1..]
                .iter()
                .zip(&other.0[1..])
                .all(|(a, b)| a & b == 0)
    }

    pub fn intersection_size(&self, other: &SumBits) -> usize {
        self.0
            .iter()
            .zip(&other.0)
            .map(|(a, b)| (a & b).count_ones() as usize)
            .sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        (0..SUMSET_CAPACITY).filter(|&value| self.contains(value))
    }
}

impl fmt::Debug for SumBits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    A,
    B,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::A => write!(f, "A"),
            Side::B => write!(f, "B"),
        }
    }
}

/// A multiset of positive integers, stored as its subset sums plus a link to the
/// multiset it was grown from.
#[derive(Debug)]
pub struct Sumset {
    pub sums: SumBits,
    pub sum: usize,
    /// Most recently added element, 1 for the empty multiset.
    pub last: usize,
    pub origin: Side,
    pub prev: Option<Arc<Sumset>>,
}

impl Sumset {
    pub fn empty(origin: Side) -> Self {
        Sumset {
            sums: SumBits::zero(),
            sum: 0,
            last: 1,
            origin,
            prev: None,
        }
    }

    /// The multiset `elements`, built one element at a time so its chain can be walked back.
    pub fn from_elements(origin: Side, elements: &[usize]) -> Arc<Sumset> {
        elements
            .iter()
            .fold(Arc::new(Sumset::empty(origin)), |set, &element| {
                Arc::new(Sumset::with_element(&set, element))
            })
    }

    pub fn with_element(set: &Arc<Sumset>, element: usize) -> Self {
        Sumset {
            sums: set.sums.with_shifted(element),
            sum: set.sum + element,
            last: element,
            origin: set.origin,
            prev: Some(Arc::clone(set)),
        }
    }

    /// Elements in the order they were added.
    pub fn elements(&self) -> Vec<usize> {
        let mut elements = Vec::new();
        let mut current = self;
        while let Some(prev) = &current.prev {
            elements.push(current.last);
            current = prev;
        }
        elements.reverse();
        elements
    }
}

// Long chains would otherwise be dropped recursively
impl Drop for Sumset {
    fn drop(&mut self) {
        let mut prev = self.prev.take();
        while let Some(set) = prev {
            match Arc::try_unwrap(set) {
                Ok(mut set) => prev = set.prev.take(),
                Err(_) => break,
            }
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerifyError {
    #[error("{side} sums to {actual}, but the solution claims {claimed}")]
    SumMismatch {
        side: Side,
        actual: usize,
        claimed: usize,
    },
    #[error("{side} does not start with its start set")]
    NotAnExtension { side: Side },
    #[error("{side} contains {element}, which is outside [1, {d}]")]
    OutOfRange {
        side: Side,
        element: usize,
        d: usize,
    },
    #[error("the subset sums of A and B share {shared} values instead of only 0 and the total")]
    SharedSums { shared: usize },
}

/// Two multisets with equal totals whose only common subset sums are 0 and that total.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SumsetSolution {
    pub sum: usize,
    pub a: Vec<usize>,
    pub b: Vec<usize>,
}

impl Solution for SumsetSolution {
    fn score(&self) -> u64 {
        self.sum as u64
    }
}

impl SumsetSolution {
    /// Re-derives everything the solution claims from its element lists.
    pub fn verify(&self, problem: &SumsetProblem) -> Result<(), VerifyError> {
        let sides = [
            (Side::A, &self.a, &problem.a_start),
            (Side::B, &self.b, &problem.b_start),
        ];

        let mut sets = Vec::with_capacity(2);
        for (side, elements, start) in sides {
            if !elements.starts_with(start) {
                return Err(VerifyError::NotAnExtension { side });
            }
            if let Some(&element) = elements.iter().find(|&&e| e == 0 || e > problem.d) {
                return Err(VerifyError::OutOfRange {
                    side,
                    element,
                    d: problem.d,
                });
            }

            let set = Sumset::from_elements(side, elements);
            if set.sum != self.sum {
                return Err(VerifyError::SumMismatch {
                    side,
                    actual: set.sum,
                    claimed: self.sum,
                });
            }
            sets.push(set);
        }

        let shared = sets[0].sums.intersection_size(&sets[1].sums);
        if shared != 2 {
            return Err(VerifyError::SharedSums { shared });
        }
        Ok(())
    }
}

impl fmt::Display for SumsetSolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.sum)?;
        writeln!(f, "{}", self.a.iter().join(" "))?;
        write!(f, "{}", self.b.iter().join(" "))
    }
}

/// Find the largest `Σ` such that multisets `A ⊇ A0` and `B ⊇ B0` over `[1, d]` both sum to
/// `Σ` and share no other subset sum than 0 and `Σ`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SumsetProblem {
    /// Requested number of worker threads, at least 1.
    pub threads: usize,
    pub d: usize,
    pub a_start: Vec<usize>,
    pub b_start: Vec<usize>,
}

impl SumsetProblem {
    pub fn new(
        threads: usize,
        d: usize,
        a_start: Vec<usize>,
        b_start: Vec<usize>,
    ) -> Result<Self, InputError> {
        if d == 0 || d > MAX_D {
            return Err(InputError::BoundOutOfRange { d, max: MAX_D });
        }

        for (side, elements) in [(Side::A, &a_start), (Side::B, &b_start)] {
            if let Some(&element) = elements.iter().find(|&&e| e == 0 || e > d) {
                return Err(InputError::ElementOutOfRange { side, element, d });
            }
        }

        // Every leaf adds at most d elements of size at most d to the start sums
        let max_sum = a_start.iter().sum::<usize>() + b_start.iter().sum::<usize>() + d * d + d;
        if max_sum >= SUMSET_CAPACITY {
            return Err(InputError::TooLarge {
                max_sum,
                capacity: SUMSET_CAPACITY,
            });
        }

        Ok(SumsetProblem {
            threads: threads.max(1),
            d,
            a_start,
            b_start,
        })
    }

    /// The start sets as search states.
    pub fn roots(&self) -> (Arc<Sumset>, Arc<Sumset>) {
        (
            Sumset::from_elements(Side::A, &self.a_start),
            Sumset::from_elements(Side::B, &self.b_start),
        )
    }
}

impl SearchDomain for SumsetProblem {
    type State = Sumset;
    type Solution = SumsetSolution;

    fn max_candidate(&self) -> usize {
        self.d
    }

    fn weight(&self, state: &Sumset) -> u64 {
        state.sum as u64
    }

    fn first_candidate(&self, low: &Sumset) -> usize {
        low.last
    }

    fn is_trivial_pair(&self, low: &Sumset, high: &Sumset) -> bool {
        low.sums.is_intersection_trivial(&high.sums)
    }

    fn contains(&self, state: &Sumset, candidate: usize) -> bool {
        state.sums.contains(candidate)
    }

    fn with_candidate_added(&self, state: &Arc<Sumset>, candidate: usize) -> Sumset {
        Sumset::with_element(state, candidate)
    }

    fn intersection_size(&self, low: &Sumset, high: &Sumset) -> usize {
        low.sums.intersection_size(&high.sums)
    }

    fn is_admissible_solution(&self, low: &Sumset, high: &Sumset) -> bool {
        low.sum == high.sum && self.intersection_size(low, high) == 2
    }

    fn objective(&self, _low: &Sumset, high: &Sumset) -> u64 {
        high.sum as u64
    }

    fn build_solution(&self, low: &Sumset, high: &Sumset) -> SumsetSolution {
        let (a, b) = match low.origin {
            Side::A => (low, high),
            Side::B => (high, low),
        };
        SumsetSolution {
            sum: high.sum,
            a: a.elements(),
            b: b.elements(),
        }
    }
}
