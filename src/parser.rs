use itertools::Itertools;
use thiserror::Error;

use crate::sumset::{Side, SumsetProblem};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InputError {
    #[error("unexpected end of input while reading {expected}")]
    UnexpectedEof { expected: &'static str },
    #[error("expected {expected} at byte {position}, found {found:?}")]
    InvalidNumber {
        expected: &'static str,
        position: usize,
        found: char,
    },
    #[error("number at byte {position} does not fit into a machine word")]
    Overflow { position: usize },
    #[error("bound d = {d} is outside [1, {max}]")]
    BoundOutOfRange { d: usize, max: usize },
    #[error("start set {side} contains {element}, which is outside [1, {d}]")]
    ElementOutOfRange { side: Side, element: usize, d: usize },
    #[error("sums may reach {max_sum}, which does not fit below the capacity of {capacity}")]
    TooLarge { max_sum: usize, capacity: usize },
}

/// Parses a problem of the form `t d n m a_1 .. a_n b_1 .. b_m`, whitespace separated.
/// Anything after the last element is ignored.
pub fn parse_problem(data: &[u8]) -> Result<SumsetProblem, InputError> {
    let mut iter = ByteArrayIterator::new(data);

    let threads = iter.next_usize("the thread count")?;
    let d = iter.next_usize("the bound d")?;
    let n = iter.next_usize("the size of A")?;
    let m = iter.next_usize("the size of B")?;

    // Sizes come from untrusted input, don't preallocate for them
    let a_start = (0..n)
        .map(|_| iter.next_usize("an element of A"))
        .collect::<Result<Vec<_>, _>>()?;
    let b_start = (0..m)
        .map(|_| iter.next_usize("an element of B"))
        .collect::<Result<Vec<_>, _>>()?;

    SumsetProblem::new(threads, d, a_start, b_start)
}

/// Renders a problem in the format understood by [`parse_problem`].
pub fn format_problem(problem: &SumsetProblem) -> String {
    format!(
        "{} {} {} {}\n{}\n{}\n",
        problem.threads,
        problem.d,
        problem.a_start.len(),
        problem.b_start.len(),
        problem.a_start.iter().join(" "),
        problem.b_start.iter().join(" ")
    )
}

/// An iterator over a byte array with utility methods for parsing.
struct ByteArrayIterator<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteArrayIterator<'a> {
    fn new(data: &'a [u8]) -> Self {
        ByteArrayIterator { data, pos: 0 }
    }

    #[inline(always)]
    fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    /// Skips bytes until the next non-whitespace byte.
    fn skip_ascii_whitespace(&mut self) {
        while self.peek().is_some_and(|byte| byte.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    /// Parses an unsigned integer from the current position.
    fn parse_usize(&mut self) -> Option<Result<usize, InputError>> {
        let start = self.pos;
        let mut num = 0usize;

        while let Some(byte) = self.peek().filter(u8::is_ascii_digit) {
            num = match num
                .checked_mul(10)
                .and_then(|num| num.checked_add((byte - b'0') as usize))
            {
                Some(num) => num,
                None => return Some(Err(InputError::Overflow { position: start })),
            };
            self.pos += 1;
        }

        (self.pos > start).then_some(Ok(num))
    }

    /// Skips whitespace and parses the next number, describing what was expected on failure.
    fn next_usize(&mut self, expected: &'static str) -> Result<usize, InputError> {
        self.skip_ascii_whitespace();

        let Some(byte) = self.peek() else {
            return Err(InputError::UnexpectedEof { expected });
        };

        match self.parse_usize() {
            Some(result) => result,
            None => Err(InputError::InvalidNumber {
                expected,
                position: self.pos,
                found: byte as char,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_problem() {
        let problem = parse_problem(b"8 10 2 3\n1 2\n3 4 5\n").unwrap();

        assert_eq!(problem.threads, 8);
        assert_eq!(problem.d, 10);
        assert_eq!(problem.a_start, vec![1, 2]);
        assert_eq!(problem.b_start, vec![3, 4, 5]);
    }

    #[test]
    fn test_parse_ignores_layout() {
        let cases: [&[u8]; 4] = [
            b"1 5 1 1 2 3",
            b"  1\t5\r\n1\n1\n2\n3",
            b"1 5 1 1 2 3\ntrailing garbage",
            b"\n\n1 5\n\n1 1\n\n2\n\n3\n\n",
        ];

        for data in cases {
            let problem = parse_problem(data).unwrap();
            assert_eq!(
                (problem.d, problem.a_start, problem.b_start),
                (5, vec![2], vec![3]),
                "Parsing {:?}",
                String::from_utf8_lossy(data)
            );
        }
    }

    #[test]
    fn test_thread_count_is_clamped() {
        let problem = parse_problem(b"0 3 0 0").unwrap();
        assert_eq!(problem.threads, 1);
        assert!(problem.a_start.is_empty());
        assert!(problem.b_start.is_empty());
    }

    #[test]
    fn test_parse_errors() {
        let cases: [(&[u8], InputError); 6] = [
            (
                b"",
                InputError::UnexpectedEof {
                    expected: "the thread count",
                },
            ),
            (
                b"4 10 2 1 1",
                InputError::UnexpectedEof {
                    expected: "an element of A",
                },
            ),
            (
                b"4 10 x",
                InputError::InvalidNumber {
                    expected: "the size of A",
                    position: 5,
                    found: 'x',
                },
            ),
            (
                b"4 -3 0 0",
                InputError::InvalidNumber {
                    expected: "the bound d",
                    position: 2,
                    found: '-',
                },
            ),
            (
                b"1 99999999999999999999999 0 0",
                InputError::Overflow { position: 2 },
            ),
            (
                b"1 51 0 0",
                InputError::BoundOutOfRange { d: 51, max: 50 },
            ),
        ];

        for (data, expected) in cases {
            assert_eq!(
                parse_problem(data),
                Err(expected),
                "Parsing {:?}",
                String::from_utf8_lossy(data)
            );
        }
    }

    #[test]
    fn test_rejects_elements_outside_bound() {
        assert_eq!(
            parse_problem(b"1 4 1 2 1 2 5"),
            Err(InputError::ElementOutOfRange {
                side: Side::B,
                element: 5,
                d: 4
            })
        );
    }

    #[test]
    fn test_format_round_trips() {
        let problem = SumsetProblem::new(3, 12, vec![4, 1], vec![]).unwrap();
        let text = format_problem(&problem);

        assert_eq!(text, "3 12 2 0\n4 1\n\n");
        assert_eq!(parse_problem(text.as_bytes()).unwrap(), problem);
    }
}
