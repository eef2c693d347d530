//! Block Interval Set Algebra
//!
//! Pure set operations over closed integer block intervals. Every function in
//! this module takes and returns interval sets in canonical form: sorted
//! ascending, disjoint, and maximally merged (adjacent intervals collapsed).

use serde::{Deserialize, Serialize};
use std::fmt;

/// A closed interval of block numbers, `start <= end`. Single-block
/// intervals (`start == end`) are valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Interval {
    pub start: u64,
    pub end: u64,
}

impl Interval {
    pub fn new(start: u64, end: u64) -> Self {
        debug_assert!(start <= end, "invalid interval [{start}, {end}]");
        Self { start, end }
    }

    /// Number of blocks covered, inclusive of both endpoints.
    pub fn blocks(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn contains(&self, block: u64) -> bool {
        self.start <= block && block <= self.end
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

/// Sorts and merges an arbitrary collection of intervals into canonical form.
pub fn canonicalize(mut intervals: Vec<Interval>) -> Vec<Interval> {
    if intervals.is_empty() {
        return intervals;
    }
    intervals.sort();

    let mut merged: Vec<Interval> = Vec::with_capacity(intervals.len());
    for interval in intervals {
        match merged.last_mut() {
            // Adjacent closed intervals merge too: [0, 5] + [6, 9] = [0, 9].
            Some(last) if interval.start <= last.end.saturating_add(1) => {
                last.end = last.end.max(interval.end);
            }
            _ => merged.push(interval),
        }
    }
    merged
}

/// Union of two canonical interval sets.
pub fn union(a: &[Interval], b: &[Interval]) -> Vec<Interval> {
    let mut all = Vec::with_capacity(a.len() + b.len());
    all.extend_from_slice(a);
    all.extend_from_slice(b);
    canonicalize(all)
}

/// Set difference `a \ b` of two canonical interval sets.
pub fn difference(a: &[Interval], b: &[Interval]) -> Vec<Interval> {
    let mut out = Vec::new();
    let mut b_iter = b.iter().copied().peekable();

    for interval in a.iter().copied() {
        let mut cursor = interval.start;

        // Drop subtrahend intervals that end before the current position.
        // Safe across iterations because both sets are sorted and disjoint.
        while matches!(b_iter.peek(), Some(sub) if sub.end < cursor) {
            b_iter.next();
        }

        while cursor <= interval.end {
            match b_iter.peek().copied() {
                Some(sub) if sub.start <= interval.end => {
                    if sub.start > cursor {
                        out.push(Interval::new(cursor, sub.start - 1));
                    }
                    cursor = cursor.max(sub.end.saturating_add(1));
                    if sub.end <= interval.end {
                        b_iter.next();
                    } else {
                        // Subtrahend extends past this interval; keep it for
                        // the next one.
                        break;
                    }
                }
                _ => {
                    out.push(Interval::new(cursor, interval.end));
                    break;
                }
            }
        }
    }
    out
}

/// Intersection of two canonical interval sets.
pub fn intersection(a: &[Interval], b: &[Interval]) -> Vec<Interval> {
    let mut out = Vec::new();
    let (mut i, mut j) = (0, 0);

    while i < a.len() && j < b.len() {
        let start = a[i].start.max(b[j].start);
        let end = a[i].end.min(b[j].end);
        if start <= end {
            out.push(Interval::new(start, end));
        }
        if a[i].end < b[j].end {
            i += 1;
        } else {
            j += 1;
        }
    }
    out
}

/// Total number of blocks covered by a canonical interval set.
pub fn total_blocks(intervals: &[Interval]) -> u64 {
    intervals.iter().map(Interval::blocks).sum()
}

/// Splits each interval into consecutive sub-intervals spanning at most
/// `max_chunk_size` blocks, preserving order. Chunk ends snap to multiples
/// of the chunk size, so restarts and neighboring sources produce identical
/// range boundaries regardless of where their gaps fall.
pub fn chunk(intervals: &[Interval], max_chunk_size: u64) -> Vec<Interval> {
    assert!(max_chunk_size > 0, "chunk size must be non-zero");
    let mut out = Vec::new();
    for interval in intervals {
        let mut from = interval.start;
        while from <= interval.end {
            let boundary = (from / max_chunk_size + 1).saturating_mul(max_chunk_size);
            let to = interval.end.min(boundary);
            out.push(Interval::new(from, to));
            if to == interval.end {
                break;
            }
            from = to + 1;
        }
    }
    out
}
