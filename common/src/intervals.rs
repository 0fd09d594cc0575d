//! Interval algebra over ordered domains.
//!
//! A [`Basis`] describes a domain: its bounds and how intervals over it are
//! built, merged, intersected and complemented. The default method bodies
//! work for any totally ordered value, so a new domain usually only supplies
//! [`Basis::min`] and [`Basis::max`] (see [`OrdBasis`]).

use std::fmt::Debug;

use chrono::{DateTime, Utc};

/// A contiguous range of values with independently open or closed ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interval<T> {
    pub lower: T,
    pub upper: T,
    pub lower_closed: bool,
    pub upper_closed: bool,
}

impl<T: Ord> Interval<T> {
    pub fn new(lower: T, lower_closed: bool, upper: T, upper_closed: bool) -> Self {
        Self {
            lower,
            upper,
            lower_closed,
            upper_closed,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lower > self.upper
            || (self.lower == self.upper && !(self.lower_closed && self.upper_closed))
    }

    pub fn contains(&self, value: &T) -> bool {
        let above = if self.lower_closed {
            *value >= self.lower
        } else {
            *value > self.lower
        };
        let below = if self.upper_closed {
            *value <= self.upper
        } else {
            *value < self.upper
        };
        above && below
    }

    /// Whether the interval shares at least one value with `[lo, hi]`.
    pub fn overlaps_closed(&self, lo: &T, hi: &T) -> bool {
        let starts_ok = if self.lower_closed {
            self.lower <= *hi
        } else {
            self.lower < *hi
        };
        let ends_ok = if self.upper_closed {
            self.upper >= *lo
        } else {
            self.upper > *lo
        };
        lo <= hi && starts_ok && ends_ok
    }
}

/// An ordered domain together with its interval operations.
pub trait Basis {
    type Value: Clone + Ord + Debug;

    fn min(&self) -> Self::Value;

    fn max(&self) -> Self::Value;

    /// `[a, b]`
    fn closed(&self, a: Self::Value, b: Self::Value) -> Interval<Self::Value> {
        Interval::new(a, true, b, true)
    }

    /// `(a, b)`
    fn open(&self, a: Self::Value, b: Self::Value) -> Interval<Self::Value> {
        Interval::new(a, false, b, false)
    }

    /// `(a, b]`
    fn open_left(&self, a: Self::Value, b: Self::Value) -> Interval<Self::Value> {
        Interval::new(a, false, b, true)
    }

    /// `[a, b)`
    fn open_right(&self, a: Self::Value, b: Self::Value) -> Interval<Self::Value> {
        Interval::new(a, true, b, false)
    }

    /// The whole domain.
    fn full(&self) -> Interval<Self::Value> {
        self.closed(self.min(), self.max())
    }

    /// Whether `a` begins strictly before `b`; a closed lower bound begins
    /// before an open one at the same value.
    fn starts_before(&self, a: &Interval<Self::Value>, b: &Interval<Self::Value>) -> bool {
        a.lower < b.lower || (a.lower == b.lower && a.lower_closed && !b.lower_closed)
    }

    /// Returns the common part of `a` and `b`, or `None` when they are disjoint.
    fn intersect(
        &self,
        a: &Interval<Self::Value>,
        b: &Interval<Self::Value>,
    ) -> Option<Interval<Self::Value>> {
        let (lower, lower_closed) = match a.lower.cmp(&b.lower) {
            std::cmp::Ordering::Greater => (a.lower.clone(), a.lower_closed),
            std::cmp::Ordering::Less => (b.lower.clone(), b.lower_closed),
            std::cmp::Ordering::Equal => (a.lower.clone(), a.lower_closed && b.lower_closed),
        };
        let (upper, upper_closed) = match a.upper.cmp(&b.upper) {
            std::cmp::Ordering::Less => (a.upper.clone(), a.upper_closed),
            std::cmp::Ordering::Greater => (b.upper.clone(), b.upper_closed),
            std::cmp::Ordering::Equal => (a.upper.clone(), a.upper_closed && b.upper_closed),
        };
        let result = Interval::new(lower, lower_closed, upper, upper_closed);
        (!result.is_empty()).then_some(result)
    }

    /// Merges `a` and `b` into one interval if they overlap or touch,
    /// otherwise returns both in ascending order.
    fn union(
        &self,
        a: &Interval<Self::Value>,
        b: &Interval<Self::Value>,
    ) -> Vec<Interval<Self::Value>> {
        let (first, second) = if self.starts_before(b, a) {
            (b, a)
        } else {
            (a, b)
        };
        let touches = first.upper > second.lower
            || (first.upper == second.lower && (first.upper_closed || second.lower_closed));
        if !touches {
            return vec![first.clone(), second.clone()];
        }
        let (upper, upper_closed) = match first.upper.cmp(&second.upper) {
            std::cmp::Ordering::Greater => (first.upper.clone(), first.upper_closed),
            std::cmp::Ordering::Less => (second.upper.clone(), second.upper_closed),
            std::cmp::Ordering::Equal => (
                first.upper.clone(),
                first.upper_closed || second.upper_closed,
            ),
        };
        vec![Interval::new(
            first.lower.clone(),
            first.lower_closed,
            upper,
            upper_closed,
        )]
    }

    /// The complement of `a` within `[min, max]`, as zero, one or two intervals.
    fn negate(&self, a: &Interval<Self::Value>) -> Vec<Interval<Self::Value>> {
        if a.is_empty() {
            return vec![self.full()];
        }
        let left = Interval::new(self.min(), true, a.lower.clone(), !a.lower_closed);
        let right = Interval::new(a.upper.clone(), !a.upper_closed, self.max(), true);
        [left, right]
            .into_iter()
            .filter(|i| !i.is_empty())
            .collect()
    }

    /// Sorts `intervals` and merges every overlapping or touching pair,
    /// producing a minimal ascending list of disjoint intervals.
    fn normalize(&self, mut intervals: Vec<Interval<Self::Value>>) -> Vec<Interval<Self::Value>> {
        intervals.retain(|i| !i.is_empty());
        intervals.sort_by(|a, b| {
            if self.starts_before(a, b) {
                std::cmp::Ordering::Less
            } else if self.starts_before(b, a) {
                std::cmp::Ordering::Greater
            } else {
                std::cmp::Ordering::Equal
            }
        });
        let mut result: Vec<Interval<Self::Value>> = Vec::with_capacity(intervals.len());
        for next in intervals {
            match result.pop() {
                None => result.push(next),
                Some(last) => result.extend(self.union(&last, &next)),
            }
        }
        result
    }
}

/// A [`Basis`] over any ordered type, bounded by explicit minimum and maximum.
#[derive(Debug, Clone)]
pub struct OrdBasis<T> {
    min: T,
    max: T,
}

impl<T: Clone + Ord + Debug> OrdBasis<T> {
    pub fn new(min: T, max: T) -> Self {
        Self { min, max }
    }
}

impl<T: Clone + Ord + Debug> Basis for OrdBasis<T> {
    type Value = T;

    fn min(&self) -> T {
        self.min.clone()
    }

    fn max(&self) -> T {
        self.max.clone()
    }
}

impl OrdBasis<String> {
    /// Strings from the empty string up to a single `char::MAX`.
    pub fn strings() -> Self {
        Self::new(String::new(), char::MAX.to_string())
    }
}

impl OrdBasis<u64> {
    pub fn unsigned() -> Self {
        Self::new(0, u64::MAX)
    }
}

impl OrdBasis<DateTime<Utc>> {
    pub fn timestamps() -> Self {
        Self::new(DateTime::<Utc>::MIN_UTC, DateTime::<Utc>::MAX_UTC)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn basis() -> OrdBasis<u64> {
        OrdBasis::new(0, 100)
    }

    #[test]
    fn should_intersect_with_tighter_bounds() {
        // given
        let b = basis();
        let a = b.closed(10, 50);
        let c = b.open(20, 60);

        // when
        let result = b.intersect(&a, &c);

        // then
        assert_eq!(result, Some(Interval::new(20, false, 50, true)));
    }

    #[test]
    fn should_return_none_for_disjoint_intersection() {
        // given
        let b = basis();

        // when
        let result = b.intersect(&b.open_right(0, 10), &b.closed(10, 20));

        // then
        assert_eq!(result, None);
    }

    #[test]
    fn should_merge_touching_intervals_when_one_side_is_closed() {
        // given
        let b = basis();

        // when
        let merged = b.union(&b.closed(5, 10), &b.open_left(10, 20));
        let apart = b.union(&b.open_right(5, 10), &b.open_left(10, 20));

        // then
        assert_eq!(merged, vec![b.closed(5, 20)]);
        assert_eq!(apart.len(), 2);
    }

    #[test]
    fn should_negate_into_complement() {
        // given
        let b = basis();

        // when
        let point = b.negate(&b.closed(30, 30));
        let prefix = b.negate(&b.open_right(0, 40));

        // then
        assert_eq!(point, vec![b.open_right(0, 30), b.open_left(30, 100)]);
        assert_eq!(prefix, vec![b.closed(40, 100)]);
    }

    #[test]
    fn should_normalize_into_sorted_disjoint_list() {
        // given
        let b = basis();
        let input = vec![
            b.closed(50, 60),
            b.open(1, 5),
            b.closed(55, 70),
            b.closed(3, 8),
        ];

        // when
        let result = b.normalize(input);

        // then
        assert_eq!(result, vec![Interval::new(1, false, 8, true), b.closed(50, 70)]);
    }

    #[test]
    fn should_check_closed_range_overlap() {
        // given
        let i = OrdBasis::<u64>::unsigned().open_right(10, 20);

        // then
        assert!(i.overlaps_closed(&0, &10));
        assert!(!i.overlaps_closed(&20, &30));
        assert!(i.contains(&19));
        assert!(!i.contains(&20));
    }
}
