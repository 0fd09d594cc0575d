//! Projection of a condition onto the value intervals of one parameter.
//!
//! [`ParamIntervalBuilder`] walks an [`Expression`] and computes the set of
//! values of its target parameter that can satisfy it:
//!
//! - `OR` branches are united,
//! - `AND` terms are intersected pairwise,
//! - `NOT` takes the complement within the basis bounds,
//! - a comparison against a constant becomes one or two intervals.
//!
//! Comparisons on other parameters, or against non-constant operands, do not
//! constrain the target and are treated as "any value". The result is
//! therefore a superset of the values that match, which is what pruning
//! needs: anything outside it can be skipped safely.

use chrono::{DateTime, Utc};
use common::{Basis, Interval};

use super::ast::{Condition, Expression, Op, OrCondition, XCondition, XInner};
use super::dialect::{Dialect, ParamFlags, Value};
use crate::error::{Error, Result};

/// Conversion from a dialect [`Value`] to an interval point.
pub trait FromValue: Sized {
    fn from_value(value: Value) -> Option<Self>;
}

impl FromValue for String {
    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

impl FromValue for DateTime<Utc> {
    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Time(t) => Some(t),
            _ => None,
        }
    }
}

impl FromValue for u64 {
    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Number(n) if n >= 0.0 && n.fract() == 0.0 && n <= u64::MAX as f64 => {
                Some(n as u64)
            }
            _ => None,
        }
    }
}

/// Values of the target parameter admitted by a sub-expression.
enum Set<T> {
    /// The sub-expression does not constrain the target.
    Any,
    /// Sorted, disjoint intervals; empty means nothing matches.
    Intervals(Vec<Interval<T>>),
}

pub struct ParamIntervalBuilder<'a, B: Basis> {
    basis: B,
    dialect: &'a Dialect,
    param: String,
    ops: Vec<Op>,
}

impl<'a, B> ParamIntervalBuilder<'a, B>
where
    B: Basis,
    B::Value: FromValue,
{
    /// Creates a builder for `param`. Comparisons on `param` using an
    /// operator outside `ops` do not narrow the result.
    pub fn new(basis: B, dialect: &'a Dialect, param: impl Into<String>, ops: &[Op]) -> Self {
        Self {
            basis,
            dialect,
            param: param.into(),
            ops: ops.to_vec(),
        }
    }

    /// Returns the sorted, disjoint intervals of target values that may
    /// satisfy `expr`. An unconstrained target yields the full basis range;
    /// an unsatisfiable one yields no intervals.
    pub fn build(&self, expr: &Expression) -> Result<Vec<Interval<B::Value>>> {
        Ok(match self.expression(expr)? {
            Set::Any => vec![self.basis.full()],
            Set::Intervals(intervals) => intervals,
        })
    }

    fn expression(&self, expr: &Expression) -> Result<Set<B::Value>> {
        let mut any = false;
        let mut united = Vec::new();
        for branch in &expr.or {
            match self.or_condition(branch)? {
                Set::Any => any = true,
                Set::Intervals(intervals) => united.extend(intervals),
            }
        }
        if any {
            return Ok(Set::Any);
        }
        Ok(Set::Intervals(self.basis.normalize(united)))
    }

    fn or_condition(&self, branch: &OrCondition) -> Result<Set<B::Value>> {
        let mut acc = Set::Any;
        for term in &branch.and {
            let next = self.xcondition(term)?;
            acc = self.intersect(acc, next);
        }
        Ok(acc)
    }

    fn xcondition(&self, term: &XCondition) -> Result<Set<B::Value>> {
        let set = match &term.inner {
            XInner::Expr(expr) => self.expression(expr)?,
            XInner::Cond(cond) => self.condition(cond)?,
        };
        if !term.not {
            return Ok(set);
        }
        Ok(match set {
            Set::Any => Set::Any,
            Set::Intervals(intervals) => Set::Intervals(self.complement(&intervals)),
        })
    }

    fn intersect(&self, a: Set<B::Value>, b: Set<B::Value>) -> Set<B::Value> {
        match (a, b) {
            (Set::Any, other) | (other, Set::Any) => other,
            (Set::Intervals(a), Set::Intervals(b)) => {
                let mut result = Vec::new();
                for x in &a {
                    for y in &b {
                        if let Some(i) = self.basis.intersect(x, y) {
                            result.push(i);
                        }
                    }
                }
                Set::Intervals(self.basis.normalize(result))
            }
        }
    }

    fn complement(&self, intervals: &[Interval<B::Value>]) -> Vec<Interval<B::Value>> {
        intervals.iter().fold(vec![self.basis.full()], |acc, i| {
            match self.intersect(
                Set::Intervals(acc),
                Set::Intervals(self.basis.negate(i)),
            ) {
                Set::Intervals(v) => v,
                Set::Any => vec![self.basis.full()],
            }
        })
    }

    fn condition(&self, cond: &Condition) -> Result<Set<B::Value>> {
        let first = self.dialect.get(&cond.first)?;
        if !first.flags.contains(ParamFlags::LVALUE) {
            return Err(Error::Invalid(format!(
                "{} must not be on the left side of a condition",
                cond.first
            )));
        }
        if first.flags.contains(ParamFlags::NOP) {
            return Err(Error::Invalid(format!(
                "{} does not support {}",
                cond.first, cond.op
            )));
        }
        if cond.first.id() != self.param {
            return Ok(Set::Any);
        }

        let second = self.dialect.get(&cond.second)?;
        if !second.flags.contains(ParamFlags::RVALUE) {
            return Err(Error::Invalid(format!(
                "{} must not be on the right side of a condition",
                cond.second
            )));
        }
        if second.flags.contains(ParamFlags::NOP) {
            return Err(Error::Invalid(format!(
                "{} does not support {}",
                cond.second, cond.op
            )));
        }
        let Some(constant) = cond.second.as_const() else {
            return Ok(Set::Any);
        };

        if !self.ops.contains(&cond.op) {
            return Ok(Set::Any);
        }
        let comparable = |flags: ParamFlags| match cond.op {
            Op::Lt | Op::Gt => {
                flags.contains(ParamFlags::COMPARABLE) || flags.contains(ParamFlags::GREATER_LESS)
            }
            _ => flags.contains(ParamFlags::COMPARABLE),
        };
        if !comparable(first.flags) || !comparable(second.flags) {
            return Err(Error::Invalid(format!(
                "{} {} {} compares incomparable operands",
                cond.first, cond.op, cond.second
            )));
        }

        let value = constant.coerce(first.value_type)?;
        let point = B::Value::from_value(value).ok_or_else(|| {
            Error::Invalid(format!(
                "{} cannot be used as a value of {}",
                cond.second, self.param
            ))
        })?;
        Ok(Set::Intervals(self.intervals_for(cond.op, point)))
    }

    fn intervals_for(&self, op: Op, v: B::Value) -> Vec<Interval<B::Value>> {
        let b = &self.basis;
        let intervals = match op {
            Op::Lt => vec![b.open_right(b.min(), v)],
            Op::Gt => vec![b.open_left(v, b.max())],
            Op::Le => vec![b.closed(b.min(), v)],
            Op::Ge => vec![b.closed(v, b.max())],
            Op::Eq => vec![b.closed(v.clone(), v)],
            Op::Ne => b.negate(&b.closed(v.clone(), v)),
        };
        b.normalize(intervals)
    }
}

#[cfg(test)]
mod tests {
    use common::OrdBasis;

    use super::*;
    use crate::ql::dialect::{CTIME, ValueType};
    use crate::ql::parser::parse;

    fn dialect() -> Dialect {
        let lvalue = ParamFlags::LVALUE | ParamFlags::COMPARABLE;
        Dialect::default()
            .with("t", lvalue, ValueType::String)
            .with("x", lvalue, ValueType::String)
            .with("y", lvalue | ParamFlags::RVALUE, ValueType::String)
            .with("z", ParamFlags::LVALUE | ParamFlags::NOP, ValueType::String)
            .with_constants()
    }

    fn build(dialect: &Dialect, input: &str) -> Result<Vec<Interval<String>>> {
        let builder = ParamIntervalBuilder::new(OrdBasis::strings(), dialect, "t", &Op::ALL);
        builder.build(&parse(input)?)
    }

    fn max() -> String {
        char::MAX.to_string()
    }

    fn s(v: &str) -> String {
        v.to_string()
    }

    #[test]
    fn should_build_no_intervals_for_contradiction() {
        // when
        let result = build(&dialect(), "t < 'b' AND t > 'c'").unwrap();

        // then
        assert!(result.is_empty());
    }

    #[test]
    fn should_build_half_open_range() {
        // when
        let result = build(&dialect(), "t >= 'b' AND t < 'c'").unwrap();

        // then
        assert_eq!(result, vec![Interval::new(s("b"), true, s("c"), false)]);
    }

    #[test]
    fn should_merge_nested_and_or_branches() {
        // when
        let result = build(
            &dialect(),
            "((t > 'a' AND t < 'c') AND (t > 'b' AND t < 'e')) OR (t > 'k')",
        )
        .unwrap();

        // then
        assert_eq!(
            result,
            vec![
                Interval::new(s("b"), false, s("c"), false),
                Interval::new(s("k"), false, max(), true),
            ]
        );
    }

    #[test]
    fn should_merge_overlapping_or_branches() {
        // when
        let result = build(&dialect(), "t >= 'c' AND t <= 'f' OR t > 'a' AND t < 'd' OR t = 'f'")
            .unwrap();

        // then
        assert_eq!(result, vec![Interval::new(s("a"), false, s("f"), true)]);
    }

    #[test]
    fn should_negate_conditions() {
        // when
        let not_equal = build(&dialect(), "t != 'b'").unwrap();
        let not_group = build(&dialect(), "NOT (t < 'b' OR t > 'd')").unwrap();

        // then
        assert_eq!(
            not_equal,
            vec![
                Interval::new(String::new(), true, s("b"), false),
                Interval::new(s("b"), false, max(), true),
            ]
        );
        assert_eq!(not_group, vec![Interval::new(s("b"), true, s("d"), true)]);
    }

    #[test]
    fn should_ignore_other_parameters() {
        // when
        let and = build(&dialect(), "t > 'a' AND x = 'z'").unwrap();
        let or = build(&dialect(), "t > 'a' OR x = 'z'").unwrap();
        let non_const = build(&dialect(), "t > y").unwrap();

        // then
        assert_eq!(and, vec![Interval::new(s("a"), false, max(), true)]);
        assert_eq!(or, vec![Interval::new(String::new(), true, max(), true)]);
        assert_eq!(non_const, or);
    }

    #[test]
    fn should_reject_structurally_invalid_conditions() {
        let dialect = dialect();
        for input in [
            "unknown = 'a'",
            "'a' = t",
            "z = 'a'",
            "t = x",
            "t = unknown",
        ] {
            let result = build(&dialect, input);
            assert!(
                matches!(result, Err(Error::Invalid(_))),
                "expected error for {input:?}, got {result:?}"
            );
        }
    }

    #[test]
    fn should_not_narrow_on_operator_outside_the_accepted_set() {
        // given
        let dialect = dialect();
        let builder =
            ParamIntervalBuilder::new(OrdBasis::strings(), &dialect, "t", &[Op::Lt, Op::Gt]);

        // when
        let and = builder.build(&parse("t < 'b' AND t = 'a'").unwrap()).unwrap();
        let alone = builder.build(&parse("t = 'a'").unwrap()).unwrap();

        // then
        assert_eq!(and, vec![Interval::new(String::new(), true, s("b"), false)]);
        assert_eq!(alone, vec![Interval::new(String::new(), true, max(), true)]);
    }

    #[test]
    fn should_build_time_intervals_for_record_dialect() {
        // given
        let dialect = Dialect::records();
        let builder = ParamIntervalBuilder::new(OrdBasis::timestamps(), &dialect, CTIME, &Op::ALL);
        let expr = parse(
            "ctime >= '2024-01-01T00:00:00Z' AND ctime < 1704067260000 AND logID = 'a'",
        )
        .unwrap();

        // when
        let result = builder.build(&expr).unwrap();

        // then
        let start = DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let end = DateTime::from_timestamp_millis(1_704_067_260_000).unwrap();
        assert_eq!(result, vec![Interval::new(start, true, end, false)]);
    }

    #[test]
    fn should_reject_uncoercible_time() {
        // given
        let dialect = Dialect::records();
        let builder = ParamIntervalBuilder::new(OrdBasis::timestamps(), &dialect, CTIME, &Op::ALL);

        // when
        let result = builder.build(&parse("ctime > 'noon'").unwrap());

        // then
        assert!(matches!(result, Err(Error::Invalid(_))));
    }
}
