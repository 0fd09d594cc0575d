//! Parameter dialects: which identifiers a condition may use and how.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::ops::BitOr;

use chrono::{DateTime, Utc};

use super::ast::{Const, Param};
use crate::error::{Error, Result};

/// Capabilities of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ParamFlags(u8);

impl ParamFlags {
    /// May appear on the left side of a comparison.
    pub const LVALUE: ParamFlags = ParamFlags(1);
    /// May appear on the right side of a comparison.
    pub const RVALUE: ParamFlags = ParamFlags(1 << 1);
    /// Supports every comparison operator.
    pub const COMPARABLE: ParamFlags = ParamFlags(1 << 2);
    /// Supports `<` and `>` only.
    pub const GREATER_LESS: ParamFlags = ParamFlags(1 << 3);
    /// Takes part in no operation.
    pub const NOP: ParamFlags = ParamFlags(1 << 4);

    pub fn contains(self, other: ParamFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for ParamFlags {
    type Output = ParamFlags;

    fn bitor(self, rhs: ParamFlags) -> ParamFlags {
        ParamFlags(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    String,
    Number,
    Time,
}

/// A typed value a parameter resolves to.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Number(f64),
    Time(DateTime<Utc>),
}

impl Value {
    /// Orders two values of the same type; values of different types are
    /// incomparable.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
            (Value::Time(a), Value::Time(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl Const {
    /// Converts the constant to `target`. Times are written as RFC 3339
    /// strings or as milliseconds since the unix epoch.
    pub fn coerce(&self, target: ValueType) -> Result<Value> {
        match (self, target) {
            (Const::String(s), ValueType::String) => Ok(Value::String(s.clone())),
            (Const::Number(n), ValueType::Number) => Ok(Value::Number(*n)),
            (Const::Number(n), ValueType::String) => Ok(Value::String(n.to_string())),
            (Const::String(s), ValueType::Number) => s
                .parse::<f64>()
                .map(Value::Number)
                .map_err(|_| Error::Invalid(format!("{s:?} is not a number"))),
            (Const::String(s), ValueType::Time) => DateTime::parse_from_rfc3339(s)
                .map(|t| Value::Time(t.with_timezone(&Utc)))
                .map_err(|e| Error::Invalid(format!("{s:?} is not an RFC 3339 time: {e}"))),
            (Const::Number(n), ValueType::Time) => DateTime::from_timestamp_millis(*n as i64)
                .map(Value::Time)
                .ok_or_else(|| Error::Invalid(format!("{n} is out of the time range"))),
        }
    }
}

/// Description of one parameter of a dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamDesc {
    pub flags: ParamFlags,
    pub value_type: ValueType,
}

/// The set of parameters a condition may reference, keyed by
/// [`Param::id`].
#[derive(Debug, Clone, Default)]
pub struct Dialect {
    params: HashMap<String, ParamDesc>,
}

/// Creation time of a record.
pub const CTIME: &str = "ctime";
/// ID of the log a record or log belongs to.
pub const LOG_ID: &str = "logID";
/// Value of a log tag, `tag('name')`.
pub const TAG: &str = "tag";

impl Dialect {
    pub fn with(mut self, id: &str, flags: ParamFlags, value_type: ValueType) -> Self {
        self.params
            .insert(id.to_string(), ParamDesc { flags, value_type });
        self
    }

    /// Adds string and number constants as right-hand operands.
    pub fn with_constants(self) -> Self {
        let rvalue = ParamFlags::RVALUE | ParamFlags::COMPARABLE;
        self.with("{string}", rvalue, ValueType::String)
            .with("{number}", rvalue, ValueType::Number)
    }

    /// Parameters available when filtering records.
    pub fn records() -> Self {
        let lvalue = ParamFlags::LVALUE | ParamFlags::COMPARABLE;
        Dialect::default()
            .with(CTIME, lvalue, ValueType::Time)
            .with(LOG_ID, lvalue, ValueType::String)
            .with_constants()
    }

    /// Parameters available when selecting logs.
    pub fn logs() -> Self {
        let lvalue = ParamFlags::LVALUE | ParamFlags::COMPARABLE;
        Dialect::default()
            .with(LOG_ID, lvalue, ValueType::String)
            .with(&format!("{TAG}()"), lvalue, ValueType::String)
            .with_constants()
    }

    pub fn get(&self, param: &Param) -> Result<ParamDesc> {
        self.params
            .get(&param.id())
            .copied()
            .ok_or_else(|| Error::Invalid(format!("unknown parameter {param}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_coerce_time_constants() {
        // given
        let iso = Const::String("2024-03-01T10:00:00Z".into());
        let millis = Const::Number(1_709_287_200_000.0);

        // when
        let a = iso.coerce(ValueType::Time).unwrap();
        let b = millis.coerce(ValueType::Time).unwrap();

        // then
        assert_eq!(a, b);
    }

    #[test]
    fn should_reject_uncoercible_constant() {
        // when
        let result = Const::String("yesterday".into()).coerce(ValueType::Time);

        // then
        assert!(matches!(result, Err(Error::Invalid(_))));
    }

    #[test]
    fn should_not_order_values_of_different_types() {
        assert_eq!(
            Value::String("1".into()).compare(&Value::Number(1.0)),
            None
        );
        assert_eq!(
            Value::Number(1.0).compare(&Value::Number(2.0)),
            Some(Ordering::Less)
        );
    }

    #[test]
    fn should_describe_known_parameters() {
        // given
        let dialect = Dialect::records();

        // then
        let ctime = dialect.get(&Param::Ident(CTIME.into())).unwrap();
        assert!(ctime.flags.contains(ParamFlags::LVALUE));
        assert_eq!(ctime.value_type, ValueType::Time);
        assert!(dialect.get(&Param::Ident("size".into())).is_err());
    }
}
