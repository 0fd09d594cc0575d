//! Filter conditions over records and logs.
//!
//! Conditions are boolean expressions in OR-of-AND form:
//!
//! ```text
//! ctime >= '2024-01-01T00:00:00Z' AND NOT (logID = 'a' OR logID = 'b')
//! tag('env') = 'prod' OR tag('env') = "stage"
//! ```
//!
//! An expression is parsed once into an [`Expression`] tree. From there it
//! is either compiled into a [`Matcher`] for exact per-item evaluation, or
//! handed to a [`ParamIntervalBuilder`] that projects it onto one parameter
//! as a set of value intervals, which the store uses to skip chunks.

pub mod ast;
pub mod dialect;
pub mod eval;
pub mod interval;
pub mod parser;

pub use ast::{Const, Condition, Expression, Op, OrCondition, Param, XCondition, XInner};
pub use dialect::{Dialect, ParamDesc, ParamFlags, Value, ValueType};
pub use eval::{Matcher, Subject};
pub use interval::{FromValue, ParamIntervalBuilder};
pub use parser::parse;
