//! Exact evaluation of conditions against records and logs.

use std::cmp::Ordering;

use super::ast::{Condition, Expression, Op, Param, XInner};
use super::dialect::{CTIME, Dialect, LOG_ID, ParamFlags, TAG, Value, ValueType};
use crate::error::{Error, Result};
use crate::model::{Log, Record};

/// Something a condition can be evaluated against.
pub trait Subject {
    /// Value of the identifier `name`, if the subject has one.
    fn ident(&self, name: &str) -> Option<Value>;

    /// Value of the function call `name(args)`, if the subject has one.
    fn func(&self, _name: &str, _args: &[Value]) -> Option<Value> {
        None
    }
}

impl Subject for Record {
    fn ident(&self, name: &str) -> Option<Value> {
        match name {
            CTIME => Some(Value::Time(self.created_at)),
            LOG_ID => Some(Value::String(self.log_id.clone())),
            _ => None,
        }
    }
}

impl Subject for Log {
    fn ident(&self, name: &str) -> Option<Value> {
        match name {
            LOG_ID => Some(Value::String(self.id.clone())),
            _ => None,
        }
    }

    fn func(&self, name: &str, args: &[Value]) -> Option<Value> {
        match (name, args) {
            (TAG, [Value::String(key)]) => self.tags.get(key).cloned().map(Value::String),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
enum Operand {
    Value(Value),
    Ident(String),
    Func { name: String, args: Vec<Value> },
}

#[derive(Debug, Clone)]
enum Node {
    Or(Vec<Node>),
    And(Vec<Node>),
    Not(Box<Node>),
    Cmp {
        left: Operand,
        op: Op,
        right: Operand,
    },
}

/// A condition validated against a dialect, ready to test subjects.
#[derive(Debug, Clone)]
pub struct Matcher {
    root: Node,
}

impl Matcher {
    /// Validates `expr` against `dialect` and converts its constants to the
    /// types of the parameters they are compared with.
    pub fn compile(expr: &Expression, dialect: &Dialect) -> Result<Self> {
        Ok(Self {
            root: compile_expr(expr, dialect)?,
        })
    }

    pub fn matches(&self, subject: &impl Subject) -> bool {
        eval(&self.root, subject)
    }
}

fn compile_expr(expr: &Expression, dialect: &Dialect) -> Result<Node> {
    let branches = expr
        .or
        .iter()
        .map(|branch| {
            let terms = branch
                .and
                .iter()
                .map(|term| {
                    let node = match &term.inner {
                        XInner::Expr(inner) => compile_expr(inner, dialect)?,
                        XInner::Cond(cond) => compile_cond(cond, dialect)?,
                    };
                    Ok(if term.not {
                        Node::Not(Box::new(node))
                    } else {
                        node
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(Node::And(terms))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Node::Or(branches))
}

fn compile_cond(cond: &Condition, dialect: &Dialect) -> Result<Node> {
    let first = dialect.get(&cond.first)?;
    let second = dialect.get(&cond.second)?;
    if !first.flags.contains(ParamFlags::LVALUE) {
        return Err(Error::Invalid(format!(
            "{} must not be on the left side of a condition",
            cond.first
        )));
    }
    if !second.flags.contains(ParamFlags::RVALUE) {
        return Err(Error::Invalid(format!(
            "{} must not be on the right side of a condition",
            cond.second
        )));
    }
    let supports = |flags: ParamFlags| {
        !flags.contains(ParamFlags::NOP)
            && match cond.op {
                Op::Lt | Op::Gt => {
                    flags.contains(ParamFlags::COMPARABLE)
                        || flags.contains(ParamFlags::GREATER_LESS)
                }
                _ => flags.contains(ParamFlags::COMPARABLE),
            }
    };
    if !supports(first.flags) || !supports(second.flags) {
        return Err(Error::Invalid(format!(
            "{} {} {} is not a supported comparison",
            cond.first, cond.op, cond.second
        )));
    }
    Ok(Node::Cmp {
        left: operand(&cond.first, first.value_type)?,
        op: cond.op,
        right: operand(&cond.second, first.value_type)?,
    })
}

fn operand(param: &Param, target: ValueType) -> Result<Operand> {
    Ok(match param {
        Param::Const(c) => Operand::Value(c.coerce(target)?),
        Param::Ident(name) => Operand::Ident(name.clone()),
        Param::Func { name, args } => Operand::Func {
            name: name.clone(),
            args: args
                .iter()
                .map(|arg| match arg {
                    Param::Const(c) => c.coerce(ValueType::String),
                    other => Err(Error::Invalid(format!(
                        "argument {other} of {name}() must be a constant"
                    ))),
                })
                .collect::<Result<Vec<_>>>()?,
        },
    })
}

fn resolve(operand: &Operand, subject: &impl Subject) -> Option<Value> {
    match operand {
        Operand::Value(v) => Some(v.clone()),
        Operand::Ident(name) => subject.ident(name),
        Operand::Func { name, args } => subject.func(name, args),
    }
}

fn eval(node: &Node, subject: &impl Subject) -> bool {
    match node {
        Node::Or(nodes) => nodes.iter().any(|n| eval(n, subject)),
        Node::And(nodes) => nodes.iter().all(|n| eval(n, subject)),
        Node::Not(inner) => !eval(inner, subject),
        Node::Cmp { left, op, right } => {
            let (Some(l), Some(r)) = (resolve(left, subject), resolve(right, subject)) else {
                return false;
            };
            let Some(ord) = l.compare(&r) else {
                return false;
            };
            match op {
                Op::Lt => ord == Ordering::Less,
                Op::Gt => ord == Ordering::Greater,
                Op::Le => ord != Ordering::Greater,
                Op::Ge => ord != Ordering::Less,
                Op::Eq => ord == Ordering::Equal,
                Op::Ne => ord != Ordering::Equal,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use bytes::Bytes;
    use chrono::{DateTime, Utc};
    use ulid::Ulid;

    use super::*;
    use crate::ql::parser::parse;

    fn record(log_id: &str, ms: i64) -> Record {
        Record {
            id: Ulid::from_parts(ms as u64, 1),
            log_id: log_id.into(),
            payload: Bytes::new(),
            created_at: DateTime::<Utc>::from_timestamp_millis(ms).unwrap(),
        }
    }

    fn log(id: &str, tags: &[(&str, &str)]) -> Log {
        Log {
            id: id.into(),
            tags: tags
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn matcher(input: &str, dialect: &Dialect) -> Matcher {
        Matcher::compile(&parse(input).unwrap(), dialect).unwrap()
    }

    #[test]
    fn should_match_records_by_time_window() {
        // given
        let m = matcher(
            "ctime >= 1000 AND ctime <= 3000 AND ctime != 2000",
            &Dialect::records(),
        );

        // then
        assert!(m.matches(&record("a", 1000)));
        assert!(!m.matches(&record("a", 2000)));
        assert!(m.matches(&record("a", 3000)));
        assert!(!m.matches(&record("a", 3001)));
    }

    #[test]
    fn should_match_logs_by_tag_and_id() {
        // given
        let m = matcher(
            "tag('env') = 'prod' OR NOT logID < 'm'",
            &Dialect::logs(),
        );

        // then
        assert!(m.matches(&log("a", &[("env", "prod")])));
        assert!(!m.matches(&log("a", &[("env", "dev")])));
        assert!(!m.matches(&log("b", &[])));
        assert!(m.matches(&log("z", &[])));
    }

    #[test]
    fn should_reject_parameters_outside_dialect() {
        // when
        let result = Matcher::compile(&parse("tag('env') = 'x'").unwrap(), &Dialect::records());

        // then
        assert!(matches!(result, Err(Error::Invalid(_))));
    }

    #[test]
    fn should_reject_non_constant_function_arguments() {
        // when
        let result = Matcher::compile(&parse("tag(logID) = 'x'").unwrap(), &Dialect::logs());

        // then
        assert!(matches!(result, Err(Error::Invalid(_))));
    }
}
