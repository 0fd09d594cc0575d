//! Expression tree produced by the [parser](super::parser).

use std::fmt;

/// A disjunction: `branch OR branch OR ...`.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    pub or: Vec<OrCondition>,
}

/// A conjunction: `term AND term AND ...`.
#[derive(Debug, Clone, PartialEq)]
pub struct OrCondition {
    pub and: Vec<XCondition>,
}

/// An optionally negated term.
#[derive(Debug, Clone, PartialEq)]
pub struct XCondition {
    pub not: bool,
    pub inner: XInner,
}

#[derive(Debug, Clone, PartialEq)]
pub enum XInner {
    /// A parenthesized sub-expression.
    Expr(Box<Expression>),
    Cond(Condition),
}

/// A single comparison `first op second`.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub first: Param,
    pub op: Op,
    pub second: Param,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
}

impl Op {
    pub const ALL: [Op; 6] = [Op::Lt, Op::Gt, Op::Le, Op::Ge, Op::Eq, Op::Ne];

    pub fn as_str(&self) -> &'static str {
        match self {
            Op::Lt => "<",
            Op::Gt => ">",
            Op::Le => "<=",
            Op::Ge => ">=",
            Op::Eq => "=",
            Op::Ne => "!=",
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Const {
    String(String),
    Number(f64),
}

/// An operand of a comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Const(Const),
    Ident(String),
    /// A function call such as `tag('env')`.
    Func { name: String, args: Vec<Param> },
}

impl Param {
    /// Key of the parameter in a [`Dialect`](super::Dialect). Constants map
    /// to `{string}` / `{number}`, functions to `name()`.
    pub fn id(&self) -> String {
        match self {
            Param::Const(Const::String(_)) => "{string}".to_string(),
            Param::Const(Const::Number(_)) => "{number}".to_string(),
            Param::Ident(name) => name.clone(),
            Param::Func { name, .. } => format!("{name}()"),
        }
    }

    pub fn as_const(&self) -> Option<&Const> {
        match self {
            Param::Const(c) => Some(c),
            _ => None,
        }
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Param::Const(Const::String(s)) => write!(f, "{s:?}"),
            Param::Const(Const::Number(n)) => write!(f, "{n}"),
            Param::Ident(name) => f.write_str(name),
            Param::Func { name, args } => {
                write!(f, "{name}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                f.write_str(")")
            }
        }
    }
}
