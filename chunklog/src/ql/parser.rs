//! Recursive-descent parser for filter conditions.
//!
//! ```text
//! expr  := and ( OR and )*
//! and   := xcond ( AND xcond )*
//! xcond := [ NOT ] ( '(' expr ')' | cond )
//! cond  := param op param
//! op    := '<' | '>' | '<=' | '>=' | '=' | '!='
//! param := string | number | ident [ '(' [ param ( ',' param )* ] ')' ]
//! ```
//!
//! Keywords are case-insensitive. Strings use single or double quotes and
//! support backslash escapes.

use std::iter::Peekable;
use std::str::CharIndices;

use super::ast::{Condition, Const, Expression, Op, OrCondition, Param, XCondition, XInner};
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    String(String),
    Number(f64),
    Op(Op),
    LParen,
    RParen,
    Comma,
    And,
    Or,
    Not,
}

#[derive(Debug, Clone)]
struct Spanned {
    token: Token,
    pos: usize,
}

/// Parses `input` into an [`Expression`]. Fails with [`Error::Invalid`]
/// describing the first offending position.
pub fn parse(input: &str) -> Result<Expression> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(Error::Invalid("empty condition".into()));
    }
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.expression()?;
    if let Some(extra) = parser.tokens.get(parser.pos) {
        return Err(syntax(extra.pos, "unexpected trailing input"));
    }
    Ok(expr)
}

fn syntax(pos: usize, msg: &str) -> Error {
    Error::Invalid(format!("condition syntax error at {pos}: {msg}"))
}

fn tokenize(input: &str) -> Result<Vec<Spanned>> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();
    while let Some(&(pos, c)) = chars.peek() {
        let token = match c {
            c if c.is_whitespace() => {
                chars.next();
                continue;
            }
            '(' => {
                chars.next();
                Token::LParen
            }
            ')' => {
                chars.next();
                Token::RParen
            }
            ',' => {
                chars.next();
                Token::Comma
            }
            '<' | '>' | '=' | '!' => lex_op(&mut chars, pos)?,
            '\'' | '"' => lex_string(&mut chars, pos)?,
            c if c.is_ascii_digit() || c == '-' => lex_number(&mut chars, pos)?,
            c if c.is_alphabetic() || c == '_' => lex_word(&mut chars),
            other => return Err(syntax(pos, &format!("unexpected character {other:?}"))),
        };
        tokens.push(Spanned { token, pos });
    }
    Ok(tokens)
}

fn lex_op(chars: &mut Peekable<CharIndices<'_>>, pos: usize) -> Result<Token> {
    let (_, first) = chars.next().ok_or_else(|| syntax(pos, "expected operator"))?;
    let eq_follows = matches!(chars.peek(), Some((_, '=')));
    let op = match (first, eq_follows) {
        ('<', true) => Op::Le,
        ('>', true) => Op::Ge,
        ('!', true) => Op::Ne,
        ('<', false) => return Ok(Token::Op(Op::Lt)),
        ('>', false) => return Ok(Token::Op(Op::Gt)),
        ('=', _) => return Ok(Token::Op(Op::Eq)),
        _ => return Err(syntax(pos, "expected '!='")),
    };
    chars.next();
    Ok(Token::Op(op))
}

fn lex_string(chars: &mut Peekable<CharIndices<'_>>, pos: usize) -> Result<Token> {
    let (_, quote) = chars.next().ok_or_else(|| syntax(pos, "expected string"))?;
    let mut value = String::new();
    loop {
        match chars.next() {
            None => return Err(syntax(pos, "unterminated string")),
            Some((_, '\\')) => match chars.next() {
                Some((_, 'n')) => value.push('\n'),
                Some((_, 't')) => value.push('\t'),
                Some((_, c)) => value.push(c),
                None => return Err(syntax(pos, "unterminated string")),
            },
            Some((_, c)) if c == quote => return Ok(Token::String(value)),
            Some((_, c)) => value.push(c),
        }
    }
}

fn lex_number(chars: &mut Peekable<CharIndices<'_>>, pos: usize) -> Result<Token> {
    let mut text = String::new();
    while let Some(&(_, c)) = chars.peek() {
        if c.is_ascii_digit() || c == '.' || c == '-' || c == 'e' || c == 'E' || c == '+' {
            text.push(c);
            chars.next();
        } else {
            break;
        }
    }
    text.parse::<f64>()
        .map(Token::Number)
        .map_err(|_| syntax(pos, &format!("malformed number {text:?}")))
}

fn lex_word(chars: &mut Peekable<CharIndices<'_>>) -> Token {
    let mut word = String::new();
    while let Some(&(_, c)) = chars.peek() {
        if c.is_alphanumeric() || c == '_' || c == '.' {
            word.push(c);
            chars.next();
        } else {
            break;
        }
    }
    match word.to_ascii_uppercase().as_str() {
        "AND" => Token::And,
        "OR" => Token::Or,
        "NOT" => Token::Not,
        _ => Token::Ident(word),
    }
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|t| &t.token)
    }

    fn current_pos(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|t| t.pos)
            .unwrap_or(0)
    }

    fn bump(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|t| t.token.clone());
        self.pos += 1;
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: Token, what: &str) -> Result<()> {
        if self.eat(&expected) {
            Ok(())
        } else {
            Err(syntax(self.current_pos(), &format!("expected {what}")))
        }
    }

    fn expression(&mut self) -> Result<Expression> {
        let mut or = vec![self.or_condition()?];
        while self.eat(&Token::Or) {
            or.push(self.or_condition()?);
        }
        Ok(Expression { or })
    }

    fn or_condition(&mut self) -> Result<OrCondition> {
        let mut and = vec![self.xcondition()?];
        while self.eat(&Token::And) {
            and.push(self.xcondition()?);
        }
        Ok(OrCondition { and })
    }

    fn xcondition(&mut self) -> Result<XCondition> {
        let not = self.eat(&Token::Not);
        if self.eat(&Token::LParen) {
            let expr = self.expression()?;
            self.expect(Token::RParen, "')'")?;
            return Ok(XCondition {
                not,
                inner: XInner::Expr(Box::new(expr)),
            });
        }
        Ok(XCondition {
            not,
            inner: XInner::Cond(self.condition()?),
        })
    }

    fn condition(&mut self) -> Result<Condition> {
        let first = self.param()?;
        let pos = self.current_pos();
        let op = match self.bump() {
            Some(Token::Op(op)) => op,
            _ => return Err(syntax(pos, "expected comparison operator")),
        };
        let second = self.param()?;
        Ok(Condition { first, op, second })
    }

    fn param(&mut self) -> Result<Param> {
        let pos = self.current_pos();
        match self.bump() {
            Some(Token::String(s)) => Ok(Param::Const(Const::String(s))),
            Some(Token::Number(n)) => Ok(Param::Const(Const::Number(n))),
            Some(Token::Ident(name)) => {
                if !self.eat(&Token::LParen) {
                    return Ok(Param::Ident(name));
                }
                let mut args = Vec::new();
                if !self.eat(&Token::RParen) {
                    loop {
                        args.push(self.param()?);
                        if self.eat(&Token::RParen) {
                            break;
                        }
                        self.expect(Token::Comma, "',' or ')'")?;
                    }
                }
                Ok(Param::Func { name, args })
            }
            _ => Err(syntax(pos, "expected parameter")),
        }
    }
}
