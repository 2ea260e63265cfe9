//! Arithmetic expressions for in-band variables
//!
//! Two forms appear in queued lines:
//!
//! - `%depth=2.5, pass=depth/2` assigns variables in a persistent scope
//! - `G0 Z[pass + 1]` substitutes the value of a bracketed expression
//!
//! Expressions support `+ - * /`, parentheses, unary minus, numbers and
//! identifiers (letters, digits, `_` and `.`).

use std::collections::BTreeMap;

use halstream_core::error::GcodeError;
use halstream_core::units::format_trimmed;
use nom::{
    branch::alt,
    bytes::complete::tag,
    character::complete::{alpha1, alphanumeric1, char, multispace0},
    combinator::{all_consuming, map, map_res, recognize},
    multi::{many0, many0_count, separated_list1},
    number::complete::recognize_float,
    sequence::{delimited, pair, preceded},
    IResult,
};
use thiserror::Error;

/// Decimal places kept when a value is substituted into a line
pub const SUBSTITUTION_PLACES: usize = 4;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExpressionError {
    #[error("cannot parse '{0}'")]
    Syntax(String),

    #[error("unknown variable '{0}'")]
    UnknownVariable(String),

    #[error("division by zero")]
    DivisionByZero,
}

impl ExpressionError {
    pub fn into_gcode(self, expression: &str) -> GcodeError {
        GcodeError::InvalidExpression {
            expression: expression.to_string(),
            reason: self.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Add,
    Subtract,
    Multiply,
    Divide,
}

/// Parsed expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Variable(String),
    Negate(Box<Expr>),
    Binary(Operator, Box<Expr>, Box<Expr>),
}

impl Expr {
    /// Evaluate with `lookup` resolving variable names
    pub fn evaluate(&self, lookup: &dyn Fn(&str) -> Option<f64>) -> Result<f64, ExpressionError> {
        match self {
            Expr::Number(value) => Ok(*value),
            Expr::Variable(name) => {
                lookup(name).ok_or_else(|| ExpressionError::UnknownVariable(name.clone()))
            }
            Expr::Negate(inner) => Ok(-inner.evaluate(lookup)?),
            Expr::Binary(op, left, right) => {
                let left = left.evaluate(lookup)?;
                let right = right.evaluate(lookup)?;
                match op {
                    Operator::Add => Ok(left + right),
                    Operator::Subtract => Ok(left - right),
                    Operator::Multiply => Ok(left * right),
                    Operator::Divide if right == 0.0 => Err(ExpressionError::DivisionByZero),
                    Operator::Divide => Ok(left / right),
                }
            }
        }
    }
}

fn ws<'a, O, F>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    delimited(multispace0, inner, multispace0)
}

fn identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        alt((alpha1, tag("_"))),
        many0_count(alt((alphanumeric1, tag("_"), tag(".")))),
    ))(input)
}

fn number(input: &str) -> IResult<&str, Expr> {
    map(map_res(recognize_float, str::parse::<f64>), Expr::Number)(input)
}

fn factor(input: &str) -> IResult<&str, Expr> {
    ws(alt((
        number,
        delimited(char('('), expr, char(')')),
        map(preceded(char('-'), factor), |inner| Expr::Negate(Box::new(inner))),
        map(identifier, |name: &str| Expr::Variable(name.to_string())),
    )))(input)
}

fn fold(first: Expr, rest: Vec<(char, Expr)>) -> Expr {
    rest.into_iter().fold(first, |left, (op, right)| {
        let op = match op {
            '+' => Operator::Add,
            '-' => Operator::Subtract,
            '*' => Operator::Multiply,
            _ => Operator::Divide,
        };
        Expr::Binary(op, Box::new(left), Box::new(right))
    })
}

fn term(input: &str) -> IResult<&str, Expr> {
    let (input, first) = factor(input)?;
    let (input, rest) = many0(pair(ws(alt((char('*'), char('/')))), factor))(input)?;
    Ok((input, fold(first, rest)))
}

fn expr(input: &str) -> IResult<&str, Expr> {
    let (input, first) = term(input)?;
    let (input, rest) = many0(pair(ws(alt((char('+'), char('-')))), term))(input)?;
    Ok((input, fold(first, rest)))
}

fn assignments(input: &str) -> IResult<&str, Vec<(&str, Expr)>> {
    separated_list1(
        char(','),
        pair(ws(identifier), preceded(char('='), expr)),
    )(input)
}

/// Parse a complete expression
pub fn parse_expression(input: &str) -> Result<Expr, ExpressionError> {
    all_consuming(expr)(input)
        .map(|(_, parsed)| parsed)
        .map_err(|_| ExpressionError::Syntax(input.trim().to_string()))
}

/// Persistent variables assigned through `%name=expr` lines
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExpressionScope {
    variables: BTreeMap<String, f64>,
}

impl ExpressionScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.variables.get(name).copied()
    }

    pub fn set(&mut self, name: impl Into<String>, value: f64) {
        self.variables.insert(name.into(), value);
    }

    pub fn clear(&mut self) {
        self.variables.clear();
    }

    pub fn variables(&self) -> &BTreeMap<String, f64> {
        &self.variables
    }

    /// Run `a=expr, b=expr`; later assignments see earlier ones
    ///
    /// Scope variables shadow `lookup`. Nothing is assigned if any part fails.
    pub fn assign(
        &mut self,
        text: &str,
        lookup: &dyn Fn(&str) -> Option<f64>,
    ) -> Result<Vec<(String, f64)>, ExpressionError> {
        let (_, parsed) = all_consuming(assignments)(text)
            .map_err(|_| ExpressionError::Syntax(text.trim().to_string()))?;

        let mut staged = self.variables.clone();
        let mut assigned = Vec::with_capacity(parsed.len());
        for (name, expression) in parsed {
            let value = expression
                .evaluate(&|key: &str| staged.get(key).copied().or_else(|| lookup(key)))?;
            staged.insert(name.to_string(), value);
            assigned.push((name.to_string(), value));
        }
        self.variables = staged;
        Ok(assigned)
    }

    /// Evaluate one expression against the scope and `lookup`
    pub fn evaluate(
        &self,
        text: &str,
        lookup: &dyn Fn(&str) -> Option<f64>,
    ) -> Result<f64, ExpressionError> {
        parse_expression(text)?
            .evaluate(&|key: &str| self.get(key).or_else(|| lookup(key)))
    }

    /// Replace every `[expr]` outside comments with its value
    pub fn substitute(
        &self,
        line: &str,
        lookup: &dyn Fn(&str) -> Option<f64>,
    ) -> Result<String, ExpressionError> {
        if !line.contains('[') {
            return Ok(line.to_string());
        }

        let mut output = String::with_capacity(line.len());
        let mut chars = line.char_indices().peekable();
        let mut in_comment = false;
        while let Some((index, c)) = chars.next() {
            match c {
                '(' if !in_comment => {
                    in_comment = true;
                    output.push(c);
                }
                ')' if in_comment => {
                    in_comment = false;
                    output.push(c);
                }
                ';' if !in_comment => {
                    output.push_str(&line[index..]);
                    break;
                }
                '[' if !in_comment => {
                    let Some(end) = matching_bracket(line, index) else {
                        output.push_str(&line[index..]);
                        break;
                    };
                    let value = self.evaluate(&line[index + 1..end], lookup)?;
                    output.push_str(&format_trimmed(value, SUBSTITUTION_PLACES));
                    while chars.peek().is_some_and(|(i, _)| *i <= end) {
                        chars.next();
                    }
                }
                _ => output.push(c),
            }
        }
        Ok(output)
    }
}

fn matching_bracket(line: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (offset, c) in line[open..].char_indices() {
        match c {
            '[' => depth += 1,
            ']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + offset);
                }
            }
            _ => {}
        }
    }
    None
}
