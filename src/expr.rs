//! Offset/width expression evaluator.
//!
//! Grammar (see `expr.pest`): an optional leading sign, then terms joined by
//! `+`/`-`. A term is an integer token or a `{dotted.name}` lookup into the
//! values already bound during the current decode pass. Arithmetic wraps on
//! 64-bit overflow.

use crate::ast::ValueExpr;
use crate::codec::parse_signed_integer;
use pest::error::InputLocation;
use pest::Parser;
use pest_derive::Parser as PestParser;
use std::collections::HashMap;

#[derive(PestParser)]
#[grammar = "expr.pest"]
struct ExprParser;

/// Values bound so far in a decode pass, keyed by dotted field path.
pub type Values = HashMap<String, i64>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExprError {
    /// A `{name}` term had no bound value. Decoders treat this as a soft skip.
    #[error("missing variable {0}")]
    MissingVariable(String),
    #[error("expression is empty")]
    Empty,
    #[error("empty variable name in expression")]
    EmptyVariable,
    #[error("invalid numeric token '{0}'")]
    InvalidNumber(String),
    #[error("invalid expression: {message} at position {position}")]
    Syntax { message: String, position: usize },
}

impl ExprError {
    /// Name of the unbound variable, when that is the cause.
    pub fn missing_variable(&self) -> Option<&str> {
        match self {
            ExprError::MissingVariable(name) => Some(name),
            _ => None,
        }
    }
}

/// Evaluate an expression; [`ValueExpr::Unset`] evaluates to 0.
pub fn evaluate(expr: &ValueExpr, values: &Values) -> Result<i64, ExprError> {
    match expr {
        ValueExpr::Unset => Ok(0),
        ValueExpr::Literal(v) => Ok(*v),
        ValueExpr::Text(text) => evaluate_text(text, values),
    }
}

/// Evaluate expression text against `values`.
pub fn evaluate_text(text: &str, values: &Values) -> Result<i64, ExprError> {
    if text.trim().is_empty() {
        return Err(ExprError::Empty);
    }
    let mut pairs = ExprParser::parse(Rule::expression, text).map_err(|e| {
        let position = match e.location {
            InputLocation::Pos(p) => p,
            InputLocation::Span((start, _)) => start,
        };
        ExprError::Syntax {
            message: e.variant.message().into_owned(),
            position: position + 1,
        }
    })?;
    let expression = pairs.next().ok_or(ExprError::Empty)?;

    let mut total: i64 = 0;
    let mut negate = false;
    for pair in expression.into_inner() {
        let term = match pair.as_rule() {
            Rule::sign => {
                negate = pair.as_str() == "-";
                continue;
            }
            Rule::variable => {
                let name = pair
                    .into_inner()
                    .next()
                    .map(|p| p.as_str().trim())
                    .unwrap_or_default();
                if name.is_empty() {
                    return Err(ExprError::EmptyVariable);
                }
                *values
                    .get(name)
                    .ok_or_else(|| ExprError::MissingVariable(name.to_string()))?
            }
            Rule::number => {
                let token = pair.as_str();
                parse_signed_integer(token)
                    .ok_or_else(|| ExprError::InvalidNumber(token.to_string()))?
            }
            _ => continue,
        };
        total = if negate {
            total.wrapping_sub(term)
        } else {
            total.wrapping_add(term)
        };
        negate = false;
    }
    Ok(total)
}
