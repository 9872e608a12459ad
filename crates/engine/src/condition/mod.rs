// VMDB - Managed VM Debugger
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Breakpoint conditions
//!
//! A condition is a small boolean expression over the registers of the
//! trapping thread and words of debuggee memory, for example
//! `r1 == 5 && [r2+4] > 0`. It is parsed once when set and evaluated every
//! time the breakpoint traps.
//!
//! Grammar (lowest precedence first):
//!
//! ```text
//! or         := and ( "||" and )*
//! and        := comparison ( "&&" comparison )*
//! comparison := sum ( ("==" | "!=" | ">=" | "<=" | ">" | "<") sum )?
//! sum        := primary ( ("+" | "-") primary )*
//! primary    := number | register | "(" or ")" | "[" memory "]"
//! memory     := number | register ( ("+" | "-") number )?
//! ```
//!
//! Unary operators are not supported. The outermost expression must be a
//! comparison or a logical combination, otherwise parsing fails with
//! [`ConditionError::MustYieldBoolean`].

mod ast;
pub use ast::*;

mod evaluator;
pub use evaluator::*;

mod lexer;
mod parser;

use std::fmt;

use thiserror::Error;

/// Errors from parsing or evaluating a condition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConditionError {
    /// Malformed condition text.
    #[error("parse error at position {position}: {message}")]
    Parse {
        /// Byte offset in the condition text where the problem was detected.
        position: usize,
        /// What went wrong.
        message: String,
    },

    /// The condition parsed, but its outermost expression is numeric.
    #[error("condition must yield a boolean: {0}")]
    MustYieldBoolean(String),

    /// Evaluation failed (type mismatch, unknown register, unreadable memory).
    #[error("evaluation error: {0}")]
    Evaluation(String),
}

impl ConditionError {
    pub(crate) fn parse(position: usize, message: impl Into<String>) -> Self {
        Self::Parse { position, message: message.into() }
    }

    pub(crate) fn evaluation(message: impl Into<String>) -> Self {
        Self::Evaluation(message.into())
    }
}

/// A parsed breakpoint condition together with the text it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    text: String,
    expr: Expr,
}

impl Condition {
    /// Parse condition text.
    pub fn parse(text: &str) -> Result<Self, ConditionError> {
        let tokens = lexer::tokenize(text)?;
        let expr = parser::Parser::new(&tokens, text.len()).parse()?;
        if !expr.yields_boolean() {
            return Err(ConditionError::MustYieldBoolean(text.trim().to_string()));
        }
        Ok(Self { text: text.trim().to_string(), expr })
    }

    /// The text the condition was parsed from.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// The parsed expression tree.
    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    /// Evaluate against the given registers and memory.
    pub fn evaluate(&self, context: &dyn ConditionContext) -> Result<bool, ConditionError> {
        match evaluate(&self.expr, context)? {
            Value::Bool(value) => Ok(value),
            Value::Int(value) => Err(ConditionError::evaluation(format!(
                "condition produced integer {value} instead of a boolean"
            ))),
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}
