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

use std::fmt;

use vmdb_common::Address;

use super::{BinaryOp, ConditionError, Expr, MemoryOperand};
use crate::{TargetProcess, ThreadContext};

/// Source of register and memory values during evaluation.
pub trait ConditionContext {
    /// Value of a register of the trapping thread.
    fn register(&self, name: &str) -> Option<u64>;

    /// One machine word of debuggee memory.
    fn read_word(&self, address: Address) -> eyre::Result<u64>;
}

/// Evaluation context of a thread stopped at a trap.
pub struct TrapConditionContext<'a> {
    thread: &'a dyn ThreadContext,
    process: &'a dyn TargetProcess,
    word_size: u64,
}

impl<'a> TrapConditionContext<'a> {
    /// Evaluate against `thread`'s registers and `process` memory.
    pub fn new(thread: &'a dyn ThreadContext, process: &'a dyn TargetProcess, word_size: u64) -> Self {
        Self { thread, process, word_size }
    }
}

impl ConditionContext for TrapConditionContext<'_> {
    fn register(&self, name: &str) -> Option<u64> {
        self.thread.register(name)
    }

    fn read_word(&self, address: Address) -> eyre::Result<u64> {
        self.process.read_word(address, self.word_size)
    }
}

/// Intermediate value of an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Value {
    /// Machine word, interpreted as signed.
    Int(i64),
    /// Result of a comparison or logical operator.
    Bool(bool),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(value) => write!(f, "{value}"),
            Self::Bool(value) => write!(f, "{value}"),
        }
    }
}

/// Evaluate an expression tree. Logical operators short-circuit.
pub fn evaluate(expr: &Expr, context: &dyn ConditionContext) -> Result<Value, ConditionError> {
    match expr {
        Expr::Literal(value) => Ok(Value::Int(*value)),
        Expr::Register(name) => read_register(name, context).map(Value::Int),
        Expr::Memory(operand) => {
            let address = match operand {
                MemoryOperand::Absolute(address) => *address as u64,
                MemoryOperand::RegisterRelative { register, offset } => {
                    (read_register(register, context)? as u64).wrapping_add(*offset as u64)
                }
            };
            context
                .read_word(Address::new(address))
                .map(|word| Value::Int(word as i64))
                .map_err(|e| ConditionError::evaluation(format!("cannot read {operand}: {e}")))
        }
        Expr::Binary { op: op @ (BinaryOp::And | BinaryOp::Or), left, right } => {
            let left = expect_bool(*op, evaluate(left, context)?)?;
            match (op, left) {
                (BinaryOp::And, false) => Ok(Value::Bool(false)),
                (BinaryOp::Or, true) => Ok(Value::Bool(true)),
                _ => expect_bool(*op, evaluate(right, context)?).map(Value::Bool),
            }
        }
        Expr::Binary { op, left, right } => {
            let left = evaluate(left, context)?;
            let right = evaluate(right, context)?;
            if op.is_comparison() {
                apply_comparison_op(*op, left, right).map(Value::Bool)
            } else {
                apply_arithmetic_op(*op, left, right).map(Value::Int)
            }
        }
    }
}

fn read_register(name: &str, context: &dyn ConditionContext) -> Result<i64, ConditionError> {
    context
        .register(name)
        .map(|value| value as i64)
        .ok_or_else(|| ConditionError::evaluation(format!("undefined register {name}")))
}

fn expect_bool(op: BinaryOp, value: Value) -> Result<bool, ConditionError> {
    match value {
        Value::Bool(value) => Ok(value),
        Value::Int(value) => Err(ConditionError::evaluation(format!(
            "operator {op} requires boolean operands, got integer {value}"
        ))),
    }
}

fn apply_arithmetic_op(op: BinaryOp, left: Value, right: Value) -> Result<i64, ConditionError> {
    let (Value::Int(left), Value::Int(right)) = (left, right) else {
        return Err(ConditionError::evaluation(format!(
            "operator {op} requires integer operands, got {left} and {right}"
        )));
    };
    match op {
        BinaryOp::Add => Ok(left.wrapping_add(right)),
        BinaryOp::Sub => Ok(left.wrapping_sub(right)),
        _ => Err(ConditionError::evaluation(format!("{op} is not an arithmetic operator"))),
    }
}

fn apply_comparison_op(op: BinaryOp, left: Value, right: Value) -> Result<bool, ConditionError> {
    match (left, right) {
        (Value::Int(l), Value::Int(r)) => Ok(match op {
            BinaryOp::Eq => l == r,
            BinaryOp::Ne => l != r,
            BinaryOp::Ge => l >= r,
            BinaryOp::Le => l <= r,
            BinaryOp::Gt => l > r,
            BinaryOp::Lt => l < r,
            _ => return Err(ConditionError::evaluation(format!("{op} is not a comparison"))),
        }),
        (Value::Bool(l), Value::Bool(r)) => match op {
            BinaryOp::Eq => Ok(l == r),
            BinaryOp::Ne => Ok(l != r),
            _ => Err(ConditionError::evaluation(format!("cannot compare booleans with {op}"))),
        },
        _ => Err(ConditionError::evaluation(format!(
            "cannot compare boolean with integer ({left} {op} {right})"
        ))),
    }
}
