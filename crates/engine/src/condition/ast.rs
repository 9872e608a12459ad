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

/// Binary operators, in the order of the grammar's precedence levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `>=`
    Ge,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `<`
    Lt,
    /// `&&`
    And,
    /// `||`
    Or,
}

impl BinaryOp {
    /// Whether the operator compares two operands.
    pub fn is_comparison(self) -> bool {
        matches!(self, Self::Eq | Self::Ne | Self::Ge | Self::Le | Self::Gt | Self::Lt)
    }

    /// Whether the operator combines two booleans.
    pub fn is_logical(self) -> bool {
        matches!(self, Self::And | Self::Or)
    }

    /// Source form of the operator.
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Ge => ">=",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Lt => "<",
            Self::And => "&&",
            Self::Or => "||",
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Address operand of a memory dereference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MemoryOperand {
    /// `[literal]`
    Absolute(i64),
    /// `[register + offset]` or `[register - offset]`
    RegisterRelative {
        /// Base register.
        register: String,
        /// Signed displacement.
        offset: i64,
    },
}

impl fmt::Display for MemoryOperand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Absolute(address) => write!(f, "[{:#x}]", *address as u64),
            Self::RegisterRelative { register, offset: 0 } => write!(f, "[{register}]"),
            Self::RegisterRelative { register, offset } if *offset < 0 => {
                write!(f, "[{register}-{}]", offset.unsigned_abs())
            }
            Self::RegisterRelative { register, offset } => write!(f, "[{register}+{offset}]"),
        }
    }
}

/// Condition expression tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Expr {
    /// Value of a register of the trapping thread.
    Register(String),
    /// Integer literal (decimal or `0x` hexadecimal).
    Literal(i64),
    /// Machine word read from debuggee memory.
    Memory(MemoryOperand),
    /// Binary operation.
    Binary {
        /// Operator.
        op: BinaryOp,
        /// Left operand.
        left: Box<Self>,
        /// Right operand.
        right: Box<Self>,
    },
}

impl Expr {
    /// Build a binary node.
    pub fn binary(op: BinaryOp, left: Self, right: Self) -> Self {
        Self::Binary { op, left: Box::new(left), right: Box::new(right) }
    }

    /// Whether the expression syntactically produces a boolean.
    pub fn yields_boolean(&self) -> bool {
        matches!(self, Self::Binary { op, .. } if op.is_comparison() || op.is_logical())
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Register(name) => f.write_str(name),
            Self::Literal(value) => write!(f, "{value}"),
            Self::Memory(operand) => write!(f, "{operand}"),
            Self::Binary { op, left, right } => write!(f, "({left} {op} {right})"),
        }
    }
}
