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

use super::{
    lexer::{Token, TokenKind},
    BinaryOp, ConditionError, Expr, MemoryOperand,
};

/// Recursive-descent parser over a token stream.
pub(super) struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    end_position: usize,
}

impl<'a> Parser<'a> {
    pub(super) fn new(tokens: &'a [Token], end_position: usize) -> Self {
        Self { tokens, pos: 0, end_position }
    }

    /// Parse a complete expression; trailing tokens are an error.
    pub(super) fn parse(mut self) -> Result<Expr, ConditionError> {
        let expr = self.parse_or()?;
        match self.peek() {
            None => Ok(expr),
            Some(Token { kind: TokenKind::RParen, position }) => {
                Err(ConditionError::parse(*position, "unbalanced parentheses: unexpected ')'"))
            }
            Some(token) => Err(ConditionError::parse(
                token.position,
                format!("unexpected token {:?}", token.kind),
            )),
        }
    }

    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<&'a Token> {
        let token = self.tokens.get(self.pos)?;
        self.pos += 1;
        Some(token)
    }

    fn position(&self) -> usize {
        self.peek().map_or(self.end_position, |t| t.position)
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek().is_some_and(|t| &t.kind == kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn parse_or(&mut self) -> Result<Expr, ConditionError> {
        let mut left = self.parse_and()?;
        while self.eat(&TokenKind::OrOr) {
            let right = self.parse_and()?;
            left = Expr::binary(BinaryOp::Or, left, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ConditionError> {
        let mut left = self.parse_comparison()?;
        while self.eat(&TokenKind::AndAnd) {
            let right = self.parse_comparison()?;
            left = Expr::binary(BinaryOp::And, left, right);
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<Expr, ConditionError> {
        let left = self.parse_sum()?;
        let op = match self.peek().map(|t| &t.kind) {
            Some(TokenKind::EqEq) => BinaryOp::Eq,
            Some(TokenKind::NotEq) => BinaryOp::Ne,
            Some(TokenKind::Ge) => BinaryOp::Ge,
            Some(TokenKind::Le) => BinaryOp::Le,
            Some(TokenKind::Gt) => BinaryOp::Gt,
            Some(TokenKind::Lt) => BinaryOp::Lt,
            _ => return Ok(left),
        };
        self.pos += 1;
        let right = self.parse_sum()?;
        Ok(Expr::binary(op, left, right))
    }

    fn parse_sum(&mut self) -> Result<Expr, ConditionError> {
        let mut left = self.parse_primary()?;
        loop {
            let op = match self.peek().map(|t| &t.kind) {
                Some(TokenKind::Plus) => BinaryOp::Add,
                Some(TokenKind::Minus) => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.parse_primary()?;
            left = Expr::binary(op, left, right);
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, ConditionError> {
        let position = self.position();
        let Some(token) = self.advance() else {
            return Err(ConditionError::parse(position, "missing operand"));
        };

        match &token.kind {
            TokenKind::Number(value) => Ok(Expr::Literal(*value)),
            TokenKind::Ident(name) => Ok(Expr::Register(name.clone())),
            TokenKind::LParen => {
                let inner = self.parse_or()?;
                if !self.eat(&TokenKind::RParen) {
                    return Err(ConditionError::parse(
                        self.position(),
                        "unbalanced parentheses: expected ')'",
                    ));
                }
                Ok(inner)
            }
            TokenKind::LBracket => {
                let operand = self.parse_memory_operand()?;
                if !self.eat(&TokenKind::RBracket) {
                    return Err(ConditionError::parse(
                        self.position(),
                        "unbalanced brackets: expected ']'",
                    ));
                }
                Ok(Expr::Memory(operand))
            }
            TokenKind::Plus | TokenKind::Minus => Err(ConditionError::parse(
                token.position,
                "unary operators are not supported",
            )),
            other => Err(ConditionError::parse(
                token.position,
                format!("missing operand before {other:?}"),
            )),
        }
    }

    fn parse_memory_operand(&mut self) -> Result<MemoryOperand, ConditionError> {
        let position = self.position();
        match self.advance().map(|t| &t.kind) {
            Some(TokenKind::Number(address)) => Ok(MemoryOperand::Absolute(*address)),
            Some(TokenKind::Ident(register)) => {
                let sign: i64 = match self.peek().map(|t| &t.kind) {
                    Some(TokenKind::Plus) => 1,
                    Some(TokenKind::Minus) => -1,
                    _ => {
                        return Ok(MemoryOperand::RegisterRelative {
                            register: register.clone(),
                            offset: 0,
                        })
                    }
                };
                self.pos += 1;
                let offset_position = self.position();
                match self.advance().map(|t| &t.kind) {
                    Some(TokenKind::Number(offset)) => Ok(MemoryOperand::RegisterRelative {
                        register: register.clone(),
                        offset: offset.wrapping_mul(sign),
                    }),
                    _ => Err(ConditionError::parse(
                        offset_position,
                        "expected a numeric offset in memory operand",
                    )),
                }
            }
            _ => Err(ConditionError::parse(
                position,
                "memory operand must be [register], [register +/- offset] or [literal]",
            )),
        }
    }
}
