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

use super::ConditionError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum TokenKind {
    Ident(String),
    Number(i64),
    Plus,
    Minus,
    EqEq,
    NotEq,
    Ge,
    Le,
    Gt,
    Lt,
    AndAnd,
    OrOr,
    LParen,
    RParen,
    LBracket,
    RBracket,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct Token {
    pub(super) kind: TokenKind,
    pub(super) position: usize,
}

/// Split condition text into tokens. Whitespace separates tokens and is otherwise ignored.
pub(super) fn tokenize(input: &str) -> Result<Vec<Token>, ConditionError> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let c = bytes[pos];
        if c.is_ascii_whitespace() {
            pos += 1;
            continue;
        }

        let start = pos;
        let next = bytes.get(pos + 1).copied();
        let (kind, len) = match c {
            b'+' => (TokenKind::Plus, 1),
            b'-' => (TokenKind::Minus, 1),
            b'(' => (TokenKind::LParen, 1),
            b')' => (TokenKind::RParen, 1),
            b'[' => (TokenKind::LBracket, 1),
            b']' => (TokenKind::RBracket, 1),
            b'=' if next == Some(b'=') => (TokenKind::EqEq, 2),
            b'!' if next == Some(b'=') => (TokenKind::NotEq, 2),
            b'>' if next == Some(b'=') => (TokenKind::Ge, 2),
            b'<' if next == Some(b'=') => (TokenKind::Le, 2),
            b'>' => (TokenKind::Gt, 1),
            b'<' => (TokenKind::Lt, 1),
            b'&' if next == Some(b'&') => (TokenKind::AndAnd, 2),
            b'|' if next == Some(b'|') => (TokenKind::OrOr, 2),
            b'0'..=b'9' => lex_number(input, start)?,
            c if c.is_ascii_alphabetic() || c == b'_' => {
                let len = bytes[start..]
                    .iter()
                    .take_while(|b| b.is_ascii_alphanumeric() || **b == b'_')
                    .count();
                (TokenKind::Ident(input[start..start + len].to_string()), len)
            }
            b'=' => return Err(ConditionError::parse(start, "unexpected '=', expected '=='")),
            _ => {
                let ch = input[start..].chars().next().unwrap_or('?');
                return Err(ConditionError::parse(start, format!("unexpected character {ch:?}")));
            }
        };

        tokens.push(Token { kind, position: start });
        pos += len;
    }

    Ok(tokens)
}

fn lex_number(input: &str, start: usize) -> Result<(TokenKind, usize), ConditionError> {
    let rest = &input[start..];
    let (digits, radix, prefix) = match rest.strip_prefix("0x").or_else(|| rest.strip_prefix("0X")) {
        Some(hex) => (hex, 16, 2),
        None => (rest, 10, 0),
    };
    let len = digits.bytes().take_while(|b| b.is_ascii_alphanumeric() || *b == b'_').count();
    let text = &digits[..len];
    let value = u64::from_str_radix(text, radix)
        .map_err(|e| ConditionError::parse(start, format!("invalid number {:?}: {e}", &rest[..prefix + len])))?;
    // Literals are machine words; wrap large unsigned values into the signed domain.
    Ok((TokenKind::Number(value as i64), prefix + len))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        tokenize(input).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_tokenize_operators() {
        assert_eq!(
            kinds("a==b!=c>=d<=e>f<g&&h||i+j-k"),
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::EqEq,
                TokenKind::Ident("b".into()),
                TokenKind::NotEq,
                TokenKind::Ident("c".into()),
                TokenKind::Ge,
                TokenKind::Ident("d".into()),
                TokenKind::Le,
                TokenKind::Ident("e".into()),
                TokenKind::Gt,
                TokenKind::Ident("f".into()),
                TokenKind::Lt,
                TokenKind::Ident("g".into()),
                TokenKind::AndAnd,
                TokenKind::Ident("h".into()),
                TokenKind::OrOr,
                TokenKind::Ident("i".into()),
                TokenKind::Plus,
                TokenKind::Ident("j".into()),
                TokenKind::Minus,
                TokenKind::Ident("k".into()),
            ]
        );
    }

    #[test]
    fn test_tokenize_numbers() {
        assert_eq!(kinds("42"), vec![TokenKind::Number(42)]);
        assert_eq!(kinds("0x2A"), vec![TokenKind::Number(42)]);
        assert_eq!(kinds("0xffffffffffffffff"), vec![TokenKind::Number(-1)]);
        assert!(tokenize("12abc").is_err());
        assert!(tokenize("0x").is_err());
    }

    #[test]
    fn test_tokenize_positions() {
        let tokens = tokenize("  [r2 + 4]").unwrap();
        let positions: Vec<_> = tokens.iter().map(|t| t.position).collect();
        assert_eq!(positions, vec![2, 3, 6, 8, 9]);
    }

    #[test]
    fn test_tokenize_rejects_stray_characters() {
        assert!(matches!(tokenize("a = b"), Err(ConditionError::Parse { position: 2, .. })));
        assert!(matches!(tokenize("a & b"), Err(ConditionError::Parse { position: 2, .. })));
        assert!(matches!(tokenize("!a"), Err(ConditionError::Parse { position: 0, .. })));
        assert!(tokenize("a ; b").is_err());
    }
}
