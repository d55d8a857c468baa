//! Token and position types shared by the lexer and the record assembler.
//!
//! Two token representations are supported. The unified form emits one token
//! per field and encodes the trailing separator inline, which halves token
//! count. The legacy triple form emits explicit `Field`, `FieldDelimiter`
//! and `RecordDelimiter` tokens. The two are interconvertible via
//! [`Token::into_legacy`] and [`tokens_from_legacy`].

use serde::Serialize;

/// Position in the input.
///
/// `line` and `column` are 1-based; `offset` is 0-based. `column` and
/// `offset` count Unicode scalar values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Position {
    pub line: u64,
    pub column: u64,
    pub offset: u64,
}

impl Position {
    pub(crate) fn start() -> Self {
        Self {
            line: 1,
            column: 1,
            offset: 0,
        }
    }

    /// Advance past one scalar value. `\n` starts a new physical line.
    pub(crate) fn advance(&mut self, ch: char) {
        self.offset += 1;
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
    }
}

/// Span of a token, including the logical CSV row it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TokenLocation {
    pub start: Position,
    /// Exclusive end of the field content (the separator is not included).
    pub end: Position,
    /// Logical row number (1-based). A quoted newline does not advance it.
    pub row_number: u64,
}

/// What terminated a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TokenFollows {
    /// The field was followed by the configured delimiter.
    FieldSep,
    /// The field was followed by a record separator (CR, LF or CRLF), or by
    /// end of input (`sep_len == 0`).
    RecordSep,
}

/// Unified field token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub value: String,
    pub follows: TokenFollows,
    /// Length of the trailing separator in scalar values: the delimiter
    /// length for [`TokenFollows::FieldSep`], 1 (CR or LF) or 2 (CRLF) for a
    /// record separator, and 0 when end of input closed the record.
    pub sep_len: u8,
    pub location: Option<TokenLocation>,
}

impl Token {
    /// Expand into the legacy triple representation. Yields the `Field`
    /// token and, unless end of input closed the record, the separator
    /// token that followed it.
    pub fn into_legacy(self, delimiter: &str) -> impl Iterator<Item = LegacyToken> {
        let location = self.location;
        let sep = if self.sep_len == 0 {
            None
        } else {
            let (kind, value) = match self.follows {
                TokenFollows::FieldSep => (LegacyTokenKind::FieldDelimiter, delimiter.to_owned()),
                TokenFollows::RecordSep => (
                    LegacyTokenKind::RecordDelimiter,
                    if self.sep_len == 2 { "\r\n" } else { "\n" }.to_owned(),
                ),
            };
            Some(LegacyToken {
                kind,
                value,
                location,
            })
        };
        std::iter::once(LegacyToken {
            kind: LegacyTokenKind::Field,
            value: self.value,
            location,
        })
        .chain(sep)
    }
}

/// Kind tag of the legacy triple representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LegacyTokenKind {
    Field,
    FieldDelimiter,
    RecordDelimiter,
}

/// Legacy triple token: explicit separator tokens between field tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyToken {
    pub kind: LegacyTokenKind,
    pub value: String,
    pub location: Option<TokenLocation>,
}

/// Fold a legacy token sequence back into unified field tokens.
///
/// A trailing `Field` token with no following separator becomes a unified
/// token with `sep_len == 0`. Consecutive separator tokens imply empty
/// fields, matching the assembler's interpretation of the triple form.
pub fn tokens_from_legacy<I>(legacy: I) -> Vec<Token>
where
    I: IntoIterator<Item = LegacyToken>,
{
    let mut out = Vec::new();
    let mut pending: Option<LegacyToken> = None;

    for token in legacy {
        match token.kind {
            LegacyTokenKind::Field => {
                if let Some(field) = pending.take() {
                    // Two field tokens in a row: the first was never
                    // terminated, treat it as closed by end of record.
                    out.push(Token {
                        value: field.value,
                        follows: TokenFollows::RecordSep,
                        sep_len: 0,
                        location: field.location,
                    });
                }
                pending = Some(token);
            }
            LegacyTokenKind::FieldDelimiter | LegacyTokenKind::RecordDelimiter => {
                let field = pending.take().unwrap_or(LegacyToken {
                    kind: LegacyTokenKind::Field,
                    value: String::new(),
                    location: token.location,
                });
                let follows = if token.kind == LegacyTokenKind::FieldDelimiter {
                    TokenFollows::FieldSep
                } else {
                    TokenFollows::RecordSep
                };
                out.push(Token {
                    value: field.value,
                    follows,
                    sep_len: token.value.chars().count().min(u8::MAX as usize) as u8,
                    location: field.location,
                });
            }
        }
    }

    if let Some(field) = pending {
        out.push(Token {
            value: field.value,
            follows: TokenFollows::RecordSep,
            sep_len: 0,
            location: field.location,
        });
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(value: &str, follows: TokenFollows, sep_len: u8) -> Token {
        Token {
            value: value.to_string(),
            follows,
            sep_len,
            location: None,
        }
    }

    #[test]
    fn test_unified_to_legacy() {
        let legacy: Vec<_> = field("a", TokenFollows::FieldSep, 1)
            .into_legacy(",")
            .collect();
        assert_eq!(legacy.len(), 2);
        assert_eq!(legacy[0].kind, LegacyTokenKind::Field);
        assert_eq!(legacy[0].value, "a");
        assert_eq!(legacy[1].kind, LegacyTokenKind::FieldDelimiter);
        assert_eq!(legacy[1].value, ",");
    }

    #[test]
    fn test_eof_field_has_no_separator_token() {
        let legacy: Vec<_> = field("tail", TokenFollows::RecordSep, 0)
            .into_legacy(",")
            .collect();
        assert_eq!(legacy.len(), 1);
        assert_eq!(legacy[0].kind, LegacyTokenKind::Field);
    }

    #[test]
    fn test_legacy_round_trip() {
        let unified = vec![
            field("a", TokenFollows::FieldSep, 1),
            field("b", TokenFollows::RecordSep, 2),
            field("c", TokenFollows::RecordSep, 0),
        ];
        let legacy: Vec<_> = unified
            .iter()
            .cloned()
            .flat_map(|t| t.into_legacy(","))
            .collect();
        // a , b \r\n c  ->  5 legacy tokens
        assert_eq!(legacy.len(), 5);
        let back = tokens_from_legacy(legacy);
        assert_eq!(back, unified);
    }

    #[test]
    fn test_legacy_separator_without_field_is_empty_field() {
        let legacy = vec![LegacyToken {
            kind: LegacyTokenKind::FieldDelimiter,
            value: ",".to_string(),
            location: None,
        }];
        let unified = tokens_from_legacy(legacy);
        assert_eq!(unified.len(), 1);
        assert_eq!(unified[0].value, "");
        assert_eq!(unified[0].follows, TokenFollows::FieldSep);
    }

    #[test]
    fn test_position_advance() {
        let mut pos = Position::start();
        pos.advance('a');
        assert_eq!((pos.line, pos.column, pos.offset), (1, 2, 1));
        pos.advance('\n');
        assert_eq!((pos.line, pos.column, pos.offset), (2, 1, 2));
    }
}
