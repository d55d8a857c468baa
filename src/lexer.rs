//! Incremental CSV lexer.
//!
//! The lexer consumes a growing character buffer and emits unified field
//! tokens, carrying state across calls so that a quoted field, a CRLF pair
//! or a multi-character delimiter may straddle feed boundaries. In stream
//! mode a suffix whose interpretation is ambiguous (a trailing CR, a proper
//! prefix of the delimiter, an unclosed quoted field) is withheld until more
//! input arrives; `flush` resolves the remainder and closes the lexer.

use crate::cancel;
use crate::error::{CsvError, ErrorContext, Result};
use crate::options::{LexerOptions, Limit};
use crate::token::{Position, Token, TokenFollows, TokenLocation};

/// Lexer state for CSV parsing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LexerState {
    /// At the start of a field
    FieldStart,
    /// Inside an unquoted field
    InField,
    /// Inside a quoted field
    InQuotedField,
    /// After a quote inside a quoted field (could be end or escaped quote)
    AfterQuote,
}

/// Outcome of matching a separator sequence against the buffered tail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SeqMatch {
    Full,
    /// The tail ends in the middle of the sequence; more input could
    /// complete the match.
    Partial,
    No,
}

fn match_seq(buf: &[char], at: usize, seq: &[char]) -> SeqMatch {
    let available = buf.len() - at;
    let n = seq.len().min(available);
    if buf[at..at + n] != seq[..n] {
        return SeqMatch::No;
    }
    if n == seq.len() {
        SeqMatch::Full
    } else {
        SeqMatch::Partial
    }
}

fn utf16_units(s: &str) -> usize {
    s.chars().map(char::len_utf16).sum()
}

/// Streaming CSV tokenizer over character input.
///
/// Single-shot: feed zero or more chunks, then flush. Neither call may be
/// issued after a flush or after a fatal error.
#[derive(Debug)]
pub struct CsvLexer {
    state: LexerState,
    delimiter: Vec<char>,
    quotation: Vec<char>,
    max_buffer_size: Limit,
    max_field_size: Limit,
    track_location: bool,
    source: Option<String>,
    signal: Option<crate::cancel::CancelToken>,

    /// Unconsumed tail carried across feed boundaries.
    buf: Vec<char>,
    /// UTF-16 size of `buf`.
    buf_units: usize,
    /// Field value being accumulated.
    field: String,
    /// UTF-16 size of `field`.
    field_units: usize,

    /// Position of the next unconsumed character.
    position: Position,
    /// Start position of the field being accumulated.
    token_start: Position,
    /// Logical row number (quoted newlines do not advance it).
    row_number: u64,
    /// The previous token ended with a field separator, so a trailing empty
    /// field is pending at flush.
    after_field_sep: bool,

    finished: bool,
}

impl CsvLexer {
    pub fn new(options: LexerOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            state: LexerState::FieldStart,
            delimiter: options.delimiter.chars().collect(),
            quotation: options.quotation.chars().collect(),
            max_buffer_size: options.max_buffer_size,
            max_field_size: options.max_field_size,
            track_location: options.track_location,
            source: options.source,
            signal: options.signal,
            buf: Vec::new(),
            buf_units: 0,
            field: String::new(),
            field_units: 0,
            position: Position::start(),
            token_start: Position::start(),
            row_number: 1,
            after_field_sep: false,
            finished: false,
        })
    }

    /// Feed a chunk in stream mode and collect the tokens it completes.
    pub fn feed(&mut self, chunk: &str) -> Result<Vec<Token>> {
        cancel::check(self.signal.as_ref())?;
        self.ensure_open()?;
        let result = self.feed_inner(chunk);
        if result.is_err() {
            self.finished = true;
        }
        result
    }

    fn feed_inner(&mut self, chunk: &str) -> Result<Vec<Token>> {
        let added = utf16_units(chunk);
        if let Limit::Bounded(limit) = self.max_buffer_size {
            if self.buf_units + self.field_units + added > limit {
                return Err(CsvError::BufferExceeded {
                    limit,
                    ctx: self.context(),
                });
            }
        }
        self.buf.extend(chunk.chars());
        self.buf_units += added;

        self.scan(true)
    }

    /// Resolve any withheld input, emit the final field and close the lexer.
    ///
    /// Fails with [`CsvError::UnexpectedEof`] if the input ends inside a
    /// quoted field.
    pub fn flush(&mut self) -> Result<Vec<Token>> {
        cancel::check(self.signal.as_ref())?;
        self.ensure_open()?;

        let scanned = self.scan(false);
        self.finished = true;
        let mut tokens = scanned?;
        debug_assert!(self.buf.is_empty());

        match self.state {
            LexerState::InQuotedField => {
                return Err(CsvError::UnexpectedEof {
                    ctx: self.context(),
                });
            }
            LexerState::InField | LexerState::AfterQuote => {
                self.emit(&mut tokens, TokenFollows::RecordSep, 0);
            }
            LexerState::FieldStart => {
                // "a," flushes to ["a", ""]: a dangling field separator
                // implies one trailing empty field.
                if self.after_field_sep {
                    self.token_start = self.position;
                    self.emit(&mut tokens, TokenFollows::RecordSep, 0);
                }
            }
        }
        Ok(tokens)
    }

    /// Combined entry point mirroring the streaming API shape: a chunk with
    /// `stream = true` feeds, a missing chunk or `stream = false` flushes.
    pub fn lex(&mut self, chunk: Option<&str>, stream: bool) -> Result<Vec<Token>> {
        match (chunk, stream) {
            (Some(chunk), true) => self.feed(chunk),
            (Some(chunk), false) => {
                let mut tokens = self.feed(chunk)?;
                tokens.extend(self.flush()?);
                Ok(tokens)
            }
            (None, _) => self.flush(),
        }
    }

    /// Current logical row number.
    pub fn row_number(&self) -> u64 {
        self.row_number
    }

    fn ensure_open(&self) -> Result<()> {
        if self.finished {
            return Err(CsvError::invalid_option(
                "lexer is closed (already flushed or failed)",
            ));
        }
        Ok(())
    }

    fn context(&self) -> ErrorContext {
        ErrorContext::at(
            self.source.as_deref(),
            self.row_number,
            self.position.line,
            self.position.column,
            self.position.offset,
        )
    }

    /// Run the state machine over the buffered tail. With `stream = true`
    /// an ambiguous suffix is withheld; with `stream = false` the whole
    /// buffer is consumed and partial separator matches are literal text.
    fn scan(&mut self, stream: bool) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();
        let mut cursor = 0usize;

        'scan: while cursor < self.buf.len() {
            match self.state {
                LexerState::FieldStart => {
                    match match_seq(&self.buf, cursor, &self.quotation) {
                        SeqMatch::Full => {
                            self.token_start = self.position;
                            self.consume_n(&mut cursor, self.quotation.len());
                            self.state = LexerState::InQuotedField;
                            continue;
                        }
                        SeqMatch::Partial if stream => break 'scan,
                        _ => {}
                    }
                    match match_seq(&self.buf, cursor, &self.delimiter) {
                        SeqMatch::Full => {
                            self.token_start = self.position;
                            let sep_len = self.delimiter.len() as u8;
                            self.emit(&mut tokens, TokenFollows::FieldSep, sep_len);
                            self.consume_n(&mut cursor, self.delimiter.len());
                            continue;
                        }
                        SeqMatch::Partial if stream => break 'scan,
                        _ => {}
                    }
                    let ch = self.buf[cursor];
                    if ch == '\r' {
                        let Some(sep_len) = self.measure_newline(cursor, stream) else {
                            break 'scan;
                        };
                        self.token_start = self.position;
                        self.emit(&mut tokens, TokenFollows::RecordSep, sep_len);
                        self.consume_n(&mut cursor, sep_len as usize);
                    } else if ch == '\n' {
                        self.token_start = self.position;
                        self.emit(&mut tokens, TokenFollows::RecordSep, 1);
                        self.consume_n(&mut cursor, 1);
                    } else {
                        self.token_start = self.position;
                        self.consume_n(&mut cursor, 1);
                        self.push_field_char(ch)?;
                        self.state = LexerState::InField;
                    }
                }
                LexerState::InField => {
                    match match_seq(&self.buf, cursor, &self.delimiter) {
                        SeqMatch::Full => {
                            let sep_len = self.delimiter.len() as u8;
                            self.emit(&mut tokens, TokenFollows::FieldSep, sep_len);
                            self.consume_n(&mut cursor, self.delimiter.len());
                            self.state = LexerState::FieldStart;
                            continue;
                        }
                        SeqMatch::Partial if stream => break 'scan,
                        _ => {}
                    }
                    let ch = self.buf[cursor];
                    if ch == '\r' {
                        let Some(sep_len) = self.measure_newline(cursor, stream) else {
                            break 'scan;
                        };
                        self.emit(&mut tokens, TokenFollows::RecordSep, sep_len);
                        self.consume_n(&mut cursor, sep_len as usize);
                        self.state = LexerState::FieldStart;
                    } else if ch == '\n' {
                        self.emit(&mut tokens, TokenFollows::RecordSep, 1);
                        self.consume_n(&mut cursor, 1);
                        self.state = LexerState::FieldStart;
                    } else {
                        self.consume_n(&mut cursor, 1);
                        self.push_field_char(ch)?;
                    }
                }
                LexerState::InQuotedField => {
                    match match_seq(&self.buf, cursor, &self.quotation) {
                        SeqMatch::Full => {
                            self.consume_n(&mut cursor, self.quotation.len());
                            self.state = LexerState::AfterQuote;
                        }
                        SeqMatch::Partial if stream => break 'scan,
                        _ => {
                            // Everything is literal inside quotes, CR and LF
                            // included.
                            let ch = self.buf[cursor];
                            self.consume_n(&mut cursor, 1);
                            self.push_field_char(ch)?;
                        }
                    }
                }
                LexerState::AfterQuote => {
                    match match_seq(&self.buf, cursor, &self.quotation) {
                        SeqMatch::Full => {
                            // Escaped quote: a doubled quotation collapses
                            // to one literal quotation.
                            self.consume_n(&mut cursor, self.quotation.len());
                            let quotation: String = self.quotation.iter().collect();
                            for ch in quotation.chars() {
                                self.push_field_char(ch)?;
                            }
                            self.state = LexerState::InQuotedField;
                            continue;
                        }
                        SeqMatch::Partial if stream => break 'scan,
                        _ => {}
                    }
                    match match_seq(&self.buf, cursor, &self.delimiter) {
                        SeqMatch::Full => {
                            let sep_len = self.delimiter.len() as u8;
                            self.emit(&mut tokens, TokenFollows::FieldSep, sep_len);
                            self.consume_n(&mut cursor, self.delimiter.len());
                            self.state = LexerState::FieldStart;
                            continue;
                        }
                        SeqMatch::Partial if stream => break 'scan,
                        _ => {}
                    }
                    let ch = self.buf[cursor];
                    if ch == '\r' {
                        let Some(sep_len) = self.measure_newline(cursor, stream) else {
                            break 'scan;
                        };
                        self.emit(&mut tokens, TokenFollows::RecordSep, sep_len);
                        self.consume_n(&mut cursor, sep_len as usize);
                        self.state = LexerState::FieldStart;
                    } else if ch == '\n' {
                        self.emit(&mut tokens, TokenFollows::RecordSep, 1);
                        self.consume_n(&mut cursor, 1);
                        self.state = LexerState::FieldStart;
                    } else {
                        return Err(CsvError::StrayQuote {
                            found: ch,
                            ctx: self.context(),
                        });
                    }
                }
            }
        }

        self.buf.drain(..cursor);
        Ok(tokens)
    }

    /// Record-separator length starting at a CR: 2 for CRLF, 1 for a lone
    /// CR. `None` means the CR is the last buffered character and must be
    /// withheld until the next chunk disambiguates it.
    fn measure_newline(&self, cursor: usize, stream: bool) -> Option<u8> {
        if cursor + 1 < self.buf.len() {
            Some(if self.buf[cursor + 1] == '\n' { 2 } else { 1 })
        } else if stream {
            None
        } else {
            Some(1)
        }
    }

    fn consume_n(&mut self, cursor: &mut usize, n: usize) {
        for _ in 0..n {
            let ch = self.buf[*cursor];
            *cursor += 1;
            self.buf_units -= ch.len_utf16();
            self.position.advance(ch);
        }
    }

    fn push_field_char(&mut self, ch: char) -> Result<()> {
        let units = ch.len_utf16();
        if let Limit::Bounded(limit) = self.max_field_size {
            if self.field_units + units > limit {
                return Err(CsvError::FieldTooLarge {
                    limit,
                    ctx: self.context(),
                });
            }
        }
        self.field.push(ch);
        self.field_units += units;
        Ok(())
    }

    /// Emit the accumulated field. The caller has not yet consumed the
    /// separator, so `self.position` is the exclusive end of the content.
    fn emit(&mut self, tokens: &mut Vec<Token>, follows: TokenFollows, sep_len: u8) {
        let location = self.track_location.then(|| TokenLocation {
            start: self.token_start,
            end: self.position,
            row_number: self.row_number,
        });
        let value = std::mem::take(&mut self.field);
        self.field_units = 0;
        tokens.push(Token {
            value,
            follows,
            sep_len,
            location,
        });
        match follows {
            TokenFollows::FieldSep => self.after_field_sep = true,
            TokenFollows::RecordSep => {
                self.after_field_sep = false;
                if sep_len > 0 {
                    self.row_number += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CsvErrorKind;

    fn lex_all(input: &str) -> Vec<Token> {
        lex_all_with(input, LexerOptions::default())
    }

    fn lex_all_with(input: &str, options: LexerOptions) -> Vec<Token> {
        let mut lexer = CsvLexer::new(options).unwrap();
        let mut tokens = lexer.feed(input).unwrap();
        tokens.extend(lexer.flush().unwrap());
        tokens
    }

    fn values(tokens: &[Token]) -> Vec<&str> {
        tokens.iter().map(|t| t.value.as_str()).collect()
    }

    #[test]
    fn test_simple_row() {
        let tokens = lex_all("a,b,c\n");
        assert_eq!(values(&tokens), vec!["a", "b", "c"]);
        assert_eq!(tokens[0].follows, TokenFollows::FieldSep);
        assert_eq!(tokens[2].follows, TokenFollows::RecordSep);
        assert_eq!(tokens[2].sep_len, 1);
    }

    #[test]
    fn test_unified_token_count_equals_field_count() {
        // Two rows of three fields -> exactly six tokens.
        let tokens = lex_all("a,b,c\n1,2,3\n");
        assert_eq!(tokens.len(), 6);
    }

    #[test]
    fn test_empty_fields() {
        let tokens = lex_all(",,\n");
        assert_eq!(values(&tokens), vec!["", "", ""]);
    }

    #[test]
    fn test_trailing_delimiter_implies_empty_field() {
        let mut lexer = CsvLexer::new(LexerOptions::default()).unwrap();
        let mut tokens = lexer.feed("a,").unwrap();
        tokens.extend(lexer.flush().unwrap());
        assert_eq!(values(&tokens), vec!["a", ""]);
        assert_eq!(tokens[1].follows, TokenFollows::RecordSep);
        assert_eq!(tokens[1].sep_len, 0);
    }

    #[test]
    fn test_quoted_field_with_delimiter_and_newline() {
        let tokens = lex_all("\"hello, world\",\"line\nbreak\"\n");
        assert_eq!(values(&tokens), vec!["hello, world", "line\nbreak"]);
    }

    #[test]
    fn test_escaped_quotes() {
        let tokens = lex_all("\"He said \"\"hi\"\"\",2\n");
        assert_eq!(values(&tokens), vec!["He said \"hi\"", "2"]);
    }

    #[test]
    fn test_quote_inside_unquoted_field_is_literal() {
        let tokens = lex_all("ab\"cd\n");
        assert_eq!(values(&tokens), vec!["ab\"cd"]);
    }

    #[test]
    fn test_crlf_and_cr_only() {
        let tokens = lex_all("a\r\nb\rc\n");
        assert_eq!(values(&tokens), vec!["a", "b", "c"]);
        assert_eq!(tokens[0].sep_len, 2);
        assert_eq!(tokens[1].sep_len, 1);
    }

    #[test]
    fn test_trailing_cr_is_withheld_until_next_chunk() {
        let mut lexer = CsvLexer::new(LexerOptions::default()).unwrap();
        let tokens = lexer.feed("a\r").unwrap();
        assert!(tokens.is_empty());
        let tokens = lexer.feed("\nb").unwrap();
        assert_eq!(values(&tokens), vec!["a"]);
        assert_eq!(tokens[0].sep_len, 2);
        let tokens = lexer.flush().unwrap();
        assert_eq!(values(&tokens), vec!["b"]);
    }

    #[test]
    fn test_trailing_cr_at_flush_is_a_lone_cr() {
        let mut lexer = CsvLexer::new(LexerOptions::default()).unwrap();
        let mut tokens = lexer.feed("a\r").unwrap();
        tokens.extend(lexer.flush().unwrap());
        assert_eq!(values(&tokens), vec!["a"]);
        assert_eq!(tokens[0].sep_len, 1);
    }

    #[test]
    fn test_quoted_field_across_chunks() {
        let mut lexer = CsvLexer::new(LexerOptions::default()).unwrap();
        let tokens = lexer.feed("\"ab").unwrap();
        assert!(tokens.is_empty());
        let tokens = lexer.feed("cd\",x\n").unwrap();
        assert_eq!(values(&tokens), vec!["abcd", "x"]);
    }

    #[test]
    fn test_multi_char_delimiter() {
        let options = LexerOptions {
            delimiter: "||".to_string(),
            ..Default::default()
        };
        let tokens = lex_all_with("a||b\n", options);
        assert_eq!(values(&tokens), vec!["a", "b"]);
    }

    #[test]
    fn test_multi_char_delimiter_across_chunks() {
        let options = LexerOptions {
            delimiter: "||".to_string(),
            ..Default::default()
        };
        let mut lexer = CsvLexer::new(options).unwrap();
        let tokens = lexer.feed("a|").unwrap();
        assert!(tokens.is_empty(), "prefix of delimiter must be withheld");
        let mut tokens = lexer.feed("|b").unwrap();
        tokens.extend(lexer.flush().unwrap());
        assert_eq!(values(&tokens), vec!["a", "b"]);
    }

    #[test]
    fn test_partial_delimiter_at_flush_is_literal() {
        let options = LexerOptions {
            delimiter: "||".to_string(),
            ..Default::default()
        };
        let mut lexer = CsvLexer::new(options).unwrap();
        let mut tokens = lexer.feed("a|").unwrap();
        tokens.extend(lexer.flush().unwrap());
        assert_eq!(values(&tokens), vec!["a|"]);
    }

    #[test]
    fn test_unexpected_eof_in_quoted_field() {
        let mut lexer = CsvLexer::new(LexerOptions::default()).unwrap();
        lexer.feed("a\n\"unterminated").unwrap();
        let err = lexer.flush().unwrap_err();
        assert_eq!(err.kind(), CsvErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_stray_quote() {
        let mut lexer = CsvLexer::new(LexerOptions::default()).unwrap();
        let err = lexer.feed("\"ab\"x").unwrap_err();
        assert_eq!(err.kind(), CsvErrorKind::StrayQuote);
    }

    #[test]
    fn test_field_too_large() {
        let options = LexerOptions {
            max_field_size: Limit::Bounded(4),
            ..Default::default()
        };
        let mut lexer = CsvLexer::new(options).unwrap();
        let err = lexer.feed("abcdef").unwrap_err();
        assert_eq!(err.kind(), CsvErrorKind::FieldTooLarge);
    }

    #[test]
    fn test_buffer_exceeded_instead_of_growing() {
        let options = LexerOptions {
            max_buffer_size: Limit::Bounded(8),
            ..Default::default()
        };
        let mut lexer = CsvLexer::new(options).unwrap();
        // An unclosed quoted field accumulates; the next chunk would push
        // the held data over the bound.
        lexer.feed("\"abcde").unwrap();
        let err = lexer.feed("fghij").unwrap_err();
        assert_eq!(err.kind(), CsvErrorKind::BufferExceeded);
    }

    #[test]
    fn test_error_message_carries_source() {
        let options = LexerOptions {
            source: Some("input.csv".to_string()),
            ..Default::default()
        };
        let mut lexer = CsvLexer::new(options).unwrap();
        lexer.feed("\"open").unwrap();
        let err = lexer.flush().unwrap_err();
        assert!(err.to_string().contains("input.csv"));
    }

    #[test]
    fn test_row_number_ignores_quoted_newlines() {
        let mut lexer = CsvLexer::new(LexerOptions::default()).unwrap();
        lexer.feed("\"a\nb\"\nnext\n").unwrap();
        // One quoted newline plus two record separators -> row 3.
        assert_eq!(lexer.row_number(), 3);
    }

    #[test]
    fn test_locations_track_rows_and_sep_len() {
        let options = LexerOptions {
            track_location: true,
            ..Default::default()
        };
        let tokens = lex_all_with("a,b\r\n1,2\r\n", options);
        let locations: Vec<_> = tokens.iter().map(|t| t.location.unwrap()).collect();
        assert_eq!(locations[0].row_number, 1);
        assert_eq!(locations[2].row_number, 2);
        assert_eq!(tokens[1].sep_len, 2);
        assert_eq!(tokens[3].sep_len, 2);
        // Offsets never move backwards.
        let offsets: Vec<_> = locations.iter().map(|l| l.start.offset).collect();
        let mut sorted = offsets.clone();
        sorted.sort_unstable();
        assert_eq!(offsets, sorted);
    }

    #[test]
    fn test_location_line_advances_inside_quoted_field() {
        let options = LexerOptions {
            track_location: true,
            ..Default::default()
        };
        let tokens = lex_all_with("\"a\nb\",c\n", options);
        let loc = tokens[0].location.unwrap();
        assert_eq!(loc.start.line, 1);
        assert_eq!(loc.end.line, 2);
        assert_eq!(loc.row_number, 1);
    }

    #[test]
    fn test_feed_after_flush_is_rejected() {
        let mut lexer = CsvLexer::new(LexerOptions::default()).unwrap();
        lexer.flush().unwrap();
        assert!(lexer.feed("a").is_err());
    }

    #[test]
    fn test_cancelled_signal_is_observed() {
        let signal = crate::cancel::CancelToken::new();
        let options = LexerOptions {
            signal: Some(signal.clone()),
            ..Default::default()
        };
        let mut lexer = CsvLexer::new(options).unwrap();
        signal.cancel("user abort");
        let err = lexer.feed("a,b\n").unwrap_err();
        assert_eq!(err.kind(), CsvErrorKind::Cancelled);
        assert!(err.to_string().contains("user abort"));
    }

    #[test]
    fn test_empty_quoted_field_at_eof() {
        let mut lexer = CsvLexer::new(LexerOptions::default()).unwrap();
        let mut tokens = lexer.feed("a,\"\"").unwrap();
        tokens.extend(lexer.flush().unwrap());
        assert_eq!(values(&tokens), vec!["a", ""]);
    }
}
