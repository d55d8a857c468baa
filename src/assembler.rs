//! Record assembler: converts a token stream into records.
//!
//! The assembler owns header capture (inferred, explicit or headerless) and
//! the column-count policy. It is format-agnostic over where the tokens came
//! from — the character lexer, the binary lexer and the indexer all feed the
//! same assembler, which is what keeps the engine's front ends equivalent.

use std::sync::Arc;

use crate::cancel;
use crate::error::{CsvError, ErrorContext, Result};
use crate::options::{AssemblerOptions, ColumnCountStrategy, Limit, OutputFormat};
use crate::record::{ObjectRecord, Record};
use crate::token::{Token, TokenFollows};

/// Stateful aggregator from tokens to records.
///
/// Single-shot: feed zero or more tokens, then flush. The header, once set,
/// is immutable for the life of the instance.
#[derive(Debug)]
pub struct RecordAssembler {
    output_format: OutputFormat,
    strategy: ColumnCountStrategy,
    include_header: bool,
    skip_empty_lines: bool,
    max_field_count: Limit,
    source: Option<String>,
    signal: Option<crate::cancel::CancelToken>,

    headerless: bool,
    header: Option<Arc<[String]>>,
    /// Array output: the header row itself still has to be emitted.
    header_row_pending: bool,

    /// Fields of the row being assembled.
    pending: Vec<String>,
    /// The last token ended with a field separator, so the row is still
    /// open and a trailing empty field is implied at flush.
    dangling_field_sep: bool,
    /// Logical row number of the row being assembled (1-based).
    row_number: u64,

    finished: bool,
}

impl RecordAssembler {
    pub fn new(options: AssemblerOptions) -> Result<Self> {
        options.validate()?;
        let strategy = options.strategy();
        let headerless = options.is_headerless();
        let header: Option<Arc<[String]>> = match options.header {
            Some(names) if !names.is_empty() => Some(names.into()),
            Some(_) => None, // headerless
            None => None,    // inferred from the first row
        };
        let header_row_pending = options.include_header && header.is_some();
        Ok(Self {
            output_format: options.output_format,
            strategy,
            include_header: options.include_header,
            skip_empty_lines: options.skip_empty_lines,
            max_field_count: options.max_field_count,
            source: options.source,
            signal: options.signal,
            headerless,
            header,
            header_row_pending,
            pending: Vec::new(),
            dangling_field_sep: false,
            row_number: 1,
            finished: false,
        })
    }

    /// The header in effect, once known.
    pub fn header(&self) -> Option<&[String]> {
        self.header.as_deref()
    }

    /// Assemble a batch of tokens, collecting completed records.
    pub fn assemble<I>(&mut self, tokens: I) -> Result<Vec<Record>>
    where
        I: IntoIterator<Item = Token>,
    {
        cancel::check(self.signal.as_ref())?;
        self.ensure_open()?;
        let mut out = Vec::new();
        for token in tokens {
            if let Err(err) = self.push(token, &mut out) {
                self.finished = true;
                return Err(err);
            }
        }
        Ok(out)
    }

    /// Finalize any pending row and close the assembler.
    pub fn flush(&mut self) -> Result<Vec<Record>> {
        cancel::check(self.signal.as_ref())?;
        self.ensure_open()?;
        self.finished = true;

        let mut out = Vec::new();
        self.emit_header_row_if_pending(&mut out);
        if self.dangling_field_sep {
            self.pending.push(String::new());
            self.dangling_field_sep = false;
        }
        if !self.pending.is_empty() {
            self.complete_row(&mut out)?;
        }
        Ok(out)
    }

    /// Process one token. Completed records are appended to `out`.
    pub fn push(&mut self, token: Token, out: &mut Vec<Record>) -> Result<()> {
        self.emit_header_row_if_pending(out);

        if let Limit::Bounded(limit) = self.max_field_count {
            if self.pending.len() >= limit {
                return Err(CsvError::FieldCountExceeded {
                    limit,
                    ctx: self.context(),
                });
            }
        }
        self.pending.push(token.value);

        match token.follows {
            TokenFollows::FieldSep => {
                self.dangling_field_sep = true;
            }
            TokenFollows::RecordSep => {
                self.dangling_field_sep = false;
                self.complete_row(out)?;
            }
        }
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.finished {
            return Err(CsvError::invalid_option(
                "assembler is closed (already flushed or failed)",
            ));
        }
        Ok(())
    }

    fn context(&self) -> ErrorContext {
        ErrorContext::for_row(self.source.as_deref(), self.row_number)
    }

    fn emit_header_row_if_pending(&mut self, out: &mut Vec<Record>) {
        if self.header_row_pending {
            if let Some(header) = &self.header {
                out.push(Record::Array(header.to_vec()));
            }
            self.header_row_pending = false;
        }
    }

    /// Close out `self.pending` as one logical row.
    fn complete_row(&mut self, out: &mut Vec<Record>) -> Result<()> {
        let row = std::mem::take(&mut self.pending);
        let row_number = self.row_number;
        self.row_number += 1;

        // An empty line is exactly one empty field; `,,` is not one.
        let is_empty_line = row.len() == 1 && row[0].is_empty();
        if is_empty_line && self.skip_empty_lines {
            return Ok(());
        }

        if self.headerless {
            // Every row is data; only `keep` is permitted here.
            out.push(Record::Array(row));
            return Ok(());
        }

        let Some(header) = self.header.clone() else {
            self.capture_header(row, row_number)?;
            self.emit_header_row_if_pending(out);
            return Ok(());
        };

        let produced = self.apply_strategy(row, &header, row_number)?;
        out.push(produced);
        Ok(())
    }

    fn capture_header(&mut self, row: Vec<String>, row_number: u64) -> Result<()> {
        if row.len() == 1 && row[0].is_empty() {
            return Err(CsvError::EmptyHeader {
                ctx: ErrorContext::for_row(self.source.as_deref(), row_number),
            });
        }
        for (i, name) in row.iter().enumerate() {
            if row[..i].contains(name) {
                return Err(CsvError::DuplicateHeader {
                    name: name.clone(),
                    ctx: ErrorContext::for_row(self.source.as_deref(), row_number),
                });
            }
        }
        self.header = Some(row.into());
        self.header_row_pending = self.include_header;
        Ok(())
    }

    fn apply_strategy(
        &self,
        mut row: Vec<String>,
        header: &Arc<[String]>,
        row_number: u64,
    ) -> Result<Record> {
        let expected = header.len();
        let actual = row.len();

        if self.strategy == ColumnCountStrategy::Strict && actual != expected {
            return Err(CsvError::ColumnCountMismatch {
                expected,
                actual,
                ctx: ErrorContext::for_row(self.source.as_deref(), row_number),
            });
        }

        let record = match self.output_format {
            OutputFormat::Object => {
                // `truncate` behaves as `fill` for short rows, so every
                // object record carries every header key.
                row.resize(expected, String::new());
                row.truncate(expected);
                Record::Object(ObjectRecord::new(header.clone(), row))
            }
            OutputFormat::Array => match self.strategy {
                ColumnCountStrategy::Fill | ColumnCountStrategy::Pad => {
                    row.resize(expected, String::new());
                    row.truncate(expected);
                    Record::Array(row)
                }
                ColumnCountStrategy::Keep => Record::Array(row),
                ColumnCountStrategy::Sparse => {
                    let mut cells: Vec<Option<String>> = row.into_iter().map(Some).collect();
                    cells.resize(expected, None);
                    cells.truncate(expected);
                    Record::Sparse(cells)
                }
                ColumnCountStrategy::Strict => Record::Array(row),
                ColumnCountStrategy::Truncate => {
                    row.truncate(expected);
                    Record::Array(row)
                }
            },
        };
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CsvErrorKind;
    use crate::lexer::CsvLexer;
    use crate::options::LexerOptions;

    fn tokens_of(input: &str) -> Vec<Token> {
        let mut lexer = CsvLexer::new(LexerOptions::default()).unwrap();
        let mut tokens = lexer.feed(input).unwrap();
        tokens.extend(lexer.flush().unwrap());
        tokens
    }

    fn assemble_all(input: &str, options: AssemblerOptions) -> Result<Vec<Record>> {
        let mut assembler = RecordAssembler::new(options)?;
        let mut records = assembler.assemble(tokens_of(input))?;
        records.extend(assembler.flush()?);
        Ok(records)
    }

    fn array_options(strategy: ColumnCountStrategy) -> AssemblerOptions {
        AssemblerOptions {
            output_format: OutputFormat::Array,
            column_count_strategy: Some(strategy),
            ..Default::default()
        }
    }

    #[test]
    fn test_object_records_from_inferred_header() {
        let records = assemble_all("name,age\nAlice,42\nBob,69", AssemblerOptions::default())
            .unwrap();
        assert_eq!(records.len(), 2);
        let first = records[0].as_object().unwrap();
        assert_eq!(first.get("name"), Some("Alice"));
        assert_eq!(first.get("age"), Some("42"));
        let second = records[1].as_object().unwrap();
        assert_eq!(second.get("name"), Some("Bob"));
    }

    #[test]
    fn test_object_key_order_matches_header() {
        let records = assemble_all("b,a\n1,2\n", AssemblerOptions::default()).unwrap();
        let pairs: Vec<_> = records[0].as_object().unwrap().iter().collect();
        assert_eq!(pairs, vec![("b", "1"), ("a", "2")]);
    }

    #[test]
    fn test_explicit_header_makes_first_row_data() {
        let options = AssemblerOptions {
            header: Some(vec!["x".to_string(), "y".to_string()]),
            ..Default::default()
        };
        let records = assemble_all("1,2\n3,4\n", options).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].as_object().unwrap().get("x"), Some("1"));
    }

    #[test]
    fn test_fill_pads_and_truncates() {
        let records = assemble_all(
            "h1,h2,h3\n1,2\n1,2,3,4\n",
            array_options(ColumnCountStrategy::Fill),
        )
        .unwrap();
        assert_eq!(records[0].as_array().unwrap(), &["1", "2", ""]);
        assert_eq!(records[1].as_array().unwrap(), &["1", "2", "3"]);
    }

    #[test]
    fn test_fill_object_keeps_every_header_key() {
        let records = assemble_all("h1,h2,h3\n1,2\n", AssemblerOptions::default()).unwrap();
        let record = records[0].as_object().unwrap();
        assert_eq!(record.get("h3"), Some(""));
    }

    #[test]
    fn test_keep_emits_rows_as_lexed() {
        let records = assemble_all("h1,h2\n1\n1,2,3\n", array_options(ColumnCountStrategy::Keep))
            .unwrap();
        assert_eq!(records[0].as_array().unwrap(), &["1"]);
        assert_eq!(records[1].as_array().unwrap(), &["1", "2", "3"]);
    }

    #[test]
    fn test_sparse_pads_with_absent_cells() {
        let options = AssemblerOptions {
            header: Some(vec!["a".to_string(), "b".to_string(), "c".to_string()]),
            output_format: OutputFormat::Array,
            column_count_strategy: Some(ColumnCountStrategy::Sparse),
            ..Default::default()
        };
        let records = assemble_all("1,\n", options).unwrap();
        match &records[0] {
            Record::Sparse(cells) => {
                assert_eq!(
                    cells,
                    &vec![Some("1".to_string()), Some(String::new()), None]
                );
            }
            other => panic!("expected sparse record, got {:?}", other),
        }
    }

    #[test]
    fn test_strict_rejects_mismatched_rows() {
        let err = assemble_all("h1,h2\n1,2,3\n", array_options(ColumnCountStrategy::Strict))
            .unwrap_err();
        assert_eq!(err.kind(), CsvErrorKind::ColumnCountMismatch);
        let ctx = err.context().unwrap();
        assert_eq!(ctx.row_number, Some(2));
    }

    #[test]
    fn test_truncate_drops_extras_and_keeps_short_rows() {
        let records = assemble_all(
            "h1,h2\n1,2,3\n1\n",
            array_options(ColumnCountStrategy::Truncate),
        )
        .unwrap();
        assert_eq!(records[0].as_array().unwrap(), &["1", "2"]);
        assert_eq!(records[1].as_array().unwrap(), &["1"]);
    }

    #[test]
    fn test_headerless_mode_keeps_every_row() {
        let options = AssemblerOptions {
            header: Some(vec![]),
            output_format: OutputFormat::Array,
            ..Default::default()
        };
        let records = assemble_all("a,b\n1,2,3\n", options).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].as_array().unwrap(), &["a", "b"]);
        assert_eq!(records[1].as_array().unwrap(), &["1", "2", "3"]);
    }

    #[test]
    fn test_include_header_emits_header_row_first() {
        let options = AssemblerOptions {
            output_format: OutputFormat::Array,
            include_header: true,
            column_count_strategy: Some(ColumnCountStrategy::Fill),
            ..Default::default()
        };
        let records = assemble_all("h1,h2\n1,2\n", options).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].as_array().unwrap(), &["h1", "h2"]);
        assert_eq!(records[1].as_array().unwrap(), &["1", "2"]);
    }

    #[test]
    fn test_skip_empty_lines() {
        let options = AssemblerOptions {
            skip_empty_lines: true,
            ..Default::default()
        };
        let records = assemble_all("\nname\n\nAlice\n\n", options).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].as_object().unwrap().get("name"), Some("Alice"));
    }

    #[test]
    fn test_multiple_empty_fields_are_not_an_empty_line() {
        let options = AssemblerOptions {
            output_format: OutputFormat::Array,
            column_count_strategy: Some(ColumnCountStrategy::Keep),
            header: Some(vec![]),
            skip_empty_lines: true,
            ..Default::default()
        };
        let records = assemble_all(",,\n", options).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].as_array().unwrap(), &["", "", ""]);
    }

    #[test]
    fn test_empty_first_row_is_rejected_as_header() {
        let err = assemble_all("\nname\n", AssemblerOptions::default()).unwrap_err();
        assert_eq!(err.kind(), CsvErrorKind::EmptyHeader);
    }

    #[test]
    fn test_duplicate_inferred_header_is_rejected() {
        let err = assemble_all("id,id\n1,2\n", AssemblerOptions::default()).unwrap_err();
        assert_eq!(err.kind(), CsvErrorKind::DuplicateHeader);
    }

    #[test]
    fn test_field_count_limit() {
        let options = AssemblerOptions {
            max_field_count: Limit::Bounded(2),
            ..Default::default()
        };
        let err = assemble_all("a,b,c\n", options).unwrap_err();
        assert_eq!(err.kind(), CsvErrorKind::FieldCountExceeded);
    }

    #[test]
    fn test_flush_completes_dangling_row() {
        let mut assembler = RecordAssembler::new(AssemblerOptions {
            output_format: OutputFormat::Array,
            header: Some(vec!["a".to_string(), "b".to_string()]),
            column_count_strategy: Some(ColumnCountStrategy::Keep),
            ..Default::default()
        })
        .unwrap();
        // A raw token feed that ends on a field separator: the implied
        // trailing empty field appears at flush.
        let token = Token {
            value: "x".to_string(),
            follows: TokenFollows::FieldSep,
            sep_len: 1,
            location: None,
        };
        let mut out = Vec::new();
        assembler.push(token, &mut out).unwrap();
        assert!(out.is_empty());
        let records = assembler.flush().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].as_array().unwrap(), &["x", ""]);
    }

    #[test]
    fn test_assemble_after_flush_is_rejected() {
        let mut assembler = RecordAssembler::new(AssemblerOptions::default()).unwrap();
        assembler.flush().unwrap();
        assert!(assembler.assemble(tokens_of("a\n")).is_err());
    }

    #[test]
    fn test_header_is_immutable_after_capture() {
        let mut assembler = RecordAssembler::new(AssemblerOptions::default()).unwrap();
        assembler.assemble(tokens_of("h1,h2\n")).unwrap();
        let header: Vec<String> = assembler.header().unwrap().to_vec();
        assembler.assemble(tokens_of("1,2\n")).unwrap();
        assert_eq!(assembler.header().unwrap(), header.as_slice());
    }
}
