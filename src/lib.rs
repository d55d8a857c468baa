//! Streaming CSV engine.
//!
//! The engine turns an untrusted byte or character stream into structured
//! records through a three-stage pipeline, with bounded memory under
//! adversarial input, cooperative backpressure and cancellation:
//!
//! 1. [`lexer::CsvLexer`] — incremental tokenizer from characters to field
//!    tokens (RFC-4180-like, configurable delimiter/quotation, quoted
//!    newlines, escaped quotes, CR/LF/CRLF).
//! 2. [`assembler::RecordAssembler`] — tokens to records (object or array
//!    form), with header capture and column-count policies.
//! 3. [`pipeline::CsvRecordStream`] — the async fabric connecting them,
//!    including decompression and charset decoding for binary input.
//!
//! For very large binary inputs, [`indexer::CsvIndexer`] replaces the first
//! stage with a two-pass data-parallel scan (GPU-backed when a device is
//! available, with a transparent CPU fallback) that locates separator byte
//! offsets directly; [`indexer::IndexedCsvParser`] reuses the same record
//! assembler so both front ends produce identical records.
//!
//! # Example
//!
//! ```
//! use csv_toolbox_core::parser::{parse_string, ParserOptions};
//!
//! let records = parse_string("name,age\nAlice,42\n", ParserOptions::default())?;
//! assert_eq!(records[0].as_object().unwrap().get("age"), Some("42"));
//! # Ok::<(), csv_toolbox_core::error::CsvError>(())
//! ```

pub mod assembler;
pub mod binary;
pub mod cancel;
pub mod encoding;
pub mod error;
pub mod indexer;
pub mod lexer;
pub mod options;
pub mod parser;
pub mod pipeline;
pub mod record;
pub mod token;

#[cfg(test)]
mod tests;

pub use assembler::RecordAssembler;
pub use binary::{BinaryCsvLexer, BinaryLexerOptions};
pub use cancel::CancelToken;
pub use error::{CsvError, CsvErrorKind, ErrorContext, Result};
pub use lexer::CsvLexer;
pub use options::{
    AssemblerOptions, ColumnCountStrategy, CompressionFormat, DecoderOptions, LexerOptions, Limit,
    OutputFormat, PipelineOptions, QueuingOptions,
};
pub use parser::{parse_bytes, parse_string, CsvParser, ParserOptions};
pub use pipeline::CsvRecordStream;
pub use record::{ObjectRecord, Record};
pub use token::{LegacyToken, LegacyTokenKind, Position, Token, TokenFollows, TokenLocation};
