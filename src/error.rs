//! Error taxonomy for the CSV engine.
//!
//! Every parse error carries a [`CsvErrorKind`] plus, where it is meaningful,
//! an [`ErrorContext`] with the caller-supplied source identifier and the
//! position (logical row, physical line, column, offset) at which the input
//! became unacceptable.

use std::fmt;

use thiserror::Error;

/// Position and provenance attached to a parse error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext {
    /// Caller-supplied identifier for the input (e.g. a file name).
    pub source: Option<String>,
    /// Logical CSV row (1-based). Quoted newlines do not advance it.
    pub row_number: Option<u64>,
    /// Physical line (1-based, counts `\n`).
    pub line: Option<u64>,
    /// Column within the line (1-based, Unicode scalar values).
    pub column: Option<u64>,
    /// Offset from the start of the input (Unicode scalar values, or bytes
    /// for binary-indexed errors).
    pub offset: Option<u64>,
}

impl ErrorContext {
    pub(crate) fn at(
        source: Option<&str>,
        row_number: u64,
        line: u64,
        column: u64,
        offset: u64,
    ) -> Self {
        Self {
            source: source.map(str::to_owned),
            row_number: Some(row_number),
            line: Some(line),
            column: Some(column),
            offset: Some(offset),
        }
    }

    pub(crate) fn for_row(source: Option<&str>, row_number: u64) -> Self {
        Self {
            source: source.map(str::to_owned),
            row_number: Some(row_number),
            ..Self::default()
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let (Some(line), Some(column)) = (self.line, self.column) {
            write!(f, " at line {}, column {}", line, column)?;
            if let Some(offset) = self.offset {
                write!(f, " (offset {})", offset)?;
            }
        }
        if let Some(row) = self.row_number {
            write!(f, " in row {}", row)?;
        }
        if let Some(ref source) = self.source {
            write!(f, " in \"{}\"", source)?;
        }
        Ok(())
    }
}

/// Discriminant of [`CsvError`], for callers that dispatch on error class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CsvErrorKind {
    InvalidOption,
    UnexpectedEof,
    StrayQuote,
    BufferExceeded,
    FieldTooLarge,
    BinaryTooLarge,
    FieldCountExceeded,
    ColumnCountMismatch,
    DuplicateHeader,
    EmptyHeader,
    Decode,
    UnsupportedCharset,
    UnsupportedCompression,
    Cancelled,
    BackendUnavailable,
    DeviceLost,
    Io,
}

/// Errors produced by the lexer, assembler, pipeline and indexer.
///
/// All errors are fatal for the instance that raised them; the only
/// caller-recoverable cases are [`CsvError::UnsupportedCharset`] and
/// [`CsvError::UnsupportedCompression`], which may be retried with the
/// corresponding opt-in flag set.
#[derive(Debug, Error)]
pub enum CsvError {
    #[error("invalid option: {message}")]
    InvalidOption { message: String },

    #[error("unexpected end of input while inside a quoted field{ctx}")]
    UnexpectedEof { ctx: ErrorContext },

    #[error("unexpected character {found:?} after closing quote{ctx}")]
    StrayQuote { found: char, ctx: ErrorContext },

    #[error("lexer buffer would exceed {limit} code units{ctx}")]
    BufferExceeded { limit: usize, ctx: ErrorContext },

    #[error("field would exceed {limit} code units{ctx}")]
    FieldTooLarge { limit: usize, ctx: ErrorContext },

    #[error("binary input exceeds maximum allowed size ({limit} bytes){ctx}")]
    BinaryTooLarge { limit: usize, ctx: ErrorContext },

    #[error("record would exceed {limit} fields{ctx}")]
    FieldCountExceeded { limit: usize, ctx: ErrorContext },

    #[error("expected {expected} fields but found {actual}{ctx}")]
    ColumnCountMismatch {
        expected: usize,
        actual: usize,
        ctx: ErrorContext,
    },

    #[error("duplicate header field {name:?}{ctx}")]
    DuplicateHeader { name: String, ctx: ErrorContext },

    #[error("header row is empty{ctx}")]
    EmptyHeader { ctx: ErrorContext },

    #[error("malformed {charset} byte sequence{ctx}")]
    Decode { charset: String, ctx: ErrorContext },

    #[error("unsupported charset {label:?}")]
    UnsupportedCharset { label: String },

    #[error("unsupported compression format {format:?}")]
    UnsupportedCompression { format: String },

    #[error("parse aborted: {reason}")]
    Cancelled { reason: String },

    #[error("no usable GPU backend: {message}")]
    BackendUnavailable { message: String },

    #[error("GPU device lost: {message}")]
    DeviceLost { message: String },

    #[error("i/o error while reading input")]
    Io(#[from] std::io::Error),
}

impl CsvError {
    pub fn kind(&self) -> CsvErrorKind {
        match self {
            CsvError::InvalidOption { .. } => CsvErrorKind::InvalidOption,
            CsvError::UnexpectedEof { .. } => CsvErrorKind::UnexpectedEof,
            CsvError::StrayQuote { .. } => CsvErrorKind::StrayQuote,
            CsvError::BufferExceeded { .. } => CsvErrorKind::BufferExceeded,
            CsvError::FieldTooLarge { .. } => CsvErrorKind::FieldTooLarge,
            CsvError::BinaryTooLarge { .. } => CsvErrorKind::BinaryTooLarge,
            CsvError::FieldCountExceeded { .. } => CsvErrorKind::FieldCountExceeded,
            CsvError::ColumnCountMismatch { .. } => CsvErrorKind::ColumnCountMismatch,
            CsvError::DuplicateHeader { .. } => CsvErrorKind::DuplicateHeader,
            CsvError::EmptyHeader { .. } => CsvErrorKind::EmptyHeader,
            CsvError::Decode { .. } => CsvErrorKind::Decode,
            CsvError::UnsupportedCharset { .. } => CsvErrorKind::UnsupportedCharset,
            CsvError::UnsupportedCompression { .. } => CsvErrorKind::UnsupportedCompression,
            CsvError::Cancelled { .. } => CsvErrorKind::Cancelled,
            CsvError::BackendUnavailable { .. } => CsvErrorKind::BackendUnavailable,
            CsvError::DeviceLost { .. } => CsvErrorKind::DeviceLost,
            CsvError::Io(_) => CsvErrorKind::Io,
        }
    }

    /// The position context attached to this error, if any.
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            CsvError::UnexpectedEof { ctx }
            | CsvError::StrayQuote { ctx, .. }
            | CsvError::BufferExceeded { ctx, .. }
            | CsvError::FieldTooLarge { ctx, .. }
            | CsvError::BinaryTooLarge { ctx, .. }
            | CsvError::FieldCountExceeded { ctx, .. }
            | CsvError::ColumnCountMismatch { ctx, .. }
            | CsvError::DuplicateHeader { ctx, .. }
            | CsvError::EmptyHeader { ctx }
            | CsvError::Decode { ctx, .. } => Some(ctx),
            _ => None,
        }
    }

    pub(crate) fn invalid_option(message: impl Into<String>) -> Self {
        CsvError::InvalidOption {
            message: message.into(),
        }
    }
}

/// A specialized result type for the engine.
pub type Result<T, E = CsvError> = std::result::Result<T, E>;
