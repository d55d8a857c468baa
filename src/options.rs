//! Configuration for the lexer, assembler and pipeline.
//!
//! Options are validated once, at construction of the component that uses
//! them; a failed validation is an [`CsvError::InvalidOption`] (or one of the
//! unsupported-charset/compression errors) before any work is performed.

use crate::cancel::CancelToken;
use crate::error::{CsvError, Result};

/// Default bound for the lexer's internal buffer (UTF-16 code units).
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 10 * 1024 * 1024;
/// Default bound for a single field (UTF-16 code units).
pub const DEFAULT_MAX_FIELD_SIZE: usize = 10 * 1024 * 1024;
/// Upper bound accepted for `max_field_size`.
pub const MAX_FIELD_SIZE_CEILING: usize = (1 << 30) - 1;
/// Default bound for whole binary inputs (bytes).
pub const DEFAULT_MAX_BINARY_SIZE: usize = 100 * 1024 * 1024;
/// Default cap on fields per record.
pub const DEFAULT_MAX_FIELD_COUNT: usize = 100_000;

/// A size bound that may be unbounded (the "positive infinity" accepted by
/// the configuration surface).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    Bounded(usize),
    Unbounded,
}

impl Limit {
    /// Whether `n` stays within the bound.
    pub fn allows(self, n: usize) -> bool {
        match self {
            Limit::Bounded(limit) => n <= limit,
            Limit::Unbounded => true,
        }
    }

    pub fn bound(self) -> Option<usize> {
        match self {
            Limit::Bounded(limit) => Some(limit),
            Limit::Unbounded => None,
        }
    }

    fn validate(self, name: &str, ceiling: Option<usize>) -> Result<()> {
        if let Limit::Bounded(value) = self {
            if value == 0 {
                return Err(CsvError::invalid_option(format!(
                    "{} must be a positive integer or unbounded",
                    name
                )));
            }
            if let Some(ceiling) = ceiling {
                if value > ceiling {
                    return Err(CsvError::invalid_option(format!(
                        "{} must not exceed {}",
                        name, ceiling
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Options for [`CsvLexer`](crate::lexer::CsvLexer).
#[derive(Debug, Clone)]
pub struct LexerOptions {
    /// Field separator. Non-empty, no CR/LF, distinct from `quotation`.
    /// Multi-character delimiters are permitted.
    pub delimiter: String,
    /// Quote string. Same restrictions as `delimiter`.
    pub quotation: String,
    /// Bound on the characters carried across feed boundaries.
    pub max_buffer_size: Limit,
    /// Bound on a single field's length.
    pub max_field_size: Limit,
    /// Materialize [`TokenLocation`](crate::token::TokenLocation) on tokens.
    pub track_location: bool,
    /// Identifier used in error messages (e.g. a file name).
    pub source: Option<String>,
    /// Cancellation handle, consulted at the start of each call.
    pub signal: Option<CancelToken>,
}

impl Default for LexerOptions {
    fn default() -> Self {
        Self {
            delimiter: ",".to_string(),
            quotation: "\"".to_string(),
            max_buffer_size: Limit::Bounded(DEFAULT_MAX_BUFFER_SIZE),
            max_field_size: Limit::Bounded(DEFAULT_MAX_FIELD_SIZE),
            track_location: false,
            source: None,
            signal: None,
        }
    }
}

impl LexerOptions {
    pub fn validate(&self) -> Result<()> {
        validate_separator("delimiter", &self.delimiter)?;
        validate_separator("quotation", &self.quotation)?;
        if self.delimiter == self.quotation {
            return Err(CsvError::invalid_option(
                "delimiter and quotation must differ",
            ));
        }
        // A proper-prefix pair would make separator matching ambiguous.
        if self.delimiter.starts_with(self.quotation.as_str())
            || self.quotation.starts_with(self.delimiter.as_str())
        {
            return Err(CsvError::invalid_option(
                "delimiter and quotation must not be prefixes of each other",
            ));
        }
        self.max_buffer_size.validate("maxBufferSize", None)?;
        self.max_field_size
            .validate("maxFieldSize", Some(MAX_FIELD_SIZE_CEILING))?;
        Ok(())
    }
}

fn validate_separator(name: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(CsvError::invalid_option(format!(
            "{} must not be empty",
            name
        )));
    }
    if value.contains('\r') || value.contains('\n') {
        return Err(CsvError::invalid_option(format!(
            "{} must not contain CR or LF",
            name
        )));
    }
    Ok(())
}

/// Output shape produced by the assembler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Object,
    Array,
}

/// Policy applied when a row's field count differs from the header's.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnCountStrategy {
    /// Pad short rows with `""`, truncate long rows.
    Fill,
    /// Emit rows exactly as lexed (array output only).
    Keep,
    /// Alias of [`ColumnCountStrategy::Fill`].
    Pad,
    /// Pad short rows with absent cells; requires an explicit header
    /// (array output only).
    Sparse,
    /// Any mismatch is an error.
    Strict,
    /// Drop extra fields; short rows are kept as-is (array) or filled
    /// (object).
    Truncate,
}

/// Options for [`RecordAssembler`](crate::assembler::RecordAssembler).
#[derive(Debug, Clone)]
pub struct AssemblerOptions {
    /// `None`: infer the header from the first row. `Some(vec)`: use `vec`
    /// as the header. `Some(vec![])`: headerless mode (array output only,
    /// every row is data).
    pub header: Option<Vec<String>>,
    pub output_format: OutputFormat,
    /// Array output only: emit the header row as the first record.
    pub include_header: bool,
    /// Defaults to [`ColumnCountStrategy::Fill`] for both formats, or
    /// [`ColumnCountStrategy::Keep`] in headerless mode.
    pub column_count_strategy: Option<ColumnCountStrategy>,
    /// Drop records whose sole content is one empty field.
    pub skip_empty_lines: bool,
    pub max_field_count: Limit,
    pub source: Option<String>,
    pub signal: Option<CancelToken>,
}

impl Default for AssemblerOptions {
    fn default() -> Self {
        Self {
            header: None,
            output_format: OutputFormat::Object,
            include_header: false,
            column_count_strategy: None,
            skip_empty_lines: false,
            max_field_count: Limit::Bounded(DEFAULT_MAX_FIELD_COUNT),
            source: None,
            signal: None,
        }
    }
}

impl AssemblerOptions {
    /// The strategy in effect after defaulting.
    pub fn strategy(&self) -> ColumnCountStrategy {
        match self.column_count_strategy {
            Some(strategy) => strategy,
            None if self.is_headerless() => ColumnCountStrategy::Keep,
            None => ColumnCountStrategy::Fill,
        }
    }

    pub fn is_headerless(&self) -> bool {
        matches!(self.header.as_deref(), Some([]))
    }

    pub fn validate(&self) -> Result<()> {
        self.max_field_count.validate("maxFieldCount", None)?;

        if self.is_headerless() {
            if self.output_format == OutputFormat::Object {
                return Err(CsvError::invalid_option(
                    "headerless mode requires array output",
                ));
            }
            if !matches!(
                self.column_count_strategy,
                None | Some(ColumnCountStrategy::Keep)
            ) {
                return Err(CsvError::invalid_option(
                    "headerless mode only supports the \"keep\" strategy",
                ));
            }
        }

        if self.include_header && self.output_format != OutputFormat::Array {
            return Err(CsvError::invalid_option(
                "includeHeader requires array output",
            ));
        }

        match (self.output_format, self.strategy()) {
            (OutputFormat::Object, ColumnCountStrategy::Keep) => {
                return Err(CsvError::invalid_option(
                    "the \"keep\" strategy cannot be combined with object output",
                ));
            }
            (OutputFormat::Object, ColumnCountStrategy::Sparse) => {
                return Err(CsvError::invalid_option(
                    "the \"sparse\" strategy cannot be combined with object output",
                ));
            }
            _ => {}
        }

        if self.strategy() == ColumnCountStrategy::Sparse
            && self.header.as_deref().map_or(true, |h| h.is_empty())
        {
            return Err(CsvError::invalid_option(
                "the \"sparse\" strategy requires an explicit header",
            ));
        }

        if let Some(header) = self.header.as_deref() {
            for (i, name) in header.iter().enumerate() {
                if header[..i].contains(name) {
                    return Err(CsvError::invalid_option(format!(
                        "header contains duplicate field {:?}",
                        name
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Decompression formats accepted by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionFormat {
    Gzip,
    Deflate,
    DeflateRaw,
    Brotli,
}

impl CompressionFormat {
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "gzip" => Some(Self::Gzip),
            "deflate" => Some(Self::Deflate),
            "deflate-raw" => Some(Self::DeflateRaw),
            "br" => Some(Self::Brotli),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Gzip => "gzip",
            Self::Deflate => "deflate",
            Self::DeflateRaw => "deflate-raw",
            Self::Brotli => "br",
        }
    }

    /// `deflate-raw` and `br` require the experimental opt-in.
    pub fn is_experimental(self) -> bool {
        matches!(self, Self::DeflateRaw | Self::Brotli)
    }
}

/// Charset decoding options (see [`crate::encoding`]).
#[derive(Debug, Clone)]
pub struct DecoderOptions {
    /// Charset label, resolved through the WHATWG label registry.
    pub charset: String,
    /// `true` strips a leading BOM; `false` leaves it as the first
    /// codepoint of the first field.
    pub ignore_bom: bool,
    /// `true` makes malformed input an error; `false` substitutes U+FFFD.
    pub fatal: bool,
    /// Accept labels outside the supported set.
    pub allow_non_standard_charsets: bool,
}

impl Default for DecoderOptions {
    fn default() -> Self {
        Self {
            charset: "utf-8".to_string(),
            ignore_bom: false,
            fatal: false,
            allow_non_standard_charsets: false,
        }
    }
}

/// Queue bounds for the pipeline stages.
///
/// The input-side bound is measured in code units (or bytes for binary
/// input); the token and record bounds are item counts.
#[derive(Debug, Clone)]
pub struct QueuingOptions {
    pub lexer_in_high_water_mark: usize,
    pub token_high_water_mark: usize,
    pub record_high_water_mark: usize,
}

impl Default for QueuingOptions {
    fn default() -> Self {
        Self {
            lexer_in_high_water_mark: 65_536,
            token_high_water_mark: 1_024,
            record_high_water_mark: 256,
        }
    }
}

/// Options for [`CsvRecordStream`](crate::pipeline::CsvRecordStream).
#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    pub lexer: LexerOptions,
    pub assembler: AssemblerOptions,
    /// Decompress binary input before charset decoding.
    pub decompression: Option<CompressionFormat>,
    pub allow_experimental_compressions: bool,
    pub decoder: DecoderOptions,
    pub queuing: QueuingOptions,
    /// Cooperative yield cadence while producing tokens.
    pub token_check_interval: Option<usize>,
    /// Cooperative yield cadence while producing records.
    pub record_check_interval: Option<usize>,
    /// Bound on the total bytes accepted from a binary input.
    pub max_binary_size: Option<Limit>,
    pub signal: Option<CancelToken>,
}

impl PipelineOptions {
    pub(crate) const DEFAULT_TOKEN_CHECK_INTERVAL: usize = 100;
    pub(crate) const DEFAULT_RECORD_CHECK_INTERVAL: usize = 10;

    pub fn validate(&self) -> Result<()> {
        self.lexer.validate()?;
        self.assembler.validate()?;
        if let Some(format) = self.decompression {
            if format.is_experimental() && !self.allow_experimental_compressions {
                return Err(CsvError::UnsupportedCompression {
                    format: format.label().to_string(),
                });
            }
        }
        if let Some(interval) = self.token_check_interval {
            if interval == 0 {
                return Err(CsvError::invalid_option(
                    "backpressure check interval must be positive",
                ));
            }
        }
        if let Some(interval) = self.record_check_interval {
            if interval == 0 {
                return Err(CsvError::invalid_option(
                    "backpressure check interval must be positive",
                ));
            }
        }
        if let Some(limit) = self.max_binary_size {
            limit.validate("maxBinarySize", None)?;
        }
        Ok(())
    }

    pub(crate) fn max_binary_size(&self) -> Limit {
        self.max_binary_size
            .unwrap_or(Limit::Bounded(DEFAULT_MAX_BINARY_SIZE))
    }
}
