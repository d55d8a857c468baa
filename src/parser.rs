//! Synchronous streaming parser facade.
//!
//! [`CsvParser`] couples a [`CsvLexer`] and a [`RecordAssembler`] for
//! callers that drive chunks by hand and do not need the async pipeline:
//! feed chunks, collect completed records, flush once at the end. The
//! [`parse_string`] and [`parse_bytes`] helpers cover the whole-input case.

use crate::assembler::RecordAssembler;
use crate::binary::{BinaryCsvLexer, BinaryLexerOptions};
use crate::error::Result;
use crate::lexer::CsvLexer;
use crate::options::{AssemblerOptions, LexerOptions};
use crate::record::Record;

/// Options for [`CsvParser`] and the one-shot helpers.
#[derive(Debug, Clone, Default)]
pub struct ParserOptions {
    pub lexer: LexerOptions,
    pub assembler: AssemblerOptions,
}

/// Streaming CSV parser that processes character chunks incrementally.
///
/// Single-shot, like the lexer and assembler it wraps.
#[derive(Debug)]
pub struct CsvParser {
    lexer: CsvLexer,
    assembler: RecordAssembler,
}

impl CsvParser {
    pub fn new(options: ParserOptions) -> Result<Self> {
        Ok(Self {
            lexer: CsvLexer::new(options.lexer)?,
            assembler: RecordAssembler::new(options.assembler)?,
        })
    }

    /// Process a chunk and return the records it completed. May be empty if
    /// the chunk ends mid-record.
    pub fn process_chunk(&mut self, chunk: &str) -> Result<Vec<Record>> {
        let tokens = self.lexer.feed(chunk)?;
        self.assembler.assemble(tokens)
    }

    /// Flush any buffered data and return the final records.
    pub fn flush(&mut self) -> Result<Vec<Record>> {
        let tokens = self.lexer.flush()?;
        let mut records = self.assembler.assemble(tokens)?;
        records.extend(self.assembler.flush()?);
        Ok(records)
    }

    /// The header in effect, once known.
    pub fn header(&self) -> Option<&[String]> {
        self.assembler.header()
    }
}

/// Parse a whole string into records.
pub fn parse_string(input: &str, options: ParserOptions) -> Result<Vec<Record>> {
    let mut parser = CsvParser::new(options)?;
    let mut records = parser.process_chunk(input)?;
    records.extend(parser.flush()?);
    Ok(records)
}

/// Parse a whole byte buffer into records, applying charset decoding and
/// the binary size bound first.
pub fn parse_bytes(input: &[u8], options: BinaryParserOptions) -> Result<Vec<Record>> {
    let mut lexer = BinaryCsvLexer::new(options.binary)?;
    let mut assembler = RecordAssembler::new(options.assembler)?;
    let tokens = lexer.feed(input)?;
    let mut records = assembler.assemble(tokens)?;
    let tokens = lexer.flush()?;
    records.extend(assembler.assemble(tokens)?);
    records.extend(assembler.flush()?);
    Ok(records)
}

/// Options for [`parse_bytes`].
#[derive(Debug, Clone, Default)]
pub struct BinaryParserOptions {
    pub binary: BinaryLexerOptions,
    pub assembler: AssemblerOptions,
}
