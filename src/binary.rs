//! Binary CSV lexer: byte chunks in, tokens out.
//!
//! Semantically identical to [`CsvLexer`]; byte chunks are run through a
//! [`CharsetDecoder`] first, so multi-byte sequences may straddle chunk
//! boundaries and the configured charset/BOM policy applies. The character
//! buffer bound of the inner lexer applies after decoding.

use crate::encoding::CharsetDecoder;
use crate::error::{CsvError, ErrorContext, Result};
use crate::lexer::CsvLexer;
use crate::options::{DecoderOptions, LexerOptions, Limit, DEFAULT_MAX_BINARY_SIZE};
use crate::token::Token;

/// Options for [`BinaryCsvLexer`].
#[derive(Debug, Clone)]
pub struct BinaryLexerOptions {
    pub lexer: LexerOptions,
    pub decoder: DecoderOptions,
    /// Bound on the total number of input bytes accepted.
    pub max_binary_size: Limit,
}

impl Default for BinaryLexerOptions {
    fn default() -> Self {
        Self {
            lexer: LexerOptions::default(),
            decoder: DecoderOptions::default(),
            max_binary_size: Limit::Bounded(DEFAULT_MAX_BINARY_SIZE),
        }
    }
}

/// Streaming CSV tokenizer over byte input.
#[derive(Debug)]
pub struct BinaryCsvLexer {
    lexer: CsvLexer,
    decoder: CharsetDecoder,
    max_binary_size: Limit,
    consumed: usize,
    source: Option<String>,
}

impl BinaryCsvLexer {
    pub fn new(options: BinaryLexerOptions) -> Result<Self> {
        let source = options.lexer.source.clone();
        let decoder = CharsetDecoder::with_source(&options.decoder, source.as_deref())?;
        Ok(Self {
            lexer: CsvLexer::new(options.lexer)?,
            decoder,
            max_binary_size: options.max_binary_size,
            consumed: 0,
            source,
        })
    }

    /// Feed a byte chunk in stream mode.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<Token>> {
        self.check_size(chunk.len())?;
        self.consumed += chunk.len();
        let text = self.decoder.decode(chunk, false)?;
        self.lexer.feed(&text)
    }

    /// Finalize the decoder and the lexer.
    pub fn flush(&mut self) -> Result<Vec<Token>> {
        let tail = self.decoder.decode(&[], true)?;
        let mut tokens = if tail.is_empty() {
            Vec::new()
        } else {
            self.lexer.feed(&tail)?
        };
        tokens.extend(self.lexer.flush()?);
        Ok(tokens)
    }

    pub fn row_number(&self) -> u64 {
        self.lexer.row_number()
    }

    fn check_size(&self, incoming: usize) -> Result<()> {
        if let Limit::Bounded(limit) = self.max_binary_size {
            if self.consumed + incoming > limit {
                return Err(CsvError::BinaryTooLarge {
                    limit,
                    ctx: ErrorContext {
                        source: self.source.clone(),
                        offset: Some(self.consumed as u64),
                        ..ErrorContext::default()
                    },
                });
            }
        }
        Ok(())
    }
}
