//! Streaming charset decoding for binary input.
//!
//! Byte chunks pass through an [`encoding_rs`] decoder before reaching the
//! character lexer. The decoder carries incomplete multi-byte sequences
//! across chunk boundaries; `fatal` mode turns malformed input into a
//! [`CsvError::Decode`], otherwise U+FFFD is substituted. A leading BOM is
//! stripped when `ignore_bom` is set and preserved as content otherwise.

use encoding_rs::{CoderResult, Decoder, DecoderResult, Encoding};

use crate::error::{CsvError, ErrorContext, Result};
use crate::options::DecoderOptions;

/// Charset labels supported without the non-standard opt-in.
///
/// Matching is on the canonical encoding name resolved from the caller's
/// label, so e.g. `latin1` resolves to `windows-1252` and is accepted.
const STANDARD_CHARSETS: &[&str] = &[
    "UTF-8",
    "UTF-16LE",
    "UTF-16BE",
    "ISO-8859-2",
    "ISO-8859-3",
    "ISO-8859-4",
    "ISO-8859-5",
    "ISO-8859-6",
    "ISO-8859-7",
    "ISO-8859-8",
    "ISO-8859-10",
    "ISO-8859-13",
    "ISO-8859-14",
    "ISO-8859-15",
    "ISO-8859-16",
    "windows-1250",
    "windows-1251",
    "windows-1252",
    "windows-1253",
    "windows-1254",
    "windows-1255",
    "windows-1256",
    "windows-1257",
    "windows-1258",
    "Shift_JIS",
    "EUC-JP",
    "gb18030",
    "EUC-KR",
];

/// Incremental charset decoder: bytes in, `String` chunks out.
pub struct CharsetDecoder {
    inner: Decoder,
    charset: String,
    fatal: bool,
    source: Option<String>,
    /// Bytes consumed so far, for error positions.
    consumed: u64,
}

impl std::fmt::Debug for CharsetDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CharsetDecoder")
            .field("charset", &self.charset)
            .field("fatal", &self.fatal)
            .finish()
    }
}

impl CharsetDecoder {
    pub fn new(options: &DecoderOptions) -> Result<Self> {
        Self::with_source(options, None)
    }

    pub(crate) fn with_source(options: &DecoderOptions, source: Option<&str>) -> Result<Self> {
        let encoding = resolve_charset(&options.charset, options.allow_non_standard_charsets)?;
        let inner = if options.ignore_bom {
            encoding.new_decoder_with_bom_removal()
        } else {
            encoding.new_decoder_without_bom_handling()
        };
        Ok(Self {
            inner,
            charset: encoding.name().to_string(),
            fatal: options.fatal,
            source: source.map(str::to_owned),
            consumed: 0,
        })
    }

    /// The canonical name of the resolved encoding.
    pub fn charset(&self) -> &str {
        &self.charset
    }

    /// Decode one chunk. `last` finalizes the stream: an incomplete
    /// trailing sequence then becomes an error (fatal) or U+FFFD.
    pub fn decode(&mut self, bytes: &[u8], last: bool) -> Result<String> {
        let capacity = if self.fatal {
            self.inner
                .max_utf8_buffer_length_without_replacement(bytes.len())
        } else {
            self.inner.max_utf8_buffer_length(bytes.len())
        };
        let mut out = String::with_capacity(capacity.unwrap_or(bytes.len() * 3 + 4));

        let mut offset = 0usize;
        loop {
            let input = &bytes[offset..];
            if self.fatal {
                let (result, read) =
                    self.inner
                        .decode_to_string_without_replacement(input, &mut out, last);
                offset += read;
                self.consumed += read as u64;
                match result {
                    DecoderResult::InputEmpty => break,
                    DecoderResult::OutputFull => {
                        out.reserve(self.grow_hint(bytes.len() - offset));
                    }
                    DecoderResult::Malformed(_, _) => {
                        return Err(CsvError::Decode {
                            charset: self.charset.clone(),
                            ctx: ErrorContext {
                                source: self.source.clone(),
                                offset: Some(self.consumed),
                                ..ErrorContext::default()
                            },
                        });
                    }
                }
            } else {
                let (result, read, _replaced) = self.inner.decode_to_string(input, &mut out, last);
                offset += read;
                self.consumed += read as u64;
                match result {
                    CoderResult::InputEmpty => break,
                    CoderResult::OutputFull => {
                        out.reserve(self.grow_hint(bytes.len() - offset));
                    }
                }
            }
        }
        Ok(out)
    }

    fn grow_hint(&self, remaining: usize) -> usize {
        remaining.saturating_mul(3).max(16)
    }
}

/// Resolve a caller-supplied charset label.
pub fn resolve_charset(label: &str, allow_non_standard: bool) -> Result<&'static Encoding> {
    let encoding = Encoding::for_label(label.trim().as_bytes()).ok_or_else(|| {
        CsvError::UnsupportedCharset {
            label: label.to_string(),
        }
    })?;
    if !allow_non_standard && !STANDARD_CHARSETS.contains(&encoding.name()) {
        return Err(CsvError::UnsupportedCharset {
            label: label.to_string(),
        });
    }
    Ok(encoding)
}
