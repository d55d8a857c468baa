//! Asynchronous stream pipeline connecting decompression, charset decoding,
//! the lexer and the assembler.
//!
//! The pipeline is pull-based and single-threaded cooperative: each call to
//! [`CsvRecordStream::next_record`] pulls just enough input to produce the
//! next record, bounded by the queuing high-water marks. Cooperative yield
//! points (`tokio::task::yield_now`) are inserted every
//! `backpressure_check_interval` produced items, and the cancellation token
//! is consulted at the start of each public call and at every yield point.

use std::collections::VecDeque;
use std::pin::Pin;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::{debug, trace};

use async_compression::tokio::bufread::{
    BrotliDecoder, DeflateDecoder, GzipDecoder, ZlibDecoder,
};

use crate::assembler::RecordAssembler;
use crate::cancel::CancelToken;
use crate::encoding::CharsetDecoder;
use crate::error::{CsvError, ErrorContext, Result};
use crate::lexer::CsvLexer;
use crate::options::{CompressionFormat, Limit, PipelineOptions, QueuingOptions};
use crate::record::Record;
use crate::token::Token;

type ByteStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;
type CharStream = Pin<Box<dyn Stream<Item = String> + Send>>;

/// Wire a decompressor in front of a byte stream.
fn decompress(stream: ByteStream, format: CompressionFormat) -> ByteStream {
    let reader = StreamReader::new(stream);
    match format {
        CompressionFormat::Gzip => Box::pin(ReaderStream::new(GzipDecoder::new(reader))),
        CompressionFormat::Deflate => Box::pin(ReaderStream::new(ZlibDecoder::new(reader))),
        CompressionFormat::DeflateRaw => Box::pin(ReaderStream::new(DeflateDecoder::new(reader))),
        CompressionFormat::Brotli => Box::pin(ReaderStream::new(BrotliDecoder::new(reader))),
    }
}

enum Source {
    Chars(CharStream),
    Bytes {
        stream: ByteStream,
        decoder: CharsetDecoder,
        consumed: usize,
        max_binary_size: Limit,
        source: Option<String>,
        finalized: bool,
    },
}

/// Asynchronous record stream over character or byte input.
///
/// Records are emitted in input order; the stream is single-shot and ends
/// after the trailing flush (or the first error, which is fatal).
pub struct CsvRecordStream {
    source: Source,
    lexer: CsvLexer,
    assembler: RecordAssembler,
    queuing: QueuingOptions,
    token_check_interval: usize,
    record_check_interval: usize,
    signal: Option<CancelToken>,

    tokens: VecDeque<Token>,
    ready: VecDeque<Record>,
    input_done: bool,
    lexer_flushed: bool,
    assembler_flushed: bool,
    failed: bool,
    done: bool,
}

impl CsvRecordStream {
    /// Build a pipeline over a stream of character chunks.
    pub fn from_char_stream<S>(chunks: S, options: PipelineOptions) -> Result<Self>
    where
        S: Stream<Item = String> + Send + 'static,
    {
        options.validate()?;
        Self::build(Source::Chars(Box::pin(chunks)), options)
    }

    /// Build a pipeline over a stream of byte chunks, applying the
    /// configured decompression and charset decoding.
    pub fn from_byte_stream<S>(bytes: S, options: PipelineOptions) -> Result<Self>
    where
        S: Stream<Item = std::io::Result<Bytes>> + Send + 'static,
    {
        options.validate()?;
        let mut stream: ByteStream = Box::pin(bytes);
        if let Some(format) = options.decompression {
            debug!(format = format.label(), "decompressing input");
            stream = decompress(stream, format);
        }
        let decoder =
            CharsetDecoder::with_source(&options.decoder, options.lexer.source.as_deref())?;
        debug!(charset = decoder.charset(), "charset decoder selected");
        let source = Source::Bytes {
            stream,
            decoder,
            consumed: 0,
            max_binary_size: options.max_binary_size(),
            source: options.lexer.source.clone(),
            finalized: false,
        };
        Self::build(source, options)
    }

    /// Convenience: a pipeline over one whole string.
    pub fn from_string(input: String, options: PipelineOptions) -> Result<Self> {
        Self::from_char_stream(futures::stream::iter([input]), options)
    }

    /// Convenience: a pipeline over one whole byte buffer.
    pub fn from_bytes(input: Vec<u8>, options: PipelineOptions) -> Result<Self> {
        let chunks = vec![Ok::<Bytes, std::io::Error>(Bytes::from(input))];
        Self::from_byte_stream(futures::stream::iter(chunks), options)
    }

    fn build(source: Source, options: PipelineOptions) -> Result<Self> {
        let signal = options.signal.clone();
        let token_check_interval = options
            .token_check_interval
            .unwrap_or(PipelineOptions::DEFAULT_TOKEN_CHECK_INTERVAL);
        let record_check_interval = options
            .record_check_interval
            .unwrap_or(PipelineOptions::DEFAULT_RECORD_CHECK_INTERVAL);
        Ok(Self {
            source,
            lexer: CsvLexer::new(options.lexer)?,
            assembler: RecordAssembler::new(options.assembler)?,
            queuing: options.queuing,
            token_check_interval,
            record_check_interval,
            signal,
            tokens: VecDeque::new(),
            ready: VecDeque::new(),
            input_done: false,
            lexer_flushed: false,
            assembler_flushed: false,
            failed: false,
            done: false,
        })
    }

    /// Pull the next record. `None` marks the end of the stream; an error is
    /// fatal and ends the stream as well.
    pub async fn next_record(&mut self) -> Option<Result<Record>> {
        if self.failed || self.done {
            return None;
        }
        match self.advance().await {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            }
        }
    }

    /// Adapt into a [`futures::Stream`] of records.
    pub fn into_stream(self) -> impl Stream<Item = Result<Record>> {
        futures::stream::unfold(self, |mut this| async move {
            this.next_record().await.map(|item| (item, this))
        })
    }

    /// Drain the whole pipeline into a vector.
    pub async fn collect(mut self) -> Result<Vec<Record>> {
        let mut records = Vec::new();
        while let Some(record) = self.next_record().await {
            records.push(record?);
        }
        Ok(records)
    }

    fn check_cancel(&self) -> Result<()> {
        crate::cancel::check(self.signal.as_ref())
    }

    async fn advance(&mut self) -> Result<Option<Record>> {
        self.check_cancel()?;
        loop {
            if let Some(record) = self.ready.pop_front() {
                return Ok(Some(record));
            }
            if !self.tokens.is_empty() {
                self.assemble_queued().await?;
                continue;
            }
            if !self.input_done {
                self.pull_chunk().await?;
                continue;
            }
            if !self.lexer_flushed {
                self.lexer_flushed = true;
                let tokens = self.lexer.flush()?;
                trace!(count = tokens.len(), "lexer flushed");
                self.tokens.extend(tokens);
                continue;
            }
            if !self.assembler_flushed {
                self.assembler_flushed = true;
                let records = self.assembler.flush()?;
                self.ready.extend(records);
                continue;
            }
            return Ok(None);
        }
    }

    /// Feed queued tokens to the assembler, up to the record high-water
    /// mark, yielding every `record_check_interval` produced records.
    async fn assemble_queued(&mut self) -> Result<()> {
        let mut produced = Vec::new();
        let mut since_yield = 0usize;
        while let Some(token) = self.tokens.pop_front() {
            let before = produced.len();
            self.assembler.push(token, &mut produced)?;
            if produced.len() > before {
                since_yield += produced.len() - before;
                if since_yield >= self.record_check_interval {
                    since_yield = 0;
                    tokio::task::yield_now().await;
                    self.check_cancel()?;
                }
            }
            if self.ready.len() + produced.len() >= self.queuing.record_high_water_mark {
                break;
            }
        }
        self.ready.extend(produced);
        Ok(())
    }

    /// Pull one chunk from the source and lex it, yielding every
    /// `token_check_interval` produced tokens.
    async fn pull_chunk(&mut self) -> Result<()> {
        let Some(chunk) = self.next_chars().await? else {
            self.input_done = true;
            return Ok(());
        };
        // Feed in bounded slices so one oversized chunk cannot bypass the
        // input-side high-water mark.
        let mut rest = chunk.as_str();
        while !rest.is_empty() {
            let piece = take_units(rest, self.queuing.lexer_in_high_water_mark);
            let tokens = self.lexer.feed(piece)?;
            rest = &rest[piece.len()..];
            let mut since_yield = 0usize;
            for token in tokens {
                self.tokens.push_back(token);
                since_yield += 1;
                if since_yield >= self.token_check_interval {
                    since_yield = 0;
                    tokio::task::yield_now().await;
                    self.check_cancel()?;
                }
            }
        }
        Ok(())
    }

    /// Next decoded character chunk, or `None` at end of input.
    async fn next_chars(&mut self) -> Result<Option<String>> {
        match &mut self.source {
            Source::Chars(stream) => Ok(stream.next().await),
            Source::Bytes {
                stream,
                decoder,
                consumed,
                max_binary_size,
                source,
                finalized,
            } => {
                if *finalized {
                    return Ok(None);
                }
                loop {
                    match stream.next().await {
                        Some(chunk) => {
                            let chunk = chunk?;
                            if let Limit::Bounded(limit) = *max_binary_size {
                                if *consumed + chunk.len() > limit {
                                    return Err(CsvError::BinaryTooLarge {
                                        limit,
                                        ctx: ErrorContext {
                                            source: source.clone(),
                                            offset: Some(*consumed as u64),
                                            ..ErrorContext::default()
                                        },
                                    });
                                }
                            }
                            *consumed += chunk.len();
                            let text = decoder.decode(&chunk, false)?;
                            if text.is_empty() {
                                // A chunk may end inside a multi-byte
                                // sequence; keep pulling.
                                continue;
                            }
                            return Ok(Some(text));
                        }
                        None => {
                            *finalized = true;
                            let tail = decoder.decode(&[], true)?;
                            if tail.is_empty() {
                                return Ok(None);
                            }
                            return Ok(Some(tail));
                        }
                    }
                }
            }
        }
    }
}

/// Longest prefix of `s` of at most `units` UTF-16 code units, never empty
/// for a non-empty input.
fn take_units(s: &str, units: usize) -> &str {
    let mut taken = 0usize;
    for (i, ch) in s.char_indices() {
        let next = taken + ch.len_utf16();
        if next > units && taken > 0 {
            return &s[..i];
        }
        taken = next;
    }
    s
}
