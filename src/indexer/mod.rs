//! Data-parallel indexer: an alternate front end for large binary inputs.
//!
//! Instead of the character-by-character lexer scan, the indexer locates
//! every unescaped field and record separator with a two-pass scan (GPU
//! when a device is available, scalar CPU otherwise) and assembles fields
//! on the host from the packed separator offsets. CRLF trimming, quote
//! unescaping and streaming carry-over all happen on the host.
//!
//! For any input whose record separators are LF or CRLF, the indexer path
//! produces the same records as the lexer/assembler path under identical
//! options; [`IndexedCsvParser`] reuses the regular [`RecordAssembler`] so
//! the column-count policy is shared rather than reimplemented.

pub mod gpu;
pub mod scan;

mod assemble;

pub use self::assemble::unescape_field;
pub use self::gpu::DevicePool;
pub use self::scan::{
    pack_separator, unpack_offset, unpack_type, ScanResult, SEP_FIELD, SEP_RECORD,
};

use std::sync::Arc;

use tracing::warn;

use crate::assembler::RecordAssembler;
use crate::cancel::{self, CancelToken};
use crate::error::{CsvError, ErrorContext, Result};
use crate::options::AssemblerOptions;
use crate::record::Record;
use crate::token::{Token, TokenFollows};

use self::assemble::{split_rows, split_rows_final, BOM};
use self::gpu::GpuScanner;
use self::scan::{quote_parity, CpuScanner, MAX_OFFSET};

/// Observation callback fired when the indexer downgrades to the CPU scan.
pub type FallbackHook = Arc<dyn Fn(&CsvError) + Send + Sync>;

/// Options for [`CsvIndexer`].
#[derive(Clone, Default)]
pub struct IndexerOptions {
    /// Field delimiter byte. The indexer operates on bytes, so only
    /// single-byte delimiters are supported here.
    pub delimiter: Option<u8>,
    /// Quote byte.
    pub quotation: Option<u8>,
    /// Fail on GPU errors instead of falling back to the CPU scan.
    pub strict: bool,
    /// Skip GPU acquisition entirely.
    pub force_cpu: bool,
    /// Fired when the engine selects the CPU scan after a GPU failure.
    pub on_fallback: Option<FallbackHook>,
    pub source: Option<String>,
    pub signal: Option<CancelToken>,
}

impl std::fmt::Debug for IndexerOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexerOptions")
            .field("delimiter", &self.delimiter)
            .field("quotation", &self.quotation)
            .field("strict", &self.strict)
            .field("force_cpu", &self.force_cpu)
            .finish()
    }
}

enum Backend {
    Gpu(GpuScanner),
    Cpu(CpuScanner),
}

/// Streaming separator indexer over byte chunks.
///
/// Feed chunks with [`CsvIndexer::index_chunk`], which returns the rows the
/// chunk completed, then call [`CsvIndexer::finish`] for the trailing row.
pub struct CsvIndexer {
    delimiter: u8,
    quote: u8,
    strict: bool,
    force_cpu: bool,
    on_fallback: Option<FallbackHook>,
    source: Option<String>,
    signal: Option<CancelToken>,

    backend: Option<Backend>,
    /// Bytes after the last record separator, carried to the next chunk.
    leftover: Vec<u8>,
    /// Quote state entering `leftover`.
    in_quote: bool,
    first_chunk: bool,
    /// One automatic device re-acquire has been spent.
    reacquired: bool,
    processed_bytes: u64,
    finished: bool,
}

impl CsvIndexer {
    pub fn new(options: IndexerOptions) -> Result<Self> {
        let delimiter = options.delimiter.unwrap_or(b',');
        let quote = options.quotation.unwrap_or(b'"');
        if delimiter == quote {
            return Err(CsvError::invalid_option(
                "delimiter and quotation must differ",
            ));
        }
        if delimiter == b'\r' || delimiter == b'\n' || quote == b'\r' || quote == b'\n' {
            return Err(CsvError::invalid_option(
                "delimiter and quotation must not be CR or LF",
            ));
        }
        Ok(Self {
            delimiter,
            quote,
            strict: options.strict,
            force_cpu: options.force_cpu,
            on_fallback: options.on_fallback,
            source: options.source,
            signal: options.signal,
            backend: None,
            leftover: Vec::new(),
            in_quote: false,
            first_chunk: true,
            reacquired: false,
            processed_bytes: 0,
            finished: false,
        })
    }

    /// Total bytes consumed into completed rows so far.
    pub fn processed_bytes(&self) -> u64 {
        self.processed_bytes
    }

    /// Whether the GPU backend is in use (after the first scan).
    pub fn is_gpu(&self) -> bool {
        matches!(self.backend, Some(Backend::Gpu(_)))
    }

    /// Index one chunk, returning the rows it completed. Bytes after the
    /// last record separator are carried over.
    pub async fn index_chunk(&mut self, chunk: &[u8]) -> Result<Vec<Vec<String>>> {
        cancel::check(self.signal.as_ref())?;
        self.ensure_open()?;

        let mut working = std::mem::take(&mut self.leftover);
        working.extend_from_slice(chunk);

        if self.first_chunk {
            if working.len() < BOM.len() && BOM.starts_with(&working) {
                // Not enough bytes to rule the BOM in or out yet.
                self.leftover = working;
                return Ok(Vec::new());
            }
            if working.starts_with(BOM) {
                working.drain(..BOM.len());
                self.processed_bytes += BOM.len() as u64;
            }
            self.first_chunk = false;
        }

        self.check_indexable(&working)?;
        let scanned = self.scan(&working).await?;
        let assembled = split_rows(&working, &scanned.separators, self.quote);

        let leftover = working[assembled.processed..].to_vec();
        // Quote state entering the leftover: the end state rewound over the
        // leftover's own quote bytes.
        self.in_quote = scanned.end_in_quote ^ quote_parity(&leftover, self.quote);
        self.processed_bytes += assembled.processed as u64;
        self.leftover = leftover;

        Ok(assembled.rows)
    }

    /// Finalize: emit the trailing row, if any. Fails with
    /// [`CsvError::UnexpectedEof`] when the input ends inside a quoted
    /// region, matching the lexer.
    pub async fn finish(&mut self) -> Result<Vec<Vec<String>>> {
        cancel::check(self.signal.as_ref())?;
        self.ensure_open()?;
        self.finished = true;

        let mut working = std::mem::take(&mut self.leftover);
        if self.first_chunk && working.starts_with(BOM) {
            working.drain(..BOM.len());
            self.processed_bytes += BOM.len() as u64;
        }
        if working.is_empty() {
            return Ok(Vec::new());
        }

        self.check_indexable(&working)?;
        let scanned = self.scan(&working).await?;
        if scanned.end_in_quote {
            return Err(CsvError::UnexpectedEof {
                ctx: ErrorContext {
                    source: self.source.clone(),
                    offset: Some(self.processed_bytes + working.len() as u64),
                    ..ErrorContext::default()
                },
            });
        }

        self.processed_bytes += working.len() as u64;
        Ok(split_rows_final(&working, &scanned.separators, self.quote))
    }

    fn ensure_open(&self) -> Result<()> {
        if self.finished {
            return Err(CsvError::invalid_option(
                "indexer is closed (already finished or failed)",
            ));
        }
        Ok(())
    }

    fn check_indexable(&self, working: &[u8]) -> Result<()> {
        if working.len() > MAX_OFFSET as usize {
            return Err(CsvError::BufferExceeded {
                limit: MAX_OFFSET as usize,
                ctx: ErrorContext {
                    source: self.source.clone(),
                    offset: Some(self.processed_bytes),
                    ..ErrorContext::default()
                },
            });
        }
        Ok(())
    }

    async fn scan(&mut self, working: &[u8]) -> Result<ScanResult> {
        self.ensure_backend().await?;
        let Some(backend) = self.backend.take() else {
            return Err(CsvError::BackendUnavailable {
                message: "indexer backend was not initialized".to_string(),
            });
        };

        let outcome;
        let backend = match backend {
            Backend::Cpu(mut scanner) => {
                scanner.set_in_quote(self.in_quote);
                outcome = Ok(scanner.scan(working, 0));
                Backend::Cpu(scanner)
            }
            Backend::Gpu(mut scanner) => {
                scanner.set_in_quote(self.in_quote);
                match scanner.scan(working).await {
                    Ok(result) => {
                        outcome = Ok(result);
                        Backend::Gpu(scanner)
                    }
                    Err(err @ CsvError::DeviceLost { .. }) if !self.reacquired => {
                        // One automatic re-acquire before giving up on GPU.
                        self.reacquired = true;
                        warn!(error = %err, "GPU device lost, re-acquiring once");
                        drop(scanner);
                        match GpuScanner::new(self.delimiter, self.quote).await {
                            Ok(mut fresh) => {
                                fresh.set_in_quote(self.in_quote);
                                match fresh.scan(working).await {
                                    Ok(result) => {
                                        outcome = Ok(result);
                                        Backend::Gpu(fresh)
                                    }
                                    Err(err) => {
                                        let (result, cpu) = self.downgrade(working, err);
                                        outcome = result;
                                        cpu
                                    }
                                }
                            }
                            Err(err) => {
                                let (result, cpu) = self.downgrade(working, err);
                                outcome = result;
                                cpu
                            }
                        }
                    }
                    Err(err) => {
                        let (result, cpu) = self.downgrade(working, err);
                        outcome = result;
                        cpu
                    }
                }
            }
        };

        self.backend = Some(backend);
        if outcome.is_err() {
            self.finished = true;
        }
        outcome
    }

    /// Transparent GPU -> CPU downgrade, unless strict mode forbids it.
    fn downgrade(&self, working: &[u8], err: CsvError) -> (Result<ScanResult>, Backend) {
        let mut scanner = CpuScanner::new(self.delimiter, self.quote);
        if self.strict {
            return (Err(err), Backend::Cpu(scanner));
        }
        warn!(error = %err, "GPU indexing failed, falling back to the CPU scan");
        if let Some(hook) = &self.on_fallback {
            hook(&err);
        }
        scanner.set_in_quote(self.in_quote);
        let result = scanner.scan(working, 0);
        (Ok(result), Backend::Cpu(scanner))
    }

    async fn ensure_backend(&mut self) -> Result<()> {
        if self.backend.is_some() {
            return Ok(());
        }
        if self.force_cpu {
            self.backend = Some(Backend::Cpu(CpuScanner::new(self.delimiter, self.quote)));
            return Ok(());
        }
        match GpuScanner::new(self.delimiter, self.quote).await {
            Ok(scanner) => {
                self.backend = Some(Backend::Gpu(scanner));
                Ok(())
            }
            Err(err) if !self.strict => {
                warn!(error = %err, "no GPU backend, using the CPU scan");
                if let Some(hook) = &self.on_fallback {
                    hook(&err);
                }
                self.backend = Some(Backend::Cpu(CpuScanner::new(self.delimiter, self.quote)));
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}

/// Options for [`IndexedCsvParser`].
#[derive(Debug, Clone, Default)]
pub struct IndexedParserOptions {
    pub indexer: IndexerOptions,
    pub assembler: AssemblerOptions,
}

/// Record parser over the indexer front end.
///
/// Assembled rows are fed through the regular [`RecordAssembler`], so
/// header capture and the column-count strategies behave exactly as on the
/// lexer path.
pub struct IndexedCsvParser {
    indexer: CsvIndexer,
    assembler: RecordAssembler,
}

impl IndexedCsvParser {
    pub fn new(options: IndexedParserOptions) -> Result<Self> {
        Ok(Self {
            indexer: CsvIndexer::new(options.indexer)?,
            assembler: RecordAssembler::new(options.assembler)?,
        })
    }

    pub async fn process_chunk(&mut self, chunk: &[u8]) -> Result<Vec<Record>> {
        let rows = self.indexer.index_chunk(chunk).await?;
        self.records_from_rows(rows)
    }

    pub async fn finish(&mut self) -> Result<Vec<Record>> {
        let rows = self.indexer.finish().await?;
        let mut records = self.records_from_rows(rows)?;
        records.extend(self.assembler.flush()?);
        Ok(records)
    }

    /// Whether the GPU backend is in use (after the first scan).
    pub fn is_gpu(&self) -> bool {
        self.indexer.is_gpu()
    }

    fn records_from_rows(&mut self, rows: Vec<Vec<String>>) -> Result<Vec<Record>> {
        let mut out = Vec::new();
        for row in rows {
            let last = row.len().saturating_sub(1);
            for (i, value) in row.into_iter().enumerate() {
                let follows = if i == last {
                    TokenFollows::RecordSep
                } else {
                    TokenFollows::FieldSep
                };
                let token = Token {
                    value,
                    follows,
                    sep_len: 1,
                    location: None,
                };
                self.assembler.push(token, &mut out)?;
            }
        }
        Ok(out)
    }
}

/// One-shot convenience over [`IndexedCsvParser`].
pub async fn parse_bytes_indexed(
    input: &[u8],
    options: IndexedParserOptions,
) -> Result<Vec<Record>> {
    let mut parser = IndexedCsvParser::new(options)?;
    let mut records = parser.process_chunk(input).await?;
    records.extend(parser.finish().await?);
    Ok(records)
}
