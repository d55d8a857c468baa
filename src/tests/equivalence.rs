//! Backend equivalence: the indexer front end must produce the same
//! records as the lexer/assembler path under identical options.
//!
//! The indexer is exercised with `force_cpu` so these tests are
//! deterministic on machines without a GPU; an auto-backend smoke test
//! runs the same comparison through whichever backend the machine offers
//! (falling back transparently when no device exists).

use crate::indexer::{parse_bytes_indexed, IndexedParserOptions, IndexerOptions};
use crate::options::{AssemblerOptions, ColumnCountStrategy, OutputFormat};
use crate::parser::{parse_string, ParserOptions};
use crate::record::Record;

fn cpu_indexed(assembler: AssemblerOptions) -> IndexedParserOptions {
    IndexedParserOptions {
        indexer: IndexerOptions {
            force_cpu: true,
            ..Default::default()
        },
        assembler,
    }
}

async fn assert_paths_agree(input: &str, assembler: AssemblerOptions) -> Vec<Record> {
    let lexed = parse_string(
        input,
        ParserOptions {
            assembler: assembler.clone(),
            ..Default::default()
        },
    )
    .unwrap();
    let indexed = parse_bytes_indexed(input.as_bytes(), cpu_indexed(assembler))
        .await
        .unwrap();
    assert_eq!(indexed, lexed, "indexer and lexer paths disagree on {input:?}");
    lexed
}

#[tokio::test]
async fn test_equivalence_basic_records() {
    let records = assert_paths_agree("name,age\nAlice,42\nBob,69", AssemblerOptions::default())
        .await;
    assert_eq!(records.len(), 2);
}

#[tokio::test]
async fn test_equivalence_quoted_fields() {
    assert_paths_agree(
        "a,b,c\n\"hello, world\",\"line\nbreak\",plain\n",
        AssemblerOptions::default(),
    )
    .await;
}

#[tokio::test]
async fn test_equivalence_escaped_quotes() {
    assert_paths_agree("a,b\n\"He said \"\"hi\"\"\",2\n", AssemblerOptions::default()).await;
}

#[tokio::test]
async fn test_equivalence_crlf() {
    assert_paths_agree("a,b\r\n1,2\r\n3,4", AssemblerOptions::default()).await;
}

#[tokio::test]
async fn test_equivalence_empty_fields_and_lines() {
    let assembler = AssemblerOptions {
        output_format: OutputFormat::Array,
        column_count_strategy: Some(ColumnCountStrategy::Keep),
        header: Some(vec![]),
        ..Default::default()
    };
    assert_paths_agree("a,,c\n\n,,\nx\n", assembler).await;
}

#[tokio::test]
async fn test_equivalence_array_strategies() {
    for strategy in [
        ColumnCountStrategy::Fill,
        ColumnCountStrategy::Truncate,
    ] {
        let assembler = AssemblerOptions {
            output_format: OutputFormat::Array,
            column_count_strategy: Some(strategy),
            ..Default::default()
        };
        assert_paths_agree("h1,h2,h3\n1,2\n1,2,3,4\n", assembler).await;
    }
}

#[tokio::test]
async fn test_equivalence_no_trailing_newline() {
    assert_paths_agree("h\n1,2", AssemblerOptions::default()).await;
    assert_paths_agree("h,i\nlast,", AssemblerOptions::default()).await;
}

#[tokio::test]
async fn test_equivalence_unterminated_quote_errors_on_both_paths() {
    let input = "a\n\"unterminated";
    let lexed = parse_string(input, ParserOptions::default()).unwrap_err();
    let indexed = parse_bytes_indexed(
        input.as_bytes(),
        cpu_indexed(AssemblerOptions::default()),
    )
    .await
    .unwrap_err();
    assert_eq!(lexed.kind(), indexed.kind());
}

#[tokio::test]
async fn test_equivalence_chunked_indexing() {
    let input = "name,note\nAlice,\"multi\nline, with comma\"\nBob,plain\n";
    let lexed = parse_string(input, ParserOptions::default()).unwrap();

    // Feed the indexer byte-by-byte: quote state and leftover carry must
    // hold at every boundary.
    let mut parser = crate::indexer::IndexedCsvParser::new(cpu_indexed(
        AssemblerOptions::default(),
    ))
    .unwrap();
    let mut records = Vec::new();
    for byte in input.as_bytes() {
        records.extend(parser.process_chunk(std::slice::from_ref(byte)).await.unwrap());
    }
    records.extend(parser.finish().await.unwrap());
    assert_eq!(records, lexed);
}

#[tokio::test]
async fn test_equivalence_with_auto_backend() {
    // GPU when the machine has one, CPU fallback otherwise; the records
    // must be identical either way.
    let input = "name,age\nAlice,42\nBob,69\n";
    let lexed = parse_string(input, ParserOptions::default()).unwrap();
    let indexed = parse_bytes_indexed(
        input.as_bytes(),
        IndexedParserOptions::default(),
    )
    .await
    .unwrap();
    assert_eq!(indexed, lexed);
}

#[tokio::test]
async fn test_equivalence_bom_binary_input() {
    // The indexer strips the BOM on the first chunk, matching the binary
    // lexer with ignore_bom set.
    let records = parse_bytes_indexed(
        b"\xEF\xBB\xBFname\nAlice\n",
        cpu_indexed(AssemblerOptions::default()),
    )
    .await
    .unwrap();
    assert_eq!(records.len(), 1);
    let object = records[0].as_object().unwrap();
    assert_eq!(object.header(), ["name"]);
    assert_eq!(object.get("name"), Some("Alice"));
}
