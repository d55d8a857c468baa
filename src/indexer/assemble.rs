//! Host-side field assembly from packed separators.
//!
//! Given the scanned separator array and the raw bytes, the host walks the
//! separators in order, decodes each byte range as a field, trims the CR of
//! a CRLF pair, strips outer quotes and collapses doubled quotes. Rows end
//! at record separators; bytes after the last record separator are leftover
//! carried to the next chunk.

use std::borrow::Cow;

use memchr::memchr;

use super::scan::{pack_separator, unpack_offset, unpack_type, SEP_RECORD};

/// UTF-8 byte-order mark.
pub(crate) const BOM: &[u8] = b"\xEF\xBB\xBF";

/// Unescape a quoted CSV field.
///
/// Removes surrounding quotes and collapses doubled quotes. Borrows when no
/// rewriting is needed.
pub fn unescape_field(field: &[u8], quote: u8) -> Cow<'_, [u8]> {
    if field.len() < 2 || field[0] != quote || field[field.len() - 1] != quote {
        return Cow::Borrowed(field);
    }

    let inner = &field[1..field.len() - 1];
    if memchr(quote, inner).is_none() {
        return Cow::Borrowed(inner);
    }

    let mut out = Vec::with_capacity(inner.len());
    let mut i = 0;
    while i < inner.len() {
        if inner[i] == quote && i + 1 < inner.len() && inner[i + 1] == quote {
            out.push(quote);
            i += 2;
        } else {
            out.push(inner[i]);
            i += 1;
        }
    }
    Cow::Owned(out)
}

/// Rows assembled from one scan, plus how many bytes they covered.
#[derive(Debug, Default)]
pub(crate) struct AssembledRows {
    pub rows: Vec<Vec<String>>,
    /// Bytes consumed, including the final record separator. The remainder
    /// of the buffer is leftover for the next chunk.
    pub processed: usize,
}

/// Split the buffer into rows using the separators up to and including the
/// last record separator. Bytes past it stay unconsumed.
pub(crate) fn split_rows(buf: &[u8], separators: &[u32], quote: u8) -> AssembledRows {
    let last_record = separators
        .iter()
        .rposition(|&packed| unpack_type(packed) == SEP_RECORD);
    let Some(last_record) = last_record else {
        return AssembledRows::default();
    };

    let processed = unpack_offset(separators[last_record]) as usize + 1;
    let rows = rows_from_separators(buf, &separators[..=last_record], quote);
    AssembledRows { rows, processed }
}

/// Split the final buffer: every separator is used and a trailing row
/// without a record separator is still emitted, closed by a virtual record
/// separator at end of input.
pub(crate) fn split_rows_final(buf: &[u8], separators: &[u32], quote: u8) -> Vec<Vec<String>> {
    if buf.is_empty() && separators.is_empty() {
        return Vec::new();
    }

    let ends_with_record = separators.last().is_some_and(|&packed| {
        unpack_type(packed) == SEP_RECORD && unpack_offset(packed) as usize + 1 == buf.len()
    });
    if ends_with_record {
        return rows_from_separators(buf, separators, quote);
    }

    // Close the dangling row. The virtual separator also trims a bare
    // trailing CR, matching the lexer's lone-CR handling at end of input.
    let mut all: Vec<u32> = separators.to_vec();
    all.push(pack_separator(buf.len() as u32, SEP_RECORD));
    rows_from_separators(buf, &all, quote)
}

fn rows_from_separators(buf: &[u8], separators: &[u32], quote: u8) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut field_start = 0usize;

    for &packed in separators {
        let offset = unpack_offset(packed) as usize;
        let sep_type = unpack_type(packed);

        let mut field = &buf[field_start..offset.min(buf.len())];
        // CRLF normalization: the CR belongs to the separator, not the
        // field.
        if sep_type == SEP_RECORD && field.last() == Some(&b'\r') {
            field = &field[..field.len() - 1];
        }
        current.push(decode_field(field, quote));
        field_start = offset + 1;

        if sep_type == SEP_RECORD {
            rows.push(std::mem::take(&mut current));
        }
    }

    if !current.is_empty() {
        rows.push(current);
    }
    rows
}

fn decode_field(bytes: &[u8], quote: u8) -> String {
    let unescaped = unescape_field(bytes, quote);
    match std::str::from_utf8(&unescaped) {
        Ok(s) => s.to_string(),
        Err(_) => String::from_utf8_lossy(&unescaped).into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::scan::CpuScanner;

    fn scan_and_split(input: &[u8]) -> AssembledRows {
        let mut scanner = CpuScanner::new(b',', b'"');
        let result = scanner.scan(input, 0);
        split_rows(input, &result.separators, b'"')
    }

    #[test]
    fn test_unescape_field() {
        assert_eq!(&*unescape_field(b"hello", b'"'), b"hello");
        assert_eq!(&*unescape_field(b"\"hello\"", b'"'), b"hello");
        assert_eq!(
            &*unescape_field(b"\"hello\"\"world\"", b'"'),
            b"hello\"world"
        );
        assert_eq!(&*unescape_field(b"\"a\"\"b\"\"c\"", b'"'), b"a\"b\"c");
        // A lone quote is not a quoted field.
        assert_eq!(&*unescape_field(b"\"", b'"'), b"\"");
    }

    #[test]
    fn test_split_simple_rows() {
        let assembled = scan_and_split(b"a,b,c\n1,2,3\n");
        assert_eq!(assembled.rows.len(), 2);
        assert_eq!(assembled.rows[0], vec!["a", "b", "c"]);
        assert_eq!(assembled.rows[1], vec!["1", "2", "3"]);
        assert_eq!(assembled.processed, 12);
    }

    #[test]
    fn test_split_leaves_partial_row_unconsumed() {
        let assembled = scan_and_split(b"a,b\n1,2");
        assert_eq!(assembled.rows.len(), 1);
        assert_eq!(assembled.processed, 4);
    }

    #[test]
    fn test_split_crlf_trim() {
        let assembled = scan_and_split(b"a,b\r\n1,2\r\n");
        assert_eq!(assembled.rows[0], vec!["a", "b"]);
        assert_eq!(assembled.rows[1], vec!["1", "2"]);
    }

    #[test]
    fn test_split_quoted_fields() {
        let assembled = scan_and_split(b"\"hello, world\",\"say \"\"hi\"\"\"\nx,y\n");
        assert_eq!(assembled.rows[0], vec!["hello, world", "say \"hi\""]);
    }

    #[test]
    fn test_split_empty_line_is_single_empty_field() {
        let assembled = scan_and_split(b"\n");
        assert_eq!(assembled.rows, vec![vec![String::new()]]);
    }

    #[test]
    fn test_final_split_emits_trailing_row() {
        let input = b"a,b";
        let mut scanner = CpuScanner::new(b',', b'"');
        let result = scanner.scan(input, 0);
        let rows = split_rows_final(input, &result.separators, b'"');
        assert_eq!(rows, vec![vec!["a".to_string(), "b".to_string()]]);
    }

    #[test]
    fn test_final_split_trailing_field_sep() {
        let input = b"a,";
        let mut scanner = CpuScanner::new(b',', b'"');
        let result = scanner.scan(input, 0);
        let rows = split_rows_final(input, &result.separators, b'"');
        assert_eq!(rows, vec![vec!["a".to_string(), String::new()]]);
    }

    #[test]
    fn test_final_split_empty_input() {
        let rows = split_rows_final(b"", &[], b'"');
        assert!(rows.is_empty());
    }
}
