//! Single-threaded validation passes.
//!
//! Run after indexing when an error collector is present: empty header,
//! duplicate column names, mixed line endings, inconsistent field counts.
//! Structural and advisory findings never abort parsing by themselves; the
//! collector's mode decides.

use indexmap::IndexSet;
use memchr::memchr_iter;

use crate::error::{context_snippet, ErrorCode, ErrorCollector, Severity};

/// The header row must not be empty: an input starting with a line
/// terminator has no column names at all.
pub fn check_empty_header(buf: &[u8], errors: &mut ErrorCollector) -> bool {
    if buf.is_empty() {
        return true;
    }
    if buf[0] == b'\n' || buf[0] == b'\r' {
        errors.record(
            ErrorCode::EmptyHeader,
            Severity::Error,
            1,
            1,
            0,
            "header row is empty",
            "",
        );
        return false;
    }
    true
}

/// Tokenize the header row (honoring quotes) and warn on duplicate names.
pub fn check_duplicate_columns(
    buf: &[u8],
    errors: &mut ErrorCollector,
    delimiter: u8,
    quote: u8,
) {
    if buf.is_empty() {
        return;
    }

    // Find the end of the first record.
    let mut header_end = 0;
    let mut in_quote = false;
    while header_end < buf.len() {
        let b = buf[header_end];
        if b == quote {
            in_quote = !in_quote;
        } else if !in_quote && (b == b'\n' || b == b'\r') {
            break;
        }
        header_end += 1;
    }

    let mut fields: Vec<String> = Vec::new();
    let mut current = String::new();
    in_quote = false;
    for &b in &buf[..header_end] {
        if b == quote {
            in_quote = !in_quote;
        } else if !in_quote && b == delimiter {
            fields.push(std::mem::take(&mut current));
        } else if b != b'\r' {
            current.push(b as char);
        }
    }
    fields.push(current);

    let mut seen: IndexSet<&str> = IndexSet::with_capacity(fields.len());
    for (i, name) in fields.iter().enumerate() {
        if !seen.insert(name.as_str()) {
            errors.record(
                ErrorCode::DuplicateColumnNames,
                Severity::Warning,
                1,
                i + 1,
                0,
                format!("duplicate column name: '{name}'"),
                name.clone(),
            );
        }
    }
}

/// Count CRLF / bare LF / bare CR terminators; more than one kind present
/// is worth a warning.
pub fn check_line_endings(buf: &[u8], errors: &mut ErrorCollector) {
    let mut crlf = false;
    let mut cr = false;
    for i in memchr_iter(b'\r', buf) {
        if buf.get(i + 1) == Some(&b'\n') {
            crlf = true;
        } else {
            cr = true;
        }
    }
    let mut lf = false;
    for i in memchr_iter(b'\n', buf) {
        if i == 0 || buf[i - 1] != b'\r' {
            lf = true;
            break;
        }
    }

    let kinds = crlf as u8 + lf as u8 + cr as u8;
    if kinds > 1 {
        errors.record(
            ErrorCode::MixedLineEndings,
            Severity::Warning,
            1,
            1,
            0,
            "mixed line endings detected",
            "",
        );
    }
}

/// The header row defines the expected field count; every later record with
/// a different count is an error at that record's first byte.
pub fn check_field_counts(buf: &[u8], errors: &mut ErrorCollector, delimiter: u8, quote: u8) {
    if buf.is_empty() {
        return;
    }

    let mut expected_fields = 0usize;
    let mut current_fields = 1usize;
    let mut current_line = 1usize;
    let mut line_start = 0usize;
    let mut in_quote = false;
    let mut header_done = false;

    let report =
        |errors: &mut ErrorCollector, line: usize, start: usize, expected: usize, found: usize| {
            errors.record(
                ErrorCode::InconsistentFieldCount,
                Severity::Error,
                line,
                1,
                start,
                format!("expected {expected} fields but found {found}"),
                context_snippet(buf, start, 40),
            );
        };

    let mut i = 0usize;
    while i < buf.len() {
        let b = buf[i];
        if b == quote {
            in_quote = !in_quote;
        } else if !in_quote {
            let record_end =
                b == b'\n' || (b == b'\r' && buf.get(i + 1) != Some(&b'\n'));
            if b == delimiter {
                current_fields += 1;
            } else if record_end {
                if !header_done {
                    expected_fields = current_fields;
                    header_done = true;
                } else if current_fields != expected_fields {
                    report(errors, current_line, line_start, expected_fields, current_fields);
                    if errors.should_stop() {
                        return;
                    }
                }
                current_fields = 1;
                current_line += 1;
                line_start = i + 1;
            }
        }
        i += 1;
    }

    // Last record without a trailing terminator.
    if header_done && line_start < buf.len() && current_fields != expected_fields {
        report(errors, current_line, line_start, expected_fields, current_fields);
    }
}
