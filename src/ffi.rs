//! C ABI wrapper: opaque handles over the parser, buffer, dialect, error
//! collector, and index.
//!
//! Every `*_new` has a matching `*_free`; handles are `Box`es behind raw
//! pointers and must not be shared across threads without external
//! synchronization. Strings returned by the error accessors stay valid
//! until the collector is cleared, grows new errors, or is destroyed;
//! callers copy if they need them longer.

use std::ffi::{c_char, CString};
use std::sync::Arc;

use crate::buffer::AlignedBuffer;
use crate::dialect::detector::{DetectionOptions, DialectDetector};
use crate::dialect::Dialect;
use crate::error::{ErrorCode, ErrorCollector, ErrorMode};
use crate::index::ParseIndex;
use crate::parser::{ParseOptions, Parser};

/// Success.
pub const VCSV_OK: i32 = 0;
/// A required argument was null.
pub const VCSV_ERR_NULL_ARG: i32 = -1;
/// Parsing failed with a typed error (allocation overflow, fatal syntax
/// error without a collector, I/O).
pub const VCSV_ERR_PARSE: i32 = -2;
/// Parsing finished but collected a fatal error.
pub const VCSV_ERR_FATAL: i32 = -3;
/// An index argument was out of range.
pub const VCSV_ERR_RANGE: i32 = -4;

/// Opaque parser handle.
pub struct VcsvParser(Parser);

/// Opaque padded-buffer handle.
pub struct VcsvBuffer(Arc<AlignedBuffer>);

/// Opaque dialect handle.
pub struct VcsvDialect(Dialect);

/// Opaque error collector handle with cached C strings.
pub struct VcsvErrors {
    inner: ErrorCollector,
    messages: Vec<CString>,
}

impl VcsvErrors {
    fn refresh(&mut self) {
        if self.messages.len() != self.inner.error_count() {
            self.messages = self
                .inner
                .errors()
                .iter()
                .map(|e| CString::new(e.to_string()).unwrap_or_default())
                .collect();
        }
    }
}

/// Opaque index handle; empty until a parse fills it.
pub struct VcsvIndex(Option<ParseIndex>);

fn code_to_i32(code: ErrorCode) -> i32 {
    match code {
        ErrorCode::UnclosedQuote => 1,
        ErrorCode::InvalidQuoteEscape => 2,
        ErrorCode::QuoteInUnquotedField => 3,
        ErrorCode::InconsistentFieldCount => 4,
        ErrorCode::FieldTooLarge => 5,
        ErrorCode::MixedLineEndings => 6,
        ErrorCode::InvalidUtf8 => 7,
        ErrorCode::NullByte => 8,
        ErrorCode::EmptyHeader => 9,
        ErrorCode::DuplicateColumnNames => 10,
        ErrorCode::AmbiguousSeparator => 11,
        ErrorCode::FileTooLarge => 12,
        ErrorCode::IoError => 13,
        ErrorCode::IndexAllocationOverflow => 14,
        ErrorCode::InternalError => 15,
    }
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// Create a parser that fans out over `num_threads` tasks.
#[no_mangle]
pub extern "C" fn vcsv_parser_new(num_threads: usize) -> *mut VcsvParser {
    Box::into_raw(Box::new(VcsvParser(Parser::new(num_threads))))
}

/// Destroy a parser handle.
///
/// # Safety
///
/// `parser` must be null or a pointer from [`vcsv_parser_new`], not yet
/// freed.
#[no_mangle]
pub unsafe extern "C" fn vcsv_parser_free(parser: *mut VcsvParser) {
    if !parser.is_null() {
        drop(Box::from_raw(parser));
    }
}

// ---------------------------------------------------------------------------
// Buffer
// ---------------------------------------------------------------------------

/// Copy `len` bytes into a padded, aligned buffer. Null on allocation
/// failure or when `data` is null with nonzero `len`.
///
/// # Safety
///
/// `data` must be valid for reading `len` bytes.
#[no_mangle]
pub unsafe extern "C" fn vcsv_buffer_new(data: *const u8, len: usize) -> *mut VcsvBuffer {
    if data.is_null() && len > 0 {
        return std::ptr::null_mut();
    }
    let bytes: &[u8] = if len == 0 {
        &[]
    } else {
        std::slice::from_raw_parts(data, len)
    };
    match AlignedBuffer::from_slice(bytes) {
        Ok(buffer) => Box::into_raw(Box::new(VcsvBuffer(Arc::new(buffer)))),
        Err(_) => std::ptr::null_mut(),
    }
}

/// Destroy a buffer handle. Index handles produced from it keep the bytes
/// alive through their own shared reference.
///
/// # Safety
///
/// `buffer` must be null or an unfreed pointer from [`vcsv_buffer_new`].
#[no_mangle]
pub unsafe extern "C" fn vcsv_buffer_free(buffer: *mut VcsvBuffer) {
    if !buffer.is_null() {
        drop(Box::from_raw(buffer));
    }
}

/// Logical length of the buffer.
///
/// # Safety
///
/// `buffer` must be a valid handle or null.
#[no_mangle]
pub unsafe extern "C" fn vcsv_buffer_len(buffer: *const VcsvBuffer) -> usize {
    buffer.as_ref().map_or(0, |b| b.0.len())
}

// ---------------------------------------------------------------------------
// Dialect
// ---------------------------------------------------------------------------

/// Create a dialect with explicit delimiter and quote bytes.
#[no_mangle]
pub extern "C" fn vcsv_dialect_new(delimiter: u8, quote: u8) -> *mut VcsvDialect {
    let dialect = Dialect::csv()
        .with_delimiter(delimiter)
        .with_quote_char(quote);
    Box::into_raw(Box::new(VcsvDialect(dialect)))
}

/// Standard CSV dialect.
#[no_mangle]
pub extern "C" fn vcsv_dialect_csv() -> *mut VcsvDialect {
    Box::into_raw(Box::new(VcsvDialect(Dialect::csv())))
}

/// Tab-separated dialect.
#[no_mangle]
pub extern "C" fn vcsv_dialect_tsv() -> *mut VcsvDialect {
    Box::into_raw(Box::new(VcsvDialect(Dialect::tsv())))
}

/// Destroy a dialect handle.
///
/// # Safety
///
/// `dialect` must be null or an unfreed dialect pointer.
#[no_mangle]
pub unsafe extern "C" fn vcsv_dialect_free(dialect: *mut VcsvDialect) {
    if !dialect.is_null() {
        drop(Box::from_raw(dialect));
    }
}

// ---------------------------------------------------------------------------
// Error collector
// ---------------------------------------------------------------------------

/// Create a collector. `mode`: 0 strict, 1 permissive, 2 best-effort.
#[no_mangle]
pub extern "C" fn vcsv_errors_new(mode: i32) -> *mut VcsvErrors {
    let mode = match mode {
        1 => ErrorMode::Permissive,
        2 => ErrorMode::BestEffort,
        _ => ErrorMode::Strict,
    };
    Box::into_raw(Box::new(VcsvErrors {
        inner: ErrorCollector::new(mode),
        messages: Vec::new(),
    }))
}

/// Destroy a collector handle; invalidates all strings it handed out.
///
/// # Safety
///
/// `errors` must be null or an unfreed collector pointer.
#[no_mangle]
pub unsafe extern "C" fn vcsv_errors_free(errors: *mut VcsvErrors) {
    if !errors.is_null() {
        drop(Box::from_raw(errors));
    }
}

/// Number of collected errors.
///
/// # Safety
///
/// `errors` must be a valid handle or null.
#[no_mangle]
pub unsafe extern "C" fn vcsv_errors_count(errors: *const VcsvErrors) -> usize {
    errors.as_ref().map_or(0, |e| e.inner.error_count())
}

/// Numeric code of error `i`, or [`VCSV_ERR_RANGE`].
///
/// # Safety
///
/// `errors` must be a valid handle or null.
#[no_mangle]
pub unsafe extern "C" fn vcsv_errors_code(errors: *const VcsvErrors, i: usize) -> i32 {
    match errors.as_ref().and_then(|e| e.inner.errors().get(i)) {
        Some(err) => code_to_i32(err.code),
        None => VCSV_ERR_RANGE,
    }
}

/// 1-based line of error `i`, 0 when out of range.
///
/// # Safety
///
/// `errors` must be a valid handle or null.
#[no_mangle]
pub unsafe extern "C" fn vcsv_errors_line(errors: *const VcsvErrors, i: usize) -> u64 {
    errors
        .as_ref()
        .and_then(|e| e.inner.errors().get(i))
        .map_or(0, |err| err.line as u64)
}

/// Byte offset of error `i`, `u64::MAX` when out of range.
///
/// # Safety
///
/// `errors` must be a valid handle or null.
#[no_mangle]
pub unsafe extern "C" fn vcsv_errors_offset(errors: *const VcsvErrors, i: usize) -> u64 {
    errors
        .as_ref()
        .and_then(|e| e.inner.errors().get(i))
        .map_or(u64::MAX, |err| err.byte_offset as u64)
}

/// Formatted message of error `i`; null when out of range. Valid until the
/// collector is cleared, grows, or is destroyed.
///
/// # Safety
///
/// `errors` must be a valid handle or null.
#[no_mangle]
pub unsafe extern "C" fn vcsv_errors_message(errors: *mut VcsvErrors, i: usize) -> *const c_char {
    match errors.as_mut() {
        Some(handle) => {
            handle.refresh();
            handle
                .messages
                .get(i)
                .map_or(std::ptr::null(), |s| s.as_ptr())
        }
        None => std::ptr::null(),
    }
}

/// Drop all collected errors (and invalidate handed-out strings).
///
/// # Safety
///
/// `errors` must be a valid handle or null.
#[no_mangle]
pub unsafe extern "C" fn vcsv_errors_clear(errors: *mut VcsvErrors) {
    if let Some(handle) = errors.as_mut() {
        handle.inner.clear();
        handle.messages.clear();
    }
}

// ---------------------------------------------------------------------------
// Index
// ---------------------------------------------------------------------------

/// Create an empty index handle for [`vcsv_parse`] to fill.
#[no_mangle]
pub extern "C" fn vcsv_index_new() -> *mut VcsvIndex {
    Box::into_raw(Box::new(VcsvIndex(None)))
}

/// Destroy an index handle.
///
/// # Safety
///
/// `index` must be null or an unfreed index pointer.
#[no_mangle]
pub unsafe extern "C" fn vcsv_index_free(index: *mut VcsvIndex) {
    if !index.is_null() {
        drop(Box::from_raw(index));
    }
}

/// Column count of a filled index (0 when unfilled).
///
/// # Safety
///
/// `index` must be a valid handle or null.
#[no_mangle]
pub unsafe extern "C" fn vcsv_index_columns(index: *const VcsvIndex) -> u64 {
    index
        .as_ref()
        .and_then(|h| h.0.as_ref())
        .map_or(0, |idx| idx.columns)
}

/// Total separators recorded (0 when unfilled).
///
/// # Safety
///
/// `index` must be a valid handle or null.
#[no_mangle]
pub unsafe extern "C" fn vcsv_index_total_separators(index: *const VcsvIndex) -> u64 {
    index
        .as_ref()
        .and_then(|h| h.0.as_ref())
        .map_or(0, |idx| idx.total_separators())
}

/// Interleave stride of a filled index (0 when unfilled).
///
/// # Safety
///
/// `index` must be a valid handle or null.
#[no_mangle]
pub unsafe extern "C" fn vcsv_index_n_threads(index: *const VcsvIndex) -> u16 {
    index
        .as_ref()
        .and_then(|h| h.0.as_ref())
        .map_or(0, |idx| idx.n_threads())
}

// ---------------------------------------------------------------------------
// Parse / detect
// ---------------------------------------------------------------------------

/// Parse `buffer` into `index`.
///
/// `dialect` may be null (auto-detection) and `errors` may be null (first
/// fatal error fails the call). Returns [`VCSV_OK`], [`VCSV_ERR_FATAL`]
/// when a fatal error was collected, or a negative status.
///
/// # Safety
///
/// All non-null pointers must be valid, unfreed handles; `errors` and
/// `index` must not be aliased by concurrent calls.
#[no_mangle]
pub unsafe extern "C" fn vcsv_parse(
    parser: *const VcsvParser,
    buffer: *const VcsvBuffer,
    dialect: *const VcsvDialect,
    errors: *mut VcsvErrors,
    index: *mut VcsvIndex,
) -> i32 {
    let (Some(parser), Some(buffer), Some(index)) =
        (parser.as_ref(), buffer.as_ref(), index.as_mut())
    else {
        return VCSV_ERR_NULL_ARG;
    };

    let mut options = ParseOptions {
        dialect: dialect.as_ref().map(|d| d.0),
        ..ParseOptions::default()
    };
    if let Some(handle) = errors.as_mut() {
        options.errors = Some(&mut handle.inner);
    }

    match parser.0.parse_shared(Arc::clone(&buffer.0), options) {
        Ok(result) => {
            let success = result.success;
            index.0 = Some(result.index);
            if success {
                VCSV_OK
            } else {
                VCSV_ERR_FATAL
            }
        }
        Err(_) => VCSV_ERR_PARSE,
    }
}

/// Detect the dialect of `buffer`.
///
/// Out parameters may be null when the caller does not need them. Returns
/// [`VCSV_OK`] on confident detection, [`VCSV_ERR_PARSE`] when detection
/// fell back to standard CSV.
///
/// # Safety
///
/// `buffer` must be a valid handle; non-null out pointers must be writable.
#[no_mangle]
pub unsafe extern "C" fn vcsv_detect(
    buffer: *const VcsvBuffer,
    out_delimiter: *mut u8,
    out_quote: *mut u8,
    out_confidence: *mut f64,
    out_columns: *mut u64,
    out_has_header: *mut bool,
) -> i32 {
    let Some(buffer) = buffer.as_ref() else {
        return VCSV_ERR_NULL_ARG;
    };

    let detector = DialectDetector::new(DetectionOptions::default());
    let result = detector.detect(buffer.0.as_slice());

    if !out_delimiter.is_null() {
        *out_delimiter = result.dialect.delimiter;
    }
    if !out_quote.is_null() {
        *out_quote = result.dialect.quote_char;
    }
    if !out_confidence.is_null() {
        *out_confidence = result.confidence;
    }
    if !out_columns.is_null() {
        *out_columns = result.detected_columns as u64;
    }
    if !out_has_header.is_null() {
        *out_has_header = result.has_header;
    }

    if result.success() {
        VCSV_OK
    } else {
        VCSV_ERR_PARSE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CStr;

    #[test]
    fn test_parse_through_handles() {
        unsafe {
            let parser = vcsv_parser_new(1);
            let data = b"a,b\n1,2\n";
            let buffer = vcsv_buffer_new(data.as_ptr(), data.len());
            let dialect = vcsv_dialect_csv();
            let index = vcsv_index_new();

            let status = vcsv_parse(parser, buffer, dialect, std::ptr::null_mut(), index);
            assert_eq!(status, VCSV_OK);
            assert_eq!(vcsv_index_columns(index), 2);
            assert_eq!(vcsv_index_total_separators(index), 4);
            assert_eq!(vcsv_index_n_threads(index), 1);

            vcsv_index_free(index);
            vcsv_dialect_free(dialect);
            vcsv_buffer_free(buffer);
            vcsv_parser_free(parser);
        }
    }

    #[test]
    fn test_error_accessors() {
        unsafe {
            let parser = vcsv_parser_new(1);
            let data = b"a,b\n1,2,3\n";
            let buffer = vcsv_buffer_new(data.as_ptr(), data.len());
            let dialect = vcsv_dialect_csv();
            let errors = vcsv_errors_new(1);
            let index = vcsv_index_new();

            let status = vcsv_parse(parser, buffer, dialect, errors, index);
            assert_eq!(status, VCSV_OK);
            assert_eq!(vcsv_errors_count(errors), 1);
            assert_eq!(vcsv_errors_code(errors, 0), 4); // inconsistent count
            assert_eq!(vcsv_errors_line(errors, 0), 2);

            let message = vcsv_errors_message(errors, 0);
            assert!(!message.is_null());
            let text = CStr::from_ptr(message).to_string_lossy();
            assert!(text.contains("expected 2 fields"));

            vcsv_errors_clear(errors);
            assert_eq!(vcsv_errors_count(errors), 0);

            vcsv_index_free(index);
            vcsv_errors_free(errors);
            vcsv_dialect_free(dialect);
            vcsv_buffer_free(buffer);
            vcsv_parser_free(parser);
        }
    }

    #[test]
    fn test_detect_through_handles() {
        unsafe {
            let data = b"id;name\n1;alice\n2;bob\n";
            let buffer = vcsv_buffer_new(data.as_ptr(), data.len());
            let mut delimiter = 0u8;
            let mut confidence = 0f64;
            let mut columns = 0u64;
            let mut has_header = false;

            let status = vcsv_detect(
                buffer,
                &mut delimiter,
                std::ptr::null_mut(),
                &mut confidence,
                &mut columns,
                &mut has_header,
            );
            assert_eq!(status, VCSV_OK);
            assert_eq!(delimiter, b';');
            assert!(confidence > 0.5);
            assert_eq!(columns, 2);
            assert!(has_header);

            vcsv_buffer_free(buffer);
        }
    }

    #[test]
    fn test_null_arguments() {
        unsafe {
            assert_eq!(
                vcsv_parse(
                    std::ptr::null(),
                    std::ptr::null(),
                    std::ptr::null(),
                    std::ptr::null_mut(),
                    std::ptr::null_mut()
                ),
                VCSV_ERR_NULL_ARG
            );
            assert_eq!(vcsv_buffer_len(std::ptr::null()), 0);
            vcsv_parser_free(std::ptr::null_mut());
            vcsv_buffer_free(std::ptr::null_mut());
        }
    }
}
