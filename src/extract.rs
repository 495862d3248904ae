//! Typed, zero-copy value extraction on top of a shared index.
//!
//! A [`ValueExtractor`] resolves `(row, column)` to byte ranges in O(1) and
//! decodes fields as strings, integers, floats, or booleans. String access
//! is zero-copy whenever the column's escape metadata (or, lacking that, the
//! field content) shows no doubled quotes to collapse.
//!
//! The extractor holds `Arc` handles to both the index and the source
//! buffer, so dropping the originals never invalidates it.

use std::borrow::Cow;
use std::ops::Range;
use std::sync::Arc;

use thiserror::Error;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::buffer::AlignedBuffer;
use crate::dialect::Dialect;
use crate::index::ParseIndex;

/// Extraction failures.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("row {row} out of range ({rows} rows)")]
    RowOutOfRange { row: usize, rows: usize },

    #[error("column {col} out of range ({cols} columns)")]
    ColumnOutOfRange { col: usize, cols: usize },

    #[error("the index does not carry its source buffer")]
    MissingBuffer,

    #[error("field at row {row}, column {col} is not valid UTF-8")]
    InvalidUtf8 { row: usize, col: usize },

    #[error("cannot parse field at row {row}, column {col} as {target}: {text:?}")]
    Parse {
        row: usize,
        col: usize,
        target: &'static str,
        text: String,
    },
}

/// Knobs for typed extraction.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ExtractionConfig {
    /// Whether row 0 of the input is a header (excluded from data rows).
    pub has_header: bool,
    /// Trim ASCII whitespace before NA comparison and numeric parsing.
    pub trim_whitespace: bool,
    /// Values treated as missing by the typed getters.
    pub na_values: Vec<String>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            has_header: true,
            trim_whitespace: true,
            na_values: ["", "NA", "N/A", "NULL", "null"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Random access to typed field values.
pub struct ValueExtractor {
    index: Arc<ParseIndex>,
    buffer: Arc<AlignedBuffer>,
    dialect: Dialect,
    config: ExtractionConfig,
    positions: Vec<u64>,
    num_columns: usize,
    num_rows: usize,
}

impl ValueExtractor {
    /// Build an extractor over a shared index.
    ///
    /// The index must carry its source buffer (see
    /// [`ParseIndex::adopt_buffer`]); positions are copied out up front so
    /// the extractor is independent of the index's later layout changes.
    pub fn new(
        index: Arc<ParseIndex>,
        dialect: Dialect,
        config: ExtractionConfig,
    ) -> Result<Self, ExtractError> {
        let buffer = index.buffer().cloned().ok_or(ExtractError::MissingBuffer)?;
        let positions = index.linearized();

        let num_columns = if index.columns > 0 {
            index.columns as usize
        } else {
            // Fall back to the first record terminator.
            positions
                .iter()
                .position(|&p| matches!(buffer.get(p as usize), Some(&b'\n') | Some(&b'\r')))
                .map(|i| i + 1)
                .unwrap_or(usize::from(!positions.is_empty()))
        };

        let total_rows = if num_columns == 0 {
            0
        } else {
            positions.len() / num_columns
        };
        let num_rows = if config.has_header {
            total_rows.saturating_sub(1)
        } else {
            total_rows
        };

        Ok(Self {
            index,
            buffer,
            dialect,
            config,
            positions,
            num_columns,
            num_rows,
        })
    }

    /// Data rows (the header, when present, is excluded).
    #[inline]
    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    #[inline]
    pub fn num_columns(&self) -> usize {
        self.num_columns
    }

    #[inline]
    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    fn check_bounds(&self, row: usize, col: usize) -> Result<(), ExtractError> {
        if row >= self.num_rows {
            return Err(ExtractError::RowOutOfRange {
                row,
                rows: self.num_rows,
            });
        }
        if col >= self.num_columns {
            return Err(ExtractError::ColumnOutOfRange {
                col,
                cols: self.num_columns,
            });
        }
        Ok(())
    }

    fn field_range(&self, field_idx: usize) -> Range<usize> {
        let start = if field_idx == 0 {
            0
        } else {
            self.positions[field_idx - 1] as usize + 1
        };
        let end = (self.positions[field_idx] as usize).min(self.buffer.len());
        start.min(end)..end
    }

    fn data_field_index(&self, row: usize, col: usize) -> usize {
        let row_offset = if self.config.has_header { row + 1 } else { row };
        row_offset * self.num_columns + col
    }

    /// Raw byte range of a data field, separators excluded, quotes included.
    pub fn field(&self, row: usize, col: usize) -> Result<Range<usize>, ExtractError> {
        self.check_bounds(row, col)?;
        Ok(self.field_range(self.data_field_index(row, col)))
    }

    /// Strip a trailing CR (from CRLF records) and surrounding quotes.
    fn trimmed_content(&self, mut range: Range<usize>) -> Range<usize> {
        let buf = self.buffer.as_slice();
        if range.end > range.start && buf[range.end - 1] == b'\r' {
            range.end -= 1;
        }
        if range.end - range.start >= 2
            && buf[range.start] == self.dialect.quote_char
            && buf[range.end - 1] == self.dialect.quote_char
        {
            range.start += 1;
            range.end -= 1;
        }
        range
    }

    fn decode_string(
        &self,
        range: Range<usize>,
        row: usize,
        col: usize,
        may_have_escapes: bool,
    ) -> Result<Cow<'_, str>, ExtractError> {
        let content = self.trimmed_content(range);
        let bytes = &self.buffer.as_slice()[content];

        if may_have_escapes && bytes.contains(&self.dialect.quote_char) {
            let unescaped = self.unescape(bytes);
            return String::from_utf8(unescaped)
                .map(Cow::Owned)
                .map_err(|_| ExtractError::InvalidUtf8 { row, col });
        }

        std::str::from_utf8(bytes)
            .map(Cow::Borrowed)
            .map_err(|_| ExtractError::InvalidUtf8 { row, col })
    }

    fn unescape(&self, bytes: &[u8]) -> Vec<u8> {
        let quote = self.dialect.quote_char;
        let escape = if self.dialect.double_quote {
            quote
        } else {
            self.dialect.escape_char
        };
        let mut out = Vec::with_capacity(bytes.len());
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] == escape && bytes.get(i + 1) == Some(&quote) {
                out.push(quote);
                i += 2;
            } else {
                out.push(bytes[i]);
                i += 1;
            }
        }
        out
    }

    /// Whether this column's fields may need unescaping. Uses the index's
    /// escape metadata when present, otherwise assumes they might.
    fn column_may_have_escapes(&self, col: usize) -> bool {
        match self.index.escape_info(col) {
            Some(info) => info.needs_unescape(),
            None => true,
        }
    }

    /// A field as text. Zero-copy unless the column needs unescaping.
    pub fn get_string(&self, row: usize, col: usize) -> Result<Cow<'_, str>, ExtractError> {
        self.check_bounds(row, col)?;
        let range = self.field_range(self.data_field_index(row, col));
        self.decode_string(range, row, col, self.column_may_have_escapes(col))
    }

    fn typed_text(&self, row: usize, col: usize) -> Result<Option<String>, ExtractError> {
        let text = self.get_string(row, col)?;
        let trimmed: &str = if self.config.trim_whitespace {
            text.trim()
        } else {
            &text
        };
        if self.config.na_values.iter().any(|na| na == trimmed) {
            return Ok(None);
        }
        Ok(Some(trimmed.to_string()))
    }

    /// An integer field; `Ok(None)` when the value is in the NA set.
    pub fn get_integer(&self, row: usize, col: usize) -> Result<Option<i64>, ExtractError> {
        match self.typed_text(row, col)? {
            None => Ok(None),
            Some(text) => text
                .parse::<i64>()
                .map(Some)
                .map_err(|_| ExtractError::Parse {
                    row,
                    col,
                    target: "integer",
                    text,
                }),
        }
    }

    /// A float field; `Ok(None)` when the value is in the NA set.
    pub fn get_float(&self, row: usize, col: usize) -> Result<Option<f64>, ExtractError> {
        match self.typed_text(row, col)? {
            None => Ok(None),
            Some(text) => text
                .parse::<f64>()
                .map(Some)
                .map_err(|_| ExtractError::Parse {
                    row,
                    col,
                    target: "float",
                    text,
                }),
        }
    }

    /// A boolean field; `Ok(None)` when the value is in the NA set.
    pub fn get_bool(&self, row: usize, col: usize) -> Result<Option<bool>, ExtractError> {
        match self.typed_text(row, col)? {
            None => Ok(None),
            Some(text) => {
                let lower = text.to_ascii_lowercase();
                match lower.as_str() {
                    "true" | "t" | "yes" | "y" | "on" | "1" => Ok(Some(true)),
                    "false" | "f" | "no" | "n" | "off" | "0" => Ok(Some(false)),
                    _ => Err(ExtractError::Parse {
                        row,
                        col,
                        target: "boolean",
                        text,
                    }),
                }
            }
        }
    }

    /// The header names. Requires `has_header` in the configuration.
    pub fn header(&self) -> Result<Vec<String>, ExtractError> {
        if !self.config.has_header {
            return Ok(Vec::new());
        }
        // A truncated input can end before the header's last separator.
        let available = self.num_columns.min(self.positions.len());
        (0..available)
            .map(|col| {
                self.decode_string(self.field_range(col), 0, col, true)
                    .map(Cow::into_owned)
            })
            .collect()
    }

    /// All values of one column as text.
    pub fn column_strings(&self, col: usize) -> Result<Vec<Cow<'_, str>>, ExtractError> {
        if col >= self.num_columns {
            return Err(ExtractError::ColumnOutOfRange {
                col,
                cols: self.num_columns,
            });
        }
        (0..self.num_rows)
            .map(|row| self.get_string(row, col))
            .collect()
    }

    /// Iterate over data rows.
    pub fn rows(&self) -> Rows<'_> {
        Rows {
            extractor: self,
            row: 0,
        }
    }
}

/// Iterator over data rows of a [`ValueExtractor`].
pub struct Rows<'a> {
    extractor: &'a ValueExtractor,
    row: usize,
}

impl<'a> Iterator for Rows<'a> {
    type Item = RowView<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.row >= self.extractor.num_rows() {
            return None;
        }
        let view = RowView {
            extractor: self.extractor,
            row: self.row,
        };
        self.row += 1;
        Some(view)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.extractor.num_rows().saturating_sub(self.row);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Rows<'_> {}

/// One data row.
#[derive(Clone, Copy)]
pub struct RowView<'a> {
    extractor: &'a ValueExtractor,
    row: usize,
}

impl<'a> RowView<'a> {
    #[inline]
    pub fn row_index(&self) -> usize {
        self.row
    }

    pub fn get(&self, col: usize) -> Result<Cow<'a, str>, ExtractError> {
        self.extractor.get_string(self.row, col)
    }

    pub fn field(&self, col: usize) -> Result<Range<usize>, ExtractError> {
        self.extractor.field(self.row, col)
    }
}
