//! Dialect configuration and automatic detection.
//!
//! A [`Dialect`] pins down how the bytes are interpreted: field delimiter,
//! quote character, escape convention, and (informationally) the line-ending
//! style. [`detector`] scores candidate dialects against a sample of the
//! input; [`field_type`] supplies the cell type inference the scoring uses.

pub mod detector;
pub mod field_type;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Line-ending style of an input (informational).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum LineEnding {
    Lf,
    CrLf,
    Cr,
    Mixed,
    #[default]
    Unknown,
}

/// How a delimiter-separated input is formatted.
///
/// Invariants: `delimiter != quote_char`, and neither may be `\n` or `\r`.
/// When `double_quote` is true a literal quote inside a quoted field is
/// written as two consecutive quote characters (RFC 4180); `escape_char` is
/// only consulted when `double_quote` is false.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Dialect {
    pub delimiter: u8,
    pub quote_char: u8,
    pub escape_char: u8,
    pub double_quote: bool,
    pub line_ending: LineEnding,
}

impl Default for Dialect {
    fn default() -> Self {
        Self::csv()
    }
}

impl Dialect {
    /// Standard CSV: comma-delimited, RFC 4180 double quoting.
    pub fn csv() -> Self {
        Self {
            delimiter: b',',
            quote_char: b'"',
            escape_char: b'"',
            double_quote: true,
            line_ending: LineEnding::Unknown,
        }
    }

    /// Tab-separated values.
    pub fn tsv() -> Self {
        Self {
            delimiter: b'\t',
            ..Self::csv()
        }
    }

    /// Semicolon-separated (common in European locales).
    pub fn semicolon() -> Self {
        Self {
            delimiter: b';',
            ..Self::csv()
        }
    }

    /// Pipe-separated values.
    pub fn pipe() -> Self {
        Self {
            delimiter: b'|',
            ..Self::csv()
        }
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn with_quote_char(mut self, quote_char: u8) -> Self {
        self.quote_char = quote_char;
        self
    }

    /// Whether the configuration satisfies the structural invariants.
    pub fn is_valid(&self) -> bool {
        self.delimiter != self.quote_char
            && !matches!(self.delimiter, b'\n' | b'\r')
            && !matches!(self.quote_char, b'\n' | b'\r')
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let show = |b: u8| match b {
            b'\t' => "\\t".to_string(),
            b => (b as char).to_string(),
        };
        write!(
            f,
            "delimiter='{}' quote='{}' double_quote={}",
            show(self.delimiter),
            show(self.quote_char),
            self.double_quote
        )
    }
}
