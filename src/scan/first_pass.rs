//! First pass: per-chunk quote statistics and safe split candidates.
//!
//! For parallel parsing the input is cut into equal chunks, but a chunk
//! boundary is only safe at a line terminator that is not inside a quoted
//! field. Each chunk therefore reports its quote count together with the
//! first line terminator seen at even and at odd local quote parity; the
//! orchestrator picks the right candidate once it knows the parity carried
//! in from the preceding chunks.
//!
//! Two variants: the deterministic scanner counts quotes exactly, and the
//! speculative scanner guesses the starting quote state from a bounded
//! backward probe, which lets all chunks resolve their boundary without an
//! inter-chunk reduction.

use crate::simd::{low_mask_through, BlockClassifier, BLOCK_SIZE};

/// Sentinel for an absent position.
pub const NULL_POS: u64 = u64::MAX;

/// Statistics gathered over one chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkStats {
    /// Number of quote bytes in the chunk (the speculative variant stores
    /// its parity guess here: 0 assumed-outside, 1 assumed-inside).
    pub n_quotes: u64,
    /// Separators (delimiters and unquoted line terminators) in the chunk,
    /// for pre-sizing downstream arrays.
    pub n_separators: u64,
    /// First line terminator at even local quote parity, or [`NULL_POS`].
    pub first_even_nl: u64,
    /// First line terminator at odd local quote parity, or [`NULL_POS`].
    pub first_odd_nl: u64,
}

impl Default for ChunkStats {
    fn default() -> Self {
        Self {
            n_quotes: 0,
            n_separators: 0,
            first_even_nl: NULL_POS,
            first_odd_nl: NULL_POS,
        }
    }
}

/// Deterministic SIMD first pass over `[start, end)`.
///
/// `padded` is the full padded buffer, `len` the logical input length.
/// Quote parity is carried across blocks, so the even/odd classification of
/// a line terminator is exact relative to the chunk start.
pub fn first_pass(
    classifier: &BlockClassifier,
    padded: &[u8],
    len: usize,
    start: usize,
    end: usize,
) -> ChunkStats {
    debug_assert!(start <= end && end <= len);
    let mut stats = ChunkStats::default();
    let mut carry = 0u64;
    let mut needs_even = true;
    let mut needs_odd = true;

    let mut idx = start;
    while idx < end {
        crate::simd::prefetch(padded, idx + 128);
        let remaining = end - idx;
        let valid = if remaining < BLOCK_SIZE {
            low_mask_through(remaining - 1)
        } else {
            !0
        };
        let next_is_lf = idx + BLOCK_SIZE < len && padded[idx + BLOCK_SIZE] == b'\n';
        let masks = classifier.classify(&padded[idx..idx + BLOCK_SIZE], next_is_lf, valid);

        let (inside, new_carry) = classifier.parity(masks.quotes, carry);
        carry = new_carry;

        if needs_even || needs_odd {
            // A terminator's parity is the quote count of everything before
            // it; terminators are not quotes, so the inclusive prefix mask
            // applies unchanged.
            let even_nl = masks.line_endings & !inside;
            let odd_nl = masks.line_endings & inside;
            if needs_even && even_nl != 0 {
                stats.first_even_nl = (idx + even_nl.trailing_zeros() as usize) as u64;
                needs_even = false;
            }
            if needs_odd && odd_nl != 0 {
                stats.first_odd_nl = (idx + odd_nl.trailing_zeros() as usize) as u64;
                needs_odd = false;
            }
        }

        stats.n_quotes += masks.quotes.count_ones() as u64;
        stats.n_separators +=
            ((masks.delimiters | masks.line_endings) & !inside).count_ones() as u64;
        idx += BLOCK_SIZE;
    }

    stats
}

/// Quote state guessed by the speculative backward probe.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QuoteState {
    Ambiguous,
    Quoted,
    Unquoted,
}

/// How far the speculative probe scans backward (64 KiB).
const SPECULATION_WINDOW: usize = 1 << 16;

fn is_other(b: u8, delimiter: u8, quote: u8) -> bool {
    b != delimiter && b != b'\n' && b != b'\r' && b != quote
}

/// Guess the quote state just before byte `start` by scanning backward.
///
/// The probe walks back through at most [`SPECULATION_WINDOW`] bytes and
/// uses quote adjacency to anchor parity: a quote directly followed by an
/// ordinary byte opens a region, a quote directly preceded by one closes
/// it; the quotes counted between the anchor and `start` flip the verdict.
/// The byte at `start` itself is excluded; the forward scan consumes it,
/// so counting it here would toggle it twice.
pub fn quotation_state(buf: &[u8], start: usize, delimiter: u8, quote: u8) -> QuoteState {
    if start == 0 {
        return QuoteState::Unquoted;
    }

    let end = start.saturating_sub(SPECULATION_WINDOW);
    let mut num_quotes = 0u64;
    let mut i = start - 1;

    while i > end {
        if buf[i] == quote {
            if i + 1 < start && is_other(buf[i + 1], delimiter, quote) {
                return if num_quotes % 2 == 0 {
                    QuoteState::Quoted
                } else {
                    QuoteState::Unquoted
                };
            } else if is_other(buf[i - 1], delimiter, quote) {
                return if num_quotes % 2 == 0 {
                    QuoteState::Unquoted
                } else {
                    QuoteState::Quoted
                };
            }
            num_quotes += 1;
        }
        i -= 1;
    }

    QuoteState::Ambiguous
}

/// Speculative first pass: resolve the chunk boundary locally.
///
/// The returned stats abuse `n_quotes` as the parity guess (0 when the scan
/// assumed it started outside quotes, 1 inside) and fill exactly one of the
/// line-terminator candidates, the first one consistent with that guess.
pub fn first_pass_speculate(
    buf: &[u8],
    start: usize,
    end: usize,
    delimiter: u8,
    quote: u8,
) -> ChunkStats {
    let mut quoted = quotation_state(buf, start, delimiter, quote);

    let mut i = start;
    while i < end {
        let b = buf[i];
        let is_line_ending =
            b == b'\n' || (b == b'\r' && (i + 1 >= end || buf[i + 1] != b'\n'));
        if is_line_ending {
            return if matches!(quoted, QuoteState::Unquoted | QuoteState::Ambiguous) {
                ChunkStats {
                    n_quotes: 0,
                    n_separators: 0,
                    first_even_nl: i as u64,
                    first_odd_nl: NULL_POS,
                }
            } else {
                ChunkStats {
                    n_quotes: 1,
                    n_separators: 0,
                    first_even_nl: NULL_POS,
                    first_odd_nl: i as u64,
                }
            };
        } else if b == quote {
            quoted = match quoted {
                QuoteState::Unquoted => QuoteState::Quoted,
                _ => QuoteState::Unquoted,
            };
        }
        i += 1;
    }

    ChunkStats::default()
}
