//! The parse index: separator positions in one of three layouts.
//!
//! A [`ParseIndex`] starts life *interleaved*: during fan-out, thread `t`
//! writes its positions at slots `t`, `t + T`, `t + 2T`, … of one shared
//! array. [`ParseIndex::compact`] folds that into a flat row-major array
//! (globally ascending, one pass), and
//! [`ParseIndex::compact_column_major`] replaces the row-major array with
//! its transpose for columnar consumers. Row-major and column-major never
//! coexist.
//!
//! The index owns its arrays exclusively by default; [`ParseIndex::share`]
//! converts it into an `Arc` handle so extractors and other derived views
//! can outlive the parse call. When the index has adopted the source buffer
//! ([`ParseIndex::adopt_buffer`]), sharing the index shares the bytes too.

pub mod cache;

use std::sync::Arc;

use rayon::prelude::*;

use crate::buffer::AlignedBuffer;
use crate::error::ParseFailure;

/// Slack slots per thread lane for the scatter's speculative stores.
pub(crate) const THREAD_PAD: usize = 8;

/// Transpose block height: 64 elements × 8 bytes sits comfortably in L1.
const TRANSPOSE_BLOCK: usize = 64;

/// Physical layout of the position array.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexLayout {
    Interleaved,
    RowMajor,
    ColumnMajor,
}

/// Per-column escape metadata.
///
/// When a column has no escapes, its values can be handed out as views into
/// the source buffer without copying.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ColumnEscapeInfo {
    /// Any field in the column contains the quote character.
    pub has_quotes: bool,
    /// Any field contains an escaped (doubled) quote that extraction must
    /// collapse.
    pub has_escapes: bool,
}

impl ColumnEscapeInfo {
    #[inline]
    pub fn needs_unescape(&self) -> bool {
        self.has_escapes
    }
}

/// Byte offsets of every field/record separator in the input.
pub struct ParseIndex {
    /// Number of columns, taken from the header row.
    pub columns: u64,
    n_threads: u16,
    n_indexes: Vec<u64>,
    interleaved: Vec<u64>,
    flat: Vec<u64>,
    col_major: Vec<u64>,
    rows: u64,
    layout: IndexLayout,
    escape_info: Vec<ColumnEscapeInfo>,
    buffer: Option<Arc<AlignedBuffer>>,
}

impl ParseIndex {
    /// Allocate an interleaved index sized for at most one separator per
    /// input byte, with scatter slack per lane. Sizing is overflow-checked.
    pub(crate) fn with_capacity(len: usize, n_threads: usize) -> Result<Self, ParseFailure> {
        let threads = n_threads.max(1);
        let overflow = || ParseFailure::IndexAllocationOverflow { len, threads };

        let per_lane = len.checked_add(THREAD_PAD).ok_or_else(overflow)?;
        let slots = per_lane.checked_mul(threads).ok_or_else(overflow)?;
        // The byte size must fit too, or the allocator call itself would wrap.
        slots
            .checked_mul(std::mem::size_of::<u64>())
            .ok_or_else(overflow)?;

        Ok(Self {
            columns: 0,
            n_threads: threads as u16,
            n_indexes: vec![0; threads],
            interleaved: vec![0; slots],
            flat: Vec::new(),
            col_major: Vec::new(),
            rows: 0,
            layout: IndexLayout::Interleaved,
            escape_info: Vec::new(),
            buffer: None,
        })
    }

    pub(crate) fn from_parts(
        columns: u64,
        n_threads: u16,
        n_indexes: Vec<u64>,
        interleaved: Vec<u64>,
        flat: Vec<u64>,
        col_major: Vec<u64>,
        layout: IndexLayout,
    ) -> Self {
        let rows = if columns > 0 {
            (col_major.len() as u64) / columns
        } else {
            0
        };
        Self {
            columns,
            n_threads,
            n_indexes,
            interleaved,
            flat,
            col_major,
            rows,
            layout,
            escape_info: Vec::new(),
            buffer: None,
        }
    }

    /// Interleave stride used during the parse.
    #[inline]
    pub fn n_threads(&self) -> u16 {
        self.n_threads
    }

    /// Per-thread separator counts (interleaved layout).
    #[inline]
    pub fn n_indexes(&self) -> &[u64] {
        &self.n_indexes
    }

    /// Degrading to a single-threaded parse must also reset the stride, or
    /// every later slot computation would scramble the index.
    pub(crate) fn reset_single_threaded(&mut self) {
        self.n_threads = 1;
        self.n_indexes = vec![0];
    }

    pub(crate) fn set_count(&mut self, thread: usize, count: u64) {
        self.n_indexes[thread] = count;
    }

    pub(crate) fn interleaved_slots_mut(&mut self) -> &mut [u64] {
        &mut self.interleaved
    }

    pub(crate) fn interleaved_slots(&self) -> &[u64] {
        &self.interleaved
    }

    pub(crate) fn column_major_slice(&self) -> &[u64] {
        &self.col_major
    }

    #[inline]
    pub fn layout(&self) -> IndexLayout {
        self.layout
    }

    #[inline]
    pub fn is_flat(&self) -> bool {
        self.layout == IndexLayout::RowMajor
    }

    #[inline]
    pub fn is_column_major(&self) -> bool {
        self.layout == IndexLayout::ColumnMajor
    }

    /// Total number of separators recorded.
    pub fn total_separators(&self) -> u64 {
        match self.layout {
            IndexLayout::Interleaved => self.n_indexes.iter().sum(),
            IndexLayout::RowMajor => self.flat.len() as u64,
            IndexLayout::ColumnMajor => self.col_major.len() as u64,
        }
    }

    /// Number of records, derived from the separator count and `columns`.
    pub fn num_rows(&self) -> u64 {
        if self.layout == IndexLayout::ColumnMajor {
            return self.rows;
        }
        if self.columns == 0 {
            return 0;
        }
        self.total_separators() / self.columns
    }

    /// Fold the interleaved lanes into one flat row-major array.
    ///
    /// Thread lanes cover consecutive byte ranges and each lane is written
    /// in ascending order, so concatenating them in lane order yields a
    /// globally ascending sequence in a single pass.
    pub fn compact(&mut self) {
        if self.layout != IndexLayout::Interleaved {
            return;
        }
        let stride = self.n_threads as usize;
        let total: u64 = self.n_indexes.iter().sum();
        let mut flat = Vec::with_capacity(total as usize);
        for t in 0..stride {
            for k in 0..self.n_indexes[t] as usize {
                flat.push(self.interleaved[t + k * stride]);
            }
        }
        self.flat = flat;
        self.interleaved = Vec::new();
        self.layout = IndexLayout::RowMajor;
    }

    /// Replace the row-major array with its column-major transpose.
    ///
    /// Column `c` then occupies `[c * rows, (c + 1) * rows)`. Compacts first
    /// if still interleaved; no-op when already column-major or when there
    /// is nothing to transpose. Separators of a trailing partial record (no
    /// final line terminator and fewer fields than `columns`) do not form a
    /// full row and are not carried over. With `n_threads > 1` the columns
    /// are transposed in parallel.
    pub fn compact_column_major(&mut self, n_threads: usize) {
        if self.layout == IndexLayout::ColumnMajor {
            return;
        }
        self.compact();

        let cols = self.columns as usize;
        let total = self.flat.len();
        if cols == 0 || total < cols {
            return;
        }
        let rows = total / cols;

        let mut col_major = vec![0u64; cols * rows];
        let flat = &self.flat;
        if n_threads > 1 {
            col_major
                .par_chunks_mut(rows)
                .enumerate()
                .for_each(|(c, column)| {
                    for (r, slot) in column.iter_mut().enumerate() {
                        *slot = flat[r * cols + c];
                    }
                });
        } else {
            for row_block in (0..rows).step_by(TRANSPOSE_BLOCK) {
                let block_end = (row_block + TRANSPOSE_BLOCK).min(rows);
                for c in 0..cols {
                    for r in row_block..block_end {
                        col_major[c * rows + r] = flat[r * cols + c];
                    }
                }
            }
        }

        self.rows = rows as u64;
        self.col_major = col_major;
        self.flat = Vec::new();
        self.layout = IndexLayout::ColumnMajor;
    }

    /// Flat row-major positions, present after [`ParseIndex::compact`].
    pub fn row_major(&self) -> Option<&[u64]> {
        match self.layout {
            IndexLayout::RowMajor => Some(&self.flat),
            _ => None,
        }
    }

    /// One column's separator positions, present after
    /// [`ParseIndex::compact_column_major`].
    pub fn column(&self, col: usize) -> Option<&[u64]> {
        if self.layout != IndexLayout::ColumnMajor || col >= self.columns as usize {
            return None;
        }
        let rows = self.rows as usize;
        Some(&self.col_major[col * rows..(col + 1) * rows])
    }

    /// Reconstruct one row's separator positions from the column-major
    /// layout. Returns false before transposition or out of bounds.
    pub fn get_row_fields(&self, row: usize, out: &mut Vec<u64>) -> bool {
        if self.layout != IndexLayout::ColumnMajor || row >= self.rows as usize {
            return false;
        }
        let rows = self.rows as usize;
        out.clear();
        out.extend((0..self.columns as usize).map(|c| self.col_major[c * rows + row]));
        true
    }

    /// Ascending positions regardless of the current layout, as an owned
    /// copy. Derived views use this so they never depend on the index's
    /// later lifecycle.
    pub(crate) fn linearized(&self) -> Vec<u64> {
        match self.layout {
            IndexLayout::RowMajor => self.flat.clone(),
            IndexLayout::ColumnMajor => {
                let rows = self.rows as usize;
                let cols = self.columns as usize;
                let mut out = Vec::with_capacity(rows * cols);
                for r in 0..rows {
                    for c in 0..cols {
                        out.push(self.col_major[c * rows + r]);
                    }
                }
                out
            }
            IndexLayout::Interleaved => {
                let stride = self.n_threads as usize;
                let total: u64 = self.n_indexes.iter().sum();
                let mut out = Vec::with_capacity(total as usize);
                for t in 0..stride {
                    for k in 0..self.n_indexes[t] as usize {
                        out.push(self.interleaved[t + k * stride]);
                    }
                }
                out
            }
        }
    }

    /// Learn per-column quote/escape usage from the compacted positions.
    ///
    /// Fields of every record (header included) are inspected; a column has
    /// quotes when any of its fields contains the quote byte, and escapes
    /// when any quoted field contains a quote in its interior.
    pub fn compute_column_escape_info(&mut self, buf: &[u8], quote: u8) {
        self.compact();
        let cols = self.columns as usize;
        if cols == 0 {
            self.escape_info = Vec::new();
            return;
        }
        let positions = self.linearized();
        let mut info = vec![ColumnEscapeInfo::default(); cols];

        let mut start = 0usize;
        for (i, &pos) in positions.iter().enumerate() {
            let end = (pos as usize).min(buf.len());
            let col = i % cols;
            let field = &buf[start.min(end)..end];
            if field.contains(&quote) {
                info[col].has_quotes = true;
                // Interior quotes of a quoted field are escapes.
                if field.len() >= 2 && field[0] == quote && field[field.len() - 1] == quote {
                    if field[1..field.len() - 1].contains(&quote) {
                        info[col].has_escapes = true;
                    }
                }
            }
            start = end + 1;
        }

        self.escape_info = info;
    }

    pub fn has_escape_info(&self) -> bool {
        !self.escape_info.is_empty()
    }

    pub fn escape_info(&self, col: usize) -> Option<&ColumnEscapeInfo> {
        self.escape_info.get(col)
    }

    /// Attach a shared handle to the source bytes, so views derived from a
    /// shared index can never dangle.
    pub fn adopt_buffer(&mut self, buffer: Arc<AlignedBuffer>) {
        self.buffer = Some(buffer);
    }

    pub fn buffer(&self) -> Option<&Arc<AlignedBuffer>> {
        self.buffer.as_ref()
    }

    pub fn has_buffer(&self) -> bool {
        self.buffer.is_some()
    }

    /// Convert exclusive ownership into a reference-counted handle.
    pub fn share(self) -> Arc<ParseIndex> {
        Arc::new(self)
    }
}

impl std::fmt::Debug for ParseIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParseIndex")
            .field("columns", &self.columns)
            .field("n_threads", &self.n_threads)
            .field("layout", &self.layout)
            .field("total_separators", &self.total_separators())
            .field("has_buffer", &self.has_buffer())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Interleaved index as the fan-out would leave it: lane `t` holds the
    /// positions of chunk `t` at stride `T`.
    fn interleaved_fixture(lanes: &[&[u64]]) -> ParseIndex {
        let stride = lanes.len();
        let max = lanes.iter().map(|l| l.len()).max().unwrap_or(0);
        let mut idx = ParseIndex::with_capacity(max * stride + 8, stride).unwrap();
        for (t, lane) in lanes.iter().enumerate() {
            for (k, &pos) in lane.iter().enumerate() {
                idx.interleaved[t + k * stride] = pos;
            }
            idx.n_indexes[t] = lane.len() as u64;
        }
        idx
    }

    #[test]
    fn test_compact_preserves_order() {
        let mut idx = interleaved_fixture(&[&[1, 3, 5], &[7, 9]]);
        idx.columns = 1;
        idx.compact();
        assert!(idx.is_flat());
        assert_eq!(idx.row_major().unwrap(), &[1, 3, 5, 7, 9]);
        for pair in idx.row_major().unwrap().windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn test_compact_is_idempotent() {
        let mut idx = interleaved_fixture(&[&[1, 3]]);
        idx.columns = 2;
        idx.compact();
        let before = idx.row_major().unwrap().to_vec();
        idx.compact();
        assert_eq!(idx.row_major().unwrap(), &before[..]);
    }

    #[test]
    fn test_column_major_is_transpose_of_row_major() {
        // 3 rows x 2 columns.
        let mut idx = interleaved_fixture(&[&[1, 3, 5, 7, 9, 11]]);
        idx.columns = 2;
        idx.compact();
        let row_major = idx.row_major().unwrap().to_vec();

        idx.compact_column_major(1);
        assert!(idx.is_column_major());
        assert!(!idx.is_flat());
        assert_eq!(idx.num_rows(), 3);
        for r in 0..3 {
            for c in 0..2 {
                assert_eq!(
                    idx.column(c).unwrap()[r],
                    row_major[r * 2 + c],
                    "r={r} c={c}"
                );
            }
        }
    }

    #[test]
    fn test_column_major_parallel_matches_serial() {
        let positions: Vec<u64> = (0..400).map(|i| i * 2 + 1).collect();
        let mut serial = interleaved_fixture(&[&positions]);
        serial.columns = 8;
        serial.compact_column_major(1);

        let mut parallel = interleaved_fixture(&[&positions]);
        parallel.columns = 8;
        parallel.compact_column_major(4);

        for c in 0..8 {
            assert_eq!(serial.column(c).unwrap(), parallel.column(c).unwrap());
        }
    }

    #[test]
    fn test_column_major_idempotent_and_frees_flat() {
        let mut idx = interleaved_fixture(&[&[1, 3, 5, 7]]);
        idx.columns = 2;
        idx.compact_column_major(1);
        assert!(idx.is_column_major());
        assert!(idx.row_major().is_none());
        let first = idx.column(0).unwrap().to_vec();
        idx.compact_column_major(1);
        assert_eq!(idx.column(0).unwrap(), &first[..]);
    }

    #[test]
    fn test_empty_index_transpose_is_noop() {
        let mut idx = interleaved_fixture(&[&[]]);
        idx.compact_column_major(1);
        assert!(!idx.is_column_major());
    }

    #[test]
    fn test_column_out_of_bounds() {
        let mut idx = interleaved_fixture(&[&[1, 3, 5, 7]]);
        idx.columns = 2;
        // Before transposition, no column view exists.
        assert!(idx.column(0).is_none());
        idx.compact_column_major(1);
        assert!(idx.column(0).is_some());
        assert!(idx.column(2).is_none());
        assert!(idx.column(100).is_none());
    }

    #[test]
    fn test_get_row_fields() {
        let mut idx = interleaved_fixture(&[&[1, 3, 5, 7, 9, 11]]);
        idx.columns = 3;
        idx.compact_column_major(1);
        let mut row = Vec::new();
        assert!(idx.get_row_fields(0, &mut row));
        assert_eq!(row, vec![1, 3, 5]);
        assert!(idx.get_row_fields(1, &mut row));
        assert_eq!(row, vec![7, 9, 11]);
        assert!(!idx.get_row_fields(2, &mut row));
    }

    #[test]
    fn test_overflow_checked_sizing() {
        let err = ParseIndex::with_capacity(usize::MAX - 4, 8).unwrap_err();
        assert!(matches!(err, ParseFailure::IndexAllocationOverflow { .. }));
    }

    #[test]
    fn test_share_keeps_arrays_alive() {
        let mut idx = interleaved_fixture(&[&[1, 3]]);
        idx.columns = 2;
        idx.compact();
        let shared = idx.share();
        let view = Arc::clone(&shared);
        drop(shared);
        assert_eq!(view.row_major().unwrap(), &[1, 3]);
    }

    #[test]
    fn test_escape_info() {
        // "a","say ""hi""",plain per row; columns: quoted-no-escape,
        // quoted-escaped, unquoted.
        let buf = b"\"a\",\"say \"\"hi\"\"\",plain\n";
        let positions: Vec<u64> = vec![3, 16, 22];
        let mut idx = interleaved_fixture(&[&positions]);
        idx.columns = 3;
        idx.compute_column_escape_info(buf, b'"');
        assert!(idx.has_escape_info());

        let col0 = idx.escape_info(0).unwrap();
        assert!(col0.has_quotes);
        assert!(!col0.has_escapes);
        assert!(!col0.needs_unescape());

        let col1 = idx.escape_info(1).unwrap();
        assert!(col1.has_quotes);
        assert!(col1.has_escapes);
        assert!(col1.needs_unescape());

        let col2 = idx.escape_info(2).unwrap();
        assert!(!col2.has_quotes);
        assert!(!col2.has_escapes);
    }

    #[test]
    fn test_linearized_from_all_layouts() {
        let expected = vec![1u64, 3, 5, 7];
        let idx = interleaved_fixture(&[&[1, 5], &[3, 7]]);
        // Lane order is chunk order, so linearization is lane 0 then lane 1.
        assert_eq!(idx.linearized(), vec![1, 5, 3, 7]);

        let mut idx2 = interleaved_fixture(&[&expected]);
        idx2.columns = 2;
        idx2.compact();
        assert_eq!(idx2.linearized(), expected);
        idx2.compact_column_major(1);
        assert_eq!(idx2.linearized(), expected);
    }
}
