//! Consistency-scored dialect detection.
//!
//! For every candidate `(delimiter, quote)` pair the detector tokenizes a
//! bounded sample with a minimal quote-aware scalar tokenizer and scores the
//! result on two axes: how consistent the per-row field count is
//! (`pattern_score`) and how well the cells in each column agree on a
//! non-string type (`type_score`). The candidate with the best product wins;
//! if nothing clears the confidence threshold the detector falls back to
//! standard CSV and reports the failure.

use memchr::memchr_iter;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::field_type::{self, FieldType};
use super::{Dialect, LineEnding};

/// Configuration for dialect detection.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DetectionOptions {
    /// Bytes of input to sample.
    pub sample_size: usize,
    /// Minimum rows needed for a confident detection.
    pub min_rows: usize,
    /// Maximum rows to analyze.
    pub max_rows: usize,
    /// Candidate delimiter bytes.
    pub delimiters: Vec<u8>,
    /// Candidate quote bytes.
    pub quote_chars: Vec<u8>,
    /// Confidence threshold below which detection reports failure.
    pub min_confidence: f64,
}

impl Default for DetectionOptions {
    fn default() -> Self {
        Self {
            sample_size: 10 * 1024,
            min_rows: 3,
            max_rows: 100,
            delimiters: vec![b',', b';', b'\t', b'|', b':'],
            quote_chars: vec![b'"', b'\''],
            min_confidence: 0.5,
        }
    }
}

/// One scored candidate.
#[derive(Clone, Debug)]
pub struct DialectCandidate {
    pub dialect: Dialect,
    /// Row field-count consistency in `[0, 1]`.
    pub pattern_score: f64,
    /// Column type-agreement score in `[0, 1]`.
    pub type_score: f64,
    /// `pattern_score * type_score`.
    pub consistency_score: f64,
    pub num_columns: usize,
    pub rows_analyzed: usize,
}

/// Outcome of dialect detection.
#[derive(Clone, Debug)]
pub struct DetectionResult {
    pub dialect: Dialect,
    /// Consistency score of the winning candidate.
    pub confidence: f64,
    pub has_header: bool,
    pub detected_columns: usize,
    pub rows_analyzed: usize,
    /// All candidates, best first.
    pub candidates: Vec<DialectCandidate>,
}

impl DetectionResult {
    /// Whether detection cleared the confidence threshold.
    pub fn success(&self) -> bool {
        self.confidence > 0.5
    }
}

/// Columns whose modal type is plain text score this fraction of a typed
/// column; a file of nothing but strings cannot clear the 0.5 threshold on
/// type evidence alone.
const STRING_COLUMN_WEIGHT: f64 = 0.3;
/// Share of cells that must agree for a column type to count as dominant.
const DOMINANT_SHARE: f64 = 0.5;

/// Scores candidate dialects against a sample of the input.
#[derive(Clone, Debug, Default)]
pub struct DialectDetector {
    options: DetectionOptions,
}

impl DialectDetector {
    pub fn new(options: DetectionOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &DetectionOptions {
        &self.options
    }

    /// Detect the dialect of `buf`.
    pub fn detect(&self, buf: &[u8]) -> DetectionResult {
        let sample_len = buf.len().min(self.options.sample_size);
        let sample = &buf[..sample_len];
        let truncated = sample_len < buf.len();
        let line_ending = detect_line_ending(sample);

        let mut candidates = Vec::new();
        for &delimiter in &self.options.delimiters {
            for &quote in &self.options.quote_chars {
                let dialect = Dialect {
                    delimiter,
                    quote_char: quote,
                    escape_char: quote,
                    double_quote: true,
                    line_ending,
                };
                candidates.push(self.score_candidate(dialect, sample, truncated));
            }
        }

        candidates.sort_by(|a, b| {
            b.consistency_score
                .total_cmp(&a.consistency_score)
                .then(b.num_columns.cmp(&a.num_columns))
        });

        let best = match candidates.first() {
            Some(best) => best.clone(),
            None => {
                return DetectionResult {
                    dialect: Dialect {
                        line_ending,
                        ..Dialect::csv()
                    },
                    confidence: 0.0,
                    has_header: false,
                    detected_columns: 0,
                    rows_analyzed: 0,
                    candidates,
                }
            }
        };

        let confident =
            best.consistency_score > self.options.min_confidence && best.rows_analyzed >= self.options.min_rows;

        let dialect = if confident {
            best.dialect
        } else {
            Dialect {
                line_ending,
                ..Dialect::csv()
            }
        };

        let rows = self.split_rows(&best.dialect, sample, truncated);
        let has_header = confident && detect_header(&rows);

        DetectionResult {
            dialect,
            confidence: if confident { best.consistency_score } else { best.consistency_score.min(0.5) },
            has_header,
            detected_columns: best.num_columns,
            rows_analyzed: best.rows_analyzed,
            candidates,
        }
    }

    fn score_candidate(&self, dialect: Dialect, sample: &[u8], truncated: bool) -> DialectCandidate {
        let rows = self.split_rows(&dialect, sample, truncated);
        if rows.is_empty() {
            return DialectCandidate {
                dialect,
                pattern_score: 0.0,
                type_score: 0.0,
                consistency_score: 0.0,
                num_columns: 0,
                rows_analyzed: 0,
            };
        }

        // Modal field count and how many rows share it.
        let mut tallies: indexmap::IndexMap<usize, usize> = indexmap::IndexMap::new();
        for row in &rows {
            *tallies.entry(row.len()).or_insert(0) += 1;
        }
        let (&modal_columns, &modal_rows) =
            tallies.iter().max_by_key(|(_, &count)| count).expect("rows is non-empty");

        let pattern_score = modal_rows as f64 / rows.len() as f64;
        let type_score = type_score(&rows, modal_columns);

        DialectCandidate {
            dialect,
            pattern_score,
            type_score,
            consistency_score: pattern_score * type_score,
            num_columns: modal_columns,
            rows_analyzed: rows.len(),
        }
    }

    /// Split the sample into rows of raw fields, honoring quote parity.
    ///
    /// The trailing row is dropped when the sample was cut out of a larger
    /// input and does not end at a line terminator.
    fn split_rows<'a>(
        &self,
        dialect: &Dialect,
        sample: &'a [u8],
        truncated: bool,
    ) -> Vec<Vec<&'a [u8]>> {
        let mut rows = Vec::new();
        let mut fields: Vec<&[u8]> = Vec::new();
        let mut field_start = 0usize;
        let mut in_quote = false;
        let mut i = 0usize;

        while i < sample.len() && rows.len() < self.options.max_rows {
            let b = sample[i];
            if b == dialect.quote_char {
                in_quote = !in_quote;
            } else if !in_quote {
                if b == dialect.delimiter {
                    fields.push(&sample[field_start..i]);
                    field_start = i + 1;
                } else if b == b'\n' || (b == b'\r' && sample.get(i + 1) != Some(&b'\n')) {
                    fields.push(&sample[field_start..i]);
                    rows.push(std::mem::take(&mut fields));
                    field_start = i + 1;
                } else if b == b'\r' {
                    // CR of a CRLF pair: the LF terminates the row.
                    fields.push(&sample[field_start..i]);
                    rows.push(std::mem::take(&mut fields));
                    i += 1;
                    field_start = i + 1;
                }
            }
            i += 1;
        }

        if rows.len() < self.options.max_rows && field_start < sample.len() && !truncated {
            fields.push(&sample[field_start..]);
            rows.push(fields);
        }

        rows
    }
}

/// Average per-column type agreement over the body rows.
fn type_score(rows: &[Vec<&[u8]>], columns: usize) -> f64 {
    if columns == 0 {
        return 0.0;
    }
    // The header (if any) would dilute every typed column, so rows after the
    // first carry the type evidence whenever there is more than one row.
    let body: &[Vec<&[u8]>] = if rows.len() > 1 { &rows[1..] } else { rows };

    let mut total = 0.0;
    for col in 0..columns {
        let mut tallies: indexmap::IndexMap<FieldType, usize> = indexmap::IndexMap::new();
        let mut non_empty = 0usize;
        for row in body {
            let Some(cell) = row.get(col) else { continue };
            let ty = field_type::infer(strip_quotes(cell));
            if ty == FieldType::Empty {
                continue;
            }
            non_empty += 1;
            *tallies.entry(ty).or_insert(0) += 1;
        }

        total += match tallies.iter().max_by_key(|(_, &count)| count) {
            None => 0.5, // all empty: neutral
            Some((&mode, &count)) => {
                let agreement = count as f64 / non_empty as f64;
                if mode == FieldType::String {
                    agreement * STRING_COLUMN_WEIGHT
                } else {
                    agreement
                }
            }
        };
    }
    total / columns as f64
}

fn strip_quotes(cell: &[u8]) -> &[u8] {
    if cell.len() >= 2 {
        let first = cell[0];
        if (first == b'"' || first == b'\'') && cell[cell.len() - 1] == first {
            return &cell[1..cell.len() - 1];
        }
    }
    cell
}

/// Header heuristic: the first row is all strings and at least one column
/// below it is dominated by a non-string type.
fn detect_header(rows: &[Vec<&[u8]>]) -> bool {
    if rows.len() < 2 {
        return false;
    }
    let header = &rows[0];
    if header.is_empty() {
        return false;
    }
    let all_strings = header.iter().all(|cell| {
        matches!(
            field_type::infer(strip_quotes(cell)),
            FieldType::String | FieldType::Empty
        )
    });
    if !all_strings {
        return false;
    }

    (0..header.len()).any(|col| {
        let mut tallies: indexmap::IndexMap<FieldType, usize> = indexmap::IndexMap::new();
        let mut non_empty = 0usize;
        for row in &rows[1..] {
            let Some(cell) = row.get(col) else { continue };
            let ty = field_type::infer(strip_quotes(cell));
            if ty == FieldType::Empty {
                continue;
            }
            non_empty += 1;
            *tallies.entry(ty).or_insert(0) += 1;
        }
        match tallies.iter().max_by_key(|(_, &count)| count) {
            Some((&mode, &count)) if mode != FieldType::String => {
                count as f64 / non_empty as f64 > DOMINANT_SHARE
            }
            _ => false,
        }
    })
}

/// Count CRLF / bare-LF / bare-CR occurrences and classify.
pub fn detect_line_ending(sample: &[u8]) -> LineEnding {
    let mut crlf = 0usize;
    let mut cr = 0usize;
    for i in memchr_iter(b'\r', sample) {
        if sample.get(i + 1) == Some(&b'\n') {
            crlf += 1;
        } else {
            cr += 1;
        }
    }
    let lf = memchr_iter(b'\n', sample).count() - crlf;

    let kinds = (crlf > 0) as u8 + (lf > 0) as u8 + (cr > 0) as u8;
    match (kinds, crlf > 0, lf > 0, cr > 0) {
        (0, ..) => LineEnding::Unknown,
        (1, true, ..) => LineEnding::CrLf,
        (1, _, true, _) => LineEnding::Lf,
        (1, .., true) => LineEnding::Cr,
        _ => LineEnding::Mixed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_semicolon_with_header() {
        let detector = DialectDetector::default();
        let result = detector.detect(b"id;name\n1;alice\n2;bob\n");
        assert_eq!(result.dialect.delimiter, b';');
        assert!(result.confidence > 0.5, "confidence={}", result.confidence);
        assert!(result.success());
        assert_eq!(result.detected_columns, 2);
        assert!(result.has_header);
        assert_eq!(result.rows_analyzed, 3);
    }

    #[test]
    fn test_detects_tsv() {
        let detector = DialectDetector::default();
        let result = detector.detect(b"a\tb\tc\n1\t2\t3\n4\t5\t6\n");
        assert_eq!(result.dialect.delimiter, b'\t');
        assert!(result.success());
        assert_eq!(result.detected_columns, 3);
    }

    #[test]
    fn test_detects_pipe() {
        let detector = DialectDetector::default();
        let result = detector.detect(b"x|y\n1|2\n3|4\n10|20\n");
        assert_eq!(result.dialect.delimiter, b'|');
        assert!(result.success());
    }

    #[test]
    fn test_quoted_delimiters_do_not_split() {
        let detector = DialectDetector::default();
        let result = detector.detect(b"a,b\n\"x,y\",2\n\"p,q\",4\n");
        assert_eq!(result.dialect.delimiter, b',');
        assert_eq!(result.detected_columns, 2);
    }

    #[test]
    fn test_falls_back_on_empty_input() {
        let detector = DialectDetector::default();
        let result = detector.detect(b"");
        assert!(!result.success());
        assert_eq!(result.dialect.delimiter, b',');
        assert_eq!(result.dialect.quote_char, b'"');
    }

    #[test]
    fn test_too_few_rows_is_not_confident() {
        let detector = DialectDetector::default();
        let result = detector.detect(b"1;2\n");
        assert!(!result.success());
        assert_eq!(result.dialect.delimiter, b',');
    }

    #[test]
    fn test_line_ending_detection() {
        assert_eq!(detect_line_ending(b"a\nb\n"), LineEnding::Lf);
        assert_eq!(detect_line_ending(b"a\r\nb\r\n"), LineEnding::CrLf);
        assert_eq!(detect_line_ending(b"a\rb\r"), LineEnding::Cr);
        assert_eq!(detect_line_ending(b"a\nb\r\n"), LineEnding::Mixed);
        assert_eq!(detect_line_ending(b"ab"), LineEnding::Unknown);
    }

    #[test]
    fn test_no_header_when_first_row_is_numeric() {
        let detector = DialectDetector::default();
        let result = detector.detect(b"1;2\n3;4\n5;6\n");
        assert!(result.success());
        assert!(!result.has_header);
    }

    #[test]
    fn test_candidates_are_sorted_best_first() {
        let detector = DialectDetector::default();
        let result = detector.detect(b"a;b\n1;2\n3;4\n");
        for pair in result.candidates.windows(2) {
            assert!(pair[0].consistency_score >= pair[1].consistency_score);
        }
    }
}
