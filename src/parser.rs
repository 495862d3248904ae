//! Parse orchestration: options, algorithm selection, and the two-pass
//! parallel fan-out.
//!
//! A parse goes: resolve the dialect (explicit or detected) → size the
//! interleaved index (overflow-checked) → first-pass tasks find safe chunk
//! boundaries → second-pass tasks emit separators into disjoint strided
//! lanes → validations run against the collector → the caller gets a
//! [`ParseResult`]. Small inputs, a single configured thread, or missing
//! safe boundaries degrade to a single-threaded scan, which also resets the
//! index stride to 1.

use std::sync::Arc;

use rayon::prelude::*;

use crate::buffer::AlignedBuffer;
use crate::dialect::detector::{DetectionOptions, DetectionResult, DialectDetector};
use crate::dialect::Dialect;
use crate::error::{
    context_snippet, line_column, ErrorCode, ErrorCollector, ParseError, ParseFailure, Severity,
    ERROR_CONTEXT_SIZE,
};
use crate::index::ParseIndex;
use crate::scan::first_pass::{first_pass, first_pass_speculate};
use crate::scan::second_pass::{
    second_pass_branchless_with_errors, second_pass_scalar, second_pass_simd, PassOutcome,
};
use crate::scan::{SlotSink, NULL_POS};
use crate::simd::BlockClassifier;
use crate::state_machine::StateMachine;
use crate::validate;

/// Which indexing implementation to run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ParseAlgorithm {
    /// Let the parser choose (currently: speculative).
    #[default]
    Auto,
    /// Speculative chunking: every chunk resolves its own boundary from a
    /// backward probe, no inter-pass join on quote counts.
    Speculative,
    /// Deterministic two-pass: exact quote counts decide the boundaries;
    /// the second pass is the switch-based scanner.
    TwoPass,
    /// Table-driven second pass (the fast path's default).
    Branchless,
}

/// Options for a single parse call.
pub struct ParseOptions<'a> {
    /// Explicit dialect; `None` runs detection first.
    pub dialect: Option<Dialect>,
    /// Collector for error-tolerant parsing. Without one, the first fatal
    /// error aborts the parse with a typed failure.
    pub errors: Option<&'a mut ErrorCollector>,
    /// Settings for the detection run when `dialect` is `None`.
    pub detection: DetectionOptions,
    pub algorithm: ParseAlgorithm,
}

impl Default for ParseOptions<'_> {
    fn default() -> Self {
        Self {
            dialect: None,
            errors: None,
            detection: DetectionOptions::default(),
            algorithm: ParseAlgorithm::Auto,
        }
    }
}

impl<'a> ParseOptions<'a> {
    pub fn with_dialect(dialect: Dialect) -> Self {
        Self {
            dialect: Some(dialect),
            ..Self::default()
        }
    }

    pub fn with_errors(errors: &'a mut ErrorCollector) -> Self {
        Self {
            errors: Some(errors),
            ..Self::default()
        }
    }

    pub fn with_algorithm(algorithm: ParseAlgorithm) -> Self {
        Self {
            algorithm,
            ..Self::default()
        }
    }

    /// Explicit dialect plus the branchless second pass.
    pub fn branchless(dialect: Dialect) -> Self {
        Self {
            dialect: Some(dialect),
            algorithm: ParseAlgorithm::Branchless,
            ..Self::default()
        }
    }
}

/// Outcome of a parse.
#[derive(Debug)]
pub struct ParseResult {
    pub index: ParseIndex,
    /// The dialect actually used.
    pub dialect: Dialect,
    /// Present when detection ran (no explicit dialect).
    pub detection: Option<DetectionResult>,
    /// False when a fatal error was collected.
    pub success: bool,
}

impl ParseResult {
    pub fn num_columns(&self) -> usize {
        self.index.columns as usize
    }

    pub fn total_separators(&self) -> u64 {
        self.index.total_separators()
    }
}

/// High-throughput CSV/DSV indexer.
#[derive(Clone, Debug)]
pub struct Parser {
    num_threads: usize,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new(1)
    }
}

impl Parser {
    /// A parser that fans out over `num_threads` tasks per parse (minimum 1).
    pub fn new(num_threads: usize) -> Self {
        Self {
            num_threads: num_threads.max(1),
        }
    }

    /// A parser sized to the machine's logical CPU count.
    pub fn with_hardware_threads() -> Self {
        Self::new(num_cpus::get())
    }

    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    pub fn set_num_threads(&mut self, num_threads: usize) {
        self.num_threads = num_threads.max(1);
    }

    /// Parse `buffer` and return the separator index.
    ///
    /// The buffer's padding guarantee makes every SIMD block load safe; use
    /// [`Parser::parse_shared`] when derived views need to outlive the
    /// buffer binding.
    pub fn parse(
        &self,
        buffer: &AlignedBuffer,
        options: ParseOptions<'_>,
    ) -> Result<ParseResult, ParseFailure> {
        let len = buffer.len();
        let mut errors = options.errors;

        // Resolve the dialect first: explicit wins, otherwise detect.
        let (dialect, detection) = match options.dialect {
            Some(dialect) => (dialect, None),
            None => {
                let detector = DialectDetector::new(options.detection.clone());
                let result = detector.detect(buffer.as_slice());
                let dialect = if result.success() {
                    result.dialect
                } else {
                    Dialect::csv()
                };
                (dialect, Some(result))
            }
        };

        if let (Some(result), Some(collector)) = (&detection, errors.as_deref_mut()) {
            if !result.success() && len > 0 {
                collector.record(
                    ErrorCode::AmbiguousSeparator,
                    Severity::Warning,
                    1,
                    1,
                    0,
                    "could not determine the separator reliably; assuming ','",
                    "",
                );
            }
        }

        let mut index = ParseIndex::with_capacity(len, self.num_threads)?;
        index.columns = count_header_columns(buffer.as_slice(), &dialect);

        if len == 0 {
            return Ok(ParseResult {
                index,
                dialect,
                detection,
                success: true,
            });
        }

        // Structural checks run up front so STRICT mode can stop before the
        // expensive passes.
        if let Some(collector) = errors.as_deref_mut() {
            validate::check_empty_header(buffer.as_slice(), collector);
            if !collector.should_stop() {
                validate::check_duplicate_columns(
                    buffer.as_slice(),
                    collector,
                    dialect.delimiter,
                    dialect.quote_char,
                );
            }
            if !collector.should_stop() {
                validate::check_line_endings(buffer.as_slice(), collector);
            }
            if collector.should_stop() {
                return Ok(ParseResult {
                    success: !collector.has_fatal_errors(),
                    index,
                    dialect,
                    detection,
                });
            }
        }

        let mut threads = self.num_threads;
        if threads > 1 && len / threads < 64 {
            threads = 1;
        }
        if threads == 1 {
            index.reset_single_threaded();
        }

        let classifier = BlockClassifier::new(dialect.delimiter, dialect.quote_char);
        let machine = StateMachine::from_dialect(&dialect);

        let ends_inside_quote = if threads == 1 {
            self.run_single_threaded(
                &classifier,
                &machine,
                buffer,
                &mut index,
                &mut errors,
                options.algorithm,
            )
        } else {
            match compute_boundaries(&classifier, buffer, threads, options.algorithm, &dialect) {
                Some(boundaries) => self.run_parallel(
                    &classifier,
                    &machine,
                    buffer,
                    &mut index,
                    &mut errors,
                    options.algorithm,
                    &boundaries,
                ),
                None => {
                    // No safe split point in some chunk: degrade. The stride
                    // must follow, or downstream slot arithmetic scrambles.
                    index.reset_single_threaded();
                    self.run_single_threaded(
                        &classifier,
                        &machine,
                        buffer,
                        &mut index,
                        &mut errors,
                        options.algorithm,
                    )
                }
            }
        };

        if ends_inside_quote && errors.is_none() {
            let (line, column) = line_column(buffer.as_slice(), len.saturating_sub(1));
            return Err(ParseFailure::Syntax(ParseError {
                code: ErrorCode::UnclosedQuote,
                severity: Severity::Fatal,
                line,
                column,
                byte_offset: len,
                message: format!(
                    "unclosed quote '{}' at end of input",
                    dialect.quote_char as char
                ),
                context: context_snippet(buffer.as_slice(), len - 1, ERROR_CONTEXT_SIZE),
            }));
        }

        if let Some(collector) = errors.as_deref_mut() {
            if !collector.should_stop() {
                validate::check_field_counts(
                    buffer.as_slice(),
                    collector,
                    dialect.delimiter,
                    dialect.quote_char,
                );
            }
        }

        let success = errors.map_or(true, |collector| !collector.has_fatal_errors());
        Ok(ParseResult {
            index,
            dialect,
            detection,
            success,
        })
    }

    /// Like [`Parser::parse`], but the index adopts the buffer so derived
    /// views (extractors, shared handles) keep the bytes alive.
    pub fn parse_shared(
        &self,
        buffer: Arc<AlignedBuffer>,
        options: ParseOptions<'_>,
    ) -> Result<ParseResult, ParseFailure> {
        let mut result = self.parse(&buffer, options)?;
        result.index.adopt_buffer(buffer);
        Ok(result)
    }

    #[allow(clippy::too_many_arguments)]
    fn run_single_threaded(
        &self,
        classifier: &BlockClassifier,
        machine: &StateMachine,
        buffer: &AlignedBuffer,
        index: &mut ParseIndex,
        errors: &mut Option<&mut ErrorCollector>,
        algorithm: ParseAlgorithm,
    ) -> bool {
        let len = buffer.len();
        let sink = SlotSink::new(index.interleaved_slots_mut());
        let outcome = match errors.as_deref_mut() {
            Some(collector) => match algorithm {
                ParseAlgorithm::Branchless => second_pass_branchless_with_errors(
                    machine,
                    classifier,
                    buffer.padded(),
                    len,
                    0,
                    len,
                    &sink,
                    0,
                    1,
                    collector,
                ),
                _ => second_pass_scalar(
                    machine,
                    buffer.as_slice(),
                    0,
                    len,
                    &sink,
                    0,
                    1,
                    Some(collector),
                ),
            },
            None => match algorithm {
                ParseAlgorithm::TwoPass => {
                    second_pass_scalar(machine, buffer.as_slice(), 0, len, &sink, 0, 1, None)
                }
                _ => second_pass_simd(classifier, buffer.padded(), len, 0, len, &sink, 0, 1),
            },
        };
        index.set_count(0, outcome.n_indexes);
        outcome.ends_inside_quote
    }

    #[allow(clippy::too_many_arguments)]
    fn run_parallel(
        &self,
        classifier: &BlockClassifier,
        machine: &StateMachine,
        buffer: &AlignedBuffer,
        index: &mut ParseIndex,
        errors: &mut Option<&mut ErrorCollector>,
        algorithm: ParseAlgorithm,
        boundaries: &[usize],
    ) -> bool {
        let len = buffer.len();
        let threads = boundaries.len() - 1;
        let sink = SlotSink::new(index.interleaved_slots_mut());

        let outcomes: Vec<(PassOutcome, Option<ErrorCollector>)> = match errors.as_deref_mut() {
            Some(collector) => {
                let mode = collector.mode();
                (0..threads)
                    .into_par_iter()
                    .map(|t| {
                        let mut local = ErrorCollector::new(mode);
                        let outcome = match algorithm {
                            ParseAlgorithm::Branchless => second_pass_branchless_with_errors(
                                machine,
                                classifier,
                                buffer.padded(),
                                len,
                                boundaries[t],
                                boundaries[t + 1],
                                &sink,
                                t,
                                threads,
                                &mut local,
                            ),
                            _ => second_pass_scalar(
                                machine,
                                buffer.as_slice(),
                                boundaries[t],
                                boundaries[t + 1],
                                &sink,
                                t,
                                threads,
                                Some(&mut local),
                            ),
                        };
                        (outcome, Some(local))
                    })
                    .collect()
            }
            None => (0..threads)
                .into_par_iter()
                .map(|t| {
                    let outcome = match algorithm {
                        ParseAlgorithm::TwoPass => second_pass_scalar(
                            machine,
                            buffer.as_slice(),
                            boundaries[t],
                            boundaries[t + 1],
                            &sink,
                            t,
                            threads,
                            None,
                        ),
                        _ => second_pass_simd(
                            classifier,
                            buffer.padded(),
                            len,
                            boundaries[t],
                            boundaries[t + 1],
                            &sink,
                            t,
                            threads,
                        ),
                    };
                    (outcome, None)
                })
                .collect(),
        };

        let mut ends_inside_quote = false;
        let mut locals = Vec::new();
        for (t, (outcome, local)) in outcomes.into_iter().enumerate() {
            index.set_count(t, outcome.n_indexes);
            if t == threads - 1 {
                ends_inside_quote = outcome.ends_inside_quote;
            }
            if let Some(local) = local {
                locals.push(local);
            }
        }
        if let Some(collector) = errors.as_deref_mut() {
            collector.merge_sorted(locals);
        }

        ends_inside_quote
    }
}

/// Column count of the header record: unquoted delimiters before the first
/// record terminator, plus one.
fn count_header_columns(buf: &[u8], dialect: &Dialect) -> u64 {
    if buf.is_empty() {
        return 0;
    }
    let mut columns = 1u64;
    let mut in_quote = false;
    for (i, &b) in buf.iter().enumerate() {
        if b == dialect.quote_char {
            in_quote = !in_quote;
        } else if !in_quote {
            if b == dialect.delimiter {
                columns += 1;
            } else if b == b'\n' || (b == b'\r' && buf.get(i + 1) != Some(&b'\n')) {
                break;
            }
        }
    }
    columns
}

/// Pick a safe boundary inside every chunk but the first.
///
/// Returns `None` when some chunk has no usable line terminator, which
/// forces the single-threaded fallback.
fn compute_boundaries(
    classifier: &BlockClassifier,
    buffer: &AlignedBuffer,
    threads: usize,
    algorithm: ParseAlgorithm,
    dialect: &Dialect,
) -> Option<Vec<usize>> {
    let len = buffer.len();
    let chunk_size = len / threads;
    let mut boundaries = vec![0usize; threads + 1];
    boundaries[threads] = len;

    match algorithm {
        ParseAlgorithm::TwoPass => {
            // Deterministic: exact quote counts, reconciled cumulatively.
            let stats: Vec<_> = (0..threads)
                .into_par_iter()
                .map(|t| {
                    first_pass(
                        classifier,
                        buffer.padded(),
                        len,
                        chunk_size * t,
                        chunk_size * (t + 1),
                    )
                })
                .collect();

            let mut quotes = stats[0].n_quotes;
            for t in 1..threads {
                let candidate = if quotes % 2 == 0 {
                    stats[t].first_even_nl
                } else {
                    stats[t].first_odd_nl
                };
                if candidate == NULL_POS {
                    return None;
                }
                boundaries[t] = candidate as usize;
                quotes += stats[t].n_quotes;
            }
        }
        _ => {
            // Speculative: each chunk resolves its parity guess locally.
            let stats: Vec<_> = (1..threads)
                .into_par_iter()
                .map(|t| {
                    first_pass_speculate(
                        buffer.as_slice(),
                        chunk_size * t,
                        chunk_size * (t + 1),
                        dialect.delimiter,
                        dialect.quote_char,
                    )
                })
                .collect();

            for (i, stat) in stats.iter().enumerate() {
                let candidate = if stat.n_quotes == 0 {
                    stat.first_even_nl
                } else {
                    stat.first_odd_nl
                };
                if candidate == NULL_POS {
                    return None;
                }
                boundaries[i + 1] = candidate as usize;
            }
        }
    }

    Some(boundaries)
}
