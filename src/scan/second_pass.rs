//! Second pass: emit separator positions into the interleaved index.
//!
//! Three variants share one output discipline (thread `t` writes lane `t` at
//! stride `T`):
//!
//! - [`second_pass_simd`]: the performance path. Pure bitmask work per
//!   64-byte block, no per-byte state.
//! - [`second_pass_scalar`]: the switch-based path, one byte at a time
//!   through the lookup-table automaton. The only variant with exact
//!   per-byte error attribution; used whenever a collector is present and
//!   the branchless algorithm was not requested.
//! - [`second_pass_branchless_with_errors`]: SIMD fast path for blocks that
//!   cannot produce lexical errors (no quotes, no null bytes, not inside a
//!   quoted field), scalar automaton for the rest.
//!
//! On well-formed input all variants emit identical position sequences; on
//! malformed input the automaton's recovery transitions may classify bytes
//! after the error differently from the pure bitmask path.

use super::SlotSink;
use crate::error::{
    context_snippet, line_column, ErrorCode, ErrorCollector, Severity, ERROR_CONTEXT_SIZE,
};
use crate::simd::{low_mask_through, scatter_bits, BlockClassifier, BLOCK_SIZE};
use crate::state_machine::{CsvState, StateMachine, TransitionError};

/// Result of one second-pass task.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct PassOutcome {
    /// Separators written by this task.
    pub n_indexes: u64,
    /// Whether the scan ended with quote parity still open. Fatal when the
    /// task covered the end of the buffer.
    pub ends_inside_quote: bool,
}

/// Branchless SIMD second pass over `[start, end)`.
pub(crate) fn second_pass_simd(
    classifier: &BlockClassifier,
    padded: &[u8],
    len: usize,
    start: usize,
    end: usize,
    sink: &SlotSink,
    thread_id: usize,
    stride: usize,
) -> PassOutcome {
    debug_assert!(start <= end && end <= len);
    // SAFETY: thread_id < stride and all writes stay on this lane.
    let lane = unsafe { sink.lane_ptr(thread_id) };
    let mut count = 0u64;
    let mut carry = 0u64;

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

        let field_seps = (masks.delimiters | masks.line_endings) & !inside;
        // SAFETY: lane slots are disjoint per thread and the index allocation
        // has 8 slots of scatter slack per lane.
        unsafe { scatter_bits(lane, &mut count, stride, idx as u64, field_seps) };
        idx += BLOCK_SIZE;
    }

    PassOutcome {
        n_indexes: count,
        ends_inside_quote: carry != 0,
    }
}

/// Switch-based scalar second pass with optional error collection.
pub(crate) fn second_pass_scalar(
    sm: &StateMachine,
    buf: &[u8],
    start: usize,
    end: usize,
    sink: &SlotSink,
    thread_id: usize,
    stride: usize,
    mut errors: Option<&mut ErrorCollector>,
) -> PassOutcome {
    // SAFETY: thread_id < stride and all writes stay on this lane.
    let lane = unsafe { sink.lane_ptr(thread_id) };
    let mut count = 0u64;
    let mut state = CsvState::RecordStart;

    let stopped = scalar_walk(
        sm,
        buf,
        start,
        end,
        lane,
        stride,
        &mut count,
        &mut state,
        &mut errors,
    );

    let ends_inside_quote = state == CsvState::QuotedField;
    if !stopped && ends_inside_quote && end == buf.len() {
        if let Some(errors) = errors.as_deref_mut() {
            report_unclosed_quote(sm, buf, errors);
        }
    }

    PassOutcome {
        n_indexes: count,
        ends_inside_quote,
    }
}

/// Branchless second pass with error collection.
///
/// Blocks free of quotes and null bytes, entered outside any quoted field,
/// cannot produce lexical errors; they take the SIMD path. Every other block
/// is walked through the automaton for exact error attribution.
#[allow(clippy::too_many_arguments)]
pub(crate) fn second_pass_branchless_with_errors(
    sm: &StateMachine,
    classifier: &BlockClassifier,
    padded: &[u8],
    len: usize,
    start: usize,
    end: usize,
    sink: &SlotSink,
    thread_id: usize,
    stride: usize,
    errors: &mut ErrorCollector,
) -> PassOutcome {
    debug_assert!(start <= end && end <= len);
    let buf = &padded[..len];
    // SAFETY: thread_id < stride and all writes stay on this lane.
    let lane = unsafe { sink.lane_ptr(thread_id) };
    let mut count = 0u64;
    let mut state = CsvState::RecordStart;
    let mut stopped = false;

    let mut idx = start;
    while idx < end {
        crate::simd::prefetch(padded, idx + 128);
        let remaining = end - idx;
        let block_len = remaining.min(BLOCK_SIZE);
        let valid = if remaining < BLOCK_SIZE {
            low_mask_through(remaining - 1)
        } else {
            !0
        };
        let next_is_lf = idx + BLOCK_SIZE < len && padded[idx + BLOCK_SIZE] == b'\n';
        let masks = classifier.classify(&padded[idx..idx + BLOCK_SIZE], next_is_lf, valid);
        let null_bytes = classifier.eq_mask(&padded[idx..idx + BLOCK_SIZE], 0x00, valid);

        let hazard = masks.quotes != 0
            || null_bytes != 0
            || matches!(state, CsvState::QuotedField | CsvState::QuotedEnd);

        if !hazard {
            let field_seps = masks.delimiters | masks.line_endings;
            // SAFETY: lane slots are disjoint per thread; 8 slots of slack.
            unsafe { scatter_bits(lane, &mut count, stride, idx as u64, field_seps) };
            state = state_after_clean_block(sm, buf, idx, block_len, state);
        } else {
            let mut opt = Some(&mut *errors);
            stopped = scalar_walk(
                sm,
                buf,
                idx,
                idx + block_len,
                lane,
                stride,
                &mut count,
                &mut state,
                &mut opt,
            );
            if stopped {
                break;
            }
        }
        idx += BLOCK_SIZE;
    }

    let ends_inside_quote = state == CsvState::QuotedField;
    if !stopped && ends_inside_quote && end == len {
        report_unclosed_quote(sm, buf, errors);
    }

    PassOutcome {
        n_indexes: count,
        ends_inside_quote,
    }
}

/// State after a block containing no quotes and no null bytes.
///
/// Only the last effective byte matters: a delimiter leaves us at a field
/// start, a terminator at a record start, anything else inside an unquoted
/// field. The CR of a CRLF pair changes nothing and is skipped.
fn state_after_clean_block(
    sm: &StateMachine,
    buf: &[u8],
    idx: usize,
    block_len: usize,
    entry_state: CsvState,
) -> CsvState {
    let mut j = block_len;
    while j > 0 {
        j -= 1;
        let pos = idx + j;
        let b = buf[pos];
        if b == b'\r' && buf.get(pos + 1) == Some(&b'\n') {
            continue;
        }
        return if b == sm.delimiter() {
            CsvState::FieldStart
        } else if b == b'\n' || b == b'\r' {
            CsvState::RecordStart
        } else {
            CsvState::UnquotedField
        };
    }
    entry_state
}

/// Drive the automaton over `[start, end)`, emitting separators and
/// reporting lexical errors. Returns true if the collector said to stop.
#[allow(clippy::too_many_arguments)]
fn scalar_walk(
    sm: &StateMachine,
    buf: &[u8],
    start: usize,
    end: usize,
    lane: *mut u64,
    stride: usize,
    count: &mut u64,
    state: &mut CsvState,
    errors: &mut Option<&mut ErrorCollector>,
) -> bool {
    let mut emit = |count: &mut u64, pos: usize| {
        // SAFETY: lane slots are disjoint per thread and within capacity.
        unsafe { *lane.add((*count as usize) * stride) = pos as u64 };
        *count += 1;
    };

    let mut pos = start;
    while pos < end {
        let b = buf[pos];

        if b == 0 {
            if let Some(collector) = errors.as_deref_mut() {
                let (line, column) = line_column(buf, pos);
                collector.record(
                    ErrorCode::NullByte,
                    Severity::Error,
                    line,
                    column,
                    pos,
                    "null byte in data",
                    context_snippet(buf, pos, ERROR_CONTEXT_SIZE),
                );
                if collector.should_stop() {
                    return true;
                }
                pos += 1;
                continue;
            }
        }

        if b == b'\r' {
            // Lone CR terminates the record; the CR of a CRLF pair is
            // ordinary and the following LF terminates.
            let lone = buf.get(pos + 1) != Some(&b'\n');
            if lone && *state != CsvState::QuotedField {
                emit(count, pos);
                *state = sm.process(*state, b'\n').state();
            }
            pos += 1;
            continue;
        }

        let result = sm.process(*state, b);
        if result.is_separator() {
            emit(count, pos);
        }
        if result.error() != TransitionError::None {
            if let Some(collector) = errors.as_deref_mut() {
                let (line, column) = line_column(buf, pos);
                let (code, message) = match result.error() {
                    TransitionError::QuoteInUnquoted => (
                        ErrorCode::QuoteInUnquotedField,
                        format!("quote character '{}' in unquoted field", sm.quote() as char),
                    ),
                    _ => (
                        ErrorCode::InvalidQuoteEscape,
                        format!("invalid character after closing quote '{}'", sm.quote() as char),
                    ),
                };
                collector.record(
                    code,
                    Severity::Error,
                    line,
                    column,
                    pos,
                    message,
                    context_snippet(buf, pos, ERROR_CONTEXT_SIZE),
                );
                if collector.should_stop() {
                    *state = result.state();
                    return true;
                }
            }
        }
        *state = result.state();
        pos += 1;
    }

    false
}

fn report_unclosed_quote(sm: &StateMachine, buf: &[u8], errors: &mut ErrorCollector) {
    let pos = buf.len();
    let (line, column) = line_column(buf, pos.saturating_sub(1));
    errors.record(
        ErrorCode::UnclosedQuote,
        Severity::Fatal,
        line,
        column,
        pos,
        format!("unclosed quote '{}' at end of input", sm.quote() as char),
        context_snippet(buf, pos.saturating_sub(1), ERROR_CONTEXT_SIZE),
    );
}
