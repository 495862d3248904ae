//! # vroomcsv
//!
//! High-throughput CSV/DSV indexing with zero-copy columnar reads.
//!
//! vroomcsv scans delimiter-separated byte buffers at memory-bandwidth
//! speed and produces a compact index of field boundaries: byte offsets of
//! every separator, honoring quoted fields. Typed values are then resolved
//! lazily against the original bytes, so "open file → typed columns" never
//! copies field data unless unescaping demands it.
//!
//! ## Module Organization
//!
//! - [`buffer`] - 64-byte aligned, SIMD-padded input buffers
//! - [`simd`] - 64-byte block primitives (masks, quote parity, scatter)
//! - [`state_machine`] - lookup-table CSV automaton
//! - [`dialect`] - dialect model, auto-detection, cell type inference
//! - [`scan`] - first-pass split finding and second-pass indexing
//! - [`index`] - the parse index, layouts, escape metadata, disk cache
//! - [`parser`] - the orchestrator: options, fan-out, validation
//! - [`extract`] - typed zero-copy value extraction
//! - [`error`] - error taxonomy and the per-parse collector
//! - [`mmap`] - read-only memory-mapped files (cache loader)
//! - [`ffi`] - C ABI surface over opaque handles
//!
//! ## Quick Start
//!
//! ```
//! use vroomcsv::{AlignedBuffer, Dialect, ParseOptions, Parser};
//!
//! let buffer = AlignedBuffer::from_slice(b"a,b,c\n1,2,3\n").unwrap();
//! let parser = Parser::new(1);
//! let mut result = parser
//!     .parse(&buffer, ParseOptions::with_dialect(Dialect::csv()))
//!     .unwrap();
//!
//! assert!(result.success);
//! assert_eq!(result.num_columns(), 3);
//!
//! result.index.compact();
//! assert_eq!(result.index.row_major().unwrap(), &[1, 3, 5, 7, 9, 11]);
//! ```
//!
//! ## Features
//!
//! - `serde` - Serialize/Deserialize on configuration value types

// =============================================================================
// Core modules
// =============================================================================

/// SIMD-aligned, padded input buffers.
pub mod buffer;

/// 64-byte block primitives.
pub mod simd;

/// Lookup-table CSV automaton.
pub mod state_machine;

/// Error taxonomy and the per-parse collector.
pub mod error;

// =============================================================================
// Parsing pipeline
// =============================================================================

/// Dialect model, detection, and cell type inference.
pub mod dialect;

/// First- and second-pass scanners.
pub mod scan;

/// Parse index: layouts, escape metadata, disk cache.
pub mod index;

/// Validation passes.
pub mod validate;

/// Parse orchestration.
pub mod parser;

// =============================================================================
// Consumers
// =============================================================================

/// Typed zero-copy value extraction.
pub mod extract;

/// Read-only memory-mapped files.
pub mod mmap;

/// C ABI surface.
pub mod ffi;

// =============================================================================
// Public re-exports (convenience)
// =============================================================================

pub use buffer::{AlignedBuffer, AllocError, SIMD_PADDING};
pub use dialect::detector::{DetectionOptions, DetectionResult, DialectDetector};
pub use dialect::{Dialect, LineEnding};
pub use error::{ErrorCode, ErrorCollector, ErrorMode, ParseError, ParseFailure, Severity};
pub use extract::{ExtractError, ExtractionConfig, ValueExtractor};
pub use index::cache::{CacheError, CacheOptions, IndexCache};
pub use index::{ColumnEscapeInfo, IndexLayout, ParseIndex};
pub use mmap::MmapFile;
pub use parser::{ParseAlgorithm, ParseOptions, ParseResult, Parser};

/// Detect the dialect of a byte buffer.
///
/// Convenience wrapper over [`DialectDetector`].
pub fn detect_dialect(bytes: &[u8], options: DetectionOptions) -> DetectionResult {
    DialectDetector::new(options).detect(bytes)
}
