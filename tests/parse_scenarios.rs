//! End-to-end scenarios across the public API: literal inputs, layout
//! invariants, multi-thread equivalence, caching, and extraction.

use std::sync::Arc;

use vroomcsv::{
    AlignedBuffer, CacheOptions, Dialect, ErrorCode, ErrorCollector, ErrorMode, ExtractionConfig,
    IndexCache, ParseOptions, Parser, ValueExtractor,
};

fn parse_positions(input: &[u8], threads: usize) -> Vec<u64> {
    let buffer = AlignedBuffer::from_slice(input).unwrap();
    let mut result = Parser::new(threads)
        .parse(&buffer, ParseOptions::with_dialect(Dialect::csv()))
        .unwrap();
    result.index.compact();
    result.index.row_major().unwrap().to_vec()
}

#[test]
fn scenario_simple_grid() {
    let positions = parse_positions(b"a,b,c\n1,2,3\n", 1);
    assert_eq!(positions, vec![1, 3, 5, 7, 9, 11]);

    let buffer = AlignedBuffer::from_slice(b"a,b,c\n1,2,3\n").unwrap();
    let result = Parser::new(1)
        .parse(&buffer, ParseOptions::with_dialect(Dialect::csv()))
        .unwrap();
    assert_eq!(result.num_columns(), 3);
    assert_eq!(result.index.num_rows(), 2); // header + 1 data row
}

#[test]
fn scenario_quoted_comma() {
    assert_eq!(parse_positions(b"\"hello, world\",x\n", 1), vec![14, 16]);
}

#[test]
fn scenario_escaped_quotes_and_metadata() {
    let input = b"\"say \"\"hi\"\"\",k\n";
    let buffer = Arc::new(AlignedBuffer::from_slice(input).unwrap());
    let mut result = Parser::new(1)
        .parse_shared(Arc::clone(&buffer), ParseOptions::with_dialect(Dialect::csv()))
        .unwrap();

    result.index.compute_column_escape_info(&buffer, b'"');
    let col0 = result.index.escape_info(0).unwrap();
    assert!(col0.has_quotes);
    assert!(col0.has_escapes);

    let config = ExtractionConfig {
        has_header: false,
        ..ExtractionConfig::default()
    };
    let extractor = ValueExtractor::new(result.index.share(), Dialect::csv(), config).unwrap();
    assert_eq!(extractor.get_string(0, 0).unwrap(), "say \"hi\"");
}

#[test]
fn scenario_cr_crlf_lf_records() {
    // Three records a, b, c; the CR of the CRLF must not add a separator.
    let input = b"a\rb\r\nc\n";
    assert_eq!(parse_positions(input, 1), vec![1, 4, 6]);

    let buffer = AlignedBuffer::from_slice(input).unwrap();
    let mut errors = ErrorCollector::new(ErrorMode::Permissive);
    let mut options = ParseOptions::with_dialect(Dialect::csv());
    options.errors = Some(&mut errors);
    Parser::new(1).parse(&buffer, options).unwrap();
    assert!(errors
        .errors()
        .iter()
        .any(|e| e.code == ErrorCode::MixedLineEndings));
}

#[test]
fn scenario_detect_semicolon() {
    let result = vroomcsv::detect_dialect(b"id;name\n1;alice\n2;bob\n", Default::default());
    assert_eq!(result.dialect.delimiter, b';');
    assert!(result.confidence > 0.5);
    assert!(result.success());
    assert_eq!(result.detected_columns, 2);
    assert!(result.has_header);
}

#[test]
fn scenario_permissive_field_count() {
    let buffer = AlignedBuffer::from_slice(b"a,b,c\n1,2\n3,4,5\n").unwrap();
    let mut errors = ErrorCollector::new(ErrorMode::Permissive);
    let mut options = ParseOptions::with_dialect(Dialect::csv());
    options.errors = Some(&mut errors);
    let mut result = Parser::new(1).parse(&buffer, options).unwrap();

    assert!(result.success);
    let field_count_errors: Vec<_> = errors
        .errors()
        .iter()
        .filter(|e| e.code == ErrorCode::InconsistentFieldCount)
        .collect();
    assert_eq!(field_count_errors.len(), 1);
    assert_eq!(field_count_errors[0].line, 2);

    result.index.compact();
    assert_eq!(
        result.index.row_major().unwrap(),
        &[1, 3, 5, 7, 9, 11, 13, 15]
    );
}

#[test]
fn boundary_empty_input() {
    let buffer = AlignedBuffer::from_slice(b"").unwrap();
    let result = Parser::new(1)
        .parse(&buffer, ParseOptions::with_dialect(Dialect::csv()))
        .unwrap();
    assert!(result.success);
    assert_eq!(result.total_separators(), 0);
}

#[test]
fn boundary_lone_terminator() {
    assert_eq!(parse_positions(b"\n", 1), vec![0]);
}

#[test]
fn boundary_unclosed_quote_is_fatal() {
    let buffer = AlignedBuffer::from_slice(b"a,\"runs to eof").unwrap();
    let mut errors = ErrorCollector::new(ErrorMode::Permissive);
    let mut options = ParseOptions::with_dialect(Dialect::csv());
    options.errors = Some(&mut errors);
    let result = Parser::new(1).parse(&buffer, options).unwrap();

    assert!(!result.success);
    let fatal: Vec<_> = errors
        .errors()
        .iter()
        .filter(|e| e.code == ErrorCode::UnclosedQuote)
        .collect();
    assert_eq!(fatal.len(), 1);
    assert_eq!(fatal[0].byte_offset, 14);
}

#[test]
fn boundary_crlf_at_end_of_record() {
    // One record terminator per CRLF, never two.
    assert_eq!(parse_positions(b"x,y\r\n", 1), vec![1, 4]);
}

/// A megabyte of synthetic CSV with embedded quoted newlines must index
/// identically at every thread count.
#[test]
fn multithreaded_equivalence_large() {
    let mut input = Vec::with_capacity(1 << 20);
    let mut i = 0u32;
    while input.len() < (1 << 20) {
        if i % 11 == 0 {
            input.extend_from_slice(
                format!("\"field with\nnewline {i}\",plain{i},123,4.5\n").as_bytes(),
            );
        } else {
            input.extend_from_slice(format!("row{i},value{i},{i},0.25\n").as_bytes());
        }
        i += 1;
    }

    let expected = parse_positions(&input, 1);
    for threads in [2, 4, 8] {
        let got = parse_positions(&input, threads);
        assert_eq!(got.len(), expected.len(), "threads={threads}");
        assert_eq!(got, expected, "threads={threads}");
    }
}

#[test]
fn compacted_positions_strictly_ascending() {
    let input = b"a,b\n\"q,q\",2\nlast,row\n".repeat(100);
    for threads in [1, 4] {
        let positions = parse_positions(&input, threads);
        for pair in positions.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }
}

#[test]
fn column_major_matches_row_major() {
    let input = b"a,b,c\n1,2,3\n4,5,6\n7,8,9\n";
    let buffer = AlignedBuffer::from_slice(input).unwrap();
    let mut result = Parser::new(1)
        .parse(&buffer, ParseOptions::with_dialect(Dialect::csv()))
        .unwrap();

    result.index.compact();
    let row_major = result.index.row_major().unwrap().to_vec();
    let cols = result.num_columns();
    let rows = row_major.len() / cols;

    result.index.compact_column_major(1);
    for r in 0..rows {
        for c in 0..cols {
            assert_eq!(
                result.index.column(c).unwrap()[r],
                row_major[r * cols + c],
                "r={r} c={c}"
            );
        }
    }
}

#[test]
fn single_thread_degradation_resets_stride() {
    // Small input, many threads: the index must report stride 1 and still
    // produce the right positions.
    let buffer = AlignedBuffer::from_slice(b"a,b\n1,2\n").unwrap();
    let mut result = Parser::new(8)
        .parse(&buffer, ParseOptions::with_dialect(Dialect::csv()))
        .unwrap();
    assert_eq!(result.index.n_threads(), 1);
    result.index.compact();
    assert_eq!(result.index.row_major().unwrap(), &[1, 3, 5, 7]);
}

#[test]
fn branchless_algorithm_matches_default() {
    let input = b"q,\"w\ne\",r\nt,y,u\n".repeat(200);
    let buffer = AlignedBuffer::from_slice(&input).unwrap();

    let mut default_result = Parser::new(4)
        .parse(&buffer, ParseOptions::with_dialect(Dialect::csv()))
        .unwrap();
    let mut branchless_result = Parser::new(4)
        .parse(&buffer, ParseOptions::branchless(Dialect::csv()))
        .unwrap();

    default_result.index.compact();
    branchless_result.index.compact();
    assert_eq!(
        default_result.index.row_major().unwrap(),
        branchless_result.index.row_major().unwrap()
    );
}

#[test]
fn cache_round_trip_and_freshness() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("table.csv");
    std::fs::write(&source, b"a,b\n1,2\n3,4\n").unwrap();

    let buffer = AlignedBuffer::load_file(&source).unwrap();
    let result = Parser::new(2)
        .parse(&buffer, ParseOptions::with_dialect(Dialect::csv()))
        .unwrap();

    let cache = IndexCache::with_options(CacheOptions {
        cache_dir: Some(dir.path().to_path_buf()),
        ..CacheOptions::default()
    });
    cache.save(&source, &result.index).unwrap();

    // Round trip reproduces the arrays.
    let loaded = cache.load(&source).unwrap();
    assert_eq!(loaded.columns, result.index.columns);
    assert_eq!(loaded.n_threads(), result.index.n_threads());
    assert_eq!(loaded.n_indexes(), result.index.n_indexes());

    // Mutating the source must invalidate the cache.
    std::fs::write(&source, b"a,b\n1,2\n3,4\n5,6\n").unwrap();
    assert!(matches!(
        cache.load(&source),
        Err(vroomcsv::CacheError::SourceChanged)
    ));
}

#[test]
fn tsv_dialect() {
    let buffer = AlignedBuffer::from_slice(b"a\tb\n1\t2\n").unwrap();
    let mut result = Parser::new(1)
        .parse(&buffer, ParseOptions::with_dialect(Dialect::tsv()))
        .unwrap();
    assert_eq!(result.num_columns(), 2);
    result.index.compact();
    assert_eq!(result.index.row_major().unwrap(), &[1, 3, 5, 7]);
}

#[test]
fn extractor_full_pipeline() {
    let input = b"id,name,score\n1,alice,3.5\n2,\"bob \"\"the\"\" builder\",4.25\n";
    let buffer = Arc::new(AlignedBuffer::from_slice(input).unwrap());
    let mut result = Parser::new(1)
        .parse_shared(Arc::clone(&buffer), ParseOptions::with_dialect(Dialect::csv()))
        .unwrap();
    result.index.compute_column_escape_info(&buffer, b'"');

    let extractor = ValueExtractor::new(
        result.index.share(),
        Dialect::csv(),
        ExtractionConfig::default(),
    )
    .unwrap();

    assert_eq!(extractor.header().unwrap(), vec!["id", "name", "score"]);
    assert_eq!(extractor.num_rows(), 2);
    assert_eq!(extractor.get_integer(0, 0).unwrap(), Some(1));
    assert_eq!(extractor.get_string(1, 1).unwrap(), "bob \"the\" builder");
    assert_eq!(extractor.get_float(1, 2).unwrap(), Some(4.25));
}
