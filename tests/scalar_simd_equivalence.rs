//! Property test: the switch-based and branchless indexers agree on every
//! well-formed input, at every thread count.

use proptest::prelude::*;

use vroomcsv::{AlignedBuffer, Dialect, ParseAlgorithm, ParseOptions, Parser};

/// A well-formed CSV document: rows of plain fields and quoted fields whose
/// content may embed delimiters and newlines. Quoted content starts with an
/// ordinary byte and carries no interior quotes, the shape the speculative
/// boundary probe resolves exactly; escaped-quote handling is pinned by the
/// deterministic tests instead, since a chunk boundary landing inside an
/// escape pair legitimately degrades rather than splitting.
fn well_formed_csv() -> impl Strategy<Value = Vec<u8>> {
    let plain_field = "[a-z0-9 ]{0,12}".prop_map(|s| s.into_bytes());
    let quoted_field = "[a-z][a-z0-9 ,\n]{0,11}".prop_map(|s| {
        let mut out = vec![b'"'];
        out.extend_from_slice(s.as_bytes());
        out.push(b'"');
        out
    });
    let field = prop_oneof![3 => plain_field, 1 => quoted_field];
    let row = prop::collection::vec(field, 1..6);
    prop::collection::vec(row, 0..40).prop_map(|rows| {
        let mut out = Vec::new();
        for row in rows {
            for (i, field) in row.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                out.extend_from_slice(field);
            }
            out.push(b'\n');
        }
        out
    })
}

fn positions(input: &[u8], threads: usize, algorithm: ParseAlgorithm) -> Vec<u64> {
    let buffer = AlignedBuffer::from_slice(input).unwrap();
    let mut options = ParseOptions::with_dialect(Dialect::csv());
    options.algorithm = algorithm;
    let mut result = Parser::new(threads).parse(&buffer, options).unwrap();
    result.index.compact();
    result.index.row_major().map(<[u64]>::to_vec).unwrap_or_default()
}

proptest! {
    #[test]
    fn scalar_and_simd_agree(input in well_formed_csv()) {
        let reference = positions(&input, 1, ParseAlgorithm::TwoPass);
        let simd = positions(&input, 1, ParseAlgorithm::Branchless);
        prop_assert_eq!(&reference, &simd);

        let speculative = positions(&input, 1, ParseAlgorithm::Speculative);
        prop_assert_eq!(&reference, &speculative);
    }

    #[test]
    fn thread_counts_agree(input in well_formed_csv()) {
        let reference = positions(&input, 1, ParseAlgorithm::Auto);
        for threads in [2usize, 4, 8] {
            let got = positions(&input, threads, ParseAlgorithm::Auto);
            prop_assert_eq!(&reference, &got, "threads={}", threads);
        }
    }
}
