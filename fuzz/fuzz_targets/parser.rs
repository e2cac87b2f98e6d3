#![no_main]
use libfuzzer_sys::fuzz_target;
use vetpdf_pdf::{parse_pdf, ParseOptions, RawDocument, ScanBudget};

fuzz_target!(|data: &[u8]| {
    let options = ParseOptions { max_objects: 10_000, max_decode_bytes: 1 << 20, ..ParseOptions::default() };
    let _ = parse_pdf(&RawDocument::new(data), &options, &ScanBudget::new(None, 8 << 20));
});
