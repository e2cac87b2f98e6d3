#![no_main]
use libfuzzer_sys::fuzz_target;
use vetpdf_pdf::{decode, DecodeLimits, PdfDict, PdfName, PdfObject};

const FILTERS: [&[u8]; 5] = [b"FlateDecode", b"ASCIIHexDecode", b"ASCII85Decode", b"RunLengthDecode", b"LZWDecode"];

// First byte picks up to three filters, the rest is the stream body.
fuzz_target!(|data: &[u8]| {
    let Some((&selector, body)) = data.split_first() else { return };
    let chain: Vec<PdfObject> = (0..(selector as usize % 3) + 1)
        .map(|i| FILTERS[(selector as usize >> (2 * i)) % FILTERS.len()])
        .map(|name| PdfObject::Name(PdfName::from_decoded(name)))
        .collect();
    let dict = PdfDict { entries: vec![(PdfName::from_decoded(b"Filter"), PdfObject::Array(chain))] };
    let limits = DecodeLimits { max_decoded_bytes: 1 << 20, max_filter_chain: 4 };
    if let Ok(decoded) = decode(&dict, body, &limits) {
        assert!(decoded.data.len() <= limits.max_decoded_bytes);
    }
});
