#![allow(dead_code)]

use std::io::Write;

use flate2::write::ZlibEncoder;
use flate2::Compression;
use vetpdf_core::{EngineConfig, IndicatorKind, Verdict};
use vetpdf_detectors::default_engine;

/// `N 0 obj <body> endobj`.
pub fn obj(number: u32, body: &str) -> Vec<u8> {
    format!("{number} 0 obj\n{body}\nendobj\n").into_bytes()
}

/// A stream object with a correct direct `/Length`.
pub fn stream_obj(number: u32, dict_extra: &str, data: &[u8]) -> Vec<u8> {
    let mut out = format!("{number} 0 obj\n<< /Length {} {dict_extra} >>\nstream\n", data.len()).into_bytes();
    out.extend_from_slice(data);
    out.extend_from_slice(b"\nendstream\nendobj\n");
    out
}

pub fn flate(data: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).expect("compress");
    encoder.finish().expect("compress")
}

/// A Flate-compressed `/Type /ObjStm` holding `members`.
pub fn object_stream(number: u32, members: &[(u32, &str)]) -> Vec<u8> {
    let mut header = String::new();
    let mut body = String::new();
    for (member, text) in members {
        header.push_str(&format!("{member} {} ", body.len()));
        body.push_str(text);
        body.push('\n');
    }
    let first = header.len();
    let data = format!("{header}{body}");
    stream_obj(
        number,
        &format!("/Type /ObjStm /N {} /First {first} /Filter /FlateDecode", members.len()),
        &flate(data.as_bytes()),
    )
}

/// Assemble a complete file with a classic cross-reference table. Object
/// numbers are read from each object's header; numbers with no top-level
/// object are listed as free.
pub fn build_pdf(objects: &[Vec<u8>], trailer_extra: &str) -> Vec<u8> {
    let mut pdf = b"%PDF-1.7\n%\xE2\xE3\xCF\xD3\n".to_vec();
    let mut offsets: Vec<(usize, usize)> = Vec::new();
    for object in objects {
        let number = object
            .split(|b| *b == b' ')
            .next()
            .and_then(|token| std::str::from_utf8(token).ok())
            .and_then(|token| token.parse::<usize>().ok())
            .expect("object number");
        offsets.push((number, pdf.len()));
        pdf.extend_from_slice(object);
    }
    let size = offsets.iter().map(|(n, _)| n + 1).max().unwrap_or(1);
    let start_xref = pdf.len();
    pdf.extend_from_slice(format!("xref\n0 {size}\n").as_bytes());
    pdf.extend_from_slice(b"0000000000 65535 f \n");
    for number in 1..size {
        match offsets.iter().find(|(n, _)| *n == number) {
            Some((_, offset)) => pdf.extend_from_slice(format!("{offset:010} 00000 n \n").as_bytes()),
            None => pdf.extend_from_slice(b"0000000000 00000 f \n"),
        }
    }
    pdf.extend_from_slice(format!("trailer\n<< /Size {size} /Root 1 0 R {trailer_extra} >>\nstartxref\n").as_bytes());
    pdf.extend_from_slice(start_xref.to_string().as_bytes());
    pdf.extend_from_slice(b"\n%%EOF\n");
    pdf
}

/// Catalog, page tree and one page with a small content stream.
pub fn minimal_objects(catalog_extra: &str) -> Vec<Vec<u8>> {
    vec![
        obj(1, &format!("<< /Type /Catalog /Pages 2 0 R {catalog_extra} >>")),
        obj(2, "<< /Type /Pages /Count 1 /Kids [3 0 R] >>"),
        obj(3, "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R >>"),
        stream_obj(4, "", b"BT /F1 12 Tf 72 720 Td (Hello) Tj ET"),
    ]
}

pub fn scan(bytes: &[u8]) -> Verdict {
    scan_with(bytes, EngineConfig::default())
}

pub fn scan_with(bytes: &[u8], config: EngineConfig) -> Verdict {
    default_engine(config).expect("engine").scan(bytes).expect("scan")
}

pub fn kinds(verdict: &Verdict) -> Vec<IndicatorKind> {
    verdict.indicators.iter().map(|i| i.kind).collect()
}
