#![allow(dead_code)]

use std::io::Write;

use flate2::write::ZlibEncoder;
use flate2::Compression;
use vetpdf_core::{Engine, EngineConfig};

pub fn engine(config: EngineConfig) -> Engine {
    vetpdf_detectors::default_engine(config).expect("engine")
}

pub fn flate(data: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(data).expect("compress");
    encoder.finish().expect("compress")
}

/// Build a file from `(number, body)` pairs with a classic cross-reference
/// table. Numbers without a body are listed as free.
pub fn build_pdf_with_objects(objects: &[(u32, Vec<u8>)], trailer_extra: &str) -> Vec<u8> {
    let mut pdf = b"%PDF-1.7\n".to_vec();
    let size = objects.iter().map(|(n, _)| *n as usize + 1).max().unwrap_or(1);
    let mut offsets = vec![None; size];
    for (number, body) in objects {
        offsets[*number as usize] = Some(pdf.len());
        pdf.extend_from_slice(format!("{number} 0 obj\n").as_bytes());
        pdf.extend_from_slice(body);
        pdf.extend_from_slice(b"\nendobj\n");
    }
    let start_xref = pdf.len();
    pdf.extend_from_slice(format!("xref\n0 {size}\n0000000000 65535 f \n").as_bytes());
    for offset in offsets.iter().skip(1) {
        match offset {
            Some(offset) => pdf.extend_from_slice(format!("{offset:010} 00000 n \n").as_bytes()),
            None => pdf.extend_from_slice(b"0000000000 00000 f \n"),
        }
    }
    pdf.extend_from_slice(
        format!("trailer\n<< /Size {size} /Root 1 0 R {trailer_extra} >>\nstartxref\n{start_xref}\n%%EOF\n").as_bytes(),
    );
    pdf
}

pub fn dict(text: &str) -> Vec<u8> {
    text.as_bytes().to_vec()
}

pub fn stream(dict_extra: &str, data: &[u8]) -> Vec<u8> {
    let mut out = format!("<< /Length {} {dict_extra} >>\nstream\n", data.len()).into_bytes();
    out.extend_from_slice(data);
    out.extend_from_slice(b"\nendstream");
    out
}

pub fn object_stream(members: &[(u32, &str)]) -> Vec<u8> {
    let mut header = String::new();
    let mut body = String::new();
    for (member, text) in members {
        header.push_str(&format!("{member} {} ", body.len()));
        body.push_str(text);
        body.push('\n');
    }
    let data = format!("{header}{body}");
    stream(
        &format!("/Type /ObjStm /N {} /First {} /Filter /FlateDecode", members.len(), header.len()),
        &flate(data.as_bytes()),
    )
}

pub fn page_tree(catalog_extra: &str) -> Vec<(u32, Vec<u8>)> {
    vec![
        (1, dict(&format!("<< /Type /Catalog /Pages 2 0 R {catalog_extra} >>"))),
        (2, dict("<< /Type /Pages /Count 1 /Kids [3 0 R] >>")),
        (3, dict("<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] >>")),
    ]
}

/// OpenAction into a JavaScript action stored in a compressed object
/// stream under an escaped name.
pub fn hidden_script_pdf() -> Vec<u8> {
    let mut objects = page_tree("/OpenAction 5 0 R");
    objects.push((6, object_stream(&[(5, "<< /S /J#61vaScript /JS (app.alert(1)) >>")])));
    build_pdf_with_objects(&objects, "")
}
