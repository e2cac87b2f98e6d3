use anyhow::Result;
use memchr::memmem;

use vetpdf_core::detect::{Detector, Needs};
use vetpdf_core::{Indicator, IndicatorKind, Location, ScanContext};

/// Readers accept a header anywhere in the first kilobyte.
const HEADER_WINDOW: usize = 1024;
const EOF_WINDOW: usize = 1024;

const PREFIX_MAGIC: [(&[u8], &str); 8] = [
    (b"MZ", "PE executable"),
    (b"\x7fELF", "ELF executable"),
    (b"PK\x03\x04", "ZIP archive"),
    (b"\x89PNG", "PNG image"),
    (b"\xFF\xD8\xFF", "JPEG image"),
    (b"GIF8", "GIF image"),
    (b"<html", "HTML document"),
    (b"#!", "script"),
];

pub struct HeaderAnomalyDetector;

impl Detector for HeaderAnomalyDetector {
    fn id(&self) -> &'static str {
        "header_anomaly"
    }

    fn needs(&self) -> Needs {
        Needs::RAW_BYTES
    }

    fn run(&self, ctx: &ScanContext) -> Result<Vec<Indicator>> {
        let bytes = ctx.doc.bytes();
        let mut out = Vec::new();
        if let Some((declared, actual)) = ctx.doc.length_mismatch() {
            out.push(ctx.indicator(
                IndicatorKind::MalformedInput,
                Location::Document,
                format!("declared length {declared} but {actual} bytes received"),
            ));
        }
        if bytes.is_empty() {
            out.push(ctx.indicator(IndicatorKind::MalformedInput, Location::Document, "empty input"));
            return Ok(out);
        }
        let head = &bytes[..bytes.len().min(HEADER_WINDOW)];
        match memmem::find(head, b"%PDF-") {
            None => out.push(ctx.indicator(
                IndicatorKind::MalformedInput,
                Location::Document,
                format!("no %PDF- header in the first {HEADER_WINDOW} bytes"),
            )),
            Some(offset) => {
                if offset > 0 {
                    let prefix = &bytes[..offset];
                    let what = PREFIX_MAGIC
                        .iter()
                        .find(|(magic, _)| prefix.len() >= magic.len() && prefix[..magic.len()].eq_ignore_ascii_case(magic))
                        .map(|(_, label)| format!(" ({label} signature at offset 0)"))
                        .unwrap_or_default();
                    out.push(ctx.indicator(
                        IndicatorKind::MalformedInput,
                        Location::Offset(offset as u64),
                        format!("%PDF- header at offset {offset}, {offset} bytes precede it{what}"),
                    ));
                }
                if !valid_version(&bytes[offset + 5..]) {
                    out.push(ctx.indicator(
                        IndicatorKind::MalformedInput,
                        Location::Offset(offset as u64),
                        "header version is not of the form N.N",
                    ));
                }
            }
        }
        let tail = &bytes[bytes.len().saturating_sub(EOF_WINDOW)..];
        if memmem::rfind(tail, b"%%EOF").is_none() {
            out.push(ctx.indicator(
                IndicatorKind::MalformedInput,
                Location::Document,
                format!("no %%EOF marker in the last {EOF_WINDOW} bytes"),
            ));
        }
        Ok(out)
    }
}

fn valid_version(rest: &[u8]) -> bool {
    matches!(rest, [major, b'.', minor, ..] if major.is_ascii_digit() && minor.is_ascii_digit())
}
