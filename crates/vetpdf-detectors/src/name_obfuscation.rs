use anyhow::Result;

use vetpdf_core::detect::{Detector, Needs};
use vetpdf_core::{Indicator, IndicatorKind, ScanContext};
use vetpdf_pdf::{PdfName, PdfObject};

use crate::{at, preview};

const NAMES_IN_DETAIL: usize = 3;
const MIN_STRING_ESCAPES: usize = 8;

pub struct NameObfuscationDetector;

impl Detector for NameObfuscationDetector {
    fn id(&self) -> &'static str {
        "name_obfuscation"
    }

    fn needs(&self) -> Needs {
        Needs::OBJECT_GRAPH
    }

    fn run(&self, ctx: &ScanContext) -> Result<Vec<Indicator>> {
        let mut out = Vec::new();
        for entry in ctx.objects() {
            let mut names: Vec<&PdfName> = Vec::new();
            let mut flagged = 0usize;
            let mut worst_string: Option<(usize, usize)> = None;
            entry.object.walk(|key, value| {
                for name in key.into_iter().chain(value.as_name()) {
                    if name_is_obfuscated(name) {
                        flagged += 1;
                        if names.len() < NAMES_IN_DETAIL {
                            names.push(name);
                        }
                    }
                }
                if let PdfObject::String(s) = value {
                    if !s.hex && escape_dominated(s.escapes, s.decoded.len()) {
                        let current = worst_string.map_or(0, |(escapes, _)| escapes);
                        if s.escapes > current {
                            worst_string = Some((s.escapes, s.decoded.len()));
                        }
                    }
                }
            });
            if flagged > 0 {
                let listed: Vec<String> =
                    names.iter().map(|n| format!("/{}", preview(&n.raw, 40))).collect();
                let more = if flagged > listed.len() { format!(" and {} more", flagged - listed.len()) } else { String::new() };
                out.push(ctx.indicator(
                    IndicatorKind::ObfuscatedName,
                    at(entry),
                    format!("escaped names {}{more}", listed.join(", ")),
                ));
            }
            if let Some((escapes, len)) = worst_string {
                out.push(ctx.indicator(
                    IndicatorKind::ObfuscatedString,
                    at(entry),
                    format!("literal string of {len} bytes written with {escapes} escapes"),
                ));
            }
        }
        Ok(out)
    }
}

/// `#xx` escapes of characters that need none, or control bytes.
fn name_is_obfuscated(name: &PdfName) -> bool {
    name.decoded.iter().any(|b| *b < 0x20 || *b == 0x7f) || has_needless_escape(&name.raw)
}

fn has_needless_escape(raw: &[u8]) -> bool {
    raw.windows(3).any(|w| {
        w[0] == b'#'
            && hex_value(w[1], w[2]).is_some_and(|b| b.is_ascii_alphanumeric())
    })
}

fn hex_value(hi: u8, lo: u8) -> Option<u8> {
    let hi = (hi as char).to_digit(16)?;
    let lo = (lo as char).to_digit(16)?;
    Some((hi * 16 + lo) as u8)
}

fn escape_dominated(escapes: usize, len: usize) -> bool {
    escapes >= MIN_STRING_ESCAPES && escapes * 4 >= len
}
