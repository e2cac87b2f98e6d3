use anyhow::Result;
use memchr::memmem;

use vetpdf_core::detect::{Detector, Needs};
use vetpdf_core::entropy::shannon_entropy;
use vetpdf_core::{Indicator, IndicatorKind, ScanContext};
use vetpdf_pdf::PdfObject;

use crate::{at, preview};

const PREVIEW_BYTES: usize = 60;
const ENTROPY_MIN_LEN: usize = 256;
const ENTROPY_THRESHOLD: f64 = 5.8;
const ESCAPE_SEQUENCE_THRESHOLD: usize = 32;
const LONG_TOKEN_BYTES: usize = 1024;

pub struct EmbeddedScriptDetector;

impl Detector for EmbeddedScriptDetector {
    fn id(&self) -> &'static str {
        "embedded_script"
    }

    fn needs(&self) -> Needs {
        Needs::OBJECT_GRAPH | Needs::STREAM_DECODE
    }

    fn run(&self, ctx: &ScanContext) -> Result<Vec<Indicator>> {
        let mut out = Vec::new();
        for entry in ctx.objects() {
            for dict in entry.object.dicts() {
                if let Some(js) = dict.get(b"JS") {
                    let body = script_body(ctx, js);
                    let detail = match &body {
                        Some(body) => format!("/JS {}: {}", body.source, preview(body.bytes, PREVIEW_BYTES)),
                        None => format!("/JS {} (not decodable)", js.type_name()),
                    };
                    out.push(ctx.indicator(IndicatorKind::EmbeddedScript, at(entry), detail));
                    if let Some(body) = body {
                        let reasons = obfuscation_reasons(body.bytes, body.escapes);
                        if !reasons.is_empty() {
                            out.push(ctx.indicator(IndicatorKind::ObfuscatedScript, at(entry), reasons.join("; ")));
                        }
                    }
                } else if dict.has_name(b"S", b"JavaScript") {
                    out.push(ctx.indicator(
                        IndicatorKind::EmbeddedScript,
                        at(entry),
                        "/S /JavaScript action without a /JS body",
                    ));
                }
                let name_tree = dict
                    .get(b"JavaScript")
                    .and_then(|v| ctx.graph.dict(v))
                    .is_some_and(|tree| tree.has(b"Names") || tree.has(b"Kids"));
                if name_tree {
                    out.push(ctx.indicator(
                        IndicatorKind::EmbeddedScript,
                        at(entry),
                        "document-level JavaScript name tree",
                    ));
                }
            }
        }
        Ok(out)
    }
}

pub(crate) struct ScriptBody<'c> {
    pub bytes: &'c [u8],
    pub escapes: usize,
    pub source: String,
}

/// The script text behind a `/JS` value: a string, or a stream after its
/// filters.
pub(crate) fn script_body<'c>(ctx: &'c ScanContext, value: &'c PdfObject) -> Option<ScriptBody<'c>> {
    match ctx.graph.value(value)? {
        PdfObject::String(s) => Some(ScriptBody {
            bytes: &s.decoded,
            escapes: s.escapes,
            source: if s.hex { "hex string".into() } else { "string".into() },
        }),
        PdfObject::Stream(_) => {
            let id = value.as_reference()?;
            Some(ScriptBody { bytes: ctx.stream_data(id)?, escapes: 0, source: format!("stream {id}") })
        }
        _ => None,
    }
}

fn obfuscation_reasons(body: &[u8], escapes: usize) -> Vec<String> {
    let mut reasons = Vec::new();
    if escapes >= 16 && escapes * 4 >= body.len() {
        reasons.push(format!("escape-heavy literal ({escapes} escapes in {} bytes)", body.len()));
    }
    let patterns: [&[u8]; 3] = [b"\\x", b"\\u", b"%u"];
    let sequences: usize = patterns.iter().map(|pat| memmem::find_iter(body, pat).count()).sum();
    if sequences >= ESCAPE_SEQUENCE_THRESHOLD {
        reasons.push(format!("{sequences} hex or unicode escape sequences"));
    }
    if body.len() >= ENTROPY_MIN_LEN {
        let entropy = shannon_entropy(body);
        if entropy >= ENTROPY_THRESHOLD {
            reasons.push(format!("entropy {entropy:.2} bits/byte"));
        }
    }
    let longest = body
        .split(|b| b.is_ascii_whitespace())
        .map(<[u8]>::len)
        .max()
        .unwrap_or(0);
    if longest >= LONG_TOKEN_BYTES {
        reasons.push(format!("{longest}-byte unbroken token"));
    }
    reasons
}

#[cfg(test)]
mod tests {
    use super::obfuscation_reasons;

    #[test]
    fn plain_script_is_not_obfuscated() {
        assert!(obfuscation_reasons(b"app.alert('hello world');", 0).is_empty());
    }

    #[test]
    fn escape_sequences_are_reported() {
        let body = "\\x41".repeat(40);
        let reasons = obfuscation_reasons(body.as_bytes(), 0);
        assert!(reasons.iter().any(|r| r.contains("40 hex or unicode")));
    }

    #[test]
    fn escape_heavy_literals_are_reported() {
        let reasons = obfuscation_reasons(b"abcdefghijklmnopqrstuvwxyz012345", 20);
        assert!(reasons[0].starts_with("escape-heavy literal"));
    }
}
