use std::collections::BTreeSet;

use anyhow::Result;
use regex::Regex;
use tracing::debug;

use vetpdf_core::detect::{Detector, Needs};
use vetpdf_core::{Indicator, IndicatorKind, Location, ScanContext};
use vetpdf_pdf::{ObjectId, PdfObject};

use crate::{at, preview};

/// Only the head of a large stream is searched.
const MAX_SEARCH_BYTES: usize = 4 * 1024 * 1024;
const MATCH_PREVIEW: usize = 60;

/// Configured content patterns over decoded streams and string values, and
/// metadata patterns over the trailer `/Info` dictionary.
pub struct ContentPatternsDetector;

impl Detector for ContentPatternsDetector {
    fn id(&self) -> &'static str {
        "content_patterns"
    }

    fn needs(&self) -> Needs {
        Needs::OBJECT_GRAPH | Needs::STREAM_DECODE
    }

    fn run(&self, ctx: &ScanContext) -> Result<Vec<Indicator>> {
        let mut out = Vec::new();
        if !ctx.patterns.content.is_empty() {
            scan_content(ctx, &mut out);
        }
        if !ctx.patterns.metadata.is_empty() {
            scan_metadata(ctx, &mut out);
        }
        Ok(out)
    }
}

fn scan_content(ctx: &ScanContext, out: &mut Vec<Indicator>) {
    let mut reported: BTreeSet<(ObjectId, usize)> = BTreeSet::new();
    for entry in ctx.objects() {
        if ctx.budget.check().is_err() {
            debug!(object = %entry.id, "Content search stopped; budget exhausted");
            return;
        }
        if let Some(stream) = entry.object.as_stream() {
            if !stream.dict.has_name(b"Subtype", b"Image") {
                if let Some(data) = ctx.stream_data(entry.id) {
                    let text = String::from_utf8_lossy(&data[..data.len().min(MAX_SEARCH_BYTES)]);
                    for (index, found) in matches(&ctx.patterns.content, &text) {
                        if reported.insert((entry.id, index)) {
                            out.push(ctx.indicator(
                                IndicatorKind::SuspiciousContent,
                                at(entry),
                                format!("stream matches {}: {}", ctx.patterns.content[index].as_str(), found),
                            ));
                        }
                    }
                }
            }
        }
        entry.object.walk(|_, value| {
            let PdfObject::String(s) = value else { return };
            let text = s.lossy();
            for (index, found) in matches(&ctx.patterns.content, &text) {
                if reported.insert((entry.id, index)) {
                    out.push(ctx.indicator(
                        IndicatorKind::SuspiciousContent,
                        at(entry),
                        format!("string matches {}: {}", ctx.patterns.content[index].as_str(), found),
                    ));
                }
            }
        });
    }
}

fn scan_metadata(ctx: &ScanContext, out: &mut Vec<Indicator>) {
    let Some(info_value) = ctx.graph.trailers.iter().find_map(|t| t.get(b"Info")) else {
        return;
    };
    let Some(info) = ctx.graph.dict(info_value) else { return };
    let location = match info_value {
        PdfObject::Reference(id) => Location::Object(*id),
        _ => Location::Document,
    };
    let mut reported = BTreeSet::new();
    for (key, value) in &info.entries {
        let Some(text) = ctx.graph.value(value).and_then(|v| v.as_string()).map(|s| s.lossy()) else {
            continue;
        };
        for (index, found) in matches(&ctx.patterns.metadata, &text) {
            if reported.insert(index) {
                out.push(ctx.indicator(
                    IndicatorKind::SuspiciousMetadata,
                    location,
                    format!("/{} matches {}: {}", key.lossy(), ctx.patterns.metadata[index].as_str(), found),
                ));
            }
        }
    }
}

/// Index and preview of every pattern that matches `text`.
fn matches(patterns: &[Regex], text: &str) -> Vec<(usize, String)> {
    patterns
        .iter()
        .enumerate()
        .filter_map(|(index, re)| {
            let found = re.find(text)?;
            Some((index, preview(found.as_str().as_bytes(), MATCH_PREVIEW)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_each_matching_pattern_once() {
        let patterns = vec![Regex::new(r"(?i)eval\s*\(").unwrap(), Regex::new("cmd\\.exe").unwrap()];
        let found = matches(&patterns, "x = EVAL (a); eval(b)");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].0, 0);
        assert_eq!(found[0].1, "EVAL (");
        assert!(matches(&patterns, "nothing here").is_empty());
    }
}
