use std::collections::HashSet;

use anyhow::Result;

use vetpdf_core::detect::{Detector, Needs};
use vetpdf_core::{Indicator, IndicatorKind, ScanContext};
use vetpdf_pdf::stream_filters;

use crate::at;

/// Streams whose filter chain is longer than legitimate writers produce, or
/// that apply the same filter twice.
pub struct FilterChainDetector;

impl Detector for FilterChainDetector {
    fn id(&self) -> &'static str {
        "filter_chain"
    }

    fn needs(&self) -> Needs {
        Needs::OBJECT_GRAPH
    }

    fn run(&self, ctx: &ScanContext) -> Result<Vec<Indicator>> {
        let threshold = ctx.config.scan.deep_filter_chain;
        let mut out = Vec::new();
        for (entry, stream) in ctx.streams() {
            let filters = stream_filters(&stream.dict);
            if filters.len() < 2 {
                continue;
            }
            let repeated = first_repeat(&filters);
            if filters.len() < threshold && repeated.is_none() {
                continue;
            }
            let mut detail = format!("{} filters: {}", filters.len(), filters.join(" -> "));
            if let Some(name) = repeated {
                detail.push_str(&format!(" ({name} repeated)"));
            }
            out.push(ctx.indicator(IndicatorKind::DeepFilterChain, at(entry), detail));
        }
        Ok(out)
    }
}

fn first_repeat(filters: &[String]) -> Option<&str> {
    let mut seen = HashSet::new();
    filters.iter().find(|f| !seen.insert(f.as_str())).map(|f| f.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeat_is_detected() {
        let chain = vec!["ASCIIHexDecode".to_string(), "FlateDecode".to_string(), "FlateDecode".to_string()];
        assert_eq!(first_repeat(&chain), Some("FlateDecode"));
        assert_eq!(first_repeat(&chain[..2]), None);
    }
}
