use anyhow::Result;

use vetpdf_core::detect::{Detector, Needs};
use vetpdf_core::{Indicator, IndicatorKind, ScanContext};
use vetpdf_pdf::Provenance;

use crate::{active_keys, at, is_active_dict};

/// Active content stored inside a compressed object stream, where simple
/// string scanners never see it.
pub struct ObjectStreamHidingDetector;

impl Detector for ObjectStreamHidingDetector {
    fn id(&self) -> &'static str {
        "object_stream_hiding"
    }

    fn needs(&self) -> Needs {
        Needs::OBJECT_GRAPH
    }

    fn run(&self, ctx: &ScanContext) -> Result<Vec<Indicator>> {
        let mut out = Vec::new();
        for entry in ctx.objects() {
            let Provenance::ObjectStream { container, .. } = entry.provenance else {
                continue;
            };
            let Some(dict) = entry.object.as_dict() else { continue };
            if !is_active_dict(dict) {
                continue;
            }
            out.push(ctx.indicator(
                IndicatorKind::ObjectStreamHiding,
                at(entry),
                format!(
                    "object {} with {} stored in object stream {}",
                    entry.id,
                    active_keys(dict).join(" "),
                    container
                ),
            ));
        }
        Ok(out)
    }
}
