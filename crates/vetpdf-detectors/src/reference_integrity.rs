use std::collections::BTreeSet;

use anyhow::Result;
use tracing::debug;

use vetpdf_core::detect::{Detector, Needs};
use vetpdf_core::{Indicator, IndicatorKind, ScanContext};
use vetpdf_pdf::{ObjectId, PdfObject, Resolved};

use crate::at;

const BUDGET_CHECK_INTERVAL: usize = 256;

/// Resolves every reference in the table once. Each broken target is
/// reported at the first object that points at it.
pub struct ReferenceIntegrityDetector;

impl Detector for ReferenceIntegrityDetector {
    fn id(&self) -> &'static str {
        "reference_integrity"
    }

    fn needs(&self) -> Needs {
        Needs::OBJECT_GRAPH
    }

    fn run(&self, ctx: &ScanContext) -> Result<Vec<Indicator>> {
        let mut out = Vec::new();
        let mut reported: BTreeSet<(IndicatorKind, ObjectId)> = BTreeSet::new();
        for (index, entry) in ctx.objects().enumerate() {
            if index % BUDGET_CHECK_INTERVAL == 0 && ctx.budget.check().is_err() {
                debug!(objects = index, "Reference walk stopped; budget exhausted");
                break;
            }
            let mut broken: Vec<(IndicatorKind, ObjectId, String)> = Vec::new();
            entry.object.walk(|_, value| {
                if !matches!(value, PdfObject::Reference(_)) {
                    return;
                }
                match ctx.graph.resolve(value) {
                    Resolved::Value(_) => {}
                    Resolved::Dangling(id) => {
                        broken.push((IndicatorKind::DanglingReference, id, format!("reference to missing object {id}")))
                    }
                    Resolved::Cycle(id) => broken.push((
                        IndicatorKind::ReferenceCycle,
                        id,
                        format!("reference chain loops back to object {id}"),
                    )),
                    Resolved::ChainTooLong(id) => broken.push((
                        IndicatorKind::StructuralLimitExceeded,
                        id,
                        format!(
                            "reference chain longer than {} hops at object {id}",
                            ctx.config.scan.max_reference_chain
                        ),
                    )),
                }
            });
            for (kind, id, detail) in broken {
                if reported.insert((kind, id)) {
                    out.push(ctx.indicator(kind, at(entry), detail));
                }
            }
        }
        Ok(out)
    }
}
