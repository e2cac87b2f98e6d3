use std::collections::HashSet;

use anyhow::Result;

use vetpdf_core::detect::{Detector, Needs};
use vetpdf_core::{Indicator, IndicatorKind, ScanContext};
use vetpdf_pdf::{ObjectId, PdfDict, PdfObject};

use crate::{at, preview};

const MAX_ACTION_CHAIN: usize = 8;

pub struct AutoActionDetector;

impl Detector for AutoActionDetector {
    fn id(&self) -> &'static str {
        "auto_action"
    }

    fn needs(&self) -> Needs {
        Needs::OBJECT_GRAPH
    }

    fn run(&self, ctx: &ScanContext) -> Result<Vec<Indicator>> {
        let mut out = Vec::new();
        for entry in ctx.objects() {
            for dict in entry.object.dicts() {
                if let Some(target) = dict.get(b"OpenAction") {
                    let chain = action_chain(ctx, target);
                    if is_active_chain(&chain) {
                        out.push(ctx.indicator(
                            IndicatorKind::AutoActionTrigger,
                            at(entry),
                            format!("/OpenAction runs {}", chain.join(" -> ")),
                        ));
                    }
                }
                if let Some(aa) = dict.get(b"AA").and_then(|v| ctx.graph.dict(v)) {
                    for (event, action) in &aa.entries {
                        if !is_automatic_event(&event.decoded) {
                            continue;
                        }
                        let chain = action_chain(ctx, action);
                        if is_active_chain(&chain) {
                            out.push(ctx.indicator(
                                IndicatorKind::AutoActionTrigger,
                                at(entry),
                                format!("/AA /{} runs {}", event.lossy(), chain.join(" -> ")),
                            ));
                        }
                    }
                }
                if dict.has_name(b"S", b"Launch") {
                    out.push(ctx.indicator(
                        IndicatorKind::LaunchAction,
                        at(entry),
                        format!("/S /Launch of {}", launch_target(ctx, dict)),
                    ));
                }
            }
        }
        Ok(out)
    }
}

/// Page open/close, visibility and document-level events fire without any
/// user interaction.
fn is_automatic_event(name: &[u8]) -> bool {
    matches!(name, b"O" | b"C" | b"PO" | b"PC" | b"PV" | b"PI" | b"WC" | b"WS" | b"DS" | b"WP" | b"DP")
}

/// `/S` names along an action and its `/Next` successors. Destination
/// arrays yield an empty chain.
fn action_chain(ctx: &ScanContext, start: &PdfObject) -> Vec<String> {
    let mut chain = Vec::new();
    let mut seen: HashSet<ObjectId> = HashSet::new();
    let mut pending = vec![start];
    while let Some(obj) = pending.pop() {
        if chain.len() >= MAX_ACTION_CHAIN {
            break;
        }
        if let Some(id) = obj.as_reference() {
            if !seen.insert(id) {
                continue;
            }
        }
        let Some(value) = ctx.graph.value(obj) else { continue };
        if let Some(items) = value.as_array() {
            if items.iter().all(|i| i.as_dict().is_some() || i.as_reference().is_some()) {
                pending.extend(items.iter().rev());
            }
            continue;
        }
        let Some(action) = value.as_dict() else { continue };
        let Some(kind) = action.name(b"S") else { continue };
        chain.push(format!("/{}", kind.lossy()));
        if let Some(next) = action.get(b"Next") {
            pending.push(next);
        }
    }
    chain
}

fn is_active_chain(chain: &[String]) -> bool {
    chain.iter().any(|s| s != "/GoTo" && s != "/Named")
}

fn launch_target(ctx: &ScanContext, action: &PdfDict) -> String {
    let file = action
        .get(b"F")
        .or_else(|| action.get(b"Win").and_then(|w| ctx.graph.dict(w)).and_then(|w| w.get(b"F")));
    let Some(file) = file.and_then(|f| ctx.graph.value(f)) else {
        return "an unnamed target".into();
    };
    match file {
        PdfObject::String(s) => preview(&s.decoded, 80),
        PdfObject::Dictionary(spec) => spec
            .get(b"UF")
            .or_else(|| spec.get(b"F"))
            .and_then(|f| f.as_string())
            .map(|s| preview(&s.decoded, 80))
            .unwrap_or_else(|| "a file specification".into()),
        other => format!("a {}", other.type_name()),
    }
}
