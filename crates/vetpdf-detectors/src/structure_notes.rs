use anyhow::Result;

use vetpdf_core::detect::{Detector, Needs};
use vetpdf_core::{Indicator, IndicatorKind, Location, ScanContext};
use vetpdf_pdf::{DecodeOutcome, NoteKind};

/// Surfaces what the graph builder and the decoder had to work around.
pub struct StructureNotesDetector;

impl Detector for StructureNotesDetector {
    fn id(&self) -> &'static str {
        "structure_notes"
    }

    fn needs(&self) -> Needs {
        Needs::GRAPH_NOTES | Needs::STREAM_DECODE
    }

    fn run(&self, ctx: &ScanContext) -> Result<Vec<Indicator>> {
        let mut out = Vec::new();
        for note in &ctx.graph.notes {
            let kind = match note.kind {
                NoteKind::MalformedInput => IndicatorKind::MalformedInput,
                NoteKind::StructuralLimitExceeded => IndicatorKind::StructuralLimitExceeded,
                NoteKind::OutOfBounds => IndicatorKind::OutOfBounds,
                NoteKind::StreamLengthMismatch => IndicatorKind::StreamLengthMismatch,
            };
            let location = match (note.object, note.offset) {
                (Some(id), _) => Location::Object(id),
                (None, Some(offset)) => Location::Offset(offset),
                (None, None) => Location::Document,
            };
            out.push(ctx.indicator(kind, location, format!("{}: {}", note.code, note.detail)));
        }
        for (id, outcome) in &ctx.decoded {
            if let DecodeOutcome::Failed { error, filters } = outcome {
                out.push(ctx.indicator(
                    IndicatorKind::UndecodableStream,
                    Location::Object(*id),
                    format!("[{}]: {error}", filters.join(", ")),
                ));
            }
        }
        Ok(out)
    }
}
